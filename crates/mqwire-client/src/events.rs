//! Events yielded by the event loop.

use mqwire_core::Packet;

/// What [`EventLoop::poll`](crate::EventLoop::poll) hands upward.
///
/// Every decoded packet shows up here, including acknowledgments that
/// also completed a pending `send_with_ack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A packet decoded from the transport.
    Packet(Packet),
    /// The transport reported an error. Pending acknowledgments were failed.
    Error(String),
    /// The transport closed. Pending acknowledgments were failed.
    Closed(Option<String>),
}
