//! Registry of callers waiting for an acknowledgment.

use std::collections::{HashMap, VecDeque};

use mqwire_core::{Packet, PacketType};
use tokio::sync::oneshot;

use crate::error::{ClientError, Result};

/// Identifies the acknowledgment a caller is waiting for.
///
/// `packet_id` is the id of the outgoing packet. A waiter without one
/// accepts an ack of the right type with any id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckKey {
    pub packet_type: PacketType,
    pub packet_id: Option<u16>,
}

impl AckKey {
    pub fn new(packet_type: PacketType, packet_id: Option<u16>) -> Self {
        Self {
            packet_type,
            packet_id,
        }
    }
}

pub(crate) type Waiter = oneshot::Sender<Result<Packet>>;

/// Waiters grouped by key, oldest first.
///
/// A waiter is a oneshot sender, so it settles at most once. Waiters whose
/// receiver is gone (timed out or dropped) are skipped and pruned.
#[derive(Debug, Default)]
pub(crate) struct PendingAcks {
    waiters: HashMap<AckKey, VecDeque<Waiter>>,
}

impl PendingAcks {
    pub fn register(&mut self, key: AckKey, waiter: Waiter) {
        log::debug!("Awaiting {:?} (packet id {:?})", key.packet_type, key.packet_id);
        self.waiters.entry(key).or_default().push_back(waiter);
    }

    /// Hand `packet` to the oldest matching waiter.
    ///
    /// Tries the exact (type, id) key first, then the id-less key for the
    /// same type. Returns whether a waiter took it.
    pub fn settle(&mut self, packet: &Packet) -> bool {
        let packet_type = packet.packet_type();
        let packet_id = packet.packet_id();

        let mut keys = vec![AckKey::new(packet_type, packet_id)];
        if packet_id.is_some() {
            keys.push(AckKey::new(packet_type, None));
        }

        for key in keys {
            if let Some(waiter) = self.take_live(&key) {
                log::debug!("Settled {:?} (packet id {:?})", packet_type, packet_id);
                // Receiver may have dropped since the liveness check.
                let _ = waiter.send(Ok(packet.clone()));
                return true;
            }
        }
        false
    }

    /// Drop waiters whose caller stopped listening.
    pub fn prune(&mut self) -> usize {
        let before = self.len();
        self.waiters.retain(|_, queue| {
            queue.retain(|w| !w.is_closed());
            !queue.is_empty()
        });
        before - self.len()
    }

    /// Reject every waiter with an error built by `err`.
    pub fn fail_all(&mut self, err: impl Fn() -> ClientError) -> usize {
        let mut failed = 0;
        for (_, queue) in self.waiters.drain() {
            for waiter in queue {
                if waiter.send(Err(err())).is_ok() {
                    failed += 1;
                }
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.waiters.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    fn take_live(&mut self, key: &AckKey) -> Option<Waiter> {
        let queue = self.waiters.get_mut(key)?;
        let mut found = None;
        while let Some(waiter) = queue.pop_front() {
            if !waiter.is_closed() {
                found = Some(waiter);
                break;
            }
        }
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use mqwire_core::Suback;

    use super::*;

    fn suback(packet_id: u16) -> Packet {
        Packet::Suback(Suback {
            packet_id,
            return_codes: vec![0],
        })
    }

    #[test]
    fn test_settle_by_packet_id() {
        let mut pending = PendingAcks::default();
        let (tx7, mut rx7) = oneshot::channel();
        let (tx8, mut rx8) = oneshot::channel();
        pending.register(AckKey::new(PacketType::Suback, Some(7)), tx7);
        pending.register(AckKey::new(PacketType::Suback, Some(8)), tx8);

        assert!(pending.settle(&suback(8)));
        assert!(rx7.try_recv().is_err());
        assert_eq!(rx8.try_recv().unwrap().unwrap(), suback(8));

        assert!(pending.settle(&suback(7)));
        assert_eq!(rx7.try_recv().unwrap().unwrap(), suback(7));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_mismatched_id_is_ignored() {
        let mut pending = PendingAcks::default();
        let (tx, mut rx) = oneshot::channel();
        pending.register(AckKey::new(PacketType::Suback, Some(7)), tx);

        assert!(!pending.settle(&suback(9)));
        assert!(!pending.settle(&Packet::Unsuback { packet_id: 7 }));
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_idless_waiters_are_fifo() {
        let mut pending = PendingAcks::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        pending.register(AckKey::new(PacketType::Pingresp, None), tx1);
        pending.register(AckKey::new(PacketType::Pingresp, None), tx2);

        assert!(pending.settle(&Packet::Pingresp));
        assert!(rx1.try_recv().unwrap().is_ok());
        assert!(rx2.try_recv().is_err());

        assert!(pending.settle(&Packet::Pingresp));
        assert!(rx2.try_recv().unwrap().is_ok());
        assert!(!pending.settle(&Packet::Pingresp));
    }

    #[test]
    fn test_idless_waiter_accepts_any_id() {
        let mut pending = PendingAcks::default();
        let (tx, mut rx) = oneshot::channel();
        pending.register(AckKey::new(PacketType::Puback, None), tx);
        assert!(pending.settle(&Packet::Puback { packet_id: 99 }));
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            Packet::Puback { packet_id: 99 }
        );
    }

    #[test]
    fn test_dropped_waiter_is_skipped_and_pruned() {
        let mut pending = PendingAcks::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        pending.register(AckKey::new(PacketType::Connack, None), tx1);
        pending.register(AckKey::new(PacketType::Puback, Some(1)), tx2);
        drop(rx1);

        assert_eq!(pending.prune(), 1);
        assert_eq!(pending.len(), 1);

        assert!(pending.settle(&Packet::Puback { packet_id: 1 }));
        assert!(rx2.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_fail_all() {
        let mut pending = PendingAcks::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        pending.register(AckKey::new(PacketType::Connack, None), tx1);
        pending.register(AckKey::new(PacketType::Suback, Some(3)), tx2);

        assert_eq!(pending.fail_all(|| ClientError::Transport("reset".into())), 2);
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Err(ClientError::Transport(_))
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(ClientError::Transport(_))
        ));
        assert!(pending.is_empty());

        // Nothing left to settle.
        assert!(!pending.settle(&suback(3)));
    }
}
