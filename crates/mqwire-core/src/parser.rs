//! Incremental packet parser.
//!
//! Bytes arrive in arbitrary chunks. The parser keeps them in a
//! [`ByteAccumulator`] and walks each packet through four states:
//!
//! 1. `Header`: one byte with the packet type and flags.
//! 2. `Length`: the remaining length varint, 1 to 4 bytes.
//! 3. `Payload`: waits for `remaining_length` bytes, then decodes the fields.
//! 4. `Dispatch`: consumes the packet bytes and hands the packet out.
//!
//! Any state can be suspended when the buffer runs dry and resumed by the
//! next [`Parser::push`], so the packets produced never depend on how the
//! stream was split.
//!
//! ```
//! use mqwire_core::{Packet, Parser};
//!
//! let mut parser = Parser::new();
//! assert!(parser.parse(&[0xD0]).unwrap().is_empty());
//! assert_eq!(parser.parse(&[0x00]).unwrap(), vec![Packet::Pingresp]);
//! ```

use bytes::Bytes;

use crate::buffer::ByteAccumulator;
use crate::error::{ProtocolError, Result};
use crate::packet::{
    connect_flags, Connack, ConnackCode, Connect, Packet, PacketType, ProtocolVersion, Publish,
    QoS, Suback, Subscribe, Unsubscribe, Will,
};
use crate::varint;

/// Decoded first byte of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

impl FixedHeader {
    pub fn parse(byte: u8) -> Result<Self> {
        let packet_type = PacketType::try_from(byte >> 4)?;
        let qos = QoS::try_from((byte >> 1) & 0x03)?;

        // SUBSCRIBE, UNSUBSCRIBE and PUBREL must be sent at QoS 1
        if matches!(
            packet_type,
            PacketType::Subscribe | PacketType::Unsubscribe | PacketType::Pubrel
        ) && qos != QoS::AtLeastOnce
        {
            return Err(ProtocolError::InvalidHeaderFlags {
                packet_type,
                flags: byte & 0x0F,
            });
        }

        Ok(Self {
            packet_type,
            dup: (byte & 0x08) != 0,
            qos,
            retain: (byte & 0x01) != 0,
        })
    }
}

#[derive(Debug)]
enum State {
    Header,
    Length(FixedHeader),
    Payload(FixedHeader, usize),
    Dispatch(usize, Packet),
}

/// Resumable MQTT packet parser for one connection.
#[derive(Debug)]
pub struct Parser {
    buffer: ByteAccumulator,
    state: State,
    /// Set after a decode error; the next `push` starts from scratch.
    poisoned: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: ByteAccumulator::new(),
            state: State::Header,
            poisoned: false,
        }
    }

    /// Queue a chunk of received bytes.
    ///
    /// If the previous decode failed, all state from before the failure is
    /// dropped first; there is no attempt to resynchronise.
    pub fn push(&mut self, data: &[u8]) {
        if self.poisoned {
            self.reset();
        }
        self.buffer.append(data);
    }

    /// Decode the next complete packet, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed, or after an error until
    /// the next `push`.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.poisoned {
            return Ok(None);
        }
        self.step().inspect_err(|e| {
            log::warn!("Discarding {} buffered bytes: {}", self.buffer.len(), e);
            self.poisoned = true;
        })
    }

    /// Iterate over every packet currently decodable.
    ///
    /// The iterator ends after yielding an error.
    pub fn packets(&mut self) -> Packets<'_> {
        Packets { parser: self }
    }

    /// Push `data` and collect every packet it completes.
    ///
    /// On error, packets decoded earlier from the same call are dropped. Use
    /// [`Parser::packets`] to keep them.
    pub fn parse(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        self.push(data);
        self.packets().collect()
    }

    /// Bytes received but not yet consumed by a finished packet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Remaining length of the packet in progress, once it is known.
    pub fn remaining_length(&self) -> Option<usize> {
        match &self.state {
            State::Payload(_, len) | State::Dispatch(len, _) => Some(*len),
            State::Header | State::Length(_) => None,
        }
    }

    /// Drop all buffered bytes and any partially parsed packet.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::Header;
        self.poisoned = false;
    }

    fn step(&mut self) -> Result<Option<Packet>> {
        loop {
            match std::mem::replace(&mut self.state, State::Header) {
                State::Header => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let header = FixedHeader::parse(self.buffer.read_u8(0)?)?;
                    self.buffer.consume(1)?;
                    self.state = State::Length(header);
                }
                State::Length(header) => match varint::decode(self.buffer.as_slice())? {
                    Some((len, used)) => {
                        self.buffer.consume(used)?;
                        self.state = State::Payload(header, len);
                    }
                    None => {
                        self.state = State::Length(header);
                        return Ok(None);
                    }
                },
                State::Payload(header, len) => {
                    if self.buffer.len() < len {
                        self.state = State::Payload(header, len);
                        return Ok(None);
                    }
                    let packet = decode_body(&header, Cursor::new(&self.buffer, len))?;
                    self.state = State::Dispatch(len, packet);
                }
                State::Dispatch(len, packet) => {
                    self.buffer.consume(len)?;
                    log::trace!("Decoded {:?} ({} bytes)", packet.packet_type(), len);
                    return Ok(Some(packet));
                }
            }
        }
    }
}

/// Iterator returned by [`Parser::packets`].
pub struct Packets<'a> {
    parser: &'a mut Parser,
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_packet().transpose()
    }
}

/// Read position inside the packet at the front of the accumulator.
///
/// Never reads past `end`, the packet's remaining length, and never
/// mutates the accumulator.
struct Cursor<'a> {
    buf: &'a ByteAccumulator,
    pos: usize,
    end: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a ByteAccumulator, end: usize) -> Self {
        Self { buf, pos: 0, end }
    }

    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(ProtocolError::Truncated {
                field,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        self.ensure(field, 1)?;
        let b = self.buf.read_u8(self.pos)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self, field: &'static str) -> Result<u16> {
        self.ensure(field, 2)?;
        let val = self.buf.read_u16_be(self.pos)?;
        self.pos += 2;
        Ok(val)
    }

    fn read_string(&mut self, field: &'static str) -> Result<String> {
        let len = self.read_u16(field)? as usize;
        self.ensure(field, len)?;
        let s = self.buf.decode_utf8(self.pos, len)?;
        self.pos += len;
        Ok(s)
    }

    fn read_binary(&mut self, field: &'static str) -> Result<Bytes> {
        let len = self.read_u16(field)? as usize;
        self.ensure(field, len)?;
        let bytes = self.buf.slice(self.pos, self.pos + len)?;
        self.pos += len;
        Ok(bytes)
    }

    fn read_rest(&mut self) -> Result<Bytes> {
        let bytes = self.buf.slice(self.pos, self.end)?;
        self.pos = self.end;
        Ok(bytes)
    }
}

fn decode_body(header: &FixedHeader, mut cur: Cursor<'_>) -> Result<Packet> {
    let packet = match header.packet_type {
        PacketType::Connect => decode_connect(&mut cur)?,
        PacketType::Connack => decode_connack(&mut cur)?,
        PacketType::Publish => decode_publish(header, &mut cur)?,
        PacketType::Puback => Packet::Puback {
            packet_id: cur.read_u16("packet id")?,
        },
        PacketType::Pubrec => Packet::Pubrec {
            packet_id: cur.read_u16("packet id")?,
        },
        PacketType::Pubrel => Packet::Pubrel {
            packet_id: cur.read_u16("packet id")?,
        },
        PacketType::Pubcomp => Packet::Pubcomp {
            packet_id: cur.read_u16("packet id")?,
        },
        PacketType::Subscribe => decode_subscribe(&mut cur)?,
        PacketType::Suback => decode_suback(&mut cur)?,
        PacketType::Unsubscribe => decode_unsubscribe(&mut cur)?,
        PacketType::Unsuback => Packet::Unsuback {
            packet_id: cur.read_u16("packet id")?,
        },
        PacketType::Pingreq => Packet::Pingreq,
        PacketType::Pingresp => Packet::Pingresp,
        PacketType::Disconnect => Packet::Disconnect,
    };
    Ok(packet)
}

fn decode_connect(cur: &mut Cursor<'_>) -> Result<Packet> {
    let protocol_name = cur.read_string("protocol name")?;
    let named = match protocol_name.as_str() {
        "MQIsdp" => ProtocolVersion::V31,
        "MQTT" => ProtocolVersion::V311,
        _ => return Err(ProtocolError::InvalidProtocolName(protocol_name)),
    };

    let level = cur.read_u8("protocol level")?;
    let protocol_version = ProtocolVersion::from_level(level)?;
    if protocol_version != named {
        return Err(ProtocolError::ProtocolMismatch {
            name: protocol_name,
            version: level,
        });
    }

    let flags = cur.read_u8("connect flags")?;
    let keep_alive = cur.read_u16("keep alive")?;
    let client_id = cur.read_string("client id")?;

    let will = if flags & connect_flags::WILL != 0 {
        let qos = QoS::try_from(
            (flags & connect_flags::WILL_QOS_MASK) >> connect_flags::WILL_QOS_SHIFT,
        )?;
        Some(Will {
            topic: cur.read_string("will topic")?,
            payload: cur.read_binary("will payload")?,
            qos,
            retain: flags & connect_flags::WILL_RETAIN != 0,
        })
    } else {
        None
    };

    let username = if flags & connect_flags::USERNAME != 0 {
        Some(cur.read_string("username")?)
    } else {
        None
    };

    let password = if flags & connect_flags::PASSWORD != 0 {
        Some(cur.read_binary("password")?)
    } else {
        None
    };

    Ok(Packet::Connect(Connect {
        protocol_version,
        clean_session: flags & connect_flags::CLEAN_SESSION != 0,
        keep_alive,
        client_id,
        will,
        username,
        password,
    }))
}

fn decode_connack(cur: &mut Cursor<'_>) -> Result<Packet> {
    let ack_flags = cur.read_u8("connack flags")?;
    let code = ConnackCode::try_from(cur.read_u8("connack return code")?)?;
    Ok(Packet::Connack(Connack {
        session_present: ack_flags & 0x01 != 0,
        code,
    }))
}

fn decode_publish(header: &FixedHeader, cur: &mut Cursor<'_>) -> Result<Packet> {
    let topic = cur.read_string("topic")?;
    let packet_id = if header.qos != QoS::AtMostOnce {
        Some(cur.read_u16("packet id")?)
    } else {
        None
    };
    let payload = cur.read_rest()?;

    Ok(Packet::Publish(Publish {
        dup: header.dup,
        qos: header.qos,
        retain: header.retain,
        topic,
        packet_id,
        payload,
    }))
}

fn decode_subscribe(cur: &mut Cursor<'_>) -> Result<Packet> {
    let packet_id = cur.read_u16("packet id")?;
    let mut topics = Vec::new();
    while !cur.is_empty() {
        let topic = cur.read_string("topic filter")?;
        let qos = QoS::try_from(cur.read_u8("requested qos")?)?;
        topics.push((topic, qos));
    }
    Ok(Packet::Subscribe(Subscribe { packet_id, topics }))
}

fn decode_suback(cur: &mut Cursor<'_>) -> Result<Packet> {
    let packet_id = cur.read_u16("packet id")?;
    let return_codes = cur.read_rest()?.to_vec();
    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes,
    }))
}

fn decode_unsubscribe(cur: &mut Cursor<'_>) -> Result<Packet> {
    let packet_id = cur.read_u16("packet id")?;
    let mut topics = Vec::new();
    while !cur.is_empty() {
        topics.push(cur.read_string("topic filter")?);
    }
    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
}
