//! Packet encoding.
//!
//! Every encoder sizes the packet first, allocates the exact frame once and
//! then writes the fixed header, the remaining length and the fields in
//! order.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{prefixed_len, put_prefixed};
use crate::error::EncodeError;
use crate::packet::{
    connect_flags, Connack, Connect, Packet, PacketType, Publish, QoS, Suback, Subscribe,
    Unsubscribe,
};
use crate::varint;

type Result<T> = std::result::Result<T, EncodeError>;

const fn header(packet_type: PacketType, flags: u8) -> u8 {
    ((packet_type as u8) << 4) | flags
}

const fn publish_headers() -> [[[u8; 2]; 2]; 3] {
    let mut table = [[[0u8; 2]; 2]; 3];
    let mut qos = 0;
    while qos < 3 {
        let mut dup = 0;
        while dup < 2 {
            let mut retain = 0;
            while retain < 2 {
                let flags = ((dup as u8) << 3) | ((qos as u8) << 1) | retain as u8;
                table[qos][dup][retain] = header(PacketType::Publish, flags);
                retain += 1;
            }
            dup += 1;
        }
        qos += 1;
    }
    table
}

/// PUBLISH fixed header bytes indexed by `[qos][dup][retain]`.
static PUBLISH_HEADER: [[[u8; 2]; 2]; 3] = publish_headers();

const CONNECT_HEADER: u8 = header(PacketType::Connect, 0);
const CONNACK_HEADER: u8 = header(PacketType::Connack, 0);
const PUBACK_HEADER: u8 = header(PacketType::Puback, 0);
const PUBREC_HEADER: u8 = header(PacketType::Pubrec, 0);
// SUBSCRIBE, UNSUBSCRIBE and PUBREL carry QoS 1 in the fixed header.
const PUBREL_HEADER: u8 = header(PacketType::Pubrel, 0x02);
const PUBCOMP_HEADER: u8 = header(PacketType::Pubcomp, 0);
const SUBSCRIBE_HEADER: u8 = header(PacketType::Subscribe, 0x02);
const SUBACK_HEADER: u8 = header(PacketType::Suback, 0);
const UNSUBSCRIBE_HEADER: u8 = header(PacketType::Unsubscribe, 0x02);
const UNSUBACK_HEADER: u8 = header(PacketType::Unsuback, 0);
const PINGREQ_HEADER: u8 = header(PacketType::Pingreq, 0);
const PINGRESP_HEADER: u8 = header(PacketType::Pingresp, 0);
const DISCONNECT_HEADER: u8 = header(PacketType::Disconnect, 0);

/// Encode any packet into a single contiguous frame.
pub fn encode(packet: &Packet) -> Result<Bytes> {
    match packet {
        Packet::Connect(connect) => encode_connect(connect),
        Packet::Connack(connack) => Ok(encode_connack(connack)),
        Packet::Publish(publish) => encode_publish(publish),
        Packet::Puback { packet_id } => encode_ack(PUBACK_HEADER, *packet_id),
        Packet::Pubrec { packet_id } => encode_ack(PUBREC_HEADER, *packet_id),
        Packet::Pubrel { packet_id } => encode_ack(PUBREL_HEADER, *packet_id),
        Packet::Pubcomp { packet_id } => encode_ack(PUBCOMP_HEADER, *packet_id),
        Packet::Subscribe(subscribe) => encode_subscribe(subscribe),
        Packet::Suback(suback) => encode_suback(suback),
        Packet::Unsubscribe(unsubscribe) => encode_unsubscribe(unsubscribe),
        Packet::Unsuback { packet_id } => encode_ack(UNSUBACK_HEADER, *packet_id),
        Packet::Pingreq => Ok(encode_empty(PINGREQ_HEADER)),
        Packet::Pingresp => Ok(encode_empty(PINGRESP_HEADER)),
        Packet::Disconnect => Ok(encode_empty(DISCONNECT_HEADER)),
    }
}

/// Start a frame sized for `remaining` bytes after the fixed header.
fn frame(header: u8, remaining: usize) -> Result<BytesMut> {
    if remaining > varint::MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge(remaining));
    }
    let mut buf = BytesMut::with_capacity(1 + varint::encoded_len(remaining) + remaining);
    buf.put_u8(header);
    varint::encode(remaining, &mut buf)?;
    Ok(buf)
}

fn check_packet_id(packet_id: u16) -> Result<()> {
    if packet_id == 0 {
        return Err(EncodeError::ZeroPacketId);
    }
    Ok(())
}

/// Encode a CONNECT packet.
///
/// A password without a username is rejected.
pub fn encode_connect(connect: &Connect) -> Result<Bytes> {
    let protocol_name = connect.protocol_version.protocol_name().as_bytes();
    if connect.password.is_some() && connect.username.is_none() {
        return Err(EncodeError::PasswordWithoutUsername);
    }

    // Protocol name, level, flags, keep alive, client id
    let mut remaining =
        prefixed_len(protocol_name)? + 1 + 1 + 2 + prefixed_len(connect.client_id.as_bytes())?;
    let mut flags = 0u8;

    if connect.clean_session {
        flags |= connect_flags::CLEAN_SESSION;
    }
    if let Some(will) = &connect.will {
        flags |= connect_flags::WILL | ((will.qos as u8) << connect_flags::WILL_QOS_SHIFT);
        if will.retain {
            flags |= connect_flags::WILL_RETAIN;
        }
        remaining += prefixed_len(will.topic.as_bytes())? + prefixed_len(&will.payload)?;
    }
    if let Some(username) = &connect.username {
        flags |= connect_flags::USERNAME;
        remaining += prefixed_len(username.as_bytes())?;
    }
    if let Some(password) = &connect.password {
        flags |= connect_flags::PASSWORD;
        remaining += prefixed_len(password)?;
    }

    let mut buf = frame(CONNECT_HEADER, remaining)?;
    put_prefixed(&mut buf, protocol_name);
    buf.put_u8(connect.protocol_version.level());
    buf.put_u8(flags);
    buf.put_u16(connect.keep_alive);
    put_prefixed(&mut buf, connect.client_id.as_bytes());
    if let Some(will) = &connect.will {
        put_prefixed(&mut buf, will.topic.as_bytes());
        put_prefixed(&mut buf, &will.payload);
    }
    if let Some(username) = &connect.username {
        put_prefixed(&mut buf, username.as_bytes());
    }
    if let Some(password) = &connect.password {
        put_prefixed(&mut buf, password);
    }
    Ok(buf.freeze())
}

/// Encode a CONNACK packet.
pub fn encode_connack(connack: &Connack) -> Bytes {
    Bytes::copy_from_slice(&[
        CONNACK_HEADER,
        2,
        connack.session_present as u8,
        connack.code as u8,
    ])
}

/// Encode a PUBLISH packet.
///
/// The packet id is written iff QoS > 0; any other combination is rejected.
pub fn encode_publish(publish: &Publish) -> Result<Bytes> {
    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, Some(_)) => return Err(EncodeError::UnexpectedPacketId),
        (QoS::AtMostOnce, None) => {}
        (_, None) => return Err(EncodeError::MissingPacketId),
        (_, Some(id)) => check_packet_id(id)?,
    }

    let remaining = prefixed_len(publish.topic.as_bytes())?
        + publish.packet_id.map_or(0, |_| 2)
        + publish.payload.len();
    let header =
        PUBLISH_HEADER[publish.qos as usize][publish.dup as usize][publish.retain as usize];

    let mut buf = frame(header, remaining)?;
    put_prefixed(&mut buf, publish.topic.as_bytes());
    if let Some(id) = publish.packet_id {
        buf.put_u16(id);
    }
    buf.put_slice(&publish.payload);
    Ok(buf.freeze())
}

/// Encode a SUBSCRIBE packet.
pub fn encode_subscribe(subscribe: &Subscribe) -> Result<Bytes> {
    check_packet_id(subscribe.packet_id)?;
    if subscribe.topics.is_empty() {
        return Err(EncodeError::EmptyTopicList(PacketType::Subscribe));
    }

    let mut remaining = 2;
    for (topic, _) in &subscribe.topics {
        remaining += prefixed_len(topic.as_bytes())? + 1;
    }

    let mut buf = frame(SUBSCRIBE_HEADER, remaining)?;
    buf.put_u16(subscribe.packet_id);
    for (topic, qos) in &subscribe.topics {
        put_prefixed(&mut buf, topic.as_bytes());
        buf.put_u8(*qos as u8);
    }
    Ok(buf.freeze())
}

/// Encode a SUBACK packet.
pub fn encode_suback(suback: &Suback) -> Result<Bytes> {
    check_packet_id(suback.packet_id)?;
    let mut buf = frame(SUBACK_HEADER, 2 + suback.return_codes.len())?;
    buf.put_u16(suback.packet_id);
    buf.put_slice(&suback.return_codes);
    Ok(buf.freeze())
}

/// Encode an UNSUBSCRIBE packet.
pub fn encode_unsubscribe(unsubscribe: &Unsubscribe) -> Result<Bytes> {
    check_packet_id(unsubscribe.packet_id)?;
    if unsubscribe.topics.is_empty() {
        return Err(EncodeError::EmptyTopicList(PacketType::Unsubscribe));
    }

    let mut remaining = 2;
    for topic in &unsubscribe.topics {
        remaining += prefixed_len(topic.as_bytes())?;
    }

    let mut buf = frame(UNSUBSCRIBE_HEADER, remaining)?;
    buf.put_u16(unsubscribe.packet_id);
    for topic in &unsubscribe.topics {
        put_prefixed(&mut buf, topic.as_bytes());
    }
    Ok(buf.freeze())
}

fn encode_ack(header: u8, packet_id: u16) -> Result<Bytes> {
    check_packet_id(packet_id)?;
    let [hi, lo] = packet_id.to_be_bytes();
    Ok(Bytes::copy_from_slice(&[header, 2, hi, lo]))
}

fn encode_empty(header: u8) -> Bytes {
    Bytes::copy_from_slice(&[header, 0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ConnackCode, ProtocolVersion, Will};

    #[test]
    fn test_publish_header_table() {
        assert_eq!(PUBLISH_HEADER[0][0][0], 0x30);
        assert_eq!(PUBLISH_HEADER[0][0][1], 0x31);
        assert_eq!(PUBLISH_HEADER[1][0][0], 0x32);
        assert_eq!(PUBLISH_HEADER[2][1][1], 0x3D);
        assert_eq!(SUBSCRIBE_HEADER, 0x82);
        assert_eq!(UNSUBSCRIBE_HEADER, 0xA2);
        assert_eq!(PUBREL_HEADER, 0x62);
    }

    #[test]
    fn test_encode_publish_qos1() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "World".to_string(),
            packet_id: Some(42),
            payload: Bytes::from_static(b"Hello"),
        };
        let bytes = encode_publish(&publish).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x32, 14, 0x00, 0x05, b'W', b'o', b'r', b'l', b'd', 0x00, 0x2A, b'H', b'e',
                b'l', b'l', b'o'
            ]
        );
    }

    #[test]
    fn test_encode_publish_qos0_has_no_packet_id() {
        let bytes = encode_publish(&Publish::new("a", "b")).unwrap();
        assert_eq!(&bytes[..], &[0x30, 4, 0x00, 0x01, b'a', b'b']);
    }

    #[test]
    fn test_encode_publish_packet_id_rules() {
        let mut publish = Publish::new("t", "p");
        publish.packet_id = Some(1);
        assert_eq!(encode_publish(&publish), Err(EncodeError::UnexpectedPacketId));

        publish.qos = QoS::AtLeastOnce;
        publish.packet_id = None;
        assert_eq!(encode_publish(&publish), Err(EncodeError::MissingPacketId));

        publish.packet_id = Some(0);
        assert_eq!(encode_publish(&publish), Err(EncodeError::ZeroPacketId));
    }

    #[test]
    fn test_encode_large_publish_length() {
        let publish = Publish::new("t", vec![0u8; 16381]);
        let bytes = encode_publish(&publish).unwrap();
        // 3 (topic) + 16381 (payload) = 16384
        assert_eq!(&bytes[..4], &[0x30, 0x80, 0x80, 0x01]);
        assert_eq!(bytes.len(), 1 + 3 + 16384);
    }

    #[test]
    fn test_encode_connect_v311() {
        let connect = Connect {
            protocol_version: ProtocolVersion::V311,
            clean_session: true,
            keep_alive: 60,
            client_id: "c1".to_string(),
            will: None,
            username: None,
            password: None,
        };
        let bytes = encode_connect(&connect).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x10, 14, 0x00, 0x04, b'M', b'Q', b'T', b'T', 4, 0x02, 0x00, 60, 0x00, 0x02,
                b'c', b'1'
            ]
        );
    }

    #[test]
    fn test_encode_connect_flags() {
        let connect = Connect {
            protocol_version: ProtocolVersion::V31,
            clean_session: false,
            keep_alive: 10,
            client_id: "id".to_string(),
            will: Some(Will {
                topic: "w".to_string(),
                payload: Bytes::from_static(b"bye"),
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
            username: Some("u".to_string()),
            password: Some(Bytes::from_static(b"pw")),
        };
        let bytes = encode_connect(&connect).unwrap();
        assert_eq!(&bytes[2..10], &[0x00, 0x06, b'M', b'Q', b'I', b's', b'd', b'p']);
        assert_eq!(bytes[10], 3);
        assert_eq!(bytes[11], 0x80 | 0x40 | 0x20 | 0x08 | 0x04);
    }

    #[test]
    fn test_encode_connect_password_requires_username() {
        let mut connect = Connect::new("id");
        connect.password = Some(Bytes::from_static(b"pw"));
        assert_eq!(
            encode_connect(&connect),
            Err(EncodeError::PasswordWithoutUsername)
        );
        assert_eq!(
            encode(&Packet::Connect(connect)),
            Err(EncodeError::PasswordWithoutUsername)
        );
    }

    #[test]
    fn test_encode_subscribe() {
        let subscribe = Subscribe {
            packet_id: 7,
            topics: vec![("a/b".to_string(), QoS::AtLeastOnce)],
        };
        let bytes = encode_subscribe(&subscribe).unwrap();
        assert_eq!(
            &bytes[..],
            &[0x82, 8, 0x00, 0x07, 0x00, 0x03, b'a', b'/', b'b', 0x01]
        );
    }

    #[test]
    fn test_encode_subscribe_rejects_empty() {
        let subscribe = Subscribe {
            packet_id: 1,
            topics: Vec::new(),
        };
        assert_eq!(
            encode_subscribe(&subscribe),
            Err(EncodeError::EmptyTopicList(PacketType::Subscribe))
        );
    }

    #[test]
    fn test_encode_unsubscribe() {
        let unsubscribe = Unsubscribe {
            packet_id: 3,
            topics: vec!["x".to_string()],
        };
        let bytes = encode_unsubscribe(&unsubscribe).unwrap();
        assert_eq!(&bytes[..], &[0xA2, 5, 0x00, 0x03, 0x00, 0x01, b'x']);
    }

    #[test]
    fn test_encode_fixed_size_packets() {
        assert_eq!(&encode(&Packet::Pingreq).unwrap()[..], &[0xC0, 0]);
        assert_eq!(&encode(&Packet::Pingresp).unwrap()[..], &[0xD0, 0]);
        assert_eq!(&encode(&Packet::Disconnect).unwrap()[..], &[0xE0, 0]);
        assert_eq!(
            &encode(&Packet::Pubrel { packet_id: 0x0102 }).unwrap()[..],
            &[0x62, 2, 0x01, 0x02]
        );
        assert_eq!(
            &encode(&Packet::Connack(Connack {
                session_present: true,
                code: ConnackCode::NotAuthorized,
            }))
            .unwrap()[..],
            &[0x20, 2, 1, 5]
        );
        assert_eq!(
            encode(&Packet::Puback { packet_id: 0 }),
            Err(EncodeError::ZeroPacketId)
        );
    }

    #[test]
    fn test_encode_string_too_long() {
        let publish = Publish::new("t".repeat(70_000), "");
        assert_eq!(
            encode_publish(&publish),
            Err(EncodeError::StringTooLong(70_000))
        );
    }
}
