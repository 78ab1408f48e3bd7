//! MQTT Packet Encoder
//!
//! Each packet's variable header and payload are written to a scratch body
//! first; the fixed header is then framed around the finished body, so the
//! remaining length is always the body's actual length in its shortest
//! encoding.

use bytes::{BufMut, BytesMut};

use super::{write_binary, write_string, write_variable_int};
use crate::protocol::{Connect, EncodeError, Packet, Publish, QoS};

/// Connect flag bits
const CLEAN_SESSION: u8 = 0x02;
const WILL: u8 = 0x04;
const WILL_RETAIN: u8 = 0x20;
const PASSWORD: u8 = 0x40;
const USERNAME: u8 = 0x80;

/// Fixed-header flag bits
const DUP: u8 = 0x08;
const RETAIN: u8 = 0x01;
/// PUBREL carries 0010 in its low nibble
const PUBREL_RESERVED: u8 = 0x02;

/// MQTT Packet Encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Append the wire form of `packet` to `buf`
    ///
    /// On error nothing is appended.
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut body = BytesMut::new();

        let flags = match packet {
            Packet::Connect(p) => {
                connect_body(p, &mut body)?;
                0
            }
            Packet::ConnAck(p) => {
                body.put_u8(u8::from(p.session_present));
                body.put_u8(p.return_code);
                0
            }
            Packet::Publish(p) => publish_body(p, &mut body)?,
            Packet::PubAck(p) => {
                body.put_u16(p.packet_id);
                0
            }
            Packet::PubRec(p) => {
                body.put_u16(p.packet_id);
                0
            }
            Packet::PubRel(p) => {
                body.put_u16(p.packet_id);
                if p.dup {
                    PUBREL_RESERVED | DUP
                } else {
                    PUBREL_RESERVED
                }
            }
            Packet::PubComp(p) => {
                body.put_u16(p.packet_id);
                0
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
        };

        let mut header = BytesMut::with_capacity(5);
        header.put_u8((packet.packet_type() as u8) << 4 | flags);
        write_variable_int(&mut header, body.len() as u32)?;

        buf.reserve(header.len() + body.len());
        buf.put_slice(&header);
        buf.put_slice(&body);
        Ok(())
    }
}

fn connect_body(packet: &Connect, body: &mut BytesMut) -> Result<(), EncodeError> {
    let version = packet.protocol_version;
    write_string(body, version.protocol_name())?;
    body.put_u8(version as u8);

    let mut flags = 0;
    if packet.clean_session {
        flags |= CLEAN_SESSION;
    }
    if let Some(will) = &packet.will {
        flags |= WILL | (will.qos as u8) << 3;
        if will.retain {
            flags |= WILL_RETAIN;
        }
    }
    if packet.username.is_some() {
        flags |= USERNAME;
    }
    if packet.password.is_some() {
        flags |= PASSWORD;
    }
    body.put_u8(flags);
    body.put_u16(packet.keep_alive);

    // Payload order: client id, will topic, will message, username, password
    write_string(body, &packet.client_id)?;
    if let Some(will) = &packet.will {
        write_string(body, &will.topic)?;
        write_binary(body, &will.payload)?;
    }
    if let Some(username) = &packet.username {
        write_string(body, username)?;
    }
    if let Some(password) = &packet.password {
        write_binary(body, password)?;
    }
    Ok(())
}

/// Writes the PUBLISH body and returns its fixed-header flags
fn publish_body(packet: &Publish, body: &mut BytesMut) -> Result<u8, EncodeError> {
    let packet_id = match (packet.qos, packet.packet_id) {
        (QoS::AtMostOnce, None) => None,
        (QoS::AtLeastOnce | QoS::ExactlyOnce, Some(id)) if id != 0 => Some(id),
        _ => return Err(EncodeError::InvalidPacketId),
    };
    if packet.dup && packet.qos == QoS::AtMostOnce {
        return Err(EncodeError::InvalidFlags);
    }

    write_string(body, &packet.topic)?;
    if let Some(id) = packet_id {
        body.put_u16(id);
    }
    body.put_slice(&packet.payload);

    let mut flags = (packet.qos as u8) << 1;
    if packet.dup {
        flags |= DUP;
    }
    if packet.retain {
        flags |= RETAIN;
    }
    Ok(flags)
}
