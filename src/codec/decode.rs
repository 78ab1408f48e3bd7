//! MQTT Packet Decoder

use bytes::Bytes;

use super::{
    frame_len, read_binary, read_string, read_u16, read_variable_int, MAX_REMAINING_LENGTH,
};
use crate::protocol::{
    ConnAck, Connect, DecodeError, Packet, PacketType, ProtocolVersion, PubAck, PubComp, PubRec,
    PubRel, Publish, QoS, Will,
};

/// MQTT Packet Decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum remaining length accepted
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_REMAINING_LENGTH,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Decode a packet from the buffer
    /// Returns (packet, bytes_consumed), or `None` until the whole frame
    /// has been buffered
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        let total_len = match frame_len(buf, self.max_packet_size)? {
            Some(len) => len,
            None => return Ok(None),
        };

        // Wait for complete packet
        if buf.len() < total_len {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        // Already validated by frame_len
        let (_, len_bytes) = read_variable_int(&buf[1..])?;
        let payload = &buf[1 + len_bytes..total_len];

        let packet_type =
            PacketType::from_u8(packet_type).ok_or(DecodeError::UnknownType(packet_type))?;

        let packet = match packet_type {
            PacketType::Connect => {
                expect_flags(flags, 0x00)?;
                self.decode_connect(payload)?
            }
            PacketType::ConnAck => {
                expect_flags(flags, 0x00)?;
                self.decode_connack(payload)?
            }
            PacketType::Publish => self.decode_publish(flags, payload)?,
            PacketType::PubAck => {
                expect_flags(flags, 0x00)?;
                Packet::PubAck(PubAck {
                    packet_id: decode_packet_id(payload)?,
                })
            }
            PacketType::PubRec => {
                expect_flags(flags, 0x00)?;
                Packet::PubRec(PubRec {
                    packet_id: decode_packet_id(payload)?,
                })
            }
            PacketType::PubRel => {
                // PUBREL must have flags 0010, optionally with the dup bit
                if flags & !0x08 != 0x02 {
                    return Err(DecodeError::MalformedHeader("invalid PUBREL flags"));
                }
                Packet::PubRel(PubRel {
                    packet_id: decode_packet_id(payload)?,
                    dup: (flags & 0x08) != 0,
                })
            }
            PacketType::PubComp => {
                expect_flags(flags, 0x00)?;
                Packet::PubComp(PubComp {
                    packet_id: decode_packet_id(payload)?,
                })
            }
            PacketType::PingReq => {
                expect_flags(flags, 0x00)?;
                expect_empty(payload)?;
                Packet::PingReq
            }
            PacketType::PingResp => {
                expect_flags(flags, 0x00)?;
                expect_empty(payload)?;
                Packet::PingResp
            }
            PacketType::Disconnect => {
                expect_flags(flags, 0x00)?;
                expect_empty(payload)?;
                Packet::Disconnect
            }
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connect(&self, payload: &[u8]) -> Result<Packet, DecodeError> {
        let mut pos = 0;

        let (protocol_name, len) = read_string(payload)?;
        pos += len;

        let level = *payload.get(pos).ok_or(DecodeError::TruncatedPayload)?;
        pos += 1;

        let protocol_version = match ProtocolVersion::from_u8(level) {
            Some(v) if v.protocol_name() == protocol_name => v,
            _ => {
                return Err(DecodeError::MalformedHeader(
                    "unsupported protocol name or level",
                ))
            }
        };

        let connect_flags = *payload.get(pos).ok_or(DecodeError::TruncatedPayload)?;
        pos += 1;

        // Reserved bit must be 0
        if (connect_flags & 0x01) != 0 {
            return Err(DecodeError::MalformedHeader("reserved connect flag set"));
        }

        let clean_session = (connect_flags & 0x02) != 0;
        let will_flag = (connect_flags & 0x04) != 0;
        let will_qos = (connect_flags >> 3) & 0x03;
        let will_retain = (connect_flags & 0x20) != 0;
        let password_flag = (connect_flags & 0x40) != 0;
        let username_flag = (connect_flags & 0x80) != 0;

        let will_qos = QoS::from_u8(will_qos)
            .ok_or(DecodeError::MalformedHeader("invalid will QoS"))?;

        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::MalformedHeader(
                "will QoS or retain set without will flag",
            ));
        }

        let keep_alive = read_u16(&payload[pos..])?;
        pos += 2;

        let (client_id, len) = read_string(&payload[pos..])?;
        pos += len;

        let will = if will_flag {
            let (topic, len) = read_string(&payload[pos..])?;
            pos += len;
            let (will_payload, len) = read_binary(&payload[pos..])?;
            pos += len;
            Some(Will {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(will_payload),
                qos: will_qos,
                retain: will_retain,
            })
        } else {
            None
        };

        let username = if username_flag {
            let (s, len) = read_string(&payload[pos..])?;
            pos += len;
            Some(s.to_string())
        } else {
            None
        };

        let password = if password_flag {
            let (data, len) = read_binary(&payload[pos..])?;
            pos += len;
            Some(Bytes::copy_from_slice(data))
        } else {
            None
        };

        expect_empty(&payload[pos..])?;

        Ok(Packet::Connect(Box::new(Connect {
            protocol_version,
            client_id: client_id.to_string(),
            clean_session,
            keep_alive,
            username,
            password,
            will,
        })))
    }

    fn decode_connack(&self, payload: &[u8]) -> Result<Packet, DecodeError> {
        if payload.len() < 2 {
            return Err(DecodeError::TruncatedPayload);
        }
        expect_empty(&payload[2..])?;

        let acknowledge_flags = payload[0];
        // Only bit 0 is valid (session present), rest must be 0
        if (acknowledge_flags & 0xFE) != 0 {
            return Err(DecodeError::MalformedHeader("reserved CONNACK flags set"));
        }

        Ok(Packet::ConnAck(ConnAck {
            session_present: (acknowledge_flags & 0x01) != 0,
            return_code: payload[1],
        }))
    }

    fn decode_publish(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::MalformedHeader("QoS 3 in PUBLISH"))?;

        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedHeader("DUP must be 0 for QoS 0"));
        }

        let (topic, mut pos) = read_string(payload)?;

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&payload[pos..])?;
            if id == 0 {
                return Err(DecodeError::MalformedHeader("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(&payload[pos..]),
        }))
    }
}

fn expect_flags(flags: u8, expected: u8) -> Result<(), DecodeError> {
    if flags != expected {
        return Err(DecodeError::MalformedHeader("invalid fixed header flags"));
    }
    Ok(())
}

fn expect_empty(rest: &[u8]) -> Result<(), DecodeError> {
    if !rest.is_empty() {
        return Err(DecodeError::MalformedHeader("unexpected bytes after fields"));
    }
    Ok(())
}

/// Body of PUBACK, PUBREC, PUBREL and PUBCOMP: exactly a packet id
fn decode_packet_id(payload: &[u8]) -> Result<u16, DecodeError> {
    let id = read_u16(payload)?;
    expect_empty(&payload[2..])?;
    Ok(id)
}
