//! Built-in Scenarios
//!
//! Client-to-broker publish flows where the mock peer withholds an
//! acknowledgement so the client has to retransmit with the dup flag set.
//!
//! The client is expected to connect with the configured client id and
//! keep alive and a clean session, publish the configured payload once the
//! CONNACK (return code 0) arrives, retransmit every unanswered packet,
//! and send DISCONNECT when the flow completes.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Deserialize;

use crate::protocol::{
    ConnAck, Connect, EncodeError, Packet, ProtocolVersion, PubAck, PubComp, PubRec, PubRel,
    Publish, QoS,
};
use crate::script::Script;

/// Named conversation the mock peer can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// QoS 2 publish; both PUBLISH and PUBREL must be retransmitted
    #[default]
    PublishQos2Timeout,
    /// QoS 1 publish; PUBLISH must be retransmitted
    PublishQos1Timeout,
}

impl Scenario {
    pub const ALL: [Scenario; 2] = [Scenario::PublishQos2Timeout, Scenario::PublishQos1Timeout];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::PublishQos2Timeout => "publish-qos2-timeout",
            Scenario::PublishQos1Timeout => "publish-qos1-timeout",
        }
    }

    pub fn default_client_id(self) -> &'static str {
        match self {
            Scenario::PublishQos2Timeout => "publish-qos2-test",
            Scenario::PublishQos1Timeout => "publish-qos1-test",
        }
    }

    pub fn default_topic(self) -> &'static str {
        match self {
            Scenario::PublishQos2Timeout => "pub/qos2/test",
            Scenario::PublishQos1Timeout => "pub/qos1/test",
        }
    }

    /// Build the script for this scenario
    pub fn script(self, params: &ScenarioParams) -> Result<Script, EncodeError> {
        let connect = Packet::Connect(Box::new(Connect {
            protocol_version: params.protocol_version,
            client_id: params
                .client_id
                .clone()
                .unwrap_or_else(|| self.default_client_id().to_string()),
            clean_session: true,
            keep_alive: params.keep_alive,
            ..Default::default()
        }));
        let connack = Packet::ConnAck(ConnAck::default());

        let qos = match self {
            Scenario::PublishQos2Timeout => QoS::ExactlyOnce,
            Scenario::PublishQos1Timeout => QoS::AtLeastOnce,
        };
        let publish = Publish {
            dup: false,
            qos,
            retain: false,
            topic: params
                .topic
                .clone()
                .unwrap_or_else(|| self.default_topic().to_string()),
            packet_id: Some(params.packet_id),
            payload: params.payload.clone(),
        };
        let packet_id = params.packet_id;

        let builder = Script::builder()
            .expect("connect", connect)
            .send("connack", connack)
            .expect("publish", Packet::Publish(publish.clone()))
            // No reply: the client must retransmit
            .expect_retry("dup publish", Packet::Publish(publish.redelivery()));

        let builder = match self {
            Scenario::PublishQos2Timeout => builder
                .send("pubrec", Packet::PubRec(PubRec { packet_id }))
                .expect(
                    "pubrel",
                    Packet::PubRel(PubRel {
                        packet_id,
                        dup: false,
                    }),
                )
                .expect_retry(
                    "dup pubrel",
                    Packet::PubRel(PubRel {
                        packet_id,
                        dup: true,
                    }),
                )
                .send("pubcomp", Packet::PubComp(PubComp { packet_id })),
            Scenario::PublishQos1Timeout => {
                builder.send("puback", Packet::PubAck(PubAck { packet_id }))
            }
        };

        builder.expect("disconnect", Packet::Disconnect).build()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| format!("unknown scenario: {}", s))
    }
}

/// Values a scenario script is instantiated with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioParams {
    /// Client id; `None` uses the scenario's default
    pub client_id: Option<String>,
    pub keep_alive: u16,
    pub protocol_version: ProtocolVersion,
    /// Topic; `None` uses the scenario's default
    pub topic: Option<String>,
    pub payload: Bytes,
    pub packet_id: u16,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            client_id: None,
            keep_alive: 60,
            protocol_version: ProtocolVersion::V31,
            topic: None,
            payload: Bytes::from_static(b"message"),
            packet_id: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Patience, ScriptStep};
    use pretty_assertions::assert_eq;

    fn summary(script: &Script) -> Vec<(String, Vec<u8>)> {
        script
            .steps()
            .iter()
            .map(|step| match step {
                ScriptStep::Expect { label, encoded, .. } => {
                    (format!("expect {}", label), encoded.to_vec())
                }
                ScriptStep::Send { label, bytes } => (format!("send {}", label), bytes.to_vec()),
            })
            .collect()
    }

    #[test]
    fn test_qos2_timeout_script() {
        let script = Scenario::PublishQos2Timeout
            .script(&ScenarioParams::default())
            .unwrap();

        let mut connect = vec![0x10, 0x1F, 0x00, 0x06];
        connect.extend_from_slice(b"MQIsdp");
        connect.extend_from_slice(&[0x03, 0x02, 0x00, 0x3C, 0x00, 0x11]);
        connect.extend_from_slice(b"publish-qos2-test");

        let mut publish = vec![0x34, 0x18, 0x00, 0x0D];
        publish.extend_from_slice(b"pub/qos2/test");
        publish.extend_from_slice(&[0x00, 0x01]);
        publish.extend_from_slice(b"message");
        let mut dup_publish = publish.clone();
        dup_publish[0] = 0x3C;

        let expected = vec![
            ("expect connect".to_string(), connect),
            ("send connack".to_string(), vec![0x20, 0x02, 0x00, 0x00]),
            ("expect publish".to_string(), publish),
            ("expect dup publish".to_string(), dup_publish),
            ("send pubrec".to_string(), vec![0x50, 0x02, 0x00, 0x01]),
            ("expect pubrel".to_string(), vec![0x62, 0x02, 0x00, 0x01]),
            ("expect dup pubrel".to_string(), vec![0x6A, 0x02, 0x00, 0x01]),
            ("send pubcomp".to_string(), vec![0x70, 0x02, 0x00, 0x01]),
            ("expect disconnect".to_string(), vec![0xE0, 0x00]),
        ];

        assert_eq!(summary(&script), expected);
    }

    #[test]
    fn test_retransmissions_use_retry_patience() {
        let script = Scenario::PublishQos2Timeout
            .script(&ScenarioParams::default())
            .unwrap();

        let retries: Vec<&str> = script
            .steps()
            .iter()
            .filter_map(|step| match step {
                ScriptStep::Expect {
                    label,
                    patience: Patience::Retry,
                    ..
                } => Some(label.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(retries, ["dup publish", "dup pubrel"]);
    }

    #[test]
    fn test_qos1_timeout_script() {
        let params = ScenarioParams {
            protocol_version: ProtocolVersion::V311,
            ..Default::default()
        };
        let script = Scenario::PublishQos1Timeout.script(&params).unwrap();
        let steps = summary(&script);

        let labels: Vec<&str> = steps.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(
            labels,
            [
                "expect connect",
                "send connack",
                "expect publish",
                "expect dup publish",
                "send puback",
                "expect disconnect"
            ]
        );
        // QoS 1, then QoS 1 + dup
        assert_eq!(steps[2].1[0], 0x32);
        assert_eq!(steps[3].1[0], 0x3A);
        assert_eq!(steps[4].1, vec![0x40, 0x02, 0x00, 0x01]);
        assert!(steps[2].1.ends_with(b"message"));
        assert_eq!(&steps[0].1[2..8], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);
    }

    #[test]
    fn test_params_override_defaults() {
        let params = ScenarioParams {
            client_id: Some("custom".to_string()),
            topic: Some("a/b".to_string()),
            packet_id: 42,
            ..Default::default()
        };
        let script = Scenario::PublishQos2Timeout.script(&params).unwrap();

        match &script.steps()[2] {
            ScriptStep::Expect { expected, .. } => match expected {
                Packet::Publish(p) => {
                    assert_eq!(p.topic, "a/b");
                    assert_eq!(p.packet_id, Some(42));
                }
                other => panic!("expected publish, got {:?}", other),
            },
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_scenario_names_roundtrip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>(), Ok(scenario));
        }
        assert!("publish-qos3-timeout".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_zero_packet_id_is_rejected() {
        let params = ScenarioParams {
            packet_id: 0,
            ..Default::default()
        };
        assert_eq!(
            Scenario::PublishQos1Timeout.script(&params),
            Err(EncodeError::InvalidPacketId)
        );
    }
}
