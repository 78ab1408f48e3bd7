//! Conversation Scripts
//!
//! A script is the whole exchange with the client under test written down
//! as data: an ordered list of "expect this packet" and "send this packet"
//! steps. Scripts are built once, encoded up front, and never change while
//! the engine plays them.

mod verdict;

pub use verdict::{FailReason, Failure, Verdict};

use bytes::Bytes;

use crate::codec;
use crate::protocol::{EncodeError, Packet};

/// How long an expect step may wait for its packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Patience {
    /// The packet is a direct reply to the previous step
    #[default]
    Step,
    /// The packet is a retransmission provoked by a withheld reply, so the
    /// wait also covers the client's retry interval
    Retry,
}

/// One step of a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Wait for the client to send exactly `encoded`
    Expect {
        label: String,
        expected: Packet,
        encoded: Bytes,
        patience: Patience,
    },
    /// Write `bytes` to the client
    Send { label: String, bytes: Bytes },
}

impl ScriptStep {
    pub fn label(&self) -> &str {
        match self {
            ScriptStep::Expect { label, .. } | ScriptStep::Send { label, .. } => label,
        }
    }
}

/// Immutable, ordered script
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builds a [`Script`], encoding each packet as it is added
///
/// The first encoding failure is kept and reported by [`ScriptBuilder::build`].
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    steps: Vec<ScriptStep>,
    error: Option<EncodeError>,
}

impl ScriptBuilder {
    /// Expect `packet` as a direct reply
    pub fn expect(self, label: impl Into<String>, packet: Packet) -> Self {
        self.expect_with(label, packet, Patience::Step)
    }

    /// Expect `packet` as the client's retransmission of an unanswered packet
    pub fn expect_retry(self, label: impl Into<String>, packet: Packet) -> Self {
        self.expect_with(label, packet, Patience::Retry)
    }

    pub fn expect_with(mut self, label: impl Into<String>, packet: Packet, patience: Patience) -> Self {
        match codec::encode(&packet) {
            Ok(encoded) => self.steps.push(ScriptStep::Expect {
                label: label.into(),
                expected: packet,
                encoded,
                patience,
            }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Send an encoded packet
    pub fn send(mut self, label: impl Into<String>, packet: Packet) -> Self {
        match codec::encode(&packet) {
            Ok(bytes) => self.steps.push(ScriptStep::Send {
                label: label.into(),
                bytes,
            }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Send bytes verbatim, framed or not
    pub fn send_raw(mut self, label: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.steps.push(ScriptStep::Send {
            label: label.into(),
            bytes: bytes.into(),
        });
        self
    }

    pub fn build(self) -> Result<Script, EncodeError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Script { steps: self.steps }),
        }
    }
}
