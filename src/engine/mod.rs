//! Expectation Engine
//!
//! Plays a [`Script`] against one connection. Expected packets are compared
//! byte-for-byte with what the client sends; the first deviation ends the
//! run with a labelled [`Verdict::Fail`], and nothing after it is played.


use std::fmt::Write as _;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{self, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::DecodeError;
use crate::script::{FailReason, Patience, Script, ScriptStep, Verdict};
use crate::transport::{PeerTransport, TransportError};

/// Step deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait for a packet that answers the previous step
    pub step_timeout: Duration,
    /// The client's own retransmission interval
    pub retry_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(3),
        }
    }
}

impl Timing {
    /// How long an expect step with the given patience may wait
    pub fn wait_for(&self, patience: Patience) -> Duration {
        match patience {
            Patience::Step => self.step_timeout,
            Patience::Retry => self.retry_interval + self.step_timeout,
        }
    }
}

/// Why an expect step could not produce a complete frame
enum ReadError {
    Transport(TransportError),
    Framing(DecodeError, Bytes),
}

impl From<TransportError> for ReadError {
    fn from(e: TransportError) -> Self {
        ReadError::Transport(e)
    }
}

/// Script interpreter
#[derive(Debug, Clone)]
pub struct Engine {
    timing: Timing,
    max_packet_size: usize,
}

impl Engine {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Play `script` in order and stop at the first failing step
    pub async fn run<S>(&self, transport: &mut PeerTransport<S>, script: &Script) -> Verdict
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        for (index, step) in script.steps().iter().enumerate() {
            debug!("step {}/{}: {}", index + 1, script.len(), step.label());

            let outcome = match step {
                ScriptStep::Expect {
                    label,
                    expected,
                    encoded,
                    patience,
                } => {
                    let wait = self.timing.wait_for(*patience);
                    let result = self.expect(transport, label, encoded, wait).await;
                    if result.is_ok() {
                        debug!("matched {:?}", expected);
                    }
                    result
                }
                ScriptStep::Send { label, bytes } => match transport.write_all(bytes).await {
                    Ok(()) => {
                        debug!("sent {} bytes", bytes.len());
                        Ok(())
                    }
                    Err(e) => Err(Verdict::fail(
                        label.as_str(),
                        FailReason::ConnectionClosedEarly,
                        format!("write failed: {}", e),
                    )),
                },
            };

            if let Err(verdict) = outcome {
                if let Some(failure) = verdict.failure() {
                    warn!("{}", failure);
                }
                return verdict;
            }
        }

        info!("all {} steps passed", script.len());
        Verdict::Pass
    }

    async fn expect<S>(
        &self,
        transport: &mut PeerTransport<S>,
        label: &str,
        encoded: &Bytes,
        wait: Duration,
    ) -> Result<(), Verdict>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + wait;

        let frame = match self.read_frame(transport, deadline).await {
            Ok(frame) => frame,
            Err(ReadError::Framing(e, received)) => {
                return Err(Verdict::fail(
                    label,
                    FailReason::UnexpectedData,
                    format!(
                        "{}; expected [{}], received [{}]",
                        e,
                        hex(encoded),
                        hex(&received)
                    ),
                ))
            }
            Err(ReadError::Transport(TransportError::Timeout { .. })) => {
                return Err(Verdict::fail(
                    label,
                    FailReason::Timeout,
                    format!("no packet within {:?}; expected [{}]", wait, hex(encoded)),
                ))
            }
            Err(ReadError::Transport(e)) => {
                return Err(Verdict::fail(
                    label,
                    FailReason::ConnectionClosedEarly,
                    format!("{}; expected [{}]", e, hex(encoded)),
                ))
            }
        };

        if frame == *encoded {
            return Ok(());
        }

        let decoded = match codec::decode(&frame) {
            Ok(packet) => format!("{:?}", packet),
            Err(e) => format!("undecodable: {}", e),
        };
        Err(Verdict::fail(
            label,
            FailReason::ByteMismatch,
            format!(
                "expected [{}], received [{}] = {}",
                hex(encoded),
                hex(&frame),
                decoded
            ),
        ))
    }

    /// Read one whole frame: fixed header first, then the body it announces
    async fn read_frame<S>(
        &self,
        transport: &mut PeerTransport<S>,
        deadline: Instant,
    ) -> Result<Bytes, ReadError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frame = BytesMut::with_capacity(64);
        frame.extend_from_slice(&transport.read_exact_or_timeout(2, deadline).await?);

        let total = loop {
            match codec::frame_len(&frame, self.max_packet_size) {
                Ok(Some(total)) => break total,
                Ok(None) => {
                    let next = transport.read_exact_or_timeout(1, deadline).await?;
                    frame.extend_from_slice(&next);
                }
                Err(e) => return Err(ReadError::Framing(e, frame.freeze())),
            }
        };

        let body = transport
            .read_exact_or_timeout(total - frame.len(), deadline)
            .await?;
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }
}

/// Space-separated lowercase hex, for failure reports
fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}
