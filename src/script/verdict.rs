//! Outcome of playing a script

use std::fmt;

/// Why a step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailReason {
    /// The step deadline passed before the expected bytes arrived
    Timeout,
    /// A complete packet arrived whose bytes differ from the expected ones
    ByteMismatch,
    /// The client hung up (or the connection broke) first
    ConnectionClosedEarly,
    /// The client sent bytes that cannot be framed as a packet
    UnexpectedData,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ByteMismatch => "byte_mismatch",
            Self::ConnectionClosedEarly => "connection_closed_early",
            Self::UnexpectedData => "unexpected_data",
        };
        f.write_str(s)
    }
}

/// First failing step of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub step_label: String,
    pub reason: FailReason,
    /// Human-readable diagnosis (expected vs received bytes, decode errors)
    pub detail: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}' failed: {}", self.step_label, self.reason)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// Result of a conformance run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(Failure),
}

impl Verdict {
    pub fn fail(step_label: impl Into<String>, reason: FailReason, detail: impl Into<String>) -> Self {
        Verdict::Fail(Failure {
            step_label: step_label.into(),
            reason,
            detail: detail.into(),
        })
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(f) => Some(f),
        }
    }

    /// Process exit status: 0 conformant, 1 non-conformant
    pub fn exit_code(&self) -> u8 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail(_) => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail(failure) => write!(f, "fail: {}", failure),
        }
    }
}
