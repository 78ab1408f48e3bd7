//! mockpeer - scripted MQTT broker for client conformance checks
//!
//! Plays the broker side of a fixed MQTT v3.1/v3.1.1 conversation against
//! a real client process, comparing every packet the client sends with the
//! exact bytes expected, and reports a single pass/fail verdict.

pub mod codec;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod protocol;
pub mod scenario;
pub mod script;
pub mod transport;

pub use config::Config;
pub use engine::{Engine, Timing};
pub use orchestrator::{ClientCommand, Orchestrator, OrchestratorConfig, OrchestratorError};
pub use protocol::{Packet, ProtocolVersion, QoS};
pub use scenario::{Scenario, ScenarioParams};
pub use script::{FailReason, Failure, Script, Verdict};
