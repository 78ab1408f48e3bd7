//! Test Orchestrator
//!
//! Runs one conformance check end to end: bind the listener, launch the
//! client under test with its search path pointed at the implementation,
//! accept its single connection, play the script, and tear everything
//! down. The client process is always terminated before `run` returns.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{Engine, Timing};
use crate::script::{FailReason, Script, Verdict};
use crate::transport::{configure_stream, PeerTransport};

/// Label used when the client never gets as far as the first script step
pub const ACCEPT_STEP: &str = "accept";

const LISTEN_BACKLOG: i32 = 5;

/// Orchestrator errors; these mean the check itself could not run
#[derive(Debug)]
pub enum OrchestratorError {
    /// Listener could not be bound
    Bind(io::Error),
    /// Listener failed while accepting
    Accept(io::Error),
    /// Client process could not be started
    Launch(io::Error),
    /// Search path entry cannot be joined into the variable
    Environment(std::env::JoinPathsError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Bind(e) => write!(f, "Bind error: {}", e),
            OrchestratorError::Accept(e) => write!(f, "Accept error: {}", e),
            OrchestratorError::Launch(e) => write!(f, "Failed to launch client: {}", e),
            OrchestratorError::Environment(e) => write!(f, "Invalid search path: {}", e),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<std::env::JoinPathsError> for OrchestratorError {
    fn from(e: std::env::JoinPathsError) -> Self {
        OrchestratorError::Environment(e)
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bind: SocketAddr,
    pub accept_timeout: Duration,
    pub terminate_grace: Duration,
    /// Variable the client resolves its implementation through
    pub search_path_var: String,
    /// Entry prepended to that variable
    pub search_path: String,
    pub timing: Timing,
    pub max_packet_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind: config.server.bind,
            accept_timeout: config.server.accept_timeout,
            terminate_grace: config.timing.terminate_grace,
            search_path_var: config.client.search_path_var.clone(),
            search_path: config.client.search_path.clone(),
            timing: config.timing.engine_timing(),
            max_packet_size: config.limits.max_packet_size,
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self::from_config(config)
    }
}

/// Command line of the client under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ClientCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Split a full argv; `None` if it is empty
    pub fn from_argv<I>(argv: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Prepend `prefix` to a search-path variable's existing value
///
/// An unset or empty variable yields just `prefix`, without a trailing
/// separator.
pub fn augment_search_path(
    prefix: &str,
    existing: Option<&OsStr>,
) -> Result<OsString, std::env::JoinPathsError> {
    let rest: Vec<PathBuf> = existing
        .filter(|value| !value.is_empty())
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();
    std::env::join_paths(std::iter::once(PathBuf::from(prefix)).chain(rest))
}

fn listen(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    // Back-to-back runs must be able to rebind while old sockets sit in TIME_WAIT
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// One conformance check, from bound listener to terminated client
pub struct Orchestrator {
    config: OrchestratorConfig,
    listener: TcpListener,
}

impl Orchestrator {
    /// Bind the listener; must be called inside a Tokio runtime
    pub async fn bind(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let std_listener = listen(config.bind).map_err(OrchestratorError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(OrchestratorError::Bind)?;
        info!(
            "Mock peer listening on {}",
            listener.local_addr().map_err(OrchestratorError::Bind)?
        );
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Launch `client`, play `script` against its connection, and tear down
    ///
    /// Returns `Err` only when the check could not be carried out; a client
    /// that misbehaves, including one that never connects, yields
    /// `Ok(Verdict::Fail)`.
    pub async fn run(
        self,
        script: &Script,
        client: &ClientCommand,
    ) -> Result<Verdict, OrchestratorError> {
        let mut child = self.launch(client)?;
        info!("Launched client `{}` (pid {:?})", client, child.id());

        let result = self.converse(&mut child, script).await;

        drop(self.listener);
        terminate(&mut child, self.config.terminate_grace).await;

        let verdict = result?;
        info!("Verdict: {}", verdict);
        Ok(verdict)
    }

    fn launch(&self, client: &ClientCommand) -> Result<Child, OrchestratorError> {
        let var = &self.config.search_path_var;
        let existing = std::env::var_os(var);
        let search_path = augment_search_path(&self.config.search_path, existing.as_deref())?;
        debug!("{}={}", var, search_path.to_string_lossy());

        let mut command = Command::new(&client.program);
        command
            .args(&client.args)
            .env(var, &search_path)
            .kill_on_drop(true);
        // Own process group so teardown reaches anything the client spawned
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(OrchestratorError::Launch)
    }

    async fn converse(
        &self,
        child: &mut Child,
        script: &Script,
    ) -> Result<Verdict, OrchestratorError> {
        let accept_timeout = self.config.accept_timeout;

        let stream = tokio::select! {
            accepted = timeout(accept_timeout, self.listener.accept()) => match accepted {
                Ok(Ok((stream, addr))) => {
                    debug!("Client connected from {}", addr);
                    stream
                }
                Ok(Err(e)) => return Err(OrchestratorError::Accept(e)),
                Err(_) => {
                    return Ok(accept_failure(
                        FailReason::Timeout,
                        format!("no connection within {:?}", accept_timeout),
                    ))
                }
            },
            status = child.wait() => {
                let detail = match status {
                    Ok(status) => format!("client exited before connecting ({})", status),
                    Err(e) => format!("client wait failed before connecting: {}", e),
                };
                return Ok(accept_failure(FailReason::ConnectionClosedEarly, detail));
            }
        };

        if let Err(e) = configure_stream(&stream) {
            debug!("Failed to configure client stream: {}", e);
        }

        let engine =
            Engine::new(self.config.timing).with_max_packet_size(self.config.max_packet_size);
        let mut transport = PeerTransport::new(stream);
        let verdict = engine.run(&mut transport, script).await;

        if let Err(e) = transport.shutdown().await {
            debug!("Connection shutdown: {}", e);
        }
        Ok(verdict)
    }
}

fn accept_failure(reason: FailReason, detail: String) -> Verdict {
    let verdict = Verdict::fail(ACCEPT_STEP, reason, detail);
    if let Some(failure) = verdict.failure() {
        warn!("{}", failure);
    }
    verdict
}

/// SIGTERM the client's process group, then force-kill after `grace`
async fn terminate(child: &mut Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!("Client already exited ({})", status);
        return;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        debug!("Sending SIGTERM to client process group {}", pid);
        // SAFETY: pid is our unreaped child and leads its own process group
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    if let Err(e) = child.start_kill() {
        debug!("Failed to signal client: {}", e);
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("Client exited ({})", status),
        _ => {
            warn!("Client did not exit within {:?}, killing", grace);
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                // SAFETY: as above
                unsafe {
                    libc::killpg(pid as libc::pid_t, libc::SIGKILL);
                }
            }
            if let Err(e) = child.kill().await {
                warn!("Failed to kill client: {}", e);
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("local_addr", &self.listener.local_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_PACKET_SIZE;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_augment_unset_search_path() {
        let value = augment_search_path("../../src", None).unwrap();
        assert_eq!(value, OsString::from("../../src"));
    }

    #[test]
    fn test_augment_empty_search_path() {
        let value = augment_search_path("../../src", Some(OsStr::new(""))).unwrap();
        assert_eq!(value, OsString::from("../../src"));
    }

    #[cfg(unix)]
    #[test]
    fn test_augment_existing_search_path() {
        let value = augment_search_path("../../src", Some(OsStr::new("/usr/lib/a:/opt/b"))).unwrap();
        assert_eq!(value, OsString::from("../../src:/usr/lib/a:/opt/b"));
    }

    #[cfg(unix)]
    #[test]
    fn test_augment_rejects_separator_in_prefix() {
        assert!(augment_search_path("a:b", None).is_err());
    }

    #[test]
    fn test_client_command_from_argv() {
        let command = ClientCommand::from_argv(["python3", "client.py", "--verbose"]).unwrap();
        assert_eq!(
            command,
            ClientCommand::new("python3").arg("client.py").arg("--verbose")
        );
        assert_eq!(command.to_string(), "python3 client.py --verbose");
        assert!(ClientCommand::from_argv(Vec::<OsString>::new()).is_none());
    }

    #[test]
    fn test_config_from_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.bind.port(), 1888);
        assert_eq!(config.accept_timeout, Duration::from_secs(10));
        assert_eq!(config.terminate_grace, Duration::from_secs(5));
        assert_eq!(config.search_path_var, "PYTHONPATH");
        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let config = OrchestratorConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let orchestrator = Orchestrator::bind(config).await.unwrap();
        let addr = orchestrator.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = OrchestratorConfig {
            bind: holder.local_addr().unwrap(),
            ..Default::default()
        };
        let err = Orchestrator::bind(config).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Bind(_)));
    }
}
