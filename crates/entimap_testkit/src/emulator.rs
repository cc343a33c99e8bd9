//! Lifecycle harness for an external datastore emulator.
//!
//! The emulator is an opaque network endpoint. The harness either spawns it
//! as a child process or attaches to one that is already running, and blocks
//! until its port accepts connections so no adapter issues requests early.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming a running emulator's `host:port`.
pub const EMULATOR_HOST_ENV: &str = "ENTIMAP_EMULATOR_HOST";

/// Emulator harness errors.
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// The emulator process could not be spawned.
    #[error("failed to spawn emulator `{program}`: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The process exited before becoming reachable.
    #[error("emulator exited before becoming ready: {status}")]
    Exited {
        /// Exit status.
        status: ExitStatus,
    },

    /// The endpoint did not accept connections in time.
    #[error("emulator at {addr} not reachable after {waited:?}")]
    Timeout {
        /// Probed address.
        addr: SocketAddr,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The address could not be resolved.
    #[error("invalid emulator address `{0}`")]
    InvalidAddress(String),

    /// I/O error while managing the process.
    #[error("emulator I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for the harness.
pub type EmulatorResult<T> = Result<T, EmulatorError>;

/// How to launch an emulator.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Address the emulator listens on.
    pub addr: SocketAddr,
    /// Maximum time to wait for the endpoint.
    pub startup_timeout: Duration,
    /// Delay between reachability probes.
    pub poll_interval: Duration,
}

impl EmulatorConfig {
    /// Runs `program` expecting it to listen on `addr`.
    pub fn new(program: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            addr,
            startup_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the startup timeout.
    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the probe interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// A running (or attached) emulator. Spawned processes are killed on drop.
#[derive(Debug)]
pub struct Emulator {
    addr: SocketAddr,
    child: Option<Child>,
    poll_interval: Duration,
}

impl Emulator {
    /// Spawns the emulator and waits until it is reachable.
    pub fn start(config: &EmulatorConfig) -> EmulatorResult<Self> {
        info!(program = %config.program, addr = %config.addr, "starting emulator");
        let child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EmulatorError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let mut emulator = Self {
            addr: config.addr,
            child: Some(child),
            poll_interval: config.poll_interval,
        };
        if let Err(e) = emulator.wait_until_ready(config.startup_timeout) {
            if let Err(stop) = emulator.stop() {
                warn!(error = %stop, "failed to stop emulator after a failed start");
            }
            return Err(e);
        }
        Ok(emulator)
    }

    /// Attaches to an emulator that is already running.
    pub fn attach(addr: SocketAddr) -> Self {
        Self {
            addr,
            child: None,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Attaches to the emulator named by [`EMULATOR_HOST_ENV`], if set.
    pub fn from_env() -> EmulatorResult<Option<Self>> {
        let Ok(host) = std::env::var(EMULATOR_HOST_ENV) else {
            return Ok(None);
        };
        let addr = host
            .to_socket_addrs()
            .map_err(|_| EmulatorError::InvalidAddress(host.clone()))?
            .next()
            .ok_or(EmulatorError::InvalidAddress(host))?;
        Ok(Some(Self::attach(addr)))
    }

    /// The emulator endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether this harness owns the emulator process.
    pub fn is_spawned(&self) -> bool {
        self.child.is_some()
    }

    /// Whether the endpoint accepts a connection right now.
    pub fn is_reachable(&self) -> bool {
        TcpStream::connect_timeout(&self.addr, self.poll_interval.max(Duration::from_millis(10)))
            .is_ok()
    }

    /// Blocks until the endpoint accepts connections, the process exits, or
    /// `timeout` passes.
    pub fn wait_until_ready(&mut self, timeout: Duration) -> EmulatorResult<()> {
        let started = Instant::now();
        loop {
            if self.is_reachable() {
                debug!(addr = %self.addr, waited = ?started.elapsed(), "emulator ready");
                return Ok(());
            }
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    return Err(EmulatorError::Exited { status });
                }
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(EmulatorError::Timeout {
                    addr: self.addr,
                    waited,
                });
            }
            thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// Stops a spawned emulator. Attached emulators are left running.
    pub fn stop(&mut self) -> EmulatorResult<()> {
        if let Some(mut child) = self.child.take() {
            info!(addr = %self.addr, "stopping emulator");
            if child.try_wait()?.is_none() {
                child.kill()?;
            }
            child.wait()?;
        }
        Ok(())
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop emulator");
        }
    }
}
