//! Config - node 設定（TOML）
//!
//! ```toml
//! [node]
//! name = "worker-1"
//!
//! [store]
//! root = "/mnt/shared/rendezvous"
//!
//! [lock]
//! poll_base_ms = 500
//! poll_max_ms = 5000
//!
//! [listener]
//! input = "0.0.0.0:7070"
//! output = "0.0.0.0:7071"
//! supervision_window_ms = 60000
//!
//! [worker]
//! poll_interval_ms = 1000
//! expected_kinds = ["core.echo.v1"]
//! ```
//!
//! Every field has a default; durations are milliseconds.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{Error, Result};
use crate::domain::paths::NodePaths;
use crate::listener::ListenerOptions;
use crate::lock::PollPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub store: StoreSection,
    pub lock: LockSection,
    pub listener: ListenerSection,
    pub worker: WorkerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    pub name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// Directory shared by every node (local path or network mount).
    pub root: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("rendezvous-store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockSection {
    pub poll_base_ms: u64,
    pub poll_max_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    /// Give up waiting for a queue lock after this long. Unset waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            poll_base_ms: 500,
            poll_max_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
            timeout_ms: None,
        }
    }
}

impl LockSection {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            base_delay: Duration::from_millis(self.poll_base_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.poll_max_ms),
            jitter: self.jitter,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerSection {
    pub enabled: bool,
    pub input: String,
    pub output: Option<String>,
    pub accept_timeout_ms: u64,
    pub supervision_window_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            input: "127.0.0.1:7070".to_string(),
            output: None,
            accept_timeout_ms: 10_000,
            supervision_window_ms: 60_000,
            join_timeout_ms: 5_000,
        }
    }
}

impl ListenerSection {
    pub fn options(&self) -> Result<ListenerOptions> {
        let mut options = ListenerOptions::new(parse_addr("listener.input", &self.input)?)
            .with_accept_timeout(Duration::from_millis(self.accept_timeout_ms))
            .with_supervision_window(Duration::from_millis(self.supervision_window_ms));
        options.join_timeout = Duration::from_millis(self.join_timeout_ms);
        if let Some(output) = &self.output {
            options = options.with_output(parse_addr("listener.output", output)?);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    pub poll_interval_ms: u64,
    pub status_interval_ms: u64,
    /// Task kinds this worker must be able to run; checked at startup.
    pub expected_kinds: Vec<String>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            status_interval_ms: 5_000,
            expected_kinds: Vec::new(),
        }
    }
}

impl WorkerSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl NodeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        NodePaths::new(&self.node.name)?;
        if self.lock.poll_base_ms == 0 || self.lock.poll_max_ms < self.lock.poll_base_ms {
            return Err(Error::Config(
                "lock.poll_base_ms must be > 0 and <= lock.poll_max_ms".to_string(),
            ));
        }
        if self.lock.multiplier.is_nan() || self.lock.multiplier < 1.0 {
            return Err(Error::Config("lock.multiplier must be >= 1.0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.lock.jitter) {
            return Err(Error::Config("lock.jitter must be within 0.0..=1.0".to_string()));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(Error::Config("worker.poll_interval_ms must be > 0".to_string()));
        }
        if self.listener.enabled {
            self.listener.options()?;
        }
        Ok(())
    }

    pub fn node_paths(&self) -> Result<NodePaths> {
        NodePaths::new(&self.node.name)
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{field} = {value:?} is not a socket address: {e}")))
}
