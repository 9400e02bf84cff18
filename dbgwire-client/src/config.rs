// Connection options
//
// Defaults point at the well-known local debugger port; DBGWIRE_HOST and
// DBGWIRE_PORT override them.

use crate::protocol::{DebugWireError, WireResult, DEBUGGER_PORT, DEFAULT_HOST, MAX_FRAME_SIZE};

pub const HOST_ENV: &str = "DBGWIRE_HOST";
pub const PORT_ENV: &str = "DBGWIRE_PORT";

// Events buffered per subscriber before the slowest one starts lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub event_capacity: usize,
    pub max_frame_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEBUGGER_PORT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ConnectOptions {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> WireResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WireResult<Self> {
        let mut options = Self::default();

        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            options.host = host.trim().to_string();
        }

        if let Some(port) = lookup(PORT_ENV) {
            options.port = port.trim().parse().map_err(|e| {
                DebugWireError::Config(format!(
                    "{} must be a port number, got {:?}: {}",
                    PORT_ENV, port, e
                ))
            })?;
        }

        Ok(options)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Clamped to `1..=MAX_EVENT_CAPACITY` when the connection is made
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// `host:port`, bracketing bare IPv6 hosts
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
