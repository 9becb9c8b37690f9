//! Proxy phases and status snapshots

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle phase of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPhase {
    /// Built and registered, not started yet
    Created,
    /// Start intent sent, waiting for the server's answer
    Started,
    /// Server accepted the proxy
    Running,
    /// Server rejected the proxy
    Failed,
    /// Torn down; terminal
    Stopped,
}

impl ProxyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyPhase::Created => "created",
            ProxyPhase::Started => "started",
            ProxyPhase::Running => "running",
            ProxyPhase::Failed => "failed",
            ProxyPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProxyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one proxy's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStatus {
    pub name: String,
    pub proxy_type: String,
    pub phase: ProxyPhase,
    /// Address assigned by the server, if any
    pub remote_addr: Option<String>,
    /// Last error reported by the server
    pub error: Option<String>,
    pub local_addr: String,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ProxyStatus {
    /// Remote address when running, otherwise the last error
    pub fn remote_addr_or_error(&self) -> Option<&str> {
        match self.phase {
            ProxyPhase::Running => self.remote_addr.as_deref(),
            _ => self.error.as_deref(),
        }
    }
}
