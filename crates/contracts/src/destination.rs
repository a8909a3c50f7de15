//! Destination - telemetry sink identity
//!
//! Each destination owns its own durable queue, pending-call cap and
//! priority treatment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Logical telemetry sink on the remote collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Session payloads (session continuity)
    Sessions,
    /// Log batches
    Logs,
    /// Crash reports
    Crashes,
}

impl Destination {
    /// All destinations, in delivery preference order
    pub const ALL: [Destination; 3] = [Self::Sessions, Self::Crashes, Self::Logs];

    /// Stable name, used for directory names and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Logs => "logs",
            Self::Crashes => "crashes",
        }
    }

    /// Wire version tag of the collector endpoint
    pub fn version(&self) -> &'static str {
        match self {
            Self::Sessions | Self::Logs => "v2",
            Self::Crashes => "v1",
        }
    }

    /// Collector path, e.g. `v2/sessions`
    pub fn path(&self) -> String {
        format!("{}/{}", self.version(), self.as_str())
    }

    /// Whether payloads for this destination carry session data
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Sessions)
    }

    /// Default cap on pending calls kept for this destination
    pub fn default_max_pending(&self) -> usize {
        match self {
            Self::Sessions => 100,
            Self::Logs => 10,
            Self::Crashes => 100,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sessions" | "session" => Ok(Self::Sessions),
            "logs" | "log" => Ok(Self::Logs),
            "crashes" | "crash" => Ok(Self::Crashes),
            _ => Err(ContractError::UnknownDestination { name: s.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for dest in Destination::ALL {
            assert_eq!(dest.as_str().parse::<Destination>().unwrap(), dest);
        }
        assert!("metrics".parse::<Destination>().is_err());
    }

    #[test]
    fn test_only_sessions_are_session_payloads() {
        assert!(Destination::Sessions.is_session());
        assert!(!Destination::Logs.is_session());
        assert!(!Destination::Crashes.is_session());
    }

    #[test]
    fn test_path_includes_version() {
        assert_eq!(Destination::Logs.path(), "v2/logs");
        assert_eq!(Destination::Crashes.path(), "v1/crashes");
    }
}
