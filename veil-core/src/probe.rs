//! Probe outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a single validation or health probe observed
///
/// Loop control only ever asks [`ProbeOutcome::is_ok`]: a timeout or a
/// refused connection is just another non-200 outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// The target answered with this HTTP status
    Status(u16),
    /// No HTTP response (connect error, timeout, TLS failure...)
    Transport(String),
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Status(200))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Status(code) => Some(*code),
            ProbeOutcome::Transport(_) => None,
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Status(code) => write!(f, "HTTP {}", code),
            ProbeOutcome::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_200_is_ok() {
        assert!(ProbeOutcome::Status(200).is_ok());
        assert!(!ProbeOutcome::Status(204).is_ok());
        assert!(!ProbeOutcome::Status(415).is_ok());
        assert!(!ProbeOutcome::Transport("timed out".into()).is_ok());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ProbeOutcome::Status(503).status(), Some(503));
        assert_eq!(ProbeOutcome::Transport("refused".into()).status(), None);
    }
}
