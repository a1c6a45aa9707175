use thiserror::Error;

/// Errors raised while probing a destination.
///
/// Only `Timeout` is recoverable: the round loop absorbs it as a miss and
/// moves on to the next time-to-live. Everything else aborts the run.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Unable to resolve {destination}: {reason}")]
    Resolution { destination: String, reason: String },

    #[error("Socket error during {action}: {source}")]
    Socket {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("No response within {timeout_ms}ms at ttl {ttl}")]
    Timeout { ttl: u8, timeout_ms: u64 },

    #[error("Platform {0} supports neither raw sockets nor a known trace utility")]
    PlatformUnsupported(&'static str),

    #[error("Trace utility {program} failed: {reason}")]
    Utility { program: String, reason: String },
}

impl ProbeError {
    pub(crate) fn socket(action: &'static str, source: std::io::Error) -> Self {
        Self::Socket { action, source }
    }

    /// True for errors the round loop treats as a miss.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_recoverable() {
        assert!(ProbeError::Timeout { ttl: 3, timeout_ms: 1000 }.is_recoverable());
        assert!(!ProbeError::PlatformUnsupported("wasm32").is_recoverable());
        assert!(
            !ProbeError::Resolution {
                destination: "nowhere.invalid".to_string(),
                reason: "no such host".to_string(),
            }
            .is_recoverable()
        );
        let bind = ProbeError::socket(
            "bind",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(!bind.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = ProbeError::Timeout { ttl: 2, timeout_ms: 500 };
        assert_eq!(err.to_string(), "No response within 500ms at ttl 2");

        let err = ProbeError::Resolution {
            destination: "host.invalid".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "Unable to resolve host.invalid: not found");
    }
}
