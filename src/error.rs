//! Dispatch-wide error taxonomy. Transport/protocol failures on one link
//! must never unwind into the tasks for other links.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transient I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("actuator rejected command: {0}")]
    ActuatorRejected(String),

    #[error("safety interlock: {0}")]
    Safety(String),

    #[error("fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Transient/protocol errors are retried by the owning task loop;
    /// safety and fatal errors require the caller to stop and escalate.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DispatchError::TransientIo(_) | DispatchError::Protocol(_) | DispatchError::ActuatorRejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_protocol_errors_are_recoverable() {
        assert!(DispatchError::Protocol("bad checksum".into()).is_recoverable());
        assert!(DispatchError::ActuatorRejected("relay busy".into()).is_recoverable());
    }

    #[test]
    fn safety_and_fatal_errors_are_not_recoverable() {
        assert!(!DispatchError::Safety("hot tank cutoff".into()).is_recoverable());
        assert!(!DispatchError::Fatal(anyhow::anyhow!("config missing")).is_recoverable());
    }
}
