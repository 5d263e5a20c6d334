//! Top-level error taxonomy. Each component has its own narrow error enum
//! at its seam; this type composes them for `main` and is the single place
//! that maps a failure onto (a) what the peer is told and (b) the process
//! exit code, per the propagation policy.

use crate::consts::EXIT_REQUEST_FAILURE;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("transport error: {0}")]
    Transport(#[from] crate::wire::WireError),

    #[error("invalid input: {0}")]
    Input(&'static str),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("peer not authorized")]
    PeerUnauthorized,

    #[error("bridge validation failed: {0}")]
    Integrity(String),

    #[error("resource error: {0}")]
    Resource(#[source] anyhow::Error),

    #[error("bridge exec failed")]
    LaunchExecFailed,

    #[error("bridge start timeout")]
    LaunchTimeout,
}

impl BrokerError {
    /// Text sent to the peer in the response's error field. Never includes
    /// paths, errno values, or anything derived from the secret.
    pub fn peer_message(&self) -> &str {
        match self {
            BrokerError::Transport(_) => "bad request",
            BrokerError::Input(_) => "bad request",
            BrokerError::Authentication(msg) => msg.as_str(),
            BrokerError::PeerUnauthorized => "error",
            BrokerError::Integrity(_) => "bridge validation failed",
            BrokerError::Resource(_) => "prepare failed",
            BrokerError::LaunchExecFailed => "bridge exec failed",
            BrokerError::LaunchTimeout => "bridge start timeout",
        }
    }

    /// Process exit code for an error that terminates the request without a
    /// bridge exit status to translate (see C10 for the bridge-exit case).
    pub fn exit_code(&self) -> i32 {
        EXIT_REQUEST_FAILURE
    }
}
