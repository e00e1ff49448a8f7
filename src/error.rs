use crate::protocol::ResponseCode;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, TradfriError>;

/// Machine-readable classification of a [`TradfriError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionFailed,
    ConnectionTimedOut,
    AuthenticationFailed,
    NetworkReset,
    UnexpectedResponse,
    ObservationFailed,
    InvalidArgument,
    InvalidConfig,
    InvalidResponse,
    Channel,
}

/// Errors that can occur when talking to a gateway
#[derive(Error, Debug)]
pub enum TradfriError {
    /// Connecting failed for a reason other than a timeout or bad credentials
    #[error("{0}")]
    ConnectionFailed(String),

    /// The gateway did not answer the handshake in time
    #[error("{0}")]
    ConnectionTimedOut(String),

    /// The gateway rejected the supplied credentials
    #[error("{0}")]
    AuthenticationFailed(String),

    /// The transport was torn down while a request was pending
    #[error("{0}")]
    NetworkReset(String),

    /// The gateway answered with a non-success response code
    #[error("unexpected response ({code}) to {context}")]
    UnexpectedResponse {
        /// Response code as received
        code: ResponseCode,
        /// What the response belonged to
        context: String,
    },

    /// A member of an initial observation fan-out could not be observed
    #[error("{0} could not be observed")]
    ObservationFailed(String),

    /// Update or operate call for a device that is not being observed
    #[error("The device with the instance id {0} is not known")]
    UnknownDevice(u32),

    /// Update or operate call for a group that is not being observed
    #[error("The group with the instance id {0} is not known")]
    UnknownGroup(u32),

    /// Light operation on an accessory without light capability
    #[error("The accessory with the instance id {0} must be a lightbulb")]
    NotALight(u32),

    /// Rejected client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Event channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl TradfriError {
    /// The machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradfriError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            TradfriError::ConnectionTimedOut(_) => ErrorKind::ConnectionTimedOut,
            TradfriError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            TradfriError::NetworkReset(_) => ErrorKind::NetworkReset,
            TradfriError::UnexpectedResponse { .. } => ErrorKind::UnexpectedResponse,
            TradfriError::ObservationFailed(_) => ErrorKind::ObservationFailed,
            TradfriError::UnknownDevice(_)
            | TradfriError::UnknownGroup(_)
            | TradfriError::NotALight(_) => ErrorKind::InvalidArgument,
            TradfriError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            TradfriError::Json(_) | TradfriError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            TradfriError::ChannelError(_) => ErrorKind::Channel,
        }
    }
}
