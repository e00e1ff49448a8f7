//! Maps raw transport outcomes to what the client does with them.

use crate::error::TradfriError;
use crate::protocol::{CoapResponse, Payload, ResponseCode};
use crate::transport::TransportError;

/// What a response means for the observed resource
#[derive(Debug)]
pub(crate) enum Classification {
    /// New state for the resource
    Update(Payload),
    /// The collection member no longer exists
    MemberRemoved,
    /// Reported on the error channel; state stays untouched
    Reported(TradfriError),
}

/// Human-readable reason for a non-success code
pub(crate) fn describe_code(code: ResponseCode) -> &'static str {
    match code {
        ResponseCode::BAD_REQUEST => "bad request",
        ResponseCode::UNAUTHORIZED => "unauthorized",
        ResponseCode::BAD_OPTION => "bad option",
        ResponseCode::FORBIDDEN => "forbidden",
        ResponseCode::NOT_FOUND => "not found",
        ResponseCode::METHOD_NOT_ALLOWED => "method not allowed",
        code if code.class == 5 => "server error",
        _ => "unknown error",
    }
}

/// Classify a response; `is_member` marks observations of collection members
pub(crate) fn classify_response(
    response: &CoapResponse,
    is_member: bool,
    context: &str,
) -> Classification {
    match response.code {
        ResponseCode::NOT_FOUND if is_member => Classification::MemberRemoved,
        code if !code.is_success() => {
            tracing::warn!(
                "{} answered {} ({})",
                context,
                code,
                describe_code(code)
            );
            Classification::Reported(TradfriError::UnexpectedResponse {
                code,
                context: context.to_string(),
            })
        }
        _ => match response.decode() {
            Ok(payload) => Classification::Update(payload),
            Err(e) => Classification::Reported(e),
        },
    }
}

/// Error for a request or observation that failed below the CoAP layer
pub(crate) fn classify_transport_error(error: &TransportError) -> TradfriError {
    match error {
        TransportError::Reset => TradfriError::NetworkReset(
            "The network connection was reset while a request was pending".to_string(),
        ),
        TransportError::HandshakeTimeout => TradfriError::ConnectionTimedOut(
            "The DTLS handshake timed out while a request was pending".to_string(),
        ),
        TransportError::Failed(reason) => {
            TradfriError::ConnectionFailed(format!("The request failed unexpectedly: {}", reason))
        }
    }
}
