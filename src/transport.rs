//! Boundary to the secured CoAP session.
//!
//! The client never speaks DTLS itself; it drives an implementation of
//! [`Transport`] that owns the encrypted session to a single gateway.

use crate::protocol::{CoapResponse, Method};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result of a single connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Session established
    Connected,
    /// The handshake did not complete in time
    TimedOut,
    /// The gateway rejected the pre-shared key
    AuthFailed,
    /// The attempt failed with an error
    Error(String),
    /// The transport returned something it should not have
    Unexpected(String),
}

/// Failure of a request or observation at the transport level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport was reset while the request was pending
    #[error("the transport was reset")]
    Reset,

    /// The DTLS handshake timed out while the request was pending
    #[error("the DTLS handshake timed out")]
    HandshakeTimeout,

    /// Any other transport failure
    #[error("{0}")]
    Failed(String),
}

/// Pre-shared keys by identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityParams {
    pub psk: BTreeMap<String, String>,
}

impl SecurityParams {
    pub fn psk(identity: impl Into<String>, psk: impl Into<String>) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(identity.into(), psk.into());
        Self { psk: keys }
    }
}

/// What an observation delivers: a response, or the reason none will come
pub type ObserveOutcome = std::result::Result<CoapResponse, TransportError>;

/// Notification sink handed to [`Transport::observe`].
///
/// The returned future resolves once the notification has been processed.
/// It may be awaited from inside [`Transport::observe`], for example to
/// deliver a cached first notification.
pub type ObserveCallback = Arc<dyn Fn(ObserveOutcome) -> BoxFuture<'static, ()> + Send + Sync>;

/// Secured CoAP session to one gateway
#[async_trait]
pub trait Transport: Send + Sync {
    /// Drop the session and every active observation
    fn reset(&self);

    /// Provide the credentials for the next connection attempt
    fn set_security_params(&self, hostname: &str, params: SecurityParams);

    /// Perform the DTLS handshake against `url`
    async fn try_to_connect(&self, url: &str) -> ConnectOutcome;

    /// Check whether the gateway answers
    async fn ping(&self, url: &str, timeout: Option<Duration>) -> bool;

    /// Issue a single request
    async fn request(
        &self,
        url: &str,
        method: Method,
        payload: Option<Vec<u8>>,
    ) -> std::result::Result<CoapResponse, TransportError>;

    /// Start observing `url`; every notification is passed to `callback`
    async fn observe(
        &self,
        url: &str,
        method: Method,
        callback: ObserveCallback,
    ) -> std::result::Result<(), TransportError>;

    /// Stop observing `url`
    fn stop_observing(&self, url: &str);
}
