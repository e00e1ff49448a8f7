use crate::client::ClientInner;
use crate::error::{Result, TradfriError};
use crate::subscription::ClientEvent;
use crate::transport::{ConnectOutcome, SecurityParams};
use std::time::Duration;
use tokio::time::sleep;

/// Progress of one `connect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryState {
    pub(crate) fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub(crate) fn advance(&mut self) {
        self.attempt += 1;
    }
}

/// Terminal error for a failed attempt; `None` when the attempt succeeded
pub(crate) fn outcome_error(outcome: &ConnectOutcome) -> Option<TradfriError> {
    match outcome {
        ConnectOutcome::Connected => None,
        ConnectOutcome::TimedOut => Some(TradfriError::ConnectionTimedOut(
            "The gateway did not respond in time".to_string(),
        )),
        ConnectOutcome::AuthFailed => Some(TradfriError::AuthenticationFailed(
            "The provided credentials are not valid".to_string(),
        )),
        ConnectOutcome::Error(reason) => Some(TradfriError::ConnectionFailed(format!(
            "The connection failed with an unexpected error: {}",
            reason
        ))),
        ConnectOutcome::Unexpected(value) => Some(TradfriError::ConnectionFailed(format!(
            "The gateway returned an unexpected response: {}",
            value
        ))),
    }
}

impl ClientInner {
    /// Reset the transport, push the credentials and try to connect until an
    /// attempt succeeds or the configured attempts run out.
    pub(crate) async fn connect_with_retry(&self, identity: &str, psk: &str) -> Result<()> {
        self.transport.reset();
        self.transport
            .set_security_params(&self.config.hostname, SecurityParams::psk(identity, psk));
        let generation = self.generation();

        let mut retry = RetryState::new(
            self.config.max_connection_attempts,
            self.config.connection_interval(),
        );
        loop {
            tracing::debug!(
                "Connecting to {} (attempt {}/{})",
                self.base_url,
                retry.attempt,
                retry.max_attempts
            );
            let outcome = self.transport.try_to_connect(self.base_url.as_str()).await;
            let Some(error) = outcome_error(&outcome) else {
                tracing::info!("Connected to {}", self.base_url);
                return Ok(());
            };

            tracing::warn!(
                "Connection attempt {}/{} failed: {}",
                retry.attempt,
                retry.max_attempts,
                error
            );
            self.emit(ClientEvent::ConnectionFailed {
                attempt: retry.attempt,
                max_attempts: retry.max_attempts,
            });
            if retry.exhausted() {
                return Err(error);
            }

            sleep(retry.interval).await;
            if self.generation() != generation {
                return Err(TradfriError::NetworkReset(
                    "The connection attempt was cancelled by a reset".to_string(),
                ));
            }
            retry.advance();
        }
    }
}
