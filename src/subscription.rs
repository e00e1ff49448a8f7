use crate::error::{Result, TradfriError};
use crate::types::{Accessory, GatewayDetails, Group, InstanceId, Scene};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event emitted by a [`TradfriClient`](crate::TradfriClient)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection attempt failed; more may follow until `attempt == max_attempts`
    ConnectionFailed { attempt: u32, max_attempts: u32 },

    /// A device was observed for the first time or changed
    DeviceUpdated(Accessory),

    /// A device disappeared from the gateway
    DeviceRemoved(InstanceId),

    /// A group was observed for the first time or changed
    GroupUpdated(Group),

    /// A group disappeared; its scenes are gone with it
    GroupRemoved(InstanceId),

    /// A scene of a group was observed for the first time or changed
    SceneUpdated { group_id: InstanceId, scene: Scene },

    /// A scene disappeared from its group
    SceneRemoved { group_id: InstanceId, scene_id: InstanceId },

    /// The gateway details changed
    GatewayUpdated(GatewayDetails),

    /// A non-fatal error while observing or requesting
    Error(Arc<TradfriError>),
}

/// Receiver for client events
pub struct EventReceiver {
    rx: broadcast::Receiver<ClientEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ClientEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `ChannelError` once the client is gone or this receiver fell behind.
    pub async fn recv(&mut self) -> Result<ClientEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => {
                TradfriError::ChannelError("client dropped".to_string())
            }
            broadcast::error::RecvError::Lagged(n) => {
                TradfriError::ChannelError(format!("Lagged by {} events", n))
            }
        })
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<ClientEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => {
                Err(TradfriError::ChannelError("client dropped".to_string()))
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(TradfriError::ChannelError(format!("Lagged by {} events", n)))
            }
        }
    }

    /// Drain every queued event
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
