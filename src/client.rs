use crate::classify::classify_transport_error;
use crate::config::ClientConfig;
use crate::error::{Result, TradfriError};
use crate::patch;
use crate::protocol::{endpoints, CoapResponse, Method, Payload, ResponseCode};
use crate::reconcile::SessionState;
use crate::registry::{canonicalize, CanonicalResourceId, Family, ResourceCallback, Route};
use crate::subscription::{ClientEvent, EventReceiver};
use crate::transport::Transport;
use crate::types::{Accessory, GatewayDetails, Group, GroupOperation, InstanceId, LightOperation, Scene};
use futures_util::future::{try_join_all, BoxFuture};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

/// Identity used for the handshake that registers a new identity
const REGISTRATION_IDENTITY: &str = "Client_identity";

/// Prefix of identities created by [`TradfriClient::authenticate`]
pub const IDENTITY_PREFIX: &str = "tradfri_";

/// Identity and pre-shared key obtained from [`TradfriClient::authenticate`]
///
/// Store these; the security code printed on the gateway should only be used once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub psk: String,
}

/// Result of [`TradfriClient::request`]
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResponse {
    pub code: ResponseCode,
    pub payload: Payload,
}

/// State shared between the client handle and transport callbacks
pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: ClientConfig,
    pub(crate) base_url: Url,
    pub(crate) dispatch_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
    state: Mutex<SessionState>,
    generation: AtomicU64,
}

impl ClientInner {
    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Bumped by every reset; callbacks of older sessions are ignored
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Absolute url of a resource on the gateway
    pub(crate) fn url(&self, id: &CanonicalResourceId) -> String {
        match self.base_url.join(id.as_str()) {
            Ok(url) => url.into(),
            Err(_) => format!("{}{}", self.base_url, id),
        }
    }
}

/// Client for an IKEA Tradfri gateway
///
/// The client owns the connection lifecycle, keeps an up-to-date picture of
/// the gateway's devices, groups and scenes while they are observed, and turns
/// local changes into minimal update requests.
///
/// Cloning is cheap; all clones share the same session.
#[derive(Clone)]
pub struct TradfriClient {
    inner: Arc<ClientInner>,
}

impl TradfriClient {
    /// Create a client on top of a CoAP transport
    ///
    /// Nothing is sent until [`connect`](Self::connect) or
    /// [`authenticate`](Self::authenticate) is called.
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let base_url = Url::parse(&config.base_url()).map_err(|e| {
            TradfriError::InvalidConfig(format!(
                "{} is not a valid gateway address: {}",
                config.hostname, e
            ))
        })?;
        tracing::debug!("Created client for {}", base_url);

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                config,
                dispatch_lock: tokio::sync::Mutex::new(()),
                events,
                state: Mutex::new(SessionState::default()),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Subscribe to client events
    ///
    /// Multiple subscriptions can be active simultaneously. Events emitted
    /// before subscribing are not replayed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tradfri_gateway::{ClientEvent, TradfriClient};
    ///
    /// async fn print_devices(client: TradfriClient) -> tradfri_gateway::Result<()> {
    ///     let mut events = client.subscribe();
    ///     client.observe_devices().await?;
    ///     while let Ok(event) = events.recv().await {
    ///         if let ClientEvent::DeviceUpdated(device) = event {
    ///             println!("{}: {}", device.instance_id, device.name);
    ///         }
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.inner.events.subscribe())
    }

    /// Configuration the client was created with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connect with a stored identity and pre-shared key
    ///
    /// Retries according to the configuration; a `ConnectionFailed` event is
    /// emitted for every failed attempt.
    pub async fn connect(&self, identity: &str, psk: &str) -> Result<()> {
        self.inner.connect_with_retry(identity, psk).await
    }

    /// Register a new identity using the security code printed on the gateway
    pub async fn authenticate(&self, security_code: &str) -> Result<Credentials> {
        self.inner
            .connect_with_retry(REGISTRATION_IDENTITY, security_code)
            .await?;

        let identity = format!("{}{}", IDENTITY_PREFIX, Uuid::new_v4().simple());
        let response = self
            .send(
                endpoints::AUTHENTICATION,
                Method::Post,
                Some(&json!({ "9090": identity })),
            )
            .await?;
        if !response.code.is_success() {
            return Err(TradfriError::AuthenticationFailed(format!(
                "The gateway rejected the identity registration ({})",
                response.code
            )));
        }

        let payload = response.decode()?;
        let psk = payload
            .as_json()
            .and_then(|value| value.get("9091"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TradfriError::InvalidResponse(
                    "The authentication response holds no pre-shared key".to_string(),
                )
            })?
            .to_string();

        tracing::info!("Registered identity {}", identity);
        Ok(Credentials { identity, psk })
    }

    /// Check whether the gateway answers; never fails
    pub async fn ping(&self, timeout: Option<Duration>) -> bool {
        self.inner.transport.ping(self.inner.base_url.as_str(), timeout).await
    }

    /// Tear down the transport and every observation
    ///
    /// With `preserve_observers` the top-level and custom observations are
    /// remembered for [`restore_observers`](Self::restore_observers) and the
    /// known devices, groups and scenes are kept. Pending top-level
    /// observations fail with a network reset.
    pub fn reset(&self, preserve_observers: bool) {
        tracing::info!(
            "Resetting the connection to {} (preserve observers: {})",
            self.inner.base_url,
            preserve_observers
        );
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.transport.reset();
        self.inner.state().teardown(preserve_observers);
    }

    /// Re-issue the observations remembered by the last preserving reset
    ///
    /// Resolves once every restored top-level observation completed its fan-out.
    pub async fn restore_observers(&self) -> Result<()> {
        let restore = self.inner.state().restorable.take();
        let Some(restore) = restore else {
            tracing::debug!("No observers to restore");
            return Ok(());
        };
        tracing::info!("Restoring observers");

        for (id, callback) in restore.custom {
            self.inner.observe_path(id.as_str(), Route::Custom(callback)).await;
        }

        let mut pending: Vec<BoxFuture<'_, Result<()>>> = Vec::new();
        if restore.devices {
            pending.push(Box::pin(self.observe_devices()));
        }
        if restore.groups {
            pending.push(Box::pin(self.observe_groups_and_scenes()));
        }
        if restore.gateway {
            pending.push(Box::pin(self.observe_gateway()));
        }
        try_join_all(pending).await?;
        Ok(())
    }

    /// Drop everything; the client can be reconnected afterwards
    pub fn destroy(&self) {
        self.reset(false);
    }

    /// Observe an arbitrary resource
    ///
    /// Returns false when the resource is already observed; the first
    /// callback stays in charge then.
    pub async fn observe_resource(&self, path: &str, callback: ResourceCallback) -> bool {
        self.inner.observe_path(path, Route::Custom(callback)).await
    }

    /// Stop observing a resource; unknown paths are ignored
    pub fn stop_observing_resource(&self, path: &str) {
        let id = canonicalize(path);
        let removed = self.inner.state().registry.remove(&id);
        if removed.is_some() {
            self.inner.stop_ids(&[id]);
        }
    }

    /// Observe every device
    ///
    /// Resolves after the device list and every listed device reported once.
    /// Fails with `ObservationFailed` when one of them could not be observed;
    /// the others stay observed.
    pub async fn observe_devices(&self) -> Result<()> {
        self.inner.observe_family(Family::Devices).await
    }

    /// Stop observing the device list and every device; the device cache is cleared
    pub fn stop_observing_devices(&self) {
        self.inner.stop_family(Family::Devices);
    }

    /// Observe every group and the scenes of each group
    ///
    /// Resolves after the group list, every group and every group's scene list
    /// and scenes reported once.
    pub async fn observe_groups_and_scenes(&self) -> Result<()> {
        self.inner.observe_family(Family::Groups).await
    }

    /// Stop observing groups, scene lists and scenes; the group cache is cleared
    pub fn stop_observing_groups(&self) {
        self.inner.stop_family(Family::Groups);
    }

    /// Observe the gateway details
    pub async fn observe_gateway(&self) -> Result<()> {
        self.inner.observe_family(Family::Gateway).await
    }

    /// Stop observing the gateway details
    pub fn stop_observing_gateway(&self) {
        self.inner.stop_family(Family::Gateway);
    }

    /// Send the changes of `accessory` against the last known state
    ///
    /// Returns false without a request when nothing changed.
    pub async fn update_device(&self, accessory: &Accessory) -> Result<bool> {
        let stored = self
            .inner
            .state()
            .devices
            .get(&accessory.instance_id)
            .cloned();
        let stored = stored.ok_or(TradfriError::UnknownDevice(accessory.instance_id))?;

        let Some(changes) = patch::device_patch(&stored, accessory)? else {
            tracing::debug!("Device {} has no changes", accessory.instance_id);
            return Ok(false);
        };
        self.put(
            &endpoints::device(accessory.instance_id),
            &changes,
            format!("updateDevice({})", accessory.instance_id),
        )
        .await?;
        Ok(true)
    }

    /// Change the first light of a lightbulb accessory
    pub async fn operate_light(&self, accessory: &Accessory, operation: &LightOperation) -> Result<bool> {
        if !accessory.is_light() {
            return Err(TradfriError::NotALight(accessory.instance_id));
        }
        let mut changed = accessory.clone();
        if let Some(light) = changed.light_mut() {
            operation.apply_to(light);
        }
        self.update_device(&changed).await
    }

    /// Send the changes of `group` against the last known state
    pub async fn update_group(&self, group: &Group) -> Result<bool> {
        let stored = self
            .inner
            .state()
            .groups
            .get(&group.instance_id)
            .and_then(|entry| entry.group.clone());
        let stored = stored.ok_or(TradfriError::UnknownGroup(group.instance_id))?;

        let Some(changes) = patch::group_patch(&stored, group)? else {
            tracing::debug!("Group {} has no changes", group.instance_id);
            return Ok(false);
        };
        self.put(
            &endpoints::group(group.instance_id),
            &changes,
            format!("updateGroup({})", group.instance_id),
        )
        .await?;
        Ok(true)
    }

    /// Switch, dim or recall a scene for every light of a group
    pub async fn operate_group(&self, group: &Group, operation: &GroupOperation) -> Result<bool> {
        let known = self.inner.state().group_ids.contains(&group.instance_id);
        if !known {
            return Err(TradfriError::UnknownGroup(group.instance_id));
        }
        let Some(payload) = patch::group_operation_payload(operation) else {
            return Ok(false);
        };
        self.put(
            &endpoints::group(group.instance_id),
            &payload,
            format!("operateGroup({})", group.instance_id),
        )
        .await?;
        Ok(true)
    }

    /// Send a raw request
    ///
    /// Transport failures are reported on the event channel and returned.
    pub async fn request(&self, path: &str, method: Method, payload: Option<&Value>) -> Result<RequestResponse> {
        let response = self.send(path, method, payload).await?;
        Ok(RequestResponse {
            code: response.code,
            payload: response.decode()?,
        })
    }

    /// Reboot the gateway; true when it accepted the command
    pub async fn reboot_gateway(&self) -> Result<bool> {
        let response = self.send(endpoints::REBOOT, Method::Post, None).await?;
        Ok(response.code == ResponseCode::CREATED)
    }

    /// Factory reset the gateway; true when it accepted the command
    ///
    /// All pairings and settings are lost.
    pub async fn reset_gateway(&self) -> Result<bool> {
        let response = self.send(endpoints::FACTORY_RESET, Method::Post, None).await?;
        Ok(response.code == ResponseCode::CREATED)
    }

    /// Known devices, ordered by instance id
    pub fn devices(&self) -> Vec<Accessory> {
        self.inner.state().devices.values().cloned().collect()
    }

    /// Last known state of one device
    pub fn device(&self, id: InstanceId) -> Option<Accessory> {
        self.inner.state().devices.get(&id).cloned()
    }

    /// Known groups that reported at least once
    pub fn groups(&self) -> Vec<Group> {
        self.inner
            .state()
            .groups
            .values()
            .filter_map(|entry| entry.group.clone())
            .collect()
    }

    /// Known scenes of a group, ordered by instance id
    pub fn scenes(&self, group_id: InstanceId) -> Vec<Scene> {
        self.inner
            .state()
            .groups
            .get(&group_id)
            .map(|entry| entry.scenes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Last reported gateway details
    pub fn gateway(&self) -> Option<GatewayDetails> {
        self.inner.state().gateway.clone()
    }

    async fn send(&self, path: &str, method: Method, payload: Option<&Value>) -> Result<CoapResponse> {
        let body = payload.map(serde_json::to_vec).transpose()?;
        let url = self.inner.url(&canonicalize(path));
        tracing::debug!("{} {}", method, url);

        match self.inner.transport.request(&url, method, body).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!("{} {} failed: {}", method, url, e);
                self.inner
                    .emit(ClientEvent::Error(Arc::new(classify_transport_error(&e))));
                Err(classify_transport_error(&e))
            }
        }
    }

    async fn put(&self, path: &str, payload: &Value, context: String) -> Result<()> {
        let response = self.send(path, Method::Put, Some(payload)).await?;
        if !response.code.is_success() {
            return Err(TradfriError::UnexpectedResponse {
                code: response.code,
                context,
            });
        }
        Ok(())
    }
}
