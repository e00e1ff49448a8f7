//! Hierarchical observation of devices, groups and their scenes.
//!
//! Every observed collection (device list, group list, scene list of a group)
//! goes through the same routine: diff the new id snapshot against the stored
//! one, stop and report removed members, observe members that are not yet
//! observed. Groups add a second level by observing their scene list once the
//! group itself has reported.

use crate::classify::{classify_response, classify_transport_error, Classification};
use crate::client::ClientInner;
use crate::error::{Result, TradfriError};
use crate::patch;
use crate::protocol::{endpoints, parse_id_list, Method, Payload};
use crate::registry::{canonicalize, CanonicalResourceId, Family, ObservationRegistry, ResourceCallback, Route};
use crate::subscription::ClientEvent;
use crate::transport::{ObserveCallback, ObserveOutcome};
use crate::types::{Accessory, GatewayDetails, Group, InstanceId, Scene};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Members added to and removed from a collection
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CollectionDiff {
    pub added: Vec<InstanceId>,
    pub removed: Vec<InstanceId>,
}

pub(crate) fn diff_collection(previous: &BTreeSet<InstanceId>, next: &[InstanceId]) -> CollectionDiff {
    let next_set: BTreeSet<InstanceId> = next.iter().copied().collect();
    let mut seen = BTreeSet::new();
    CollectionDiff {
        added: next
            .iter()
            .copied()
            .filter(|id| !previous.contains(id) && seen.insert(*id))
            .collect(),
        removed: previous.difference(&next_set).copied().collect(),
    }
}

/// Completion tracker for the initial fan-out of a top-level observation
pub(crate) struct FanOut {
    pending: HashSet<CanonicalResourceId>,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl FanOut {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        let fan_out = Self {
            pending: HashSet::new(),
            done: Some(tx),
        };
        (fan_out, rx)
    }

    pub(crate) fn track(&mut self, id: CanonicalResourceId) {
        self.pending.insert(id);
    }

    pub(crate) fn is_pending(&self, id: &CanonicalResourceId) -> bool {
        self.pending.contains(id)
    }

    /// Mark `id` as reported; true once nothing is pending anymore
    pub(crate) fn settle(&mut self, id: &CanonicalResourceId) -> bool {
        if !self.pending.remove(id) {
            return false;
        }
        if !self.pending.is_empty() {
            return false;
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(()));
        }
        true
    }

    pub(crate) fn fail(&mut self, error: TradfriError) {
        self.pending.clear();
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(error));
        }
    }
}

/// An observation registered in the session but not yet handed to the transport
pub(crate) struct PendingObservation {
    id: CanonicalResourceId,
    route: Route,
    generation: u64,
}

/// Stored state of one group and its scene collection
#[derive(Debug, Default)]
pub(crate) struct GroupEntry {
    pub group: Option<Group>,
    pub scene_ids: BTreeSet<InstanceId>,
    pub scenes: BTreeMap<InstanceId, Scene>,
}

/// Top-level observations to re-issue after a preserving reset
#[derive(Default)]
pub(crate) struct RestoreSet {
    pub devices: bool,
    pub groups: bool,
    pub gateway: bool,
    pub custom: Vec<(CanonicalResourceId, ResourceCallback)>,
}

impl RestoreSet {
    fn merge(&mut self, routes: Vec<(CanonicalResourceId, Route)>) {
        for (id, route) in routes {
            match route {
                Route::Devices => self.devices = true,
                Route::Groups => self.groups = true,
                Route::Gateway => self.gateway = true,
                Route::Custom(callback) => {
                    if !self.custom.iter().any(|(known, _)| *known == id) {
                        self.custom.push((id, callback));
                    }
                }
                _ => {}
            }
        }
    }
}

/// Everything a client knows about its gateway
#[derive(Default)]
pub(crate) struct SessionState {
    pub registry: ObservationRegistry,
    pub device_ids: BTreeSet<InstanceId>,
    pub devices: BTreeMap<InstanceId, Accessory>,
    pub group_ids: BTreeSet<InstanceId>,
    pub groups: BTreeMap<InstanceId, GroupEntry>,
    pub gateway: Option<GatewayDetails>,
    pub fan_outs: HashMap<Family, FanOut>,
    pub restorable: Option<RestoreSet>,
}

impl SessionState {
    pub(crate) fn settle(&mut self, family: Family, id: &CanonicalResourceId) {
        if let Some(fan_out) = self.fan_outs.get_mut(&family) {
            if fan_out.settle(id) {
                self.fan_outs.remove(&family);
            }
        }
    }

    /// Register `path` and track it in the running fan-out of its family.
    /// None when it is observed already.
    fn claim(&mut self, path: &str, route: Route, generation: u64) -> Option<PendingObservation> {
        let id = canonicalize(path);
        if !self.registry.register(id.clone(), route.clone()) {
            return None;
        }
        if let Some(family) = route.family() {
            if let Some(fan_out) = self.fan_outs.get_mut(&family) {
                fan_out.track(id.clone());
            }
        }
        Some(PendingObservation {
            id,
            route,
            generation,
        })
    }

    /// Drop the observations behind `paths`, returning the ids that were
    /// actually observed
    fn release(&mut self, family: Family, paths: &[String]) -> Vec<CanonicalResourceId> {
        let mut released = Vec::new();
        for path in paths {
            let id = canonicalize(path);
            self.settle(family, &id);
            if self.registry.remove(&id).is_some() {
                released.push(id);
            }
        }
        released
    }

    /// Forget every observation. Snapshots and cached objects survive when
    /// `preserve_observers` is set so a later restore can diff against them.
    pub(crate) fn teardown(&mut self, preserve_observers: bool) {
        let routes = self.registry.drain();
        // dropping the senders rejects pending top-level observations
        self.fan_outs.clear();
        if preserve_observers {
            self.restorable.get_or_insert_with(RestoreSet::default).merge(routes);
        } else {
            self.restorable = None;
            self.device_ids.clear();
            self.devices.clear();
            self.group_ids.clear();
            self.groups.clear();
            self.gateway = None;
        }
    }
}

/// One level of the observation hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Devices,
    Groups,
    Scenes(InstanceId),
}

impl Level {
    fn family(&self) -> Family {
        match self {
            Level::Devices => Family::Devices,
            Level::Groups | Level::Scenes(_) => Family::Groups,
        }
    }

    fn member_path(&self, id: InstanceId) -> String {
        match self {
            Level::Devices => endpoints::device(id),
            Level::Groups => endpoints::group(id),
            Level::Scenes(group) => endpoints::scene(*group, id),
        }
    }

    fn member_route(&self, id: InstanceId) -> Route {
        match self {
            Level::Devices => Route::Device(id),
            Level::Groups => Route::Group(id),
            Level::Scenes(group) => Route::Scene(*group, id),
        }
    }

    fn removed_event(&self, id: InstanceId) -> ClientEvent {
        match self {
            Level::Devices => ClientEvent::DeviceRemoved(id),
            Level::Groups => ClientEvent::GroupRemoved(id),
            Level::Scenes(group) => ClientEvent::SceneRemoved {
                group_id: *group,
                scene_id: id,
            },
        }
    }

    fn snapshot_mut<'a>(&self, state: &'a mut SessionState) -> Option<&'a mut BTreeSet<InstanceId>> {
        match self {
            Level::Devices => Some(&mut state.device_ids),
            Level::Groups => Some(&mut state.group_ids),
            Level::Scenes(group) => state.groups.get_mut(group).map(|entry| &mut entry.scene_ids),
        }
    }

    fn admit(&self, state: &mut SessionState, id: InstanceId) {
        if let Level::Groups = self {
            state.groups.entry(id).or_default();
        }
    }

    /// Drop cached state of a member; returns the paths it was observed under,
    /// nested collections included
    fn forget(&self, state: &mut SessionState, id: InstanceId) -> Vec<String> {
        match self {
            Level::Devices => {
                state.devices.remove(&id);
                vec![endpoints::device(id)]
            }
            Level::Groups => {
                let mut paths = vec![endpoints::group(id), endpoints::scenes(id)];
                if let Some(entry) = state.groups.remove(&id) {
                    paths.extend(entry.scene_ids.iter().map(|scene| endpoints::scene(id, *scene)));
                }
                paths
            }
            Level::Scenes(group) => {
                if let Some(entry) = state.groups.get_mut(group) {
                    entry.scenes.remove(&id);
                }
                vec![endpoints::scene(*group, id)]
            }
        }
    }
}

fn json_payload(payload: &Payload, what: &str) -> Result<Value> {
    payload
        .as_json()
        .cloned()
        .ok_or_else(|| TradfriError::InvalidResponse(format!("{} is not JSON", what)))
}

fn id_list(payload: &Payload, what: &str) -> Result<Vec<InstanceId>> {
    parse_id_list(payload)
        .ok_or_else(|| TradfriError::InvalidResponse(format!("{} is not a list of ids", what)))
}

impl ClientInner {
    /// Wrap `id` into a transport callback bound to session `generation`
    fn callback_for(self: &Arc<Self>, id: CanonicalResourceId, generation: u64) -> ObserveCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |outcome: ObserveOutcome| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(generation, id, outcome).await;
                }
            })
        })
    }

    /// Observe `path` unless it is observed already
    pub(crate) async fn observe_path(self: &Arc<Self>, path: &str, route: Route) -> bool {
        let claimed = {
            let mut state = self.state();
            let generation = self.generation();
            state.claim(path, route, generation)
        };
        let Some(pending) = claimed else {
            tracing::debug!("Already observing {}", canonicalize(path));
            return false;
        };
        self.start_observation(pending).await;
        true
    }

    /// Hand a registered observation to the transport
    async fn start_observation(self: &Arc<Self>, pending: PendingObservation) {
        let PendingObservation {
            id,
            route,
            generation,
        } = pending;
        let current = generation == self.generation() && self.state().registry.contains(&id);
        if !current {
            tracing::debug!("Not observing {}, it was dropped in the meantime", id);
            return;
        }

        let url = self.url(&id);
        tracing::debug!("Observing {}", url);
        let callback = self.callback_for(id.clone(), generation);
        if let Err(e) = self.transport.observe(&url, Method::Get, callback).await {
            self.state().registry.remove(&id);
            self.report_failure(&route, &id, classify_transport_error(&e));
        }
    }

    pub(crate) fn stop_ids(&self, ids: &[CanonicalResourceId]) {
        for id in ids {
            let url = self.url(id);
            tracing::debug!("Stopped observing {}", url);
            self.transport.stop_observing(&url);
        }
    }

    /// Emit `error` and reject the running fan-out if `id` was still pending in it
    pub(crate) fn report_failure(&self, route: &Route, id: &CanonicalResourceId, error: TradfriError) {
        tracing::warn!("{} failed: {}", route.context(), error);
        if let Some(family) = route.family() {
            let mut state = self.state();
            let pending = state
                .fan_outs
                .get(&family)
                .is_some_and(|fan_out| fan_out.is_pending(id));
            if pending {
                if let Some(mut fan_out) = state.fan_outs.remove(&family) {
                    fan_out.fail(TradfriError::ObservationFailed(route.subject()));
                }
            }
        }
        self.emit(ClientEvent::Error(Arc::new(error)));
    }

    /// Start a top-level observation and wait for its initial fan-out
    pub(crate) async fn observe_family(self: &Arc<Self>, family: Family) -> Result<()> {
        let (path, route) = match family {
            Family::Devices => (endpoints::DEVICES, Route::Devices),
            Family::Groups => (endpoints::GROUPS, Route::Groups),
            Family::Gateway => (endpoints::GATEWAY_DETAILS, Route::Gateway),
        };
        let (done, root) = {
            let mut state = self.state();
            if state.registry.contains(&canonicalize(path)) {
                tracing::debug!("{} is already observed", path);
                return Ok(());
            }
            let (fan_out, done) = FanOut::new();
            state.fan_outs.insert(family, fan_out);
            let generation = self.generation();
            (done, state.claim(path, route, generation))
        };

        tracing::info!("Observing {:?}", family);
        if let Some(root) = root {
            self.start_observation(root).await;
        }
        match done.await {
            Ok(result) => result,
            Err(_) => Err(TradfriError::NetworkReset(format!(
                "The observation of {:?} was torn down before it completed",
                family
            ))),
        }
    }

    /// Stop a top-level observation together with everything below it
    pub(crate) fn stop_family(&self, family: Family) {
        let ids = {
            let mut state = self.state();
            state.fan_outs.remove(&family);
            match family {
                Family::Devices => {
                    state.device_ids.clear();
                    state.devices.clear();
                }
                Family::Groups => {
                    state.group_ids.clear();
                    state.groups.clear();
                }
                Family::Gateway => state.gateway = None,
            }
            state.registry.remove_family(family)
        };
        tracing::info!("Stopped observing {:?} ({} resources)", family, ids.len());
        self.stop_ids(&ids);
    }

    /// Handle one notification. Notifications are processed one at a time;
    /// observations they start are handed to the transport after the turn ends.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        generation: u64,
        id: CanonicalResourceId,
        outcome: ObserveOutcome,
    ) {
        let started = {
            let _turn = self.dispatch_lock.lock().await;
            if generation != self.generation() {
                tracing::debug!("Dropping notification for {} from a previous session", id);
                return;
            }
            let route = self.state().registry.route(&id);
            let Some(route) = route else {
                tracing::debug!("Dropping notification for {} (not observed)", id);
                return;
            };

            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    self.report_failure(&route, &id, classify_transport_error(&e));
                    return;
                }
            };
            if let Route::Custom(callback) = &route {
                callback(&response);
                return;
            }

            match classify_response(&response, route.is_member(), &route.context()) {
                Classification::MemberRemoved => {
                    self.member_gone(&route);
                    Vec::new()
                }
                Classification::Reported(e) => {
                    self.report_failure(&route, &id, e);
                    Vec::new()
                }
                Classification::Update(payload) => {
                    match self.apply_update(&route, &payload, generation) {
                        Ok(started) => {
                            if let Some(family) = route.family() {
                                self.state().settle(family, &id);
                            }
                            started
                        }
                        Err(e) => {
                            self.report_failure(&route, &id, e);
                            Vec::new()
                        }
                    }
                }
            }
        };

        for pending in started {
            self.start_observation(pending).await;
        }
    }

    /// Store an update; returns the observations it registered
    fn apply_update(
        &self,
        route: &Route,
        payload: &Payload,
        generation: u64,
    ) -> Result<Vec<PendingObservation>> {
        match *route {
            Route::Devices => {
                let ids = id_list(payload, "The device list")?;
                return Ok(self.reconcile(Level::Devices, ids, generation));
            }
            Route::Device(device_id) => {
                let mut accessory = patch::parse_accessory(&json_payload(payload, "The device")?)?;
                accessory.instance_id = device_id;
                {
                    let mut state = self.state();
                    if !state.device_ids.contains(&device_id) {
                        return Ok(Vec::new());
                    }
                    state.devices.insert(device_id, accessory.clone());
                }
                self.emit(ClientEvent::DeviceUpdated(accessory));
            }
            Route::Groups => {
                let ids = id_list(payload, "The group list")?;
                return Ok(self.reconcile(Level::Groups, ids, generation));
            }
            Route::Group(group_id) => {
                let mut group = patch::parse_group(&json_payload(payload, "The group")?)?;
                group.instance_id = group_id;
                let scene_list = {
                    let mut state = self.state();
                    let Some(entry) = state.groups.get_mut(&group_id) else {
                        return Ok(Vec::new());
                    };
                    entry.group = Some(group.clone());
                    state.claim(&endpoints::scenes(group_id), Route::Scenes(group_id), generation)
                };
                self.emit(ClientEvent::GroupUpdated(group));
                return Ok(scene_list.into_iter().collect());
            }
            Route::Scenes(group_id) => {
                let ids = id_list(payload, "The scene list")?;
                return Ok(self.reconcile(Level::Scenes(group_id), ids, generation));
            }
            Route::Scene(group_id, scene_id) => {
                let mut scene = patch::parse_scene(&json_payload(payload, "The scene")?)?;
                scene.instance_id = scene_id;
                {
                    let mut state = self.state();
                    let Some(entry) = state.groups.get_mut(&group_id) else {
                        return Ok(Vec::new());
                    };
                    if !entry.scene_ids.contains(&scene_id) {
                        return Ok(Vec::new());
                    }
                    entry.scenes.insert(scene_id, scene.clone());
                }
                self.emit(ClientEvent::SceneUpdated { group_id, scene });
            }
            Route::Gateway => {
                let details = patch::parse_gateway_details(&json_payload(payload, "The gateway")?)?;
                self.state().gateway = Some(details.clone());
                self.emit(ClientEvent::GatewayUpdated(details));
            }
            Route::Custom(_) => {}
        }
        Ok(Vec::new())
    }

    /// Apply a new id snapshot to a collection; returns the member
    /// observations it registered
    fn reconcile(
        &self,
        level: Level,
        next: Vec<InstanceId>,
        generation: u64,
    ) -> Vec<PendingObservation> {
        let (diff, stops, started) = {
            let mut state = self.state();
            let Some(previous) = level.snapshot_mut(&mut state) else {
                return Vec::new();
            };
            let diff = diff_collection(previous, &next);
            *previous = next.iter().copied().collect();

            let mut stops = Vec::new();
            for &id in &diff.removed {
                let paths = level.forget(&mut state, id);
                stops.extend(state.release(level.family(), &paths));
            }
            for &id in &diff.added {
                level.admit(&mut state, id);
            }

            // members kept across a reset are no longer observed either
            let mut seen = BTreeSet::new();
            let mut started = Vec::new();
            for &id in &next {
                if !seen.insert(id) {
                    continue;
                }
                let path = level.member_path(id);
                if let Some(pending) = state.claim(&path, level.member_route(id), generation) {
                    started.push(pending);
                }
            }
            (diff, stops, started)
        };

        if !diff.added.is_empty() || !diff.removed.is_empty() {
            tracing::debug!(
                "{:?}: added {:?}, removed {:?}",
                level,
                diff.added,
                diff.removed
            );
        }
        self.stop_ids(&stops);
        for &id in &diff.removed {
            self.emit(level.removed_event(id));
        }
        started
    }

    /// A member answered 4.04: treat it like it left its collection
    fn member_gone(&self, route: &Route) {
        let (level, id) = match *route {
            Route::Device(id) => (Level::Devices, id),
            Route::Group(id) => (Level::Groups, id),
            Route::Scene(group, scene) => (Level::Scenes(group), scene),
            _ => return,
        };
        let stops = {
            let mut state = self.state();
            let known = level
                .snapshot_mut(&mut state)
                .is_some_and(|ids| ids.remove(&id));
            if !known {
                return;
            }
            let paths = level.forget(&mut state, id);
            state.release(level.family(), &paths)
        };
        tracing::info!("{} no longer exists", route.subject());
        self.stop_ids(&stops);
        self.emit(level.removed_event(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_added_and_removed_members() {
        let previous: BTreeSet<_> = [65536, 65537].into_iter().collect();
        let diff = diff_collection(&previous, &[65537, 65538]);
        assert_eq!(diff.added, vec![65538]);
        assert_eq!(diff.removed, vec![65536]);
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let previous: BTreeSet<_> = [1, 2, 3].into_iter().collect();
        assert_eq!(diff_collection(&previous, &[3, 2, 1]), CollectionDiff::default());
        let diff = diff_collection(&BTreeSet::new(), &[5, 5, 6]);
        assert_eq!(diff.added, vec![5, 6]);
    }

    #[tokio::test]
    async fn fan_out_resolves_once_everything_settled() {
        let (mut fan_out, done) = FanOut::new();
        fan_out.track(canonicalize("15001"));
        fan_out.track(canonicalize("15001/1"));
        assert!(!fan_out.settle(&canonicalize("15001")));
        assert!(!fan_out.settle(&canonicalize("15001/2")));
        assert!(fan_out.settle(&canonicalize("15001/1")));
        assert!(done.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn failed_fan_out_rejects() {
        let (mut fan_out, done) = FanOut::new();
        fan_out.track(canonicalize("15011/15012"));
        fan_out.fail(TradfriError::ObservationFailed("The gateway".to_string()));
        let err = done.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("could not be observed"));
    }

    #[test]
    fn preserving_teardown_remembers_top_level_observations() {
        let mut state = SessionState::default();
        state.registry.register(canonicalize("15001"), Route::Devices);
        state.registry.register(canonicalize("15001/1"), Route::Device(1));
        state.device_ids.insert(1);
        state.teardown(true);
        let restore = state.restorable.take().unwrap();
        assert!(restore.devices && !restore.groups && !restore.gateway);
        assert_eq!(state.registry.len(), 0);
        assert!(state.device_ids.contains(&1));

        state.teardown(false);
        assert!(state.restorable.is_none());
        assert!(state.device_ids.is_empty());
    }
}
