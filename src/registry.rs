//! Canonical resource identities and the at-most-one observation map.

use crate::protocol::CoapResponse;
use crate::types::InstanceId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Callback for resources observed through
/// [`TradfriClient::observe_resource`](crate::TradfriClient::observe_resource)
pub type ResourceCallback = Arc<dyn Fn(&CoapResponse) + Send + Sync>;

/// Normalized identity of an observable path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalResourceId(String);

impl CanonicalResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip scheme, host and port, then surrounding slashes.
///
/// `coaps://localhost:5684/15001/`, `/15001` and `15001` all map to `15001`.
/// Dot segments are resolved, so `coaps://gw/15004/../15001` maps there too.
pub fn canonicalize(path: &str) -> CanonicalResourceId {
    let path = path.trim();
    let resolved = match Url::parse(path) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(path.trim_start_matches('/')))
            .ok(),
        Err(_) => None,
    };
    let without_origin = match &resolved {
        Some(url) => url.path(),
        None => path,
    };
    CanonicalResourceId(without_origin.trim_matches('/').to_string())
}

/// Anchor for resolving relative paths; only its path component is kept
const RELATIVE_BASE: &str = "coap://gateway/";

/// Observed resource families with their own top-level entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Family {
    Devices,
    Groups,
    Gateway,
}

/// How notifications for an observed resource are handled
#[derive(Clone)]
pub(crate) enum Route {
    Devices,
    Device(InstanceId),
    Groups,
    Group(InstanceId),
    Scenes(InstanceId),
    Scene(InstanceId, InstanceId),
    Gateway,
    Custom(ResourceCallback),
}

impl Route {
    pub(crate) fn family(&self) -> Option<Family> {
        match self {
            Route::Devices | Route::Device(_) => Some(Family::Devices),
            Route::Groups | Route::Group(_) | Route::Scenes(_) | Route::Scene(..) => {
                Some(Family::Groups)
            }
            Route::Gateway => Some(Family::Gateway),
            Route::Custom(_) => None,
        }
    }

    /// Members of a collection; a 4.04 on these means "removed"
    pub(crate) fn is_member(&self) -> bool {
        matches!(self, Route::Device(_) | Route::Group(_) | Route::Scene(..))
    }

    /// Operation name used in error messages
    pub(crate) fn context(&self) -> String {
        match self {
            Route::Devices => "observeDevices".to_string(),
            Route::Device(id) => format!("observeDevice({})", id),
            Route::Groups => "observeGroups".to_string(),
            Route::Group(id) => format!("observeGroup({})", id),
            Route::Scenes(group) => format!("observeScenes({})", group),
            Route::Scene(group, scene) => format!("observeScene({}, {})", group, scene),
            Route::Gateway => "observeGateway".to_string(),
            Route::Custom(_) => "observeResource".to_string(),
        }
    }

    /// What failed, for fan-out rejections
    pub(crate) fn subject(&self) -> String {
        match self {
            Route::Devices => "The device list".to_string(),
            Route::Device(id) => format!("The device {}", id),
            Route::Groups => "The group list".to_string(),
            Route::Group(id) => format!("The group {}", id),
            Route::Scenes(group) => format!("The scene list of group {}", group),
            Route::Scene(group, scene) => format!("The scene {} of group {}", scene, group),
            Route::Gateway => "The gateway".to_string(),
            Route::Custom(_) => "The resource".to_string(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Custom(_) => f.write_str("Custom(..)"),
            other => f.write_str(&other.context()),
        }
    }
}

/// Active observations keyed by canonical id
#[derive(Default)]
pub(crate) struct ObservationRegistry {
    entries: HashMap<CanonicalResourceId, Route>,
}

impl ObservationRegistry {
    pub(crate) fn contains(&self, id: &CanonicalResourceId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn route(&self, id: &CanonicalResourceId) -> Option<Route> {
        self.entries.get(id).cloned()
    }

    /// Track `id`; returns false when it is already observed, leaving the
    /// first registration in place
    pub(crate) fn register(&mut self, id: CanonicalResourceId, route: Route) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, route);
        true
    }

    pub(crate) fn remove(&mut self, id: &CanonicalResourceId) -> Option<Route> {
        self.entries.remove(id)
    }

    /// Remove and return every entry of a family
    pub(crate) fn remove_family(&mut self, family: Family) -> Vec<CanonicalResourceId> {
        let ids: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, route)| route.family() == Some(family))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.entries.remove(id);
        }
        ids
    }

    pub(crate) fn drain(&mut self) -> Vec<(CanonicalResourceId, Route)> {
        self.entries.drain().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
