//! Test doubles and fixtures for client behavior tests
//!
//! `MockTransport` records every call the client makes and hands observation
//! callbacks back to the test, which then plays the gateway by pushing
//! notifications through them.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tradfri_gateway::{
    ClientConfig, ClientEvent, CoapResponse, ConnectOutcome, EventReceiver, Method,
    ObserveCallback, ObserveOutcome, ResponseCode, SecurityParams, TradfriClient, Transport,
    TransportError,
};

pub const BASE: &str = "coaps://localhost:5684/";

/// Absolute url of a gateway path as the client sends it
pub fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}

/// A request the client sent
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub method: Method,
    pub payload: Option<Value>,
}

/// A scriptable transport that records every call
#[derive(Default)]
pub struct MockTransport {
    connect_outcomes: Mutex<VecDeque<ConnectOutcome>>,
    responses: Mutex<VecDeque<Result<CoapResponse, TransportError>>>,
    observe_failures: Mutex<HashMap<String, TransportError>>,
    observers: Mutex<HashMap<String, ObserveCallback>>,
    inline_notifications: Mutex<HashMap<String, Value>>,
    unreachable: AtomicBool,

    reset_count: AtomicUsize,
    security: Mutex<Vec<(String, SecurityParams)>>,
    connects: Mutex<Vec<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
    observe_calls: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Outcomes for the next connection attempts; afterwards attempts succeed
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.connect_outcomes.lock().unwrap().extend(outcomes);
    }

    /// Response for the next request; afterwards requests answer 2.04
    pub fn script_response(&self, response: Result<CoapResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Make the next observe call for `path` fail
    pub fn fail_observe(&self, path: &str, error: TransportError) {
        self.observe_failures
            .lock()
            .unwrap()
            .insert(url(path), error);
    }

    /// Deliver `value` for `path` from inside the observe call itself
    pub fn notify_on_observe(&self, path: &str, value: Value) {
        self.inline_notifications
            .lock()
            .unwrap()
            .insert(url(path), value);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count.load(Ordering::SeqCst)
    }

    pub fn security(&self) -> Vec<(String, SecurityParams)> {
        self.security.lock().unwrap().clone()
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every url passed to observe, in call order
    pub fn observe_calls(&self) -> Vec<String> {
        self.observe_calls.lock().unwrap().clone()
    }

    pub fn observe_count(&self, path: &str) -> usize {
        let target = url(path);
        self.observe_calls().iter().filter(|u| **u == target).count()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn is_observed(&self, path: &str) -> bool {
        self.observers.lock().unwrap().contains_key(&url(path))
    }

    /// Wait until `path` is observed and return its callback
    pub async fn callback(&self, path: &str) -> ObserveCallback {
        let target = url(path);
        for _ in 0..1000 {
            if let Some(callback) = self.observers.lock().unwrap().get(&target).cloned() {
                return callback;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("{} was never observed", target);
    }

    /// Deliver a notification for `path` and wait until it is processed
    pub async fn notify(&self, path: &str, outcome: ObserveOutcome) {
        let callback = self.callback(path).await;
        callback(outcome).await;
    }

    /// Deliver a JSON notification with code 2.05
    pub async fn notify_json(&self, path: &str, value: Value) {
        self.notify(path, Ok(CoapResponse::json(ResponseCode::CONTENT, &value)))
            .await;
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn reset(&self) {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().unwrap().clear();
    }

    fn set_security_params(&self, hostname: &str, params: SecurityParams) {
        self.security
            .lock()
            .unwrap()
            .push((hostname.to_string(), params));
    }

    async fn try_to_connect(&self, url: &str) -> ConnectOutcome {
        self.connects.lock().unwrap().push(url.to_string());
        self.connect_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectOutcome::Connected)
    }

    async fn ping(&self, _url: &str, _timeout: Option<Duration>) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    async fn request(
        &self,
        url: &str,
        method: Method,
        payload: Option<Vec<u8>>,
    ) -> Result<CoapResponse, TransportError> {
        let payload = payload.map(|bytes| serde_json::from_slice(&bytes).unwrap());
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            method,
            payload,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CoapResponse::empty(ResponseCode::CHANGED)))
    }

    async fn observe(
        &self,
        url: &str,
        _method: Method,
        callback: ObserveCallback,
    ) -> Result<(), TransportError> {
        self.observe_calls.lock().unwrap().push(url.to_string());
        if let Some(error) = self.observe_failures.lock().unwrap().remove(url) {
            return Err(error);
        }
        self.observers
            .lock()
            .unwrap()
            .insert(url.to_string(), callback.clone());
        let inline = self.inline_notifications.lock().unwrap().remove(url);
        if let Some(value) = inline {
            callback(Ok(CoapResponse::json(ResponseCode::CONTENT, &value))).await;
        }
        Ok(())
    }

    fn stop_observing(&self, url: &str) {
        self.stopped.lock().unwrap().push(url.to_string());
        self.observers.lock().unwrap().remove(url);
    }
}

/// A connected client on top of a fresh mock
pub fn client() -> (TradfriClient, Arc<MockTransport>) {
    client_with(ClientConfig::default())
}

pub fn client_with(config: ClientConfig) -> (TradfriClient, Arc<MockTransport>) {
    init_tracing();
    let transport = MockTransport::new();
    let client = TradfriClient::new(transport.clone(), config).unwrap();
    (client, transport)
}

/// Route client logs to the test output; repeated calls are fine
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tradfri_gateway=debug")
        .with_test_writer()
        .try_init();
}

/// Collect every event queued so far
pub fn drain(events: &mut EventReceiver) -> Vec<ClientEvent> {
    events.drain()
}

pub fn bulb(id: u32, name: &str, on: bool, dimmer: u8) -> Value {
    json!({
        "9003": id,
        "9001": name,
        "9002": 1_545_000_000u64,
        "5750": 2,
        "9019": 1,
        "9020": 1_546_000_000u64,
        "3": {"0": "IKEA of Sweden", "1": "TRADFRI bulb E27 WS opal 980lm", "2": "", "3": "1.2.214", "6": 1},
        "3311": [{"9003": 0, "5850": u8::from(on), "5851": dimmer, "5706": "f5faf6", "5711": 370}]
    })
}

pub fn remote(id: u32, name: &str) -> Value {
    json!({
        "9003": id,
        "9001": name,
        "5750": 0,
        "9019": 1,
        "3": {"0": "IKEA of Sweden", "1": "TRADFRI remote control", "6": 3, "9": 87}
    })
}

pub fn group(id: u32, name: &str, members: &[u32]) -> Value {
    json!({
        "9003": id,
        "9001": name,
        "9002": 1_545_000_000u64,
        "5850": 1,
        "5851": 200,
        "9039": 196608,
        "9018": {"15002": {"9003": members}}
    })
}

pub fn scene(id: u32, name: &str) -> Value {
    json!({
        "9003": id,
        "9001": name,
        "9057": 1,
        "9068": 0,
        "15013": [{"9003": 65536, "5850": 1, "5851": 150}]
    })
}

pub fn gateway_details(version: &str) -> Value {
    json!({
        "9029": version,
        "9023": "pool.ntp.org",
        "9059": 1_546_000_000u64,
        "9061": 0,
        "9054": 0,
        "9055": 0
    })
}

pub fn not_found() -> ObserveOutcome {
    Ok(CoapResponse::empty(ResponseCode::NOT_FOUND))
}

/// Run `observe_devices` to completion with the given device payloads
pub async fn observe_devices(client: &TradfriClient, transport: &MockTransport, devices: Vec<Value>) {
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.observe_devices().await }
    });
    let ids: Vec<u64> = devices.iter().map(|d| d["9003"].as_u64().unwrap()).collect();
    transport.notify_json("15001", json!(ids)).await;
    for device in devices {
        let path = format!("15001/{}", device["9003"]);
        transport.notify_json(&path, device).await;
    }
    task.await.unwrap().unwrap();
}

/// Run `observe_groups_and_scenes` to completion; each group comes with its scenes
pub async fn observe_groups(
    client: &TradfriClient,
    transport: &MockTransport,
    groups: Vec<(Value, Vec<Value>)>,
) {
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.observe_groups_and_scenes().await }
    });
    let ids: Vec<u64> = groups.iter().map(|(g, _)| g["9003"].as_u64().unwrap()).collect();
    transport.notify_json("15004", json!(ids)).await;
    for (group, scenes) in groups {
        let group_id = group["9003"].as_u64().unwrap();
        transport
            .notify_json(&format!("15004/{}", group_id), group)
            .await;
        let scene_ids: Vec<u64> = scenes.iter().map(|s| s["9003"].as_u64().unwrap()).collect();
        transport
            .notify_json(&format!("15005/{}", group_id), json!(scene_ids))
            .await;
        for scene in scenes {
            let path = format!("15005/{}/{}", group_id, scene["9003"]);
            transport.notify_json(&path, scene).await;
        }
    }
    task.await.unwrap().unwrap();
}
