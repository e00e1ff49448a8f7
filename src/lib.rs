//! Rust client for IKEA Tradfri style smart-lighting gateways
//!
//! This library provides an async API for talking to a gateway over a
//! CoAP/DTLS transport. It supports:
//!
//! - Identity registration with the gateway's security code
//! - Connection attempts with configurable retries
//! - Live observation of devices, groups, scenes and gateway details
//! - Automatic tracking of devices, groups and scenes being added or removed
//! - Minimal update requests computed from local changes
//! - Raw requests and custom resource observations
//! - Connection reset with observer restore
//!
//! The CoAP/DTLS stack itself is not part of this crate. Plug one in by
//! implementing [`Transport`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tradfri_gateway::{ClientConfig, ClientEvent, LightOperation, TradfriClient, Transport};
//!
//! async fn run(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TradfriClient::new(transport, ClientConfig::new("192.168.1.20"))?;
//!
//!     // First run: trade the security code for a long-lived identity
//!     let credentials = client.authenticate("SECURITY-CODE").await?;
//!     client.connect(&credentials.identity, &credentials.psk).await?;
//!
//!     let mut events = client.subscribe();
//!     client.observe_devices().await?;
//!
//!     for device in client.devices().iter().filter(|d| d.is_light()) {
//!         let operation = LightOperation { on_off: Some(true), ..Default::default() };
//!         client.operate_light(device, &operation).await?;
//!     }
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::DeviceUpdated(device) = event {
//!             println!("{} changed", device.name);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Public API, session state and event fan-out
//! - **Connection**: Connect attempts and retry policy
//! - **Reconcile**: Hierarchical observation of devices, groups and scenes
//! - **Registry**: Canonical resource ids, at most one observation each
//! - **Classify**: Response and transport error classification
//! - **Patch**: Wire model parsing and minimal update payloads
//! - **Transport**: The CoAP/DTLS seam
//! - **Protocol**: Endpoints, methods, response codes and payload decoding
//! - **Types**: Domain types and data structures

mod classify;
mod client;
mod config;
mod connection;
mod error;
pub mod patch;
pub mod protocol;
mod reconcile;
mod registry;
mod subscription;
mod transport;
mod types;

// Public exports
pub use client::{Credentials, RequestResponse, TradfriClient, IDENTITY_PREFIX};
pub use config::{ClientConfig, DEFAULT_PORT};
pub use error::{ErrorKind, Result, TradfriError};
pub use protocol::{endpoints, CoapResponse, ContentFormat, Method, Payload, ResponseCode};
pub use registry::{canonicalize, CanonicalResourceId, ResourceCallback};
pub use subscription::{ClientEvent, EventReceiver};
pub use transport::{
    ConnectOutcome, ObserveCallback, ObserveOutcome, SecurityParams, Transport, TransportError,
};
pub use types::{
    Accessory, AccessoryType, DeviceInfo, GatewayDetails, Group, GroupOperation, InstanceId,
    Light, LightOperation, LightSetting, Scene, DEFAULT_TRANSITION_TIME, MIN_BRIGHTNESS_SENTINEL,
};
