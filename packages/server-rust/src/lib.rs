//! Relay server: resilient, authenticated calls to downstream services with
//! fallback recovery and usage analytics.

pub mod client;
pub mod service;
pub mod telemetry;

pub use client::{HttpIdentityProvider, HttpInventoryClient, InventoryFallback};
pub use service::{RelayConfig, RelayGateway, RequestScope, ResilientInvoker};
