//! Environment cache and power toggle engine for tagged AWS instances.
//!
//! Instances and auto scaling groups carrying an opt-in tag are grouped by
//! their environment tag into a snapshot that is rebuilt on every refresh and
//! swapped in atomically. Whole environments or single instances can then be
//! started and stopped, with bulk stops capped by a safety ceiling.

pub mod aggregate;
pub mod billing;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod models;
pub mod notify;
pub mod pricing;
pub mod provider;
pub mod reconcile;
pub mod service;
pub mod store;

pub use controller::{PowerController, ToggleOutcome};
pub use engine::Engine;
pub use error::{Error, Result};
pub use identity::compute_id;
pub use models::{DesiredState, Environment, EnvironmentCache, EnvironmentState, Instance, View};
pub use service::PowerToggleService;
pub use store::CacheStore;
