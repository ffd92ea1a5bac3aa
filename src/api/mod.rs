//! HTTP surface: the evaluation endpoint plus readiness probes.

pub mod auth;
pub mod health;

use crate::fraud::compile::CustomFieldSet;
use crate::fraud::field_registry::FieldRegistry;
use crate::fraud::outbox::OutboxQueue;
use crate::fraud::registry::RulesetRegistry;
use crate::fraud::velocity::VelocityService;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RulesetRegistry>,
    pub field_registry: Arc<FieldRegistry>,
    pub custom_fields: Arc<CustomFieldSet>,
    pub velocity: Arc<Mutex<VelocityService>>,
    pub outbox: OutboxQueue,
    pub ready: Arc<AtomicBool>,
}
