//! C12 — Load Shedder.
//!
//! A `Semaphore`-backed concurrency gate in front of the evaluation path,
//! grounded directly on `middleware::rate_limit`'s
//! `*_middleware(State(...), request, next) -> Response` shape — same
//! crate, same layering convention — but gating on concurrent permits
//! instead of a sliding window.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Clone, Copy, Debug)]
pub struct LoadShedConfig {
    pub enabled: bool,
    pub max_concurrent: usize,
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        LoadShedConfig {
            enabled: true,
            max_concurrent: 512,
        }
    }
}

#[derive(Clone)]
pub struct LoadShedder {
    semaphore: Arc<Semaphore>,
    enabled: bool,
}

impl LoadShedder {
    pub fn new(config: LoadShedConfig) -> Self {
        LoadShedder {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            enabled: config.enabled,
        }
    }
}

/// Returns `true` (proceed) with a held permit dropped on response write,
/// or `false` (shed) when no permit is available. Permits release
/// automatically when the guard drops at the end of the request.
pub async fn load_shed_middleware(
    State(shedder): State<LoadShedder>,
    request: Request,
    next: Next,
) -> Response {
    if !shedder.enabled {
        return next.run(request).await;
    }

    match shedder.semaphore.clone().try_acquire_owned() {
        Ok(_permit) => next.run(request).await,
        Err(_) => {
            warn!("load shed: no concurrency permits available");
            shed_response()
        }
    }
}

/// `decision = APPROVE` (fail-open), `engine_mode = DEGRADED`,
/// `engine_error_code = LOAD_SHEDDING`. Never touches velocity or the
/// outbox (spec §4.7).
fn shed_response() -> Response {
    use axum::Json;
    use serde_json::json;

    let body = Json(json!({
        "transaction_id": null,
        "decision": "APPROVE",
        "engine_mode": "DEGRADED",
        "engine_error_code": "LOAD_SHEDDING",
    }));
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert("X-Load-Shed", HeaderValue::from_static("true"));
    response
}

use axum::response::IntoResponse;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_shedder_never_denies() {
        let shedder = LoadShedder::new(LoadShedConfig {
            enabled: false,
            max_concurrent: 0,
        });
        assert!(shedder.semaphore.try_acquire_owned().is_err());
        assert!(!shedder.enabled);
    }

    #[tokio::test]
    async fn permits_exhaust_and_release() {
        let shedder = LoadShedder::new(LoadShedConfig {
            enabled: true,
            max_concurrent: 1,
        });
        let permit = shedder.semaphore.clone().try_acquire_owned().unwrap();
        assert!(shedder.semaphore.clone().try_acquire_owned().is_err());
        drop(permit);
        assert!(shedder.semaphore.clone().try_acquire_owned().is_ok());
    }
}
