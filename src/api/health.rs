//! `GET /healthz` / `GET /readyz` (spec.md §1 supplement — see
//! SPEC_FULL.md §1). `/healthz` is always 200 once the process is up;
//! `/readyz` is 200 only once `StartupLoader::run` has passed all four
//! gates.

use crate::api::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use std::sync::atomic::Ordering;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
