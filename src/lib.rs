//! Card fraud decision engine core.
//!
//! Exposes the `fraud` and `api` modules for use by the binary and by
//! integration tests under `tests/`.

pub mod api;
pub mod fraud;
