//! HTTP API.
//!
//! Read-only views of the latest published snapshot, plus an OpenAPI
//! document describing them.

mod server;
mod v0;

pub use server::{SharedState, bind, router, serve};
