//! HTTP surface of the service.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response bodies
//!
//! The upload endpoint (`POST /upload` by default) answers with either `{"url": ...}` or
//! `{"error": ...}`. Stored files are served back under the configured public path.

pub mod handlers;
pub mod models;
