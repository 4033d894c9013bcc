//! # imgdrop: profile image upload service
//!
//! `imgdrop` accepts a single image per request as a multipart form upload, checks it against a
//! small policy (declared MIME type allow list and a size limit), stores it under a fresh name in
//! a local directory and answers with the public URL the file can be fetched from.
//!
//! ## Request Flow
//!
//! A `POST` to the upload route (`/upload` by default) is handled by
//! [`api::handlers::uploads::upload_image`]. The `file` part of the form is located, its declared
//! content type checked, and the body streamed into a temp file in the upload directory while the
//! running size is checked against the limit. Accepted files are renamed to `<id>.<ext>` and the
//! URL is returned as `{"url": ...}`. Every failure is answered with `{"error": ...}` carrying one
//! of four fixed messages (see [`errors`]).
//!
//! Stored files are served back under `/<public_path>/` unless `upload.serve_files` is off, in
//! which case a separate web server is expected to serve the directory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use imgdrop::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = imgdrop::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     imgdrop::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod config;
pub mod errors;
pub mod limits;
mod openapi;
pub mod public_url;
pub mod storage;
pub mod telemetry;
pub mod upload;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::handlers::uploads::upload_image, config::CorsOrigin, limits::Limiters, openapi::ApiDoc, storage::ImageStore,
    upload::UploadPolicy,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request},
    http::{self, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: ImageStore,
    pub policy: UploadPolicy,
    #[builder(default)]
    pub limiters: Limiters,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = &config.cors;

    // tower-http refuses a literal "*" inside an origin list
    let allow_origin = if cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_credentials(cors.allow_credentials);

    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(layer)
}

/// URL prefix stored files are served under, e.g. `/users_profiles_images`.
fn files_prefix(public_path: &str) -> String {
    let segments: Vec<&str> = public_path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Answer 404 for anything under the public prefix that is not a plain stored file name.
async fn only_stored_files(request: Request, next: Next) -> Response {
    if !storage::is_served_name(request.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Build the application router: the upload route, stored file serving, health check and docs.
///
/// The upload route gets its own body limit sized from `upload.max_file_size`, so an oversized
/// body is cut off by the server even if a client lies about its length.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let upload = state.config.upload.clone();
    let cors = create_cors_layer(&state.config)?;

    let body_limit = usize::try_from(upload.max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);

    let mut router = Router::new()
        .route(&upload.route, post(upload_image).layer(DefaultBodyLimit::max(body_limit)))
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if upload.serve_files {
        let prefix = files_prefix(&upload.public_path);
        debug!("Serving {} under {}", upload.directory.display(), prefix);
        // staged uploads share the directory and must not be reachable
        let files = Router::new()
            .fallback_service(ServeDir::new(&upload.directory))
            .layer(middleware::from_fn(only_stored_files));
        router = router.nest_service(&prefix, files);
    }

    let router = router.with_state(state).layer(cors).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The configured service, ready to be served.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting imgdrop with configuration: {:#?}", config);

        let state = AppState::builder()
            .store(ImageStore::new(&config.upload))
            .policy(UploadPolicy::new(&config.upload))
            .limiters(Limiters::new(&config.limits))
            .config(config.clone())
            .build();

        let router = build_router(state)?;

        Ok(Self { router, config })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "imgdrop listening on http://{}, storing uploads in {}",
            bind_addr,
            self.config.upload.directory.display()
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
