//! Test utilities shared by the handler and router tests.

use crate::config::Config;
use crate::limits::Limiters;
use crate::storage::ImageStore;
use crate::upload::UploadPolicy;
use crate::AppState;
use axum_test::TestServer;
use axum_test::multipart::Part;
use std::path::Path;
use url::Url;

/// Default configuration pointed at `upload_dir`, with a fixed public base URL so returned links
/// do not depend on how the test transport fills in the Host header.
pub fn create_test_config(upload_dir: &Path) -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.upload.directory = upload_dir.to_path_buf();
    config.upload.public_base_url = Some(Url::parse("http://images.test/").unwrap());
    config
}

pub fn create_test_app(config: Config) -> TestServer {
    crate::Application::new(config)
        .expect("Failed to create application")
        .into_test_server()
}

/// State built the way `Application::new` builds it, for tests that need to reach into it.
pub fn create_test_state(config: Config) -> AppState {
    AppState::builder()
        .store(ImageStore::new(&config.upload))
        .policy(UploadPolicy::new(&config.upload))
        .limiters(Limiters::new(&config.limits))
        .config(config)
        .build()
}

pub fn create_test_server(state: AppState) -> TestServer {
    let router = crate::build_router(state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// A file part as a browser would send it.
pub fn image_part(bytes: &[u8], file_name: &str, mime: &str) -> Part {
    Part::bytes(bytes.to_vec()).file_name(file_name).mime_type(mime)
}

/// Sorted names of everything in `dir`; empty if it does not exist.
pub fn stored_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
