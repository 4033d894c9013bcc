//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `IMGDROP_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `IMGDROP_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `IMGDROP_UPLOAD__MAX_FILE_SIZE=1048576` sets the `upload.max_file_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use imgdrop::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Uploads land in {}", config.upload.directory.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! IMGDROP_PORT=8080
//! IMGDROP_UPLOAD__DIRECTORY=/srv/avatars
//! IMGDROP_UPLOAD__PUBLIC_BASE_URL=https://img.example.com/
//! IMGDROP_LIMITS__FILES__MAX_CONCURRENT_UPLOADS=8
//! IMGDROP_UPLOAD__DIR_MODE=0o750   # modes need the 0o prefix; a bare 750 is decimal
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "IMGDROP_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Upload endpoint, storage and URL settings
    pub upload: UploadConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// Everything the upload handler needs to know about where files go and what it accepts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Route the upload endpoint is mounted on
    pub route: String,
    /// Directory stored files are written to, created on first upload
    pub directory: PathBuf,
    /// URL path segment(s) stored files are addressed under
    pub public_path: String,
    /// Base URL returned links are built on. When unset the request `Host` header is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<Url>,
    /// Scheme used together with the `Host` header when `public_base_url` is unset
    pub host_scheme: String,
    /// Maximum accepted file size in bytes
    pub max_file_size: u64,
    /// Declared MIME types that are accepted
    pub allowed_types: Vec<String>,
    /// Check magic bytes against the declared type (JPEG, PNG and GIF only)
    pub sniff_content: bool,
    /// Serve stored files under `public_path`
    pub serve_files: bool,
    /// Answer errors with 4xx/5xx statuses instead of 200
    pub error_status_codes: bool,
    /// Permission bits for a freshly created upload directory (unix only).
    /// Accepts an integer or an octal string such as `"0o750"`; bare numbers are decimal.
    #[serde(deserialize_with = "parse_mode")]
    pub dir_mode: u32,
    /// Permission bits for stored files (unix only), same format as `dir_mode`
    #[serde(deserialize_with = "parse_mode")]
    pub file_mode: u32,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Upload concurrency limits
    pub files: FileLimitsConfig,
}

/// Upload concurrency configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLimitsConfig {
    /// Maximum number of concurrent uploads allowed system-wide.
    /// Default: 0 (unlimited)
    pub max_concurrent_uploads: usize,
    /// Maximum number of uploads that can wait in queue for a slot.
    /// Set to 0 for unlimited waiting queue.
    /// Default: 20
    pub max_waiting_uploads: usize,
    /// Maximum time in seconds to wait for an upload slot.
    /// Set to 0 to reject immediately when no slot is available.
    /// Default: 60
    pub max_upload_wait_secs: u64,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Permission bits from an integer or an octal string (`"0o640"`, `"0640"`).
///
/// Environment overrides always arrive as strings; figment turns a bare `750` into the decimal
/// number, which validation then rejects as out of range.
fn parse_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mode {
        Bits(u32),
        Octal(String),
    }

    match Mode::deserialize(deserializer)? {
        Mode::Bits(bits) => Ok(bits),
        Mode::Octal(raw) => {
            let trimmed = raw.trim();
            let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
            u32::from_str_radix(digits, 8)
                .map_err(|_| serde::de::Error::custom(format!("'{raw}' is not an octal permission mode like \"0o750\"")))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            enable_otel_export: false,
            upload: UploadConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            route: "/upload".to_string(),
            directory: PathBuf::from("users_profiles_images"),
            public_path: "users_profiles_images".to_string(),
            public_base_url: None,
            host_scheme: "http".to_string(),
            max_file_size: 5 * 1024 * 1024, // 5MB
            allowed_types: ["image/jpeg", "image/png", "image/gif", "image/jpg"]
                .into_iter()
                .map(String::from)
                .collect(),
            sniff_content: false,
            serve_files: true,
            error_status_codes: false,
            dir_mode: 0o750,
            file_mode: 0o640,
        }
    }
}

impl Default for FileLimitsConfig {
    fn default() -> Self {
        Self {
            // 0 = unlimited
            max_concurrent_uploads: 0,
            max_waiting_uploads: 20,
            max_upload_wait_secs: 60,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let upload = &self.upload;

        if !upload.route.starts_with('/') || upload.route.len() < 2 {
            return Err(Error::Internal {
                operation: format!("Config validation: upload.route '{}' must start with '/' and name a path", upload.route),
            });
        }

        if upload.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: upload.max_file_size cannot be 0".to_string(),
            });
        }

        if upload.allowed_types.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: upload.allowed_types cannot be empty. Add at least one MIME type.".to_string(),
            });
        }

        let segments: Vec<&str> = upload.public_path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: upload.public_path cannot be empty".to_string(),
            });
        }
        if segments
            .iter()
            .any(|s| *s == "." || *s == ".." || s.contains(['{', '}', '\\', '?', '#']))
        {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: upload.public_path '{}' must be plain path segments",
                    upload.public_path
                ),
            });
        }

        let files_prefix = format!("/{}", segments.join("/"));
        if upload.route == files_prefix || upload.route.starts_with(&format!("{files_prefix}/")) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: upload.route '{}' collides with the public file path '{}'",
                    upload.route, files_prefix
                ),
            });
        }

        if upload.host_scheme != "http" && upload.host_scheme != "https" {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: upload.host_scheme must be 'http' or 'https', got '{}'",
                    upload.host_scheme
                ),
            });
        }

        if let Some(base) = &upload.public_base_url
            && base.cannot_be_a_base()
        {
            return Err(Error::Internal {
                operation: format!("Config validation: upload.public_base_url '{base}' cannot be used as a base URL"),
            });
        }

        for (name, mode) in [("dir_mode", upload.dir_mode), ("file_mode", upload.file_mode)] {
            if mode > 0o777 {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: upload.{name} {mode} is not a permission mode. Write it in octal, e.g. \"0o750\""
                    ),
                });
            }
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        let has_wildcard = self
            .cors
            .allowed_origins
            .iter()
            .any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("IMGDROP_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_default_upload_settings() {
        let config = Config::default();
        assert_eq!(config.upload.max_file_size, 5_242_880);
        assert_eq!(config.upload.directory, PathBuf::from("users_profiles_images"));
        assert_eq!(
            config.upload.allowed_types,
            vec!["image/jpeg", "image/png", "image/gif", "image/jpg"]
        );
        assert!(!config.upload.error_status_codes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("does-not-exist.yaml"))?;
            assert_eq!(config.port, 3001);
            assert_eq!(config.upload.route, "/upload");
            Ok(())
        });
    }

    #[test]
    fn test_yaml_upload_section() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
upload:
  directory: /srv/avatars
  public_path: static/avatars
  public_base_url: https://img.example.com/
  max_file_size: 1048576
  allowed_types:
    - image/png
  sniff_content: true
limits:
  files:
    max_concurrent_uploads: 4
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.upload.directory, PathBuf::from("/srv/avatars"));
            assert_eq!(config.upload.public_path, "static/avatars");
            assert_eq!(
                config.upload.public_base_url.as_ref().map(Url::as_str),
                Some("https://img.example.com/")
            );
            assert_eq!(config.upload.max_file_size, 1_048_576);
            assert_eq!(config.upload.allowed_types, vec!["image/png"]);
            assert!(config.upload.sniff_content);
            // untouched defaults survive
            assert_eq!(config.upload.route, "/upload");
            assert_eq!(config.limits.files.max_concurrent_uploads, 4);
            assert_eq!(config.limits.files.max_waiting_uploads, 20);

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
upload:
  directory: from-yaml
"#,
            )?;

            jail.set_env("IMGDROP_HOST", "127.0.0.1");
            jail.set_env("IMGDROP_UPLOAD__DIRECTORY", "from-env");
            jail.set_env("IMGDROP_UPLOAD__MAX_FILE_SIZE", "2048");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9000);
            assert_eq!(config.upload.directory, PathBuf::from("from-env"));
            assert_eq!(config.upload.max_file_size, 2048);

            Ok(())
        });
    }

    #[test]
    fn test_modes_from_env_and_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
upload:
  file_mode: "0o600"
"#,
            )?;
            jail.set_env("IMGDROP_UPLOAD__DIR_MODE", "0o700");

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.upload.dir_mode, 0o700);
            assert_eq!(config.upload.file_mode, 0o600);

            Ok(())
        });
    }

    #[test]
    fn test_mode_as_yaml_integer() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
upload:
  dir_mode: 488
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.upload.dir_mode, 0o750);
            Ok(())
        });
    }

    #[test]
    fn test_decimal_looking_mode_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("IMGDROP_UPLOAD__DIR_MODE", "750");
            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("dir_mode"));

            jail.set_env("IMGDROP_UPLOAD__DIR_MODE", "0o7x0");
            assert!(Config::load(&args("missing.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
upload:
  max_size: 10
"#,
            )?;

            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_empty_allowed_types() {
        let mut config = Config::default();
        config.upload.allowed_types.clear();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("allowed_types"));
    }

    #[test]
    fn test_validation_rejects_zero_size_limit() {
        let mut config = Config::default();
        config.upload.max_file_size = 0;

        assert!(config.validate().unwrap_err().to_string().contains("max_file_size"));
    }

    #[test]
    fn test_validation_rejects_traversal_in_public_path() {
        let mut config = Config::default();
        config.upload.public_path = "images/../secrets".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("public_path"));

        config.upload.public_path = "/".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("public_path"));
    }

    #[test]
    fn test_validation_rejects_route_collision() {
        let mut config = Config::default();
        config.upload.route = "/users_profiles_images".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("collides"));

        config.upload.route = "/users_profiles_images/new".to_string();
        assert!(config.validate().is_err());

        config.upload.route = "/users_profiles_images_upload".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_route_and_scheme() {
        let mut config = Config::default();
        config.upload.route = "upload".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("route"));

        let mut config = Config::default();
        config.upload.host_scheme = "ftp".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("host_scheme"));
    }

    #[test]
    fn test_validation_rejects_non_base_public_url() {
        let mut config = Config::default();
        config.upload.public_base_url = Some(Url::parse("mailto:someone@example.com").unwrap());
        assert!(config.validate().unwrap_err().to_string().contains("public_base_url"));
    }

    #[test]
    fn test_cors_wildcard_with_credentials() {
        let mut config = Config::default();
        config.cors.allow_credentials = true;

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("wildcard"));

        config.cors.allowed_origins = vec![CorsOrigin::Url(Url::parse("https://app.example.com").unwrap())];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cors_origins_from_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
cors:
  allowed_origins:
    - "*"
    - https://app.example.com
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.cors.allowed_origins.len(), 2);
            assert_eq!(config.cors.allowed_origins[0], CorsOrigin::Wildcard);
            assert!(matches!(&config.cors.allowed_origins[1], CorsOrigin::Url(url) if url.host_str() == Some("app.example.com")));

            Ok(())
        });
    }
}
