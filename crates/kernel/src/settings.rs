use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "LIBRIS_ENV";
const CONFIG_DIR_ENV: &str = "LIBRIS_CONFIG_DIR";
const ENV_PREFIX: &str = "LIBRIS";

/// Signing secret used when none is configured. Refused in production.
pub const DEV_JWT_SECRET: &str = "libris-development-secret-change-me";

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub images: ImageSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, environment overlay,
    /// and `LIBRIS_*` variables (`__` separates nested keys, e.g.
    /// `LIBRIS_SERVER__PORT`).
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir()
                .with_context(|| "unable to resolve current directory")?
                .join("config"),
        };

        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{environment}.toml"));

        let builder = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg = builder
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;

        settings.environment = match environment.as_str() {
            "local" => Environment::Local,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                return Err(anyhow!(
                    "unsupported environment '{}'; expected local/staging/production",
                    other
                ));
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that must never reach a running server.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(anyhow!("auth.jwt_secret must not be empty"));
        }
        if self.environment == Environment::Production && self.auth.jwt_secret == DEV_JWT_SECRET {
            return Err(anyhow!(
                "auth.jwt_secret must be set explicitly in production (LIBRIS_AUTH__JWT_SECRET)"
            ));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(anyhow!("auth.token_ttl_hours must be positive"));
        }
        if self.catalog.top_rated_limit == 0 {
            return Err(anyhow!("catalog.top_rated_limit must be at least 1"));
        }
        Ok(())
    }

    /// Copy of the settings safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.auth.jwt_secret = "***".to_string();
        copy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Externally visible origin used to build image URLs.
    #[serde(default = "ServerSettings::default_public_base_url")]
    pub public_base_url: String,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        4000
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }

    fn default_public_base_url() -> String {
        "http://localhost:4000".to_string()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            public_base_url: Self::default_public_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseSettings {
    /// Directory holding collection snapshots. Memory-only when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    #[serde(default = "TelemetrySettings::default_log_filter")]
    pub log_filter: String,
}

impl TelemetrySettings {
    fn default_log_filter() -> String {
        "info,tower_http=info".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: Self::default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "AuthSettings::default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "AuthSettings::default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl AuthSettings {
    fn default_jwt_secret() -> String {
        DEV_JWT_SECRET.to_string()
    }

    fn default_token_ttl_hours() -> i64 {
        24
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: Self::default_jwt_secret(),
            token_ttl_hours: Self::default_token_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Directory uploaded covers are written to and served from.
    #[serde(default = "ImageSettings::default_dir")]
    pub dir: PathBuf,
    #[serde(default = "ImageSettings::default_max_bytes")]
    pub max_bytes: usize,
    /// Covers are resized to fill this box; `None` keeps the upload as is.
    #[serde(default = "ImageSettings::default_resize")]
    pub resize: Option<ResizeSettings>,
}

impl ImageSettings {
    fn default_dir() -> PathBuf {
        PathBuf::from("images")
    }

    fn default_max_bytes() -> usize {
        5 * 1024 * 1024
    }

    fn default_resize() -> Option<ResizeSettings> {
        Some(ResizeSettings {
            width: 206,
            height: 260,
        })
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            max_bytes: Self::default_max_bytes(),
            resize: Self::default_resize(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResizeSettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "CatalogSettings::default_top_rated_limit")]
    pub top_rated_limit: usize,
}

impl CatalogSettings {
    fn default_top_rated_limit() -> usize {
        3
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            top_rated_limit: Self::default_top_rated_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_environment_is_local() {
        let settings = Settings::default();
        assert_eq!(settings.environment, Environment::Local);
    }

    #[test]
    fn defaults_match_the_catalog_conventions() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.catalog.top_rated_limit, 3);
        assert_eq!(settings.auth.token_ttl_hours, 24);
        assert_eq!(
            settings.images.resize,
            Some(ResizeSettings {
                width: 206,
                height: 260
            })
        );
        assert!(settings.database.data_dir.is_none());
    }

    #[test]
    fn development_secret_is_refused_in_production() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.environment = Environment::Production;
        assert!(settings.validate().is_err());

        settings.auth.jwt_secret = "a-real-production-secret".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_top_rated_limit_is_invalid() {
        let mut settings = Settings::default();
        settings.catalog.top_rated_limit = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn redacted_hides_the_secret() {
        let settings = Settings::default();
        let redacted = settings.redacted();
        assert_eq!(redacted.auth.jwt_secret, "***");
        assert_eq!(redacted.server.port, settings.server.port);
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "server": { "port": 8081 },
            "images": { "resize": null }
        }))
        .unwrap();

        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.images.resize.is_none());
        assert_eq!(settings.images.max_bytes, 5 * 1024 * 1024);
    }
}
