//! Configuration management
//!
//! Built once in `main` and handed to each component constructor.
//! Nothing outside this module reads the process environment.

use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:5173";

// ============================================================================
// Table Configuration Constants
// ============================================================================

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default pool acquire timeout in seconds.
pub const DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Object Store Configuration Constants
// ============================================================================

pub const DEFAULT_S3_REGION: &str = "us-east-1";

pub const DEFAULT_S3_BUCKET: &str = "muse-media";

// ============================================================================
// Search Configuration Constants
// ============================================================================

pub const DEFAULT_SEARCH_URL: &str = "http://localhost:8090";

pub const DEFAULT_SEARCH_INDEX: &str = "tracks";

/// Default search request timeout in seconds.
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Wall-clock budget for one whole upload run.
pub const DEFAULT_PIPELINE_HOST_TIMEOUT_SECS: u64 = 300;

/// Wall-clock budget for one stage invocation. Must stay below the host timeout.
pub const DEFAULT_PIPELINE_STAGE_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_PIPELINE_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_PIPELINE_RETRY_BASE_MS: u64 = 500;

/// Concurrent upload runs.
pub const DEFAULT_PIPELINE_WORKERS: usize = 4;

pub const DEFAULT_PIPELINE_QUEUE_DEPTH: usize = 256;

// ============================================================================
// Upload Configuration Constants
// ============================================================================

pub const DEFAULT_UPLOAD_URL_TTL_SECS: u64 = 15 * 60;

/// 1 GiB
pub const DEFAULT_UPLOAD_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

pub const DEFAULT_DOWNLOAD_URL_TTL_SECS: u64 = 60 * 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub table: TableConfig,
    pub objects: ObjectStoreConfig,
    pub search: SearchConfig,
    pub pipeline: PipelineConfig,
    pub uploads: UploadConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long shutdown waits for in-flight uploads to finish
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableBackend {
    Memory,
    Postgres,
}

impl FromStr for TableBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(TableBackend::Memory),
            "postgres" | "postgresql" => Ok(TableBackend::Postgres),
            other => Err(format!("unknown table backend: {}", other)),
        }
    }
}

/// Storage layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub backend: TableBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectBackend {
    S3,
    Memory,
}

impl FromStr for ObjectBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(ObjectBackend::S3),
            "memory" => Ok(ObjectBackend::Memory),
            other => Err(format!("unknown object backend: {}", other)),
        }
    }
}

/// Object store gateway configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub backend: ObjectBackend,
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Falls back to the default AWS credential chain when unset
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl ObjectStoreConfig {
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            backend: ObjectBackend::S3,
            endpoint: Some(endpoint.into()),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}

/// Search collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub enabled: bool,
    pub url: String,
    pub index: String,
    pub timeout_secs: u64,
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Ingestion orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub host_timeout_secs: u64,
    pub stage_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub workers: usize,
    pub queue_depth: usize,
}

impl PipelineConfig {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            host_timeout_secs: DEFAULT_PIPELINE_HOST_TIMEOUT_SECS,
            stage_timeout_secs: DEFAULT_PIPELINE_STAGE_TIMEOUT_SECS,
            max_attempts: DEFAULT_PIPELINE_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_PIPELINE_RETRY_BASE_MS,
            workers: DEFAULT_PIPELINE_WORKERS,
            queue_depth: DEFAULT_PIPELINE_QUEUE_DEPTH,
        }
    }
}

/// Upload lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub url_ttl_secs: u64,
    pub max_file_size: u64,
    pub download_ttl_secs: u64,
}

impl UploadConfig {
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs)
    }

    pub fn download_ttl(&self) -> Duration {
        Duration::from_secs(self.download_ttl_secs)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url_ttl_secs: DEFAULT_UPLOAD_URL_TTL_SECS,
            max_file_size: DEFAULT_UPLOAD_MAX_FILE_SIZE,
            download_ttl_secs: DEFAULT_DOWNLOAD_URL_TTL_SECS,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env_string("MUSE_HOST", DEFAULT_SERVER_HOST),
                port: env_parse("MUSE_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "MUSE_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            table: TableConfig {
                backend: env_parse("TABLE_BACKEND", TableBackend::Memory),
                database_url: env_optional("DATABASE_URL"),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                acquire_timeout_secs: env_parse(
                    "DATABASE_ACQUIRE_TIMEOUT",
                    DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS,
                ),
            },
            objects: ObjectStoreConfig {
                backend: env_parse("S3_BACKEND", ObjectBackend::S3),
                endpoint: env_optional("S3_ENDPOINT"),
                region: env_string("S3_REGION", DEFAULT_S3_REGION),
                bucket: env_string("S3_BUCKET", DEFAULT_S3_BUCKET),
                access_key: env_optional("S3_ACCESS_KEY"),
                secret_key: env_optional("S3_SECRET_KEY"),
                path_style: env_parse("S3_PATH_STYLE", false),
            },
            search: SearchConfig {
                enabled: env_parse("SEARCH_ENABLED", false),
                url: env_string("SEARCH_URL", DEFAULT_SEARCH_URL),
                index: env_string("SEARCH_INDEX", DEFAULT_SEARCH_INDEX),
                timeout_secs: env_parse("SEARCH_TIMEOUT_SECS", DEFAULT_SEARCH_TIMEOUT_SECS),
            },
            pipeline: PipelineConfig {
                host_timeout_secs: env_parse(
                    "PIPELINE_HOST_TIMEOUT_SECS",
                    DEFAULT_PIPELINE_HOST_TIMEOUT_SECS,
                ),
                stage_timeout_secs: env_parse(
                    "PIPELINE_STAGE_TIMEOUT_SECS",
                    DEFAULT_PIPELINE_STAGE_TIMEOUT_SECS,
                ),
                max_attempts: env_parse("PIPELINE_MAX_ATTEMPTS", DEFAULT_PIPELINE_MAX_ATTEMPTS),
                retry_base_ms: env_parse("PIPELINE_RETRY_BASE_MS", DEFAULT_PIPELINE_RETRY_BASE_MS),
                workers: env_parse("PIPELINE_WORKERS", DEFAULT_PIPELINE_WORKERS),
                queue_depth: env_parse("PIPELINE_QUEUE_DEPTH", DEFAULT_PIPELINE_QUEUE_DEPTH),
            },
            uploads: UploadConfig {
                url_ttl_secs: env_parse("UPLOAD_URL_TTL_SECS", DEFAULT_UPLOAD_URL_TTL_SECS),
                max_file_size: env_parse("UPLOAD_MAX_FILE_SIZE", DEFAULT_UPLOAD_MAX_FILE_SIZE),
                download_ttl_secs: env_parse(
                    "DOWNLOAD_URL_TTL_SECS",
                    DEFAULT_DOWNLOAD_URL_TTL_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: env_string("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS", true),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.table.backend == TableBackend::Postgres && self.table.database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when TABLE_BACKEND=postgres");
        }

        if self.table.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.table.min_connections > self.table.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.table.min_connections,
                self.table.max_connections
            );
        }

        if self.objects.bucket.trim().is_empty() {
            anyhow::bail!("S3 bucket cannot be empty");
        }

        if self.objects.access_key.is_some() != self.objects.secret_key.is_some() {
            anyhow::bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set together");
        }

        if self.search.enabled && self.search.url.trim().is_empty() {
            anyhow::bail!("SEARCH_URL is required when search is enabled");
        }

        if self.pipeline.stage_timeout_secs == 0 || self.pipeline.host_timeout_secs == 0 {
            anyhow::bail!("Pipeline timeouts must be greater than 0");
        }

        if self.pipeline.stage_timeout_secs >= self.pipeline.host_timeout_secs {
            anyhow::bail!(
                "Pipeline stage timeout ({}s) must be shorter than host timeout ({}s)",
                self.pipeline.stage_timeout_secs,
                self.pipeline.host_timeout_secs
            );
        }

        if self.pipeline.max_attempts == 0 {
            anyhow::bail!("Pipeline max_attempts must be greater than 0");
        }

        if self.pipeline.workers == 0 || self.pipeline.queue_depth == 0 {
            anyhow::bail!("Pipeline workers and queue depth must be greater than 0");
        }

        if self.uploads.max_file_size == 0 || self.uploads.url_ttl_secs == 0 {
            anyhow::bail!("Upload max file size and URL TTL must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            table: TableConfig {
                backend: TableBackend::Memory,
                database_url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                acquire_timeout_secs: DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS,
            },
            objects: ObjectStoreConfig {
                backend: ObjectBackend::Memory,
                endpoint: None,
                region: DEFAULT_S3_REGION.to_string(),
                bucket: DEFAULT_S3_BUCKET.to_string(),
                access_key: None,
                secret_key: None,
                path_style: false,
            },
            search: SearchConfig {
                enabled: false,
                url: DEFAULT_SEARCH_URL.to_string(),
                index: DEFAULT_SEARCH_INDEX.to_string(),
                timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
            },
            pipeline: PipelineConfig::default(),
            uploads: UploadConfig::default(),
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_stage_timeout_must_be_below_host_timeout() {
        let mut config = Config::default();
        config.pipeline.stage_timeout_secs = config.pipeline.host_timeout_secs;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shorter than host timeout"));
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let mut config = Config::default();
        config.table.backend = TableBackend::Postgres;
        assert!(config.validate().is_err());
        config.table.database_url = Some("postgres://localhost/muse".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.pipeline.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let mut config = Config::default();
        config.objects.access_key = Some("key".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = ObjectStoreConfig::for_minio("http://localhost:9000", "bucket");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("minioadmin"));
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        std::env::set_var("MUSE_PORT", "9191");
        std::env::set_var("PIPELINE_WORKERS", "7");
        std::env::set_var("TABLE_BACKEND", "memory");
        std::env::set_var("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test");

        let config = Config::load().unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.pipeline.workers, 7);
        assert_eq!(config.table.backend, TableBackend::Memory);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );

        std::env::remove_var("MUSE_PORT");
        std::env::remove_var("PIPELINE_WORKERS");
        std::env::remove_var("TABLE_BACKEND");
        std::env::remove_var("CORS_ALLOWED_ORIGINS");
    }

    #[test]
    #[serial]
    fn test_load_rejects_inverted_timeouts() {
        std::env::set_var("PIPELINE_HOST_TIMEOUT_SECS", "10");
        std::env::set_var("PIPELINE_STAGE_TIMEOUT_SECS", "20");
        assert!(Config::load().is_err());
        std::env::remove_var("PIPELINE_HOST_TIMEOUT_SECS");
        std::env::remove_var("PIPELINE_STAGE_TIMEOUT_SECS");
    }
}
