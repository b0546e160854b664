//! Configuration module
//!
//! Worker configuration is read once at startup, validated, and passed by
//! reference into the dispatcher. Nothing here is global or mutable.

use std::env;
use std::time::Duration;

use crate::models::Conversion;
use crate::storage_types::StorageBackend;

// Common constants
const UPLOAD_WORKER_CONCURRENCY: usize = 1;
const BATCH_TIMEOUT_SECS: u64 = 120;
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const SQS_MAX_MESSAGES: i32 = 10;
const SQS_WAIT_TIME_SECS: i32 = 20;
const MAX_IMAGE_SIZE_MB: u64 = 10;
const MAX_VIDEO_SIZE_MB: u64 = 2048;
const WEBP_QUALITY: f32 = 80.0;
const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Postgres,
    Memory,
}

/// One object store (temporary landing store or permanent store).
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, R2, ...)
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// Retention of in-memory records. `None` keeps them for the process lifetime.
    pub ttl_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub sqs_queue_url: Option<String>,
    pub max_messages: i32,
    pub wait_time_secs: i32,
}

/// Knobs of the default regulation catalog.
#[derive(Clone, Debug)]
pub struct RegulationLimits {
    pub max_image_size_bytes: u64,
    pub max_video_size_bytes: u64,
    pub image_conversion: Option<Conversion>,
    pub image_conversion_required: bool,
}

impl Default for RegulationLimits {
    fn default() -> Self {
        Self {
            max_image_size_bytes: MAX_IMAGE_SIZE_MB * 1024 * 1024,
            max_video_size_bytes: MAX_VIDEO_SIZE_MB * 1024 * 1024,
            image_conversion: Some(Conversion::Webp),
            image_conversion_required: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConversionQuality {
    pub webp_quality: f32,
    pub jpeg_quality: u8,
}

impl Default for ConversionQuality {
    fn default() -> Self {
        Self {
            webp_quality: WEBP_QUALITY,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// Upload worker configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub environment: String,
    pub log_format: LogFormat,
    /// Maximum number of records in flight per batch (>= 1).
    pub concurrency: usize,
    /// Deadline shared by every record of one batch invocation.
    pub batch_timeout_secs: u64,
    /// Re-run validation and promotion for keys already recorded as succeeded.
    pub revalidate_succeeded: bool,
    /// Domain used to build user-facing reference URLs, e.g. `https://assets.example.com`.
    pub reference_domain: Option<String>,
    pub temporary: StorageConfig,
    pub permanent: StorageConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub limits: RegulationLimits,
    pub quality: ConversionQuality,
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|s| s.trim().to_lowercase())
        .and_then(|s| match s.as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl StorageConfig {
    fn from_lookup<F>(prefix: &str, lookup: &F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_empty(lookup(&format!("{}_{}", prefix, name)));

        let backend = match var("STORAGE_BACKEND") {
            Some(s) => s.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        Ok(StorageConfig {
            backend,
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION").or_else(|| non_empty(lookup("AWS_REGION"))),
            s3_endpoint: var("S3_ENDPOINT"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
        })
    }

    fn validate(&self, prefix: &str) -> Result<(), anyhow::Error> {
        match self.backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "{}_S3_BUCKET must be set when using S3 storage backend",
                        prefix
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "{}_S3_REGION or AWS_REGION must be set when using S3 storage backend",
                        prefix
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "{}_LOCAL_STORAGE_PATH must be set when using local storage backend",
                        prefix
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "{}_LOCAL_STORAGE_BASE_URL must be set when using local storage backend",
                        prefix
                    ));
                }
            }
        }
        Ok(())
    }
}

impl WorkerConfig {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_empty(lookup(name));

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let log_format = match var("LOG_FORMAT").map(|s| s.to_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let cache_backend = match var("CACHE_BACKEND").map(|s| s.to_lowercase()).as_deref() {
            None | Some("postgres") => CacheBackend::Postgres,
            Some("memory") => CacheBackend::Memory,
            Some(other) => return Err(anyhow::anyhow!("Invalid cache backend: {}", other)),
        };

        let image_conversion = match var("IMAGE_CONVERSION") {
            None => Some(Conversion::Webp),
            Some(name) if name.eq_ignore_ascii_case("none") => None,
            Some(name) => Some(Conversion::parse(&name)),
        };

        let config = WorkerConfig {
            environment,
            log_format,
            concurrency: var("UPLOAD_WORKER_CONCURRENCY")
                .map(|s| {
                    s.parse::<usize>().map_err(|_| {
                        anyhow::anyhow!("UPLOAD_WORKER_CONCURRENCY must be a positive integer")
                    })
                })
                .transpose()?
                .unwrap_or(UPLOAD_WORKER_CONCURRENCY),
            batch_timeout_secs: var("BATCH_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(BATCH_TIMEOUT_SECS),
            revalidate_succeeded: parse_bool(var("REVALIDATE_SUCCEEDED"), false),
            reference_domain: var("ASSET_DOMAIN").map(|s| s.trim_end_matches('/').to_string()),
            temporary: StorageConfig::from_lookup("TEMP", &lookup)?,
            permanent: StorageConfig::from_lookup("PERM", &lookup)?,
            cache: CacheConfig {
                backend: cache_backend,
                database_url: var("DATABASE_URL"),
                db_max_connections: var("DB_MAX_CONNECTIONS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(MAX_CONNECTIONS),
                db_timeout_seconds: var("DB_TIMEOUT_SECONDS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(CONNECTION_TIMEOUT_SECS),
                ttl_secs: var("CACHE_TTL_SECS").and_then(|s| s.parse().ok()),
            },
            queue: QueueConfig {
                sqs_queue_url: var("SQS_QUEUE_URL"),
                max_messages: var("SQS_MAX_MESSAGES")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(SQS_MAX_MESSAGES),
                wait_time_secs: var("SQS_WAIT_TIME_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(SQS_WAIT_TIME_SECS),
            },
            limits: RegulationLimits {
                max_image_size_bytes: size_limit_bytes(
                    "MAX_IMAGE_SIZE_MB",
                    var("MAX_IMAGE_SIZE_MB"),
                    MAX_IMAGE_SIZE_MB,
                )?,
                max_video_size_bytes: size_limit_bytes(
                    "MAX_VIDEO_SIZE_MB",
                    var("MAX_VIDEO_SIZE_MB"),
                    MAX_VIDEO_SIZE_MB,
                )?,
                image_conversion,
                image_conversion_required: parse_bool(var("IMAGE_CONVERSION_REQUIRED"), false),
            },
            quality: ConversionQuality {
                webp_quality: var("WEBP_QUALITY")
                    .map(|s| {
                        s.parse::<f32>()
                            .map_err(|_| anyhow::anyhow!("WEBP_QUALITY must be between 0 and 100"))
                    })
                    .transpose()?
                    .unwrap_or(WEBP_QUALITY),
                jpeg_quality: var("JPEG_QUALITY")
                    .map(|s| {
                        s.parse::<u8>()
                            .map_err(|_| anyhow::anyhow!("JPEG_QUALITY must be between 1 and 100"))
                    })
                    .transpose()?
                    .unwrap_or(JPEG_QUALITY),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_WORKER_CONCURRENCY must be at least 1"
            ));
        }

        if self.batch_timeout_secs == 0 {
            return Err(anyhow::anyhow!("BATCH_TIMEOUT_SECS must be at least 1"));
        }

        if let Some(domain) = &self.reference_domain {
            if !domain.starts_with("https://") && !domain.starts_with("http://") {
                return Err(anyhow::anyhow!(
                    "ASSET_DOMAIN must include the scheme, e.g. https://assets.example.com"
                ));
            }
        }

        self.temporary.validate("TEMP")?;
        self.permanent.validate("PERM")?;

        if self.cache.backend == CacheBackend::Postgres {
            match &self.cache.database_url {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                }
                Some(_) => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when CACHE_BACKEND=postgres"
                    ))
                }
            }
        }

        if !(1..=10).contains(&self.queue.max_messages) {
            return Err(anyhow::anyhow!("SQS_MAX_MESSAGES must be between 1 and 10"));
        }

        if !(0..=20).contains(&self.queue.wait_time_secs) {
            return Err(anyhow::anyhow!("SQS_WAIT_TIME_SECS must be between 0 and 20"));
        }

        if !(0.0..=100.0).contains(&self.quality.webp_quality) {
            return Err(anyhow::anyhow!("WEBP_QUALITY must be between 0 and 100"));
        }

        if !(1..=100).contains(&self.quality.jpeg_quality) {
            return Err(anyhow::anyhow!("JPEG_QUALITY must be between 1 and 100"));
        }

        Ok(())
    }

    /// Check if the worker is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

/// Parse a size limit given in megabytes into bytes.
fn size_limit_bytes(
    name: &str,
    value: Option<String>,
    default_mb: u64,
) -> Result<u64, anyhow::Error> {
    let mb = match value {
        Some(s) => s
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("{} must be a whole number of megabytes", name))?,
        None => default_mb,
    };
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow::anyhow!("{} is too large: {} MB overflows a byte count", name, mb))
}
