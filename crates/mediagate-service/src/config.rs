use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// The region used for S3 stores that do not configure one.
pub const DEFAULT_REGION: &str = "us-east-5";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the gateway.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "mediagate".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Connection settings of an S3-compatible bucket.
///
/// Every field may be left out of the config file and supplied through the environment instead,
/// see [`Config::apply_env`].
#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct S3StoreConfig {
    /// The endpoint URL of the store, e.g. `https://s3.us-east-005.backblazeb2.com`.
    pub endpoint: Option<String>,
    /// The region to sign requests for. Falls back to [`DEFAULT_REGION`].
    pub region: Option<String>,
    /// The access key id.
    pub access_key: Option<String>,
    /// The secret belonging to `access_key`.
    pub secret_key: Option<String>,
    /// The bucket holding the media files.
    pub bucket: Option<String>,
}

// Hand-written so that secrets never end up in logs.
impl fmt::Debug for S3StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Fully resolved settings of an S3 store.
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Required settings that were not provided, named by their environment variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required configuration: {}", .0.join(", "))]
pub struct ConfigError(pub Vec<&'static str>);

impl S3StoreConfig {
    /// Checks that all required settings are present and fills in defaults.
    pub fn resolve(&self) -> Result<S3Settings, ConfigError> {
        fn required<'a>(
            value: &'a Option<String>,
            name: &'static str,
            missing: &mut Vec<&'static str>,
        ) -> &'a str {
            match value.as_deref() {
                Some(value) if !value.is_empty() => value,
                _ => {
                    missing.push(name);
                    ""
                }
            }
        }

        let mut missing = vec![];
        let endpoint = required(&self.endpoint, "ENDPOINT", &mut missing);
        let access_key = required(&self.access_key, "KEY_ID", &mut missing);
        let secret_key = required(&self.secret_key, "APPLICATION_KEY", &mut missing);
        let bucket = required(&self.bucket, "BUCKET_NAME", &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError(missing));
        }

        let region = match self.region.as_deref() {
            Some(region) if !region.is_empty() => region,
            _ => DEFAULT_REGION,
        };

        Ok(S3Settings {
            endpoint: endpoint.to_owned(),
            region: region.to_owned(),
            access_key: access_key.to_owned(),
            secret_key: secret_key.to_owned(),
            bucket: bucket.to_owned(),
        })
    }
}

/// A local directory served as if it was a bucket.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct FilesystemStoreConfig {
    /// The root directory. Object keys are paths relative to it.
    pub path: PathBuf,
}

/// The object store the media files are drawn from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    S3(S3StoreConfig),
    Filesystem(FilesystemStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::S3(S3StoreConfig::default())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Directory holding downloaded objects and in-progress downloads.
    pub cache_dir: PathBuf,

    /// Directory with static assets served for all paths not handled otherwise.
    pub static_dir: Option<PathBuf>,

    /// The object store to serve media from.
    pub store: StoreConfig,

    /// Upper bound for a single remote fetch, including the transfer of the body.
    ///
    /// No bound is applied when unset.
    #[serde(with = "humantime_serde")]
    pub download_timeout: Option<Duration>,

    /// How long a failed download is remembered before the key is fetched again.
    ///
    /// When unset, failures are remembered for the lifetime of the process.
    #[serde(with = "humantime_serde")]
    pub retry_failures_after: Option<Duration>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:8090".to_owned()
    } else {
        "127.0.0.1:8090".to_owned()
    }
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> PathBuf {
    if is_docker() {
        // Docker image defines `/data` as a persistent volume
        PathBuf::from("/data")
    } else {
        PathBuf::from("cache")
    }
}

/// Default value for the "static_dir" configuration.
fn default_static_dir() -> Option<PathBuf> {
    let dir = PathBuf::from("static");
    dir.is_dir().then_some(dir)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            cache_dir: default_cache_dir(),
            static_dir: default_static_dir(),
            store: StoreConfig::default(),
            download_timeout: None,
            retry_failures_after: None,
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    /// Loads the configuration file (if any) and applies overrides from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::get(path)?;
        config.apply_env(|name| env::var(name).ok());
        Ok(config)
    }

    /// Loads the configuration file, or returns the default configuration without a file.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Overrides settings with values from the environment.
    ///
    /// Empty values are treated as unset. The store settings are only taken from the environment
    /// when the configured store is an S3 bucket.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(bind) = var("BIND") {
            self.bind = bind;
        }
        if let Some(cache_dir) = var("CACHE_DIR") {
            self.cache_dir = cache_dir.into();
        }
        if let Some(static_dir) = var("STATIC_DIR") {
            self.static_dir = Some(static_dir.into());
        }

        if let StoreConfig::S3(ref mut s3) = self.store {
            let overrides = [
                ("ENDPOINT", &mut s3.endpoint),
                ("REGION", &mut s3.region),
                ("KEY_ID", &mut s3.access_key),
                ("APPLICATION_KEY", &mut s3.secret_key),
                ("BUCKET_NAME", &mut s3.bucket),
            ];
            for (name, field) in overrides {
                if let Some(value) = var(name) {
                    *field = Some(value);
                }
            }
        }
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
