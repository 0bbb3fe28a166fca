use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// The name of the configuration file within the configuration folder.
const CONFIG_FILE_NAME: &str = "config.yml";

/// The default Datadog series endpoint.
const DEFAULT_OUTLET_URL: &str = "https://app.datadoghq.com/api/v1/series";

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field, either from the file or an override.
    Field(&'static str),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: None,
        }
    }

    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: Some(Box::new(error)),
        }
    }

    #[inline]
    fn for_field<E>(error: E, field: &'static str) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::wrap(error, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::Field(name);
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, "{} (field {name})", self.kind),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.as_deref().map(|e| e as _)
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the HTTP intake should bind to (network interface).
    pub host: Option<String>,
    /// The port to bind for the HTTP intake.
    pub port: Option<String>,
    /// The URL of the Datadog series endpoint.
    pub outlet_url: Option<String>,
    /// Hostname and port of the statsd server.
    pub statsd: Option<String>,
}

/// Controls the HTTP intake.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Http {
    /// The host to bind to.
    host: IpAddr,
    /// The port to bind to.
    port: u16,
}

impl Default for Http {
    fn default() -> Self {
        Http {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3030,
        }
    }
}

/// Controls the ingest half of the pipeline.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Receiver {
    /// Capacity of the request inbox and the bucket outbox.
    buffer_size: usize,
    /// Seconds between two transfers of the register to the outbox.
    flush_interval: u64,
    /// Number of tasks parsing requests and adding buckets to the register.
    accept_workers: usize,
    /// Number of tasks writing buckets to the store.
    outlet_workers: usize,
    /// Maximum age of an admitted measurement, in units of its resolution.
    deadline: u64,
    /// Seconds to wait for in-flight data to reach the store on shutdown.
    shutdown_timeout: u64,
}

impl Default for Receiver {
    fn default() -> Self {
        Receiver {
            buffer_size: 1000,
            flush_interval: 1,
            accept_workers: num_cpus::get(),
            outlet_workers: num_cpus::get(),
            deadline: 2,
            shutdown_timeout: 10,
        }
    }
}

/// Controls the delivery half of the pipeline.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Outlet {
    /// The Datadog series endpoint.
    url: Url,
    /// Capacity of the convert inbox, the conversion queue, and the delivery queue.
    buffer_size: usize,
    /// Seconds between two scans of the store for ready buckets.
    read_interval: u64,
    /// Number of tasks converting buckets to series.
    convert_workers: usize,
    /// Number of tasks posting batches.
    delivery_workers: usize,
    /// Number of retries after a failed post.
    delivery_retries: u32,
    /// Seconds before a single post times out.
    delivery_timeout: u64,
    /// Maximum number of series in a batch.
    batch_capacity: usize,
    /// Milliseconds after which pending batches are flushed.
    batch_interval: u64,
}

impl Default for Outlet {
    fn default() -> Self {
        Outlet {
            url: default_outlet_url(),
            buffer_size: 1000,
            read_interval: 1,
            convert_workers: num_cpus::get(),
            delivery_workers: 10,
            delivery_retries: 2,
            delivery_timeout: 5,
            batch_capacity: 300,
            batch_interval: 200,
        }
    }
}

fn default_outlet_url() -> Url {
    Url::parse(DEFAULT_OUTLET_URL).expect("default outlet url is valid")
}

/// Control the self-observability metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`, which disables metrics.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "shuttle".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    http: Http,
    #[serde(default)]
    receiver: Receiver,
    #[serde(default)]
    outlet: Outlet,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    logging: shuttle_log::LogConfig,
}

impl ConfigValues {
    /// Rejects values that would stall the pipeline.
    fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("receiver.buffer_size", self.receiver.buffer_size as u64),
            ("receiver.flush_interval", self.receiver.flush_interval),
            ("receiver.accept_workers", self.receiver.accept_workers as u64),
            ("receiver.outlet_workers", self.receiver.outlet_workers as u64),
            ("outlet.buffer_size", self.outlet.buffer_size as u64),
            ("outlet.read_interval", self.outlet.read_interval),
            ("outlet.convert_workers", self.outlet.convert_workers as u64),
            ("outlet.delivery_workers", self.outlet.delivery_workers as u64),
            ("outlet.delivery_timeout", self.outlet.delivery_timeout),
            ("outlet.batch_capacity", self.outlet.batch_capacity as u64),
            ("outlet.batch_interval", self.outlet.batch_interval),
        ];

        match non_zero.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::new(ConfigErrorKind::InvalidValue).field(field)),
            None => Ok(()),
        }
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// A missing `config.yml` in the folder yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let file = path.join(CONFIG_FILE_NAME);
        let values = match fs::read_to_string(&file) {
            Ok(contents) if contents.trim().is_empty() => ConfigValues::default(),
            Ok(contents) => serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&file))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ConfigValues::default(),
            Err(e) => {
                return Err(ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&file));
            }
        };

        values.validate()?;
        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;

        values.validate()?;
        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(host) = overrides.host {
            self.values.http.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            self.values.http.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(url) = overrides.outlet_url {
            self.values.outlet.url = url
                .parse::<Url>()
                .map_err(|err| ConfigError::for_field(err, "outlet_url"))?;
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd);
        }

        Ok(self)
    }

    /// Returns the path of the config folder, empty if the config was not loaded from disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the socket address the HTTP intake binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.http.host, self.values.http.port)
    }

    /// Returns the capacity of the receiver's inbox and outbox.
    pub fn receiver_buffer_size(&self) -> usize {
        self.values.receiver.buffer_size
    }

    /// Returns the interval between two register transfers.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.values.receiver.flush_interval)
    }

    /// Returns the number of accept workers.
    pub fn accept_workers(&self) -> usize {
        self.values.receiver.accept_workers
    }

    /// Returns the number of workers persisting buckets.
    pub fn outlet_workers(&self) -> usize {
        self.values.receiver.outlet_workers
    }

    /// Returns the admission deadline in resolution units.
    pub fn deadline(&self) -> u64 {
        self.values.receiver.deadline
    }

    /// Returns how long shutdown waits for in-flight data.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.receiver.shutdown_timeout)
    }

    /// Returns the Datadog series endpoint.
    pub fn outlet_url(&self) -> &Url {
        &self.values.outlet.url
    }

    /// Returns the capacity of the outlet's queues.
    pub fn outlet_buffer_size(&self) -> usize {
        self.values.outlet.buffer_size
    }

    /// Returns the interval between two store scans.
    pub fn read_interval(&self) -> Duration {
        Duration::from_secs(self.values.outlet.read_interval)
    }

    /// Returns the number of convert workers.
    pub fn convert_workers(&self) -> usize {
        self.values.outlet.convert_workers
    }

    /// Returns the number of delivery workers.
    pub fn delivery_workers(&self) -> usize {
        self.values.outlet.delivery_workers
    }

    /// Returns the number of retries after a failed delivery attempt.
    pub fn delivery_retries(&self) -> u32 {
        self.values.outlet.delivery_retries
    }

    /// Returns the timeout of a single delivery attempt.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.values.outlet.delivery_timeout)
    }

    /// Returns the maximum number of series per batch.
    pub fn batch_capacity(&self) -> usize {
        self.values.outlet.batch_capacity
    }

    /// Returns the interval after which pending batches are flushed.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.values.outlet.batch_interval)
    }

    /// Returns the socket address of statsd, if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of all emitted metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags of all emitted metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &shuttle_log::LogConfig {
        &self.values.logging
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:3030");
        assert_eq!(config.receiver_buffer_size(), 1000);
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.deadline(), 2);
        assert_eq!(config.outlet_url().as_str(), DEFAULT_OUTLET_URL);
        assert_eq!(config.delivery_workers(), 10);
        assert_eq!(config.delivery_retries(), 2);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(5));
        assert_eq!(config.batch_capacity(), 300);
        assert_eq!(config.batch_interval(), Duration::from_millis(200));
        assert_eq!(config.accept_workers(), num_cpus::get());
        assert_eq!(config.statsd_addr(), None);
        assert_eq!(config.metrics_prefix(), "shuttle");
    }

    #[test]
    fn test_from_json_value() {
        let config = Config::from_json_value(serde_json::json!({
            "receiver": {"deadline": 5, "accept_workers": 3},
            "outlet": {"batch_interval": 50, "url": "http://localhost:9000/series"},
            "metrics": {"statsd": "127.0.0.1:8125", "default_tags": {"env": "test"}},
        }))
        .unwrap();

        assert_eq!(config.deadline(), 5);
        assert_eq!(config.accept_workers(), 3);
        assert_eq!(config.outlet_workers(), num_cpus::get());
        assert_eq!(config.batch_interval(), Duration::from_millis(50));
        assert_eq!(config.outlet_url().as_str(), "http://localhost:9000/series");
        assert_eq!(config.statsd_addr(), Some("127.0.0.1:8125"));
        assert_eq!(config.metrics_default_tags()["env"], "test");
    }

    #[test]
    fn test_reject_zero_values() {
        let err = Config::from_json_value(serde_json::json!({
            "outlet": {"batch_capacity": 0},
        }))
        .unwrap_err();

        assert_eq!(err.kind(), ConfigErrorKind::InvalidValue);
        insta::assert_snapshot!(err.to_string(), @"invalid config value (field outlet.batch_capacity)");
    }

    #[test]
    fn test_bad_json() {
        let err = Config::from_json_value(serde_json::json!({
            "receiver": {"deadline": "soon"},
        }))
        .unwrap_err();

        assert_eq!(err.kind(), ConfigErrorKind::BadJson);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "http:\n  port: 4000\nreceiver:\n  flush_interval: 2\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.listen_addr().port(), 4000);
        assert_eq!(config.flush_interval(), Duration::from_secs(2));
        assert_eq!(config.logging().level, shuttle_log::LogLevel::Debug);
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.receiver_buffer_size(), 1000);
    }

    #[test]
    fn test_from_path_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "receiver: [1, 2").unwrap();

        let err = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::BadYaml);
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                host: Some("0.0.0.0".to_owned()),
                port: Some("8080".to_owned()),
                outlet_url: Some("http://localhost/series".to_owned()),
                statsd: None,
            })
            .unwrap();

        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.outlet_url().as_str(), "http://localhost/series");

        let err = config
            .apply_override(OverridableConfig {
                port: Some("eighty".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"invalid config value (field port)");
    }
}
