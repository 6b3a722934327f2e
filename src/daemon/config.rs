use std::{
    collections::{HashMap, HashSet},
    env, fmt, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::LevelFilter;
use serde::{Deserialize, Deserializer, de};
use url::Url;

use crate::auth::{AuthPolicy, PasswordHash};
use crate::commons::api::Token;
use crate::commons::util::ext_serde;
use crate::constants::*;
use crate::mirror::ImportSchedule;
use crate::query::{AccessList, AccessRule, QueryLimits};
use crate::rpsl::{ObjectClass, ReferenceMode, SourceName};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn port() -> u16 {
        8080
    }

    fn mirror_port() -> u16 {
        8043
    }

    fn storage_uri() -> Url {
        match env::var(IRRD_ENV_STORAGE_URI) {
            Ok(uri) => match Url::parse(&uri) {
                Ok(uri) => uri,
                Err(_) => {
                    eprintln!("Invalid storage URI in env var {IRRD_ENV_STORAGE_URI}");
                    ::std::process::exit(1);
                }
            },
            Err(_) => Url::parse("local://./data/").unwrap_or_else(|_| unreachable!("valid default URI")),
        }
    }

    fn log_level() -> LevelFilter {
        match env::var(IRRD_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!("Unrecognized value for log level in env var {IRRD_ENV_LOG_LEVEL}");
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        match env::var(IRRD_ENV_LOG_TYPE) {
            Ok(log_type) => match LogType::from_str(&log_type) {
                Ok(log_type) => log_type,
                Err(e) => {
                    eprintln!("{e} in env var {IRRD_ENV_LOG_TYPE}");
                    ::std::process::exit(1);
                }
            },
            _ => LogType::Stderr,
        }
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./irrd.log")
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }

    fn admin_token() -> Option<Token> {
        env::var(IRRD_ENV_ADMIN_TOKEN).ok().map(Token::from)
    }

    fn post_limit_api() -> u64 {
        HTTP_POST_LIMIT
    }

    fn query_timeout_seconds() -> u64 {
        30
    }

    fn query_max_results() -> usize {
        10_000
    }

    fn set_max_depth() -> usize {
        32
    }

    fn set_max_members() -> usize {
        100_000
    }

    fn auth_max_depth() -> usize {
        8
    }

    fn mirror_timeout_seconds() -> u64 {
        60
    }

    fn import_interval_seconds() -> u64 {
        60
    }

    fn import_backoff_initial_seconds() -> u64 {
        5
    }

    fn import_backoff_max_seconds() -> u64 {
        900
    }

    fn journal_expiry_interval_seconds() -> u64 {
        3600
    }
}

//------------ Config --------------------------------------------------------

/// Global configuration for the registry daemon.
///
/// This is read from a TOML file, `/etc/irrd.conf` unless another file is
/// given on the command line. Some defaults can be set through environment
/// variables.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::ip")]
    pub ip: IpAddr,

    #[serde(default = "ConfigDefaults::port")]
    pub port: u16,

    #[serde(default = "ConfigDefaults::ip")]
    pub mirror_ip: IpAddr,

    #[serde(default = "ConfigDefaults::mirror_port")]
    pub mirror_port: u16,

    #[serde(default = "ConfigDefaults::storage_uri")]
    pub storage_uri: Url,

    pub pid_file: Option<PathBuf>,

    #[serde(default = "ConfigDefaults::log_level", deserialize_with = "ext_serde::de_level_filter")]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    /// The bearer token for the admin API. Without it the admin API is
    /// disabled.
    #[serde(default = "ConfigDefaults::admin_token")]
    pub admin_token: Option<Token>,

    #[serde(default = "ConfigDefaults::post_limit_api")]
    pub post_limit_api: u64,

    #[serde(default = "ConfigDefaults::query_timeout_seconds")]
    pub query_timeout_seconds: u64,

    #[serde(default = "ConfigDefaults::query_max_results")]
    pub query_max_results: usize,

    #[serde(default = "ConfigDefaults::set_max_depth")]
    pub set_max_depth: usize,

    #[serde(default = "ConfigDefaults::set_max_members")]
    pub set_max_members: usize,

    #[serde(default = "ConfigDefaults::auth_max_depth")]
    pub auth_max_depth: usize,

    /// The hash of the override password, e.g. `SCRYPT-PW <salt>:<hash>`.
    pub override_password: Option<String>,

    #[serde(default)]
    pub reference_validation: ReferenceMode,

    /// Classes that can only be changed with the override password.
    #[serde(default)]
    pub protected_classes: Vec<ObjectClass>,

    #[serde(default = "ConfigDefaults::mirror_timeout_seconds")]
    pub mirror_timeout_seconds: u64,

    #[serde(default = "ConfigDefaults::import_interval_seconds")]
    pub import_interval_seconds: u64,

    #[serde(default = "ConfigDefaults::import_backoff_initial_seconds")]
    pub import_backoff_initial_seconds: u64,

    #[serde(default = "ConfigDefaults::import_backoff_max_seconds")]
    pub import_backoff_max_seconds: u64,

    #[serde(default = "ConfigDefaults::journal_expiry_interval_seconds")]
    pub journal_expiry_interval_seconds: u64,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// The sources queried when a query names none, in order of priority.
    /// All sources are queried when empty.
    #[serde(default)]
    pub sources_default: Vec<SourceName>,

    #[serde(default)]
    pub compatibility: CompatibilityConfig,

    #[serde(default)]
    pub access: Vec<AccessRule>,

    /// Named lists of maintainers for `LIST` auth methods.
    #[serde(default)]
    pub auth_lists: HashMap<String, Vec<String>>,
}

/// # Accessors
impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn mirror_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.mirror_ip, self.mirror_port)
    }

    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    pub fn source(&self, name: &SourceName) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| &s.name == name)
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout_seconds)
    }

    pub fn journal_expiry_interval(&self) -> Duration {
        Duration::from_secs(self.journal_expiry_interval_seconds)
    }

    pub fn import_schedule(&self) -> ImportSchedule {
        ImportSchedule {
            interval: Duration::from_secs(self.import_interval_seconds),
            backoff_initial: Duration::from_secs(self.import_backoff_initial_seconds),
            backoff_max: Duration::from_secs(self.import_backoff_max_seconds),
        }
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            max_results: self.query_max_results,
            set_max_depth: self.set_max_depth,
            set_max_members: self.set_max_members,
            timeout: Duration::from_secs(self.query_timeout_seconds),
            ipv4_only_route_set_members: self.compatibility.ipv4_only_route_set_members,
        }
    }
}

/// # Create, verify and log
impl Config {
    /// Creates the config at startup and initialises logging.
    pub fn create(config_file: &str) -> Result<Self, ConfigError> {
        let config = Self::read_config(config_file).map_err(|e| {
            if config_file == IRRD_DEFAULT_CONFIG_FILE {
                ConfigError::other("Cannot find config file. Please use --config to specify its location.")
            } else {
                ConfigError::Other(format!("Error parsing config file: {config_file}, error: {e}"))
            }
        })?;
        config.init_logging()?;
        info!("{IRRD_SERVER_APP} uses configuration file: {config_file}");

        config
            .verify()
            .map_err(|e| ConfigError::Other(format!("Error in config file: {config_file}, error: {e}")))?;
        Ok(config)
    }

    pub fn read_config(file: &str) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(file)?;
        Self::parse_str(&s)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::TomlError)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.port == self.mirror_port && self.ip == self.mirror_ip && self.port != 0 {
            return Err(ConfigError::other("port and mirror_port must differ"));
        }

        match self.storage_uri.scheme() {
            "local" | "memory" => {}
            scheme => {
                return Err(ConfigError::Other(format!(
                    "Unsupported storage_uri scheme '{scheme}', use local:// or memory://"
                )));
            }
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(&source.name) {
                return Err(ConfigError::Other(format!("Source {} is configured twice", source.name)));
            }
            match (source.authoritative, &source.upstream) {
                (true, Some(_)) => {
                    return Err(ConfigError::Other(format!(
                        "Source {} is authoritative and cannot have an upstream",
                        source.name
                    )));
                }
                (false, None) => {
                    return Err(ConfigError::Other(format!(
                        "Source {} is not authoritative and needs an upstream",
                        source.name
                    )));
                }
                _ => {}
            }
            if source.journal_retention_days == Some(0) {
                return Err(ConfigError::Other(format!(
                    "journal_retention_days of source {} must be at least 1",
                    source.name
                )));
            }
        }

        for (name, value) in [
            ("query_timeout_seconds", self.query_timeout_seconds),
            ("mirror_timeout_seconds", self.mirror_timeout_seconds),
            ("import_interval_seconds", self.import_interval_seconds),
            ("import_backoff_initial_seconds", self.import_backoff_initial_seconds),
            ("journal_expiry_interval_seconds", self.journal_expiry_interval_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Other(format!("{name} must be at least 1")));
            }
        }

        let mut defaults = HashSet::new();
        for name in &self.sources_default {
            if self.source(name).is_none() {
                return Err(ConfigError::Other(format!("Default source {name} is not configured")));
            }
            if !defaults.insert(name) {
                return Err(ConfigError::Other(format!("Default source {name} is listed twice")));
            }
        }

        if self.import_backoff_max_seconds < self.import_backoff_initial_seconds {
            return Err(ConfigError::other(
                "import_backoff_max_seconds must not be smaller than import_backoff_initial_seconds",
            ));
        }

        if self.set_max_depth == 0 || self.auth_max_depth == 0 {
            return Err(ConfigError::other("set_max_depth and auth_max_depth must be at least 1"));
        }

        // Fails on an invalid override hash.
        RuntimeConfig::from_config(self, 0)?;

        Ok(())
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {e}")))
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = fern::log_file(path)
            .map_err(|e| ConfigError::Other(format!("Failed to open log file '{}': {e}", path.display())))?;
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {e}")))
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = syslog::Facility::from_str(&self.syslog_facility)
            .map_err(|_| ConfigError::Other(format!("Invalid syslog_facility: {}", self.syslog_facility)))?;
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("irrd"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514)));
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| ConfigError::Other(format!("Failed to init syslog: {e}"))),
            Err(err) => Err(ConfigError::Other(format!("Cannot connect to syslog: {err}"))),
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is only supported on Unix systems"))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let irrd_framework_level = self.log_level.min(LevelFilter::Debug);

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
            .level_for("irrd::commons::storage", irrd_framework_level)
            .level_for("irrd::journal::store", irrd_framework_level)
    }
}

/// # Testing
impl Config {
    /// A configuration for tests, with the given sources and unrestricted
    /// access from the loopback addresses.
    pub fn test(storage_uri: &Url, sources: Vec<SourceConfig>) -> Self {
        let mut config = Self::parse_str("").unwrap_or_else(|e| panic!("empty config: {e}"));
        config.storage_uri = storage_uri.clone();
        config.log_level = LevelFilter::Debug;
        config.admin_token = Some(Token::from("secret"));
        config.sources = sources;
        config.import_interval_seconds = 1;
        config.import_backoff_initial_seconds = 1;
        config.import_backoff_max_seconds = 2;
        config.mirror_timeout_seconds = 5;
        for prefix in ["127.0.0.0/8", "::1/128"] {
            config.access.push(AccessRule {
                prefix: prefix.parse().unwrap_or_else(|_| panic!("prefix {prefix}")),
                query: true,
                bulk_queries: true,
                mirror_export: true,
                max_results: None,
            });
        }
        config
    }
}

//------------ SourceConfig --------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SourceConfig {
    pub name: SourceName,

    #[serde(default)]
    pub authoritative: bool,

    /// The `host:port` of the mirror server to import from.
    pub upstream: Option<String>,

    /// Journal entries older than this are expired.
    pub journal_retention_days: Option<u32>,

    /// Whether downstream registries may mirror this source.
    #[serde(default = "SourceConfig::dflt_export")]
    pub export: bool,
}

impl SourceConfig {
    fn dflt_export() -> bool {
        true
    }

    pub fn authoritative(name: SourceName) -> Self {
        SourceConfig {
            name,
            authoritative: true,
            upstream: None,
            journal_retention_days: None,
            export: true,
        }
    }

    pub fn mirror(name: SourceName, upstream: impl Into<String>) -> Self {
        SourceConfig {
            name,
            authoritative: false,
            upstream: Some(upstream.into()),
            journal_retention_days: None,
            export: true,
        }
    }
}

//------------ CompatibilityConfig -------------------------------------------

/// Settings for clients that cannot handle all query results.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CompatibilityConfig {
    /// Leave IPv6 prefixes out of set expansions.
    #[serde(default)]
    pub ipv4_only_route_set_members: bool,
}

//------------ RuntimeConfig -------------------------------------------------

/// The parts of the configuration that can be changed without a restart.
///
/// A new version is derived on every reload and replaces the previous one
/// as a whole.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    version: u64,
    access: AccessList,
    auth_lists: HashMap<String, Vec<String>>,
    override_hash: Option<PasswordHash>,
    protected_classes: Vec<ObjectClass>,
    reference_validation: ReferenceMode,
    auth_max_depth: usize,
    query_limits: QueryLimits,
    sources_default: Vec<SourceName>,
}

impl RuntimeConfig {
    pub fn from_config(config: &Config, version: u64) -> Result<Self, ConfigError> {
        let override_hash = match &config.override_password {
            Some(hash) => Some(
                PasswordHash::from_str(hash)
                    .map_err(|e| ConfigError::Other(format!("Invalid override_password: {e}")))?,
            ),
            None => None,
        };

        let auth_lists = config
            .auth_lists
            .iter()
            .map(|(name, mntners)| {
                let mntners = mntners.iter().map(|m| m.trim().to_ascii_uppercase()).collect();
                (name.trim().to_ascii_uppercase(), mntners)
            })
            .collect();

        Ok(RuntimeConfig {
            version,
            access: AccessList::new(config.access.clone()),
            auth_lists,
            override_hash,
            protected_classes: config.protected_classes.clone(),
            reference_validation: config.reference_validation,
            auth_max_depth: config.auth_max_depth,
            query_limits: config.query_limits(),
            sources_default: config.sources_default.clone(),
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn access(&self) -> &AccessList {
        &self.access
    }

    pub fn reference_validation(&self) -> ReferenceMode {
        self.reference_validation
    }

    pub fn query_limits(&self) -> QueryLimits {
        self.query_limits
    }

    pub fn sources_default(&self) -> &[SourceName] {
        &self.sources_default
    }

    pub fn auth_policy(&self) -> AuthPolicy<'_> {
        AuthPolicy {
            override_hash: self.override_hash.as_ref(),
            protected_classes: &self.protected_classes,
            auth_lists: &self.auth_lists,
            max_depth: self.auth_max_depth,
        }
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{s}\""
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        LogType::from_str(&string).map_err(de::Error::custom)
    }
}

//------------ Tests ---------------------------------------------------------
