//! Various registry-wide constants.

//------------ Version ------------------------------------------------------

pub const IRRD_VERSION: &str = env!("CARGO_PKG_VERSION");

//------------ Binary Names -------------------------------------------------

/// The friendly name of the `irrd` binary.
pub const IRRD_SERVER_APP: &str = "IRRd";

/// The friendly name of the `irrdc` binary.
pub const IRRD_CLIENT_APP: &str = "IRRd Client";

//------------ Config Files Paths -------------------------------------------

/// The default path to the daemon config file.
pub const IRRD_DEFAULT_CONFIG_FILE: &str = "/etc/irrd.conf";

//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const IRRD_ENV_LOG_LEVEL: &str = "IRRD_LOG_LEVEL";

/// The environment variable with the log target.
///
/// The variable should contain the name of a
/// [`LogType`][crate::daemon::config::LogType]. It will be overwritten by
/// the config file. The default is “stderr.”
pub const IRRD_ENV_LOG_TYPE: &str = "IRRD_LOG_TYPE";

/// The environment variable with the admin token.
pub const IRRD_ENV_ADMIN_TOKEN: &str = "IRRD_ADMIN_TOKEN";

/// The environment variable with the storage URI.
pub const IRRD_ENV_STORAGE_URI: &str = "IRRD_STORAGE_URI";

/// The environment variable telling `irrdc` to show API calls only.
pub const IRRD_CLI_API_ENV: &str = "IRRD_CLI_API";

/// The environment variable with the server URI for `irrdc`.
pub const IRRD_CLI_SERVER_ENV: &str = "IRRD_CLI_SERVER";

/// The environment variable with the admin token for `irrdc`.
pub const IRRD_CLI_TOKEN_ENV: &str = "IRRD_CLI_TOKEN";

/// The environment variable with the report format for `irrdc`.
pub const IRRD_CLI_FORMAT_ENV: &str = "IRRD_CLI_FORMAT";

//------------ Storage Layout -----------------------------------------------

/// The key-value namespace for all source data.
pub const SOURCES_NS: &str = "sources";

/// The sub-scope holding the current objects of a source.
pub const OBJECTS_SCOPE: &str = "objects";

/// The sub-scope holding the journal entries of a source.
pub const JOURNAL_SCOPE: &str = "journal";

/// The key name of the persisted status of a source.
pub const STATUS_KEY: &str = "status.json";

//------------ Mirror Protocol ----------------------------------------------

/// The maximum length of a mirror request line.
pub const MIRROR_MAX_REQUEST_LEN: usize = 1024;

/// The capacity of the commit queue of a single source.
pub const COMMIT_QUEUE_SIZE: usize = 64;

//------------ HTTP ---------------------------------------------------------

/// The maximum size of a submission or dump posted to the API.
pub const HTTP_POST_LIMIT: u64 = 32 * 1024 * 1024;

/// The request timeout used by `irrdc`.
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 120;

/// The user agent used by `irrdc`.
pub const HTTP_USER_AGENT: &str = "irrdc";
