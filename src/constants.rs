// -
// Configuration sources

/// Prefix for environment variable overrides, e.g. `WATCHSET__WATCH__INBOUND_QUEUE_SIZE`
pub(crate) const CONFIG_ENV_PREFIX: &str = "WATCHSET";
pub(crate) const CONFIG_ENV_SEPARATOR: &str = "__";

/// Env var pointing at an extra TOML config file
pub(crate) const CONFIG_PATH_ENV: &str = "WATCHSET_CONFIG_PATH";

// -
// Metric drop reasons

pub(crate) const DROP_REASON_QUEUE_FULL: &str = "queue_full";
pub(crate) const DROP_REASON_QUEUE_CLOSED: &str = "queue_closed";
