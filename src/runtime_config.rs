//! # Runtime Configuration Module
//!
//! [`ServerConfig`] holds the settings of a server: where to listen, the app context, the
//! template charset rule, the external folder, upload support and worker pool sizing.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PIN_PORT` | `9999` | listen port, `0` picks a free one |
//! | `PIN_BIND` | `0.0.0.0` | listen address |
//! | `PIN_APP_CONTEXT` | unset | path prefix of every route, e.g. `shop` |
//! | `PIN_RESTRICTED_CHARSET` | `true` | literal path segments limited to `[a-z0-9-.]` |
//! | `PIN_EXTERNAL_FOLDER` | unset | directory served for unmatched reads |
//! | `PIN_UPLOAD_SUPPORT` | `true` | decode multipart bodies |
//! | `PIN_WORKERS` | `10` | worker threads |
//! | `PIN_QUEUE_BOUND` | `1024` | pending requests before the acceptor blocks |
//!
//! ## Usage
//!
//! ```rust
//! use pinhttp::runtime_config::ServerConfig;
//!
//! let config = ServerConfig::default().with_port(0).with_app_context("shop");
//! assert!(config.validate().is_ok());
//! ```

use crate::error::InitializationError;
use crate::worker_pool::WorkerPoolConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 9999;

/// Charset of literal path segments and of the app context when the restriction is enabled.
static PATH_CHARSET: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-z0-9\-\.]*$").ok());

/// Whether `segment` only uses `[a-z0-9-.]`.
#[must_use]
pub fn is_restricted_charset(segment: &str) -> bool {
    match PATH_CHARSET.as_ref() {
        Some(re) => re.is_match(segment),
        None => segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.'),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: IpAddr,
    pub app_context: Option<String>,
    pub restricted_charset: bool,
    pub external_folder: Option<PathBuf>,
    pub upload_support: bool,
    pub workers: usize,
    pub queue_bound: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            app_context: None,
            restricted_charset: true,
            external_folder: None,
            upload_support: true,
            workers: WorkerPoolConfig::default().num_workers,
            queue_bound: WorkerPoolConfig::default().queue_bound,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with the `PIN_*` environment variables.
    ///
    /// # Errors
    ///
    /// A variable that does not parse is an [`InitializationError`].
    pub fn from_env() -> Result<Self, InitializationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, InitializationError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("PIN_PORT") {
            let port: i64 = parse_setting("PIN_PORT", &raw)?;
            config.port = u16::try_from(port).map_err(|_| InitializationError::InvalidPort(port))?;
        }
        if let Some(raw) = lookup("PIN_BIND") {
            config.bind_address = raw
                .trim()
                .parse()
                .map_err(|_| InitializationError::InvalidBindAddress(raw.clone()))?;
        }
        if let Some(raw) = lookup("PIN_APP_CONTEXT") {
            config.app_context = Some(raw);
        }
        if let Some(raw) = lookup("PIN_RESTRICTED_CHARSET") {
            config.restricted_charset = parse_setting("PIN_RESTRICTED_CHARSET", &raw)?;
        }
        if let Some(raw) = lookup("PIN_EXTERNAL_FOLDER").filter(|s| !s.trim().is_empty()) {
            config.external_folder = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("PIN_UPLOAD_SUPPORT") {
            config.upload_support = parse_setting("PIN_UPLOAD_SUPPORT", &raw)?;
        }
        if let Some(raw) = lookup("PIN_WORKERS") {
            config.workers = parse_setting("PIN_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("PIN_QUEUE_BOUND") {
            config.queue_bound = parse_setting("PIN_QUEUE_BOUND", &raw)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    #[must_use]
    pub fn with_app_context(mut self, context: impl Into<String>) -> Self {
        self.app_context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_restricted_charset(mut self, restricted: bool) -> Self {
        self.restricted_charset = restricted;
        self
    }

    #[must_use]
    pub fn with_external_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.external_folder = Some(folder.into());
        self
    }

    #[must_use]
    pub fn with_upload_support(mut self, enabled: bool) -> Self {
        self.upload_support = enabled;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_queue_bound(mut self, bound: usize) -> Self {
        self.queue_bound = bound;
        self
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    #[must_use]
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            num_workers: self.workers,
            queue_bound: self.queue_bound,
        }
    }

    /// Check everything that does not need the filesystem.
    ///
    /// # Errors
    ///
    /// Reports the first invalid setting.
    pub fn validate(&self) -> Result<(), InitializationError> {
        if let Some(context) = &self.app_context {
            validate_app_context(context, self.restricted_charset)?;
        }
        if self.workers == 0 {
            return Err(InitializationError::InvalidWorkers);
        }
        if self.queue_bound == 0 {
            return Err(InitializationError::InvalidQueueBound);
        }
        Ok(())
    }
}

fn validate_app_context(context: &str, restricted: bool) -> Result<(), InitializationError> {
    let invalid = |reason| InitializationError::InvalidAppContext {
        context: context.to_owned(),
        reason,
    };
    if context.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if context.starts_with('/') || context.ends_with('/') {
        return Err(invalid("must not start or end with '/'"));
    }
    if context.split('/').any(str::is_empty) {
        return Err(invalid("must not contain empty segments"));
    }
    if restricted && !context.split('/').all(is_restricted_charset) {
        return Err(InitializationError::InvalidCharset {
            path: context.to_owned(),
        });
    }
    Ok(())
}

fn parse_setting<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, InitializationError> {
    raw.trim()
        .parse()
        .map_err(|_| InitializationError::InvalidSetting {
            key,
            value: raw.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ServerConfig, InitializationError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 9999);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9999");
        assert!(config.restricted_charset);
        assert!(config.upload_support);
        assert_eq!(config.workers, 10);
        assert_eq!(config.queue_bound, 1024);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_vars(&[
            ("PIN_PORT", "8080"),
            ("PIN_BIND", "127.0.0.1"),
            ("PIN_APP_CONTEXT", "shop"),
            ("PIN_UPLOAD_SUPPORT", "false"),
            ("PIN_WORKERS", "3"),
        ])
        .unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.app_context.as_deref(), Some("shop"));
        assert!(!config.upload_support);
        assert_eq!(config.worker_pool().num_workers, 3);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            from_vars(&[("PIN_PORT", "70000")]),
            Err(InitializationError::InvalidPort(70000))
        ));
        assert!(matches!(
            from_vars(&[("PIN_PORT", "-1")]),
            Err(InitializationError::InvalidPort(-1))
        ));
        assert!(matches!(
            from_vars(&[("PIN_BIND", "localhost:80")]),
            Err(InitializationError::InvalidBindAddress(_))
        ));
        assert!(matches!(
            from_vars(&[("PIN_WORKERS", "many")]),
            Err(InitializationError::InvalidSetting { key: "PIN_WORKERS", .. })
        ));
    }

    #[test]
    fn test_validate_app_context() {
        let base = ServerConfig::default();
        assert!(base.clone().with_app_context("shop").validate().is_ok());
        assert!(base.clone().with_app_context("api/v1").validate().is_ok());
        assert!(base.clone().with_app_context("/shop").validate().is_err());
        assert!(base.clone().with_app_context("shop/").validate().is_err());
        assert!(base.clone().with_app_context("").validate().is_err());
        assert!(matches!(
            base.clone().with_app_context("Shop").validate(),
            Err(InitializationError::InvalidCharset { .. })
        ));
        assert!(base
            .with_restricted_charset(false)
            .with_app_context("Shop")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_pool_sizes() {
        assert!(matches!(
            ServerConfig::default().with_workers(0).validate(),
            Err(InitializationError::InvalidWorkers)
        ));
        assert!(matches!(
            ServerConfig::default().with_queue_bound(0).validate(),
            Err(InitializationError::InvalidQueueBound)
        ));
    }

    #[test]
    fn test_charset() {
        assert!(is_restricted_charset("hello-world.v1"));
        assert!(is_restricted_charset(""));
        assert!(!is_restricted_charset("Hello"));
        assert!(!is_restricted_charset("a_b"));
    }
}
