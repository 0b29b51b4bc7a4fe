//! Tree configuration.
//!
//! A `TreeConfig` fixes the block size, the node cache limits, optional
//! fan-out caps and the size of the I/O pool. It can be built in code with
//! the `with_*` methods or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `OOC_BTREE_BLOCK_SIZE`: block size in bytes (default: `4096`)
//! - `OOC_BTREE_LEAF_CACHE`: resident leaf limit (default: `1024`)
//! - `OOC_BTREE_INTERNAL_CACHE`: resident internal node limit (default: `256`)
//! - `OOC_BTREE_OVERCOMMIT`: extra nodes admitted per cache when every
//!   resident node is in use (default: the cache's capacity)
//! - `OOC_BTREE_LEAF_FAN_OUT`: cap on entries per leaf (default: what fits)
//! - `OOC_BTREE_INTERNAL_FAN_OUT`: cap on children per internal node
//!   (default: what fits)
//! - `OOC_BTREE_IO_THREADS`: block I/O workers (default: `4`)
//! - `OOC_BTREE_MAX_ACTIVE`: requests in progress at once (default: `64`)
//! - `OOC_BTREE_DATA_DIRECTORY`: directory for file-backed trees (default: `./data`)
//!
//! # Invariants
//!
//! A config that passed `validate()` has:
//! - `block_size >= MIN_BLOCK_SIZE`
//! - positive cache capacities, I/O thread count and request limit
//! - fan-out caps, when set, of at least `MIN_FAN_OUT`

use std::path::PathBuf;
use std::str::FromStr;

use crate::btree::MIN_FAN_OUT;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 64;

/// Configuration of one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Size of every block, and therefore of every node, in bytes.
    pub block_size: usize,
    /// Leaves kept resident before eviction starts.
    pub leaf_cache_capacity: usize,
    /// Internal nodes kept resident before eviction starts.
    pub internal_cache_capacity: usize,
    /// Extra nodes admitted when every resident node is retained. `None`
    /// allows as many as the cache's capacity.
    pub overcommit: Option<usize>,
    /// Upper limit on entries per leaf; `None` fills the block.
    pub leaf_fan_out: Option<usize>,
    /// Upper limit on children per internal node; `None` fills the block.
    pub internal_fan_out: Option<usize>,
    /// Worker threads performing block reads and writes.
    pub io_threads: usize,
    /// Requests allowed in progress at the same time.
    pub max_active_requests: usize,
    /// Where file-backed trees keep their block file.
    pub data_directory: PathBuf,
}

/// Error returned when a configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
    /// The device's block size differs from the configured one.
    BlockSizeMismatch { configured: usize, device: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::BlockSizeMismatch { configured, device } => write!(
                f,
                "configured block size {configured} does not match the device's {device}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
            leaf_cache_capacity: Self::DEFAULT_LEAF_CACHE,
            internal_cache_capacity: Self::DEFAULT_INTERNAL_CACHE,
            overcommit: None,
            leaf_fan_out: None,
            internal_fan_out: None,
            io_threads: Self::DEFAULT_IO_THREADS,
            max_active_requests: Self::DEFAULT_MAX_ACTIVE,
            data_directory: PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
        }
    }
}

impl TreeConfig {
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;
    pub const DEFAULT_LEAF_CACHE: usize = 1024;
    pub const DEFAULT_INTERNAL_CACHE: usize = 256;
    pub const DEFAULT_IO_THREADS: usize = 4;
    pub const DEFAULT_MAX_ACTIVE: usize = 64;
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";

    #[must_use]
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set both cache capacities.
    #[must_use]
    pub const fn with_cache_capacity(mut self, leaves: usize, internals: usize) -> Self {
        self.leaf_cache_capacity = leaves;
        self.internal_cache_capacity = internals;
        self
    }

    #[must_use]
    pub const fn with_overcommit(mut self, overcommit: usize) -> Self {
        self.overcommit = Some(overcommit);
        self
    }

    /// Cap the fan-out of both node kinds.
    #[must_use]
    pub const fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.leaf_fan_out = Some(fan_out);
        self.internal_fan_out = Some(fan_out);
        self
    }

    #[must_use]
    pub const fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads;
        self
    }

    #[must_use]
    pub const fn with_max_active_requests(mut self, max_active: usize) -> Self {
        self.max_active_requests = max_active;
        self
    }

    #[must_use]
    pub fn with_data_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.data_directory = directory.into();
        self
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(invalid(
                "block_size",
                format!("{} is below the minimum of {MIN_BLOCK_SIZE}", self.block_size),
            ));
        }
        for (name, value) in [
            ("leaf_cache_capacity", self.leaf_cache_capacity),
            ("internal_cache_capacity", self.internal_cache_capacity),
            ("io_threads", self.io_threads),
            ("max_active_requests", self.max_active_requests),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be positive".to_string()));
            }
        }
        for (name, fan_out) in [
            ("leaf_fan_out", self.leaf_fan_out),
            ("internal_fan_out", self.internal_fan_out),
        ] {
            if let Some(fan_out) = fan_out.filter(|&n| n < MIN_FAN_OUT) {
                return Err(invalid(
                    name,
                    format!("{fan_out} is below the minimum of {MIN_FAN_OUT}"),
                ));
            }
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value or the
    /// result fails `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            block_size: parse(&lookup, "OOC_BTREE_BLOCK_SIZE")?.unwrap_or(defaults.block_size),
            leaf_cache_capacity: parse(&lookup, "OOC_BTREE_LEAF_CACHE")?
                .unwrap_or(defaults.leaf_cache_capacity),
            internal_cache_capacity: parse(&lookup, "OOC_BTREE_INTERNAL_CACHE")?
                .unwrap_or(defaults.internal_cache_capacity),
            overcommit: parse(&lookup, "OOC_BTREE_OVERCOMMIT")?,
            leaf_fan_out: parse(&lookup, "OOC_BTREE_LEAF_FAN_OUT")?,
            internal_fan_out: parse(&lookup, "OOC_BTREE_INTERNAL_FAN_OUT")?,
            io_threads: parse(&lookup, "OOC_BTREE_IO_THREADS")?.unwrap_or(defaults.io_threads),
            max_active_requests: parse(&lookup, "OOC_BTREE_MAX_ACTIVE")?
                .unwrap_or(defaults.max_active_requests),
            data_directory: lookup("OOC_BTREE_DATA_DIRECTORY")
                .map_or(defaults.data_directory, PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

/// Parse an optional variable.
///
/// # Errors
///
/// Returns an error if the variable is set but does not parse.
fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| invalid(name, format!("'{value}' is not a valid number")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = TreeConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.overcommit, None);
        assert_eq!(config.data_directory, PathBuf::from("./data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let config = TreeConfig::from_lookup(lookup(&[
            ("OOC_BTREE_BLOCK_SIZE", "512"),
            ("OOC_BTREE_LEAF_CACHE", "8"),
            ("OOC_BTREE_LEAF_FAN_OUT", " 4 "),
            ("OOC_BTREE_DATA_DIRECTORY", "/tmp/trees"),
        ]))
        .unwrap();

        assert_eq!(config.block_size, 512);
        assert_eq!(config.leaf_cache_capacity, 8);
        assert_eq!(config.leaf_fan_out, Some(4));
        assert_eq!(config.internal_fan_out, None);
        assert_eq!(config.internal_cache_capacity, TreeConfig::DEFAULT_INTERNAL_CACHE);
        assert_eq!(config.data_directory, PathBuf::from("/tmp/trees"));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let error = TreeConfig::from_lookup(lookup(&[("OOC_BTREE_IO_THREADS", "many")]))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid value for OOC_BTREE_IO_THREADS: 'many' is not a valid number"
        );
    }

    #[test]
    fn test_validate_bounds() {
        let small_block = TreeConfig::default().with_block_size(32);
        assert!(matches!(
            small_block.validate(),
            Err(ConfigError::InvalidValue { name, .. }) if name == "block_size"
        ));

        let no_cache = TreeConfig::default().with_cache_capacity(0, 4);
        assert!(no_cache.validate().is_err());

        let tiny_fan_out = TreeConfig::default().with_fan_out(2);
        assert!(matches!(
            tiny_fan_out.validate(),
            Err(ConfigError::InvalidValue { name, .. }) if name == "leaf_fan_out"
        ));

        assert!(TreeConfig::default().with_fan_out(3).validate().is_ok());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::BlockSizeMismatch {
            configured: 4096,
            device: 512,
        };
        assert_eq!(
            error.to_string(),
            "configured block size 4096 does not match the device's 512"
        );
    }
}
