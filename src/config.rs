//! Facade configuration with environment variable support.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via [`ConfigBuilder`] methods
//! 2. **Environment variables** — values from `WEFT_*` env vars
//! 3. **Defaults** — built-in defaults from [`Config::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `WEFT_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `WEFT_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_name_prefix` | `"weft"` |
//! | `thread_stack_size` | runtime default (unset) |

use std::env;

/// Environment variable name for the managed-task thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "WEFT_THREAD_NAME_PREFIX";
/// Environment variable name for the managed-task stack size in bytes.
pub const ENV_THREAD_STACK_SIZE: &str = "WEFT_THREAD_STACK_SIZE";

/// Configuration for a [`Weft`](crate::Weft) facade.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix used when naming managed-task threads.
    pub thread_name_prefix: String,
    /// Stack size for managed-task threads, or `None` for the platform
    /// default.
    pub thread_stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_name_prefix: "weft".to_string(),
            thread_stack_size: None,
        }
    }
}

impl Config {
    /// Returns the default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        ConfigBuilder::new().build()
    }

    /// Returns a builder for programmatic configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for [`Config`].
///
/// Fields not set programmatically fall back to `WEFT_*` environment
/// variables, then to the defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    thread_name_prefix: Option<String>,
    thread_stack_size: Option<usize>,
}

impl ConfigBuilder {
    /// Creates a new builder with no programmatic overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the managed-task thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Sets the managed-task stack size in bytes.
    #[must_use]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Resolves the final configuration.
    ///
    /// Unparsable environment values are logged and ignored rather than
    /// failing construction.
    #[must_use]
    pub fn build(self) -> Config {
        let mut config = Config::default();

        if let Ok(prefix) = env::var(ENV_THREAD_NAME_PREFIX) {
            if !prefix.is_empty() {
                config.thread_name_prefix = prefix;
            }
        }
        if let Ok(raw) = env::var(ENV_THREAD_STACK_SIZE) {
            match raw.parse::<usize>() {
                Ok(bytes) => config.thread_stack_size = Some(bytes),
                Err(_) => {
                    tracing::warn!(
                        var = ENV_THREAD_STACK_SIZE,
                        value = %raw,
                        "ignoring unparsable environment override"
                    );
                }
            }
        }

        if let Some(prefix) = self.thread_name_prefix {
            config.thread_name_prefix = prefix;
        }
        if let Some(bytes) = self.thread_stack_size {
            config.thread_stack_size = Some(bytes);
        }

        config
    }
}
