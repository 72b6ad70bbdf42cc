// SPDX-License-Identifier: Apache-2.0

//! Tunable limits for the `nativemem` buffer and handle layer
//!
//! The limits are normally compiled in via [`Limits::DEFAULT`], but a host
//! may load them from a TOML document:
//!
//! ```
//! use const_default::ConstDefault;
//! use nativemem_config::Limits;
//!
//! let limits = Limits::from_toml("type_name_query_size = 2048").unwrap();
//! assert_eq!(limits.type_name_query_size, 2048);
//! assert_eq!(limits.max_allocation, Limits::DEFAULT.max_allocation);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

use const_default::ConstDefault;
use serde::{Deserialize, Serialize};

/// Configuration file template
pub const CONFIG_TEMPLATE: &str = r#"## Limits for the nativemem layer

## Size in bytes of the buffer used to query an object's type name
# type_name_query_size = 1024

## Largest single allocation the host will attempt, in bytes
# max_allocation = 1073741824
"#;

/// Smallest accepted `type_name_query_size`
///
/// Large enough for the type information header on every supported target
/// plus a short name.
pub const MIN_TYPE_NAME_QUERY_SIZE: usize = 64;

const fn default_type_name_query_size() -> usize {
    1024
}

const fn default_max_allocation() -> usize {
    1 << 30
}

/// Errors raised while loading [`Limits`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid TOML or has unknown keys
    #[error("failed to parse limits: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Name of the offending key
        field: &'static str,

        /// Why the value was rejected
        reason: &'static str,
    },
}

/// Limits consulted by the host primitives and the handle queries
///
/// This struct can be used with any serde deserializer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Size of the buffer handed to the type information query
    #[serde(default = "default_type_name_query_size")]
    pub type_name_query_size: usize,

    /// Largest single allocation, in bytes
    #[serde(default = "default_max_allocation")]
    pub max_allocation: usize,
}

impl ConstDefault for Limits {
    const DEFAULT: Self = Self {
        type_name_query_size: default_type_name_query_size(),
        max_allocation: default_max_allocation(),
    };
}

impl Default for Limits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Limits {
    /// Parses and validates limits from a TOML document
    ///
    /// Missing keys take their default value.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let limits: Self = toml::from_str(document)?;
        limits.validate()?;
        Ok(limits)
    }

    /// Checks that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.type_name_query_size < MIN_TYPE_NAME_QUERY_SIZE {
            return Err(ConfigError::Invalid {
                field: "type_name_query_size",
                reason: "smaller than the type information header",
            });
        }

        if self.type_name_query_size > self.max_allocation {
            return Err(ConfigError::Invalid {
                field: "type_name_query_size",
                reason: "larger than `max_allocation`",
            });
        }

        if self.max_allocation == 0 {
            return Err(ConfigError::Invalid {
                field: "max_allocation",
                reason: "must be nonzero",
            });
        }

        Ok(())
    }
}
