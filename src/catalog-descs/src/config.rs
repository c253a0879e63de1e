// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Dynamic configuration of descriptor validation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mz_dyncfg::{Config, ConfigSet};
use tracing::error;

pub const DESCRIPTOR_VALIDATION: Config<String> = Config::new(
    "descriptor_validation",
    "on",
    "When descriptors are validated: `on` (reads and writes), `read_only` or `off`.",
);

pub const DESCRIPTOR_VALIDATION_STORE_TIMEOUT: Config<Duration> = Config::new(
    "descriptor_validation_store_timeout",
    Duration::from_secs(30),
    "Upper bound on each batched catalog store read issued during validation. Zero disables it.",
);

/// Adds every descriptor validation config to `configs`.
pub fn all_descriptor_configs(configs: ConfigSet) -> ConfigSet {
    configs
        .add(&DESCRIPTOR_VALIDATION)
        .add(&DESCRIPTOR_VALIDATION_STORE_TIMEOUT)
}

/// Returns the store timeout configured in `configs`, if enabled.
pub fn store_timeout(configs: &ConfigSet) -> Option<Duration> {
    let timeout = DESCRIPTOR_VALIDATION_STORE_TIMEOUT.get(configs);
    (!timeout.is_zero()).then_some(timeout)
}

/// Answers whether descriptors are validated on read and on write paths.
pub trait DescriptorValidationModeProvider: fmt::Debug + Send + Sync {
    fn validate_descriptors_on_read(&self) -> bool;
    fn validate_descriptors_on_write(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorValidationMode {
    On,
    ReadOnly,
    Off,
}

impl DescriptorValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorValidationMode::On => "on",
            DescriptorValidationMode::ReadOnly => "read_only",
            DescriptorValidationMode::Off => "off",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid descriptor validation mode {0:?}, expected one of on, read_only, off")]
pub struct InvalidValidationMode(pub String);

impl FromStr for DescriptorValidationMode {
    type Err = InvalidValidationMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(DescriptorValidationMode::On),
            "read_only" => Ok(DescriptorValidationMode::ReadOnly),
            "off" => Ok(DescriptorValidationMode::Off),
            _ => Err(InvalidValidationMode(s.to_owned())),
        }
    }
}

impl DescriptorValidationModeProvider for DescriptorValidationMode {
    fn validate_descriptors_on_read(&self) -> bool {
        *self != DescriptorValidationMode::Off
    }

    fn validate_descriptors_on_write(&self) -> bool {
        *self == DescriptorValidationMode::On
    }
}

/// Reads [`DESCRIPTOR_VALIDATION`] on every call, so updates to the set take
/// effect immediately. An unparseable value validates everything.
impl DescriptorValidationModeProvider for ConfigSet {
    fn validate_descriptors_on_read(&self) -> bool {
        validation_mode(self).validate_descriptors_on_read()
    }

    fn validate_descriptors_on_write(&self) -> bool {
        validation_mode(self).validate_descriptors_on_write()
    }
}

fn validation_mode(configs: &ConfigSet) -> DescriptorValidationMode {
    let raw = DESCRIPTOR_VALIDATION.get(configs);
    raw.parse().unwrap_or_else(|err| {
        error!("{err}; validating descriptors on read and write");
        DescriptorValidationMode::On
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        for (raw, read, write) in [
            ("on", true, true),
            ("read_only", true, false),
            ("off", false, false),
            ("OFF ", false, false),
            ("garbage", true, true),
        ] {
            let configs = all_descriptor_configs(ConfigSet::default());
            DESCRIPTOR_VALIDATION.set(&configs, raw.to_owned());
            assert_eq!(configs.validate_descriptors_on_read(), read, "{raw}");
            assert_eq!(configs.validate_descriptors_on_write(), write, "{raw}");
        }
    }

    #[test]
    fn store_timeout_zero_disables() {
        let configs = all_descriptor_configs(ConfigSet::default());
        assert_eq!(store_timeout(&configs), Some(Duration::from_secs(30)));
        DESCRIPTOR_VALIDATION_STORE_TIMEOUT.set(&configs, Duration::ZERO);
        assert_eq!(store_timeout(&configs), None);
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [
            DescriptorValidationMode::On,
            DescriptorValidationMode::ReadOnly,
            DescriptorValidationMode::Off,
        ] {
            assert_eq!(mode.as_str().parse::<DescriptorValidationMode>(), Ok(mode));
        }
        assert_eq!(
            "nope".parse::<DescriptorValidationMode>(),
            Err(InvalidValidationMode("nope".into()))
        );
    }
}
