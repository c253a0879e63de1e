// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Dynamically updatable configuration.
//!
//! A `Config` is a typed, `const` handle declared next to the code that reads
//! it. Handles are registered into a `ConfigSet`, which owns the values.
//! Values in a set are shared: every clone of a `ConfigSet` observes updates
//! made through any other clone, while separately constructed sets are fully
//! independent (e.g. one per unit test).
//!
//! ```
//! # use mz_dyncfg::{Config, ConfigSet};
//! const FOO: Config<bool> = Config::new("foo", false, "description of foo");
//! fn bar(cfg: &ConfigSet) {
//!     assert_eq!(FOO.get(cfg), false);
//! }
//! fn main() {
//!     let cfg = ConfigSet::default().add(&FOO);
//!     bar(&cfg);
//! }
//! ```
//!
//! Updates travel between sets (or processes) as [`ConfigUpdates`], which are
//! plain serde values keyed by config name.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::error;

/// A handle to a dynamically updatable configuration value of type `T`.
///
/// The supported types are [bool], [u32], [usize], [String] and [Duration].
#[derive(Clone, Debug)]
pub struct Config<T: ConfigType> {
    name: &'static str,
    desc: &'static str,
    default: T::Default,
}

impl<T: ConfigType> Config<T> {
    /// Constructs a handle for a config of type `T`.
    ///
    /// Names must be unique within any [ConfigSet] the config is added to.
    pub const fn new(name: &'static str, default: T::Default, desc: &'static str) -> Self {
        Config {
            name,
            default,
            desc,
        }
    }

    /// The name of this config.
    pub fn name(&self) -> &str {
        self.name
    }

    /// The description of this config.
    pub fn desc(&self) -> &str {
        self.desc
    }

    /// The default value of this config.
    pub fn default(&self) -> &T::Default {
        &self.default
    }

    /// Returns the latest value of this config within the given set.
    ///
    /// Panics if this config was not previously added to the set.
    pub fn get(&self, set: &ConfigSet) -> T {
        T::get(T::shared(self, set).expect("config should be registered to set"))
    }

    /// Returns the shared value of this config in the given set, which
    /// amortizes the name lookup across many reads.
    pub fn shared(&self, set: &ConfigSet) -> Arc<T::Shared> {
        Arc::clone(T::shared(self, set).expect("config should be registered to set"))
    }

    /// [Self::get] except from a previously looked up shared value.
    pub fn get_from_shared(&self, shared: &T::Shared) -> T {
        T::get(shared)
    }

    /// Overwrites the value of this config within the given set.
    ///
    /// Panics if this config was not previously added to the set.
    pub fn set(&self, set: &ConfigSet, val: T) {
        T::set(
            T::shared(self, set).expect("config should be registered to set"),
            val,
        )
    }
}

/// A type usable as a [Config].
pub trait ConfigType: Sized {
    /// A const-compatible type for the default value of configs of this type.
    type Default: Into<Self> + Clone;
    /// The sharable storage for a value of this type.
    type Shared;

    /// Extracts the sharable value for a config of this type from a set.
    fn shared<'a>(config: &Config<Self>, vals: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>>;

    /// Converts this type to its type-erased enum equivalent.
    fn to_val(val: &Self) -> ConfigVal;

    /// Reads the current value out of its sharable storage.
    fn get(x: &Self::Shared) -> Self;

    /// Updates the sharable storage to the given value.
    fn set(x: &Self::Shared, val: Self);
}

/// A set of [Config]s with values independent of other [ConfigSet]s (even if
/// they contain the same configs).
#[derive(Clone, Default)]
pub struct ConfigSet {
    configs: BTreeMap<String, ConfigEntry>,
}

impl ConfigSet {
    /// Adds the given config to this set, returning `Self` for chaining.
    ///
    /// Panics if a config with the same name was already added.
    pub fn add<T: ConfigType>(mut self, config: &Config<T>) -> Self {
        let default: T = config.default.clone().into();
        let config = ConfigEntry {
            name: config.name,
            desc: config.desc,
            default: T::to_val(&default),
            val: T::to_val(&default),
        };
        if let Some(prev) = self.configs.insert(config.name.to_owned(), config) {
            panic!("{} registered twice", prev.name);
        }
        self
    }

    /// Returns the configs currently registered to this set.
    pub fn entries(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.configs.values()
    }

    /// Returns the entry for the config named `name`, if registered.
    pub fn entry(&self, name: &str) -> Option<&ConfigEntry> {
        self.configs.get(name)
    }
}

impl std::fmt::Debug for ConfigSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ConfigSet { configs } = self;
        f.debug_map()
            .entries(configs.iter().map(|(name, entry)| (name, entry.val())))
            .finish()
    }
}

/// An entry for a config in a [ConfigSet].
#[derive(Clone, Debug)]
pub struct ConfigEntry {
    name: &'static str,
    desc: &'static str,
    default: ConfigVal,
    val: ConfigVal,
}

impl ConfigEntry {
    /// The name of this config.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The description of this config.
    pub fn desc(&self) -> &'static str {
        self.desc
    }

    /// The default value of this config. Never updated.
    pub fn default(&self) -> &ConfigVal {
        &self.default
    }

    /// The shared value of this config in the set.
    pub fn val(&self) -> &ConfigVal {
        &self.val
    }
}

/// A type-erased [ConfigType::Shared].
#[derive(Clone, Debug)]
pub enum ConfigVal {
    /// A `bool` shared value.
    Bool(Arc<AtomicBool>),
    /// A `u32` shared value.
    U32(Arc<AtomicU32>),
    /// A `usize` shared value.
    Usize(Arc<AtomicUsize>),
    /// A `String` shared value.
    String(Arc<RwLock<String>>),
    /// A `Duration` shared value.
    Duration(Arc<RwLock<Duration>>),
}

impl ConfigVal {
    /// Takes a point-in-time copy of this value.
    pub fn snapshot(&self) -> ConfigUpdateVal {
        match self {
            ConfigVal::Bool(x) => ConfigUpdateVal::Bool(bool::get(x)),
            ConfigVal::U32(x) => ConfigUpdateVal::U32(u32::get(x)),
            ConfigVal::Usize(x) => ConfigUpdateVal::Usize(usize::get(x)),
            ConfigVal::String(x) => ConfigUpdateVal::String(String::get(x)),
            ConfigVal::Duration(x) => ConfigUpdateVal::Duration(Duration::get(x)),
        }
    }
}

/// A plain, serializable config value carried by [ConfigUpdates].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigUpdateVal {
    Bool(bool),
    U32(u32),
    Usize(usize),
    String(String),
    Duration(Duration),
}

/// A batch of config value updates, keyed by config name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdates {
    updates: BTreeMap<String, ConfigUpdateVal>,
}

impl ConfigUpdates {
    /// Adds the current value of the given config to this set of updates,
    /// replacing any earlier value for the same config.
    pub fn add(&mut self, config: &ConfigEntry) {
        self.updates
            .insert(config.name.to_owned(), config.val.snapshot());
    }

    /// Adds an explicit value for the config named `name`.
    pub fn add_dynamic(&mut self, name: &str, val: ConfigUpdateVal) {
        self.updates.insert(name.to_owned(), val);
    }

    /// Adds the entries in `other` to `self`, with `other` taking precedence.
    pub fn extend(&mut self, other: Self) {
        self.updates.extend(other.updates)
    }

    /// Applies these config updates to the given [ConfigSet].
    ///
    /// Updates for configs unknown to the set, and updates whose type does not
    /// match the registered config, are skipped and logged.
    pub fn apply(&self, set: &ConfigSet) {
        for (name, val) in self.updates.iter() {
            let Some(config) = set.configs.get(name) else {
                error!("config update {} {:?} not known set: {:?}", name, val, set);
                continue;
            };
            match (val, &config.val) {
                (ConfigUpdateVal::Bool(src), ConfigVal::Bool(dst)) => bool::set(dst, *src),
                (ConfigUpdateVal::U32(src), ConfigVal::U32(dst)) => u32::set(dst, *src),
                (ConfigUpdateVal::Usize(src), ConfigVal::Usize(dst)) => usize::set(dst, *src),
                (ConfigUpdateVal::String(src), ConfigVal::String(dst)) => {
                    String::set(dst, src.clone())
                }
                (ConfigUpdateVal::Duration(src), ConfigVal::Duration(dst)) => {
                    Duration::set(dst, *src)
                }
                (src, dst) => error!(
                    "config update {} type mismatch: {:?} vs {:?}",
                    name, src, dst
                ),
            }
        }
    }
}

mod impls {
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    use crate::{Config, ConfigSet, ConfigType, ConfigVal};

    macro_rules! atomic_config_type {
        ($ty:ty, $shared:ty, $variant:ident) => {
            impl ConfigType for $ty {
                type Default = $ty;
                type Shared = $shared;

                fn shared<'a>(
                    config: &Config<Self>,
                    vals: &'a ConfigSet,
                ) -> Option<&'a Arc<Self::Shared>> {
                    let entry = vals.configs.get(config.name)?;
                    match entry.val() {
                        ConfigVal::$variant(x) => Some(x),
                        x => panic!("expected {} value got {:?}", stringify!($ty), x),
                    }
                }
                fn to_val(val: &Self) -> ConfigVal {
                    ConfigVal::$variant(Arc::new(<$shared>::new(*val)))
                }
                fn set(x: &Self::Shared, val: Self) {
                    x.store(val, SeqCst);
                }
                fn get(x: &Self::Shared) -> Self {
                    x.load(SeqCst)
                }
            }
        };
    }

    atomic_config_type!(bool, AtomicBool, Bool);
    atomic_config_type!(u32, AtomicU32, U32);
    atomic_config_type!(usize, AtomicUsize, Usize);

    impl ConfigType for String {
        type Default = &'static str;
        type Shared = RwLock<String>;

        fn shared<'a>(config: &Config<Self>, vals: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>> {
            let entry = vals.configs.get(config.name)?;
            match entry.val() {
                ConfigVal::String(x) => Some(x),
                x => panic!("expected String value got {:?}", x),
            }
        }
        fn to_val(val: &Self) -> ConfigVal {
            ConfigVal::String(Arc::new(RwLock::new(val.clone())))
        }
        fn set(x: &Self::Shared, val: Self) {
            *x.write().expect("lock poisoned") = val;
        }
        fn get(x: &Self::Shared) -> Self {
            x.read().expect("lock poisoned").clone()
        }
    }

    impl ConfigType for Duration {
        type Default = Duration;
        type Shared = RwLock<Duration>;

        fn shared<'a>(config: &Config<Self>, vals: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>> {
            let entry = vals.configs.get(config.name)?;
            match entry.val() {
                ConfigVal::Duration(x) => Some(x),
                x => panic!("expected Duration value got {:?}", x),
            }
        }
        fn to_val(val: &Self) -> ConfigVal {
            ConfigVal::Duration(Arc::new(RwLock::new(*val)))
        }
        fn set(x: &Self::Shared, val: Self) {
            *x.write().expect("lock poisoned") = val;
        }
        fn get(x: &Self::Shared) -> Self {
            *x.read().expect("lock poisoned")
        }
    }
}
