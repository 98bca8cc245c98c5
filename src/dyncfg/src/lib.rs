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
//! Basic usage:
//! - A type-safe static `Config` is defined near where it is used.
//! - Once in the lifetime of a process, all interesting `Config`s are
//!   registered to a `ConfigSet`. The values within a `ConfigSet` are shared,
//!   though multiple `ConfigSet`s may be created and each are completely
//!   independent (i.e. one in each unit test).
//! - A `ConfigSet` is plumbed around as necessary and may be used to get or
//!   set the value of `Config`.
//!
//! ```
//! # use dl_dyncfg::{Config, ConfigSet};
//! const FOO: Config<bool> = Config::new("foo", false, "description of foo");
//! fn bar(cfg: &ConfigSet) {
//!     assert_eq!(FOO.get(&cfg), false);
//! }
//! fn main() {
//!     let cfg = ConfigSet::default().add(&FOO);
//!     bar(&cfg);
//! }
//! ```
//!
//! Values travel between processes (or from an operator's override file) as
//! [`ConfigUpdates`], which serialize with serde.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::error;

/// A handle to a dynamically updatable configuration value.
///
/// This represents a strongly-typed named config of type `T`. It may be
/// registered to a set of such configs with [ConfigSet::add] and then later
/// used to retrieve the latest value at any time with [Self::get].
///
/// The supported types are [bool], [usize], [String] and [Duration].
#[derive(Clone, Debug)]
pub struct Config<T: ConfigType> {
    name: &'static str,
    desc: &'static str,
    default: T::Default,
}

impl<T: ConfigType> Config<T> {
    /// Constructs a handle for a config of type `T`.
    ///
    /// It is best practice, but not strictly required, for the name to be
    /// globally unique within a process.
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
    /// Panics if this config was not previously registered to the set.
    pub fn get(&self, set: &ConfigSet) -> T {
        T::get(T::shared(self, set).expect("config should be registered to set"))
    }

    /// Returns the shared value of this config in the given set.
    ///
    /// This allows users to amortize the name lookup with
    /// `Self::get_from_shared`.
    pub fn shared(&self, set: &ConfigSet) -> Arc<T::Shared> {
        Arc::clone(T::shared(self, set).expect("config should be registered to set"))
    }

    /// [Self::get] except from a previously looked up shared value returned by
    /// [Self::shared].
    pub fn get_from_shared(&self, shared: &T::Shared) -> T {
        T::get(shared)
    }

    /// Overrides the value of this config within the given set.
    ///
    /// Every holder of the set (and of values previously returned by
    /// [Self::shared]) observes the new value.
    pub fn set(&self, set: &ConfigSet, val: T) {
        T::set(
            T::shared(self, set).expect("config should be registered to set"),
            val,
        )
    }
}

/// A type usable as a [Config].
pub trait ConfigType: Sized {
    /// A const-compatible type suitable for use as the default value of configs
    /// of this type.
    type Default: Into<Self> + Clone;
    /// A value of this type, sharable between config value updaters and
    /// config value retrievers.
    type Shared;

    /// Extracts the sharable value for a config of this type from a set.
    ///
    /// External users likely want [Config::shared] instead.
    fn shared<'a>(config: &Config<Self>, vals: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>>;

    /// Converts this type to its type-erased enum equivalent.
    fn to_val(val: &Self) -> ConfigVal;

    /// Retrieves the current config value of this type from a value of its
    /// corresponding sharable type.
    fn get(x: &Self::Shared) -> Self;

    /// Updates the sharable value for a config of this type to the given value.
    fn set(x: &Self::Shared, val: Self);
}

/// An set of [Config]s with values independent of other [ConfigSet]s (even if
/// they contain the same configs).
#[derive(Clone, Default)]
pub struct ConfigSet {
    configs: BTreeMap<String, ConfigEntry>,
}

impl ConfigSet {
    /// Adds the given config to this set.
    ///
    /// Names are required to be unique within a set, but each set is entirely
    /// independent. The same `Config` may be registered to multiple
    /// [ConfigSet]s and thus have independent values.
    ///
    /// Panics if a config with the same name has previously been registered to
    /// this set.
    pub fn add<T: ConfigType>(mut self, config: &Config<T>) -> Self {
        let config = ConfigEntry {
            name: config.name,
            desc: config.desc,
            default: T::to_val(&Into::<T>::into(config.default.clone())),
            val: T::to_val(&Into::<T>::into(config.default.clone())),
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
}

impl std::fmt::Debug for ConfigSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ConfigSet { configs } = self;
        f.debug_map()
            .entries(configs.iter().map(|(name, val)| (name, val.val())))
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

    /// The default value of this config.
    ///
    /// This value is never updated.
    pub fn default(&self) -> &ConfigVal {
        &self.default
    }

    /// The sharable value of this config in the set.
    pub fn val(&self) -> &ConfigVal {
        &self.val
    }
}

/// A type-erased [ConfigType::Shared] for when set of different types are
/// stored in a collection.
#[derive(Clone, Debug)]
pub enum ConfigVal {
    /// A `bool` shared value.
    Bool(Arc<AtomicBool>),
    /// A `usize` shared value.
    Usize(Arc<AtomicU64>),
    /// A `String` shared value.
    String(Arc<RwLock<String>>),
    /// A 'Duration' shared value.
    Duration(Arc<RwLock<Duration>>),
}

/// A plain, serializable snapshot of a [ConfigVal].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigUpdate {
    /// A `bool` value.
    Bool(bool),
    /// A `usize` value.
    Usize(u64),
    /// A `String` value.
    String(String),
    /// A `Duration` value.
    Duration(Duration),
}

impl From<&ConfigVal> for ConfigUpdate {
    fn from(val: &ConfigVal) -> ConfigUpdate {
        match val {
            ConfigVal::Bool(x) => ConfigUpdate::Bool(bool::get(x)),
            ConfigVal::Usize(x) => ConfigUpdate::Usize(impls::usize_to_u64(usize::get(x))),
            ConfigVal::String(x) => ConfigUpdate::String(String::get(x)),
            ConfigVal::Duration(x) => ConfigUpdate::Duration(Duration::get(x)),
        }
    }
}

/// A set of config value updates, keyed by config name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdates {
    updates: BTreeMap<String, ConfigUpdate>,
}

impl ConfigUpdates {
    /// Adds the current value of the given config to this set of updates.
    ///
    /// If a value of the same config has previously been added to these
    /// updates, replaces it.
    pub fn add(&mut self, config: &ConfigEntry) {
        self.updates
            .insert(config.name.to_owned(), ConfigUpdate::from(&config.val));
    }

    /// Adds an update for the config with the given name.
    pub fn add_dynamic(&mut self, name: &str, val: ConfigUpdate) {
        self.updates.insert(name.to_owned(), val);
    }

    /// Adds the entries in `other` to `self`, with `other` taking precedence.
    pub fn extend(&mut self, other: Self) {
        self.updates.extend(other.updates)
    }

    /// Applies these config updates to the given [ConfigSet].
    ///
    /// This doesn't need to be the same set that the value updates were added
    /// from.
    ///
    /// The value updates for any configs unknown by the given set are skipped.
    /// Ditto for config type mismatches. Both are logged.
    pub fn apply(&self, set: &ConfigSet) {
        for (name, val) in self.updates.iter() {
            let Some(config) = set.configs.get(name) else {
                error!("config update {} {:?} not known set: {:?}", name, val, set);
                continue;
            };
            match (val, &config.val) {
                (ConfigUpdate::Bool(src), ConfigVal::Bool(dst)) => bool::set(dst, *src),
                (ConfigUpdate::Usize(src), ConfigVal::Usize(dst)) => {
                    usize::set(dst, impls::u64_to_usize(*src))
                }
                (ConfigUpdate::String(src), ConfigVal::String(dst)) => {
                    String::set(dst, src.clone())
                }
                (ConfigUpdate::Duration(src), ConfigVal::Duration(dst)) => {
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
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    use crate::{Config, ConfigSet, ConfigType, ConfigVal};

    pub(crate) fn usize_to_u64(val: usize) -> u64 {
        u64::try_from(val).unwrap_or(u64::MAX)
    }

    pub(crate) fn u64_to_usize(val: u64) -> usize {
        usize::try_from(val).unwrap_or(usize::MAX)
    }

    impl ConfigType for bool {
        type Default = bool;
        type Shared = AtomicBool;

        fn shared<'a>(config: &Config<Self>, vals: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>> {
            let entry = vals.configs.get(config.name)?;
            match entry.val() {
                ConfigVal::Bool(x) => Some(x),
                x => panic!("expected bool value got {:?}", x),
            }
        }
        fn to_val(val: &Self) -> ConfigVal {
            ConfigVal::Bool(Arc::new((*val).into()))
        }
        fn set(x: &Self::Shared, val: Self) {
            x.store(val, SeqCst);
        }
        fn get(x: &Self::Shared) -> Self {
            x.load(SeqCst)
        }
    }

    impl ConfigType for usize {
        type Default = usize;
        type Shared = AtomicU64;

        fn shared<'a>(config: &Config<Self>, vals: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>> {
            let entry = vals.configs.get(config.name)?;
            match entry.val() {
                ConfigVal::Usize(x) => Some(x),
                x => panic!("expected usize value got {:?}", x),
            }
        }
        fn to_val(val: &Self) -> ConfigVal {
            ConfigVal::Usize(Arc::new(usize_to_u64(*val).into()))
        }
        fn set(x: &Self::Shared, val: Self) {
            x.store(usize_to_u64(val), SeqCst);
        }
        fn get(x: &Self::Shared) -> Self {
            u64_to_usize(x.load(SeqCst))
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    const BOOL: Config<bool> = Config::new("bool", true, "");
    const USIZE: Config<usize> = Config::new("usize", 1, "");
    const STRING: Config<String> = Config::new("string", "a", "");
    const DURATION: Config<Duration> = Config::new("duration", Duration::from_secs(60), "");

    #[test]
    fn all_types() {
        let configs = ConfigSet::default()
            .add(&BOOL)
            .add(&USIZE)
            .add(&STRING)
            .add(&DURATION);
        assert_eq!(BOOL.get(&configs), true);
        assert_eq!(USIZE.get(&configs), 1);
        assert_eq!(STRING.get(&configs), "a");
        assert_eq!(DURATION.get(&configs), Duration::from_secs(60));

        BOOL.set(&configs, false);
        USIZE.set(&configs, 2);
        STRING.set(&configs, "b".to_owned());
        DURATION.set(&configs, Duration::from_secs(1));
        assert_eq!(BOOL.get(&configs), false);
        assert_eq!(USIZE.get(&configs), 2);
        assert_eq!(STRING.get(&configs), "b");
        assert_eq!(DURATION.get(&configs), Duration::from_secs(1));
    }

    #[test]
    fn config_set() {
        let c0 = ConfigSet::default().add(&USIZE);
        assert_eq!(USIZE.get(&c0), 1);
        USIZE.set(&c0, 2);
        assert_eq!(USIZE.get(&c0), 2);

        // Each ConfigSet is independent, even if they contain the same set of
        // configs.
        let c1 = ConfigSet::default().add(&USIZE);
        assert_eq!(USIZE.get(&c1), 1);
        USIZE.set(&c1, 3);
        assert_eq!(USIZE.get(&c1), 3);
        assert_eq!(USIZE.get(&c0), 2);

        // We can copy values from one to the other, though.
        let mut updates = ConfigUpdates::default();
        for e in c0.entries() {
            updates.add(e);
        }
        assert_eq!(USIZE.get(&c1), 3);
        updates.apply(&c1);
        assert_eq!(USIZE.get(&c1), 2);
    }

    #[test]
    fn updates_roundtrip_through_json() {
        let mut updates = ConfigUpdates::default();
        updates.add_dynamic("bool", ConfigUpdate::Bool(false));
        updates.add_dynamic("duration", ConfigUpdate::Duration(Duration::from_secs(5)));
        // Unknown names and mismatched types are skipped.
        updates.add_dynamic("missing", ConfigUpdate::Usize(7));
        updates.add_dynamic("usize", ConfigUpdate::String("x".into()));

        let json = serde_json::to_string(&updates).unwrap();
        let decoded: ConfigUpdates = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, updates);

        let configs = ConfigSet::default()
            .add(&BOOL)
            .add(&USIZE)
            .add(&DURATION);
        decoded.apply(&configs);
        assert_eq!(BOOL.get(&configs), false);
        assert_eq!(USIZE.get(&configs), 1);
        assert_eq!(DURATION.get(&configs), Duration::from_secs(5));
    }

    #[test]
    #[should_panic(expected = "usize registered twice")]
    fn duplicate_registration() {
        let _ = ConfigSet::default().add(&USIZE).add(&USIZE);
    }
}
