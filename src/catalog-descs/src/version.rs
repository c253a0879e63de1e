// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Cluster versions and the gate that reports the active one.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// A version of the cluster's persisted catalog format and rule set.
///
/// Versions are totally ordered by `(major, minor, internal)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
    pub internal: u32,
}

impl ClusterVersion {
    pub const fn new(major: u32, minor: u32, internal: u32) -> Self {
        ClusterVersion {
            major,
            minor,
            internal,
        }
    }

    /// Reports whether the feature gated by `key` is active at this version.
    pub fn is_active(&self, key: ClusterVersionKey) -> bool {
        *self >= key.version()
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}-{}", self.major, self.minor, self.internal)
    }
}

/// Named version gates for validation behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterVersionKey {
    /// The oldest version this crate knows how to validate.
    BaseVersion,
    /// Descriptors are checked against their namespace entries.
    NamespaceValidation,
}

impl ClusterVersionKey {
    /// The newest known gate.
    pub const LATEST: ClusterVersionKey = ClusterVersionKey::NamespaceValidation;

    pub fn version(self) -> ClusterVersion {
        match self {
            ClusterVersionKey::BaseVersion => ClusterVersion::new(1, 0, 0),
            ClusterVersionKey::NamespaceValidation => ClusterVersion::new(1, 0, 2),
        }
    }
}

/// Supplies the cluster version active in this process.
pub trait VersionGate: fmt::Debug + Send + Sync {
    fn active_version(&self) -> ClusterVersion;
}

impl VersionGate for ClusterVersion {
    fn active_version(&self) -> ClusterVersion {
        *self
    }
}

/// A [`VersionGate`] whose version can be bumped while it is shared, e.g.
/// during an upgrade.
#[derive(Clone, Debug)]
pub struct SharedVersionGate {
    version: Arc<RwLock<ClusterVersion>>,
}

impl SharedVersionGate {
    pub fn new(version: ClusterVersion) -> Self {
        SharedVersionGate {
            version: Arc::new(RwLock::new(version)),
        }
    }

    /// Sets the active version. Versions never move backwards; an older
    /// `version` is ignored.
    pub fn bump(&self, version: ClusterVersion) {
        let mut active = self.version.write().expect("lock poisoned");
        if version > *active {
            *active = version;
        }
    }
}

impl VersionGate for SharedVersionGate {
    fn active_version(&self) -> ClusterVersion {
        *self.version.read().expect("lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_gates() {
        let base = ClusterVersionKey::BaseVersion.version();
        let ns = ClusterVersionKey::NamespaceValidation.version();
        assert!(base < ns);
        assert!(ClusterVersion::new(1, 1, 0) > ns);
        assert!(!base.is_active(ClusterVersionKey::NamespaceValidation));
        assert!(ns.is_active(ClusterVersionKey::BaseVersion));
        assert_eq!(ns.to_string(), "1.0-2");
    }

    #[test]
    fn shared_gate_only_moves_forward() {
        let gate = SharedVersionGate::new(ClusterVersionKey::BaseVersion.version());
        let clone = gate.clone();
        clone.bump(ClusterVersionKey::LATEST.version());
        assert_eq!(gate.active_version(), ClusterVersionKey::LATEST.version());
        clone.bump(ClusterVersionKey::BaseVersion.version());
        assert_eq!(gate.active_version(), ClusterVersionKey::LATEST.version());
    }
}
