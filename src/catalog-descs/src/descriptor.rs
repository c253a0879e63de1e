// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The view of a schema object that validation needs.
//!
//! What makes a particular kind of descriptor valid is defined by its
//! implementation of [`Descriptor`]; this crate only drives the checks and
//! supplies the objects a descriptor refers to.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::validate::{DescriptorGetter, ValidationErrorAccumulator};
use crate::version::ClusterVersion;

/// The catalog-wide unique identifier of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DescriptorId(pub u32);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DescriptorId {
    fn from(id: u32) -> Self {
        DescriptorId(id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DescriptorKind {
    Database,
    Schema,
    Table,
    View,
    Type,
}

impl DescriptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorKind::Database => "database",
            DescriptorKind::Schema => "schema",
            DescriptorKind::Table => "table",
            DescriptorKind::View => "view",
            DescriptorKind::Type => "type",
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key of a namespace entry: a name qualified by its parent database and
/// parent schema. Databases have neither parent; schemas have no parent
/// schema.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameInfo {
    pub parent_id: Option<DescriptorId>,
    pub parent_schema_id: Option<DescriptorId>,
    pub name: String,
}

impl NameInfo {
    pub fn new(
        parent_id: Option<DescriptorId>,
        parent_schema_id: Option<DescriptorId>,
        name: impl Into<String>,
    ) -> Self {
        NameInfo {
            parent_id,
            parent_schema_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for NameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = |id: Option<DescriptorId>| id.map_or(0, |id| id.0);
        write!(
            f,
            "({}, {}, {:?})",
            id(self.parent_id),
            id(self.parent_schema_id),
            self.name
        )
    }
}

/// A schema object: a database, schema, table, view or type.
///
/// Descriptors are immutable. An edit within a transaction produces a new
/// value with a higher version, which replaces the old one in the
/// transaction's uncommitted set.
pub trait Descriptor: fmt::Debug + Send + Sync {
    fn id(&self) -> DescriptorId;

    fn version(&self) -> u64;

    fn kind(&self) -> DescriptorKind;

    fn name(&self) -> &str;

    /// The database containing this descriptor. `None` for databases.
    fn parent_id(&self) -> Option<DescriptorId>;

    /// The schema containing this descriptor. `None` for databases and
    /// schemas.
    fn parent_schema_id(&self) -> Option<DescriptorId>;

    /// Whether this descriptor has been dropped and awaits cleanup.
    fn dropped(&self) -> bool;

    /// IDs of every descriptor this one refers to, in either direction,
    /// excluding its parents.
    fn referenced_ids(&self) -> BTreeSet<DescriptorId>;

    /// The namespace key under which this descriptor is named.
    fn name_info(&self) -> NameInfo {
        NameInfo::new(self.parent_id(), self.parent_schema_id(), self.name())
    }

    /// Checks internal consistency, reporting violations to `vea`.
    fn validate_self(&self, version: ClusterVersion, vea: &mut ValidationErrorAccumulator);

    /// Checks this descriptor's references against the descriptors they
    /// point to. Parent existence and dangling references are already checked
    /// by the caller.
    fn validate_cross_references(
        &self,
        _version: ClusterVersion,
        _vea: &mut ValidationErrorAccumulator,
        _getter: &DescriptorGetter,
    ) {
    }

    /// Checks that only hold for a descriptor about to be committed.
    fn validate_txn_commit(&self, _version: ClusterVersion, _vea: &mut ValidationErrorAccumulator) {
    }
}

/// A shared handle to an immutable descriptor.
pub type DescriptorRef = Arc<dyn Descriptor>;
