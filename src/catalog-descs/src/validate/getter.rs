// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;

use crate::descriptor::{DescriptorId, DescriptorKind, DescriptorRef};

/// Why a referenced descriptor could not be used.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("referenced descriptor {id} not found")]
    NotFound { id: DescriptorId },
    #[error("referenced descriptor {id} is a {actual}, expected a {expected}")]
    WrongKind {
        id: DescriptorId,
        expected: DescriptorKind,
        actual: DescriptorKind,
    },
    #[error("referenced {kind} {id} is dropped")]
    Dropped { id: DescriptorId, kind: DescriptorKind },
}

/// The descriptors resolved for one cross-reference validation pass.
///
/// Holds the descriptors being validated plus everything they refer to that
/// could be resolved.
#[derive(Debug, Default)]
pub struct DescriptorGetter {
    descs: BTreeMap<DescriptorId, DescriptorRef>,
}

impl DescriptorGetter {
    pub(crate) fn insert(&mut self, desc: DescriptorRef) {
        self.descs.entry(desc.id()).or_insert(desc);
    }

    pub fn contains(&self, id: DescriptorId) -> bool {
        self.descs.contains_key(&id)
    }

    pub fn get(&self, id: DescriptorId) -> Result<&DescriptorRef, LookupError> {
        self.descs.get(&id).ok_or(LookupError::NotFound { id })
    }

    /// Like [`Self::get`], but also rejects dropped descriptors.
    pub fn get_live(&self, id: DescriptorId) -> Result<&DescriptorRef, LookupError> {
        let desc = self.get(id)?;
        if desc.dropped() {
            return Err(LookupError::Dropped {
                id,
                kind: desc.kind(),
            });
        }
        Ok(desc)
    }

    /// Returns the live descriptor `id`, which must be of kind `expected`.
    pub fn get_of_kind(
        &self,
        id: DescriptorId,
        expected: DescriptorKind,
    ) -> Result<&DescriptorRef, LookupError> {
        let desc = self.get_live(id)?;
        if desc.kind() != expected {
            return Err(LookupError::WrongKind {
                id,
                expected,
                actual: desc.kind(),
            });
        }
        Ok(desc)
    }

    pub fn get_database(&self, id: DescriptorId) -> Result<&DescriptorRef, LookupError> {
        self.get_of_kind(id, DescriptorKind::Database)
    }

    pub fn get_schema(&self, id: DescriptorId) -> Result<&DescriptorRef, LookupError> {
        self.get_of_kind(id, DescriptorKind::Schema)
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }
}

impl FromIterator<DescriptorRef> for DescriptorGetter {
    fn from_iter<T: IntoIterator<Item = DescriptorRef>>(iter: T) -> Self {
        let mut getter = DescriptorGetter::default();
        for desc in iter {
            getter.insert(desc);
        }
        getter
    }
}
