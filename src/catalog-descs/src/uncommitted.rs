// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::descriptor::{DescriptorId, DescriptorRef};

/// The descriptors added, modified or dropped by the current transaction and
/// not yet committed.
///
/// Holds at most one descriptor per ID: the most recent one written.
#[derive(Debug, Default)]
pub struct UncommittedDescriptors {
    descs: BTreeMap<DescriptorId, DescriptorRef>,
}

impl UncommittedDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `desc` as the current state of its ID, returning the value it
    /// replaces.
    pub fn upsert(&mut self, desc: DescriptorRef) -> Option<DescriptorRef> {
        self.descs.insert(desc.id(), desc)
    }

    /// Returns the uncommitted descriptor for `id`, if any.
    pub fn get_by_id(&self, id: DescriptorId) -> Option<&DescriptorRef> {
        self.descs.get(&id)
    }

    pub fn contains(&self, id: DescriptorId) -> bool {
        self.descs.contains_key(&id)
    }

    pub fn remove(&mut self, id: DescriptorId) -> Option<DescriptorRef> {
        self.descs.remove(&id)
    }

    /// Calls `f` on each uncommitted descriptor in ascending ID order,
    /// stopping at the first error.
    pub fn iterate_by_id<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&DescriptorRef) -> Result<(), E>,
    {
        for desc in self.descs.values() {
            f(desc)?;
        }
        Ok(())
    }

    /// Returns every uncommitted descriptor in ascending ID order.
    pub fn descriptors(&self) -> Vec<DescriptorRef> {
        self.descs.values().map(Arc::clone).collect()
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Forgets every uncommitted descriptor, e.g. on commit or rollback.
    pub fn reset(&mut self) {
        self.descs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDescriptor;

    #[test]
    fn last_write_wins() {
        let mut uncommitted = UncommittedDescriptors::new();
        assert!(uncommitted.is_empty());

        let v1 = TestDescriptor::database(1, "db").into_ref();
        let v2 = TestDescriptor::database(1, "renamed")
            .with_version(2)
            .into_ref();
        assert!(uncommitted.upsert(v1).is_none());
        let prev = uncommitted.upsert(Arc::clone(&v2)).expect("replaced");
        assert_eq!(prev.name(), "db");
        assert_eq!(uncommitted.len(), 1);
        assert_eq!(
            uncommitted.get_by_id(DescriptorId(1)).map(|d| d.version()),
            Some(2)
        );
    }

    #[test]
    fn iterates_in_id_order_and_stops_on_error() {
        let mut uncommitted = UncommittedDescriptors::new();
        for id in [7, 3, 5] {
            uncommitted.upsert(TestDescriptor::database(id, format!("db{id}")).into_ref());
        }

        let mut seen = Vec::new();
        uncommitted
            .iterate_by_id(|desc| {
                seen.push(desc.id().0);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(seen, vec![3, 5, 7]);

        let mut seen = Vec::new();
        let res = uncommitted.iterate_by_id(|desc| {
            seen.push(desc.id().0);
            if desc.id().0 == 5 {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(res, Err("stop"));
        assert_eq!(seen, vec![3, 5]);

        assert!(uncommitted.remove(DescriptorId(5)).is_some());
        assert!(!uncommitted.contains(DescriptorId(5)));
        uncommitted.reset();
        assert!(uncommitted.is_empty());
    }
}
