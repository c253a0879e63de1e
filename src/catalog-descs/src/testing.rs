// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Helpers for testing code that validates descriptors.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::descriptor::{Descriptor, DescriptorId, DescriptorKind, DescriptorRef, NameInfo};
use crate::stored::{CatalogStore, Txn};
use crate::validate::{DescriptorGetter, ValidationErrorAccumulator};
use crate::version::{ClusterVersion, ClusterVersionKey};

/// A descriptor with just enough structure to exercise every validation
/// level, plus knobs for planting violations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestDescriptor {
    pub id: DescriptorId,
    pub version: u64,
    pub kind: DescriptorKind,
    pub name: String,
    pub parent_id: Option<DescriptorId>,
    pub parent_schema_id: Option<DescriptorId>,
    pub dropped: bool,
    /// Descriptors this one depends on.
    pub references: BTreeSet<DescriptorId>,
    /// Descriptors that must refer to this one. Also reported as references,
    /// so that they are resolved for cross-reference validation.
    pub back_references: BTreeSet<DescriptorId>,
    /// Reported verbatim by self validation.
    pub defects: Vec<String>,
    /// Reported verbatim by pre-commit validation.
    pub commit_defects: Vec<String>,
}

impl TestDescriptor {
    fn new(
        id: u32,
        kind: DescriptorKind,
        name: impl Into<String>,
        parent_id: Option<u32>,
        parent_schema_id: Option<u32>,
    ) -> Self {
        TestDescriptor {
            id: DescriptorId(id),
            version: 1,
            kind,
            name: name.into(),
            parent_id: parent_id.map(DescriptorId),
            parent_schema_id: parent_schema_id.map(DescriptorId),
            dropped: false,
            references: BTreeSet::new(),
            back_references: BTreeSet::new(),
            defects: Vec::new(),
            commit_defects: Vec::new(),
        }
    }

    pub fn database(id: u32, name: impl Into<String>) -> Self {
        Self::new(id, DescriptorKind::Database, name, None, None)
    }

    pub fn schema(id: u32, parent_id: u32, name: impl Into<String>) -> Self {
        Self::new(id, DescriptorKind::Schema, name, Some(parent_id), None)
    }

    pub fn table(id: u32, parent_id: u32, parent_schema_id: u32, name: impl Into<String>) -> Self {
        Self::new(
            id,
            DescriptorKind::Table,
            name,
            Some(parent_id),
            Some(parent_schema_id),
        )
    }

    pub fn view(id: u32, parent_id: u32, parent_schema_id: u32, name: impl Into<String>) -> Self {
        Self::new(
            id,
            DescriptorKind::View,
            name,
            Some(parent_id),
            Some(parent_schema_id),
        )
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reference(mut self, id: u32) -> Self {
        self.references.insert(DescriptorId(id));
        self
    }

    pub fn with_back_reference(mut self, id: u32) -> Self {
        self.back_references.insert(DescriptorId(id));
        self
    }

    pub fn with_defect(mut self, defect: impl Into<String>) -> Self {
        self.defects.push(defect.into());
        self
    }

    pub fn with_commit_defect(mut self, defect: impl Into<String>) -> Self {
        self.commit_defects.push(defect.into());
        self
    }

    pub fn dropped(mut self) -> Self {
        self.dropped = true;
        self
    }

    pub fn into_ref(self) -> DescriptorRef {
        Arc::new(self)
    }
}

impl Descriptor for TestDescriptor {
    fn id(&self) -> DescriptorId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn kind(&self) -> DescriptorKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parent_id(&self) -> Option<DescriptorId> {
        self.parent_id
    }

    fn parent_schema_id(&self) -> Option<DescriptorId> {
        self.parent_schema_id
    }

    fn dropped(&self) -> bool {
        self.dropped
    }

    fn referenced_ids(&self) -> BTreeSet<DescriptorId> {
        self.references
            .union(&self.back_references)
            .copied()
            .collect()
    }

    fn validate_self(&self, version: ClusterVersion, vea: &mut ValidationErrorAccumulator) {
        if self.name.is_empty() {
            vea.report("empty name");
        }
        if self.version == 0 {
            vea.report("invalid version 0");
        }
        let has_parent = self.parent_id.is_some();
        let has_schema = self.parent_schema_id.is_some();
        match (self.kind, has_parent, has_schema) {
            (DescriptorKind::Database, false, false) | (DescriptorKind::Schema, true, false) => {}
            (DescriptorKind::Database, _, _) => vea.report("database cannot have parents"),
            (DescriptorKind::Schema, _, _) => {
                vea.report("schema must have a parent database and no parent schema")
            }
            (_, true, true) => {}
            (_, _, _) => vea.report("missing parent database or schema"),
        }
        if self.references.contains(&self.id) {
            vea.report("descriptor references itself");
        }
        // Names were allowed to carry surrounding whitespace before namespace
        // validation existed.
        if version.is_active(ClusterVersionKey::NamespaceValidation)
            && self.name.trim() != self.name
        {
            vea.report("name has surrounding whitespace");
        }
        for defect in &self.defects {
            vea.report(defect);
        }
    }

    fn validate_cross_references(
        &self,
        _version: ClusterVersion,
        vea: &mut ValidationErrorAccumulator,
        getter: &DescriptorGetter,
    ) {
        for id in &self.back_references {
            match getter.get(*id) {
                Err(err) => vea.report(err),
                Ok(other) if !other.referenced_ids().contains(&self.id) => vea.report(format!(
                    "{} {} is missing back-reference to {}",
                    other.kind(),
                    id,
                    self.id
                )),
                Ok(_) => {}
            }
        }
    }

    fn validate_txn_commit(&self, _version: ClusterVersion, vea: &mut ValidationErrorAccumulator) {
        for defect in &self.commit_defects {
            vea.report(defect);
        }
    }
}

/// Wraps a [`CatalogStore`], recording every request and optionally
/// misbehaving.
#[derive(Debug)]
pub struct InstrumentedStore {
    inner: Arc<dyn CatalogStore>,
    state: Mutex<InstrumentedState>,
}

#[derive(Debug, Default)]
struct InstrumentedState {
    descriptor_requests: Vec<Vec<DescriptorId>>,
    name_requests: Vec<Vec<NameInfo>>,
    failure: Option<String>,
    hang: bool,
    truncate: bool,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn CatalogStore>) -> Self {
        InstrumentedStore {
            inner,
            state: Mutex::new(InstrumentedState::default()),
        }
    }

    /// Fails every subsequent request with `msg`.
    pub fn fail_with(&self, msg: impl Into<String>) {
        self.state.lock().expect("lock poisoned").failure = Some(msg.into());
    }

    /// Never completes any subsequent request.
    pub fn hang(&self) {
        self.state.lock().expect("lock poisoned").hang = true;
    }

    /// Drops the last result of every subsequent response.
    pub fn truncate_results(&self) {
        self.state.lock().expect("lock poisoned").truncate = true;
    }

    /// Restores normal behavior.
    pub fn heal(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.failure = None;
        state.hang = false;
        state.truncate = false;
    }

    /// The number of requests of either kind received so far.
    pub fn calls(&self) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.descriptor_requests.len() + state.name_requests.len()
    }

    pub fn descriptor_requests(&self) -> Vec<Vec<DescriptorId>> {
        self.state
            .lock()
            .expect("lock poisoned")
            .descriptor_requests
            .clone()
    }

    pub fn name_requests(&self) -> Vec<Vec<NameInfo>> {
        self.state
            .lock()
            .expect("lock poisoned")
            .name_requests
            .clone()
    }

    /// Records a request and returns how to treat it: `Err` to fail it,
    /// `Ok(true)` to truncate its response.
    async fn intercept(&self, record: impl FnOnce(&mut InstrumentedState)) -> Result<bool, anyhow::Error> {
        let (failure, hang, truncate) = {
            let mut state = self.state.lock().expect("lock poisoned");
            record(&mut state);
            (state.failure.clone(), state.hang, state.truncate)
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        match failure {
            Some(msg) => Err(anyhow!(msg)),
            None => Ok(truncate),
        }
    }
}

#[async_trait]
impl CatalogStore for InstrumentedStore {
    async fn get_descriptors(
        &self,
        txn: &Txn,
        version: ClusterVersion,
        ids: &[DescriptorId],
    ) -> Result<Vec<Option<DescriptorRef>>, anyhow::Error> {
        let truncate = self
            .intercept(|state| state.descriptor_requests.push(ids.to_vec()))
            .await?;
        let mut ret = self.inner.get_descriptors(txn, version, ids).await?;
        if truncate {
            ret.pop();
        }
        Ok(ret)
    }

    async fn get_descriptor_ids(
        &self,
        txn: &Txn,
        names: &[NameInfo],
    ) -> Result<Vec<Option<DescriptorId>>, anyhow::Error> {
        let truncate = self
            .intercept(|state| state.name_requests.push(names.to_vec()))
            .await?;
        let mut ret = self.inner.get_descriptor_ids(txn, names).await?;
        if truncate {
            ret.pop();
        }
        Ok(ret)
    }
}
