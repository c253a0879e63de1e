// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The transaction-scoped descriptor collection and its validation entry
//! points.

use std::sync::Arc;

use async_trait::async_trait;
use mz_dyncfg::ConfigSet;
use tracing::debug;

use crate::config::{self, DescriptorValidationModeProvider};
use crate::descriptor::{DescriptorId, DescriptorRef, NameInfo};
use crate::error::{CombinedError, DereferenceError, DescsError};
use crate::metrics::Metrics;
use crate::stored::{CatalogStore, StoreDereferencer, Txn};
use crate::uncommitted::UncommittedDescriptors;
use crate::validate::{
    self, RuleEngine, ValidationDereferencer, ValidationLevel, ValidationTelemetry, Validator,
};
use crate::version::{ClusterVersion, VersionGate};

/// The descriptors one transaction works with: its uncommitted changes, and
/// access to the durable catalog underneath them.
///
/// A collection belongs to a single transaction and is not meant to be used
/// from more than one task at a time.
#[derive(Debug)]
pub struct Collection {
    uncommitted: UncommittedDescriptors,
    stored: Arc<dyn CatalogStore>,
    configs: ConfigSet,
    validation_mode_provider: Arc<dyn DescriptorValidationModeProvider>,
    version_gate: Arc<dyn VersionGate>,
    validator: Arc<dyn Validator>,
    metrics: Arc<Metrics>,
    skip_validation_on_write: bool,
}

impl Collection {
    /// Creates an empty collection over `stored`.
    ///
    /// The validation policy and store timeout are read from `configs`, which
    /// must have [`config::all_descriptor_configs`] registered. Validation
    /// uses a [`RuleEngine`] unless replaced with [`Self::with_validator`].
    pub fn new(
        stored: Arc<dyn CatalogStore>,
        configs: ConfigSet,
        version_gate: Arc<dyn VersionGate>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Collection {
            uncommitted: UncommittedDescriptors::new(),
            stored,
            validation_mode_provider: Arc::new(configs.clone()),
            configs,
            version_gate,
            validator: Arc::new(RuleEngine::new(Arc::clone(&metrics))),
            metrics,
            skip_validation_on_write: false,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_validation_mode_provider(
        mut self,
        provider: Arc<dyn DescriptorValidationModeProvider>,
    ) -> Self {
        self.validation_mode_provider = provider;
        self
    }

    /// Skips [`Self::validate_uncommitted_descriptors`] regardless of policy,
    /// e.g. while repairing a corrupt catalog.
    pub fn set_skip_validation_on_write(&mut self, skip: bool) {
        self.skip_validation_on_write = skip;
    }

    pub fn uncommitted(&self) -> &UncommittedDescriptors {
        &self.uncommitted
    }

    /// The uncommitted set, for the transaction to record its changes in.
    pub fn uncommitted_mut(&mut self) -> &mut UncommittedDescriptors {
        &mut self.uncommitted
    }

    /// Validates `descriptors` up to `target_level`, resolving anything they
    /// refer to through this collection's uncommitted descriptors and then
    /// the store.
    ///
    /// Does nothing if validation is disabled on both reads and writes.
    pub async fn validate(
        &self,
        txn: &Txn,
        telemetry: ValidationTelemetry,
        target_level: ValidationLevel,
        descriptors: &[DescriptorRef],
    ) -> Result<(), DescsError> {
        if !self.validation_mode_provider.validate_descriptors_on_read()
            && !self.validation_mode_provider.validate_descriptors_on_write()
        {
            debug!(txn = txn.id(), "descriptor validation disabled");
            return Ok(());
        }
        let vd = self.new_validation_dereferencer(txn);
        let version = self.version_gate.active_version();
        self.validator
            .validate(version, &vd, telemetry, target_level, descriptors)
            .await?
            .combined_error()?;
        Ok(())
    }

    /// Validates every uncommitted descriptor, including cross-references, as
    /// done before commit.
    ///
    /// Referenced descriptors are read from the store unless they are
    /// themselves uncommitted. Leased descriptors are deliberately not used:
    /// they may be one version behind and legitimately lack back-references,
    /// which would fail validation.
    pub async fn validate_uncommitted_descriptors(&self, txn: &Txn) -> Result<(), DescsError> {
        if self.skip_validation_on_write
            || !self.validation_mode_provider.validate_descriptors_on_write()
        {
            return Ok(());
        }
        let descs = self.uncommitted.descriptors();
        if descs.is_empty() {
            return Ok(());
        }
        self.validate(txn, ValidationTelemetry::Write, validate::WRITE, &descs)
            .await
    }

    fn new_validation_dereferencer<'a>(&'a self, txn: &'a Txn) -> CollectionBackedDereferencer<'a> {
        CollectionBackedDereferencer {
            uncommitted: &self.uncommitted,
            metrics: &self.metrics,
            sd: StoreDereferencer::new(
                self.stored.as_ref(),
                txn,
                config::store_timeout(&self.configs),
            ),
        }
    }
}

/// A [`ValidationDereferencer`] that prefers a collection's uncommitted
/// descriptors and falls back to the store for everything else.
#[derive(Debug)]
struct CollectionBackedDereferencer<'a> {
    uncommitted: &'a UncommittedDescriptors,
    metrics: &'a Metrics,
    sd: StoreDereferencer<'a>,
}

#[async_trait]
impl ValidationDereferencer for CollectionBackedDereferencer<'_> {
    async fn dereference_descriptors(
        &self,
        version: ClusterVersion,
        reqs: &[DescriptorId],
    ) -> Result<Vec<Option<DescriptorRef>>, DereferenceError> {
        let mut ret: Vec<Option<DescriptorRef>> = vec![None; reqs.len()];
        let mut fallback_reqs = Vec::with_capacity(reqs.len());
        let mut fallback_ret_indexes = Vec::with_capacity(reqs.len());
        for (i, id) in reqs.iter().enumerate() {
            match self.uncommitted.get_by_id(*id) {
                Some(uc) => ret[i] = Some(Arc::clone(uc)),
                None => {
                    fallback_reqs.push(*id);
                    fallback_ret_indexes.push(i);
                }
            }
        }
        self.metrics
            .uncommitted_hits(reqs.len() - fallback_reqs.len());
        if fallback_reqs.is_empty() {
            return Ok(ret);
        }
        self.metrics.store_batch(fallback_reqs.len());
        let fallback_ret = self
            .sd
            .dereference_descriptors(version, &fallback_reqs)
            .await?;
        for (j, desc) in fallback_ret.into_iter().enumerate() {
            if let Some(desc) = desc {
                ret[fallback_ret_indexes[j]] = Some(desc);
            }
        }
        Ok(ret)
    }

    async fn dereference_descriptor_ids(
        &self,
        reqs: &[NameInfo],
    ) -> Result<Vec<Option<DescriptorId>>, DereferenceError> {
        // TODO: resolve names against uncommitted descriptors too, so that
        // names created or changed in this transaction are seen here.
        self.sd.dereference_descriptor_ids(reqs).await
    }
}

/// Validates that `desc` is internally consistent, unless validation is
/// disabled on both reads and writes.
pub fn validate_self(
    desc: &DescriptorRef,
    version: ClusterVersion,
    dvmp: &dyn DescriptorValidationModeProvider,
) -> Result<(), CombinedError> {
    if !dvmp.validate_descriptors_on_read() && !dvmp.validate_descriptors_on_write() {
        return Ok(());
    }
    validate::self_only(version, desc)
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;
    use proptest::prelude::*;

    use super::*;
    use crate::config::{all_descriptor_configs, DescriptorValidationMode, DESCRIPTOR_VALIDATION};
    use crate::stored::MemoryCatalogStore;
    use crate::testing::{InstrumentedStore, TestDescriptor};
    use crate::version::ClusterVersionKey;

    const VERSION: ClusterVersion = ClusterVersion::new(1, 0, 2);

    struct Harness {
        store: Arc<InstrumentedStore>,
        memory: Arc<MemoryCatalogStore>,
        configs: ConfigSet,
        metrics: Arc<Metrics>,
        collection: Collection,
    }

    fn harness() -> Harness {
        let memory = Arc::new(MemoryCatalogStore::new());
        let store = Arc::new(InstrumentedStore::new(Arc::clone(&memory) as _));
        let configs = all_descriptor_configs(ConfigSet::default());
        let metrics = Arc::new(Metrics::new(&Registry::new()));
        let collection = Collection::new(
            Arc::clone(&store) as _,
            configs.clone(),
            Arc::new(VERSION),
            Arc::clone(&metrics),
        );
        Harness {
            store,
            memory,
            configs,
            metrics,
            collection,
        }
    }

    fn ids(ids: &[u32]) -> Vec<DescriptorId> {
        ids.iter().copied().map(DescriptorId).collect()
    }

    fn resolved_ids(ret: &[Option<DescriptorRef>]) -> Vec<Option<(u32, u64)>> {
        ret.iter()
            .map(|d| d.as_ref().map(|d| (d.id().0, d.version())))
            .collect()
    }

    #[tokio::test]
    async fn overlay_then_fallback() {
        let mut h = harness();
        let a = TestDescriptor::database(5, "a").with_version(2).into_ref();
        h.collection.uncommitted_mut().upsert(a);
        h.memory.put(TestDescriptor::database(5, "a").into_ref());
        h.memory.put(TestDescriptor::database(7, "b").into_ref());

        let txn = Txn::new(1);
        let vd = h.collection.new_validation_dereferencer(&txn);
        let ret = vd
            .dereference_descriptors(VERSION, &ids(&[5, 7, 9]))
            .await
            .unwrap();
        assert_eq!(resolved_ids(&ret), vec![Some((5, 2)), Some((7, 1)), None]);
        // Only the IDs missing from the uncommitted set reach the store, in
        // request order, in a single batch.
        assert_eq!(h.store.descriptor_requests(), vec![ids(&[7, 9])]);
        assert_eq!(h.metrics.dereferenced_count("uncommitted"), 1);
        assert_eq!(h.metrics.dereferenced_count("store"), 2);
        assert_eq!(h.metrics.store_batch_count(), 1);
    }

    #[tokio::test]
    async fn fully_uncommitted_request_skips_store() {
        let mut h = harness();
        for id in [1, 2] {
            h.collection
                .uncommitted_mut()
                .upsert(TestDescriptor::database(id, format!("db{id}")).into_ref());
        }
        let txn = Txn::new(1);
        let vd = h.collection.new_validation_dereferencer(&txn);
        let ret = vd
            .dereference_descriptors(VERSION, &ids(&[2, 1, 2]))
            .await
            .unwrap();
        assert_eq!(
            resolved_ids(&ret),
            vec![Some((2, 1)), Some((1, 1)), Some((2, 1))]
        );
        assert_eq!(h.store.calls(), 0);

        let ret = vd.dereference_descriptors(VERSION, &[]).await.unwrap();
        assert!(ret.is_empty());
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn store_error_is_propagated_without_partial_results() {
        let mut h = harness();
        h.collection
            .uncommitted_mut()
            .upsert(TestDescriptor::database(5, "a").into_ref());
        h.store.fail_with("i/o error");
        let txn = Txn::new(1);
        let vd = h.collection.new_validation_dereferencer(&txn);
        let err = vd
            .dereference_descriptors(VERSION, &ids(&[5, 7]))
            .await
            .unwrap_err();
        match err {
            DereferenceError::Store(err) => assert_eq!(err.to_string(), "i/o error"),
            err => panic!("unexpected error: {err:?}"),
        }
    }

    #[tokio::test]
    async fn names_always_come_from_the_store() {
        let mut h = harness();
        // Renamed in this transaction, but the store still has the old name.
        h.memory.put(TestDescriptor::database(5, "old").into_ref());
        h.collection.uncommitted_mut().upsert(
            TestDescriptor::database(5, "new")
                .with_version(2)
                .into_ref(),
        );
        let txn = Txn::new(1);
        let vd = h.collection.new_validation_dereferencer(&txn);
        let ret = vd
            .dereference_descriptor_ids(&[
                NameInfo::new(None, None, "old"),
                NameInfo::new(None, None, "new"),
            ])
            .await
            .unwrap();
        assert_eq!(ret, vec![Some(DescriptorId(5)), None]);
        assert_eq!(h.store.name_requests().len(), 1);
    }

    #[tokio::test]
    async fn validate_bypassed_when_disabled() {
        let h = harness();
        DESCRIPTOR_VALIDATION.set(&h.configs, "off".to_owned());
        h.store.fail_with("must not be called");
        let broken = TestDescriptor::table(10, 1, 2, "t")
            .with_defect("broken")
            .into_ref();
        let txn = Txn::new(1);
        h.collection
            .validate(&txn, ValidationTelemetry::Read, validate::WRITE, &[broken])
            .await
            .unwrap();
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn validate_reports_failures() {
        let h = harness();
        let db = TestDescriptor::database(1, "db").into_ref();
        let schema = TestDescriptor::schema(2, 1, "public").into_ref();
        h.memory.apply([Arc::clone(&db), Arc::clone(&schema)]);

        let txn = Txn::new(1);
        let ok = TestDescriptor::table(10, 1, 2, "ok").into_ref();
        let dangling = TestDescriptor::table(11, 1, 2, "dangling")
            .with_reference(99)
            .into_ref();
        let err = h
            .collection
            .validate(
                &txn,
                ValidationTelemetry::Read,
                validate::IMMUTABLE_READ,
                &[ok, dangling],
            )
            .await
            .unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1, "{err}");
        assert_eq!(failures[0].id, DescriptorId(11));
        assert_eq!(failures[0].message, "referenced descriptor 99 not found");
        assert_eq!(
            failures[0].telemetry_key,
            "sql.schema.validation_errors.read.cross_references.table"
        );
    }

    #[tokio::test]
    async fn validate_surfaces_dereference_errors() {
        let h = harness();
        h.store.fail_with("i/o error");
        let txn = Txn::new(1);
        let table = TestDescriptor::table(10, 1, 2, "t").into_ref();
        let err = h
            .collection
            .validate(
                &txn,
                ValidationTelemetry::Read,
                validate::IMMUTABLE_READ,
                &[table],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DescsError::Dereference(_)), "{err:?}");
    }

    #[tokio::test]
    async fn validate_uncommitted_noop_when_empty() {
        let h = harness();
        let txn = Txn::new(1);
        for mode in ["on", "read_only", "off"] {
            DESCRIPTOR_VALIDATION.set(&h.configs, mode.to_owned());
            h.collection
                .validate_uncommitted_descriptors(&txn)
                .await
                .unwrap();
        }
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn validate_uncommitted_respects_write_policy() {
        let mut h = harness();
        h.collection.uncommitted_mut().upsert(
            TestDescriptor::database(1, "db")
                .with_defect("broken")
                .into_ref(),
        );
        let txn = Txn::new(1);

        DESCRIPTOR_VALIDATION.set(&h.configs, "read_only".to_owned());
        h.collection
            .validate_uncommitted_descriptors(&txn)
            .await
            .unwrap();

        DESCRIPTOR_VALIDATION.set(&h.configs, "on".to_owned());
        h.collection.set_skip_validation_on_write(true);
        h.collection
            .validate_uncommitted_descriptors(&txn)
            .await
            .unwrap();

        h.collection.set_skip_validation_on_write(false);
        let err = h
            .collection
            .validate_uncommitted_descriptors(&txn)
            .await
            .unwrap_err();
        assert_eq!(err.failures()[0].message, "broken");
        assert_eq!(
            h.metrics.validation_error_count(
                ValidationTelemetry::Write,
                ValidationLevel::SelfOnly,
                crate::DescriptorKind::Database,
            ),
            1
        );
    }

    #[tokio::test]
    async fn explicit_policy_provider_overrides_configs() {
        let h = harness();
        let collection = h
            .collection
            .with_validation_mode_provider(Arc::new(DescriptorValidationMode::Off));
        h.store.fail_with("must not be called");
        let txn = Txn::new(1);
        let table = TestDescriptor::table(10, 1, 2, "t").into_ref();
        collection
            .validate(&txn, ValidationTelemetry::Read, validate::WRITE, &[table])
            .await
            .unwrap();
        assert_eq!(h.store.calls(), 0);
    }

    #[test]
    fn validate_self_policy() {
        let broken = TestDescriptor::database(1, "db")
            .with_defect("broken")
            .into_ref();
        let version = ClusterVersionKey::LATEST.version();
        validate_self(&broken, version, &DescriptorValidationMode::Off).unwrap();
        let err = validate_self(&broken, version, &DescriptorValidationMode::ReadOnly).unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].level, ValidationLevel::SelfOnly);
    }

    #[test]
    fn validate_self_ignores_references() {
        let dangling = TestDescriptor::table(10, 1, 2, "t")
            .with_reference(99)
            .into_ref();
        validate_self(&dangling, VERSION, &DescriptorValidationMode::On).unwrap();
    }

    proptest! {
        #[test]
        fn dereference_aligned_with_request(
            uncommitted in proptest::collection::btree_set(0u32..16, 0..8),
            stored in proptest::collection::btree_set(0u32..16, 0..8),
            reqs in proptest::collection::vec(0u32..20, 0..12),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("building runtime");
            rt.block_on(async {
                let mut h = harness();
                for id in &uncommitted {
                    h.collection.uncommitted_mut().upsert(
                        TestDescriptor::database(*id, format!("db{id}"))
                            .with_version(2)
                            .into_ref(),
                    );
                }
                for id in &stored {
                    h.memory
                        .put(TestDescriptor::database(*id, format!("db{id}")).into_ref());
                }

                let txn = Txn::new(1);
                let vd = h.collection.new_validation_dereferencer(&txn);
                let ret = vd
                    .dereference_descriptors(VERSION, &ids(&reqs))
                    .await
                    .unwrap();
                let expected: Vec<_> = reqs
                    .iter()
                    .map(|id| {
                        if uncommitted.contains(id) {
                            Some((*id, 2))
                        } else if stored.contains(id) {
                            Some((*id, 1))
                        } else {
                            None
                        }
                    })
                    .collect();
                assert_eq!(resolved_ids(&ret), expected);

                let misses: Vec<u32> = reqs
                    .iter()
                    .copied()
                    .filter(|id| !uncommitted.contains(id))
                    .collect();
                if misses.is_empty() {
                    assert_eq!(h.store.calls(), 0);
                } else {
                    assert_eq!(h.store.descriptor_requests(), vec![ids(&misses)]);
                }
            });
        }
    }
}
