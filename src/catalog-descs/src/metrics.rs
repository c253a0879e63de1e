// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Prometheus monitoring metrics.

use prometheus::{IntCounterVec, Opts, Registry};

use crate::descriptor::DescriptorKind;
use crate::validate::{ValidationLevel, ValidationTelemetry};

/// Prometheus monitoring metrics for descriptor validation.
///
/// Intentionally not Clone because we expect this to be passed around in an
/// Arc.
pub struct Metrics {
    validation_errors: IntCounterVec,
    dereference_batches: IntCounterVec,
    dereferenced_descriptors: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Returns a new [Metrics] instance connected to the given registry.
    pub fn new(registry: &Registry) -> Self {
        let validation_errors = IntCounterVec::new(
            Opts::new(
                "mz_catalog_descriptor_validation_errors_total",
                "Descriptor validation failures, by trigger, level and descriptor kind.",
            ),
            &["telemetry", "level", "kind"],
        )
        .expect("valid metric");
        let dereference_batches = IntCounterVec::new(
            Opts::new(
                "mz_catalog_descriptor_dereference_batches_total",
                "Batched descriptor dereference requests, by source.",
            ),
            &["source"],
        )
        .expect("valid metric");
        let dereferenced_descriptors = IntCounterVec::new(
            Opts::new(
                "mz_catalog_descriptor_dereferenced_total",
                "Descriptors resolved during validation, by source.",
            ),
            &["source"],
        )
        .expect("valid metric");
        for metric in [
            &validation_errors,
            &dereference_batches,
            &dereferenced_descriptors,
        ] {
            registry
                .register(Box::new(metric.clone()))
                .expect("metric registered once per registry");
        }
        Metrics {
            validation_errors,
            dereference_batches,
            dereferenced_descriptors,
        }
    }

    pub(crate) fn validation_error(
        &self,
        telemetry: ValidationTelemetry,
        level: ValidationLevel,
        kind: DescriptorKind,
    ) {
        self.validation_errors
            .with_label_values(&[telemetry.as_str(), level.as_str(), kind.as_str()])
            .inc();
    }

    /// Records `n` IDs resolved from the uncommitted set.
    pub(crate) fn uncommitted_hits(&self, n: usize) {
        self.dereferenced_descriptors
            .with_label_values(&["uncommitted"])
            .inc_by(u64::try_from(n).unwrap_or(u64::MAX));
    }

    /// Records one batched store call for `n` IDs.
    pub(crate) fn store_batch(&self, n: usize) {
        self.dereference_batches.with_label_values(&["store"]).inc();
        self.dereferenced_descriptors
            .with_label_values(&["store"])
            .inc_by(u64::try_from(n).unwrap_or(u64::MAX));
    }

    /// Total validation failures recorded with the given labels.
    pub fn validation_error_count(
        &self,
        telemetry: ValidationTelemetry,
        level: ValidationLevel,
        kind: DescriptorKind,
    ) -> u64 {
        self.validation_errors
            .with_label_values(&[telemetry.as_str(), level.as_str(), kind.as_str()])
            .get()
    }

    /// Total batched store calls issued.
    pub fn store_batch_count(&self) -> u64 {
        self.dereference_batches.with_label_values(&["store"]).get()
    }

    /// Total IDs resolved from `source`, either `"uncommitted"` or `"store"`.
    pub fn dereferenced_count(&self, source: &str) -> u64 {
        self.dereferenced_descriptors
            .with_label_values(&[source])
            .get()
    }
}
