// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::debug;

use crate::descriptor::{DescriptorId, DescriptorRef, NameInfo};
use crate::error::DereferenceError;
use crate::metrics::Metrics;
use crate::validate::{
    DescriptorGetter, ValidationDereferencer, ValidationErrorAccumulator, ValidationErrors,
    ValidationLevel, ValidationTelemetry, Validator,
};
use crate::version::{ClusterVersion, ClusterVersionKey};

/// The default [`Validator`].
///
/// Runs each level in turn over every descriptor that passed the previous
/// levels:
/// - self: [`Descriptor::validate_self`](crate::Descriptor::validate_self).
/// - cross-references: parents exist and have the right kind, no reference
///   dangles, then the descriptor's own cross-reference checks. Everything
///   referenced is resolved in a single batched dereference.
/// - namespace: live descriptors have a namespace entry naming them, dropped
///   ones don't. All names are resolved in a single batched dereference.
/// - pre-commit: the descriptor's own pre-commit checks.
#[derive(Clone, Debug, Default)]
pub struct RuleEngine {
    metrics: Option<Arc<Metrics>>,
}

impl RuleEngine {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        RuleEngine {
            metrics: Some(metrics),
        }
    }
}

#[async_trait]
impl Validator for RuleEngine {
    async fn validate(
        &self,
        version: ClusterVersion,
        vd: &dyn ValidationDereferencer,
        telemetry: ValidationTelemetry,
        target_level: ValidationLevel,
        descriptors: &[DescriptorRef],
    ) -> Result<ValidationErrors, DereferenceError> {
        let descs: Vec<DescriptorRef> = descriptors
            .iter()
            .unique_by(|desc| desc.id())
            .cloned()
            .collect();
        let mut vea =
            ValidationErrorAccumulator::new(telemetry, target_level, self.metrics.clone());

        vea.validate_at_level(ValidationLevel::SelfOnly, &descs, |vea, desc| {
            desc.validate_self(version, vea)
        });

        if vea.includes(ValidationLevel::CrossReferences) {
            let pending: Vec<DescriptorRef> = descs
                .iter()
                .filter(|desc| !vea.is_in_error(desc.id()) && !desc.dropped())
                .cloned()
                .collect();
            let getter = resolve_references(version, vd, &descs, &pending).await?;
            vea.validate_at_level(ValidationLevel::CrossReferences, &pending, |vea, desc| {
                validate_cross_references(version, vea, &getter, desc)
            });
        }

        if vea.includes(ValidationLevel::Namespace)
            && version.is_active(ClusterVersionKey::NamespaceValidation)
        {
            let pending: Vec<DescriptorRef> = descs
                .iter()
                .filter(|desc| !vea.is_in_error(desc.id()))
                .cloned()
                .collect();
            if !pending.is_empty() {
                let reqs: Vec<NameInfo> = pending.iter().map(|desc| desc.name_info()).collect();
                debug!(names = reqs.len(), "dereferencing namespace entries");
                let ids = vd.dereference_descriptor_ids(&reqs).await?;
                let entries: BTreeMap<DescriptorId, Option<DescriptorId>> = pending
                    .iter()
                    .map(|desc| desc.id())
                    .zip_eq(ids)
                    .collect();
                vea.validate_at_level(ValidationLevel::Namespace, &pending, |vea, desc| {
                    let entry = entries.get(&desc.id()).copied().flatten();
                    validate_namespace(vea, desc, entry)
                });
            }
        }

        vea.validate_at_level(ValidationLevel::AllPreTxnCommit, &descs, |vea, desc| {
            desc.validate_txn_commit(version, vea)
        });

        Ok(vea.finish())
    }
}

/// Builds a getter over `descs` plus everything `pending` refers to.
async fn resolve_references(
    version: ClusterVersion,
    vd: &dyn ValidationDereferencer,
    descs: &[DescriptorRef],
    pending: &[DescriptorRef],
) -> Result<DescriptorGetter, DereferenceError> {
    let mut getter: DescriptorGetter = descs.iter().cloned().collect();
    let reqs: Vec<DescriptorId> = pending
        .iter()
        .flat_map(|desc| {
            desc.parent_id()
                .into_iter()
                .chain(desc.parent_schema_id())
                .chain(desc.referenced_ids())
        })
        .filter(|id| !getter.contains(*id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if reqs.is_empty() {
        return Ok(getter);
    }
    debug!(ids = reqs.len(), "dereferencing referenced descriptors");
    for desc in vd.dereference_descriptors(version, &reqs).await?.into_iter().flatten() {
        getter.insert(desc);
    }
    Ok(getter)
}

fn validate_cross_references(
    version: ClusterVersion,
    vea: &mut ValidationErrorAccumulator,
    getter: &DescriptorGetter,
    desc: &DescriptorRef,
) {
    if let Some(parent_id) = desc.parent_id() {
        if let Err(err) = getter.get_database(parent_id) {
            vea.report(format!("invalid parent database: {err}"));
        }
    }
    if let Some(schema_id) = desc.parent_schema_id() {
        match getter.get_schema(schema_id) {
            Err(err) => vea.report(format!("invalid parent schema: {err}")),
            Ok(schema) if schema.parent_id() != desc.parent_id() => vea.report(format!(
                "parent schema {schema_id} belongs to database {}, not {}",
                display_id(schema.parent_id()),
                display_id(desc.parent_id()),
            )),
            Ok(_) => {}
        }
    }
    for id in desc.referenced_ids() {
        if let Err(err) = getter.get_live(id) {
            vea.report(err);
        }
    }
    desc.validate_cross_references(version, vea, getter);
}

fn validate_namespace(
    vea: &mut ValidationErrorAccumulator,
    desc: &DescriptorRef,
    entry: Option<DescriptorId>,
) {
    let id = desc.id();
    match (desc.dropped(), entry) {
        (false, None) => vea.report(format!(
            "expected matching namespace entry for {}, found none",
            desc.name_info()
        )),
        (false, Some(found)) if found != id => vea.report(format!(
            "namespace entry for {} points to descriptor {found}",
            desc.name_info()
        )),
        (true, Some(found)) if found == id => vea.report(format!(
            "namespace entry for {} still exists for dropped descriptor",
            desc.name_info()
        )),
        _ => {}
    }
}

fn display_id(id: Option<DescriptorId>) -> String {
    id.map_or_else(|| "none".to_owned(), |id| id.to_string())
}
