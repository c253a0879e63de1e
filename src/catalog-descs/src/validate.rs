// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Descriptor validation: levels, the dereferencer and validator contracts,
//! and the default rules engine.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::descriptor::{DescriptorId, DescriptorRef, NameInfo};
use crate::error::{CombinedError, DereferenceError};
use crate::version::ClusterVersion;

mod accumulator;
mod engine;
mod getter;

pub use crate::validate::accumulator::{ValidationErrorAccumulator, ValidationErrors};
pub use crate::validate::engine::RuleEngine;
pub use crate::validate::getter::{DescriptorGetter, LookupError};

/// How thorough a validation run is. Each level includes all lower ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationLevel {
    NoValidation,
    /// Internal consistency of each descriptor on its own.
    SelfOnly,
    /// Everything a descriptor refers to exists and agrees with it.
    CrossReferences,
    /// Each descriptor matches its namespace entry.
    Namespace,
    /// Checks for descriptors about to be committed.
    AllPreTxnCommit,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::NoValidation => "none",
            ValidationLevel::SelfOnly => "self",
            ValidationLevel::CrossReferences => "cross_references",
            ValidationLevel::Namespace => "namespace",
            ValidationLevel::AllPreTxnCommit => "pre_txn_commit",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The level used when reading descriptors that will not be modified.
pub const IMMUTABLE_READ: ValidationLevel = ValidationLevel::CrossReferences;
/// The level used when reading descriptors that may be modified.
pub const MUTABLE_READ: ValidationLevel = ValidationLevel::Namespace;
/// The level used before committing descriptor changes.
pub const WRITE: ValidationLevel = ValidationLevel::AllPreTxnCommit;

/// Why a validation run happened. Only used to label reported failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationTelemetry {
    NoTelemetry,
    Read,
    Write,
}

impl ValidationTelemetry {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationTelemetry::NoTelemetry => "none",
            ValidationTelemetry::Read => "read",
            ValidationTelemetry::Write => "write",
        }
    }
}

/// Resolves the descriptors and names that validation needs to look at.
///
/// Responses are positionally aligned with requests: the `i`th result
/// answers the `i`th request, and anything that does not exist is `None`
/// rather than an error.
#[async_trait]
pub trait ValidationDereferencer: Send + Sync {
    async fn dereference_descriptors(
        &self,
        version: ClusterVersion,
        reqs: &[DescriptorId],
    ) -> Result<Vec<Option<DescriptorRef>>, DereferenceError>;

    async fn dereference_descriptor_ids(
        &self,
        reqs: &[NameInfo],
    ) -> Result<Vec<Option<DescriptorId>>, DereferenceError>;
}

/// A rules engine that validates descriptors, resolving whatever they refer
/// to through a [`ValidationDereferencer`].
#[async_trait]
pub trait Validator: fmt::Debug + Send + Sync {
    /// Validates `descriptors` up to `target_level`.
    ///
    /// Returns an error only if dereferencing failed, in which case nothing
    /// was validated. Validation failures are returned as
    /// [`ValidationErrors`].
    async fn validate(
        &self,
        version: ClusterVersion,
        vd: &dyn ValidationDereferencer,
        telemetry: ValidationTelemetry,
        target_level: ValidationLevel,
        descriptors: &[DescriptorRef],
    ) -> Result<ValidationErrors, DereferenceError>;
}

/// Checks the internal consistency of one descriptor, without looking at
/// anything it refers to.
pub fn self_only(version: ClusterVersion, desc: &DescriptorRef) -> Result<(), CombinedError> {
    let mut vea = ValidationErrorAccumulator::new(
        ValidationTelemetry::NoTelemetry,
        ValidationLevel::SelfOnly,
        None,
    );
    vea.validate_at_level(ValidationLevel::SelfOnly, std::slice::from_ref(desc), |vea, desc| {
        desc.validate_self(version, vea)
    });
    vea.finish().combined_error()
}
