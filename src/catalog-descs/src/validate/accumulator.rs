// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{DescriptorId, DescriptorRef};
use crate::error::{CombinedError, ValidationFailure};
use crate::metrics::Metrics;
use crate::validate::{ValidationLevel, ValidationTelemetry};

/// Collects the failures found during one validation run.
///
/// Failures are attributed to the descriptor currently being validated,
/// which is set by [`Self::validate_at_level`]. A descriptor with failures at
/// one level is not validated at higher levels.
#[derive(Debug)]
pub struct ValidationErrorAccumulator {
    telemetry: ValidationTelemetry,
    target_level: ValidationLevel,
    current_level: ValidationLevel,
    current: Option<DescriptorRef>,
    failures: Vec<ValidationFailure>,
    in_error: BTreeSet<DescriptorId>,
    metrics: Option<Arc<Metrics>>,
}

impl ValidationErrorAccumulator {
    pub fn new(
        telemetry: ValidationTelemetry,
        target_level: ValidationLevel,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        ValidationErrorAccumulator {
            telemetry,
            target_level,
            current_level: ValidationLevel::NoValidation,
            current: None,
            failures: Vec::new(),
            in_error: BTreeSet::new(),
            metrics,
        }
    }

    pub fn target_level(&self) -> ValidationLevel {
        self.target_level
    }

    /// Whether checks at `level` are part of this run.
    pub fn includes(&self, level: ValidationLevel) -> bool {
        level != ValidationLevel::NoValidation && level <= self.target_level
    }

    /// Reports a violation by the descriptor currently being validated.
    ///
    /// Panics if called outside of [`Self::validate_at_level`].
    pub fn report(&mut self, message: impl fmt::Display) {
        let desc = self
            .current
            .as_ref()
            .expect("report called outside of validate_at_level");
        let kind = desc.kind();
        self.failures.push(ValidationFailure {
            id: desc.id(),
            kind,
            name: desc.name().to_owned(),
            level: self.current_level,
            telemetry_key: format!(
                "sql.schema.validation_errors.{}.{}.{}",
                self.telemetry.as_str(),
                self.current_level.as_str(),
                kind.as_str()
            ),
            message: message.to_string(),
        });
        self.in_error.insert(desc.id());
        if let Some(metrics) = &self.metrics {
            metrics.validation_error(self.telemetry, self.current_level, kind);
        }
    }

    /// Whether a violation has been reported for `id`.
    pub fn is_in_error(&self, id: DescriptorId) -> bool {
        self.in_error.contains(&id)
    }

    /// Runs `f` on each of `descs` that has no failures yet, attributing
    /// reports to that descriptor. Does nothing if `level` is above the
    /// target level.
    pub fn validate_at_level<F>(&mut self, level: ValidationLevel, descs: &[DescriptorRef], mut f: F)
    where
        F: FnMut(&mut Self, &DescriptorRef),
    {
        if !self.includes(level) {
            return;
        }
        self.current_level = level;
        for desc in descs {
            if self.is_in_error(desc.id()) {
                continue;
            }
            self.current = Some(Arc::clone(desc));
            f(self, desc);
        }
        self.current = None;
    }

    pub fn finish(self) -> ValidationErrors {
        ValidationErrors {
            failures: self.failures,
        }
    }
}

/// The outcome of a validation run: zero or more failures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    failures: Vec<ValidationFailure>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    /// Folds every failure into a single error, or `Ok` if there are none.
    pub fn combined_error(self) -> Result<(), CombinedError> {
        match CombinedError::new(self.failures) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
