// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::time::Duration;

use crate::descriptor::{DescriptorId, DescriptorKind};
use crate::validate::ValidationLevel;

/// The error returned by [`Collection`](crate::Collection) validation.
#[derive(Debug, thiserror::Error)]
pub enum DescsError {
    /// Referenced objects could not be read, so nothing was validated.
    #[error(transparent)]
    Dereference(#[from] DereferenceError),
    /// One or more descriptors failed validation.
    #[error(transparent)]
    Validation(#[from] CombinedError),
}

impl DescsError {
    /// Returns the validation failures, if this is a validation error.
    pub fn failures(&self) -> &[ValidationFailure] {
        match self {
            DescsError::Dereference(_) => &[],
            DescsError::Validation(err) => err.failures(),
        }
    }
}

/// A failure to resolve descriptors or names against the backing store.
#[derive(Debug, thiserror::Error)]
pub enum DereferenceError {
    #[error("reading descriptors from the catalog store: {0}")]
    Store(anyhow::Error),
    #[error("descriptor dereference cancelled")]
    Cancelled,
    #[error("descriptor dereference timed out after {0:?}")]
    Timeout(Duration),
}

/// A single violation found while validating one descriptor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} {name:?} ({id}): {message}")]
pub struct ValidationFailure {
    pub id: DescriptorId,
    pub kind: DescriptorKind,
    pub name: String,
    /// The validation level whose checks found this violation.
    pub level: ValidationLevel,
    /// Reporting key, e.g. `sql.schema.validation_errors.write.self.table`.
    pub telemetry_key: String,
    pub message: String,
}

/// Every violation found by one validation run, in the order found.
///
/// Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedError {
    failures: Vec<ValidationFailure>,
}

impl CombinedError {
    /// Returns `None` if `failures` is empty.
    pub fn new(failures: Vec<ValidationFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(CombinedError { failures })
        }
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ValidationFailure> {
        self.failures
    }

    /// IDs of the descriptors with at least one failure, in order of first
    /// failure.
    pub fn descriptor_ids(&self) -> Vec<DescriptorId> {
        let mut ids = Vec::new();
        for failure in &self.failures {
            if !ids.contains(&failure.id) {
                ids.push(failure.id);
            }
        }
        ids
    }
}

/// `{}` renders the first failure and how many more there are; `{:#}`
/// renders every failure on its own line.
impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (first, rest) = self
            .failures
            .split_first()
            .expect("combined errors are never empty");
        write!(f, "{first}")?;
        if f.alternate() {
            for failure in rest {
                write!(f, "\n{failure}")?;
            }
        } else if !rest.is_empty() {
            write!(f, " (and {} more)", rest.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(id: u32, message: &str) -> ValidationFailure {
        ValidationFailure {
            id: DescriptorId(id),
            kind: DescriptorKind::Table,
            name: format!("t{id}"),
            level: ValidationLevel::SelfOnly,
            telemetry_key: "sql.schema.validation_errors.read.self.table".into(),
            message: message.into(),
        }
    }

    #[test]
    fn combined_error_display() {
        assert_eq!(CombinedError::new(vec![]), None);

        let err = CombinedError::new(vec![failure(1, "a"), failure(2, "b"), failure(1, "c")])
            .expect("non-empty");
        assert_eq!(err.to_string(), r#"table "t1" (1): a (and 2 more)"#);
        assert_eq!(
            format!("{err:#}"),
            "table \"t1\" (1): a\ntable \"t2\" (2): b\ntable \"t1\" (1): c"
        );
        assert_eq!(err.descriptor_ids(), vec![DescriptorId(1), DescriptorId(2)]);
    }
}
