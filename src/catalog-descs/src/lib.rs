// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Transaction-scoped descriptor collections and descriptor validation.
//!
//! A [`Collection`] holds the descriptors a transaction has changed but not
//! yet committed. Validation sees the catalog through the collection: any
//! descriptor the transaction has changed is read from its uncommitted set,
//! and everything else from the durable [`CatalogStore`].
//!
//! The entry points are [`Collection::validate`],
//! [`Collection::validate_uncommitted_descriptors`] and [`validate_self`].

mod collection;
pub mod config;
mod descriptor;
mod error;
mod metrics;
pub mod stored;
pub mod testing;
mod uncommitted;
pub mod validate;
pub mod version;

pub use crate::collection::{validate_self, Collection};
pub use crate::descriptor::{Descriptor, DescriptorId, DescriptorKind, DescriptorRef, NameInfo};
pub use crate::error::{CombinedError, DereferenceError, DescsError, ValidationFailure};
pub use crate::metrics::Metrics;
pub use crate::stored::{CatalogStore, MemoryCatalogStore, StoreDereferencer, Txn};
pub use crate::uncommitted::UncommittedDescriptors;
