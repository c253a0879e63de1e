// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Reading descriptors and namespace entries from the durable catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::descriptor::{DescriptorId, DescriptorRef, NameInfo};
use crate::error::DereferenceError;
use crate::validate::ValidationDereferencer;
use crate::version::ClusterVersion;

/// A handle to the transaction that catalog reads happen in.
///
/// Cancelling the handle aborts any store read in flight on its behalf.
/// Clones share cancellation.
#[derive(Clone, Debug)]
pub struct Txn {
    id: u64,
    cancel: CancellationToken,
}

impl Txn {
    pub fn new(id: u64) -> Self {
        Txn {
            id,
            cancel: CancellationToken::new(),
        }
    }

    /// A transaction that is cancelled whenever `parent` is, e.g. when the
    /// session running it goes away.
    pub fn with_parent(id: u64, parent: &CancellationToken) -> Self {
        Txn {
            id,
            cancel: parent.child_token(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The durable catalog, as seen from within a transaction.
///
/// Responses are positionally aligned with requests; anything missing is
/// `None`.
#[async_trait]
pub trait CatalogStore: fmt::Debug + Send + Sync {
    async fn get_descriptors(
        &self,
        txn: &Txn,
        version: ClusterVersion,
        ids: &[DescriptorId],
    ) -> Result<Vec<Option<DescriptorRef>>, anyhow::Error>;

    async fn get_descriptor_ids(
        &self,
        txn: &Txn,
        names: &[NameInfo],
    ) -> Result<Vec<Option<DescriptorId>>, anyhow::Error>;
}

/// A [`ValidationDereferencer`] that reads straight from a [`CatalogStore`]
/// within one transaction.
///
/// Each read is bounded by the transaction's cancellation and by `timeout`,
/// and is never retried.
#[derive(Debug)]
pub struct StoreDereferencer<'a> {
    store: &'a dyn CatalogStore,
    txn: &'a Txn,
    timeout: Option<Duration>,
}

impl<'a> StoreDereferencer<'a> {
    pub fn new(store: &'a dyn CatalogStore, txn: &'a Txn, timeout: Option<Duration>) -> Self {
        StoreDereferencer {
            store,
            txn,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, DereferenceError>
    where
        F: Future<Output = Result<T, anyhow::Error>> + Send,
    {
        if self.txn.is_cancelled() {
            return Err(DereferenceError::Cancelled);
        }
        let op = async {
            match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, op).await {
                    Ok(res) => res.map_err(DereferenceError::Store),
                    Err(_) => Err(DereferenceError::Timeout(timeout)),
                },
                None => op.await.map_err(DereferenceError::Store),
            }
        };
        tokio::select! {
            biased;
            () = self.txn.cancel.cancelled() => Err(DereferenceError::Cancelled),
            res = op => res,
        }
    }
}

fn check_aligned<T>(requested: usize, ret: Vec<T>) -> Result<Vec<T>, DereferenceError> {
    if ret.len() != requested {
        return Err(DereferenceError::Store(anyhow!(
            "catalog store returned {} results for {} requests",
            ret.len(),
            requested
        )));
    }
    Ok(ret)
}

#[async_trait]
impl ValidationDereferencer for StoreDereferencer<'_> {
    async fn dereference_descriptors(
        &self,
        version: ClusterVersion,
        reqs: &[DescriptorId],
    ) -> Result<Vec<Option<DescriptorRef>>, DereferenceError> {
        debug!(txn = self.txn.id(), ids = reqs.len(), "reading descriptors");
        let ret = self
            .bounded(self.store.get_descriptors(self.txn, version, reqs))
            .await?;
        check_aligned(reqs.len(), ret)
    }

    async fn dereference_descriptor_ids(
        &self,
        reqs: &[NameInfo],
    ) -> Result<Vec<Option<DescriptorId>>, DereferenceError> {
        debug!(txn = self.txn.id(), names = reqs.len(), "reading namespace entries");
        let ret = self
            .bounded(self.store.get_descriptor_ids(self.txn, reqs))
            .await?;
        check_aligned(reqs.len(), ret)
    }
}

/// A [`CatalogStore`] held entirely in memory.
///
/// Every transaction sees the latest written state, and descriptors are
/// returned as written regardless of the requested version.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    descs: BTreeMap<DescriptorId, DescriptorRef>,
    namespace: BTreeMap<NameInfo, DescriptorId>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `desc` and keeps its namespace entry in sync: any existing
    /// entry for its ID is removed, and a new one is added unless the
    /// descriptor is dropped.
    pub fn put(&self, desc: DescriptorRef) {
        let mut state = self.state.write().expect("lock poisoned");
        let id = desc.id();
        state.namespace.retain(|_, entry| *entry != id);
        if !desc.dropped() {
            state.namespace.insert(desc.name_info(), id);
        }
        state.descs.insert(id, desc);
    }

    /// Writes `desc` without touching the namespace.
    pub fn put_descriptor(&self, desc: DescriptorRef) {
        let mut state = self.state.write().expect("lock poisoned");
        state.descs.insert(desc.id(), desc);
    }

    pub fn remove_descriptor(&self, id: DescriptorId) -> Option<DescriptorRef> {
        let mut state = self.state.write().expect("lock poisoned");
        state.descs.remove(&id)
    }

    pub fn put_namespace_entry(&self, name: NameInfo, id: DescriptorId) {
        let mut state = self.state.write().expect("lock poisoned");
        state.namespace.insert(name, id);
    }

    pub fn remove_namespace_entry(&self, name: &NameInfo) -> Option<DescriptorId> {
        let mut state = self.state.write().expect("lock poisoned");
        state.namespace.remove(name)
    }

    /// Writes every descriptor with [`Self::put`], e.g. to apply a committed
    /// transaction.
    pub fn apply(&self, descs: impl IntoIterator<Item = DescriptorRef>) {
        for desc in descs {
            self.put(desc);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get_descriptors(
        &self,
        _txn: &Txn,
        _version: ClusterVersion,
        ids: &[DescriptorId],
    ) -> Result<Vec<Option<DescriptorRef>>, anyhow::Error> {
        let state = self.state.read().expect("lock poisoned");
        Ok(ids.iter().map(|id| state.descs.get(id).cloned()).collect())
    }

    async fn get_descriptor_ids(
        &self,
        _txn: &Txn,
        names: &[NameInfo],
    ) -> Result<Vec<Option<DescriptorId>>, anyhow::Error> {
        let state = self.state.read().expect("lock poisoned");
        Ok(names
            .iter()
            .map(|name| state.namespace.get(name).copied())
            .collect())
    }
}
