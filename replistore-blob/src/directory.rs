//! Seams to the directory and catalog services.
//!
//! The data path never decides where chunks live or where object metadata
//! rests; it talks to these traits. The in-memory implementations back the
//! test suite and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use replistore_common::{CandidateSet, ChunkTarget, ObjectDescriptor, ReplicaSet};

use crate::error::{BlobError, Result};

/// Plans and reports chunk placement for an object path.
#[async_trait]
pub trait ChunkDirectory: Send + Sync {
    /// Plans one candidate replica set per position for a new object of the
    /// given size.
    async fn resolve_candidates(&self, path: &str, size: u64) -> Result<Vec<CandidateSet>>;

    /// Lists the durably written replica sets of an existing object.
    async fn chunk_list(&self, path: &str) -> Result<Vec<ReplicaSet>>;
}

/// Persists and serves finalized object metadata.
#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    async fn persist_descriptor(&self, descriptor: &ObjectDescriptor) -> Result<()>;

    async fn fetch_descriptor(&self, path: &str) -> Result<ObjectDescriptor>;
}

/// In-memory catalog keyed by object path. Persisting an existing path
/// supersedes the previous descriptor.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    objects: DashMap<String, ObjectDescriptor>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, path: &str) -> Option<ObjectDescriptor> {
        self.objects.remove(path).map(|(_, descriptor)| descriptor)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectCatalog for MemoryCatalog {
    async fn persist_descriptor(&self, descriptor: &ObjectDescriptor) -> Result<()> {
        self.objects
            .insert(descriptor.name.clone(), descriptor.clone());
        Ok(())
    }

    async fn fetch_descriptor(&self, path: &str) -> Result<ObjectDescriptor> {
        self.objects
            .get(path)
            .map(|entry| entry.clone())
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }
}

/// In-memory directory that spreads positions round-robin over a fixed set
/// of storage endpoints. Serves chunk lists from the catalog it shares with
/// the client.
pub struct MemoryDirectory {
    endpoints: Vec<String>,
    replicas: usize,
    chunk_size: u64,
    catalog: Arc<MemoryCatalog>,
    cursor: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new(
        endpoints: Vec<String>,
        replicas: usize,
        chunk_size: u64,
        catalog: Arc<MemoryCatalog>,
    ) -> Self {
        Self {
            endpoints,
            replicas,
            chunk_size,
            catalog,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChunkDirectory for MemoryDirectory {
    async fn resolve_candidates(&self, path: &str, size: u64) -> Result<Vec<CandidateSet>> {
        if self.endpoints.is_empty() || self.replicas == 0 || self.chunk_size == 0 {
            return Err(BlobError::InvalidChunkList(
                "directory is not configured with endpoints".to_string(),
            ));
        }

        // Always plan at least one position so a stream of unknown or zero
        // size has somewhere to land.
        let positions = size.div_ceil(self.chunk_size).max(1);
        let replicas = self.replicas.min(self.endpoints.len());

        let mut candidates = Vec::with_capacity(positions as usize);
        for position in 0..positions {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed);
            let remaining = size.saturating_sub(position * self.chunk_size);
            let planned_size = if remaining > 0 {
                remaining.min(self.chunk_size)
            } else {
                self.chunk_size
            };
            let targets = (0..replicas)
                .map(|offset| {
                    let endpoint = &self.endpoints[(start + offset) % self.endpoints.len()];
                    let chunk_id = Uuid::new_v4().simple().to_string();
                    ChunkTarget {
                        url: format!("{}/{}", endpoint.trim_end_matches('/'), chunk_id),
                        chunk_id,
                    }
                })
                .collect();
            candidates.push(CandidateSet {
                position: position as u32,
                planned_size,
                targets,
            });
        }
        debug!(
            "Planned {} positions x {} replicas for {}",
            positions, replicas, path
        );
        Ok(candidates)
    }

    async fn chunk_list(&self, path: &str) -> Result<Vec<ReplicaSet>> {
        let descriptor = self.catalog.fetch_descriptor(path).await?;
        Ok(descriptor.chunks)
    }
}
