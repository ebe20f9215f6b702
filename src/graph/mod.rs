//! Module graph
//!
//! Tracks every module the dev server has served: its request URL, its
//! resolved id, the transform result cached for it, and the importer /
//! imported edges discovered by import analysis.
//!
//! Nodes live in an arena and are addressed by [`ModuleIdx`]. The arena and
//! both lookup indices sit behind one lock, so `update_module_info` and
//! `invalidate_module` are atomic: a reader never observes a half-updated
//! edge set. Resolution happens before the lock is taken, since it runs
//! plugin hooks.

use crate::error::Result;
use crate::plugins::TransformResult;
use crate::utils::now_millis;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a request URL into a resolved id
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve_url(&self, url: &str) -> Result<Option<String>>;
}

/// Handle to a node in a [`ModuleGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdx(usize);

/// One module tracked by the graph
#[derive(Debug, Clone, Default)]
pub struct ModuleNode {
    /// Request URL the node was first created for
    pub url: String,
    /// Resolved id; `None` when no plugin could resolve the URL
    pub id: Option<String>,
    pub importers: BTreeSet<ModuleIdx>,
    pub imported_modules: BTreeSet<ModuleIdx>,
    pub transform_result: Option<TransformResult>,
    /// 0 until the first invalidation
    pub last_invalidation_timestamp: u64,
}

/// Outcome of one invalidation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub timestamp: u64,
    /// Invalidated nodes, changed module first, then importers depth-first
    pub modules: Vec<ModuleIdx>,
}

#[derive(Default)]
struct GraphState {
    nodes: Vec<ModuleNode>,
    url_to_module: HashMap<String, ModuleIdx>,
    id_to_module: HashMap<String, ModuleIdx>,
    last_timestamp: u64,
}

impl GraphState {
    fn next_timestamp(&mut self) -> u64 {
        self.last_timestamp = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp
    }

    fn insert(&mut self, url: &str, id: Option<String>) -> ModuleIdx {
        if let Some(&idx) = self.url_to_module.get(url) {
            if self.nodes[idx.0].id.is_none() {
                if let Some(id) = id {
                    return self.backfill(url, idx, id);
                }
            }
            return idx;
        }
        // a second URL for an already-known file shares its node
        if let Some(&idx) = id.as_ref().and_then(|id| self.id_to_module.get(id)) {
            self.url_to_module.insert(url.to_string(), idx);
            return idx;
        }
        let idx = ModuleIdx(self.nodes.len());
        if let Some(id) = &id {
            self.id_to_module.insert(id.clone(), idx);
        }
        self.nodes.push(ModuleNode {
            url: url.to_string(),
            id,
            ..Default::default()
        });
        self.url_to_module.insert(url.to_string(), idx);
        idx
    }

    /// Give an unresolved node the id its URL now resolves to. When another
    /// node already owns that id the URL moves to it, taking its edges along.
    fn backfill(&mut self, url: &str, idx: ModuleIdx, id: String) -> ModuleIdx {
        let Some(&owner) = self.id_to_module.get(&id) else {
            self.id_to_module.insert(id.clone(), idx);
            self.nodes[idx.0].id = Some(id);
            return idx;
        };

        let importers = std::mem::take(&mut self.nodes[idx.0].importers);
        let imported = std::mem::take(&mut self.nodes[idx.0].imported_modules);
        for importer in importers {
            let node = &mut self.nodes[importer.0];
            node.imported_modules.remove(&idx);
            node.imported_modules.insert(owner);
            self.nodes[owner.0].importers.insert(importer);
        }
        for dep in imported {
            let node = &mut self.nodes[dep.0];
            node.importers.remove(&idx);
            node.importers.insert(owner);
            self.nodes[owner.0].imported_modules.insert(dep);
        }
        self.url_to_module.insert(url.to_string(), owner);
        owner
    }
}

pub struct ModuleGraph {
    state: RwLock<GraphState>,
    resolver: Arc<dyn UrlResolver>,
}

impl fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("modules", &self.state.read().nodes.len())
            .finish()
    }
}

impl ModuleGraph {
    pub fn new(resolver: Arc<dyn UrlResolver>) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            resolver,
        }
    }

    /// Return the node for `raw_url`, creating it on first sight
    pub async fn ensure_entry_from_url(&self, raw_url: &str) -> Result<ModuleIdx> {
        if let Some(idx) = self.get_module_by_url(raw_url) {
            if self.state.read().nodes.get(idx.0).is_some_and(|n| n.id.is_some()) {
                return Ok(idx);
            }
        }
        // unresolved nodes are retried so a file created later gets its id
        let id = self.resolver.resolve_url(raw_url).await?;
        let idx = self.state.write().insert(raw_url, id);
        debug!(url = raw_url, ?idx, "module entry");
        Ok(idx)
    }

    pub fn get_module_by_url(&self, raw_url: &str) -> Option<ModuleIdx> {
        self.state.read().url_to_module.get(raw_url).copied()
    }

    pub fn get_module_by_id(&self, id: &str) -> Option<ModuleIdx> {
        self.state.read().id_to_module.get(id).copied()
    }

    /// Snapshot of a node
    pub fn node(&self, idx: ModuleIdx) -> Option<ModuleNode> {
        self.state.read().nodes.get(idx.0).cloned()
    }

    pub fn url(&self, idx: ModuleIdx) -> Option<String> {
        self.state.read().nodes.get(idx.0).map(|n| n.url.clone())
    }

    pub fn transform_result(&self, idx: ModuleIdx) -> Option<TransformResult> {
        self.state
            .read()
            .nodes
            .get(idx.0)
            .and_then(|n| n.transform_result.clone())
    }

    /// Cache a transform result; only the transform layer calls this
    pub fn set_transform_result(&self, idx: ModuleIdx, result: TransformResult) {
        if let Some(node) = self.state.write().nodes.get_mut(idx.0) {
            node.transform_result = Some(result);
        }
    }

    pub fn last_invalidation_timestamp(&self, idx: ModuleIdx) -> u64 {
        self.state
            .read()
            .nodes
            .get(idx.0)
            .map_or(0, |n| n.last_invalidation_timestamp)
    }

    pub fn importers(&self, idx: ModuleIdx) -> BTreeSet<ModuleIdx> {
        self.state
            .read()
            .nodes
            .get(idx.0)
            .map(|n| n.importers.clone())
            .unwrap_or_default()
    }

    pub fn imported_modules(&self, idx: ModuleIdx) -> BTreeSet<ModuleIdx> {
        self.state
            .read()
            .nodes
            .get(idx.0)
            .map(|n| n.imported_modules.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace `idx`'s import set with the modules behind `imported_urls`.
    ///
    /// Targets are resolved (and created) first; the edge swap itself
    /// happens under a single write lock.
    pub async fn update_module_info(&self, idx: ModuleIdx, imported_urls: &[String]) -> Result<()> {
        let mut next = BTreeSet::new();
        for url in imported_urls {
            next.insert(self.ensure_entry_from_url(url).await?);
        }

        let mut state = self.state.write();
        let Some(node) = state.nodes.get_mut(idx.0) else {
            return Ok(());
        };
        let prev = std::mem::replace(&mut node.imported_modules, next.clone());

        for dropped in prev.difference(&next) {
            state.nodes[dropped.0].importers.remove(&idx);
        }
        for added in next.difference(&prev) {
            state.nodes[added.0].importers.insert(idx);
        }
        Ok(())
    }

    /// Clear the cached transform of the module with `id` and of every
    /// module that transitively imports it.
    ///
    /// Each node is visited at most once per pass, so import cycles
    /// terminate. Returns `None` when `id` is not in the graph.
    pub fn invalidate_module(&self, id: &str) -> Option<Invalidation> {
        let mut state = self.state.write();
        let start = *state.id_to_module.get(id)?;
        let timestamp = state.next_timestamp();

        let mut visited = HashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let node = &mut state.nodes[idx.0];
            node.transform_result = None;
            node.last_invalidation_timestamp = timestamp;
            order.push(idx);
            // reversed so importers are visited in ascending order
            stack.extend(node.importers.iter().rev().copied());
        }

        info!(id, count = order.len(), timestamp, "invalidated");
        Some(Invalidation {
            timestamp,
            modules: order,
        })
    }
}
