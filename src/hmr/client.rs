//! Update-channel client
//!
//! The same protocol the embedded browser client speaks, modelled so it can
//! run headless (tests, tooling, a terminal dashboard):
//!
//! - [`HotModuleRegistry`] records `accept` / `prune` callbacks per owner
//!   URL. Creating a hot context for an owner clears its previous callbacks,
//!   which is what happens each time a module is re-evaluated.
//! - [`ModuleLoader`] stands in for dynamic `import()`.
//! - [`UpdateQueue`] batches updates queued in the same turn, fetches them
//!   concurrently and applies them in the order they were queued.

use super::{HmrPayload, Update};
use crate::config::HMR_PROTOCOL;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Namespace object of a freshly imported module
pub type ModuleObject = Value;

/// Receives the new module objects for the declared dependencies, in
/// declaration order; `None` where a fetch failed
pub type AcceptFn = Arc<dyn Fn(&[Option<ModuleObject>]) + Send + Sync>;

pub type PruneFn = Arc<dyn Fn() + Send + Sync>;

/// Deferred application of one fetched update
pub type ApplyFn = Box<dyn FnOnce() + Send>;

/// Dynamic import capability
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Import `path` again, bypassing the module cache with `timestamp`
    async fn load(&self, path: &str, timestamp: u64) -> Result<ModuleObject>;
}

/// `/src/a.ts?x=1` at `t` becomes `/src/a.ts?t=<t>&x=1`
pub fn cache_busted_url(dep: &str, timestamp: u64) -> String {
    match dep.split_once('?') {
        Some((path, query)) => format!("{}?t={}&{}", path, timestamp, query),
        None => format!("{}?t={}", dep, timestamp),
    }
}

#[derive(Clone)]
struct HotCallback {
    deps: Vec<String>,
    f: AcceptFn,
}

struct HotModule {
    callbacks: Vec<HotCallback>,
}

#[derive(Default)]
struct RegistryState {
    modules: HashMap<String, HotModule>,
    prune: HashMap<String, PruneFn>,
}

/// Per-owner accept and prune registrations
#[derive(Clone, Default)]
pub struct HotModuleRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl std::fmt::Debug for HotModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HotModuleRegistry")
            .field("modules", &state.modules.len())
            .field("prune", &state.prune.len())
            .finish()
    }
}

impl HotModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hot context for a module that is being evaluated; stale callbacks
    /// from its previous evaluation are dropped
    pub fn create_hot_context(&self, owner_path: &str) -> HotContext {
        if let Some(module) = self.state.lock().modules.get_mut(owner_path) {
            module.callbacks.clear();
        }
        HotContext {
            owner_path: owner_path.to_string(),
            registry: self.clone(),
        }
    }

    pub fn is_registered(&self, owner_path: &str) -> bool {
        self.state.lock().modules.contains_key(owner_path)
    }

    pub fn callback_count(&self, owner_path: &str) -> usize {
        self.state
            .lock()
            .modules
            .get(owner_path)
            .map_or(0, |m| m.callbacks.len())
    }

    /// Run the prune callbacks of modules that are no longer imported
    pub fn prune(&self, paths: &[&str]) -> usize {
        let callbacks: Vec<PruneFn> = {
            let state = self.state.lock();
            paths.iter().filter_map(|p| state.prune.get(*p).cloned()).collect()
        };
        for cb in &callbacks {
            cb();
        }
        callbacks.len()
    }

    fn add_callback(&self, owner_path: &str, callback: HotCallback) {
        self.state
            .lock()
            .modules
            .entry(owner_path.to_string())
            .or_insert_with(|| HotModule { callbacks: Vec::new() })
            .callbacks
            .push(callback);
    }

    fn callbacks(&self, owner_path: &str) -> Option<Vec<HotCallback>> {
        self.state
            .lock()
            .modules
            .get(owner_path)
            .map(|m| m.callbacks.clone())
    }
}

/// `import.meta.hot` of one module
#[derive(Clone)]
pub struct HotContext {
    owner_path: String,
    registry: HotModuleRegistry,
}

impl std::fmt::Debug for HotContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotContext")
            .field("owner_path", &self.owner_path)
            .finish()
    }
}

impl HotContext {
    pub fn owner_path(&self) -> &str {
        &self.owner_path
    }

    /// Accept updates to this module without a callback
    pub fn accept(&self) {
        self.accept_deps(&[self.owner_path.as_str()], |_| {});
    }

    /// Accept updates to this module, receiving its new version
    pub fn accept_with<F>(&self, f: F)
    where
        F: Fn(Option<&ModuleObject>) + Send + Sync + 'static,
    {
        self.accept_deps(&[self.owner_path.as_str()], move |mods| {
            f(mods.first().and_then(Option::as_ref))
        });
    }

    /// Accept updates to the listed modules
    pub fn accept_deps<F>(&self, deps: &[&str], f: F)
    where
        F: Fn(&[Option<ModuleObject>]) + Send + Sync + 'static,
    {
        self.registry.add_callback(
            &self.owner_path,
            HotCallback {
                deps: deps.iter().map(|d| d.to_string()).collect(),
                f: Arc::new(f),
            },
        );
    }

    pub fn prune<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry
            .state
            .lock()
            .prune
            .insert(self.owner_path.clone(), Arc::new(f));
    }
}

/// Re-import the module behind `update` and prepare its callbacks.
///
/// Returns `None` when nothing accepts the module. A failed import is
/// logged and the callbacks receive `None` for it.
pub async fn fetch_update(
    registry: &HotModuleRegistry,
    loader: &dyn ModuleLoader,
    update: &Update,
) -> Option<ApplyFn> {
    let callbacks = registry.callbacks(&update.path)?;

    let mut module_map: BTreeMap<String, ModuleObject> = BTreeMap::new();
    let dep = update.accepted_path.as_str();
    match loader.load(dep, update.timestamp).await {
        Ok(module) => {
            module_map.insert(dep.to_string(), module);
        }
        Err(e) => warn!(path = %dep, error = %e, "failed to fetch update"),
    }

    let path = update.path.clone();
    Some(Box::new(move || {
        for callback in &callbacks {
            let mods: Vec<Option<ModuleObject>> = callback
                .deps
                .iter()
                .map(|d| module_map.get(d).cloned())
                .collect();
            (callback.f)(&mods);
        }
        info!(path = %path, "hot updated");
    }))
}

#[derive(Default)]
struct QueueState {
    queued: Vec<BoxFuture<'static, Option<ApplyFn>>>,
    pending: bool,
}

/// Clears the pending flag when a flush is dropped before it takes its batch
struct FlushGuard {
    state: Arc<Mutex<QueueState>>,
    taken: bool,
}

impl FlushGuard {
    fn take_batch(&mut self) -> Vec<BoxFuture<'static, Option<ApplyFn>>> {
        let mut state = self.state.lock();
        state.pending = false;
        self.taken = true;
        std::mem::take(&mut state.queued)
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if !self.taken {
            self.state.lock().pending = false;
        }
    }
}

/// Turn-batched, order-preserving update application
#[derive(Clone, Default)]
pub struct UpdateQueue {
    state: Arc<Mutex<QueueState>>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pending fetch.
    ///
    /// The first fetch queued in a turn gets back the flush future for the
    /// batch; later ones in the same turn join that batch and get `None`.
    /// Awaiting the flush yields once, fetches everything concurrently and
    /// applies the results in queue order. It resolves to the number of
    /// updates applied.
    pub fn enqueue(&self, fetch: BoxFuture<'static, Option<ApplyFn>>) -> Option<BoxFuture<'static, usize>> {
        let mut state = self.state.lock();
        state.queued.push(fetch);
        if state.pending {
            return None;
        }
        state.pending = true;
        drop(state);

        let mut guard = FlushGuard {
            state: self.state.clone(),
            taken: false,
        };
        Some(Box::pin(async move {
            tokio::task::yield_now().await;
            let loading = guard.take_batch();
            let mut applied = 0;
            for apply in join_all(loading).await.into_iter().flatten() {
                apply();
                applied += 1;
            }
            applied
        }))
    }
}

/// Styles injected by CSS modules, keyed by module id
#[derive(Debug, Clone, Default)]
pub struct StyleRegistry {
    sheets: Arc<Mutex<BTreeMap<String, String>>>,
}

impl StyleRegistry {
    pub fn update_style(&self, id: &str, css: &str) {
        self.sheets.lock().insert(id.to_string(), css.to_string());
    }

    pub fn remove_style(&self, id: &str) -> bool {
        self.sheets.lock().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.sheets.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sheets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.lock().is_empty()
    }
}

/// Headless update-channel client
pub struct HmrClient {
    registry: HotModuleRegistry,
    styles: StyleRegistry,
    loader: Arc<dyn ModuleLoader>,
    queue: UpdateQueue,
}

impl std::fmt::Debug for HmrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmrClient")
            .field("registry", &self.registry)
            .field("styles", &self.styles)
            .finish_non_exhaustive()
    }
}

impl HmrClient {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            registry: HotModuleRegistry::new(),
            styles: StyleRegistry::default(),
            loader,
            queue: UpdateQueue::new(),
        }
    }

    pub fn registry(&self) -> &HotModuleRegistry {
        &self.registry
    }

    pub fn styles(&self) -> &StyleRegistry {
        &self.styles
    }

    /// Handle one channel message; resolves once its updates are applied
    /// and returns how many were.
    ///
    /// `css-update` takes the same path as `js-update`: style modules are
    /// scripts that re-inject their sheet when re-imported.
    pub async fn handle_message(&self, text: &str) -> Result<usize> {
        match HmrPayload::from_json(text)? {
            HmrPayload::Connected => {
                info!("connected");
                Ok(0)
            }
            HmrPayload::Update { updates } => {
                let mut flushes = Vec::new();
                for update in updates {
                    let registry = self.registry.clone();
                    let loader = self.loader.clone();
                    let fetch: BoxFuture<'static, Option<ApplyFn>> = Box::pin(async move {
                        fetch_update(&registry, loader.as_ref(), &update).await
                    });
                    if let Some(flush) = self.queue.enqueue(fetch) {
                        flushes.push(flush);
                    }
                }
                Ok(join_all(flushes).await.into_iter().sum())
            }
        }
    }
}

/// Connect to the update channel at `url` (`ws://host:port`) and handle
/// messages until the server closes the socket
pub async fn connect(url: &str, client: &HmrClient, keepalive: Duration) -> Result<()> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Channel(format!("invalid url '{}': {}", url, e)))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(HMR_PROTOCOL));

    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::Channel(format!("connect to {} failed: {}", url, e)))?;
    let (mut write, mut read) = ws.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            next = read.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = client.handle_message(&text).await {
                        warn!(error = %e, "bad update message");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::Channel(e.to_string())),
            },
            _ = ping.tick() => {
                write
                    .send(Message::Text("ping".to_string()))
                    .await
                    .map_err(|e| Error::Channel(e.to_string()))?;
            }
        }
    }
    debug!(url, "update channel closed");
    Ok(())
}
