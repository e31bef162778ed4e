//! Typed informer
//!
//! Runs a reflector over a watcher stream and turns watcher events into
//! add/update/delete notifications for registered [`EventHandler`]s. A
//! relist (watcher restart) is diffed against the objects already seen, so
//! objects that vanished while the watch was down are reported as deletes.
//! Handlers also get a periodic `on_update(obj, obj)` resync when one is
//! configured, which is how handlers retry work that failed earlier.

use crate::error::StoreError;
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::reflector::{self, Store};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Receives informer notifications for objects of kind `K`
#[async_trait::async_trait]
pub trait EventHandler<K>: Send + Sync {
    async fn on_add(&self, obj: Arc<K>);
    async fn on_update(&self, old: Arc<K>, new: Arc<K>);
    async fn on_delete(&self, obj: Arc<K>);
}

/// A change derived from the watch stream
#[derive(Debug, Clone)]
pub enum Notification<K> {
    Added(Arc<K>),
    Updated(Arc<K>, Arc<K>),
    Deleted(Arc<K>),
}

/// `namespace/name` key of an object
pub fn object_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Tracks objects already seen and classifies watcher events.
#[derive(Debug)]
pub struct Dispatcher<K> {
    known: HashMap<String, Arc<K>>,
    relist: Option<HashSet<String>>,
}

impl<K> Default for Dispatcher<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relist: None,
        }
    }
}

impl<K: Resource + Clone> Dispatcher<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently known.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    fn apply(&mut self, obj: &K, during_relist: bool) -> Option<Notification<K>> {
        let key = object_key(obj);
        let new = Arc::new(obj.clone());
        if let Some(relist) = self.relist.as_mut() {
            if during_relist {
                relist.insert(key.clone());
            }
        }
        match self.known.insert(key, Arc::clone(&new)) {
            None => Some(Notification::Added(new)),
            Some(old) if during_relist && old.resource_version() == new.resource_version() => None,
            Some(old) => Some(Notification::Updated(old, new)),
        }
    }

    /// Classify one watcher event.
    pub fn observe(&mut self, event: &watcher::Event<K>) -> Vec<Notification<K>> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => self.apply(obj, true).into_iter().collect(),
            watcher::Event::InitDone => {
                let seen = self.relist.take().unwrap_or_default();
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|k| self.known.remove(&k))
                    .map(Notification::Deleted)
                    .collect()
            }
            watcher::Event::Apply(obj) => self.apply(obj, false).into_iter().collect(),
            watcher::Event::Delete(obj) => {
                let removed = self
                    .known
                    .remove(&object_key(obj))
                    .unwrap_or_else(|| Arc::new(obj.clone()));
                vec![Notification::Deleted(removed)]
            }
        }
    }

    /// `Updated(obj, obj)` for every known object.
    pub fn resync(&self) -> Vec<Notification<K>> {
        self.known
            .values()
            .map(|obj| Notification::Updated(Arc::clone(obj), Arc::clone(obj)))
            .collect()
    }
}

/// Informer for objects of kind `K`
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    name: String,
    api: Api<K>,
    config: watcher::Config,
    handlers: Vec<Arc<dyn EventHandler<K>>>,
    resync: Option<Duration>,
    reader: Store<K>,
    writer: reflector::store::Writer<K>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Hash + Eq + Clone + Send + Sync,
{
    /// Informer over `api`, narrowed by `config` (label/field selectors).
    pub fn new(name: &str, api: Api<K>, config: watcher::Config) -> Self {
        let (reader, writer) = reflector::store();
        Self {
            name: name.to_string(),
            api,
            config,
            handlers: Vec::new(),
            resync: None,
            reader,
            writer,
        }
    }

    /// Register a handler; handlers are called in registration order.
    pub fn add_handler(mut self, handler: Arc<dyn EventHandler<K>>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Re-deliver every known object as an update every `period`.
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync = Some(period);
        self
    }

    /// Read handle on the reflector cache.
    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }

    /// Consume the watch stream until it ends. Watch errors are logged and
    /// retried with the watcher's default backoff.
    pub async fn run(self) -> Result<(), StoreError> {
        info!("Starting {} informer", self.name);
        let Informer {
            name,
            api,
            config,
            handlers,
            resync,
            writer,
            ..
        } = self;

        let mut stream = reflector::reflector(writer, watcher(api, config).default_backoff()).boxed();
        let mut dispatcher = Dispatcher::<K>::new();
        let mut ticker = resync.map(tokio::time::interval);

        loop {
            let notifications = tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(event)) => dispatcher.observe(&event),
                    Some(Err(e)) => {
                        error!("{} watch error: {}", name, e);
                        continue;
                    }
                    None => break,
                },
                _ = tick(&mut ticker) => {
                    debug!("Resyncing {} {} objects", dispatcher.len(), name);
                    dispatcher.resync()
                }
            };
            deliver(&handlers, notifications).await;
        }

        Err(StoreError::Sync(format!("{} watch stream ended", name)))
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

/// Hand `notifications` to every handler in order.
pub async fn deliver<K>(handlers: &[Arc<dyn EventHandler<K>>], notifications: Vec<Notification<K>>) {
    for notification in notifications {
        for handler in handlers {
            match &notification {
                Notification::Added(obj) => handler.on_add(Arc::clone(obj)).await,
                Notification::Updated(old, new) => handler.on_update(Arc::clone(old), Arc::clone(new)).await,
                Notification::Deleted(obj) => handler.on_delete(Arc::clone(obj)).await,
            }
        }
    }
}

/// Wait until `store` has seen its first full list, or fail after `timeout`.
pub async fn wait_for_sync<K>(store: &Store<K>, timeout: Duration) -> Result<(), StoreError>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    match tokio::time::timeout(timeout, store.wait_until_ready()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StoreError::Sync(e.to_string())),
        Err(_) => Err(StoreError::Sync(format!(
            "cache not synced within {}s",
            timeout.as_secs()
        ))),
    }
}
