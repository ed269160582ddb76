use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context as _;
use async_trait::async_trait;
use futures::StreamExt as _;
use tokio::fs;
use tokio::sync::watch;

use crate::store::{
    CollectionPath, Document, DocumentStore, Fields, Snapshot, SnapshotStream, StoreError,
};

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1_048_576;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Namespace every collection lives under.
    pub app_id: String,
    pub max_document_bytes: usize,
    /// When set, every collection is mirrored to a JSON file below this dir.
    pub persist_dir: Option<PathBuf>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            app_id: "cryptid-creators-default".to_string(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            persist_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Feed {
    Snapshot(Arc<Snapshot>),
    Interrupted(String),
}

struct Collection {
    docs: BTreeMap<String, Fields>,
    feed: watch::Sender<Feed>,
}

impl Collection {
    fn new(docs: BTreeMap<String, Fields>) -> Self {
        let (feed, _) = watch::channel(Feed::Snapshot(Arc::new(snapshot_of(&docs))));
        Self { docs, feed }
    }

    fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    fn publish(&self) {
        self.feed
            .send_replace(Feed::Snapshot(Arc::new(snapshot_of(&self.docs))));
    }
}

fn snapshot_of(docs: &BTreeMap<String, Fields>) -> Snapshot {
    Snapshot {
        documents: docs
            .iter()
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect(),
    }
}

/// In-process document store that pushes a fresh snapshot to every
/// subscriber of a collection after each committed write.
pub struct MemoryStore {
    options: StoreOptions,
    collections: Mutex<HashMap<CollectionPath, Collection>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            collections: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Like [`MemoryStore::new`], but first loads any collections persisted
    /// under `options.persist_dir`.
    pub fn open(options: StoreOptions) -> anyhow::Result<Self> {
        let store = Self::new(options);
        let Some(root) = store.data_root() else {
            return Ok(store);
        };

        let loaded = load_collections(&root)
            .with_context(|| format!("load persisted collections: {}", root.display()))?;
        tracing::info!(
            collections = loaded.len(),
            root = %root.display(),
            "loaded persisted collections"
        );
        let mut collections = store.lock();
        for (path, docs) in loaded {
            collections.insert(path, Collection::new(docs));
        }
        drop(collections);
        Ok(store)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Fails every open subscription on `path` once. Later subscriptions
    /// start from the current contents again.
    pub fn interrupt(&self, path: &CollectionPath, reason: &str) {
        let mut collections = self.lock();
        let Some(collection) = collections.get_mut(path) else {
            return;
        };
        collection
            .feed
            .send_replace(Feed::Interrupted(reason.to_string()));
        let (feed, _) = watch::channel(Feed::Snapshot(Arc::new(snapshot_of(&collection.docs))));
        collection.feed = feed;
        tracing::warn!(collection = %path, reason, "subscriptions interrupted");
    }

    /// Open subscriptions on `path`.
    pub fn subscriber_count(&self, path: &CollectionPath) -> usize {
        self.lock()
            .get(path)
            .map_or(0, |collection| collection.feed.receiver_count())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CollectionPath, Collection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn data_root(&self) -> Option<PathBuf> {
        self.options.persist_dir.as_ref().map(|dir| {
            dir.join("artifacts")
                .join(&self.options.app_id)
                .join("public")
                .join("data")
        })
    }

    fn check_document(&self, id: &str, fields: &Fields) -> Result<(), StoreError> {
        if let Some((field, _)) = fields
            .iter()
            .find(|(_, value)| value.is_array() || value.is_object())
        {
            return Err(StoreError::NestedField {
                field: field.clone(),
            });
        }

        let size = serde_json::to_vec(fields)
            .map_err(|err| StoreError::Backend(format!("encode document: {err}")))?
            .len()
            + id.len();
        if size > self.options.max_document_bytes {
            return Err(StoreError::TooLarge {
                size,
                limit: self.options.max_document_bytes,
            });
        }
        Ok(())
    }

    /// Applies `mutate` to a copy of the collection. With persistence on, the
    /// copy is written to disk first; a failed write leaves the collection
    /// untouched and is returned as an error.
    async fn commit<T>(
        &self,
        path: &CollectionPath,
        mutate: impl FnOnce(&mut BTreeMap<String, Fields>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let file = match self.data_root() {
            Some(root) => Some(collection_file(&root, path)?),
            None => None,
        };
        let _write = self.write_lock.lock().await;

        let mut docs = self
            .lock()
            .get(path)
            .map(|collection| collection.docs.clone())
            .unwrap_or_default();
        let out = mutate(&mut docs)?;

        if let Some(file) = file {
            write_json_atomic(&file, &docs).await.map_err(|err| {
                tracing::error!(
                    collection = %path,
                    error = %format!("{err:#}"),
                    "persist collection failed"
                );
                StoreError::Unavailable(format!("persist {path}: {err:#}"))
            })?;
        }

        let mut collections = self.lock();
        let collection = collections
            .entry(path.clone())
            .or_insert_with(Collection::empty);
        collection.docs = docs;
        collection.publish();
        Ok(out)
    }
}

/// File backing `path` below `root`. Each segment must be a single plain
/// name; anything else could resolve outside `root`.
fn collection_file(root: &Path, path: &CollectionPath) -> Result<PathBuf, StoreError> {
    let invalid = || StoreError::Backend(format!("invalid collection path: {path:?}"));
    let segments: Vec<&str> = path.as_str().split('/').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid());
    };

    for segment in &segments {
        let mut components = Path::new(segment).components();
        let plain = matches!(components.next(), Some(Component::Normal(name)) if name == *segment)
            && components.next().is_none()
            && !segment.contains('\\');
        if !plain {
            return Err(invalid());
        }
    }
    let mut file = root.to_path_buf();
    for segment in parents {
        file.push(segment);
    }
    file.push(format!("{last}.json"));
    Ok(file)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Fields>, StoreError> {
        let collections = self.lock();
        Ok(collections
            .get(path)
            .and_then(|collection| collection.docs.get(id))
            .cloned())
    }

    async fn create(
        &self,
        path: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.check_document(id, &fields)?;
        self.commit(path, |docs| {
            if docs.contains_key(id) {
                return Err(StoreError::AlreadyExists {
                    path: path.clone(),
                    id: id.to_string(),
                });
            }
            docs.insert(id.to_string(), fields);
            Ok(())
        })
        .await
    }

    async fn add(&self, path: &CollectionPath, fields: Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.check_document(&id, &fields)?;
        self.commit(path, |docs| {
            docs.insert(id.clone(), fields);
            Ok(id)
        })
        .await
    }

    async fn update(
        &self,
        path: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.commit(path, |docs| {
            let Some(existing) = docs.get(id) else {
                return Err(StoreError::NotFound {
                    path: path.clone(),
                    id: id.to_string(),
                });
            };
            let mut merged = existing.clone();
            merged.extend(fields);
            self.check_document(id, &merged)?;
            docs.insert(id.to_string(), merged);
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<(), StoreError> {
        self.commit(path, |docs| {
            docs.remove(id);
            Ok(())
        })
        .await
    }

    fn subscribe(&self, path: &CollectionPath) -> SnapshotStream {
        let rx = {
            let mut collections = self.lock();
            collections
                .entry(path.clone())
                .or_insert_with(Collection::empty)
                .feed
                .subscribe()
        };
        tracing::debug!(collection = %path, "subscribed");
        feed_stream(rx)
    }
}

fn feed_stream(rx: watch::Receiver<Feed>) -> SnapshotStream {
    futures::stream::unfold(Some((rx, true)), |state| async move {
        let (mut rx, first) = state?;
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let feed = rx.borrow_and_update().clone();
        match feed {
            Feed::Snapshot(snapshot) => Some((Ok(Snapshot::clone(&snapshot)), Some((rx, false)))),
            Feed::Interrupted(reason) => Some((Err(StoreError::Unavailable(reason)), None)),
        }
    })
    .boxed()
}

fn load_collections(
    root: &Path,
) -> anyhow::Result<Vec<(CollectionPath, BTreeMap<String, Fields>)>> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).with_context(|| format!("read dir: {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Ok(relative) = path.with_extension("").strip_prefix(root).map(Path::to_path_buf)
            else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let bytes =
                std::fs::read(&path).with_context(|| format!("read: {}", path.display()))?;
            let docs: BTreeMap<String, Fields> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse json: {}", path.display()))?;
            out.push((CollectionPath::new(name), docs));
        }
    }
    Ok(out)
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
