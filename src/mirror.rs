//! Live projections of store collections.
//!
//! A mirror owns one subscription. Each pushed snapshot is decoded in full
//! and handed on as a replacement for whatever the consumer held before.

use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::{CollectionPath, Document, DocumentStore, Snapshot, StoreError};

pub type Decode<T> = fn(&Document) -> Option<T>;

pub fn decode_snapshot<T>(snapshot: &Snapshot, decode: Decode<T>) -> Vec<T> {
    snapshot.documents.iter().filter_map(decode).collect()
}

/// Typed snapshots of `collection`, decoded on every delivery.
pub fn records<T: Send + 'static>(
    store: &dyn DocumentStore,
    collection: &CollectionPath,
    decode: Decode<T>,
) -> BoxStream<'static, Result<Vec<T>, StoreError>> {
    store
        .subscribe(collection)
        .map(move |item| item.map(|snapshot| decode_snapshot(&snapshot, decode)))
        .boxed()
}

/// Running subscription task. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct MirrorHandle {
    collection: CollectionPath,
    task: JoinHandle<()>,
}

impl MirrorHandle {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// False once the subscription failed or the receiver went away.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        tracing::debug!(collection = %self.collection, "unsubscribe");
    }
}

impl Drop for MirrorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribes to `collection` and forwards every decoded snapshot as a
/// message built by `wrap`. A subscription error is reported once through
/// `on_error` and the task ends; it is not retried here.
pub fn spawn<T, M, W, E>(
    store: &dyn DocumentStore,
    collection: CollectionPath,
    decode: Decode<T>,
    messages: mpsc::UnboundedSender<M>,
    wrap: W,
    on_error: E,
) -> MirrorHandle
where
    T: Send + 'static,
    M: Send + 'static,
    W: Fn(Vec<T>) -> M + Send + 'static,
    E: FnOnce(&CollectionPath, StoreError) -> M + Send + 'static,
{
    let mut stream = records(store, &collection, decode);
    let path = collection.clone();

    let task = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(records) => {
                    tracing::debug!(collection = %path, records = records.len(), "snapshot");
                    if messages.send(wrap(records)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(collection = %path, error = %err, "subscription failed");
                    let _ = messages.send(on_error(&path, err));
                    break;
                }
            }
        }
    });

    MirrorHandle { collection, task }
}
