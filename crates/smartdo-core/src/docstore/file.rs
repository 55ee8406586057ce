use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Document, DocumentStore, Fields, Listener, ListenerRegistration, ListenerRegistry, Query,
    WriteBatch,
};
use crate::error::StoreError;

/// Document store kept as one JSONL file per collection inside a data
/// directory. Every write rewrites the collection through a temp file and
/// an atomic rename, then re-runs the live queries on that collection.
pub struct FileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
    listeners: Arc<ListenerRegistry>,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;

        info!(data_dir = %data_dir.display(), "opened document store");

        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.jsonl"))
    }

    /// Read-modify-write of one collection under the store's write lock,
    /// followed by listener delivery once the lock is released.
    fn mutate<F>(&self, collection: &str, edit: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<Document>) -> Result<(), StoreError>,
    {
        {
            let _guard = self
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let path = self.collection_path(collection);
            let mut docs = load_jsonl(&path)?;
            edit(&mut docs)?;
            save_jsonl_atomic(&path, &docs)?;
        }
        self.notify(collection);
        Ok(())
    }

    fn notify(&self, collection: &str) {
        let watchers = self.listeners.watching(collection);
        debug!(collection, count = watchers.len(), "delivering snapshots");
        for (query, listener) in watchers {
            let result = self.query(&query);
            if let Err(err) = &result {
                warn!(collection, error = %err, "live query failed");
            }
            listener(result);
        }
    }
}

impl DocumentStore for FileStore {
    fn new_id(&self, _collection: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    #[tracing::instrument(skip(self))]
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let docs = load_jsonl(&self.collection_path(collection))?;
        Ok(docs.into_iter().find(|doc| doc.id == id))
    }

    #[tracing::instrument(skip(self, data))]
    fn set(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError> {
        self.mutate(collection, |docs| {
            let doc = Document {
                id: id.to_string(),
                data,
            };
            match docs.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => *existing = doc,
                None => docs.push(doc),
            }
            Ok(())
        })
    }

    #[tracing::instrument(skip(self, value))]
    fn update(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.mutate(collection, |docs| {
            let doc = docs
                .iter_mut()
                .find(|existing| existing.id == id)
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            doc.data.insert(field.to_string(), value);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.mutate(collection, |docs| {
            docs.retain(|doc| doc.id != id);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self), fields(collection = %query.collection))]
    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let docs = load_jsonl(&self.collection_path(&query.collection))?;
        Ok(query.apply(docs))
    }

    #[tracing::instrument(skip(self, batch), fields(size = batch.len()))]
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut by_collection: Vec<(String, Vec<String>)> = Vec::new();
        for (collection, id) in batch.into_deletes() {
            match by_collection.iter_mut().find(|(name, _)| *name == collection) {
                Some((_, ids)) => ids.push(id),
                None => by_collection.push((collection, vec![id])),
            }
        }

        let touched: Vec<String> = by_collection.iter().map(|(name, _)| name.clone()).collect();
        {
            let _guard = self
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // Stage every collection before persisting any, so a decode
            // failure leaves all files untouched.
            let mut staged = Vec::with_capacity(by_collection.len());
            for (collection, ids) in by_collection {
                let path = self.collection_path(&collection);
                let mut docs = load_jsonl(&path)?;
                docs.retain(|doc| !ids.contains(&doc.id));
                staged.push((path, docs));
            }
            for (path, docs) in staged {
                save_jsonl_atomic(&path, &docs)?;
            }
        }

        for collection in touched {
            self.notify(&collection);
        }
        Ok(())
    }

    fn listen(&self, query: Query, listener: Listener) -> ListenerRegistration {
        let initial = self.query(&query);
        let (registration, listener) = self.listeners.register(query, listener);
        listener(initial);
        registration
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<Document>, StoreError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let doc: Document =
            serde_json::from_str(trimmed).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
        out.push(doc);
    }

    debug!(file = %path.display(), count = out.len(), "loaded documents");
    Ok(out)
}

#[tracing::instrument(skip(path, docs))]
fn save_jsonl_atomic(path: &Path, docs: &[Document]) -> Result<(), StoreError> {
    debug!(file = %path.display(), count = docs.len(), "saving jsonl atomically");

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    for doc in docs {
        let serialized = serde_json::to_string(doc)?;
        writeln!(temp, "{serialized}").map_err(io_err)?;
    }
    temp.flush().map_err(io_err)?;

    temp.persist(path).map_err(|err| StoreError::Persist {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tempfile::tempdir;

    use super::FileStore;
    use crate::docstore::{Direction, DocumentStore, Fields, Query, WriteBatch};
    use crate::error::StoreError;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn set_get_update_delete_roundtrip() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");

        store
            .set("tasks", "t1", fields(json!({"title": "a", "isArchived": false})))
            .expect("set");
        store
            .update("tasks", "t1", "isArchived", json!(true))
            .expect("update");

        let doc = store.get("tasks", "t1").expect("get").expect("present");
        assert_eq!(doc.get("title"), Some(&json!("a")));
        assert_eq!(doc.get("isArchived"), Some(&json!(true)));

        store.delete("tasks", "t1").expect("delete");
        assert!(store.get("tasks", "t1").expect("get").is_none());
        store.delete("tasks", "t1").expect("second delete is a no-op");
    }

    #[test]
    fn update_of_missing_document_fails() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");

        let err = store
            .update("tasks", "ghost", "isArchived", json!(true))
            .expect_err("missing document");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn set_replaces_the_whole_document() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");

        store
            .set("tasks", "t1", fields(json!({"title": "a", "description": "old"})))
            .expect("set");
        store
            .set("tasks", "t1", fields(json!({"title": "b"})))
            .expect("replace");

        let doc = store.get("tasks", "t1").expect("get").expect("present");
        assert_eq!(doc.get("title"), Some(&json!("b")));
        assert!(doc.get("description").is_none());
    }

    #[test]
    fn listener_receives_initial_and_subsequent_snapshots_until_dropped() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let registration = store.listen(
            Query::collection("tasks")
                .where_eq("userId", "u1")
                .order_by("createdAt", Direction::Descending),
            Box::new(move |result| {
                let count = result.map(|docs| docs.len()).unwrap_or(usize::MAX);
                sink.lock().expect("lock").push(count);
            }),
        );

        store
            .set("tasks", "t1", fields(json!({"userId": "u1", "createdAt": 1})))
            .expect("set t1");
        store
            .set("tasks", "t2", fields(json!({"userId": "u2", "createdAt": 2})))
            .expect("set t2");
        store
            .set("users", "u1", fields(json!({"email": "a@b.co"})))
            .expect("other collection");

        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 1]);
        assert_eq!(store.listener_count(), 1);

        registration.remove();
        assert_eq!(store.listener_count(), 0);
        store
            .set("tasks", "t3", fields(json!({"userId": "u1", "createdAt": 3})))
            .expect("set t3");
        assert_eq!(seen.lock().expect("lock").len(), 3);
    }

    #[test]
    fn corrupt_collection_is_reported_to_listeners() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        fs::write(temp.path().join("tasks.jsonl"), "{not json\n").expect("write garbage");

        let failed = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&failed);
        let _registration = store.listen(
            Query::collection("tasks"),
            Box::new(move |result| {
                *sink.lock().expect("lock") = matches!(result, Err(StoreError::Corrupt { .. }));
            }),
        );

        assert!(*failed.lock().expect("lock"));
    }

    #[test]
    fn batch_deletes_apply_together() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        for id in ["a", "b", "c"] {
            store
                .set("tasks", id, fields(json!({"userId": "u1"})))
                .expect("set");
        }

        let mut batch = WriteBatch::new();
        batch.delete("tasks", "a");
        batch.delete("tasks", "c");
        store.commit(batch).expect("commit");

        let remaining: Vec<String> = store
            .query(&Query::collection("tasks"))
            .expect("query")
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        assert_eq!(remaining, vec!["b"]);
    }
}
