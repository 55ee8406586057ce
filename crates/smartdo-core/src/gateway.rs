//! User-scoped access to the `tasks` collection.
//!
//! Every read and write is keyed by the identity provider's current
//! session; there is no call that takes an owner id from the caller.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::auth::IdentityProvider;
use crate::docstore::{Direction, Document, DocumentStore, Fields, ListenerRegistration, Query, WriteBatch};
use crate::error::{Field, GatewayError, StoreError, ValidationError};
use crate::task::{Category, Task};

pub const TASKS: &str = "tasks";

const USER_ID: &str = "userId";
const IS_ARCHIVED: &str = "isArchived";
const IS_COMPLETED: &str = "isCompleted";
const CATEGORY: &str = "category";
const CREATED_AT: &str = "createdAt";

/// Which slice of the user's tasks a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskScope {
    /// Every unarchived task.
    All,
    Incomplete,
    Completed,
    Archived,
    Category(Category),
    /// Everything the user owns, archived or not.
    Owned,
}

impl TaskScope {
    pub fn query(&self, uid: &str) -> Query {
        let base = Query::collection(TASKS).where_eq(USER_ID, uid);
        let scoped = match self {
            TaskScope::All => base.where_eq(IS_ARCHIVED, false),
            TaskScope::Incomplete => base
                .where_eq(IS_COMPLETED, false)
                .where_eq(IS_ARCHIVED, false),
            TaskScope::Completed => base
                .where_eq(IS_COMPLETED, true)
                .where_eq(IS_ARCHIVED, false),
            TaskScope::Archived => base.where_eq(IS_ARCHIVED, true),
            TaskScope::Category(category) => base
                .where_eq(CATEGORY, category.as_str())
                .where_eq(IS_ARCHIVED, false),
            TaskScope::Owned => base,
        };
        scoped.order_by(CREATED_AT, Direction::Descending)
    }
}

/// One delivery from a live task query.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Snapshot {
    #[default]
    Loading,
    Ready(Vec<Task>),
    Failed(String),
}

impl Snapshot {
    /// Tasks carried by a ready snapshot; empty otherwise.
    pub fn tasks(&self) -> &[Task] {
        match self {
            Snapshot::Ready(tasks) => tasks,
            Snapshot::Loading | Snapshot::Failed(_) => &[],
        }
    }
}

/// A live query owned by whoever subscribed. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    scope: TaskScope,
    _registration: ListenerRegistration,
}

impl Subscription {
    pub fn cancel(self) {
        debug!(scope = ?self.scope, "subscription cancelled");
    }
}

pub struct TaskGateway {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl TaskGateway {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    pub fn current_uid(&self) -> Option<String> {
        self.identity.current_session().map(|session| session.uid)
    }

    fn require_uid(&self) -> Result<String, GatewayError> {
        self.current_uid().ok_or(GatewayError::NotAuthenticated)
    }

    /// Registers `on_snapshot` for `scope`. The first snapshot is delivered
    /// before this returns; later ones follow every write to the collection.
    #[instrument(skip(self, on_snapshot))]
    pub fn subscribe<F>(&self, scope: TaskScope, on_snapshot: F) -> Subscription
    where
        F: Fn(Snapshot) + Send + Sync + 'static,
    {
        let Some(uid) = self.current_uid() else {
            warn!(?scope, "subscription refused without a session");
            on_snapshot(Snapshot::Failed(GatewayError::NotAuthenticated.to_string()));
            return Subscription {
                scope,
                _registration: ListenerRegistration::detached(),
            };
        };

        let query = scope.query(&uid);
        let listener_scope = scope.clone();
        let registration = self.store.listen(
            query,
            Box::new(move |result| {
                let scope = &listener_scope;
                let snapshot = match result {
                    Ok(docs) => match decode_tasks(docs) {
                        Ok(tasks) => Snapshot::Ready(tasks),
                        Err(err) => {
                            warn!(?scope, error = %err, "snapshot contained an undecodable task");
                            Snapshot::Failed(err.to_string())
                        }
                    },
                    Err(err) => {
                        warn!(?scope, error = %err, "live query failed");
                        Snapshot::Failed(err.to_string())
                    }
                };
                on_snapshot(snapshot);
            }),
        );

        Subscription {
            scope,
            _registration: registration,
        }
    }

    /// One-shot read of `scope`.
    #[instrument(skip(self))]
    pub fn fetch(&self, scope: TaskScope) -> Result<Vec<Task>, GatewayError> {
        let uid = self.require_uid()?;
        let docs = self.store.query(&scope.query(&uid))?;
        decode_tasks(docs)
    }

    /// Returns `None` when the task is missing or belongs to someone else.
    #[instrument(skip(self))]
    pub fn get_by_id(&self, id: &str) -> Result<Option<Task>, GatewayError> {
        let uid = self.require_uid()?;
        let Some(doc) = self.store.get(TASKS, id)? else {
            return Ok(None);
        };
        let task = decode_task(doc)?;
        Ok((task.user_id == uid).then_some(task))
    }

    /// Creates the task when it has no id yet, otherwise replaces the stored
    /// document wholesale. The owner is always the current user.
    #[instrument(skip(self, task), fields(id = %task.id))]
    pub fn save(&self, task: &Task) -> Result<Task, GatewayError> {
        if task.title.trim().is_empty() {
            return Err(ValidationError::new(Field::Title, "Title is required").into());
        }
        let uid = self.require_uid()?;

        let mut stored = task.clone();
        if stored.is_persisted() {
            self.require_owned(&uid, &stored.id)?;
        } else {
            stored.id = self.store.new_id(TASKS);
        }
        stored.user_id = uid;

        self.store.set(TASKS, &stored.id, encode_task(&stored)?)?;
        info!(id = %stored.id, "saved task");
        Ok(stored)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let uid = self.require_uid()?;
        self.require_owned(&uid, id)?;
        self.store.delete(TASKS, id)?;
        info!(id, "deleted task");
        Ok(())
    }

    pub fn archive(&self, id: &str) -> Result<(), GatewayError> {
        self.patch(id, IS_ARCHIVED, json!(true))
    }

    pub fn unarchive(&self, id: &str) -> Result<(), GatewayError> {
        self.patch(id, IS_ARCHIVED, json!(false))
    }

    pub fn set_completed(&self, id: &str, completed: bool) -> Result<(), GatewayError> {
        self.patch(id, IS_COMPLETED, json!(completed))
    }

    /// Removes every task the user owns, archived ones included, in one
    /// batch. Returns how many were removed.
    #[instrument(skip(self))]
    pub fn delete_all(&self) -> Result<usize, GatewayError> {
        let uid = self.require_uid()?;
        let docs = self.store.query(&TaskScope::Owned.query(&uid))?;

        let mut batch = WriteBatch::new();
        for doc in &docs {
            batch.delete(TASKS, doc.id.as_str());
        }
        let count = batch.len();
        if !batch.is_empty() {
            self.store.commit(batch)?;
        }
        info!(count, "deleted all tasks");
        Ok(count)
    }

    #[instrument(skip(self, value))]
    fn patch(&self, id: &str, field: &str, value: Value) -> Result<(), GatewayError> {
        let uid = self.require_uid()?;
        self.require_owned(&uid, id)?;
        self.store.update(TASKS, id, field, value)?;
        debug!(id, field, "patched task");
        Ok(())
    }

    fn require_owned(&self, uid: &str, id: &str) -> Result<(), GatewayError> {
        let owner = self
            .store
            .get(TASKS, id)?
            .and_then(|doc| doc.get(USER_ID).and_then(Value::as_str).map(str::to_string));
        match owner {
            Some(owner) if owner == uid => Ok(()),
            _ => Err(GatewayError::NotFound(id.to_string())),
        }
    }
}

fn encode_task(task: &Task) -> Result<Fields, GatewayError> {
    match serde_json::to_value(task).map_err(StoreError::from)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::from(<serde_json::Error as serde::ser::Error>::custom(
            format!("task encoded as {other}, expected an object"),
        ))
        .into()),
    }
}

fn decode_task(doc: Document) -> Result<Task, GatewayError> {
    let Document { id, data } = doc;
    let mut task: Task = serde_json::from_value(Value::Object(data))
        .map_err(|source| GatewayError::Decode {
            id: id.clone(),
            source,
        })?;
    task.id = id;
    Ok(task)
}

fn decode_tasks(docs: Vec<Document>) -> Result<Vec<Task>, GatewayError> {
    docs.into_iter().map(decode_task).collect()
}
