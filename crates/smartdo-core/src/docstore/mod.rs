//! Document store boundary: collections of JSON documents with equality
//! queries, single-field ordering and live listeners that re-deliver the
//! full result set after every write.

mod file;
mod listeners;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use file::FileStore;
pub use listeners::{ListenerRegistration, ListenerRegistry};

use crate::error::StoreError;

pub type Fields = serde_json::Map<String, Value>;

/// Callback invoked with the full current result set of a live query, or
/// the error that prevented computing it.
pub type Listener = Box<dyn Fn(Result<Vec<Document>, StoreError>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// Filters and orders `docs`. The sort is stable, so documents with equal
    /// keys keep their storage order.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|doc| self.matches(doc)).collect();
        if let Some((field, direction)) = &self.order_by {
            out.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }
        out
    }
}

/// Ids of deletes applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    deletes: Vec<(String, String)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(&mut self, collection: impl Into<String>, id: impl Into<String>) {
        self.deletes.push((collection.into(), id.into()));
    }

    pub fn len(&self) -> usize {
        self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
    }

    pub(crate) fn into_deletes(self) -> Vec<(String, String)> {
        self.deletes
    }
}

pub trait DocumentStore: Send + Sync {
    /// Allocates a fresh document id; nothing is written.
    fn new_id(&self, collection: &str) -> String;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Creates or fully replaces a document.
    fn set(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError>;

    /// Replaces one field of an existing document.
    fn update(&self, collection: &str, id: &str, field: &str, value: Value)
    -> Result<(), StoreError>;

    /// Removing a missing document is not an error.
    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Registers a live query. The listener sees the current result set
    /// before this returns and again after every write to the collection,
    /// until the registration is dropped.
    fn listen(&self, query: Query, listener: Listener) -> ListenerRegistration;
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn type_rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Direction, Document, Query};

    fn doc(id: &str, value: serde_json::Value) -> Document {
        Document {
            id: id.to_string(),
            data: value.as_object().cloned().expect("object literal"),
        }
    }

    #[test]
    fn equality_filters_and_descending_order() {
        let docs = vec![
            doc("a", json!({"userId": "u1", "createdAt": 10, "isArchived": false})),
            doc("b", json!({"userId": "u2", "createdAt": 30, "isArchived": false})),
            doc("c", json!({"userId": "u1", "createdAt": 20, "isArchived": false})),
            doc("d", json!({"userId": "u1", "createdAt": 40, "isArchived": true})),
        ];

        let query = Query::collection("tasks")
            .where_eq("userId", "u1")
            .where_eq("isArchived", false)
            .order_by("createdAt", Direction::Descending);

        let ids: Vec<String> = query.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn missing_order_field_sorts_first_ascending() {
        let docs = vec![
            doc("dated", json!({"dueDate": 5})),
            doc("undated", json!({})),
        ];
        let query = Query::collection("tasks").order_by("dueDate", Direction::Ascending);
        let ids: Vec<String> = query.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["undated", "dated"]);
    }
}
