use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::{epoch_millis_serde, truncate_millis};

/// Stored as `HIGH`, `MEDIUM` or `LOW`. Any other stored value decodes to
/// `Unknown` and is written back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
    Unknown(String),
}

impl Priority {
    /// Position in the priority sort: lower ranks come first, unknown
    /// values last.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
            Priority::Unknown(_) => 3,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::Unknown(raw) => raw,
        }
    }

    pub fn short_label(&self) -> &str {
        match self {
            Priority::Medium => "MED",
            other => other.as_str(),
        }
    }
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "HIGH" => Priority::High,
            "MEDIUM" => Priority::Medium,
            "LOW" => Priority::Low,
            _ => Priority::Unknown(raw),
        }
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses user input, which must name one of the three levels.
impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h" | "high" => Ok(Priority::High),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "l" | "low" => Ok(Priority::Low),
            other => Err(anyhow!(
                "unknown priority: {other} (expected HIGH, MEDIUM or LOW)"
            )),
        }
    }
}

/// Stored by display name. Unrecognised stored names decode to `Unknown`.
#[derive(
    Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(from = "String", into = "String")]
pub enum Category {
    #[default]
    General,
    Work,
    Personal,
    Shopping,
    Study,
    Unknown(String),
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::General,
        Category::Work,
        Category::Personal,
        Category::Shopping,
        Category::Study,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Category::General => "General",
            Category::Work => "Work",
            Category::Personal => "Personal",
            Category::Shopping => "Shopping",
            Category::Study => "Study",
            Category::Unknown(raw) => raw,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Category::Unknown(_))
    }

    fn known(name: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(name))
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == raw)
            .unwrap_or_else(|| Category::Unknown(raw))
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        match category {
            Category::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses user input, which must name one of the built-in categories.
impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::known(wanted).ok_or_else(|| {
            anyhow!(
                "unknown category: {wanted} (expected one of General, Work, Personal, \
                 Shopping, Study)"
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub user_id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, with = "epoch_millis_serde::option")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub category: Category,

    #[serde(default)]
    pub is_completed: bool,

    #[serde(default)]
    pub is_archived: bool,

    #[serde(with = "epoch_millis_serde")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// A task that has not been saved yet: no id, no owner.
    pub fn draft(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            user_id: String::new(),
            title: title.into(),
            description: String::new(),
            due_date: None,
            priority: Priority::default(),
            category: Category::default(),
            is_completed: false,
            is_archived: false,
            created_at: truncate_millis(now),
        }
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed && self.due_date.is_some_and(|due| due < now)
    }

    pub fn is_due_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.due_date
            .is_some_and(|due| start <= due && due <= end)
    }

    /// `needle` must already be lowercased.
    pub fn mentions(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn status_label(&self) -> &'static str {
        match (self.is_completed, self.is_archived) {
            (true, true) => "Completed & Archived",
            (false, true) => "Archived",
            (true, false) => "Completed",
            (false, false) => "Pending",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{Category, Priority, Task};

    #[test]
    fn priority_and_category_parse_case_insensitively() {
        assert_eq!("high".parse::<Priority>().expect("high"), Priority::High);
        assert_eq!("MED".parse::<Priority>().expect("med"), Priority::Medium);
        assert_eq!("l".parse::<Priority>().expect("low"), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());

        assert_eq!("work".parse::<Category>().expect("work"), Category::Work);
        assert_eq!(
            "SHOPPING".parse::<Category>().expect("shopping"),
            Category::Shopping
        );
        assert!("Errands".parse::<Category>().is_err());
    }

    #[test]
    fn document_shape_uses_camel_case_and_epoch_millis() {
        let created = Utc
            .with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
            .single()
            .expect("valid created");
        let mut task = Task::draft("Buy groceries", created);
        task.id = "abc".to_string();
        task.user_id = "u1".to_string();
        task.priority = Priority::High;
        task.category = Category::Shopping;

        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["userId"], json!("u1"));
        assert_eq!(value["priority"], json!("HIGH"));
        assert_eq!(value["category"], json!("Shopping"));
        assert_eq!(value["isCompleted"], json!(false));
        assert_eq!(value["isArchived"], json!(false));
        assert_eq!(value["dueDate"], json!(null));
        assert_eq!(value["createdAt"], json!(created.timestamp_millis()));
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let task: Task = serde_json::from_value(json!({
            "title": "Call mom",
            "createdAt": 1_767_225_600_000_i64
        }))
        .expect("deserialize");

        assert!(!task.is_persisted());
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.category, Category::General);
        assert!(!task.is_completed);
        assert!(!task.is_archived);
        assert!(task.due_date.is_none());
    }

    #[test]
    fn unknown_stored_values_decode_and_write_back_unchanged() {
        let task: Task = serde_json::from_value(json!({
            "title": "x",
            "priority": "URGENT",
            "category": "Errands",
            "createdAt": 0
        }))
        .expect("decode");
        assert_eq!(task.priority, Priority::Unknown("URGENT".to_string()));
        assert_eq!(task.priority.rank(), 3);
        assert_eq!(task.priority.to_string(), "URGENT");
        assert_eq!(task.category, Category::Unknown("Errands".to_string()));

        let value = serde_json::to_value(&task).expect("encode");
        assert_eq!(value["priority"], json!("URGENT"));
        assert_eq!(value["category"], json!("Errands"));
    }

    #[test]
    fn overdue_requires_incomplete_and_past_due() {
        let now = Utc
            .with_ymd_and_hms(2026, 1, 10, 0, 0, 0)
            .single()
            .expect("valid now");
        let mut task = Task::draft("Pay rent", now);
        task.due_date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single();

        assert!(task.is_overdue(now));
        task.is_completed = true;
        assert!(!task.is_overdue(now));
    }
}
