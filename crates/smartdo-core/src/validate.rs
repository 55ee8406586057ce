use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{Field, ValidationError};
use crate::task::{Category, Priority, Task};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_USERNAME_LEN: usize = 3;

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
                .ok()
        })
        .as_ref()
}

pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_some_and(|re| re.is_match(email))
}

fn require(field: Field, value: &str, message: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field, message))
    } else {
        Ok(())
    }
}

/// Fields entered when creating or editing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub category: Category,
}

impl TaskForm {
    /// Form pre-filled from an existing task, for the edit path.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            due_date: task.due_date,
            priority: task.priority.clone(),
            category: task.category.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require(Field::Title, &self.title, "Title is required")
    }

    /// Produces the task to save. With `base` the form edits that task and
    /// keeps its id, owner, flags and creation time; without it a new draft
    /// stamped at `now` is built.
    pub fn apply_to(&self, base: Option<&Task>, now: DateTime<Utc>) -> Result<Task, ValidationError> {
        self.validate()?;
        let mut task = match base {
            Some(existing) => existing.clone(),
            None => Task::draft(String::new(), now),
        };
        task.title = self.title.trim().to_string();
        task.description = self.description.trim().to_string();
        task.due_date = self.due_date;
        task.priority = self.priority.clone();
        task.category = self.category.clone();
        Ok(task)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(Field::Email, &self.email, "Email is required")?;
        if self.password.is_empty() {
            return Err(ValidationError::new(Field::Password, "Password is required"));
        }
        if !is_valid_email(self.email.trim()) {
            return Err(ValidationError::new(Field::Email, "Please enter a valid email"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(
                Field::Password,
                "Password must be at least 6 characters",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationForm {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    /// Checks fields in form order and reports the first failure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(Field::FullName, &self.full_name, "Full name is required")?;
        require(Field::Username, &self.username, "Username is required")?;
        if self.username.trim().chars().count() < MIN_USERNAME_LEN {
            return Err(ValidationError::new(
                Field::Username,
                "Username must be at least 3 characters",
            ));
        }
        require(Field::Email, &self.email, "Email is required")?;
        if !is_valid_email(self.email.trim()) {
            return Err(ValidationError::new(Field::Email, "Please enter a valid email"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::new(Field::Password, "Password is required"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(
                Field::Password,
                "Password must be at least 6 characters",
            ));
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::new(
                Field::ConfirmPassword,
                "Passwords do not match",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{LoginForm, RegistrationForm, TaskForm, is_valid_email};
    use crate::error::Field;
    use crate::task::{Category, Priority, Task};

    fn registration() -> RegistrationForm {
        RegistrationForm {
            full_name: "Ada Lovelace".to_string(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        }
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("a.b+c@mail.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("two@@example.com"));
    }

    #[test]
    fn registration_reports_first_failing_field() {
        assert!(registration().validate().is_ok());

        let mut form = registration();
        form.username = "ab".to_string();
        assert_eq!(form.validate().expect_err("short").field, Field::Username);

        let mut form = registration();
        form.email = "nope".to_string();
        assert_eq!(form.validate().expect_err("email").field, Field::Email);

        let mut form = registration();
        form.password = "12345".to_string();
        form.confirm_password = "12345".to_string();
        assert_eq!(form.validate().expect_err("short").field, Field::Password);

        let mut form = registration();
        form.confirm_password = "secret2".to_string();
        assert_eq!(
            form.validate().expect_err("mismatch").field,
            Field::ConfirmPassword
        );

        let mut form = registration();
        form.full_name = "  ".to_string();
        form.username = String::new();
        assert_eq!(form.validate().expect_err("blank").field, Field::FullName);
    }

    #[test]
    fn login_requires_both_fields_then_shape() {
        let form = LoginForm {
            email: String::new(),
            password: "secret1".to_string(),
        };
        assert_eq!(form.validate().expect_err("blank").field, Field::Email);

        let form = LoginForm {
            email: "ada@example.com".to_string(),
            password: "short".to_string(),
        };
        let err = form.validate().expect_err("short");
        assert_eq!(err.field, Field::Password);
        assert_eq!(err.message, "Password must be at least 6 characters");
    }

    #[test]
    fn task_form_trims_and_keeps_identity_on_edit() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().expect("date");
        let blank = TaskForm {
            title: "   ".to_string(),
            ..TaskForm::default()
        };
        assert_eq!(blank.validate().expect_err("blank").message, "Title is required");

        let mut existing = Task::draft("Old", now);
        existing.id = "abc".to_string();
        existing.user_id = "u1".to_string();
        existing.is_completed = true;

        let form = TaskForm {
            title: "  New title ".to_string(),
            description: " notes ".to_string(),
            due_date: None,
            priority: Priority::High,
            category: Category::Study,
        };
        let edited = form.apply_to(Some(&existing), now).expect("edit");
        assert_eq!(edited.id, "abc");
        assert_eq!(edited.user_id, "u1");
        assert!(edited.is_completed);
        assert_eq!(edited.title, "New title");
        assert_eq!(edited.description, "notes");
        assert_eq!(edited.priority, Priority::High);
        assert_eq!(edited.created_at, existing.created_at);

        let created = form.apply_to(None, now).expect("create");
        assert!(!created.is_persisted());
        assert_eq!(created.category, Category::Study);
    }
}
