use std::fmt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt document in {} line {line}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("failed to persist {}: {message}", .path.display())]
    Persist { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    FullName,
    Username,
    Email,
    Password,
    ConfirmPassword,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Title => "title",
            Field::FullName => "full name",
            Field::Username => "username",
            Field::Email => "email",
            Field::Password => "password",
            Field::ConfirmPassword => "confirm password",
        };
        f.write_str(name)
    }
}

/// Input rejected before anything is written. Carries the offending field
/// so the caller can point at it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: Field,
    pub message: &'static str,
}

impl ValidationError {
    pub fn new(field: Field, message: &'static str) -> Self {
        Self { field, message }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {id} could not be decoded: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email already exists")]
    EmailInUse,

    #[error("Login failed: invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to save user data: {0}")]
    Store(#[from] StoreError),

    #[error("profile for {uid} could not be decoded: {source}")]
    Profile {
        uid: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session file {} unusable: {message}", .path.display())]
    Session { path: PathBuf, message: String },

    #[error("password hashing failed: {0}")]
    Hash(String),
}
