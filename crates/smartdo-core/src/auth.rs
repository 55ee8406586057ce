//! Account creation, sign-in and the current session.
//!
//! The rest of the crate only sees [`IdentityProvider`]; the local
//! implementation keeps Argon2id password hashes (PHC strings) in the
//! `accounts` collection and the signed-in session in `session.json`.

use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::docstore::{DocumentStore, Fields};
use crate::error::{AuthError, StoreError};
use crate::user::User;
use crate::validate::RegistrationForm;

pub const ACCOUNTS: &str = "accounts";
pub const USERS: &str = "users";
pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub email: String,
}

pub trait IdentityProvider: Send + Sync {
    /// Creates the account and signs it in. Returns the new subject id.
    fn create_account(&self, email: &str, password: &str) -> Result<String, AuthError>;

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    fn sign_out(&self) -> Result<(), AuthError>;

    fn current_session(&self) -> Option<Session>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    uid: String,
    email: String,
    password_hash: String,
    #[serde(with = "crate::datetime::epoch_millis_serde")]
    created_at: DateTime<Utc>,
}

pub struct LocalIdentityProvider {
    store: Arc<dyn DocumentStore>,
    session_path: PathBuf,
    session: Mutex<Option<Session>>,
}

impl LocalIdentityProvider {
    /// Restores any session left by a previous run. An unreadable session
    /// file is logged and treated as signed out.
    #[instrument(skip(store))]
    pub fn open(store: Arc<dyn DocumentStore>, data_dir: &Path) -> Result<Self, AuthError> {
        let session_path = data_dir.join(SESSION_FILE);
        let session = match fs::read_to_string(&session_path) {
            Ok(raw) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(err) => {
                    warn!(file = %session_path.display(), error = %err, "ignoring corrupt session file");
                    None
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(AuthError::Session {
                    path: session_path,
                    message: err.to_string(),
                });
            }
        };
        debug!(signed_in = session.is_some(), "identity provider opened");

        Ok(Self {
            store,
            session_path,
            session: Mutex::new(session),
        })
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_session(&self, session: Session) -> Result<Session, AuthError> {
        let session_err = |message: String| AuthError::Session {
            path: self.session_path.clone(),
            message,
        };
        let dir = self.session_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| session_err(e.to_string()))?;
        let raw = serde_json::to_string_pretty(&session).map_err(|e| session_err(e.to_string()))?;
        writeln!(temp, "{raw}").map_err(|e| session_err(e.to_string()))?;
        temp.persist(&self.session_path)
            .map_err(|e| session_err(e.to_string()))?;

        *self.session() = Some(session.clone());
        info!(uid = %session.uid, "signed in");
        Ok(session)
    }

    fn load_account(&self, key: &str) -> Result<Option<Account>, AuthError> {
        let Some(doc) = self.store.get(ACCOUNTS, key)? else {
            return Ok(None);
        };
        let account = serde_json::from_value(Value::Object(doc.data)).map_err(|source| {
            AuthError::Profile {
                uid: key.to_string(),
                source,
            }
        })?;
        Ok(Some(account))
    }
}

impl IdentityProvider for LocalIdentityProvider {
    #[instrument(skip(self, password))]
    fn create_account(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let key = normalize_email(email);
        if self.load_account(&key)?.is_some() {
            return Err(AuthError::EmailInUse);
        }

        let account = Account {
            uid: self.store.new_id(ACCOUNTS),
            email: email.trim().to_string(),
            password_hash: hash_password(password)?,
            created_at: crate::datetime::truncate_millis(Utc::now()),
        };
        self.store.set(ACCOUNTS, &key, to_fields(&account)?)?;
        info!(uid = %account.uid, "account created");

        self.start_session(Session {
            uid: account.uid.clone(),
            email: account.email,
        })?;
        Ok(account.uid)
    }

    #[instrument(skip(self, password))]
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let account = self
            .load_account(&normalize_email(email))?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(&account.password_hash, password)? {
            return Err(AuthError::InvalidCredentials);
        }

        self.start_session(Session {
            uid: account.uid,
            email: account.email,
        })
    }

    fn sign_out(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.session_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AuthError::Session {
                    path: self.session_path.clone(),
                    message: err.to_string(),
                });
            }
        }
        if let Some(previous) = self.session().take() {
            info!(uid = %previous.uid, "signed out");
        }
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.session().clone()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Argon2id with default parameters and a fresh 16-byte salt, encoded as
/// a PHC string.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|err| AuthError::Hash(err.to_string()))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| AuthError::Hash(err.to_string()))?;
    Ok(hash.to_string())
}

/// Constant-time check against a stored PHC string. A stored value that
/// does not parse is an error, not a mismatch.
fn verify_password(stored: &str, password: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|err| AuthError::Hash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::from(<serde_json::Error as serde::ser::Error>::custom(
            format!("expected an object, got {other}"),
        ))),
    }
}

/// Validates the form, creates the account (which signs it in) and writes
/// the profile to `users` under the new subject id.
#[instrument(skip(provider, store, form), fields(email = %form.email))]
pub fn register(
    provider: &dyn IdentityProvider,
    store: &dyn DocumentStore,
    form: &RegistrationForm,
    now: DateTime<Utc>,
) -> Result<User, AuthError> {
    form.validate()?;
    let email = form.email.trim();
    let uid = provider.create_account(email, &form.password)?;

    let user = User {
        uid: uid.clone(),
        email: email.to_string(),
        username: form.username.trim().to_string(),
        full_name: form.full_name.trim().to_string(),
        created_at: crate::datetime::truncate_millis(now),
    };
    store.set(USERS, &uid, to_fields(&user)?)?;
    info!(%uid, "registered user");
    Ok(user)
}

pub fn fetch_profile(store: &dyn DocumentStore, uid: &str) -> Result<Option<User>, AuthError> {
    let Some(doc) = store.get(USERS, uid)? else {
        return Ok(None);
    };
    serde_json::from_value(Value::Object(doc.data))
        .map(Some)
        .map_err(|source| AuthError::Profile {
            uid: uid.to_string(),
            source,
        })
}
