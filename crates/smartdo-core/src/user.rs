use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::epoch_millis_serde;

/// Profile written once at registration and keyed by the identity
/// provider's subject id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: String,
    pub username: String,
    pub full_name: String,
    #[serde(with = "epoch_millis_serde")]
    pub created_at: DateTime<Utc>,
}
