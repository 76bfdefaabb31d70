use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session payload persisted by feature code after login.
///
/// Only the identity-bearing fields are modeled; other fields in the stored
/// payload are ignored. Ids may arrive as numbers or strings, under
/// `userId`, `user_id` or `id` (first non-empty wins, in that order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", from = "RawSnapshot")]
pub struct SessionSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Single-role form used by older payloads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
}

/// Wire shape of a stored session. Every spelling of a field is kept apart
/// so payloads carrying several of them still parse.
#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default, rename = "userId")]
    user_id_camel: Option<Value>,
    #[serde(default, rename = "user_id")]
    user_id_snake: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, rename = "userType")]
    user_type_camel: Option<String>,
    #[serde(default, rename = "user_type")]
    user_type_snake: Option<String>,
}

impl From<RawSnapshot> for SessionSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        let user_id = [raw.user_id_camel, raw.user_id_snake, raw.id]
            .into_iter()
            .find_map(|value| value.and_then(identifier));

        Self {
            user_id,
            roles: raw.roles.unwrap_or_default(),
            role: raw.role,
            user_type: raw.user_type_camel.or(raw.user_type_snake),
        }
    }
}

fn identifier(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identity attached to outgoing requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: Option<String>,
    /// Normalized role keys, first-seen order, no duplicates
    pub roles: Vec<String>,
    pub user_type: Option<String>,
}

impl SessionIdentity {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let mut roles: Vec<String> = Vec::new();
        let candidates = snapshot.roles.iter().chain(snapshot.role.iter());
        for role in candidates {
            if let Some(key) = normalize_role(role) {
                if !roles.contains(&key) {
                    roles.push(key);
                }
            }
        }

        Self {
            user_id: snapshot.user_id.clone(),
            roles,
            user_type: snapshot.user_type.as_deref().and_then(normalize_role),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.roles.is_empty() && self.user_type.is_none()
    }
}

/// Lower-case, trim, and collapse internal whitespace runs to `-`.
/// Returns `None` when nothing is left.
pub fn normalize_role(raw: &str) -> Option<String> {
    let key = raw
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}
