//! Operator request authentication via timestamp and hash validation
//!
//! Operator requests carry a JSON body with two extra fields:
//! - `timestamp`: Unix epoch milliseconds, at most 1000ms in the past and
//!   1ms in the future
//! - `hash`: SHA-256 (64 hex chars) of the canonical JSON body, with the
//!   hash field replaced by 64 zeros, followed by the shared secret as a
//!   decimal i64
//!
//! The shared secret lives in the `settings` table under
//! `api_shared_secret`. A secret of 0 disables checking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

/// Settings key holding the shared secret
pub const SHARED_SECRET_KEY: &str = "api_shared_secret";

/// Accepted clock skew into the past, in milliseconds
pub const MAX_PAST_MS: i64 = 1000;

/// Accepted clock skew into the future, in milliseconds
pub const MAX_FUTURE_MS: i64 = 1;

const DUMMY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Authentication fields every operator request body carries
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthFields {
    pub timestamp: i64,
    pub hash: String,
}

/// Authentication error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiAuthError {
    /// Timestamp outside the accepted skew window
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Hash does not match the body
    #[error("Invalid hash")]
    InvalidHash { provided: String, calculated: String },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Load the shared secret, generating and storing one on first use
#[cfg(feature = "sqlx")]
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let result: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(SHARED_SECRET_KEY)
        .fetch_optional(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((value,)) => value
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e))),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate a random non-zero secret and store it
#[cfg(feature = "sqlx")]
async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let secret: i64 = {
        let mut rng = rand::thread_rng();
        loop {
            let val = rng.gen::<i64>();
            if val != 0 {
                break val;
            }
        }
    };

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(SHARED_SECRET_KEY)
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(secret)
}

/// Validate a request timestamp against the local clock
///
/// # Examples
///
/// ```
/// use festq_common::api::auth::validate_timestamp;
///
/// let now = festq_common::time::now_millis();
/// assert!(validate_timestamp(now - 500).is_ok());
/// assert!(validate_timestamp(now - 2000).is_err());
/// ```
pub fn validate_timestamp(timestamp: i64) -> Result<(), ApiAuthError> {
    validate_timestamp_at(timestamp, crate::time::now_millis())
}

fn validate_timestamp_at(timestamp: i64, now: i64) -> Result<(), ApiAuthError> {
    let diff = now - timestamp;

    if diff > MAX_PAST_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms past)", diff, MAX_PAST_MS),
        });
    }

    if diff < -MAX_FUTURE_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms future)",
                diff.abs(),
                MAX_FUTURE_MS
            ),
        });
    }

    Ok(())
}

/// Calculate the request hash
///
/// # Examples
///
/// ```
/// use festq_common::api::auth::calculate_hash;
/// use serde_json::json;
///
/// let body = json!({"trackId": "abc", "timestamp": 1730000000000i64, "hash": ""});
/// assert_eq!(calculate_hash(&body, 42).len(), 64);
/// ```
pub fn calculate_hash(json_value: &Value, shared_secret: i64) -> String {
    let mut body = json_value.clone();
    if let Value::Object(fields) = &mut body {
        fields.insert("hash".to_string(), Value::from(DUMMY_HASH));
    }

    let mut message = to_canonical_json(&body);
    message.push_str(&shared_secret.to_string());

    let digest = Sha256::digest(message.as_bytes());
    format!("{:x}", digest)
}

/// Canonical JSON: object keys sorted, no whitespace
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&fields[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

/// Quote with only backslash and double quote escaped
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Validate that `provided_hash` matches the body
pub fn validate_hash(
    provided_hash: &str,
    json_value: &Value,
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_hash(json_value, shared_secret);

    if provided_hash != calculated {
        return Err(ApiAuthError::InvalidHash {
            provided: provided_hash.to_string(),
            calculated,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_window() {
        let now = 1_730_000_000_000;
        assert!(validate_timestamp_at(now, now).is_ok());
        assert!(validate_timestamp_at(now - 1000, now).is_ok());
        assert!(validate_timestamp_at(now + 1, now).is_ok());
        assert!(validate_timestamp_at(now - 1001, now).is_err());
        assert!(validate_timestamp_at(now + 2, now).is_err());
    }

    #[test]
    fn test_hash_ignores_provided_hash_value() {
        let a = json!({"roundId": "r", "timestamp": 1, "hash": "x"});
        let b = json!({"roundId": "r", "timestamp": 1, "hash": "y"});
        assert_eq!(calculate_hash(&a, 7), calculate_hash(&b, 7));
    }

    #[test]
    fn test_hash_depends_on_secret_and_body() {
        let body = json!({"trackId": "t1", "timestamp": 1, "hash": ""});
        let other = json!({"trackId": "t2", "timestamp": 1, "hash": ""});
        assert_ne!(calculate_hash(&body, 1), calculate_hash(&body, 2));
        assert_ne!(calculate_hash(&body, 1), calculate_hash(&other, 1));
    }

    #[test]
    fn test_canonical_json_sorted_without_whitespace() {
        let value = json!({"z": [1, 2], "a": {"y": true, "b": null}});
        assert_eq!(to_canonical_json(&value), r#"{"a":{"b":null,"y":true},"z":[1,2]}"#);
    }

    #[test]
    fn test_validate_hash() {
        let body = json!({"candidateTrackIds": ["a"], "timestamp": 5, "hash": ""});
        let secret = 123_456_789;
        let hash = calculate_hash(&body, secret);
        assert!(validate_hash(&hash, &body, secret).is_ok());
        assert!(matches!(
            validate_hash(DUMMY_HASH, &body, secret),
            Err(ApiAuthError::InvalidHash { .. })
        ));
    }

    #[cfg(feature = "sqlx")]
    #[tokio::test]
    async fn test_shared_secret_generated_once() {
        let pool = crate::db::init_memory_database().await.unwrap();
        let first = load_shared_secret(&pool).await.unwrap();
        assert_ne!(first, 0);
        assert_eq!(load_shared_secret(&pool).await.unwrap(), first);
    }
}
