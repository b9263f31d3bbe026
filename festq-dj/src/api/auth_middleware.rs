//! Operator claim middleware
//!
//! Every request gets a [`Role`] extension. Requests that carry valid
//! `timestamp` + `hash` fields (JSON body for POST/PUT, query string for
//! GET/DELETE) are `Operator`; requests without them are `Listener`.
//! Fields that are present but fail validation are rejected with 401.
//! A shared secret of 0 makes every caller an operator.

use crate::api::server::AppContext;
use crate::service::Role;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use festq_common::api::{validate_hash, validate_timestamp, ApiAuthError};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Upper bound on buffered request bodies
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Attach the caller's role to the request
pub async fn role_claim(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let shared_secret = ctx.shared_secret;

    let (role, mut request) = if shared_secret == 0 {
        (Role::Operator, request)
    } else {
        match request.method() {
            &Method::GET | &Method::DELETE | &Method::HEAD => {
                let role = query_claim(request.uri().query(), shared_secret)?;
                (role, request)
            }
            _ => body_claim(request, shared_secret).await?,
        }
    };

    request.extensions_mut().insert(role);
    Ok(next.run(request).await)
}

/// Claim from `timestamp` and `hash` query parameters
fn query_claim(query: Option<&str>, shared_secret: i64) -> Result<Role, AuthError> {
    let mut timestamp: Option<&str> = None;
    let mut hash: Option<&str> = None;

    for pair in query.unwrap_or("").split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            match key {
                "timestamp" => timestamp = Some(value),
                "hash" => hash = Some(value),
                _ => {}
            }
        }
    }

    match (timestamp, hash) {
        (None, None) => Ok(Role::Listener),
        (Some(timestamp), Some(hash)) => {
            let timestamp: i64 = timestamp
                .parse()
                .map_err(|_| AuthError::Malformed("timestamp must be an integer".to_string()))?;
            let fields = json!({ "timestamp": timestamp, "hash": hash });
            verify(timestamp, hash, &fields, shared_secret)
        }
        _ => Err(AuthError::Malformed(
            "timestamp and hash must be sent together".to_string(),
        )),
    }
}

/// Claim from `timestamp` and `hash` fields of a JSON body
///
/// The body is buffered and handed on unchanged.
async fn body_claim(request: Request, shared_secret: i64) -> Result<(Role, Request), AuthError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AuthError::Malformed(format!("failed to read body: {}", e)))?;

    let role = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => {
            let timestamp = value.get("timestamp").and_then(Value::as_i64);
            let hash = value.get("hash").and_then(Value::as_str);
            match (timestamp, hash) {
                (Some(timestamp), Some(hash)) => verify(timestamp, hash, &value, shared_secret)?,
                (None, None) => Role::Listener,
                _ => {
                    return Err(AuthError::Malformed(
                        "timestamp and hash must be sent together".to_string(),
                    ))
                }
            }
        }
        // Not JSON: no claim; the handler reports the body error
        Err(_) => Role::Listener,
    };

    Ok((role, Request::from_parts(parts, Body::from(bytes))))
}

fn verify(timestamp: i64, hash: &str, fields: &Value, shared_secret: i64) -> Result<Role, AuthError> {
    validate_timestamp(timestamp).map_err(|e| match e {
        ApiAuthError::InvalidTimestamp { reason, .. } => AuthError::InvalidTimestamp(reason),
        other => AuthError::Malformed(other.to_string()),
    })?;

    validate_hash(hash, fields, shared_secret).map_err(|e| {
        if let ApiAuthError::InvalidHash { provided, calculated } = &e {
            warn!(
                "Hash validation failed: provided={}, calculated={}",
                provided, calculated
            );
        }
        AuthError::InvalidHash
    })?;

    debug!("Operator claim accepted");
    Ok(Role::Operator)
}

/// Authentication error types for HTTP responses
#[derive(Debug)]
pub enum AuthError {
    InvalidTimestamp(String),
    InvalidHash,
    Malformed(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::InvalidTimestamp(reason) => (
                StatusCode::UNAUTHORIZED,
                format!("Invalid timestamp: {}", reason),
            ),
            AuthError::InvalidHash => (StatusCode::UNAUTHORIZED, "Invalid hash".to_string()),
            AuthError::Malformed(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
