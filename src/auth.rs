//! HTTP Basic authentication for the upload route.

use crate::errors::AppError;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::{fmt, sync::Arc};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// The single username/password pair accepted by the service.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Both halves are always compared so timing does not reveal which one
    /// was wrong.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = secure_compare(username.as_bytes(), self.username.as_bytes());
        let pass_ok = secure_compare(password.as_bytes(), self.password.as_bytes());
        user_ok & pass_ok
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Middleware for `route_layer(from_fn_with_state(..))`.
pub async fn require_basic_auth(
    State(credentials): State<Arc<Credentials>>,
    request: Request,
    next: Next,
) -> Response {
    match basic_credentials(request.headers()) {
        Some((user, pass)) if credentials.verify(&user, &pass) => {
            debug!(username = %user, "request authenticated");
            next.run(request).await
        }
        Some((user, _)) => {
            warn!(username = %user, path = %request.uri().path(), "invalid credentials");
            AppError::unauthorized("invalid credentials").into_response()
        }
        None => {
            warn!(path = %request.uri().path(), "missing or malformed authorization header");
            AppError::unauthorized("authentication required").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn verify_requires_both_halves() {
        let creds = Credentials::new("admin", "s3cret");
        assert!(creds.verify("admin", "s3cret"));
        assert!(!creds.verify("admin", "wrong"));
        assert!(!creds.verify("root", "s3cret"));
        assert!(!creds.verify("", ""));
        assert!(!creds.verify("admin", "s3cret "));
    }

    #[test]
    fn parses_basic_header() {
        let encoded = STANDARD.encode("admin:pa:ss");
        let parsed = basic_credentials(&headers(&format!("Basic {encoded}")));
        assert_eq!(parsed, Some(("admin".into(), "pa:ss".into())));
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
        assert_eq!(basic_credentials(&headers("Bearer abc")), None);
        assert_eq!(basic_credentials(&headers("Basic !!!")), None);
        let no_colon = STANDARD.encode("admin");
        assert_eq!(basic_credentials(&headers(&format!("Basic {no_colon}"))), None);
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("admin", "s3cret"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("s3cret"));
    }
}
