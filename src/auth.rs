use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;

use crate::config::AuthConfig;

/// Check HTTP Basic credentials against the configured pair. Disabled
/// auth accepts everything.
pub fn check_basic_auth(headers: &HeaderMap, auth: &AuthConfig) -> bool {
    if !auth.enabled {
        return true;
    }
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    match credentials.split_once(':') {
        Some((username, password)) => username == auth.username && password == auth.password,
        None => false,
    }
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"rpicam\"")],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(enabled: bool) -> AuthConfig {
        AuthConfig {
            enabled,
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn headers_with(credentials: &str) -> HeaderMap {
        let token = base64::engine::general_purpose::STANDARD.encode(credentials);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {}", token).parse().unwrap(),
        );
        headers
    }

    #[test]
    fn disabled_auth_accepts_anything() {
        assert!(check_basic_auth(&HeaderMap::new(), &auth(false)));
    }

    #[test]
    fn correct_credentials_pass() {
        assert!(check_basic_auth(&headers_with("user:pass"), &auth(true)));
    }

    #[test]
    fn wrong_password_fails() {
        assert!(!check_basic_auth(&headers_with("user:nope"), &auth(true)));
    }

    #[test]
    fn missing_or_malformed_header_fails() {
        assert!(!check_basic_auth(&HeaderMap::new(), &auth(true)));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer xyz".parse().unwrap());
        assert!(!check_basic_auth(&headers, &auth(true)));

        let token = base64::engine::general_purpose::STANDARD.encode("no-colon");
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {}", token).parse().unwrap(),
        );
        assert!(!check_basic_auth(&headers, &auth(true)));
    }
}
