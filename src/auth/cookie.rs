//! Cookie parsing and Set-Cookie construction.

use axum::http::{HeaderMap, HeaderValue, header};

/// Cookie carrying the signed access token.
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie carrying the encrypted session-presence marker.
pub const PRESENCE_COOKIE_NAME: &str = "session_check";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Build a Set-Cookie value. `max_age: None` makes a browser-session cookie.
pub fn build_cookie(name: &str, value: &str, max_age: Option<u64>, secure: bool) -> String {
    let mut cookie = format!("{}={}; HttpOnly; SameSite=Lax; Path=/", name, value);
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a Set-Cookie value that deletes the cookie.
pub fn clear_cookie(name: &str, secure: bool) -> String {
    build_cookie(name, "", Some(0), secure)
}

/// Append a Set-Cookie header. Values that are not valid header text are skipped.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}

/// Append Set-Cookie headers deleting both session cookies.
pub fn clear_session_cookies(headers: &mut HeaderMap, secure: bool) {
    append_set_cookie(headers, &clear_cookie(ACCESS_COOKIE_NAME, secure));
    append_set_cookie(headers, &clear_cookie(PRESENCE_COOKIE_NAME, secure));
}
