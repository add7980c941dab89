//! The `session_id` cookie.
//!
//! The cookie carries only the opaque session identifier. It is always
//! `HttpOnly`, `SameSite=Lax` and scoped to `/`; `Secure` is added when the
//! server is configured for TLS.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::session::MAX_SESSION_AGE;

/// Name of the cookie holding the session identifier.
pub const SESSION_COOKIE_NAME: &str = "session_id";

/// Builds the cookie that carries a session identifier.
///
/// Remembered sessions get a `Max-Age` of `max_age_secs` (capped at
/// [`MAX_SESSION_AGE`]); other sessions get a browser-session cookie.
pub fn session_cookie(
    session_id: impl Into<String>,
    remember_me: bool,
    max_age_secs: i64,
    secure: bool,
) -> Cookie<'static> {
    let mut builder = Cookie::build((SESSION_COOKIE_NAME, session_id.into()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure);

    if remember_me {
        let max_age = max_age_secs.clamp(0, MAX_SESSION_AGE);
        builder = builder.max_age(time::Duration::seconds(max_age));
    }

    builder.build()
}

/// Builds a cookie that makes the browser drop the session identifier.
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .max_age(time::Duration::seconds(-1))
        .build()
}

/// Reads the session identifier from the request cookies.
pub fn session_id_from(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    #[test]
    fn remembered_cookie_has_max_age_and_attributes() {
        let cookie = session_cookie("abc", true, 1000, true);
        let rendered = cookie.to_string();

        assert!(rendered.starts_with("session_id=abc"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("Max-Age=1000"));
    }

    #[test]
    fn unremembered_cookie_has_no_max_age() {
        let rendered = session_cookie("abc", false, 1000, false).to_string();
        assert!(!rendered.contains("Max-Age"));
        assert!(!rendered.contains("Secure"));
        assert!(rendered.contains("HttpOnly"));
    }

    #[test]
    fn max_age_is_capped() {
        let cookie = session_cookie("abc", true, MAX_SESSION_AGE * 2, false);
        assert_eq!(
            cookie.max_age(),
            Some(time::Duration::seconds(MAX_SESSION_AGE))
        );
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let rendered = clear_session_cookie(false).to_string();
        assert!(rendered.starts_with("session_id=;"));
        assert!(rendered.contains("Max-Age=-1"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("HttpOnly"));
    }

    #[test]
    fn reads_session_id_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_id=abc-123"),
        );
        let jar = CookieJar::from_headers(&headers);
        assert_eq!(session_id_from(&jar), Some("abc-123".to_string()));
    }

    #[test]
    fn empty_session_id_reads_as_none() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session_id="));
        let jar = CookieJar::from_headers(&headers);
        assert_eq!(session_id_from(&jar), None);

        assert_eq!(session_id_from(&CookieJar::new()), None);
    }

    #[test]
    fn set_cookie_round_trips_through_jar() {
        let cookie = session_cookie("round-trip-id", true, 60, false);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{}={}", cookie.name(), cookie.value())).unwrap(),
        );
        let jar = CookieJar::from_headers(&headers);
        assert_eq!(session_id_from(&jar).as_deref(), Some("round-trip-id"));
    }
}
