//! Caller identity as consumed by the show server.
//!
//! Session management lives elsewhere; here a caller is either the
//! administrator (presents the admin password) or a voter with a durable
//! id carried in a cookie.

use axum::http::header::{AUTHORIZATION, COOKIE, ORIGIN};
use axum::http::{HeaderMap, HeaderValue};

pub const VOTER_COOKIE: &str = "voter-id";
pub const ADMIN_COOKIE: &str = "admin-password";

const MAX_VOTER_ID_LEN: usize = 128;
/// One year, matching the lifetime of the voter's session.
const VOTER_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 365;

/// Value of the first cookie called `name`.
pub fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

pub fn is_admin(headers: &HeaderMap, password: &str) -> bool {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer == Some(password) || cookie(headers, ADMIN_COOKIE) == Some(password)
}

pub fn same_origin(headers: &HeaderMap, origin: &str) -> bool {
    headers.get(ORIGIN).and_then(|v| v.to_str().ok()) == Some(origin)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIdentity {
    pub id: String,
    /// True when the id was just created and must be handed to the client.
    pub minted: bool,
}

impl VoterIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match cookie(headers, VOTER_COOKIE) {
            Some(id) if !id.is_empty() && id.len() <= MAX_VOTER_ID_LEN => Self {
                id: id.to_string(),
                minted: false,
            },
            _ => Self {
                id: uuid::Uuid::new_v4().to_string(),
                minted: true,
            },
        }
    }

    /// `Set-Cookie` value persisting a freshly minted id.
    pub fn set_cookie(&self) -> Option<HeaderValue> {
        if !self.minted {
            return None;
        }
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            VOTER_COOKIE, self.id, VOTER_COOKIE_MAX_AGE
        ))
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn finds_cookie_among_many() {
        let h = headers(&[("cookie", "a=1; voter-id=abc ; b=2")]);
        assert_eq!(cookie(&h, "voter-id"), Some("abc"));
        assert_eq!(cookie(&h, "b"), Some("2"));
        assert_eq!(cookie(&h, "missing"), None);
    }

    #[test]
    fn admin_by_bearer_or_cookie() {
        assert!(is_admin(&headers(&[("authorization", "Bearer pw")]), "pw"));
        assert!(is_admin(&headers(&[("cookie", "admin-password=pw")]), "pw"));
        assert!(!is_admin(&headers(&[("authorization", "Bearer nope")]), "pw"));
        assert!(!is_admin(&HeaderMap::new(), "pw"));
    }

    #[test]
    fn origin_must_match_exactly() {
        let h = headers(&[("origin", "http://localhost:8081")]);
        assert!(same_origin(&h, "http://localhost:8081"));
        assert!(!same_origin(&h, "https://evil.example"));
        assert!(!same_origin(&HeaderMap::new(), "http://localhost:8081"));
    }

    #[test]
    fn voter_identity_reuses_cookie_or_mints() {
        let known = VoterIdentity::from_headers(&headers(&[("cookie", "voter-id=v-123")]));
        assert_eq!(known.id, "v-123");
        assert!(known.set_cookie().is_none());

        let fresh = VoterIdentity::from_headers(&HeaderMap::new());
        assert!(fresh.minted);
        let cookie = fresh.set_cookie().unwrap();
        assert!(cookie.to_str().unwrap().starts_with(&format!("voter-id={}", fresh.id)));
    }
}
