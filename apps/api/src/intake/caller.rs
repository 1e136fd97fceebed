use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

/// Who is asking: the network address used for quota, and the owner used for history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub address: String,
    pub owner: String,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let address = client_address(headers);
        // The auth layer in front of the API sets x-user-id for signed-in users.
        let owner = header_value(headers, "x-user-id").unwrap_or_else(|| address.clone());
        Self { address, owner }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller::from_headers(&parts.headers))
    }
}

/// cf-connecting-ip, then the first x-forwarded-for hop, then x-real-ip.
pub fn client_address(headers: &HeaderMap) -> String {
    header_value(headers, "cf-connecting-ip")
        .or_else(|| {
            header_value(headers, "x-forwarded-for")
                .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
        })
        .or_else(|| header_value(headers, "x-real-ip"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_cloudflare_header_wins() {
        let h = headers(&[
            ("cf-connecting-ip", "1.1.1.1"),
            ("x-forwarded-for", "2.2.2.2"),
            ("x-real-ip", "3.3.3.3"),
        ]);
        assert_eq!(client_address(&h), "1.1.1.1");
    }

    #[test]
    fn test_first_forwarded_hop_is_used() {
        let h = headers(&[("x-forwarded-for", "2.2.2.2, 10.0.0.1"), ("x-real-ip", "3.3.3.3")]);
        assert_eq!(client_address(&h), "2.2.2.2");
    }

    #[test]
    fn test_unknown_without_headers() {
        assert_eq!(client_address(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_owner_prefers_user_id() {
        let caller = Caller::from_headers(&headers(&[("x-real-ip", "3.3.3.3"), ("x-user-id", "u-42")]));
        assert_eq!(caller.address, "3.3.3.3");
        assert_eq!(caller.owner, "u-42");

        let anonymous = Caller::from_headers(&headers(&[("x-real-ip", "3.3.3.3")]));
        assert_eq!(anonymous.owner, "3.3.3.3");
    }
}
