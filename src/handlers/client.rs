use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};

use crate::state::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// リクエスト元のIPアドレス
///
/// `trust_forwarded_for` 有効時は X-Forwarded-For の先頭を優先し、
/// それ以外は接続元アドレスを使う。どちらも取れなければ `None`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.trust_forwarded_for
            && let Some(ip) = forwarded_for(&parts.headers)
        {
            return Ok(Self(Some(ip)));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(Self(peer))
    }
}

/// X-Forwarded-For の先頭（クライアント側）のアドレス
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers), "203.0.113.7".parse().ok());
    }

    #[test]
    fn test_forwarded_for_invalid_or_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers), None);

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("not-an-ip"));
        assert_eq!(forwarded_for(&headers), None);
    }

    #[test]
    fn test_forwarded_for_ipv6() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("2001:db8::1"));
        assert_eq!(forwarded_for(&headers), "2001:db8::1".parse().ok());
    }
}
