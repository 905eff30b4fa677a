use std::{convert::Infallible, net::SocketAddr};

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::HeaderMap;

use crate::state::AppState;

/// Whether `X-Forwarded-For` comes from a proxy we control. Off by default:
/// any client can write the header, so trusting it lets one caller appear as
/// many.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardedPolicy {
    pub trust_forwarded_for: bool,
}

impl FromRef<AppState> for ForwardedPolicy {
    fn from_ref(state: &AppState) -> Self {
        state.forwarded
    }
}

/// Address the redemption limiter keys on: the socket peer, or the first
/// `X-Forwarded-For` hop when the deployment trusts its proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, policy: ForwardedPolicy) -> Self {
        if policy.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(ip) = forwarded {
                return ClientIp(ip.to_string());
            }
        }

        let peer = peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        ClientIp(peer)
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    ForwardedPolicy: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;
    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let policy = ForwardedPolicy::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp::resolve(&parts.headers, peer, policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    use crate::{
        error::AppError,
        rate_limit::{RateLimitPolicy, RedemptionLimiter},
    };

    async fn extract(forwarded_for: &str, policy: ForwardedPolicy) -> ClientIp {
        let peer: SocketAddr = "198.51.100.20:41000".parse().unwrap();
        let (mut parts, _) = Request::builder()
            .header("x-forwarded-for", forwarded_for)
            .extension(ConnectInfo(peer))
            .body(())
            .unwrap()
            .into_parts();
        ClientIp::from_request_parts(&mut parts, &policy)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn untrusted_header_falls_back_to_the_peer() {
        let untrusted = ForwardedPolicy::default();
        let first = extract("1.1.1.1", untrusted).await;
        let second = extract("1.1.1.2, 10.0.0.1", untrusted).await;
        assert_eq!(first, ClientIp("198.51.100.20".into()));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn trusted_proxy_supplies_the_first_hop() {
        let trusted = ForwardedPolicy {
            trust_forwarded_for: true,
        };
        assert_eq!(
            extract("1.1.1.2, 10.0.0.1", trusted).await,
            ClientIp("1.1.1.2".into())
        );
        assert_eq!(
            ClientIp::resolve(&HeaderMap::new(), None, trusted),
            ClientIp("unknown".into())
        );
    }

    #[tokio::test]
    async fn rotating_forwarded_for_still_arms_the_cooldown() {
        let limiter = RedemptionLimiter::in_memory(RateLimitPolicy::default());
        for n in 1..=5 {
            let ClientIp(client) = extract(&format!("1.1.1.{n}"), ForwardedPolicy::default()).await;
            limiter.admit(&client).await.unwrap();
            limiter.record_failure(&client).await;
        }
        let ClientIp(client) = extract("1.1.1.6", ForwardedPolicy::default()).await;
        assert!(matches!(
            limiter.admit(&client).await,
            Err(AppError::TooManyFailedAttempts)
        ));
    }
}
