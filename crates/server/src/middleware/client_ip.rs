use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use vite_proxy_core::utils::TrustedProxies;

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Rate-limit identity of the client behind a request.
///
/// `None` when the peer address is unknown, which disables rate limiting for the request.
#[derive(Clone, Debug, Default)]
pub struct ClientKey(pub Option<String>);

/// Resolves the client key from the peer address and `X-Forwarded-For`, and stores it in the
/// request extensions.
pub async fn client_ip_middleware(
    State(trusted): State<Arc<TrustedProxies>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
    let key = peer.map(|peer| {
        let forwarded_for =
            request.headers().get(&X_FORWARDED_FOR).and_then(|value| value.to_str().ok());
        trusted.resolve(peer, forwarded_for)
    });

    request.extensions_mut().insert(ClientKey(key));
    next.run(request).await
}
