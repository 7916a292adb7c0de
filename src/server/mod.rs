//! HTTP surface of the bridge
//!
//! | Route               | Handler                     |
//! |---------------------|-----------------------------|
//! | `GET /keep_alive/`  | [`handlers::keep_alive`]    |
//! | `POST /post/`       | [`handlers::post`]          |
//! | `GET /subscribe/`   | [`handlers::subscribe`]     |
//! | `GET /health/`      | [`handlers::health`]        |
//!
//! Trailing slashes are optional.

pub mod filters;
pub mod handlers;
pub mod pipeline;

use crate::config::Settings;
use crate::error::BridgeError;
use crate::transport::Transport;
use filters::{bridge_query, raw_body, request_meta, with_settings, with_transport};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};

/// All bridge routes with error recovery applied
pub fn routes<T: Transport>(
    settings: Arc<Settings>,
    transport: Arc<T>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let keep_alive = warp::path("keep_alive")
        .and(warp::path::end())
        .and(warp::get())
        .and(request_meta())
        .and(with_settings(settings.clone()))
        .and(with_transport(transport.clone()))
        .and_then(handlers::keep_alive::<T>);

    let post = warp::path("post")
        .and(warp::path::end())
        .and(warp::post())
        .and(request_meta())
        .and(bridge_query())
        .and(raw_body())
        .and(with_settings(settings.clone()))
        .and(with_transport(transport.clone()))
        .and_then(handlers::post::<T>);

    let subscribe = warp::path("subscribe")
        .and(warp::path::end())
        .and(warp::get())
        .and(request_meta())
        .and(bridge_query())
        .and(raw_body())
        .and(with_settings(settings))
        .and(with_transport(transport.clone()))
        .and_then(handlers::subscribe::<T>);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_transport(transport))
        .and_then(handlers::health::<T>);

    keep_alive
        .or(post)
        .unify()
        .or(subscribe)
        .unify()
        .or(health)
        .unify()
        .recover(recover)
}

/// Map rejections to plain-text responses
pub async fn recover(rejection: Rejection) -> Result<Response, Infallible> {
    if let Some(error) = rejection.find::<BridgeError>() {
        return Ok(error_response(error));
    }

    let status = if rejection.is_not_found() {
        StatusCode::NOT_FOUND
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        StatusCode::BAD_REQUEST
    } else {
        warn!("Unhandled rejection: {:?}", rejection);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let reason = status.canonical_reason().unwrap_or("Error");
    Ok(warp::reply::with_status(reason, status).into_response())
}

/// Response for a pipeline error; the body is the error's display text
pub fn error_response(error: &BridgeError) -> Response {
    let status = error.status_code();
    if status.is_server_error() {
        warn!(%status, "Request failed: {}", error);
    }
    warp::reply::with_status(error.to_string(), status).into_response()
}

/// Bind the HTTP listener and serve until `shutdown` resolves
pub async fn serve<T, F>(
    settings: Arc<Settings>,
    transport: Arc<T>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    T: Transport,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let (bound, server) = warp::serve(routes(settings, transport))
        .try_bind_with_graceful_shutdown(addr, shutdown)?;

    info!(address = %bound, "HTTP bridge listening");
    server.await;
    info!("HTTP bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockTransport;

    fn test_routes(
        transport: Arc<MockTransport>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        routes(Arc::new(Settings::default()), transport)
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let transport = Arc::new(MockTransport::new());

        let response = warp::test::request()
            .method("GET")
            .path("/nope/")
            .reply(&test_routes(transport))
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let transport = Arc::new(MockTransport::new());

        let response = warp::test::request()
            .method("GET")
            .path("/post/")
            .reply(&test_routes(transport.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_trailing_slash_is_optional() {
        let transport = Arc::new(MockTransport::new());

        let response = warp::test::request()
            .method("GET")
            .path("/keep_alive")
            .reply(&test_routes(transport.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.published().len(), 1);
    }

    #[test]
    fn test_error_response_uses_display_text() {
        let response = error_response(&BridgeError::Unauthorized);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
