//! Reusable warp filters for dependency injection and request extraction

use super::pipeline::{BridgeQuery, RequestMeta};
use crate::config::Settings;
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

/// Inject the shared settings
pub fn with_settings(
    settings: Arc<Settings>,
) -> impl Filter<Extract = (Arc<Settings>,), Error = Infallible> + Clone {
    warp::any().map(move || settings.clone())
}

/// Inject the shared transport
pub fn with_transport<T: Send + Sync + 'static>(
    transport: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = Infallible> + Clone {
    warp::any().map(move || transport.clone())
}

/// Method, URL and client address of the request
pub fn request_meta() -> impl Filter<Extract = (RequestMeta,), Error = warp::Rejection> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(raw_query())
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and(warp::addr::remote())
        .map(
            |method: warp::http::Method, path: warp::path::FullPath, query, forwarded, remote| {
                RequestMeta::new(method.as_str(), path.as_str(), query, forwarded, remote)
            },
        )
}

/// Raw query string; `None` when the request has none
fn raw_query() -> impl Filter<Extract = (Option<String>,), Error = Infallible> + Clone {
    warp::query::raw()
        .map(Some)
        .or(warp::any().map(|| None))
        .unify()
}

/// Bridge query parameters; a missing query string yields all `None`
pub fn bridge_query() -> impl Filter<Extract = (BridgeQuery,), Error = warp::Rejection> + Clone {
    warp::query::<BridgeQuery>()
}

/// Raw body together with its content type
pub fn raw_body(
) -> impl Filter<Extract = (Option<String>, Bytes), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("content-type").and(warp::body::bytes())
}
