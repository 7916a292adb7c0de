//! Endpoint handlers
//!
//! Every handler logs the request first and short-circuits through
//! [`BridgeError`] rejections, which [`super::recover`] turns into responses.

use super::pipeline::{
    apply_topic_query, authorize, ensure_topic, extract_single_upload, log_request,
    map_message_path, parse_json_body, BridgeQuery, PostRequest, RequestMeta, POST_TOPIC_MISSING,
    SUBSCRIBE_TOPIC_MISSING,
};
use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::mqtt::HealthMonitor;
use crate::transport::{Subscription, Transport};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Map;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;
use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::Rejection;

/// `GET /keep_alive/`: publish the configured keep-alive message
pub async fn keep_alive<T: Transport>(
    meta: RequestMeta,
    settings: Arc<Settings>,
    transport: Arc<T>,
) -> Result<Response, Rejection> {
    log_request(&settings, &meta, &Map::new());

    let keep_alive = &settings.keep_alive;
    let payload = Bytes::from(keep_alive.message.clone());
    if let Err(e) = transport.publish(&keep_alive.topic, payload).await {
        warn!(topic = %keep_alive.topic, error = %e, "Keep-alive publish failed");
    }

    Ok(ok_response())
}

/// `POST /post/`: run the full pipeline, then publish the resolved message
pub async fn post<T: Transport>(
    meta: RequestMeta,
    query: BridgeQuery,
    content_type: Option<String>,
    raw: Bytes,
    settings: Arc<Settings>,
    transport: Arc<T>,
) -> Result<Response, Rejection> {
    let span = crate::request_span!(request_id = %Uuid::new_v4(), method = %meta.method, path = %meta.path);

    publish_request(meta, query, content_type, raw, &settings, transport.as_ref())
        .instrument(span)
        .await
        .map_err(warp::reject::custom)
}

async fn publish_request<T: Transport>(
    meta: RequestMeta,
    query: BridgeQuery,
    content_type: Option<String>,
    raw: Bytes,
    settings: &Settings,
    transport: &T,
) -> BridgeResult<Response> {
    let body = parse_json_body(content_type.as_deref(), &raw)?;
    log_request(settings, &meta, &body);
    authorize(settings, &body)?;

    let mut request = PostRequest::from_body(body);
    if let Some(field) = query.single() {
        extract_single_upload(&mut request, field, content_type.as_deref(), raw).await?;
    }
    if let Some(path) = query.path() {
        map_message_path(&mut request, path);
    }
    if let Some(topic) = query.topic() {
        apply_topic_query(&mut request, topic);
    }
    let topic = ensure_topic(&request, POST_TOPIC_MISSING)?;

    let payload = request.payload();
    let bytes = payload.len();
    match transport.publish(&topic, payload).await {
        Ok(()) => debug!(%topic, bytes, "Dispatched publish"),
        Err(e) => warn!(%topic, error = %e, "Publish failed"),
    }

    Ok(ok_response())
}

/// `GET /subscribe/`: stream raw payloads from `topic` until the client goes away
pub async fn subscribe<T: Transport>(
    meta: RequestMeta,
    query: BridgeQuery,
    content_type: Option<String>,
    raw: Bytes,
    settings: Arc<Settings>,
    transport: Arc<T>,
) -> Result<Response, Rejection> {
    let span = crate::request_span!(request_id = %Uuid::new_v4(), method = %meta.method, path = %meta.path);

    open_stream(meta, query, content_type, raw, &settings, transport.as_ref())
        .instrument(span)
        .await
        .map_err(warp::reject::custom)
}

async fn open_stream<T: Transport>(
    meta: RequestMeta,
    query: BridgeQuery,
    content_type: Option<String>,
    raw: Bytes,
    settings: &Settings,
    transport: &T,
) -> BridgeResult<Response> {
    let body = parse_json_body(content_type.as_deref(), &raw)?;
    log_request(settings, &meta, &body);
    authorize(settings, &body)?;

    let topic = query
        .topic()
        .ok_or(BridgeError::TopicNotSpecified(SUBSCRIBE_TOPIC_MISSING))?;

    let subscription = transport.open_subscription(topic)?;
    info!(topic, "Streaming subscription opened");

    Ok(stream_response(subscription))
}

/// Response whose body is the subscription's payloads, concatenated
///
/// The body owns the subscription, so hyper dropping the body on client
/// disconnect or completion closes the dedicated connection.
pub fn stream_response(subscription: Subscription) -> Response {
    let body = warp::hyper::Body::wrap_stream(subscription.map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
}

/// Health report for the shared publisher connection
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub mqtt: &'static str,
    pub active_subscriptions: usize,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_transport<T: Transport>(transport: &T) -> Self {
        let state = transport.connection_state();
        Self {
            status: if HealthMonitor::is_healthy(&state) {
                "healthy"
            } else {
                "degraded"
            },
            mqtt: state.label(),
            active_subscriptions: transport.active_subscriptions(),
            timestamp: Utc::now(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        if self.status == "healthy" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// `GET /health/`
pub async fn health<T: Transport>(transport: Arc<T>) -> Result<Response, Infallible> {
    let report = HealthReport::from_transport(transport.as_ref());
    let status = report.status_code();
    Ok(warp::reply::with_status(warp::reply::json(&report), status).into_response())
}

fn ok_response() -> Response {
    warp::reply::with_status("OK", StatusCode::OK).into_response()
}
