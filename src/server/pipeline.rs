//! Request pipeline stages shared by the bridge endpoints
//!
//! Each stage takes the request context built so far and either mutates it or
//! short-circuits with a [`BridgeError`]. The order is fixed by the handlers:
//! log, authorize, extract upload, map message path, apply topic query, and
//! finally require a topic.

use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::convert::Infallible;
use tracing::{debug, info, warn};

/// Response body when `/post/` resolves no topic
pub const POST_TOPIC_MISSING: &str = "Topic not specified";
/// Response body when `/subscribe/` has no topic query parameter
pub const SUBSCRIBE_TOPIC_MISSING: &str = "topic not specified";
/// Largest JSON body accepted, in bytes
pub const JSON_BODY_LIMIT: usize = 100 * 1024;

/// Query parameters understood by the bridge. Empty values count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeQuery {
    /// Name of the single multipart file field to extract
    pub single: Option<String>,
    /// Body field copied into `message`
    pub path: Option<String>,
    /// Topic overriding the body topic
    pub topic: Option<String>,
}

impl BridgeQuery {
    pub fn single(&self) -> Option<&str> {
        non_empty(&self.single)
    }

    pub fn path(&self) -> Option<&str> {
        non_empty(&self.path)
    }

    pub fn topic(&self) -> Option<&str> {
        non_empty(&self.topic)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Where a request came from, for logging
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    /// Path plus query string, as requested
    pub url: String,
    /// `x-forwarded-for` when present, else the socket address
    pub client: String,
}

impl RequestMeta {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
        forwarded_for: Option<String>,
        remote: Option<std::net::SocketAddr>,
    ) -> Self {
        let path = path.into();
        let url = match query.as_deref() {
            Some(query) if !query.is_empty() => format!("{path}?{query}"),
            _ => path.clone(),
        };
        let client = forwarded_for
            .filter(|v| !v.is_empty())
            .or_else(|| remote.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            method: method.into(),
            path,
            url,
            client,
        }
    }
}

/// File extracted from a multipart body
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Mutable context threaded through the pipeline stages
#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    pub body: Map<String, Value>,
    pub file: Option<UploadedFile>,
    /// Set when `path` names the uploaded file field
    file_message: Option<Bytes>,
}

impl PostRequest {
    pub fn from_body(body: Map<String, Value>) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Bytes to publish for the resolved message
    pub fn payload(&self) -> Bytes {
        match &self.file_message {
            Some(data) => data.clone(),
            None => encode_message(self.body.get("message")),
        }
    }
}

/// Parse a request body the way a JSON body parser would: only
/// `application/json` bodies are read; anything else yields an empty object.
/// JSON bodies over [`JSON_BODY_LIMIT`] are rejected.
pub fn parse_json_body(content_type: Option<&str>, raw: &[u8]) -> BridgeResult<Map<String, Value>> {
    let is_json = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);

    if !is_json {
        return Ok(Map::new());
    }
    if raw.len() > JSON_BODY_LIMIT {
        return Err(BridgeError::PayloadTooLarge {
            limit: JSON_BODY_LIMIT,
        });
    }
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BridgeError::invalid_body("expected a JSON object")),
        Err(e) => Err(BridgeError::invalid_body(e.to_string())),
    }
}

/// Log the incoming request; the body is only included in debug mode
pub fn log_request(settings: &Settings, meta: &RequestMeta, body: &Map<String, Value>) {
    if settings.debug {
        let payload = Value::Object(body.clone());
        info!(
            method = %meta.method,
            url = %meta.url,
            client = %meta.client,
            body = %payload,
            "Received request"
        );
    } else {
        info!(
            method = %meta.method,
            url = %meta.url,
            client = %meta.client,
            "Received request"
        );
    }
}

/// Compare the configured auth key with the body `key` field
///
/// Fails open: with no key configured every request passes.
pub fn authorize(settings: &Settings, body: &Map<String, Value>) -> BridgeResult<()> {
    let Some(expected) = settings.auth_key.as_deref() else {
        return Ok(());
    };

    let provided = body.get("key").and_then(value_as_text);
    if provided.as_deref() == Some(expected) {
        Ok(())
    } else {
        warn!("Request is not authorized");
        Err(BridgeError::Unauthorized)
    }
}

/// Extract the single file field named `field` from a multipart body
///
/// Non-multipart requests pass through untouched. Text fields replace the
/// body; a file field under any other name is rejected.
pub async fn extract_single_upload(
    request: &mut PostRequest,
    field: &str,
    content_type: Option<&str>,
    raw: Bytes,
) -> BridgeResult<()> {
    let Some(content_type) = content_type.filter(|ct| is_multipart(ct)) else {
        debug!(field, "Upload requested but body is not multipart, skipping");
        return Ok(());
    };

    let boundary = multer::parse_boundary(content_type).map_err(|e| BridgeError::upload(e.to_string()))?;
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(raw) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Map::new();
    let mut file = None;

    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| BridgeError::upload(e.to_string()))?
    {
        let name = part.name().unwrap_or_default().to_string();

        if part.file_name().is_none() {
            let text = part.text().await.map_err(|e| BridgeError::upload(e.to_string()))?;
            fields.insert(name, Value::String(text));
            continue;
        }

        if name != field || file.is_some() {
            return Err(BridgeError::upload(format!("Unexpected field: {name}")));
        }

        let file_name = part.file_name().map(ToString::to_string);
        let file_type = part.content_type().map(ToString::to_string);
        let data = part.bytes().await.map_err(|e| BridgeError::upload(e.to_string()))?;

        debug!(field = %name, bytes = data.len(), "Extracted uploaded file");
        file = Some(UploadedFile {
            field_name: name,
            file_name,
            content_type: file_type,
            data,
        });
    }

    request.body = fields;
    request.file = file;
    Ok(())
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("multipart/")
}

/// Copy the body field named by `path` into `message`
///
/// A `path` naming the uploaded file field makes the file bytes the message.
/// A `path` naming a missing field clears the message.
pub fn map_message_path(request: &mut PostRequest, path: &str) {
    if let Some(file) = request.file.as_ref().filter(|f| f.field_name == path) {
        request.file_message = Some(file.data.clone());
        request.body.remove("message");
        return;
    }

    request.file_message = None;
    match request.body.get(path).cloned() {
        Some(value) => request.body.insert("message".to_string(), value),
        None => request.body.remove("message"),
    };
}

/// Query `topic` wins over any body topic
pub fn apply_topic_query(request: &mut PostRequest, topic: &str) {
    request
        .body
        .insert("topic".to_string(), Value::String(topic.to_string()));
}

/// Resolve the topic, failing with `missing` when there is none
pub fn ensure_topic(request: &PostRequest, missing: &'static str) -> BridgeResult<String> {
    request
        .body
        .get("topic")
        .filter(|value| is_truthy(value))
        .and_then(value_as_text)
        .ok_or(BridgeError::TopicNotSpecified(missing))
}

/// Encode a body `message` as an MQTT payload
///
/// Strings publish their bytes verbatim, other values their JSON text, and
/// a missing or null message publishes an empty payload.
pub fn encode_message(message: Option<&Value>) -> Bytes {
    match message {
        None | Some(Value::Null) => Bytes::new(),
        Some(Value::String(text)) => Bytes::from(text.clone()),
        Some(other) => Bytes::from(other.to_string()),
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test body must be an object"),
        }
    }

    fn settings_with_key(key: Option<&str>) -> Settings {
        Settings {
            auth_key: key.map(ToString::to_string),
            ..Settings::default()
        }
    }

    fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &str)]) -> Bytes {
        let mut out = String::new();
        for (name, file_name, content) in parts {
            out.push_str(&format!("--{boundary}\r\n"));
            match file_name {
                Some(file_name) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
                )),
                None => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            out.push_str(content);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{boundary}--\r\n"));
        Bytes::from(out)
    }

    #[test]
    fn test_query_treats_empty_values_as_absent() {
        let query = BridgeQuery {
            single: Some(String::new()),
            path: Some("payload".to_string()),
            topic: None,
        };
        assert_eq!(query.single(), None);
        assert_eq!(query.path(), Some("payload"));
        assert_eq!(query.topic(), None);
    }

    #[test]
    fn test_request_meta_prefers_forwarded_for() {
        let remote = Some("10.0.0.5:41000".parse().unwrap());

        let meta = RequestMeta::new(
            "POST",
            "/post/",
            None,
            Some("203.0.113.7".to_string()),
            remote,
        );
        assert_eq!(meta.client, "203.0.113.7");

        let meta = RequestMeta::new("POST", "/post/", None, None, remote);
        assert_eq!(meta.client, "10.0.0.5");

        let meta = RequestMeta::new("GET", "/keep_alive/", None, None, None);
        assert_eq!(meta.client, "unknown");
    }

    #[test]
    fn test_request_meta_url_keeps_query() {
        let meta = RequestMeta::new(
            "POST",
            "/post/",
            Some("topic=foo&path=reading".to_string()),
            None,
            None,
        );
        assert_eq!(meta.path, "/post/");
        assert_eq!(meta.url, "/post/?topic=foo&path=reading");

        let meta = RequestMeta::new("GET", "/keep_alive/", Some(String::new()), None, None);
        assert_eq!(meta.url, "/keep_alive/");
    }

    #[test]
    fn test_parse_json_body_enforces_size_limit() {
        let message = "x".repeat(JSON_BODY_LIMIT);
        let raw = format!(r#"{{"topic":"foo","message":"{message}"}}"#);

        let result = parse_json_body(Some("application/json"), raw.as_bytes());
        assert!(matches!(
            result,
            Err(BridgeError::PayloadTooLarge { limit }) if limit == JSON_BODY_LIMIT
        ));

        // The limit only applies to bodies read as JSON
        assert!(parse_json_body(Some("text/plain"), raw.as_bytes())
            .unwrap()
            .is_empty());

        let small = r#"{"topic":"foo"}"#;
        assert!(parse_json_body(Some("application/json"), small.as_bytes()).is_ok());
    }

    #[test]
    fn test_parse_json_body_only_reads_json() {
        let raw = br#"{"topic":"foo","message":"hi"}"#;

        let parsed = parse_json_body(Some("application/json; charset=utf-8"), raw).unwrap();
        assert_eq!(parsed.get("topic"), Some(&json!("foo")));

        assert!(parse_json_body(Some("text/plain"), raw).unwrap().is_empty());
        assert!(parse_json_body(None, raw).unwrap().is_empty());
        assert!(parse_json_body(Some("application/json"), b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_json_body_rejects_malformed_json() {
        let result = parse_json_body(Some("application/json"), b"{not json");
        assert!(matches!(result, Err(BridgeError::InvalidBody { .. })));

        let result = parse_json_body(Some("application/json"), b"[1,2]");
        assert!(matches!(result, Err(BridgeError::InvalidBody { .. })));
    }

    #[test]
    fn test_authorize_fails_open_without_key() {
        let settings = settings_with_key(None);
        assert!(authorize(&settings, &Map::new()).is_ok());
        assert!(authorize(&settings, &body(json!({"key": "anything"}))).is_ok());
    }

    #[test]
    fn test_authorize_compares_key() {
        let settings = settings_with_key(Some("s3cret"));

        assert!(authorize(&settings, &body(json!({"key": "s3cret"}))).is_ok());
        assert!(matches!(
            authorize(&settings, &body(json!({"key": "wrong"}))),
            Err(BridgeError::Unauthorized)
        ));
        assert!(matches!(
            authorize(&settings, &Map::new()),
            Err(BridgeError::Unauthorized)
        ));
    }

    #[test]
    fn test_authorize_accepts_numeric_key_matching_text() {
        let settings = settings_with_key(Some("1234"));
        assert!(authorize(&settings, &body(json!({"key": 1234}))).is_ok());
    }

    #[test]
    fn test_map_message_path_copies_field() {
        let mut request = PostRequest::from_body(body(json!({"payload": "hello", "message": "old"})));
        map_message_path(&mut request, "payload");
        assert_eq!(request.payload(), Bytes::from("hello"));
    }

    #[test]
    fn test_map_message_path_missing_field_clears_message() {
        let mut request = PostRequest::from_body(body(json!({"message": "old"})));
        map_message_path(&mut request, "payload");
        assert!(request.body.get("message").is_none());
        assert_eq!(request.payload(), Bytes::new());
    }

    #[test]
    fn test_topic_query_overrides_body() {
        let mut request = PostRequest::from_body(body(json!({"topic": "from-body"})));
        apply_topic_query(&mut request, "from-query");
        assert_eq!(
            ensure_topic(&request, POST_TOPIC_MISSING).unwrap(),
            "from-query"
        );
    }

    #[test]
    fn test_ensure_topic_rejects_missing_and_falsy() {
        for value in [json!({}), json!({"topic": ""}), json!({"topic": null}), json!({"topic": 0})] {
            let request = PostRequest::from_body(body(value));
            let err = ensure_topic(&request, POST_TOPIC_MISSING).unwrap_err();
            assert_eq!(err.to_string(), "Topic not specified");
        }
    }

    #[test]
    fn test_encode_message() {
        assert_eq!(encode_message(None), Bytes::new());
        assert_eq!(encode_message(Some(&Value::Null)), Bytes::new());
        assert_eq!(encode_message(Some(&json!("21.5"))), Bytes::from("21.5"));
        assert_eq!(encode_message(Some(&json!(21.5))), Bytes::from("21.5"));
        assert_eq!(
            encode_message(Some(&json!({"temp": 21}))),
            Bytes::from(r#"{"temp":21}"#)
        );
    }

    #[tokio::test]
    async fn test_extract_single_upload_reads_file_and_fields() {
        let raw = multipart_body(
            "XyZ",
            &[
                ("topic", None, "uploads"),
                ("document", Some("notes.txt"), "file contents"),
            ],
        );
        let mut request = PostRequest::default();

        extract_single_upload(
            &mut request,
            "document",
            Some("multipart/form-data; boundary=XyZ"),
            raw,
        )
        .await
        .unwrap();

        assert_eq!(request.body.get("topic"), Some(&json!("uploads")));
        let file = request.file.clone().unwrap();
        assert_eq!(file.field_name, "document");
        assert_eq!(file.file_name.as_deref(), Some("notes.txt"));
        assert_eq!(file.data, Bytes::from("file contents"));

        map_message_path(&mut request, "document");
        assert_eq!(request.payload(), Bytes::from("file contents"));
    }

    #[tokio::test]
    async fn test_extract_single_upload_rejects_unexpected_file() {
        let raw = multipart_body("XyZ", &[("other", Some("a.bin"), "data")]);
        let mut request = PostRequest::default();

        let result = extract_single_upload(
            &mut request,
            "document",
            Some("multipart/form-data; boundary=XyZ"),
            raw,
        )
        .await;

        assert!(matches!(result, Err(BridgeError::Upload { .. })));
    }

    #[tokio::test]
    async fn test_extract_single_upload_skips_non_multipart() {
        let mut request = PostRequest::from_body(body(json!({"topic": "foo"})));
        extract_single_upload(&mut request, "document", Some("application/json"), Bytes::new())
            .await
            .unwrap();

        assert_eq!(request.body.get("topic"), Some(&json!("foo")));
        assert!(request.file.is_none());
    }

    #[tokio::test]
    async fn test_extract_single_upload_requires_boundary() {
        let mut request = PostRequest::default();
        let result =
            extract_single_upload(&mut request, "document", Some("multipart/form-data"), Bytes::new())
                .await;
        assert!(matches!(result, Err(BridgeError::Upload { .. })));
    }
}
