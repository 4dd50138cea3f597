// ============================================================================
// Wire codec - HTTP <-> bus envelopes
// ============================================================================
//
// Converts in both directions between real HTTP requests/responses and the
// JSON envelopes that travel over the bus. The envelope schema is fixed:
// PascalCase field names, bodies carried as base64 strings.
//
// Subject derivation: the first three path segments become the bus routing
// key (`/api/v1/order`), the third segment names the downstream service.
//
// ============================================================================

use std::collections::HashMap;

use axum::body::Body;
use axum::response::Response;
use http::StatusCode;
use portico_config::CodecConfig;
use portico_error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Bare paths accepted without the full `/api/...` prefix, mapped to their
/// canonical form before subject derivation.
fn shortcut_path(path: &str) -> Option<&'static str> {
    match path {
        "/callback" => Some("/api/v1/auth/Callback"),
        _ => None,
    }
}

/// Request envelope: what travels from the gateway to a service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    #[serde(rename = "Header", default)]
    pub header: HashMap<String, Vec<String>>,
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Body", with = "base64_bytes", default)]
    pub body: Vec<u8>,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "ServiceName")]
    pub service_name: String,
}

/// Response envelope: what a service sends back
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    #[serde(rename = "StatusCode")]
    pub status_code: u16,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Body", with = "base64_bytes", default)]
    pub body: Vec<u8>,
    #[serde(rename = "Headers", default)]
    pub headers: HashMap<String, Vec<String>>,
}

impl RequestEnvelope {
    /// Encode a real HTTP request into an envelope.
    ///
    /// GET requests are rewritten to POST: query parameters are collected
    /// into a JSON object that becomes the body. Cookies are collapsed into
    /// a single semicolon-joined `Cookie` header entry.
    pub fn from_http(
        parts: &http::request::Parts,
        body: &[u8],
        codec: &CodecConfig,
    ) -> AppResult<Self> {
        let path = normalize_path(parts.uri.path())?;
        let subject = subject_from_path(&path);
        let service_name = path
            .trim_start_matches('/')
            .split('/')
            .nth(2)
            .unwrap_or_default()
            .to_string();

        let mut header = collect_headers(&parts.headers);
        collapse_cookies(&parts.headers, &mut header);

        let (method, url, body) = if parts.method == http::Method::GET {
            let query_body = query_to_json(parts.uri.query().unwrap_or(""), codec)?;
            let url = format!("{}{}", codec.backend_endpoint, path);
            ("POST".to_string(), url, query_body)
        } else {
            (parts.method.to_string(), path, body.to_vec())
        };

        Ok(Self {
            header,
            method,
            body,
            url,
            subject,
            service_name,
        })
    }

    /// Append a header value, keeping existing entries
    pub fn add_header(&mut self, key: &str, value: &str) {
        self.header
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Decode the envelope back into an HTTP request for internal routing
    /// on the service side.
    pub fn into_http_request(self) -> AppResult<http::Request<Body>> {
        let uri: http::Uri = if self.url.contains("://") {
            self.url.parse()
        } else if self.url.starts_with('/') {
            self.url.parse()
        } else {
            format!("/{}", self.url).parse()
        }
        .map_err(|e| AppError::validation(format!("invalid envelope url {:?}: {}", self.url, e)))?;

        let method = http::Method::from_bytes(self.method.as_bytes())
            .map_err(|e| AppError::validation(format!("invalid envelope method: {e}")))?;

        let mut builder = http::Request::builder().method(method).uri(uri);
        for (key, values) in &self.header {
            for value in values {
                builder = builder.header(key, value);
            }
        }

        builder
            .body(Body::from(self.body))
            .map_err(|e| AppError::internal(format!("fail to rebuild http request: {e}")))
    }
}

impl ResponseEnvelope {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status: String::new(),
            body: Vec::new(),
            headers: HashMap::new(),
        }
    }

    /// Encode an accumulated service reply into an envelope
    pub fn from_reply(
        status_code: u16,
        headers: HashMap<String, Vec<String>>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            status_code,
            status: String::new(),
            body,
            headers,
        }
    }

    /// Write the envelope to a real HTTP response. Hop-by-hop headers
    /// (`Content-Length`, `Transfer-Encoding`) are skipped; the HTTP server
    /// regenerates them.
    pub fn into_http_response(self) -> AppResult<Response> {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut builder = Response::builder().status(status);
        for (key, values) in &self.headers {
            if is_hop_by_hop(key) {
                continue;
            }
            for value in values {
                builder = builder.header(key, value);
            }
        }

        builder
            .body(Body::from(self.body))
            .map_err(|e| AppError::internal(format!("fail to build http response: {e}")))
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding")
}

/// Resolve shortcuts and reject paths with fewer than three segments
fn normalize_path(path: &str) -> AppResult<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 3 {
        return Ok(path.to_string());
    }
    shortcut_path(path)
        .map(str::to_string)
        .ok_or_else(|| AppError::validation("path is not valid"))
}

/// Bus routing key: the first three path segments
fn subject_from_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments[..3].join("/"))
}

fn collect_headers(headers: &http::HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    out
}

/// Collapse however many `Cookie` headers the client sent into a single
/// semicolon-joined entry on the envelope.
fn collapse_cookies(headers: &http::HeaderMap, out: &mut HashMap<String, Vec<String>>) {
    let pairs: Vec<String> = headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if !pairs.is_empty() {
        out.insert("cookie".to_string(), vec![pairs.join("; ")]);
    }
}

/// Collect query parameters into a JSON object body for the GET->POST
/// rewrite. Key casing is preserved unless the compatibility flag asks for
/// the legacy title-casing.
fn query_to_json(query: &str, codec: &CodecConfig) -> AppResult<Vec<u8>> {
    let mut object = serde_json::Map::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = if codec.title_case_query {
            title_case(key)
        } else {
            key.to_string()
        };
        object.insert(key, serde_json::Value::String(value.to_string()));
    }
    Ok(serde_json::to_vec(&serde_json::Value::Object(object))?)
}

/// First letter upper, rest lower
fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        // nil byte slices marshal as JSON null on the wire
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
