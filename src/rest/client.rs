//! RPC-style REST client.
//!
//! # Responsibilities
//! - Build request URLs from a base, a prefix and a path template
//! - Encode parameter structs through the same codec the server decodes with
//! - Encode bodies by content type and decode responses by content type
//! - Attach credentials
//!
//! # Data Flow
//! ```text
//! RestClient::get("/users/{name}")
//!     .params(&P)  → ParamCodec::encode → path vars, query, headers
//!     .body(&B)    → JSON or form bytes
//!     .do_into::<T>()
//!         → reqwest::Request → send
//!         → status >= 400 → ClientError::Status
//!         → Content-Type → serde_json / serde_urlencoded → T
//! ```

use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::error::Status;
use crate::rest::negotiation::{MIME_FORM, MIME_JSON};
use crate::rest::params::{BindError, EncodedParams, ParamCodec, RequestParams};
use crate::rest::route::join_path;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Params(#[from] BindError),

    #[error("unable to encode request body: {0}")]
    Encode(String),

    #[error("invalid header {0:?}")]
    Header(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("{code}: {body}")]
    Status { code: u16, body: String },

    #[error("unable to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The server's `Status` body, when the failure carried one.
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Status { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    Bearer(String),
    /// `Authorization: <scheme> <token>`, `Bearer` when no scheme is given.
    Token {
        scheme: Option<String>,
        token: String,
    },
    Basic {
        user: String,
        password: String,
    },
    ApiKey(String),
}

#[derive(Clone)]
pub struct RestClient {
    base: Url,
    http: reqwest::Client,
    credentials: Credentials,
    codec: Arc<ParamCodec>,
}

impl RestClient {
    pub fn new(base: &str, credentials: Credentials) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Self::with_http(base, credentials, http)
    }

    pub fn with_http(base: &str, credentials: Credentials, http: reqwest::Client) -> Result<Self, ClientError> {
        Ok(Self {
            base: Url::parse(base)?,
            http,
            credentials,
            codec: Arc::new(ParamCodec::new()),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn request(&self, method: Method) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method,
            prefix: String::new(),
            path: String::new(),
            params: EncodedParams::default(),
            body: None,
            content_type: MIME_JSON,
            headers: Vec::new(),
            timeout: None,
            error: None,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::GET).path(path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::POST).path(path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT).path(path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE).path(path)
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base", &self.base.as_str())
            .finish()
    }
}

/// Status, headers and body of a completed call.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One outgoing call. Encoding errors are held until the call is sent.
pub struct RequestBuilder<'a> {
    client: &'a RestClient,
    method: Method,
    prefix: String,
    path: String,
    params: EncodedParams,
    body: Option<serde_json::Value>,
    content_type: &'static str,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    error: Option<ClientError>,
}

impl<'a> RequestBuilder<'a> {
    fn fail(mut self, err: ClientError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Path template; `{var}` segments are filled from `params`.
    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn params<P: RequestParams>(mut self, params: &P) -> Self {
        match self.client.codec.encode(params) {
            Ok(encoded) => {
                self.params.path.extend(encoded.path);
                self.params.query.extend(encoded.query);
                self.params.headers.extend(encoded.headers);
                self
            }
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn body<B: Serialize>(mut self, body: &B) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = Some(value);
                self
            }
            Err(e) => self.fail(ClientError::Encode(e.to_string())),
        }
    }

    /// Send the body as a url-encoded form instead of JSON.
    pub fn form(mut self) -> Self {
        self.content_type = MIME_FORM;
        self
    }

    /// Append one query pair, after any encoded from `params`.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.params.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn url(&self) -> Result<Url, ClientError> {
        let expanded = self.params.expand_path(&self.path)?;
        let mut url = self.client.base.clone();
        url.set_path(&join_path(&[self.client.base.path(), &self.prefix, &expanded]));
        if self.params.query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&self.params.query_string()));
        }
        Ok(url)
    }

    fn encode_body(&self) -> Result<Option<Vec<u8>>, ClientError> {
        let Some(body) = &self.body else {
            return Ok(None);
        };
        let bytes = if self.content_type == MIME_FORM {
            serde_urlencoded::to_string(body)
                .map(String::into_bytes)
                .map_err(|e| ClientError::Encode(e.to_string()))?
        } else {
            serde_json::to_vec(body).map_err(|e| ClientError::Encode(e.to_string()))?
        };
        Ok(Some(bytes))
    }

    fn header_map(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.params.headers.iter().chain(self.headers.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::Header(name.clone()))?;
            let value = HeaderValue::from_str(value).map_err(|_| ClientError::Header(name.as_str().to_string()))?;
            headers.append(name, value);
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }

        let authorization = match &self.client.credentials {
            Credentials::Bearer(token) => Some(format!("Bearer {}", token)),
            Credentials::Token { scheme, token } => Some(format!(
                "{} {}",
                scheme.as_deref().filter(|s| !s.is_empty()).unwrap_or("Bearer"),
                token
            )),
            Credentials::ApiKey(key) => {
                let value = HeaderValue::from_str(key)
                    .map_err(|_| ClientError::Header(API_KEY_HEADER.to_string()))?;
                headers.insert(API_KEY_HEADER, value);
                None
            }
            Credentials::Basic { .. } | Credentials::None => None,
        };
        if let Some(value) = authorization {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| ClientError::Header(AUTHORIZATION.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Assemble the HTTP request without sending it.
    pub fn build(mut self) -> Result<reqwest::Request, ClientError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let url = self.url()?;
        let headers = self.header_map()?;
        let mut builder = self
            .client
            .http
            .request(self.method.clone(), url)
            .headers(headers);

        if let Credentials::Basic { user, password } = &self.client.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = self.encode_body()? {
            builder = builder.header(CONTENT_TYPE, self.content_type).body(body);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }

    /// Send the call and return the raw response. Statuses of 400 and above are errors.
    pub async fn do_raw(self) -> Result<RawResponse, ClientError> {
        let http = self.client.http.clone();
        let request = self.build()?;
        tracing::debug!(method = %request.method(), url = %request.url(), "Sending request");

        let response = http.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.as_u16() >= 400 {
            return Err(ClientError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(RawResponse { status, headers, body })
    }

    /// Send the call and decode the response body into `T`.
    pub async fn do_into<T: DeserializeOwned + 'static>(self) -> Result<T, ClientError> {
        let raw = self.do_raw().await?;
        decode_response(&raw)
    }
}

/// Decode by response content type. A `String` target receives the raw text.
pub fn decode_response<T: DeserializeOwned + 'static>(raw: &RawResponse) -> Result<T, ClientError> {
    if TypeId::of::<T>() == TypeId::of::<String>() {
        let text = String::from_utf8_lossy(&raw.body).into_owned();
        return serde_json::from_value(serde_json::Value::String(text))
            .map_err(|e| ClientError::Decode(e.to_string()));
    }

    let content_type = raw
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with(MIME_FORM) {
        return serde_urlencoded::from_bytes(&raw.body).map_err(|e| ClientError::Decode(e.to_string()));
    }
    if raw.body.is_empty() {
        return serde_json::from_value(serde_json::Value::Null).map_err(|e| ClientError::Decode(e.to_string()));
    }
    serde_json::from_slice(&raw.body).map_err(|e| ClientError::Decode(e.to_string()))
}
