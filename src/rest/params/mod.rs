//! Path/query/header parameter binding.
//!
//! # Responsibilities
//! - Describe where each field of a parameter struct lives on the wire
//! - Decode request parameters into a fresh struct per request
//! - Encode a struct back into path variables, query pairs and headers
//!
//! # Data Flow
//! ```text
//! inbound:  path vars + query + headers
//!     → ParamSchema (cached per TypeId)
//!     → de.rs (string values → serde)
//!     → Validate::validate
//!
//! outbound: P → one JSON value per field, explicit `Some` noted
//!     → encode.rs (required/zero checks, per location)
//!     → EncodedParams (expand URL template, query pairs, headers)
//! ```
//!
//! # Design Decisions
//! - Field metadata comes from an explicit builder, not reflection
//! - `ParamField::field` is the serde name of the field; `key` is its wire name
//! - Path fields are always required
//! - `None` and zero values are not sent; `Some(zero)` is

mod de;
mod encode;

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::de::value::MapDeserializer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::ApiError;

pub use de::{DeError, ParamValue};
pub use encode::EncodedParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamField {
    pub field: String,
    pub key: String,
    pub location: ParamLocation,
    pub required: bool,
    /// Accepted on decode, never written on encode.
    pub hidden: bool,
    pub description: String,
}

/// Wire layout of a parameter struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn builder() -> ParamSchemaBuilder {
        ParamSchemaBuilder::default()
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Builds a [`ParamSchema`]. Modifiers apply to the most recently added field.
#[derive(Debug, Default)]
pub struct ParamSchemaBuilder {
    fields: Vec<ParamField>,
}

impl ParamSchemaBuilder {
    fn push(mut self, field: &str, location: ParamLocation) -> Self {
        self.fields.push(ParamField {
            field: field.to_string(),
            key: camel_case(field),
            location,
            required: location == ParamLocation::Path,
            hidden: false,
            description: String::new(),
        });
        self
    }

    fn last(&mut self) -> Option<&mut ParamField> {
        self.fields.last_mut()
    }

    pub fn path(self, field: &str) -> Self {
        self.push(field, ParamLocation::Path)
    }

    pub fn query(self, field: &str) -> Self {
        self.push(field, ParamLocation::Query)
    }

    pub fn header(self, field: &str) -> Self {
        self.push(field, ParamLocation::Header)
    }

    /// Override the wire key (defaults to the camel-cased field name).
    pub fn key(mut self, key: &str) -> Self {
        if let Some(f) = self.last() {
            f.key = key.to_string();
        }
        self
    }

    pub fn required(mut self) -> Self {
        if let Some(f) = self.last() {
            f.required = true;
        }
        self
    }

    pub fn hidden(mut self) -> Self {
        if let Some(f) = self.last() {
            f.hidden = true;
        }
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        if let Some(f) = self.last() {
            f.description = description.to_string();
        }
        self
    }

    pub fn build(self) -> ParamSchema {
        ParamSchema {
            fields: self.fields,
        }
    }
}

/// `user_name` → `userName`.
pub fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// A failed `validate()` check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Post-decode (and pre-encode) semantic checks. The default accepts everything.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Validate for () {}
impl Validate for String {}
impl Validate for serde_json::Value {}
impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.iter().try_for_each(Validate::validate)
    }
}
impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.as_ref().map_or(Ok(()), Validate::validate)
    }
}
impl<T: Validate> Validate for HashMap<String, T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.values().try_for_each(Validate::validate)
    }
}

/// A struct bound from path, query and header values.
pub trait RequestParams: Serialize + DeserializeOwned + Validate + Send + 'static {
    fn describe() -> ParamSchema;
}

impl RequestParams for () {
    fn describe() -> ParamSchema {
        ParamSchema::default()
    }
}

/// A request body type.
pub trait RequestBody: Serialize + DeserializeOwned + Validate + Send + 'static {}
impl<T> RequestBody for T where T: Serialize + DeserializeOwned + Validate + Send + 'static {}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("{0} must be set")]
    Required(String),

    #[error("{0}")]
    Decode(String),

    #[error("{key}: {reason}")]
    Unsupported { key: String, reason: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl From<BindError> for ApiError {
    fn from(err: BindError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

/// Raw inbound parameter values.
#[derive(Debug, Clone, Copy)]
pub struct ParamSource<'a> {
    pub path: &'a HashMap<String, String>,
    pub query: &'a [(String, String)],
    pub headers: &'a HeaderMap,
}

impl ParamSource<'_> {
    /// All values for `field`. Empty headers count as absent.
    fn values(&self, field: &ParamField) -> Option<Vec<String>> {
        match field.location {
            ParamLocation::Path => self.path.get(&field.key).map(|v| vec![v.clone()]),
            ParamLocation::Query => {
                let values: Vec<String> = self
                    .query
                    .iter()
                    .filter(|(k, _)| *k == field.key)
                    .map(|(_, v)| v.clone())
                    .collect();
                (!values.is_empty()).then_some(values)
            }
            ParamLocation::Header => {
                let values: Vec<String> = self
                    .headers
                    .get_all(field.key.as_str())
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
                (!values.is_empty()).then_some(values)
            }
        }
    }
}

/// Parses a raw query string into ordered pairs.
pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes and encodes parameter structs, caching each type's schema.
#[derive(Default)]
pub struct ParamCodec {
    schemas: DashMap<TypeId, Arc<ParamSchema>>,
}

impl ParamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema<P: RequestParams>(&self) -> Arc<ParamSchema> {
        let id = TypeId::of::<P>();
        if let Some(schema) = self.schemas.get(&id) {
            return schema.clone();
        }
        self.schemas
            .entry(id)
            .or_insert_with(|| Arc::new(P::describe()))
            .clone()
    }

    pub fn decode<P: RequestParams>(&self, source: &ParamSource<'_>) -> Result<P, BindError> {
        let schema = self.schema::<P>();
        let mut entries = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            match source.values(field) {
                Some(values) => entries.push((
                    field.field.clone(),
                    ParamValue::new(field.key.clone(), values),
                )),
                None if field.required => return Err(BindError::Required(field.key.clone())),
                None => {}
            }
        }

        let deserializer = MapDeserializer::<_, DeError>::new(entries.into_iter());
        let params = P::deserialize(deserializer).map_err(|e| BindError::Decode(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn encode<P: RequestParams>(&self, params: &P) -> Result<EncodedParams, BindError> {
        params.validate()?;
        let schema = self.schema::<P>();
        encode::encode(&schema, params)
    }
}

impl std::fmt::Debug for ParamCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamCodec")
            .field("cached_schemas", &self.schemas.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    #[serde(default)]
    struct ListParams {
        namespace: String,
        label_selector: Option<String>,
        limit: u32,
        watch: bool,
        names: Vec<String>,
        trace_id: String,
        dry_run: Option<bool>,
        timeout_seconds: Option<u32>,
        tags: Vec<String>,
    }

    impl Validate for ListParams {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.limit > 500 {
                return Err(ValidationError::new("limit must not exceed 500"));
            }
            Ok(())
        }
    }

    impl RequestParams for ListParams {
        fn describe() -> ParamSchema {
            ParamSchema::builder()
                .path("namespace")
                .query("label_selector")
                .query("limit")
                .query("watch")
                .query("names")
                .key("name")
                .header("trace_id")
                .key("x-trace-id")
                .query("dry_run")
                .query("timeout_seconds")
                .header("tags")
                .key("x-tag")
                .build()
        }
    }

    fn decode(path: &[(&str, &str)], query: &str, headers: &[(&'static str, &str)]) -> Result<ListParams, BindError> {
        let path: HashMap<String, String> = path
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let query = parse_query(Some(query));
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            header_map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        ParamCodec::new().decode(&ParamSource {
            path: &path,
            query: &query,
            headers: &header_map,
        })
    }

    #[test]
    fn test_schema_defaults() {
        let schema = ListParams::describe();
        let ns = schema.field("namespace").unwrap();
        assert!(ns.required);
        assert_eq!(ns.location, ParamLocation::Path);
        assert_eq!(schema.field("labelSelector").unwrap().field, "label_selector");
        assert_eq!(schema.field("name").unwrap().field, "names");
        assert!(!schema.field("limit").unwrap().required);
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("label_selector"), "labelSelector");
        assert_eq!(camel_case("name"), "name");
        assert_eq!(camel_case("_private_key"), "privateKey");
    }

    #[test]
    fn test_decode_all_locations() {
        let params = decode(
            &[("namespace", "dev")],
            "labelSelector=app%3Dweb&limit=20&watch=1&name=a&name=b&ignored=x",
            &[("x-trace-id", "t-1")],
        )
        .unwrap();
        assert_eq!(
            params,
            ListParams {
                namespace: "dev".into(),
                label_selector: Some("app=web".into()),
                limit: 20,
                watch: true,
                names: vec!["a".into(), "b".into()],
                trace_id: "t-1".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_missing_required_path() {
        let err = decode(&[], "", &[]).unwrap_err();
        assert_eq!(err.to_string(), "namespace must be set");
    }

    #[test]
    fn test_conversion_error_names_field() {
        let err = decode(&[("namespace", "dev")], "limit=lots", &[]).unwrap_err();
        assert!(err.to_string().contains("limit"), "{}", err);
    }

    #[test]
    fn test_validate_runs_after_decode() {
        let err = decode(&[("namespace", "dev")], "limit=900", &[]).unwrap_err();
        assert_eq!(err, BindError::Invalid(ValidationError::new("limit must not exceed 500")));
    }

    #[test]
    fn test_schema_is_cached() {
        let codec = ParamCodec::new();
        let a = codec.schema::<ListParams>();
        let b = codec.schema::<ListParams>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_encode_then_decode() {
        let codec = ParamCodec::new();
        let original = ListParams {
            namespace: "prod".into(),
            label_selector: Some("tier=db".into()),
            limit: 5,
            watch: false,
            names: vec!["x".into(), "y".into()],
            trace_id: "t-9".into(),
            dry_run: Some(false),
            timeout_seconds: Some(0),
            tags: vec!["blue".into(), "green".into()],
        };
        let encoded = codec.encode(&original).unwrap();
        assert!(encoded.query.contains(&("dryRun".to_string(), "false".to_string())));
        assert!(encoded.query.contains(&("timeoutSeconds".to_string(), "0".to_string())));
        assert_eq!(encoded.headers.iter().filter(|(k, _)| k == "x-tag").count(), 2);
        let url = encoded.expand_path("/api/v1/namespaces/{namespace}/pods").unwrap();
        assert_eq!(url, "/api/v1/namespaces/prod/pods");

        let mut headers = HeaderMap::new();
        for (k, v) in &encoded.headers {
            headers.append(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        let decoded: ListParams = codec
            .decode(&ParamSource {
                path: &encoded.path,
                query: &encoded.query,
                headers: &headers,
            })
            .unwrap();
        assert_eq!(decoded, original);
    }
}
