//! Transport-neutral request and response model

use axum::{
    body::Bytes,
    extract::Query,
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Decoded query string, keeping every pair in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    /// Decode the query string of a URI
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map_err(|e| Error::bad_request(format!("Invalid query string: {}", e)))?;
        Ok(Self(pairs))
    }

    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// An inbound request as seen by a resource handler
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: QueryParams,
    body: Bytes,
}

impl RestRequest {
    /// Create a request with no headers, path parameters or body
    ///
    /// ```rust
    /// use rest_resource::request::RestRequest;
    /// use http::Method;
    ///
    /// let request = RestRequest::new(Method::GET, "/api/pets?limit=2".parse().unwrap()).unwrap();
    /// assert_eq!(request.query().get("limit"), Some("2"));
    /// ```
    pub fn new(method: Method, uri: Uri) -> Result<Self> {
        let query = QueryParams::from_uri(&uri)?;
        Ok(Self {
            method,
            uri,
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            query,
            body: Bytes::new(),
        })
    }

    /// Assemble a request from already decoded parts
    pub fn from_parts(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        path_params: HashMap<String, String>,
        body: Bytes,
    ) -> Result<Self> {
        let mut request = Self::new(method, uri)?;
        request.headers = headers;
        request.path_params = path_params;
        request.body = body;
        Ok(request)
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Add a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body
    pub fn with_json(self, body: &Value) -> Self {
        self.with_body(body.to_string())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body as JSON; an empty body is `None`
    pub fn json(&self) -> Result<Option<Value>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body)
            .map(Some)
            .map_err(|e| Error::bad_request(format!("Invalid JSON body: {}", e)))
    }
}

/// Response produced by a resource handler
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl RestResponse {
    /// 200 with a JSON body
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for RestResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(self.body)).into_response()
    }
}
