//! Request descriptors, query parameters, URL construction and response bodies.

use reqwest::header::HeaderMap;
use reqwest::multipart::Form;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::ClientError;

/// A scalar query-parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Query-string form, or `None` when the parameter must be dropped.
    pub fn to_query_value(&self) -> Option<String> {
        let value = match self {
            ParamValue::Null => return None,
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Str(s) => s.clone(),
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Str(value.clone())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

macro_rules! int_param {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ParamValue {
            fn from(value: $ty) -> Self {
                ParamValue::Int(value as i64)
            }
        })*
    };
}

int_param!(i32, i64, u32, u16, u8);

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Ordered query parameters. Sparse filter objects can be passed as-is:
/// `None`, `Null` and empty-string values never reach the URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters that survive filtering, in insertion order.
    pub fn retained(&self) -> Vec<(&str, String)> {
        self.0
            .iter()
            .filter_map(|(name, value)| value.to_query_value().map(|v| (name.as_str(), v)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.push(name, value);
        }
        params
    }
}

/// Join the base origin and path, then append the retained parameters.
pub fn build_url(base_url: &str, path: &str, params: &Params) -> Result<Url, ClientError> {
    let base = base_url.trim_end_matches('/');
    let joined = if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };

    let mut url =
        Url::parse(&joined).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", joined, e)))?;

    let retained = params.retained();
    if !retained.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in retained {
            pairs.append_pair(name, &value);
        }
    }
    Ok(url)
}

/// Outgoing payload.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    None,
    Json(Value),
    /// Multipart upload; the transport picks the boundary and content type.
    Multipart(Form),
}

impl RequestBody {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ClientError> {
        Ok(RequestBody::Json(serde_json::to_value(value)?))
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RequestBody::None)
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<Form> for RequestBody {
    fn from(form: Form) -> Self {
        RequestBody::Multipart(form)
    }
}

/// Per-call options shared by every verb.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub params: Params,
    pub body: RequestBody,
    pub headers: HeaderMap,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.push(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            method,
            path: path.into(),
            options,
        }
    }

    /// GET and HEAD never carry a body.
    pub fn sends_body(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }
}

/// Response payload parsed by declared content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// `application/json` (and `+json` suffixes) parse as JSON, `text/*` as
    /// text, anything else yields no body.
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime == "application/json" || mime.ends_with("+json") {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(ResponseBody::Empty);
            }
            return serde_json::from_slice(bytes).map(ResponseBody::Json);
        }
        if mime.starts_with("text/") {
            return Ok(ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()));
        }
        Ok(ResponseBody::Empty)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
            ResponseBody::Empty => Value::Null,
        }
    }

    /// Deserialize through `Envelope`, accepting enveloped or raw payloads.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let envelope: Envelope<T> = serde_json::from_value(self.into_json())?;
        Ok(envelope.into_inner())
    }
}

/// Backend responses are either wrapped as `{"data": ...}` (possibly with
/// sibling metadata) or the raw payload. The wrapped form is tried first.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped { data: T },
    Raw(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Raw(value) => value,
        }
    }
}

/// Pre-flight check for identifiers interpolated into paths.
pub fn require_id<'a>(label: &str, id: &'a str) -> Result<&'a str, ClientError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(ClientError::validation(format!("{} is required", label)))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_url_drops_empty_params() {
        let params = Params::new()
            .with("status", "open")
            .with("owner", Option::<&str>::None)
            .with("team", ParamValue::Null)
            .with("q", "")
            .with("page", 2)
            .with("archived", false);

        let url = build_url("https://api.example.com", "/orders", &params).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/orders?status=open&page=2&archived=false"
        );
    }

    #[test]
    fn test_build_url_encodes_once() {
        let params = Params::new().with("search", "a&b c/d").with("tag", "100%");
        let url = build_url("https://api.example.com/", "calendar", &params).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/calendar?search=a%26b+c%2Fd&tag=100%25"
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("search".to_string(), "a&b c/d".to_string()),
                ("tag".to_string(), "100%".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_url_without_params_has_no_query() {
        let all_empty = Params::new().with("a", "").with("b", Option::<i64>::None);
        let url = build_url("http://localhost:8080", "profile", &all_empty).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/profile");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_build_url_rejects_bad_base() {
        let err = build_url("not a url", "/x", &Params::new()).unwrap_err();
        assert_eq!(err.kind(), "InvalidUrl");
    }

    #[test]
    fn test_params_from_iter() {
        let params: Params = vec![("a", Some("1")), ("b", None), ("c", Some(""))]
            .into_iter()
            .collect();
        assert_eq!(params.retained(), vec![("a", "1".to_string())]);
    }

    #[test]
    fn test_parse_by_content_type() {
        let json = ResponseBody::parse(Some("application/json; charset=utf-8"), br#"{"ok":true}"#)
            .expect("json");
        assert_eq!(json, ResponseBody::Json(json!({"ok": true})));

        let problem = ResponseBody::parse(Some("application/problem+json"), br#"{"title":"x"}"#)
            .expect("problem json");
        assert_eq!(problem.as_json(), Some(&json!({"title": "x"})));

        let text = ResponseBody::parse(Some("text/plain"), b"pong").expect("text");
        assert_eq!(text, ResponseBody::Text("pong".to_string()));

        let binary = ResponseBody::parse(Some("application/pdf"), b"%PDF").expect("binary");
        assert!(binary.is_empty());

        let missing = ResponseBody::parse(None, b"{}").expect("none");
        assert!(missing.is_empty());

        let blank_json = ResponseBody::parse(Some("application/json"), b"  ").expect("blank");
        assert!(blank_json.is_empty());

        assert!(ResponseBody::parse(Some("application/json"), b"{oops").is_err());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Summary {
        open: u32,
    }

    #[test]
    fn test_decode_enveloped_and_raw() {
        let wrapped = ResponseBody::Json(json!({"data": {"open": 3}, "meta": {"page": 1}}));
        assert_eq!(wrapped.decode::<Summary>().expect("wrapped"), Summary { open: 3 });

        let raw = ResponseBody::Json(json!({"open": 5}));
        assert_eq!(raw.decode::<Summary>().expect("raw"), Summary { open: 5 });

        let list = ResponseBody::Json(json!({"data": [1, 2, 3]}));
        assert_eq!(list.decode::<Vec<u32>>().expect("list"), vec![1, 2, 3]);

        let empty = ResponseBody::Empty;
        assert_eq!(empty.decode::<Option<Summary>>().expect("empty"), None);
    }

    #[test]
    fn test_require_id() {
        assert_eq!(require_id("order id", " 17 ").expect("id"), "17");
        let err = require_id("order id", "  ").unwrap_err();
        assert_eq!(err.to_string(), "order id is required");
    }

    #[test]
    fn test_descriptor_body_rules() {
        assert!(!RequestDescriptor::new(Method::GET, "/x", RequestOptions::new()).sends_body());
        assert!(!RequestDescriptor::new(Method::HEAD, "/x", RequestOptions::new()).sends_body());
        assert!(RequestDescriptor::new(Method::DELETE, "/x", RequestOptions::new()).sends_body());
        assert!(RequestDescriptor::new(Method::PATCH, "/x", RequestOptions::new()).sends_body());
    }
}
