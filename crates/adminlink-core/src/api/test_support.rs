//! Loopback HTTP responder for executor tests.
//!
//! An axum app that answers each request with the next canned response, in
//! order, and records what the request looked like when it arrived.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct CannedResponse {
    status: u16,
    content_type: Option<&'static str>,
    body: String,
    hang: bool,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: Some("application/json"),
            body: body.to_string(),
            hang: false,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8"),
            body: body.to_string(),
            hang: false,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
            hang: false,
        }
    }

    /// Accept the request and never answer.
    pub fn hang() -> Self {
        Self {
            status: 0,
            content_type: None,
            body: String::new(),
            hang: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    /// Lower-cased names
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_named(&self, name: &str) -> usize {
        self.headers.iter().filter(|(n, _)| n == name).count()
    }
}

pub type Recorded = Arc<Mutex<Vec<RecordedRequest>>>;

#[derive(Clone)]
struct Responder {
    pending: Arc<Mutex<VecDeque<CannedResponse>>>,
    recorded: Recorded,
}

/// Bind an ephemeral port and serve `responses`; returns the base URL.
pub async fn serve(responses: Vec<CannedResponse>) -> (String, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new().fallback(respond).with_state(Responder {
        pending: Arc::new(Mutex::new(responses.into())),
        recorded: Arc::clone(&recorded),
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}", addr), recorded)
}

async fn respond(
    State(responder): State<Responder>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let headers = headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.as_str().to_string(), value)
        })
        .collect();

    responder.recorded.lock().unwrap().push(RecordedRequest {
        method: method.as_str().to_string(),
        target,
        headers,
        body: body.to_vec(),
    });

    let next = responder.pending.lock().unwrap().pop_front();
    let Some(canned) = next else {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("no canned response left"))
            .unwrap();
    };

    if canned.hang {
        std::future::pending::<()>().await;
    }

    let mut builder = Response::builder().status(StatusCode::from_u16(canned.status).unwrap());
    if let Some(content_type) = canned.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(Body::from(canned.body)).unwrap()
}
