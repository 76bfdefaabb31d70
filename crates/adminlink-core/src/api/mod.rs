//! REST request executor.
//!
//! This module provides the `HttpClient` for talking to the admin backend.
//! Requests carry a bearer token and identity headers derived from the
//! persisted session; non-2xx responses are classified into `ApiError`.

pub mod client;
pub mod error;
pub mod request;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::HttpClient;
pub use error::{ApiError, ClientError};
pub use request::{
    build_url, require_id, Envelope, ParamValue, Params, RequestBody, RequestDescriptor,
    RequestOptions, ResponseBody,
};
pub use reqwest::{Method, StatusCode};
