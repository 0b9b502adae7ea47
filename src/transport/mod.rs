//! The request/response collaborator the client talks to.
//!
//! - `http.rs` - reqwest adapter for a real backend
//! - `memory.rs` - in-process emulation of the backend REST surface

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{MemoryBackend, RecordedRequest};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request, with a path relative to the versioned API root.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<JsonValue>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Authentication context for a call. Passed explicitly; there is no
/// process-wide current user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub session_token: Option<String>,
    pub use_master_key: bool,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            session_token: Some(token.into()),
            use_master_key: false,
        }
    }

    pub fn master() -> Self {
        Self {
            session_token: None,
            use_master_key: true,
        }
    }
}

/// Sends requests to the backend. Errors reported by the backend surface
/// as `ObjectError::Cloud`; connection failures as `ObjectError::Transport`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request, session: &Session) -> Result<JsonValue>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: Request, session: &Session) -> Result<JsonValue> {
        (**self).send(request, session).await
    }
}
