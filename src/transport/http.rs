use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value as JsonValue;

use super::{Method, Request, Session, Transport};
use crate::config::ClientConfig;
use crate::core::{ObjectError, Result};

/// Transport over HTTPS using reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("cloudobject/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Headers identifying the application and the session.
    pub fn headers(&self, session: &Session) -> Result<Vec<(&'static str, String)>> {
        let key = if session.use_master_key {
            let master = self.config.master_key.as_deref().ok_or_else(|| {
                ObjectError::InvalidArgument("master key requested but not configured".into())
            })?;
            format!("{},master", master)
        } else {
            self.config.app_key.clone()
        };

        let mut headers = vec![
            ("X-LC-Id", self.config.app_id.clone()),
            ("X-LC-Key", key),
            ("X-LC-Prod", if self.config.production { "1" } else { "0" }.to_string()),
        ];
        if let Some(token) = &session.session_token {
            headers.push(("X-LC-Session", token.clone()));
        }
        Ok(headers)
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request, session: &Session) -> Result<JsonValue> {
        let url = self.config.endpoint(&request.path);
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &url)
            .query(&request.query);
        for (name, value) in self.headers(session)? {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("{} {} {:?}", request.method, url, request.body);
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("{} {} -> {} {}", request.method, url, status, text);

        let data: JsonValue = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ObjectError::Cloud {
                status: Some(status),
                code: -1,
                message: format!("Bad response body: {}", e),
            })?
        };

        if let Some(message) = data.get("error") {
            let code = data.get("code").and_then(JsonValue::as_i64).unwrap_or(-1);
            let message = message
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            warn!("{} {} failed: {} {}", request.method, url, code, message);
            return Err(ObjectError::Cloud {
                status: Some(status),
                code,
                message,
            });
        }
        if status >= 400 {
            return Err(ObjectError::Cloud {
                status: Some(status),
                code: -1,
                message: format!("HTTP status {}", status),
            });
        }
        Ok(data)
    }
}
