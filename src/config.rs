use std::env;
use std::time::Duration;

use crate::core::{ObjectError, Result};

pub const DEFAULT_API_VERSION: &str = "1.1";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application id
    pub app_id: String,

    /// Application key
    pub app_key: String,

    /// Master key, used only when a session asks for it
    pub master_key: Option<String>,

    /// API server, without the version segment
    pub server_url: String,

    /// Version segment prepended to every path
    pub api_version: String,

    /// Request timeout handed to the transport
    pub timeout: Duration,

    /// Target the production environment
    pub production: bool,
}

impl ClientConfig {
    pub fn new(app_id: &str, app_key: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            app_key: app_key.to_string(),
            master_key: None,
            server_url: "https://api.leancloud.cn".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(15),
            production: false,
        }
    }

    /// Set the master key
    pub fn master_key(mut self, key: &str) -> Self {
        self.master_key = Some(key.to_string());
        self
    }

    /// Set the API server. A trailing slash is dropped.
    pub fn server_url(mut self, url: &str) -> Self {
        self.server_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Set the API version
    pub fn api_version(mut self, version: &str) -> Self {
        self.api_version = version.to_string();
        self
    }

    /// Set request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use the production environment
    pub fn production(mut self, flag: bool) -> Self {
        self.production = flag;
        self
    }

    /// Read configuration from the environment.
    ///
    /// `CLOUDOBJECT_APP_ID` and `CLOUDOBJECT_APP_KEY` are required;
    /// `CLOUDOBJECT_MASTER_KEY`, `CLOUDOBJECT_API_SERVER` and
    /// `CLOUDOBJECT_APP_ENV` are optional.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            env::var(name).map_err(|_| {
                ObjectError::InvalidArgument(format!("environment variable {} is not set", name))
            })
        };
        let mut config = Self::new(&required("CLOUDOBJECT_APP_ID")?, &required("CLOUDOBJECT_APP_KEY")?);
        if let Ok(key) = env::var("CLOUDOBJECT_MASTER_KEY") {
            config = config.master_key(&key);
        }
        if let Ok(url) = env::var("CLOUDOBJECT_API_SERVER") {
            config = config.server_url(&url);
        }
        let production = env::var("CLOUDOBJECT_APP_ENV").is_ok_and(|v| v == "production");
        config = config.production(production);
        config.validate()?;
        Ok(config)
    }

    /// Path with the version segment, e.g. `/1.1/classes/Post`.
    pub fn api_path(&self, path: &str) -> String {
        format!("/{}{}", self.api_version, path)
    }

    /// Full URL for a path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, self.api_path(path))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            return Err(ObjectError::InvalidArgument("app_id cannot be empty".into()));
        }
        if self.app_key.is_empty() {
            return Err(ObjectError::InvalidArgument("app_key cannot be empty".into()));
        }
        if self.server_url.is_empty() {
            return Err(ObjectError::InvalidArgument("server_url cannot be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(ObjectError::InvalidArgument("timeout must be > 0".into()));
        }
        Ok(())
    }
}
