use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the uploader
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub http: HttpServer,
    pub storage: Storage,
    #[serde(default)]
    pub session: SessionSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct Runtime {
    pub threads: Option<usize>,
}

/// Webhook listener configuration
#[derive(Debug, Deserialize)]
pub struct HttpServer {
    #[serde(default = "HttpServer::default_addr")]
    pub addr: String,
    /// Only requests under this path prefix are treated as events
    #[serde(default = "HttpServer::default_path")]
    pub path: String,
}

impl HttpServer {
    fn default_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_path() -> String {
        "/api/bilive/v2".to_string()
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            path: Self::default_path(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Deserialize)]
pub struct Storage {
    /// Directory the recorder writes into; event paths are relative to it
    pub path: String,
}

/// Session reconciliation configuration
#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    /// Delay after a session end before it is treated as finished
    #[serde(default = "SessionSettings::default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
}

impl SessionSettings {
    fn default_grace_period() -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_period: Self::default_grace_period(),
        }
    }
}

/// Where finalized recordings are handed off to
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UploadSettings {
    /// Copy into a local directory with a JSON sidecar
    Archive { path: String },
    /// PUT the file, then POST the publication form
    Http { url: String },
}
