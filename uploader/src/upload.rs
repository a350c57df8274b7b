use crate::error::UploaderError;
use crate::session::SessionInfo;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::client::conn::http1;
use hyper::{header, Method, Request, Uri};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CHUNK_SIZE: usize = 256 * 1024;

/// Everything needed to publish one finalized recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishForm {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub session: SessionInfo,
}

impl PublishForm {
    pub fn new(session: &SessionInfo, published_at: DateTime<Local>) -> Self {
        let end = session
            .end_time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "?".to_string());

        let description = [
            "[Live replay]".to_string(),
            format!("Room: {}", session.room_id),
            format!("Streamer: @{}", session.name),
            format!("Live title: {}", session.title),
            format!(
                "Live period: {} ~ {}",
                session.start_time.format(TIME_FORMAT),
                end
            ),
            format!("Published: {}", published_at.format(TIME_FORMAT)),
            "Full replay of the broadcast above, for viewers to catch up. Commercial use is prohibited."
                .to_string(),
        ]
        .join("\n");

        let mut tags = vec!["replay".to_string()];
        if !session.name.is_empty() {
            tags.push(session.name.clone());
        }

        Self {
            title: format!("[{}]{}", session.sub_category, session.title),
            description,
            tags,
            session: session.clone(),
        }
    }
}

/// Hands a finalized recording to the publishing platform.
#[async_trait]
pub trait Uploader {
    /// Publish `path`; returns the publication id.
    async fn upload(&self, path: &Path, form: &PublishForm) -> Result<String, UploaderError>;
}

/// Copies recordings into a local directory, with the form as a JSON sidecar
#[derive(Debug, Clone)]
pub struct ArchiveUploader {
    dir: PathBuf,
}

impl ArchiveUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Uploader for ArchiveUploader {
    async fn upload(&self, path: &Path, form: &PublishForm) -> Result<String, UploaderError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            UploaderError::UploadError(format!("Failed to create archive directory: {}", e))
        })?;

        let id = format!(
            "{}_{}",
            form.session.room_id,
            form.session.start_time.format("%Y%m%d_%H%M%S")
        );
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("flv");
        let media = self.dir.join(format!("{}.{}", id, extension));
        let sidecar = self.dir.join(format!("{}.json", id));

        tokio::fs::copy(path, &media)
            .await
            .map_err(|e| UploaderError::UploadError(format!("Failed to copy recording: {}", e)))?;

        let json = serde_json::to_string_pretty(form)
            .map_err(|e| UploaderError::UploadError(format!("Serialize form: {}", e)))?;
        tokio::fs::write(&sidecar, json)
            .await
            .map_err(|e| UploaderError::UploadError(format!("Failed to write form: {}", e)))?;

        info!("Archived {} as {}", path.display(), media.display());
        Ok(id)
    }
}

type UploadBody = BoxBody<Bytes, io::Error>;

/// Streams the recording with `PUT <url>/<file>`, then posts the form as
/// JSON to `<url>`. The response body of the post is the publication id.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    uri: Uri,
}

impl HttpUploader {
    pub fn new(url: &str) -> Result<Self, UploaderError> {
        let uri = Uri::try_from(url)
            .map_err(|e| UploaderError::ConfigError(format!("Invalid upload URL: {}", e)))?;
        if uri.host().is_none() {
            return Err(UploaderError::ConfigError(format!(
                "Upload URL has no host: {}",
                url
            )));
        }

        Ok(Self { uri })
    }

    fn build_uri(&self, file_name: Option<&str>) -> Result<Uri, UploaderError> {
        let base = self.uri.path().trim_end_matches('/');
        let mut path = match file_name {
            Some(name) => format!("{}/{}", base, name),
            None if base.is_empty() => "/".to_string(),
            None => base.to_string(),
        };
        if let Some(query) = self.uri.query() {
            path = format!("{}?{}", path, query);
        }

        let authority = self
            .uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Uri::builder()
            .scheme(self.uri.scheme_str().unwrap_or("http"))
            .authority(authority)
            .path_and_query(path)
            .build()
            .map_err(|e| UploaderError::RequestError(format!("build uri: {}", e)))
    }

    async fn connect(&self) -> Result<http1::SendRequest<UploadBody>, UploaderError> {
        let host = self.uri.host().unwrap_or_default();
        let port = self.uri.port_u16().unwrap_or(80);
        let addr = format!("{}:{}", host, port);
        let tcp_stream = TcpStream::connect(addr.as_str())
            .await
            .map_err(|e| UploaderError::NetworkError(format!("connect to {}: {}", addr, e)))?;

        let (sender, conn) = http1::handshake(TokioIo::new(tcp_stream))
            .await
            .map_err(|e| UploaderError::RequestError(format!("http1 handshake: {}", e)))?;
        tokio::task::spawn(async move {
            if let Err(err) = conn.await {
                error!("upload connection: {:?}", err);
            }
        });

        Ok(sender)
    }

    async fn send(
        &self,
        sender: &mut http1::SendRequest<UploadBody>,
        req: Request<UploadBody>,
    ) -> Result<Bytes, UploaderError> {
        sender
            .ready()
            .await
            .map_err(|e| UploaderError::RequestError(format!("connection: {}", e)))?;

        let uri = req.uri().clone();
        let res = sender
            .send_request(req)
            .await
            .map_err(|e| UploaderError::RequestError(format!("send request: {}", e)))?;
        let status = res.status();
        let body = res
            .into_body()
            .collect()
            .await
            .map_err(|e| UploaderError::RequestError(format!("read response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(UploaderError::UploadError(format!(
                "{} responded {}",
                uri,
                status
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, path: &Path, form: &PublishForm) -> Result<String, UploaderError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploaderError::UploadError(format!("Invalid file name: {}", path.display())))?
            .to_string();

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UploaderError::StorageError(format!("Failed to open recording: {}", e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| UploaderError::StorageError(format!("Failed to stat recording: {}", e)))?
            .len();

        let host = self.uri.authority().map(|a| a.to_string()).unwrap_or_default();
        let mut sender = self.connect().await?;

        info!("Uploading {} ({} bytes)", path.display(), size);
        let req = Request::builder()
            .method(Method::PUT)
            .uri(self.build_uri(Some(&file_name))?)
            .header(header::HOST, host.as_str())
            .header(header::USER_AGENT, "live-uploader/1.0")
            .header(header::CONTENT_TYPE, "video/x-flv")
            .header(header::CONTENT_LENGTH, size)
            .body(file_body(file))
            .map_err(|e| UploaderError::RequestError(format!("build request: {}", e)))?;
        self.send(&mut sender, req).await?;

        debug!("Submitting publication form for {}", file_name);
        let json = serde_json::to_vec(form)
            .map_err(|e| UploaderError::RequestError(format!("Serialize form: {}", e)))?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.build_uri(None)?)
            .header(header::HOST, host.as_str())
            .header(header::USER_AGENT, "live-uploader/1.0")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-File-Name", file_name.as_str())
            .body(
                Full::new(Bytes::from(json))
                    .map_err(|never| -> io::Error { match never {} })
                    .boxed(),
            )
            .map_err(|e| UploaderError::RequestError(format!("build request: {}", e)))?;
        let body = self.send(&mut sender, req).await?;

        let id = String::from_utf8_lossy(&body).trim().to_string();
        if id.is_empty() {
            return Ok(file_name);
        }
        Ok(id)
    }
}

/// Body that streams a file in fixed-size chunks
fn file_body(mut file: tokio::fs::File) -> UploadBody {
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, io::Error>>(4);
    tokio::spawn(async move {
        loop {
            let mut buf = vec![0u8; CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    if tx.send(Ok(Frame::data(Bytes::from(buf)))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    BoxBody::new(StreamBody::new(ReceiverStream::new(rx)))
}
