use crate::error::UploaderError;
use crate::service::WebhookService;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn start_webhook(
    notifier: Arc<Notify>,
    addr: String,
    service: WebhookService,
) -> Result<(), UploaderError> {
    let addr = common::socket::parse_address(addr)
        .map_err(|e| UploaderError::NetworkError(e.to_string()))?;
    let socket = common::socket::listen_reuse_socket(&addr)
        .map_err(|e| UploaderError::NetworkError(e.to_string()))?;
    let listener = TcpListener::from_std(socket.into())
        .map_err(|e| UploaderError::NetworkError(e.to_string()))?;

    info!("webhook: listening on http://{}", addr);
    common::signal::ready();

    let http = http1::Builder::new();
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let mut signal = pin::pin!(notifier.notified());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("webhook: accept: {}", e);
                        continue;
                    }
                };

                debug!("webhook: connection accepted from {}", remote_addr);
                let io = TokioIo::new(stream);
                let conn = http.serve_connection(io, service.clone());
                let fut = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        error!("webhook: serve: {:?}", e);
                    }
                });
            },
            _ = &mut signal => {
                info!("webhook: http server: graceful shutdown");
                break;
            }
        }
    }

    tokio::select! {
        _ = graceful.shutdown() => {
            info!("webhook: all connections gracefully closed");
        },
        _ = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
            info!("webhook: timed out waiting for connections to close");
        }
    }
    Ok(())
}
