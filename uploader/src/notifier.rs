use crate::error::UploaderError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const STREAM_CONNECTED: &str = "Live stream connected, recording started";
pub const STREAM_RECONNECTED: &str = "Live stream reconnected, recording continues";
pub const PROCESSING: &str = "Live stream ended, processing the recording";
pub const REVIEW_PENDING: &str = "The replay becomes visible once review has passed";

/// Posts short status notices into a live room.
#[async_trait]
pub trait RoomNotifier {
    async fn post(&self, room_id: u64, message: &str) -> Result<(), UploaderError>;
}

/// Notifier that only writes notices to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl RoomNotifier for LogNotifier {
    async fn post(&self, room_id: u64, message: &str) -> Result<(), UploaderError> {
        info!("[room {}] {}", room_id, message);
        Ok(())
    }
}

/// Messaging handle a session holds for its live room
#[derive(Clone)]
pub struct RoomHandle {
    room_id: u64,
    notifier: Arc<dyn RoomNotifier + Send + Sync>,
}

impl RoomHandle {
    pub fn open(room_id: u64, notifier: Arc<dyn RoomNotifier + Send + Sync>) -> Self {
        Self { room_id, notifier }
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Post a notice; failures are logged and swallowed.
    pub async fn post(&self, message: &str) {
        if let Err(e) = self.notifier.post(self.room_id, message).await {
            warn!("Room {} notice failed: {}", self.room_id, e);
        }
    }

    /// Post from a non-async context without waiting for delivery.
    pub fn post_detached(&self, message: impl Into<String>) {
        let handle = self.clone();
        let message = message.into();
        tokio::spawn(async move { handle.post(&message).await });
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("room_id", &self.room_id)
            .finish()
    }
}
