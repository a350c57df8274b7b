use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

/// Lifecycle event delivered by the recorder's webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    FileOpening(FileEvent),
    FileClosed(FileEvent),
    SessionStarted(SessionEvent),
    SessionEnded(SessionEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub session_id: String,
    /// Path relative to the storage directory
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: String,
    pub title: String,
    pub sub_category: String,
    pub room_id: u64,
    pub name: String,
}

impl LifecycleEvent {
    /// Decode a webhook body. Unknown event types are an error.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        Ok(match envelope {
            Envelope::FileOpening(data) => LifecycleEvent::FileOpening(data.into()),
            Envelope::FileClosed(data) => LifecycleEvent::FileClosed(data.into()),
            Envelope::SessionStarted(data) => LifecycleEvent::SessionStarted(data.into()),
            Envelope::SessionEnded(data) => LifecycleEvent::SessionEnded(data.into()),
        })
    }

    pub fn session_id(&self) -> &str {
        match self {
            LifecycleEvent::FileOpening(e) | LifecycleEvent::FileClosed(e) => &e.session_id,
            LifecycleEvent::SessionStarted(e) | LifecycleEvent::SessionEnded(e) => &e.session_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "EventType", content = "EventData")]
enum Envelope {
    FileOpening(FileData),
    FileClosed(FileData),
    SessionStarted(SessionData),
    SessionEnded(SessionData),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileData {
    session_id: String,
    #[serde(default)]
    relative_path: String,
}

impl From<FileData> for FileEvent {
    fn from(data: FileData) -> Self {
        Self {
            session_id: data.session_id,
            path: data.relative_path,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionData {
    session_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    area_name_child: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    room_id: u64,
    #[serde(default)]
    name: String,
}

impl From<SessionData> for SessionEvent {
    fn from(data: SessionData) -> Self {
        Self {
            session_id: data.session_id,
            title: data.title,
            sub_category: data.area_name_child,
            room_id: data.room_id,
            name: data.name,
        }
    }
}
