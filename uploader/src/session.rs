use crate::notifier::RoomHandle;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Reconciliation state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepting file events
    Active,
    /// An end was observed; the grace timer for `epoch` is running
    EndPending { epoch: u64 },
    /// Grace period elapsed without a reconnect
    Ended,
    /// Handed to the publish queue
    Queued,
}

/// One recorded file, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFile {
    /// Path relative to the storage directory
    pub path: String,
    /// Still being written by the recorder
    pub writing: bool,
}

/// Metadata snapshot of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: String,
    pub sub_category: String,
    pub name: String,
    pub room_id: u64,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
}

/// A broadcast's lifecycle, spanning one or more recorded files.
///
/// Every accessor takes the session lock for the duration of a single call.
/// The registry may call in while holding its own map lock; the session
/// never calls back into the registry.
#[derive(Debug)]
pub struct RecordingSession {
    state: Mutex<SessionState>,
    /// Number of files still being written
    pending: watch::Sender<usize>,
}

#[derive(Debug)]
struct SessionState {
    info: SessionInfo,
    files: Vec<RecordedFile>,
    phase: SessionPhase,
    end_epoch: u64,
    grace: Option<AbortHandle>,
    room: Option<RoomHandle>,
}

impl SessionState {
    fn pending(&self) -> usize {
        self.files.iter().filter(|f| f.writing).count()
    }
}

impl RecordingSession {
    pub fn new(id: String, start_time: DateTime<Local>) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            state: Mutex::new(SessionState {
                info: SessionInfo {
                    id,
                    title: String::new(),
                    sub_category: String::new(),
                    name: String::new(),
                    room_id: 0,
                    start_time,
                    end_time: None,
                },
                files: Vec::new(),
                phase: SessionPhase::Active,
                end_epoch: 0,
                grace: None,
                room: None,
            }),
            pending,
        }
    }

    pub fn id(&self) -> String {
        self.state.lock().info.id.clone()
    }

    pub fn info(&self) -> SessionInfo {
        self.state.lock().info.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.phase(), SessionPhase::Ended | SessionPhase::Queued)
    }

    pub fn room(&self) -> Option<RoomHandle> {
        self.state.lock().room.clone()
    }

    pub fn files(&self) -> Vec<RecordedFile> {
        self.state.lock().files.clone()
    }

    /// Unended, in `room_id`, with the same title and sub-category
    pub fn is_same_broadcast(&self, room_id: u64, title: &str, sub_category: &str) -> bool {
        let state = self.state.lock();
        !matches!(state.phase, SessionPhase::Ended | SessionPhase::Queued)
            && state.info.room_id == room_id
            && state.info.title == title
            && state.info.sub_category == sub_category
    }

    /// Unended and attached to `room_id`
    pub fn is_live_in_room(&self, room_id: u64) -> bool {
        let state = self.state.lock();
        !matches!(state.phase, SessionPhase::Ended | SessionPhase::Queued)
            && state.info.room_id == room_id
    }

    pub fn set_title(&self, title: &str, sub_category: &str) {
        let mut state = self.state.lock();
        state.info.title = title.to_string();
        state.info.sub_category = sub_category.to_string();
    }

    /// Attach the live room, unless one is attached already.
    /// Returns true if the room was attached.
    pub fn attach_room(&self, name: &str, room: RoomHandle) -> bool {
        let mut state = self.state.lock();
        if state.room.is_some() {
            return false;
        }

        state.info.room_id = room.room_id();
        state.info.name = name.to_string();
        state.room = Some(room);
        true
    }

    /// Register a file as being written. A path already known is left as is.
    pub fn add_file(&self, path: &str) -> bool {
        let mut state = self.state.lock();
        if state.files.iter().any(|f| f.path == path) {
            warn!("File {} already registered in session {}", path, state.info.id);
            return false;
        }

        state.files.push(RecordedFile {
            path: path.to_string(),
            writing: true,
        });
        self.pending.send_replace(state.pending());
        true
    }

    /// Mark a registered file as finished. Returns false for unknown paths.
    pub fn finish_file(&self, path: &str) -> bool {
        let mut state = self.state.lock();
        let Some(file) = state.files.iter_mut().find(|f| f.path == path) else {
            return false;
        };

        file.writing = false;
        self.pending.send_replace(state.pending());
        true
    }

    /// Wait until no registered file is being written.
    pub async fn wait_files_closed(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Enter `EndPending` under a fresh epoch. Returns `None` once the
    /// session has already ended.
    pub fn begin_end(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if matches!(state.phase, SessionPhase::Ended | SessionPhase::Queued) {
            return None;
        }

        if let Some(grace) = state.grace.take() {
            grace.abort();
        }
        state.end_epoch += 1;
        state.phase = SessionPhase::EndPending {
            epoch: state.end_epoch,
        };
        Some(state.end_epoch)
    }

    /// Remember the grace timer for `epoch` so a reconnect can abort it.
    pub fn set_grace_timer(&self, epoch: u64, grace: AbortHandle) {
        let mut state = self.state.lock();
        if state.phase == (SessionPhase::EndPending { epoch }) {
            state.grace = Some(grace);
        } else {
            grace.abort();
        }
    }

    /// Return to `Active`, cancelling a pending end.
    /// Returns true if an end was pending.
    pub fn cancel_end(&self) -> bool {
        let mut state = self.state.lock();
        let SessionPhase::EndPending { epoch } = state.phase else {
            return false;
        };

        if let Some(grace) = state.grace.take() {
            grace.abort();
        }
        state.phase = SessionPhase::Active;
        debug!("Session {} end (epoch {}) cancelled", state.info.id, epoch);
        true
    }

    /// Transition `EndPending { epoch }` to `Ended`, stamping the end time.
    pub fn confirm_end(&self, epoch: u64, end_time: DateTime<Local>) -> bool {
        let mut state = self.state.lock();
        if state.phase != (SessionPhase::EndPending { epoch }) {
            return false;
        }

        state.phase = SessionPhase::Ended;
        state.grace = None;
        if state.info.end_time.is_none() {
            state.info.end_time = Some(end_time);
        }
        true
    }

    pub fn mark_queued(&self) {
        self.state.lock().phase = SessionPhase::Queued;
    }

    pub fn rekey(&self, id: &str) {
        self.state.lock().info.id = id.to_string();
    }

    /// Take over the files of a placeholder session, keeping arrival order.
    pub fn absorb(&self, other: &RecordingSession) {
        let files = other.files();
        let mut state = self.state.lock();
        for file in files {
            if !state.files.iter().any(|f| f.path == file.path) {
                state.files.push(file);
            }
        }
        self.pending.send_replace(state.pending());
    }
}
