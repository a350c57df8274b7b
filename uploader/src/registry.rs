use crate::error::UploaderError;
use crate::events::{FileEvent, LifecycleEvent, SessionEvent};
use crate::notifier::{RoomHandle, RoomNotifier, STREAM_CONNECTED, STREAM_RECONNECTED};
use crate::session::RecordingSession;
use chrono::Local;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Outcome of a session start event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// A new session was registered
    Created,
    /// The session already existed under this id; metadata refreshed
    Updated,
    /// An unended session of the same broadcast was resumed under this id
    Reconnected { previous_id: String },
}

/// Registry of recording sessions, keyed by session id.
///
/// The map lock is held for the mutation of a single event and never across
/// an `.await`. Session locks are only taken while holding the map lock, not
/// the other way around.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<RecordingSession>>>,
    grace_period: Duration,
    queue: mpsc::UnboundedSender<Arc<RecordingSession>>,
    notifier: Arc<dyn RoomNotifier + Send + Sync>,
}

impl SessionRegistry {
    /// Create a registry and the receiving end of its publish queue.
    pub fn new(
        grace_period: Duration,
        notifier: Arc<dyn RoomNotifier + Send + Sync>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<RecordingSession>>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            grace_period,
            queue,
            notifier,
        });

        (registry, rx)
    }

    /// Apply one lifecycle event.
    pub fn handle(self: &Arc<Self>, event: LifecycleEvent) -> Result<(), UploaderError> {
        match event {
            LifecycleEvent::FileOpening(e) => {
                self.file_opened(&e);
                Ok(())
            }
            LifecycleEvent::FileClosed(e) => self.file_closed(&e),
            LifecycleEvent::SessionStarted(e) => {
                self.session_started(&e);
                Ok(())
            }
            LifecycleEvent::SessionEnded(e) => self.session_ended(&e),
        }
    }

    pub fn file_opened(&self, event: &FileEvent) {
        let session = {
            let mut sessions = self.sessions.lock();
            sessions
                .entry(event.session_id.clone())
                .or_insert_with(|| {
                    info!("Creating session {} from file event", event.session_id);
                    Arc::new(RecordingSession::new(event.session_id.clone(), Local::now()))
                })
                .clone()
        };

        if session.add_file(&event.path) {
            info!("New recording file: {}", event.path);
        }
    }

    pub fn file_closed(&self, event: &FileEvent) -> Result<(), UploaderError> {
        let session = self.get(&event.session_id);
        match session {
            Some(session) if session.finish_file(&event.path) => {
                info!("Recording file finished: {}", event.path);
                Ok(())
            }
            _ => Err(UploaderError::OrphanEvent(format!(
                "file {} closed in unknown session {}",
                event.path, event.session_id
            ))),
        }
    }

    pub fn session_started(&self, event: &SessionEvent) -> Reconciled {
        let mut sessions = self.sessions.lock();

        let resumed = if event.room_id != 0 {
            sessions
                .iter()
                .find(|(_, s)| s.is_same_broadcast(event.room_id, &event.title, &event.sub_category))
                .map(|(id, s)| (id.clone(), Arc::clone(s)))
        } else {
            None
        };

        if let Some((previous_id, session)) = resumed {
            let was_pending = session.cancel_end();
            if previous_id == event.session_id {
                session.set_title(&event.title, &event.sub_category);
                drop(sessions);
                if !was_pending {
                    debug!("Session {} started again", event.session_id);
                    return Reconciled::Updated;
                }
            } else {
                sessions.remove(&previous_id);
                if let Some(placeholder) = sessions.remove(&event.session_id) {
                    session.absorb(&placeholder);
                }
                session.rekey(&event.session_id);
                session.set_title(&event.title, &event.sub_category);
                sessions.insert(event.session_id.clone(), Arc::clone(&session));
                drop(sessions);
            }

            info!(
                "Session reconnected: {} -> {} 《{}》@{}",
                previous_id, event.session_id, event.title, event.sub_category
            );
            if let Some(room) = session.room() {
                room.post_detached(STREAM_RECONNECTED);
            }
            return Reconciled::Reconnected { previous_id };
        }

        if event.room_id != 0
            && sessions
                .iter()
                .any(|(id, s)| *id != event.session_id && s.is_live_in_room(event.room_id))
        {
            warn!(
                "Room {} already has an unended session with different title",
                event.room_id
            );
        }

        let (session, outcome) = match sessions.get(&event.session_id) {
            Some(session) => {
                session.set_title(&event.title, &event.sub_category);
                (Arc::clone(session), Reconciled::Updated)
            }
            None => {
                let session = Arc::new(RecordingSession::new(event.session_id.clone(), Local::now()));
                session.set_title(&event.title, &event.sub_category);
                sessions.insert(event.session_id.clone(), Arc::clone(&session));
                (session, Reconciled::Created)
            }
        };

        let room = RoomHandle::open(event.room_id, Arc::clone(&self.notifier));
        let attached = session.attach_room(&event.name, room.clone());
        drop(sessions);

        info!("New live session 《{}》@{}", event.title, event.sub_category);
        if attached {
            room.post_detached(STREAM_CONNECTED);
        }
        outcome
    }

    pub fn session_ended(self: &Arc<Self>, event: &SessionEvent) -> Result<(), UploaderError> {
        let sessions = self.sessions.lock();
        let Some(session) = sessions.get(&event.session_id).cloned() else {
            return Err(UploaderError::OrphanEvent(format!(
                "end of unknown session {} 《{}》@{}",
                event.session_id, event.title, event.sub_category
            )));
        };

        let Some(epoch) = session.begin_end() else {
            debug!("Session {} has already ended", event.session_id);
            return Ok(());
        };

        let registry = Arc::clone(self);
        let session_id = event.session_id.clone();
        let grace_period = self.grace_period;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            registry.confirm_end(&session_id, epoch);
        });
        session.set_grace_timer(epoch, timer.abort_handle());
        drop(sessions);

        info!(
            "Session ended 《{}》@{}, waiting {:?} for a reconnect",
            event.title, event.sub_category, self.grace_period
        );
        Ok(())
    }

    /// Grace timer callback: finalize and enqueue if nothing reconnected.
    fn confirm_end(&self, session_id: &str, epoch: u64) {
        let session = {
            let sessions = self.sessions.lock();
            let Some(session) = sessions.get(session_id).cloned() else {
                debug!("Grace timer for {} found no session", session_id);
                return;
            };

            if !session.confirm_end(epoch, Local::now()) {
                debug!("Grace timer for {} (epoch {}) is stale", session_id, epoch);
                return;
            }
            session.mark_queued();
            session
        };

        info!("Session {} finished, moving to publish queue", session_id);
        if self.queue.send(session).is_err() {
            error!("Publish queue is closed, session {} dropped", session_id);
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RecordingSession>> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Remove a session if it is still registered under its current id.
    pub fn remove(&self, session: &Arc<RecordingSession>) -> bool {
        let mut sessions = self.sessions.lock();
        let id = session.id();
        let registered = sessions
            .get(&id)
            .map_or(false, |s| Arc::ptr_eq(s, session));
        if registered {
            sessions.remove(&id);
            info!("Session {} released", id);
        }
        registered
    }
}
