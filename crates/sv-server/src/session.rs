//! Per-connection session state
//!
//! The registry maps session ids to their outbound queue and render state.
//! Pose updates are rate limited per session: an update inside the minimum
//! emit interval is stored but does not trigger a render, so only the most
//! recent pose before the next permitted render matters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sv_core::Pose;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session disconnected, usually while its frame was rendering
    #[error("Session not found: {0}")]
    NotFound(Uuid),
    /// The connection's writer is gone
    #[error("Session {0} is closed")]
    Closed(Uuid),
    /// The outbound queue is full; the frame was dropped
    #[error("Session {0} outbound queue is full")]
    QueueFull(Uuid),
}

/// Stereo parameters of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoMode {
    pub enabled: bool,
    pub eye_separation: f32,
}

#[derive(Debug)]
struct SessionState {
    pose: Option<Pose>,
    pose_seq: u64,
    last_emit: Option<Instant>,
    stereo: StereoMode,
}

/// One connected client
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    tx: mpsc::Sender<Bytes>,
    state: Mutex<SessionState>,
    connected_at: Instant,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Session {
    fn new(id: Uuid, tx: mpsc::Sender<Bytes>, stereo: StereoMode) -> Self {
        Self {
            id,
            tx,
            state: Mutex::new(SessionState {
                pose: None,
                pose_seq: 0,
                last_emit: None,
                stereo,
            }),
            connected_at: Instant::now(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Last accepted pose and its sequence number
    pub fn last_pose(&self) -> Option<(u64, Pose)> {
        let state = self.state.lock();
        state.pose.map(|p| (state.pose_seq, p))
    }

    pub fn stereo(&self) -> StereoMode {
        self.state.lock().stereo
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames queued for this session
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue a payload without waiting
    pub fn send(&self, payload: Bytes) -> Result<(), SessionError> {
        match self.tx.try_send(payload) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SessionError::QueueFull(self.id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Closed(self.id)),
        }
    }
}

/// A render the caller should perform for a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTicket {
    pub session: Uuid,
    pub pose: Pose,
    /// Sequence number of `pose` within the session
    pub seq: u64,
    /// Eye separation when the session wants stereo
    pub stereo: Option<f32>,
}

/// Result of accepting a pose update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseDecision {
    /// Render now
    Render(RenderTicket),
    /// Stored; inside the minimum emit interval
    Deferred { seq: u64, retry_in: Duration },
}

/// All live sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    min_interval: Duration,
    queue_capacity: usize,
    default_stereo: StereoMode,
}

impl SessionRegistry {
    pub fn new(min_interval: Duration, queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            min_interval,
            queue_capacity: queue_capacity.max(1),
            default_stereo: StereoMode {
                enabled: false,
                eye_separation: sv_core::DEFAULT_EYE_SEPARATION,
            },
        }
    }

    /// Stereo mode given to new sessions
    pub fn with_default_stereo(mut self, stereo: StereoMode) -> Self {
        self.default_stereo = stereo;
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Register a connection whose writer drains `tx`
    pub fn on_connect(&self, id: Uuid, tx: mpsc::Sender<Bytes>) -> Arc<Session> {
        let session = Arc::new(Session::new(id, tx, self.default_stereo));
        let (previous, active) = {
            let mut sessions = self.sessions.write();
            let previous = sessions.insert(id, Arc::clone(&session));
            (previous, sessions.len())
        };
        if previous.is_some() {
            tracing::warn!(session = %id, "Session id reused, replacing old session");
        }
        tracing::info!(session = %id, active, "Client connected");
        session
    }

    /// Register a new session with a fresh id and bounded queue
    pub fn connect(&self) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (self.on_connect(Uuid::new_v4(), tx), rx)
    }

    /// Forget a session. Returns false if it was already gone.
    pub fn on_disconnect(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&id);
        match &removed {
            Some(session) => tracing::info!(
                session = %id,
                delivered = session.delivered(),
                dropped = session.dropped(),
                "Client disconnected"
            ),
            None => tracing::debug!(session = %id, "Disconnect for unknown session"),
        }
        removed.is_some()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Store a pose without any rate limiting; returns its sequence number
    pub fn record_pose(&self, id: Uuid, pose: Pose) -> Result<u64, SessionError> {
        let session = self.get(id).ok_or(SessionError::NotFound(id))?;
        let mut state = session.state.lock();
        state.pose = Some(pose);
        state.pose_seq += 1;
        Ok(state.pose_seq)
    }

    /// Accept a pose update at the current time
    pub fn update_pose(&self, id: Uuid, pose: Pose) -> Result<PoseDecision, SessionError> {
        self.update_pose_at(id, pose, Instant::now())
    }

    /// Accept a pose update at `now`.
    ///
    /// The pose is always stored. A render is granted when the session has
    /// never emitted or its last emit is at least the minimum interval ago;
    /// granting a render counts as the emit.
    pub fn update_pose_at(
        &self,
        id: Uuid,
        pose: Pose,
        now: Instant,
    ) -> Result<PoseDecision, SessionError> {
        let session = self.get(id).ok_or(SessionError::NotFound(id))?;
        let mut state = session.state.lock();
        state.pose = Some(pose);
        state.pose_seq += 1;
        let seq = state.pose_seq;

        if let Some(last) = state.last_emit {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Ok(PoseDecision::Deferred {
                    seq,
                    retry_in: self.min_interval - elapsed,
                });
            }
        }

        state.last_emit = Some(now);
        Ok(PoseDecision::Render(RenderTicket {
            session: id,
            pose,
            seq,
            stereo: state
                .stereo
                .enabled
                .then_some(state.stereo.eye_separation),
        }))
    }

    /// Toggle stereo for one session; `None` keeps the current separation
    pub fn set_stereo(
        &self,
        id: Uuid,
        enabled: bool,
        eye_separation: Option<f32>,
    ) -> Result<StereoMode, SessionError> {
        let session = self.get(id).ok_or(SessionError::NotFound(id))?;
        let mut state = session.state.lock();
        state.stereo.enabled = enabled;
        if let Some(sep) = eye_separation {
            state.stereo.eye_separation = sep;
        }
        tracing::debug!(session = %id, enabled, "Stereo mode changed");
        Ok(state.stereo)
    }

    /// Call `f` for every session. The registry lock is not held during the
    /// calls, so `f` may connect or disconnect sessions.
    pub fn for_each_session(&self, mut f: impl FnMut(&Arc<Session>)) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        for session in &sessions {
            f(session);
        }
    }

    /// Queue a payload for one session
    pub fn deliver(&self, id: Uuid, payload: Bytes) -> Result<(), SessionError> {
        let session = self.get(id).ok_or(SessionError::NotFound(id))?;
        session.send(payload)
    }

    /// Queue a payload for every session; returns how many accepted it
    pub fn broadcast(&self, payload: &Bytes) -> usize {
        let mut delivered = 0;
        self.for_each_session(|session| match session.send(payload.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(session = %session.id(), "Broadcast frame dropped: {}", e),
        });
        delivered
    }
}
