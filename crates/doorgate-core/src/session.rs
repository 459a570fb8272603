//! Session state machine arbitrating between viewers, detection triggers and enrollment.
//!
//! Mutating operations (`arm`, `submit_frame`, `enroll`) serialize on one
//! worker mutex that owns the store and the capture gate, so a detection attempt
//! runs check-consume-capture-decide as a single critical section. The display
//! state lives behind a separate reader-writer lock that is only ever held for
//! single short updates, so viewers see a consistent snapshot without waiting
//! on an in-flight capture.

use crate::capture::{CaptureError, CaptureGate, Embedder};
use crate::matcher::{MatchOutcome, Matcher, NearestMatcher, DEFAULT_MATCH_THRESHOLD};
use crate::store::{FaceStore, StoreError};
use crate::types::{DistanceMetric, GateResult};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long an AUTHORIZED/UNAUTHORIZED result stays visible.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(3);

/// Tunables for a [`SessionController`].
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub threshold: f32,
    pub metric: DistanceMetric,
    pub expiry_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            metric: DistanceMetric::Euclidean,
            expiry_window: DEFAULT_EXPIRY_WINDOW,
        }
    }
}

/// What a submitted frame did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Not armed; only the displayed frame changed.
    Idle,
    /// Armed, but nothing is enrolled. Result reset to READY.
    NoEnrollments,
    Authorized,
    Unauthorized,
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitOutcome::Idle => "idle",
            SubmitOutcome::NoEnrollments => "no_enrollments",
            SubmitOutcome::Authorized => "authorized",
            SubmitOutcome::Unauthorized => "unauthorized",
        }
    }
}

/// Successful (non-error) enrollment outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled { count: usize },
    NoFaceDetected,
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("could not persist enrollment: {0}")]
    Store(#[from] StoreError),
    #[error("enrollment deadline passed before the face was stored")]
    DeadlineExceeded,
}

/// Consistent snapshot handed to viewers.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub frame: Option<Arc<[u8]>>,
    pub result: GateResult,
    pub armed: bool,
    pub enrolled_count: usize,
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[derive(Debug)]
struct SessionState {
    current_frame: Option<Arc<[u8]>>,
    armed: bool,
    result: GateResult,
    result_at: Option<Instant>,
    enrolled_count: usize,
}

struct Worker<E> {
    store: FaceStore,
    gate: CaptureGate<E>,
}

/// Owns the session state, the face store and the capture gate.
///
/// Share it between callers behind an `Arc`; every method takes `&self`.
pub struct SessionController<E> {
    worker: Mutex<Worker<E>>,
    state: RwLock<SessionState>,
    matcher: NearestMatcher,
    threshold: f32,
    expiry_window: Duration,
}

impl<E: Embedder> SessionController<E> {
    pub fn new(store: FaceStore, embedder: E, config: SessionConfig) -> Self {
        let enrolled_count = store.count();
        Self {
            worker: Mutex::new(Worker {
                store,
                gate: CaptureGate::new(embedder),
            }),
            state: RwLock::new(SessionState {
                current_frame: None,
                armed: false,
                result: GateResult::Ready,
                result_at: None,
                enrolled_count,
            }),
            matcher: NearestMatcher::new(config.metric),
            threshold: config.threshold,
            expiry_window: config.expiry_window,
        }
    }

    /// Permit exactly one upcoming detection attempt. Idempotent.
    pub fn arm(&self) {
        let _worker = self.worker.lock();
        self.state.write().armed = true;
        tracing::info!("detection armed");
    }

    /// Record `image` as the current frame and, if armed, run one detection attempt.
    ///
    /// The display window starts when the decision is made, not when the call began.
    pub fn submit_frame(&self, image: Vec<u8>) -> SubmitOutcome {
        self.submit(image, None, None)
    }

    /// Like [`submit_frame`](Self::submit_frame), but a detection attempt that
    /// cannot finish before `deadline` is recorded and reported as UNAUTHORIZED.
    pub fn submit_frame_until(&self, image: Vec<u8>, deadline: Instant) -> SubmitOutcome {
        self.submit(image, Some(deadline), None)
    }

    /// Like [`submit_frame`](Self::submit_frame), with the decision stamped at `decided_at`.
    pub fn submit_frame_at(&self, image: Vec<u8>, decided_at: Instant) -> SubmitOutcome {
        self.submit(image, None, Some(decided_at))
    }

    fn submit(
        &self,
        image: Vec<u8>,
        deadline: Option<Instant>,
        decided_at: Option<Instant>,
    ) -> SubmitOutcome {
        let mut worker = self.worker.lock();
        let frame: Arc<[u8]> = image.into();

        let armed = {
            let mut state = self.state.write();
            state.current_frame = Some(Arc::clone(&frame));
            std::mem::take(&mut state.armed)
        };
        if !armed {
            return SubmitOutcome::Idle;
        }

        if worker.store.count() == 0 {
            let mut state = self.state.write();
            state.result = GateResult::Ready;
            state.result_at = None;
            tracing::warn!("detection attempted with no enrolled faces");
            return SubmitOutcome::NoEnrollments;
        }

        let outcome = if past(deadline) {
            tracing::warn!("detection request expired before capture; denying");
            SubmitOutcome::Unauthorized
        } else {
            self.detect(&mut worker, &frame)
        };
        let outcome = if outcome == SubmitOutcome::Authorized && past(deadline) {
            tracing::warn!("detection finished after its deadline; denying");
            SubmitOutcome::Unauthorized
        } else {
            outcome
        };

        let mut state = self.state.write();
        state.result = match outcome {
            SubmitOutcome::Authorized => GateResult::Authorized,
            _ => GateResult::Unauthorized,
        };
        state.result_at = Some(decided_at.unwrap_or_else(Instant::now));
        outcome
    }

    fn detect(&self, worker: &mut Worker<E>, frame: &[u8]) -> SubmitOutcome {
        let Some(probe) = worker.gate.extract_for_recognition(frame) else {
            tracing::info!("no face in detection frame");
            return SubmitOutcome::Unauthorized;
        };
        match self.matcher.best_match(&probe, worker.store.all(), self.threshold) {
            MatchOutcome::Matched { index, distance } => {
                tracing::info!(index, distance, "face matched");
                SubmitOutcome::Authorized
            }
            MatchOutcome::NoMatch { closest } => {
                tracing::info!(closest = ?closest, threshold = self.threshold, "face not recognized");
                SubmitOutcome::Unauthorized
            }
        }
    }

    /// Enroll the face in the most recently submitted frame.
    ///
    /// Never touches the detection result or the armed flag.
    pub fn enroll(&self) -> Result<EnrollOutcome, EnrollError> {
        self.enroll_inner(None)
    }

    /// Like [`enroll`](Self::enroll), but nothing is written once `deadline` has passed.
    pub fn enroll_until(&self, deadline: Instant) -> Result<EnrollOutcome, EnrollError> {
        self.enroll_inner(Some(deadline))
    }

    fn enroll_inner(&self, deadline: Option<Instant>) -> Result<EnrollOutcome, EnrollError> {
        let mut worker = self.worker.lock();
        let frame = self
            .state
            .read()
            .current_frame
            .clone()
            .ok_or(CaptureError::NoFrame)?;
        if past(deadline) {
            return Err(EnrollError::DeadlineExceeded);
        }

        let Some(signature) = worker.gate.extract_for_enrollment(&frame)? else {
            tracing::info!("enroll: no face in current frame");
            return Ok(EnrollOutcome::NoFaceDetected);
        };
        if past(deadline) {
            tracing::warn!("enroll capture finished after its deadline; discarding");
            return Err(EnrollError::DeadlineExceeded);
        }

        worker.store.append(signature)?;
        let count = worker.store.count();
        self.state.write().enrolled_count = count;
        tracing::info!(count, "face enrolled");
        Ok(EnrollOutcome::Enrolled { count })
    }

    pub fn view(&self) -> SessionView {
        self.view_at(Instant::now())
    }

    /// Snapshot as of `now`, with expired results reported as READY.
    pub fn view_at(&self, now: Instant) -> SessionView {
        let state = self.state.read();
        let result = match (state.result, state.result_at) {
            (GateResult::Ready, _) => GateResult::Ready,
            (_, Some(at)) if now.saturating_duration_since(at) > self.expiry_window => GateResult::Ready,
            (result, _) => result,
        };
        SessionView {
            frame: state.current_frame.clone(),
            result,
            armed: state.armed,
            enrolled_count: state.enrolled_count,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn metric(&self) -> DistanceMetric {
        self.matcher.metric
    }

    pub fn expiry_window(&self) -> Duration {
        self.expiry_window
    }
}
