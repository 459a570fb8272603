use crate::engine::{EngineError, EngineHandle};
use doorgate_core::{CaptureError, EnrollError, EnrollOutcome, GateResult, SessionView, SubmitOutcome};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.doorgate.Gate1";
pub const OBJECT_PATH: &str = "/org/doorgate/Gate1";

/// D-Bus interface for the doorgate daemon.
///
/// Bus name: org.doorgate.Gate1
/// Object path: /org/doorgate/Gate1
pub struct GateService {
    engine: EngineHandle,
}

impl GateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.doorgate.Gate1")]
impl GateService {
    /// Current frame (empty if none yet), displayed result and enrolled count.
    #[zbus(out_args("frame", "result", "enrolled_count"))]
    async fn view(&self) -> (Vec<u8>, String, u32) {
        view_reply(self.engine.view())
    }

    /// Permit one detection attempt on the next submitted frame.
    async fn arm_detect(&self) -> zbus::fdo::Result<()> {
        tracing::info!("arm requested");
        self.engine.arm().await.map_err(to_fdo)
    }

    /// Enroll the face in the current frame.
    ///
    /// Returns one of `success`, `no_face_detected`, `capture_error`, `storage_error`.
    async fn enroll(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enroll requested");
        let status = enroll_status(self.engine.enroll().await).map_err(to_fdo)?;
        Ok(status.to_string())
    }

    /// Submit an encoded frame.
    ///
    /// Returns one of `idle`, `no_enrollments`, `authorized`, `unauthorized`.
    async fn submit_frame(
        &self,
        image: Vec<u8>,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<String> {
        let outcome = submit_outcome(self.engine.submit_frame(image).await).map_err(to_fdo)?;
        if let Some(result) = decision_for(outcome) {
            tracing::info!(%result, "access decision");
            if let Err(e) = Self::decision(&emitter, result.as_str()).await {
                tracing::warn!(error = %e, "failed to emit Decision signal");
            }
        }

        Ok(outcome.as_str().to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let controller = self.engine.controller();
        let view = controller.view();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "result": view.result.as_str(),
            "armed": view.armed,
            "enrolled_count": view.enrolled_count,
            "has_frame": view.frame.is_some(),
            "threshold": controller.threshold(),
            "metric": controller.metric().as_str(),
            "expiry_secs": controller.expiry_window().as_secs(),
        })
        .to_string())
    }

    /// Emitted after every detection attempt that reached a decision.
    #[zbus(signal)]
    async fn decision(emitter: &SignalEmitter<'_>, result: &str) -> zbus::Result<()>;
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    tracing::error!(error = %e, "engine request failed");
    zbus::fdo::Error::Failed(e.to_string())
}

fn view_reply(view: SessionView) -> (Vec<u8>, String, u32) {
    (
        view.frame.map(|f| f.to_vec()).unwrap_or_default(),
        view.result.as_str().to_string(),
        u32::try_from(view.enrolled_count).unwrap_or(u32::MAX),
    )
}

/// Map an enroll result to its boundary status; only engine faults stay errors.
fn enroll_status(result: Result<EnrollOutcome, EngineError>) -> Result<&'static str, EngineError> {
    match result {
        Ok(EnrollOutcome::Enrolled { .. }) => Ok("success"),
        Ok(EnrollOutcome::NoFaceDetected) => Ok("no_face_detected"),
        Err(EngineError::Enroll(EnrollError::Capture(e))) => {
            if !matches!(e, CaptureError::NoFrame) {
                tracing::warn!(error = %e, "enroll capture failed");
            }
            Ok("capture_error")
        }
        Err(EngineError::Enroll(EnrollError::Store(e))) => {
            tracing::error!(error = %e, "enroll could not be persisted");
            Ok("storage_error")
        }
        Err(e @ (EngineError::Timeout(_) | EngineError::Enroll(EnrollError::DeadlineExceeded))) => {
            tracing::warn!(error = %e, "enroll timed out");
            Ok("capture_error")
        }
        Err(e) => Err(e),
    }
}

/// A detection that timed out is a failed capture, so the door stays shut.
fn submit_outcome(result: Result<SubmitOutcome, EngineError>) -> Result<SubmitOutcome, EngineError> {
    match result {
        Err(e @ EngineError::Timeout(_)) => {
            tracing::warn!(error = %e, "detection timed out; denying");
            Ok(SubmitOutcome::Unauthorized)
        }
        other => other,
    }
}

fn decision_for(outcome: SubmitOutcome) -> Option<GateResult> {
    match outcome {
        SubmitOutcome::Authorized => Some(GateResult::Authorized),
        SubmitOutcome::Unauthorized => Some(GateResult::Unauthorized),
        SubmitOutcome::Idle | SubmitOutcome::NoEnrollments => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorgate_core::{EmbedError, StoreError};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_enroll_status_strings() {
        assert_eq!(enroll_status(Ok(EnrollOutcome::Enrolled { count: 3 })).unwrap(), "success");
        assert_eq!(
            enroll_status(Ok(EnrollOutcome::NoFaceDetected)).unwrap(),
            "no_face_detected"
        );

        let no_frame = EngineError::Enroll(EnrollError::Capture(CaptureError::NoFrame));
        assert_eq!(enroll_status(Err(no_frame)).unwrap(), "capture_error");

        let fault = EngineError::Enroll(EnrollError::Capture(CaptureError::Embed(
            EmbedError::Decode("truncated jpeg".into()),
        )));
        assert_eq!(enroll_status(Err(fault)).unwrap(), "capture_error");

        let timeout = EngineError::Timeout(Duration::from_secs(10));
        assert_eq!(enroll_status(Err(timeout)).unwrap(), "capture_error");

        let store = EngineError::Enroll(EnrollError::Store(StoreError::EmptySignature));
        assert_eq!(enroll_status(Err(store)).unwrap(), "storage_error");

        assert!(matches!(
            enroll_status(Err(EngineError::ChannelClosed)),
            Err(EngineError::ChannelClosed)
        ));
    }

    #[test]
    fn test_submit_timeout_denies() {
        let outcome = submit_outcome(Err(EngineError::Timeout(Duration::from_secs(10)))).unwrap();
        assert_eq!(outcome, SubmitOutcome::Unauthorized);
        assert_eq!(submit_outcome(Ok(SubmitOutcome::Idle)).unwrap(), SubmitOutcome::Idle);
        assert!(submit_outcome(Err(EngineError::ChannelClosed)).is_err());
    }

    #[test]
    fn test_decision_only_for_verdicts() {
        assert_eq!(decision_for(SubmitOutcome::Authorized), Some(GateResult::Authorized));
        assert_eq!(decision_for(SubmitOutcome::Unauthorized), Some(GateResult::Unauthorized));
        assert_eq!(decision_for(SubmitOutcome::Idle), None);
        assert_eq!(decision_for(SubmitOutcome::NoEnrollments), None);
    }

    #[test]
    fn test_view_reply_without_frame_is_empty() {
        let view = SessionView {
            frame: None,
            result: GateResult::Ready,
            armed: false,
            enrolled_count: 0,
        };
        assert_eq!(view_reply(view), (Vec::new(), "READY".to_string(), 0));

        let view = SessionView {
            frame: Some(Arc::from(&b"jpeg"[..])),
            result: GateResult::Authorized,
            armed: false,
            enrolled_count: 2,
        };
        assert_eq!(view_reply(view), (b"jpeg".to_vec(), "AUTHORIZED".to_string(), 2));
    }
}
