use doorgate_core::{EnrollError, EnrollOutcome, Embedder, SessionController, SessionView, SubmitOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Extra time the caller waits past a request's deadline for the engine's own
/// verdict. Only a capture that never returns is cut off by the caller.
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// Session controller as served by the daemon.
pub type Controller = SessionController<Box<dyn Embedder>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("enrollment failed: {0}")]
    Enroll(EnrollError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
///
/// Each carries the instant after which the caller has given up; the engine
/// must not commit anything the caller was told did not happen.
enum EngineRequest {
    Arm {
        deadline: Instant,
        reply: oneshot::Sender<bool>,
    },
    Submit {
        image: Vec<u8>,
        deadline: Instant,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    Enroll {
        deadline: Instant,
        reply: oneshot::Sender<Result<EnrollOutcome, EnrollError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Mutations are queued to the engine thread so blocking inference never
/// runs on the async runtime; reads go straight to the controller.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    controller: Arc<Controller>,
    timeout: Duration,
}

impl EngineHandle {
    pub async fn arm(&self) -> Result<(), EngineError> {
        let armed = self
            .request(|deadline, reply| EngineRequest::Arm { deadline, reply })
            .await?;
        if armed {
            Ok(())
        } else {
            Err(EngineError::Timeout(self.timeout))
        }
    }

    /// Submit a frame. An attempt that overruns its deadline is decided UNAUTHORIZED.
    pub async fn submit_frame(&self, image: Vec<u8>) -> Result<SubmitOutcome, EngineError> {
        self.request(|deadline, reply| EngineRequest::Submit {
            image,
            deadline,
            reply,
        })
        .await
    }

    pub async fn enroll(&self) -> Result<EnrollOutcome, EngineError> {
        match self
            .request(|deadline, reply| EngineRequest::Enroll { deadline, reply })
            .await?
        {
            Ok(outcome) => Ok(outcome),
            Err(EnrollError::DeadlineExceeded) => Err(EngineError::Timeout(self.timeout)),
            Err(e) => Err(EngineError::Enroll(e)),
        }
    }

    pub fn view(&self) -> SessionView {
        self.controller.view()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Instant, oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let deadline = Instant::now() + self.timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let round_trip = async {
            self.tx
                .send(make(deadline, reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        tokio::time::timeout(self.timeout + REPLY_GRACE, round_trip)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Spawn the engine on a dedicated OS thread.
pub fn spawn_engine(controller: Arc<Controller>, timeout: Duration) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let worker = Arc::clone(&controller);

    std::thread::Builder::new()
        .name("doorgate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Arm { deadline, reply } => {
                        let fresh = Instant::now() < deadline;
                        if fresh {
                            worker.arm();
                        } else {
                            tracing::warn!("dropping stale arm request");
                        }
                        let _ = reply.send(fresh);
                    }
                    EngineRequest::Submit {
                        image,
                        deadline,
                        reply,
                    } => {
                        let outcome = worker.submit_frame_until(image, deadline);
                        tracing::debug!(outcome = outcome.as_str(), "frame processed");
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Enroll { deadline, reply } => {
                        let _ = reply.send(worker.enroll_until(deadline));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        controller,
        timeout,
    })
}
