//! Sequential async flows
//!
//! A [`Flow`] runs a multi-step operation written as straight-line async code.
//! Each suspension point is one call to [`Flow::step`] (for futures) or
//! [`Flow::callback`] (for callback-style operations). A step resolves to the
//! operation's `Result`, so a failure surfaces at the suspension point where
//! the body can recover with `match` or hand it upward with `?`.
//!
//! `step` takes `&mut self`, so a flow can never have two steps outstanding.
//! Flows nest: [`Flow::nest`] runs a child flow as a single step of its parent.
//!
//! An error that escapes the body of a top-level [`Flow::run`] is logged and
//! returned to the caller, at `debug` when [`FlowFailure::is_routine`] says
//! the caller expects it and at `warn` otherwise. Panics are caught and
//! converted to [`FlowError::Panicked`].

use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

/// Failures raised by the engine itself rather than by a step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// A callback-style operation dropped its completion without answering.
    #[error("ERROR_STEP_ABANDONED")]
    Abandoned,
    #[error("ERROR_FLOW_PANICKED: {0}")]
    Panicked(String),
}

/// Error type a top-level flow can end with.
pub trait FlowFailure: From<FlowError> + Display {
    /// Outcomes callers handle as part of normal operation.
    fn is_routine(&self) -> bool {
        false
    }
}

/// Handle to one running flow execution.
pub struct Flow {
    name: Arc<str>,
    depth: usize,
    steps: Arc<AtomicUsize>,
}

impl Flow {
    fn new(name: Arc<str>, depth: usize) -> Self {
        Self {
            name,
            depth,
            steps: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `body` as a top-level flow execution.
    ///
    /// The result is always handed back to the caller; an uncaught error is
    /// also logged with the flow name and how far the flow got.
    pub async fn run<T, E, F, Fut>(name: impl Into<String>, body: F) -> Result<T, E>
    where
        F: FnOnce(Flow) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FlowFailure,
    {
        let name: Arc<str> = Arc::from(name.into());
        let flow = Flow::new(name.clone(), 0);
        let steps = flow.steps.clone();

        let result = drive(flow, body).await;
        let steps = steps.load(Ordering::Acquire);

        match &result {
            Ok(_) => debug!(flow = %name, steps, "flow completed"),
            Err(err) if err.is_routine() => debug!(flow = %name, steps, error = %err, "flow failed"),
            Err(err) => warn!(flow = %name, steps, error = %err, "flow ended with uncaught error"),
        }

        result
    }

    /// Suspend until `op` completes and resume with its result.
    pub async fn step<T, E, Fut>(&mut self, op: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let index = self.steps.load(Ordering::Acquire) + 1;
        trace!(flow = %self.name, depth = self.depth, step = index, "suspended");

        let result = op.await;
        self.steps.store(index, Ordering::Release);

        trace!(
            flow = %self.name,
            step = index,
            ok = result.is_ok(),
            "resumed"
        );
        result
    }

    /// Issue a callback-style operation and suspend until it answers.
    ///
    /// `issue` receives a [`Completion`] that must be answered exactly once.
    /// If it is dropped unanswered the step fails with
    /// [`FlowError::Abandoned`].
    pub async fn callback<T, E, F>(&mut self, issue: F) -> Result<T, E>
    where
        F: FnOnce(Completion<T, E>),
        E: From<FlowError>,
    {
        let (done, pending) = completion();
        issue(done);
        self.step(pending).await
    }

    /// Run a child flow as a single step of this one.
    pub async fn nest<T, E, F, Fut>(&mut self, name: &str, body: F) -> Result<T, E>
    where
        F: FnOnce(Flow) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FlowError>,
    {
        let child = Flow::new(Arc::from(format!("{}/{}", self.name, name)), self.depth + 1);
        self.step(drive(child, body)).await
    }

    /// Number of steps that have completed so far.
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

async fn drive<T, E, F, Fut>(flow: Flow, body: F) -> Result<T, E>
where
    F: FnOnce(Flow) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<FlowError>,
{
    let name = flow.name.clone();
    match AssertUnwindSafe(async move { body(flow).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(flow = %name, panic = %message, "flow panicked");
            Err(FlowError::Panicked(format!("{name}: {message}")).into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Answering side of a callback-style operation.
pub struct Completion<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Completion<T, E> {
    /// Deliver the operation's result. A flow that is no longer waiting
    /// simply never sees it.
    pub fn complete(self, result: Result<T, E>) {
        let _ = self.tx.send(result);
    }

    pub fn ok(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: E) {
        self.complete(Err(err));
    }
}

/// Waiting side of a callback-style operation.
pub struct Pending<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Unpin for Pending<T, E> {}

impl<T, E> Future for Pending<T, E>
where
    E: From<FlowError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(FlowError::Abandoned.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create a linked completion pair for a single-shot operation.
pub fn completion<T, E>() -> (Completion<T, E>, Pending<T, E>) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, Pending { rx })
}
