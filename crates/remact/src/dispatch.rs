// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handler scheduling.
//!
//! A port is bound to a [`Dispatcher`] when it is built:
//! - [`Dispatcher::Context`] posts every handler invocation to an
//!   [`ExecutionContext`], which runs them one at a time in posting order.
//!   Application code never sees concurrent callbacks.
//! - [`Dispatcher::Inline`] runs handlers on the transport task that
//!   delivered the message. Port tables are lock-protected, so handlers may
//!   run concurrently.

use crate::error::{RemactError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Unit of work posted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How port handlers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// All handlers run on one execution context.
    #[default]
    SingleContext,
    /// Handlers run inline on transport tasks.
    Multithreaded,
}

/// Cooperative execution context.
///
/// Owns the job queue. Drive it with [`run`](Self::run) on the task that
/// should own application state, or pump it manually with
/// [`run_pending`](Self::run_pending).
pub struct ExecutionContext {
    tx: mpsc::UnboundedSender<Job>,
    rx: mpsc::UnboundedReceiver<Job>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Handle for binding ports to this context.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run jobs until every handle is dropped.
    pub async fn run(self) {
        let Self { tx, mut rx } = self;
        drop(tx);
        while let Some(job) = rx.recv().await {
            job();
        }
    }

    /// Run the jobs queued so far and return how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            count += 1;
        }
        count
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender side of an [`ExecutionContext`].
#[derive(Clone)]
pub struct ContextHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl ContextHandle {
    /// Queue a job. Returns false when the context has stopped.
    pub fn post(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Scheduling policy of a port.
#[derive(Clone)]
pub enum Dispatcher {
    Context(ContextHandle),
    Inline,
}

impl Dispatcher {
    /// Resolve the dispatcher for a threading mode.
    ///
    /// Single-context mode without a context handle is a configuration
    /// error.
    pub fn for_mode(mode: ThreadingMode, context: Option<ContextHandle>) -> Result<Self> {
        match (mode, context) {
            (ThreadingMode::SingleContext, Some(handle)) => Ok(Self::Context(handle)),
            (ThreadingMode::SingleContext, None) => Err(RemactError::NoExecutionContext),
            (ThreadingMode::Multithreaded, _) => Ok(Self::Inline),
        }
    }

    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Self::Inline => job(),
            Self::Context(handle) => {
                if !handle.post(Box::new(job)) {
                    warn!("execution context stopped, dropping handler invocation");
                }
            }
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Context(_) => f.write_str("Dispatcher::Context"),
            Self::Inline => f.write_str("Dispatcher::Inline"),
        }
    }
}
