//! Lifecycle orchestrator
//!
//! The Orchestrator is responsible for:
//! - Running create/read/update/delete for one managed object
//! - Retrying every remote call with bounded, jittered backoff
//! - Resynchronising tracked state with a fresh read after each write
//! - Emitting lifecycle events for monitoring
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────┐
//!   ManagedObject ────► │ Orchestrator │ ◄──── Backoff (between attempts)
//!                       └──────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │   Payload   │     │ Dispatcher  │     │ Reconciler  │
//!   │  (on write) │     │ (transport) │     │  (on read)  │
//!   └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Atomicity
//!
//! Tracked state is only mutated once an operation has fully succeeded. A
//! failed create or update leaves the object exactly as the caller passed it.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::config::RestConfig;
use crate::dispatcher::{DispatchRules, Dispatcher, Outcome};
use crate::error::{Error, Result};
use crate::model::ManagedObject;
use crate::reconciler::{Reconciler, Snapshot};
use crate::traits::{Method, Transport};

/// Default capacity of the lifecycle event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create the object
    Create,
    /// Refresh tracked state
    Read,
    /// Update the object
    Update,
    /// Delete the object
    Delete,
    /// Import an existing object by "class:dn"
    Import,
    /// Read-only lookup of an object
    Lookup,
}

impl Operation {
    /// Lower-case operation name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
            Operation::Lookup => "lookup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the Orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Operation started
    Started { operation: Operation, dn: String },

    /// One attempt failed and may be retried
    AttemptFailed {
        operation: Operation,
        dn: String,
        attempt: u32,
        error: String,
    },

    /// Operation succeeded and tracked state converged
    Succeeded { operation: Operation, dn: String },

    /// The remote object is confirmed absent
    Absent { dn: String },

    /// Operation gave up
    Failed {
        operation: Operation,
        dn: String,
        attempts: u32,
        error: String,
    },
}

/// Result of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Tracked state now matches the remote
    Converged,
    /// The remote object does not exist; identity has been cleared
    Absent,
}

/// Lifecycle orchestrator for managed objects
///
/// ## Concurrency
///
/// Each call runs to completion on the calling task, sleeping between
/// attempts. The orchestrator holds no per-object state, so distinct objects
/// may be processed concurrently; callers own any path-level exclusion.
pub struct Orchestrator {
    /// Single-shot remote operations
    dispatcher: Dispatcher,

    /// Read-back of tracked state
    reconciler: Reconciler,

    /// Delay policy between attempts
    backoff: Backoff,

    /// Attempts per operation (at least 1)
    max_attempts: u32,

    /// Attributes skipped by import/lookup
    ignored_attributes: BTreeSet<String>,

    /// External cancellation flag
    cancel: Option<watch::Receiver<bool>>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<LifecycleEvent>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dispatcher", &self.dispatcher)
            .field("backoff", &self.backoff)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// # Parameters
    ///
    /// - `transport`: network capability
    /// - `config`: validated configuration
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver yields
    /// lifecycle events
    pub fn new(
        transport: Box<dyn Transport>,
        config: &RestConfig,
    ) -> Result<(Self, mpsc::Receiver<LifecycleEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CAPACITY);

        let orchestrator = Self {
            dispatcher: Dispatcher::new(
                transport,
                DispatchRules::from(&config.rules),
                config.annotation(),
            ),
            reconciler: Reconciler::new(config.rules.write_only_attributes.clone()),
            backoff: Backoff::new(BackoffPolicy::from(&config.backoff)),
            max_attempts: config.retries.max(1),
            ignored_attributes: config.rules.ignored_attributes.clone(),
            cancel: None,
            event_tx: tx,
        };

        Ok((orchestrator, rx))
    }

    /// Replace the backoff controller (e.g. with a fake sleeper)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Abort retry loops once `cancel` becomes true
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attempts made per operation before giving up
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Create the object, then read it back
    ///
    /// If the read-back finds nothing the write still counts as done, but the
    /// object's identity is cleared and an [`LifecycleEvent::Absent`] is
    /// emitted instead of `Succeeded`.
    pub async fn create(&self, object: &mut ManagedObject) -> Result<()> {
        self.write(Operation::Create, object).await
    }

    /// Update the object, then read it back
    ///
    /// Every declared attribute and child is re-sent. An absent read-back is
    /// handled as for [`Orchestrator::create`].
    pub async fn update(&self, object: &mut ManagedObject) -> Result<()> {
        self.write(Operation::Update, object).await
    }

    /// Refresh tracked attributes and children from the remote
    pub async fn read(&self, object: &mut ManagedObject) -> Result<ReadOutcome> {
        object.validate()?;
        debug!("{}: Beginning Read", object.dn);
        self.emit_event(LifecycleEvent::Started {
            operation: Operation::Read,
            dn: object.dn.clone(),
        });

        match self.fetch(Operation::Read, object).await? {
            Some(snapshot) => {
                apply(object, snapshot);
                debug!("{}: Read finished successfully", object.dn);
                self.emit_event(LifecycleEvent::Succeeded {
                    operation: Operation::Read,
                    dn: object.dn.clone(),
                });
                Ok(ReadOutcome::Converged)
            }
            None => {
                info!("{}: object no longer exists", object.dn);
                object.id = None;
                self.emit_event(LifecycleEvent::Absent {
                    dn: object.dn.clone(),
                });
                Ok(ReadOutcome::Absent)
            }
        }
    }

    /// Delete the object and clear its identity
    ///
    /// An object that is already gone counts as deleted.
    pub async fn delete(&self, object: &mut ManagedObject) -> Result<()> {
        object.validate()?;
        debug!("{}: Beginning Destroy", object.dn);
        self.emit_event(LifecycleEvent::Started {
            operation: Operation::Delete,
            dn: object.dn.clone(),
        });

        let dispatcher = &self.dispatcher;
        let target: &ManagedObject = object;
        self.with_retry(Operation::Delete, &target.dn, move || async move {
            dispatcher.execute(Method::Delete, target).await
        })
        .await?;

        object.id = None;
        debug!("{}: Destroy finished successfully", object.dn);
        self.emit_event(LifecycleEvent::Succeeded {
            operation: Operation::Delete,
            dn: object.dn.clone(),
        });
        Ok(())
    }

    /// Import an existing object from an id of the form `"<class>:<dn>"`
    ///
    /// Every attribute except the ignored ones becomes tracked. Children are
    /// not imported.
    pub async fn import(&self, id: &str) -> Result<ManagedObject> {
        let (class_name, dn) = parse_import_id(id)?;
        self.snapshot(Operation::Import, dn, class_name)
            .await?
            .ok_or_else(|| Error::not_found(dn.to_string()))
    }

    /// Read an object without prior tracking
    ///
    /// Returns `None` when the object does not exist.
    pub async fn lookup(&self, dn: &str, class_name: &str) -> Result<Option<ManagedObject>> {
        self.snapshot(Operation::Lookup, dn, class_name).await
    }

    async fn write(&self, operation: Operation, object: &mut ManagedObject) -> Result<()> {
        object.validate()?;
        debug!("{}: Beginning {}", object.dn, operation);
        self.emit_event(LifecycleEvent::Started {
            operation,
            dn: object.dn.clone(),
        });

        let dispatcher = &self.dispatcher;
        let desired: &ManagedObject = object;
        let sent = self
            .with_retry(operation, &desired.dn, move || async move {
                dispatcher.execute(Method::Post, desired).await
            })
            .await?;
        if let Outcome::Written(payload) = &sent {
            debug!("{}: {} sent {}", desired.dn, operation, payload);
        }

        let Some(snapshot) = self.fetch(Operation::Read, object).await? else {
            info!("{}: object no longer exists after {}", object.dn, operation);
            object.id = None;
            self.emit_event(LifecycleEvent::Absent {
                dn: object.dn.clone(),
            });
            return Ok(());
        };

        apply(object, snapshot);
        debug!("{}: {} finished successfully", object.dn, operation);
        self.emit_event(LifecycleEvent::Succeeded {
            operation,
            dn: object.dn.clone(),
        });
        Ok(())
    }

    /// GET and reconcile under one retry budget
    ///
    /// Returns `None` when the remote reports the object absent.
    async fn fetch(&self, operation: Operation, object: &ManagedObject) -> Result<Option<Snapshot>> {
        let dispatcher = &self.dispatcher;
        let reconciler = &self.reconciler;

        self.with_retry(operation, &object.dn, move || async move {
            match dispatcher.execute(Method::Get, object).await? {
                Outcome::Found(response) => reconciler
                    .reconcile(&response, &object.class_name, &object.content, &object.children)
                    .map(Some),
                Outcome::Absent => Ok(None),
                other => Err(Error::reconciliation(format!(
                    "unexpected outcome for GET: {:?}",
                    other
                ))),
            }
        })
        .await
    }

    async fn snapshot(
        &self,
        operation: Operation,
        dn: &str,
        class_name: &str,
    ) -> Result<Option<ManagedObject>> {
        let probe = ManagedObject::new(dn, class_name);
        probe.validate()?;
        debug!("{}: Beginning {}", dn, operation);
        self.emit_event(LifecycleEvent::Started {
            operation,
            dn: dn.to_string(),
        });

        let dispatcher = &self.dispatcher;
        let reconciler = &self.reconciler;
        let ignored = &self.ignored_attributes;
        let probe_ref = &probe;

        let content = self
            .with_retry(operation, dn, move || async move {
                match dispatcher.execute_with(Method::Get, probe_ref, false).await? {
                    Outcome::Found(response) => reconciler
                        .snapshot_all(&response, class_name, ignored)
                        .map(Some),
                    Outcome::Absent => Ok(None),
                    other => Err(Error::reconciliation(format!(
                        "unexpected outcome for GET: {:?}",
                        other
                    ))),
                }
            })
            .await?;

        let Some(content) = content else {
            self.emit_event(LifecycleEvent::Absent { dn: dn.to_string() });
            return Ok(None);
        };

        self.emit_event(LifecycleEvent::Succeeded {
            operation,
            dn: dn.to_string(),
        });
        Ok(Some(ManagedObject {
            id: Some(dn.to_string()),
            content,
            ..probe
        }))
    }

    /// Run `attempt_fn` until it succeeds or the retry budget is spent
    async fn with_retry<T, F, Fut>(&self, operation: Operation, dn: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);

            let err = match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            warn!(
                "Failed to {} object {}: {}, attempt: {}",
                operation, dn, err, attempt
            );
            self.emit_event(LifecycleEvent::AttemptFailed {
                operation,
                dn: dn.to_string(),
                attempt,
                error: err.to_string(),
            });

            if self.is_cancelled() {
                return Err(Error::Cancelled(operation));
            }

            if !self.should_retry(operation, attempt).await? {
                error!(
                    "Giving up on {} of {} after {} attempt(s): {}",
                    operation, dn, attempt, err
                );
                self.emit_event(LifecycleEvent::Failed {
                    operation,
                    dn: dn.to_string(),
                    attempts: attempt,
                    error: err.to_string(),
                });
                return Err(Error::ExhaustedRetries {
                    operation,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            debug!("Retrying {} of {}, attempt {}", operation, dn, attempt.saturating_add(1));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Ask the backoff controller for another attempt, racing its sleep
    /// against cancellation
    async fn should_retry(&self, operation: Operation, attempt: u32) -> Result<bool> {
        let retry = self.backoff.should_retry(attempt, self.max_attempts);
        let Some(cancel) = &self.cancel else {
            return Ok(retry.await);
        };

        let mut cancel = cancel.clone();
        let retry = tokio::select! {
            retry = retry => retry,
            _ = wait_for_cancel(&mut cancel) => return Err(Error::Cancelled(operation)),
        };
        if retry && self.is_cancelled() {
            return Err(Error::Cancelled(operation));
        }
        Ok(retry)
    }

    /// Emit a lifecycle event
    ///
    /// Never blocks: a full channel drops the event, and a dropped receiver
    /// means nobody is listening.
    fn emit_event(&self, event: LifecycleEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Event channel full, dropping lifecycle event"),
            Err(TrySendError::Closed(_)) => trace!("Event receiver gone, dropping lifecycle event"),
        }
    }
}

fn apply(object: &mut ManagedObject, snapshot: Snapshot) {
    object.content = snapshot.content;
    object.children = snapshot.children;
    object.id = Some(object.dn.clone());
}

async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    let signalled = cancel.wait_for(|flag| *flag).await.is_ok();
    if !signalled {
        // Sender gone: cancellation can no longer happen
        std::future::pending::<()>().await;
    }
}

/// Split an import id of the form `"<class>:<dn>"`
pub fn parse_import_id(id: &str) -> Result<(&str, &str)> {
    match id.split_once(':') {
        Some((class_name, dn)) if !class_name.is_empty() && !dn.is_empty() => Ok((class_name, dn)),
        _ => Err(Error::invalid_input(format!(
            "import id must look like <class>:<dn>, got: {}",
            id
        ))),
    }
}
