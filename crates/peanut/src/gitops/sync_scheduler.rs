//! Trigger queue feeding the reconciliation loop.
//!
//! Three producers feed one consumer:
//!
//! - the periodic [`SyncScheduler`] timer,
//! - [`SyncTrigger`] handles held by the HTTP API,
//! - the [`Shutdown`] flag raised by the host.
//!
//! Activations travel through a single-slot queue. A trigger fired while one
//! is already pending is coalesced into it, so the loop is guaranteed another
//! run but not one run per trigger. Shutdown is a separate flag that the
//! consumer always checks first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Who asked for a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Timer,
    Api,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Timer => f.write_str("timer"),
            TriggerSource::Api => f.write_str("api"),
        }
    }
}

/// A request to run one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub source: TriggerSource,
    pub requested_at: DateTime<Utc>,
}

/// What happened to a fired trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// The activation was queued.
    Queued,
    /// An activation was already pending; this one was merged into it.
    Coalesced,
    /// The loop is gone.
    Closed,
}

/// Creates the trigger queue.
pub fn channel() -> (SyncTrigger, Shutdown, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let trigger = SyncTrigger { tx };
    let shutdown = Shutdown {
        tx: Arc::new(shutdown_tx),
    };
    let receiver = TriggerReceiver {
        rx,
        shutdown: ShutdownSignal { rx: shutdown_rx },
    };
    (trigger, shutdown, receiver)
}

/// Producer handle for activations. Never blocks.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<Activation>,
}

impl SyncTrigger {
    /// Posts an activation without waiting for the loop.
    pub fn fire(&self, source: TriggerSource) -> Delivery {
        let activation = Activation {
            source,
            requested_at: Utc::now(),
        };
        match self.tx.try_send(activation) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Coalesced,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Returns true once the loop has stopped consuming.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Producer handle for the shutdown flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Raises the flag. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns an observer of the flag.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the shutdown flag.
///
/// Dropping every [`Shutdown`] handle counts as a shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

/// What the loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    Activate(Activation),
    Shutdown,
}

/// The single consumer of the queue, owned by the loop.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<Activation>,
    shutdown: ShutdownSignal,
}

impl TriggerReceiver {
    /// Waits for the next activation. Shutdown wins over pending activations,
    /// including one that arrives together with the shutdown.
    pub async fn next(&mut self) -> LoopEvent {
        if self.shutdown.is_triggered() {
            return LoopEvent::Shutdown;
        }

        let received = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return LoopEvent::Shutdown,
            activation = self.rx.recv() => activation,
        };

        match received {
            // Re-checked after the take so a cycle is never started past shutdown
            Some(_) if self.shutdown.is_triggered() => LoopEvent::Shutdown,
            Some(activation) => LoopEvent::Activate(activation),
            None => {
                // Every producer is gone; nothing but shutdown can follow
                self.shutdown.wait().await;
                LoopEvent::Shutdown
            }
        }
    }

    /// Returns a handle on the shutdown flag.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stops accepting activations; later fires report [`Delivery::Closed`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Periodic timer producer.
#[derive(Debug)]
pub struct SyncScheduler {
    trigger: SyncTrigger,
    interval: Duration,
    shutdown: ShutdownSignal,
}

impl SyncScheduler {
    pub fn new(trigger: SyncTrigger, interval: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            trigger,
            interval,
            shutdown,
        }
    }

    /// Starts the timer. The first tick fires immediately so the agent
    /// reconciles once at startup.
    pub fn spawn(self) -> JoinHandle<()> {
        let Self {
            trigger,
            interval,
            mut shutdown,
        } = self;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {}
                }

                match trigger.fire(TriggerSource::Timer) {
                    Delivery::Queued => log::debug!("Resync timer queued an activation"),
                    Delivery::Coalesced => {
                        log::debug!("Resync timer coalesced into a pending activation")
                    }
                    Delivery::Closed => break,
                }
            }
            log::debug!("Resync timer stopped");
        })
    }
}
