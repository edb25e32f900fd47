//! Forward queue worker: decouples inbound capture from outbound
//! delivery latency.
//!
//! A bounded FIFO queue feeds a single background drain loop. Each
//! dequeued event is fired as its own task, bounded by a counting
//! semaphore, so slow deliveries overlap without stalling the dequeue.
//!
//! # Failure semantics
//! A full queue drops the event (shed load, logged at error level); a
//! delivery failure never stops the drain loop; only shutdown does.

use crate::config::{ForwardConfig, MAX_QUEUE_SIZE};
use crate::delivery::{Deliver, DeliveryTarget, HttpDeliveryClient, deliver_with_retry};
use crate::event::EventRecord;
use std::sync::Arc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{error, info, warn};

/// How long `enqueue` may wait on a full queue before dropping.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded shutdown wait before the drain loop is forcibly aborted.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ForwardHandle
// ---------------------------------------------------------------------------

/// Cheap cloneable producer side of the forward queue.
///
/// Handed to the capture server; producers only enqueue, never dequeue.
#[derive(Clone)]
pub struct ForwardHandle {
    queue_tx: mpsc::Sender<EventRecord>,
}

impl ForwardHandle {
    /// Push an event onto the bounded queue, waiting at most one second.
    ///
    /// On timeout the event is dropped and logged; the caller (the inbound
    /// response path) is never stalled beyond the timeout and never sees
    /// an error.
    pub async fn enqueue(&self, event: EventRecord) {
        match self
            .queue_tx
            .send_timeout(event, ENQUEUE_TIMEOUT)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                error!(
                    capacity = MAX_QUEUE_SIZE,
                    method = %event.method,
                    path = %event.path,
                    "forward queue full; dropping event"
                );
            }
            Err(SendTimeoutError::Closed(event)) => {
                error!(
                    method = %event.method,
                    path = %event.path,
                    "forward queue closed; dropping event"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ForwardWorker
// ---------------------------------------------------------------------------

/// Owns the bounded queue, the drain loop, and the delivery client.
pub struct ForwardWorker<D: Deliver + 'static> {
    handle: ForwardHandle,
    queue_rx: Option<mpsc::Receiver<EventRecord>>,
    client: Option<Arc<D>>,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker: Option<JoinHandle<()>>,
}

impl ForwardWorker<HttpDeliveryClient> {
    /// Worker delivering to the configured forward URL over HTTP.
    pub fn new(config: &ForwardConfig) -> Self {
        Self::with_client(
            config,
            HttpDeliveryClient::new(DeliveryTarget::ForwardUrl(config.url.clone())),
        )
    }
}

impl<D: Deliver + 'static> ForwardWorker<D> {
    /// Worker with an injected delivery client.
    pub fn with_client(config: &ForwardConfig, client: D) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(MAX_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        ForwardWorker {
            handle: ForwardHandle { queue_tx },
            queue_rx: Some(queue_rx),
            client: Some(Arc::new(client)),
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            max_retries: config.max_retries,
            shutdown_tx,
            shutdown_rx,
            worker: None,
        }
    }

    /// Producer handle for the capture server.
    pub fn handle(&self) -> ForwardHandle {
        self.handle.clone()
    }

    /// See [`ForwardHandle::enqueue`].
    pub async fn enqueue(&self, event: EventRecord) {
        self.handle.enqueue(event).await;
    }

    /// Launch the background drain loop. Idempotent: a second call while
    /// the loop is running does nothing.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let Some(queue_rx) = self.queue_rx.take() else {
            return;
        };
        let Some(client) = self.client.clone() else {
            return;
        };
        let semaphore = Arc::clone(&self.semaphore);
        let max_retries = self.max_retries;
        let shutdown_rx = self.shutdown_rx.clone();
        self.worker = Some(tokio::spawn(drain_loop(
            queue_rx,
            client,
            semaphore,
            max_retries,
            shutdown_rx,
        )));
        info!("forward worker started");
    }

    /// Stop the drain loop and release the connection pool.
    ///
    /// Waits up to five seconds for the loop to observe shutdown; past
    /// that it is aborted and logged as a forced stop. In-flight
    /// deliveries are abandoned best-effort. Safe to call when never
    /// started, and safe to call twice.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.shutdown_tx.send(true);
            let abort = worker.abort_handle();
            match timeout(STOP_TIMEOUT, worker).await {
                Ok(_) => info!("forward worker stopped"),
                Err(_) => {
                    abort.abort();
                    warn!(
                        timeout_secs = STOP_TIMEOUT.as_secs(),
                        "forward worker did not stop in time; forced stop"
                    );
                }
            }
        }
        // Dropping our reference releases the pool once in-flight tasks finish.
        self.client = None;
    }
}

// ---------------------------------------------------------------------------
// Drain loop
// ---------------------------------------------------------------------------

/// Sequential dequeue, concurrent delivery: each event is fired as an
/// independent task gated by the semaphore, so up to `concurrency`
/// deliveries are in flight while the next dequeue proceeds.
async fn drain_loop<D: Deliver + 'static>(
    mut queue_rx: mpsc::Receiver<EventRecord>,
    client: Arc<D>,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("drain loop stopping (shutdown)");
                    return;
                }
            }
            received = queue_rx.recv() => {
                let Some(event) = received else {
                    info!("forward queue closed; drain loop exiting");
                    return;
                };
                let client = Arc::clone(&client);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    deliver_with_retry(&*client, &event, max_retries).await;
                });
            }
        }
    }
}
