//! Correlation of in-flight requests with their responses.
//!
//! Every pending request is stored under its sync id together with the
//! decoder that turns the raw response into the caller's value. Three parties
//! may try to resolve an entry: the reader task delivering a response, the
//! entry's timeout timer, and connection failure. All of them go through
//! `DashMap::remove`, so exactly one wins and the others find nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tarantool_core::{Packet, Result, TarantoolError};
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;

type Completer = Box<dyn FnOnce(Result<Packet>) + Send + Sync>;

struct PendingRequest {
    completer: Completer,
    submitted_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn resolve(self, result: Result<Packet>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        (self.completer)(result);
    }
}

/// Counters describing how tracked requests were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Requests resolved by a matching response.
    pub completed: u64,
    /// Requests resolved by their timeout firing.
    pub timed_out: u64,
    /// Requests failed explicitly or by connection loss.
    pub failed: u64,
}

/// Tracks requests awaiting a response on one connection.
pub struct RequestTracker {
    pending: DashMap<u64, PendingRequest>,
    drained: Notify,
    completed: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("in_flight", &self.pending.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RequestTracker {
    /// Creates an empty tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            drained: Notify::new(),
            completed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Registers a request and returns the handle its caller awaits.
    ///
    /// The handle resolves with the decoded response, with
    /// [`TarantoolError::RequestTimeout`] once `timeout` elapses, or with the
    /// error passed to [`fail`](Self::fail)/[`fail_all`](Self::fail_all),
    /// whichever happens first.
    pub fn submit<T, D>(self: &Arc<Self>, sync_id: u64, decoder: D, timeout: Duration) -> ResponseFuture<T>
    where
        T: Send + 'static,
        D: FnOnce(Packet) -> Result<T> + Send + Sync + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let completer: Completer = Box::new(move |result| {
            let _ = sender.send(result.and_then(decoder));
        });

        self.pending.insert(
            sync_id,
            PendingRequest {
                completer,
                submitted_at: Instant::now(),
                timer: None,
            },
        );

        let tracker: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.expire(sync_id);
            }
        });

        match self.pending.get_mut(&sync_id) {
            Some(mut entry) => entry.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        ResponseFuture { receiver, sync_id }
    }

    /// Delivers a response to the request with the packet's sync id.
    ///
    /// Returns `false` if no such request is pending, e.g. because it already
    /// timed out; the response is then discarded.
    pub fn complete(&self, packet: Packet) -> bool {
        let sync_id = packet.sync_id();
        match self.take(sync_id) {
            Some(request) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                request.resolve(Ok(packet));
                true
            }
            None => {
                tracing::debug!(sync_id, "discarding response for unknown request");
                false
            }
        }
    }

    /// Fails a single pending request.
    pub fn fail(&self, sync_id: u64, error: TarantoolError) -> bool {
        match self.take(sync_id) {
            Some(request) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                request.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fails every pending request, building one error per request.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> TarantoolError,
    {
        let sync_ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        sync_ids
            .into_iter()
            .filter(|sync_id| self.fail(*sync_id, make_error()))
            .count()
    }

    /// Returns the number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if a request with this sync id is pending.
    pub fn is_pending(&self, sync_id: u64) -> bool {
        self.pending.contains_key(&sync_id)
    }

    /// Returns resolution counters.
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Waits until no request is pending.
    ///
    /// Every entry carries its own timeout, so this wait is bounded by the
    /// longest outstanding request timeout.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn expire(&self, sync_id: u64) -> bool {
        match self.take(sync_id) {
            Some(request) => {
                let elapsed = request.submitted_at.elapsed();
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sync_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request timed out"
                );
                request.resolve(Err(TarantoolError::RequestTimeout { sync_id, elapsed }));
                true
            }
            None => false,
        }
    }

    fn take(&self, sync_id: u64) -> Option<PendingRequest> {
        let removed = self.pending.remove(&sync_id).map(|(_, request)| request);
        if removed.is_some() && self.pending.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }
}

/// Handle to the eventual result of a tracked request.
#[derive(Debug)]
pub struct ResponseFuture<T> {
    receiver: oneshot::Receiver<Result<T>>,
    sync_id: u64,
}

impl<T> ResponseFuture<T> {
    /// Returns the sync id of the tracked request.
    pub fn sync_id(&self) -> u64 {
        self.sync_id
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let sync_id = self.sync_id;
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(TarantoolError::ConnectionLost(format!(
                    "request {} was dropped before completion",
                    sync_id
                )))
            })
        })
    }
}
