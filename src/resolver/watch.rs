//! Watch loop keeping a target's address set in sync with a catalog.

use super::{BuildOptions, ClientConn, Resolver};
use crate::{
    backoff::Exponential,
    catalog::{Catalog, QueryOptions},
    AddressSet, Error, TargetDescriptor,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

// Deadline of a disarmed timer, roughly 30 years out.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}

/// Lifecycle of a [`CatalogResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The first lookup hasn't completed yet. Failures are fatal.
    Bootstrapping,
    /// At least one lookup delivered addresses. Failures are retried.
    Steady,
    /// The resolver was closed and its task has stopped.
    Closed,
}

/// Resolver that watches a [`Catalog`] from a background task.
///
/// The task looks the service up every [`BASE_DELAY`] while the catalog
/// returns instances, backs off exponentially while it fails or returns
/// none, and never resolves more often than
/// [`BuildOptions::min_resolution_interval`]. Each non-empty result is sorted
/// and delivered to the [`ClientConn`]; failures after the first successful
/// lookup leave the last delivered set in place.
///
/// [`BASE_DELAY`]: crate::backoff::BASE_DELAY
#[derive(Debug)]
pub struct CatalogResolver {
    service: String,
    trigger: mpsc::Sender<()>,
    cancel: CancellationToken,
    state: watch::Receiver<State>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CatalogResolver {
    /// Starts watching `target` in `catalog`, returning once the first lookup
    /// has delivered addresses to `conn`.
    ///
    /// Fails with [`Error::BootstrapResolutionFailed`] if that lookup errors
    /// or finds no instances; nothing keeps running in that case.
    pub async fn start<C: Catalog>(
        catalog: C,
        target: TargetDescriptor,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
    ) -> Result<Self, Error> {
        let (trigger, requests) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(State::Bootstrapping);
        let (ready_tx, ready) = oneshot::channel();
        let cancel = CancellationToken::new();
        let service = target.service_name.clone();

        let session = Session {
            catalog,
            backoff: Exponential::new(target.max_backoff),
            target,
            conn,
            requests,
            cancel: cancel.clone(),
            state: state_tx,
            min_interval: opts.min_resolution_interval,
            retries: 0,
            last_index: 0,
        };
        // Stops the task if we are dropped before bootstrap completes.
        let guard = cancel.clone().drop_guard();
        let task = tokio::spawn(session.run(ready_tx));

        match ready.await {
            Ok(Ok(())) => {
                guard.disarm();
                Ok(Self {
                    service,
                    trigger,
                    cancel,
                    state,
                    task: Mutex::new(Some(task)),
                })
            }
            Ok(Err(e)) => {
                let _ = task.await;
                Err(e)
            }
            Err(_) => Err(Error::BootstrapResolutionFailed {
                service,
                reason: "resolver task exited before the first lookup completed".to_string(),
            }),
        }
    }

    /// Logical service being resolved.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        *self.state.borrow()
    }
}

#[async_trait]
impl Resolver for CatalogResolver {
    fn resolve_now(&self) {
        match self.trigger.try_send(()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(())) => {
                #[cfg(feature = "log")]
                tracing::trace!(service = %self.service, "Resolution already pending");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {}
        }
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    async fn join(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_mut() {
            let _ = handle.await;
            *task = None;
        }
    }
}

impl Drop for CatalogResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the background task.
struct Session<C> {
    catalog: C,
    target: TargetDescriptor,
    backoff: Exponential,
    conn: Arc<dyn ClientConn>,
    requests: mpsc::Receiver<()>,
    cancel: CancellationToken,
    state: watch::Sender<State>,
    min_interval: Duration,
    retries: u32,
    last_index: u64,
}

impl<C: Catalog> Session<C> {
    async fn run(mut self, ready: oneshot::Sender<Result<(), Error>>) {
        let mut ready = Some(ready);
        // The first wait completes immediately: that's the bootstrap lookup.
        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = &mut timer => {}
                Some(()) = self.requests.recv() => {
                    // Disarm the scheduled lookup; it is rescheduled below.
                    timer.as_mut().reset(deadline(FAR_FUTURE));
                }
            }

            let outcome = self.lookup().await;
            if self.cancel.is_cancelled() {
                break;
            }

            let delay = match outcome {
                Ok(addresses) => {
                    #[cfg(feature = "log")]
                    tracing::info!(
                        service = %self.target.service_name,
                        addresses = ?addresses.addrs().collect::<Vec<_>>(),
                        "Resolved service"
                    );
                    self.conn.update_state(addresses);
                    self.retries = 0;
                    self.state.send_replace(State::Steady);
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Ok(()));
                    }
                    self.backoff.backoff(0)
                }
                Err(reason) => {
                    let service = self.target.service_name.clone();
                    if let Some(ready) = ready.take() {
                        let e = Error::BootstrapResolutionFailed { service, reason };
                        #[cfg(feature = "log")]
                        tracing::error!(error = %e, "Service discovery failed");
                        let _ = ready.send(Err(e));
                        break;
                    }
                    self.retries = self.retries.saturating_add(1);
                    #[cfg(feature = "log")]
                    {
                        let e = Error::TransientResolutionFailure { service, reason };
                        tracing::warn!(
                            error = %e,
                            retries = self.retries,
                            "Service discovery failed"
                        );
                    }
                    #[cfg(not(feature = "log"))]
                    let _ = (service, reason);
                    self.backoff.backoff(self.retries)
                }
            };
            timer.as_mut().reset(deadline(delay));

            // Requests arriving meanwhile stay queued in `requests`.
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.min_interval) => {}
            }
        }

        self.state.send_replace(State::Closed);
    }

    /// Queries the catalog once, returning the sorted addresses or why there
    /// are none.
    async fn lookup(&mut self) -> Result<AddressSet, String> {
        #[cfg(feature = "log")]
        tracing::info!(descriptor = %self.target, index = self.last_index, "Looking up service");
        let opts = QueryOptions {
            wait_index: self.last_index,
            near: self.target.near.clone(),
            wait: self.target.wait,
            datacenter: self.target.datacenter.clone(),
            allow_stale: self.target.allow_stale,
            require_consistent: self.target.require_consistent,
        };
        let (entries, meta) = self
            .catalog
            .query(
                &self.target.service_name,
                &self.target.tag,
                self.target.healthy,
                &opts,
            )
            .await
            .map_err(|e| e.to_string())?;

        if entries.is_empty() {
            return Err(format!(
                "catalog returned no instances of `{}`",
                self.target.service_name
            ));
        }
        // An index going backwards means the catalog was rebuilt.
        self.last_index = if meta.last_index < self.last_index {
            0
        } else {
            meta.last_index
        };
        Ok(AddressSet::from_entries(&entries, &self.target.service_name))
    }
}
