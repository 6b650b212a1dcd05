//! Cache layer that orchestrates refreshes from the network into the store.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{MalformedRecordError, NetworkError, RefreshError};
use super::observer::Observer;
use super::traits::{PersistentStore, RemoteSource};

/// Summary of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
  /// Number of records handed to the store
  pub record_count: usize,
  pub refreshed_at: DateTime<Utc>,
}

type RefreshResult = Result<RefreshOutcome, RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
  id: u64,
  future: SharedRefresh,
}

/// Synchronization cache over a remote source and a persistent store.
///
/// The store is the only state: [`SyncCache::observe`] maps the store's live
/// query into domain records `D`, and [`SyncCache::refresh`] writes into the
/// store. Concurrent refreshes are coalesced into one fetch whose result every
/// caller receives.
pub struct SyncCache<R, S, D>
where
  R: RemoteSource,
  S: PersistentStore,
{
  source: Arc<R>,
  store: Arc<S>,
  inflight: Arc<Mutex<Option<InFlight>>>,
  next_id: Arc<AtomicU64>,
  cancel: CancellationToken,
  _domain: PhantomData<fn() -> D>,
}

impl<R, S, D> SyncCache<R, S, D>
where
  R: RemoteSource,
  S: PersistentStore,
  S::Record: TryFrom<R::Record, Error = MalformedRecordError>,
  D: for<'a> From<&'a S::Record>,
{
  /// Create a new cache with its own cancellation token.
  pub fn new(source: R, store: S) -> Self {
    Self::with_cancellation(source, store, CancellationToken::new())
  }

  /// Create a new cache that stops when `cancel` fires.
  pub fn with_cancellation(source: R, store: S, cancel: CancellationToken) -> Self {
    Self {
      source: Arc::new(source),
      store: Arc::new(store),
      inflight: Arc::new(Mutex::new(None)),
      next_id: Arc::new(AtomicU64::new(0)),
      cancel,
      _domain: PhantomData,
    }
  }

  /// Subscribe to the collection. The first read yields the current contents.
  pub fn observe(&self) -> Observer<S::Record, D> {
    Observer::new(self.store.live_query())
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Cancel any in-flight fetch and stop periodic refreshing.
  pub fn shutdown(&self) {
    self.cancel.cancel();
  }

  /// Fetch the collection and replace the stored contents with it.
  ///
  /// If a refresh is already running, this joins it instead of starting a new
  /// fetch. The work runs on its own task, so dropping the returned future
  /// does not abort it. On error the store is left as it was.
  pub async fn refresh(&self) -> RefreshResult {
    let future = {
      let mut slot = lock(&self.inflight);
      match slot.as_ref() {
        Some(inflight) => {
          debug!(source = self.source.label(), "joining in-flight refresh");
          inflight.future.clone()
        }
        None => {
          let id = self.next_id.fetch_add(1, Ordering::Relaxed);
          let future = self.start(id);
          *slot = Some(InFlight {
            id,
            future: future.clone(),
          });
          future
        }
      }
    };

    future.await
  }

  fn start(&self, id: u64) -> SharedRefresh {
    let source = Arc::clone(&self.source);
    let store = Arc::clone(&self.store);
    let inflight = Arc::clone(&self.inflight);
    let cancel = self.cancel.clone();

    let slot = Arc::downgrade(&inflight);
    let handle = tokio::spawn(async move {
      let result = run_refresh::<R, S>(&source, &store, &cancel).await;

      // Later callers start a fresh fetch from here on
      release(&inflight, id);
      result
    });

    async move {
      let result = handle.await.unwrap_or_else(|e| {
        warn!(error = %e, "refresh task did not finish");
        Err(RefreshError::Task(e.to_string()))
      });

      // The task never reaches its own release if it panicked
      if let Some(inflight) = slot.upgrade() {
        release(&inflight, id);
      }
      result
    }
    .boxed()
    .shared()
  }

  /// Refresh every `interval` until the cache is shut down. Failures are
  /// logged and the next tick tries again.
  pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()>
  where
    D: 'static,
  {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = cache.cancel.cancelled() => break,
          _ = ticker.tick() => {}
        }

        match cache.refresh().await {
          Ok(outcome) => debug!(count = outcome.record_count, "periodic refresh done"),
          Err(e) if e.is_cancelled() => break,
          Err(e) => warn!(error = %e, "periodic refresh failed"),
        }
      }
      debug!(source = cache.source.label(), "periodic refresh stopped");
    })
  }
}

async fn run_refresh<R, S>(source: &R, store: &S, cancel: &CancellationToken) -> RefreshResult
where
  R: RemoteSource,
  S: PersistentStore,
  S::Record: TryFrom<R::Record, Error = MalformedRecordError>,
{
  let started = Instant::now();
  debug!(source = source.label(), "fetching");

  let fetched = tokio::select! {
    biased;
    _ = cancel.cancelled() => return Err(NetworkError::Cancelled.into()),
    fetched = source.fetch() => fetched,
  };
  let fetched = fetched.inspect_err(|e| warn!(source = source.label(), error = %e, "fetch failed"))?;

  // Any malformed record aborts the whole refresh
  let records = fetched
    .into_iter()
    .enumerate()
    .map(|(index, remote)| {
      S::Record::try_from(remote).map_err(|mut e| {
        if e.key.is_empty() {
          e.key = format!("#{}", index);
        }
        e
      })
    })
    .collect::<Result<Vec<_>, _>>()
    .inspect_err(|e| warn!(source = source.label(), error = %e, "rejecting fetched batch"))?;

  if cancel.is_cancelled() {
    return Err(NetworkError::Cancelled.into());
  }

  let record_count = records.len();
  store.replace_all(records).await?;

  info!(
    source = source.label(),
    count = record_count,
    elapsed_ms = started.elapsed().as_millis() as u64,
    "refresh complete"
  );
  Ok(RefreshOutcome {
    record_count,
    refreshed_at: Utc::now(),
  })
}

/// Empty the in-flight slot if it still holds refresh `id`.
fn release(inflight: &Mutex<Option<InFlight>>, id: u64) {
  let mut slot = lock(inflight);
  if slot.as_ref().map(|f| f.id) == Some(id) {
    *slot = None;
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R, S, D> Clone for SyncCache<R, S, D>
where
  R: RemoteSource,
  S: PersistentStore,
{
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
      store: Arc::clone(&self.store),
      inflight: Arc::clone(&self.inflight),
      next_id: Arc::clone(&self.next_id),
      cancel: self.cancel.clone(),
      _domain: PhantomData,
    }
  }
}
