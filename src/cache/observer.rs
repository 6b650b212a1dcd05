//! Live, domain-shaped view over a store's live query.

use futures::{Stream, StreamExt};
use std::marker::PhantomData;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::traits::Snapshot;

/// A subscription to a collection, mapped from persisted records `P` to
/// domain records `D` on every read.
///
/// Nothing is buffered here: each read maps whatever snapshot the store last
/// committed. Dropping an observer has no effect on refreshes.
pub struct Observer<P, D> {
  rx: watch::Receiver<Snapshot<P>>,
  _domain: PhantomData<fn() -> D>,
}

impl<P, D> Observer<P, D>
where
  P: Send + Sync + 'static,
  D: for<'a> From<&'a P>,
{
  pub(crate) fn new(rx: watch::Receiver<Snapshot<P>>) -> Self {
    Self {
      rx,
      _domain: PhantomData,
    }
  }

  /// The current contents, without waiting.
  pub fn current(&self) -> Vec<D> {
    map_snapshot(&self.rx.borrow())
  }

  /// Wait for the next snapshot.
  ///
  /// The first call on a fresh observer returns immediately with the current
  /// contents. Returns `None` once the store has been dropped.
  pub async fn changed(&mut self) -> Option<Vec<D>> {
    self.rx.changed().await.ok()?;
    let snapshot = self.rx.borrow_and_update();
    Some(map_snapshot(&snapshot))
  }

  /// Turn the observer into a stream: the current contents first, then one
  /// item per change.
  pub fn into_stream(self) -> impl Stream<Item = Vec<D>> + Send + 'static
  where
    D: 'static,
  {
    WatchStream::new(self.rx).map(|snapshot| map_snapshot(&snapshot))
  }
}

fn map_snapshot<P, D>(snapshot: &Snapshot<P>) -> Vec<D>
where
  D: for<'a> From<&'a P>,
{
  snapshot.iter().map(D::from).collect()
}
