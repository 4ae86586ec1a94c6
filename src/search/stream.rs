//! Live, single-pass result stream returned by the search client.

use crate::error::SearchError;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Cancels the paging task when the last stream handle goes away
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

enum Hits {
    Pending(oneshot::Receiver<u64>),
    Known(Option<u64>),
}

/// Cancelable sequence of search records with an out-of-band hit count.
///
/// Records arrive in server order. The first `Err` item is terminal: the
/// stream yields nothing after it. Dropping the stream stops the paging task.
pub struct ScrollStream<T> {
    hits: Hits,
    records: BoxStream<'static, Result<T, SearchError>>,
    terminated: bool,
    cancel: CancellationToken,
    _guard: CancelOnDrop,
}

impl<T: Send + 'static> ScrollStream<T> {
    pub(crate) fn new(
        hits: oneshot::Receiver<u64>,
        records: mpsc::Receiver<Result<T, SearchError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hits: Hits::Pending(hits),
            records: ReceiverStream::new(records).boxed(),
            terminated: false,
            _guard: CancelOnDrop(cancel.clone()),
            cancel,
        }
    }

    /// Total hits reported by the server.
    ///
    /// Waits for the first page if necessary. Returns `None` when the first
    /// page failed before a hit count was read; the failure itself is
    /// delivered through the stream. The value never changes once read.
    pub async fn hits(&mut self) -> Option<u64> {
        if let Hits::Pending(rx) = &mut self.hits {
            let value = rx.await.ok();
            self.hits = Hits::Known(value);
        }
        match self.hits {
            Hits::Known(value) => value,
            Hits::Pending(_) => None,
        }
    }

    /// Stop paging; buffered records are still delivered, then `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Project every record through `f`
    pub fn map_records<U, F>(self, mut f: F) -> ScrollStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let records = self.records.map(move |r| r.map(&mut f)).boxed();
        ScrollStream {
            hits: self.hits,
            records,
            terminated: self.terminated,
            cancel: self.cancel,
            _guard: self._guard,
        }
    }

    /// Project every record into zero or more records, preserving order
    pub fn flat_map_records<U, I, F>(self, mut f: F) -> ScrollStream<U>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: FnMut(T) -> I + Send + 'static,
    {
        let records = self
            .records
            .flat_map(move |r| {
                let items: Vec<Result<U, SearchError>> = match r {
                    Ok(record) => f(record).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed();
        ScrollStream {
            hits: self.hits,
            records,
            terminated: self.terminated,
            cancel: self.cancel,
            _guard: self._guard,
        }
    }
}

impl ScrollStream<serde_json::Value> {
    /// Deserialize each raw record; a record that does not fit `U` ends the
    /// stream with a protocol error.
    pub fn deserialize_records<U>(self) -> ScrollStream<U>
    where
        U: DeserializeOwned + Send + 'static,
    {
        let records = self
            .records
            .map(|r| {
                r.and_then(|value| {
                    serde_json::from_value(value).map_err(|e| SearchError::Protocol {
                        message: format!("decoding record: {}", e),
                    })
                })
            })
            .boxed();
        ScrollStream {
            hits: self.hits,
            records,
            terminated: self.terminated,
            cancel: self.cancel,
            _guard: self._guard,
        }
    }
}

impl<T> Stream for ScrollStream<T> {
    type Item = Result<T, SearchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match this.records.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.terminated = true;
                this.cancel.cancel();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
