//! Push -> pull bridge for producers that emit items on their own schedule.
//!
//! A bounded queue sits between a [`Publisher`] and a [`Subscription`]. A
//! full queue makes `push` wait; a dropped subscription makes the next
//! `push` fail so the producer stops; the subscription reports end of
//! stream once every publisher is gone and the queue is drained.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use switchyard_core::StructuredError;
use tokio::sync::mpsc;
use tracing::debug;

use super::frame::Frame;
use super::transport::FrameReceiver;
use super::StreamError;

/// Default queue depth between a producer and its consumer.
pub const DEFAULT_CAPACITY: usize = 100;

type Item<T> = Result<T, StructuredError>;

/// Producer side of a bounded source.
#[derive(Debug)]
pub struct Publisher<T> {
    tx: mpsc::Sender<Item<T>>,
}

// Manual impl: cloning does not need `T: Clone`.
impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> Publisher<T> {
    /// Queues an item, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Closed` once the consumer is gone.
    pub async fn push(&self, item: T) -> Result<(), StreamError> {
        self.tx.send(Ok(item)).await.map_err(|_| StreamError::Closed)
    }

    /// Queues a terminal error. The consumer sees it after the items already
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Closed` once the consumer is gone.
    pub async fn fail(self, err: StructuredError) -> Result<(), StreamError> {
        self.tx.send(Err(err)).await.map_err(|_| StreamError::Closed)
    }

    /// Whether the consumer dropped its subscription.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a bounded source.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<Item<T>>,
}

impl<T: Send> Subscription<T> {
    /// Next item, `None` once all publishers are dropped and the queue is
    /// empty.
    pub async fn next(&mut self) -> Option<Item<T>> {
        self.rx.recv().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Item<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Creates a connected publisher/subscription pair.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (Publisher<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Publisher { tx }, Subscription { rx })
}

/// Drives `source` on its own task and returns the pull side. The first error
/// is forwarded and ends the source; so does a consumer that goes away, even
/// while the source is idle.
pub fn spawn_producer<S, T>(source: S, capacity: usize) -> Subscription<T>
where
    S: Stream<Item = Item<T>> + Send + 'static,
    T: Send + 'static,
{
    let (publisher, subscription) = bounded(capacity);
    tokio::spawn(async move {
        let mut source = std::pin::pin!(source);
        loop {
            let item = tokio::select! {
                biased;
                () = publisher.tx.closed() => {
                    debug!("consumer dropped while source idle; stopping producer");
                    return;
                }
                item = source.next() => item,
            };
            let Some(item) = item else { return };
            match item {
                Ok(item) => {
                    if publisher.push(item).await.is_err() {
                        debug!("consumer dropped; stopping producer");
                        return;
                    }
                }
                Err(err) => {
                    let _ = publisher.fail(err).await;
                    return;
                }
            }
        }
    });
    subscription
}

/// A frame source can feed a [`StreamChannel`](super::StreamChannel)
/// directly. A pushed error arrives as `StreamError::Remote`.
#[async_trait]
impl FrameReceiver for Subscription<Frame> {
    async fn recv(&mut self) -> Option<Result<Frame, StreamError>> {
        self.rx
            .recv()
            .await
            .map(|item| item.map_err(|e| StreamError::Remote(Box::new(e))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use switchyard_core::{Codecs, ErrCode, Value};

    use super::*;
    use crate::stream::{memory, StreamChannel};

    #[tokio::test]
    async fn consumer_sees_items_then_end() {
        let (publisher, mut sub) = bounded(4);
        tokio::spawn(async move {
            for i in 0..3 {
                publisher.push(i).await.unwrap();
            }
        });

        let mut got = Vec::new();
        while let Some(item) = sub.next().await {
            got.push(item.unwrap());
        }
        assert_eq!(got, vec![0, 1, 2]);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_producer() {
        let (publisher, mut sub) = bounded(2);
        let pushed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pushed);
        tokio::spawn(async move {
            for i in 0..5 {
                publisher.push(i).await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pushed.load(Ordering::SeqCst), 2);

        assert_eq!(sub.next().await.unwrap().unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pushed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandoned_consumer_stops_producer() {
        let (publisher, sub) = bounded::<u32>(1);
        drop(sub);
        assert!(publisher.is_closed());
        assert!(matches!(publisher.push(1).await, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn producer_error_is_forwarded_and_ends_source() {
        let items = futures_util::stream::iter(vec![
            Ok(1),
            Err(StructuredError::new(ErrCode::Aborted, "boom")),
            Ok(3),
        ]);
        let sub = spawn_producer(items, DEFAULT_CAPACITY);
        let got: Vec<_> = sub.collect().await;

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].as_ref().unwrap(), &1);
        assert_eq!(got[1].as_ref().unwrap_err().code, ErrCode::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_producer_stops_when_consumer_leaves() {
        // The guard lives inside the source; it drops when the producer task
        // lets go of the source.
        let (guard, released) = tokio::sync::oneshot::channel::<()>();
        let source = futures_util::stream::pending::<Item<u32>>().map(move |item| {
            let _held = &guard;
            item
        });
        let sub = spawn_producer(source, 1);

        drop(sub);
        let released = tokio::time::timeout(Duration::from_secs(1), released)
            .await
            .expect("producer must stop without waiting for another item");
        assert!(released.is_err());
    }

    proptest::proptest! {
        #[test]
        fn items_arrive_in_push_order(
            items in proptest::collection::vec(proptest::num::i64::ANY, 0..64),
            capacity in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let got = rt.block_on(async {
                let source = futures_util::stream::iter(items.clone().into_iter().map(Ok));
                spawn_producer(source, capacity)
                    .map(Result::unwrap)
                    .collect::<Vec<_>>()
                    .await
            });
            proptest::prop_assert_eq!(got, items);
        }
    }

    #[tokio::test]
    async fn frame_source_feeds_a_channel() {
        let (publisher, sub) = bounded::<Frame>(DEFAULT_CAPACITY);
        let ((tx, _unused_rx), _peer) = memory::duplex(1);
        let mut channel = StreamChannel::new(
            tx,
            sub,
            Codecs::standard(),
            tokio_util::sync::CancellationToken::new(),
        );

        publisher
            .push(Frame::Data {
                payload: Bytes::from_static(b"[1,2]"),
                end: false,
            })
            .await
            .unwrap();
        publisher
            .fail(StructuredError::new(ErrCode::DataLoss, "lost"))
            .await
            .unwrap();

        assert_eq!(
            channel.recv_data().await.unwrap(),
            Some(Value::Array(vec![Value::Int(1), Value::Int(2)]))
        );
        match channel.recv_data().await {
            Err(StreamError::Remote(err)) => assert_eq!(err.code, ErrCode::DataLoss),
            other => panic!("expected remote error, got {other:?}"),
        }
        assert_eq!(channel.recv_data().await.unwrap(), None);
    }
}
