//! FIFO hand-off between the ingestion coordinator and the pipeline consumer.
//!
//! The queue is unbounded: ingestion never waits on processing. Under sustained
//! overload memory grows instead of polling slowing down; that is the accepted
//! tradeoff.
//!
//! Every item pushed must be acknowledged exactly once. The consumer receives a
//! [`Delivery`] guard per item and the acknowledgement happens when that guard is
//! consumed with [`Delivery::done`] or dropped, so an early return or a panic in a
//! stage still counts the item as done. [`QueueProducer::join`] and
//! [`QueueMonitor::drained`] wait for the count of outstanding items to reach zero.

use crate::types::{FeedEntry, PipelineError, Result, WorkItem};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueState {
    pub enqueued: u64,
    pub acknowledged: u64,
}

impl QueueState {
    pub fn pending(&self) -> u64 {
        self.enqueued - self.acknowledged
    }
}

pub fn work_queue() -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state, _) = watch::channel(QueueState::default());
    let state = Arc::new(state);

    (
        QueueProducer {
            tx,
            state: state.clone(),
        },
        QueueConsumer { rx, state },
    )
}

pub struct QueueProducer {
    tx: mpsc::UnboundedSender<WorkItem>,
    state: Arc<watch::Sender<QueueState>>,
}

impl QueueProducer {
    pub fn push(&self, entry: FeedEntry) -> Result<()> {
        let item = WorkItem::new(entry);
        let item_id = item.id;

        self.state.send_modify(|s| s.enqueued += 1);
        if self.tx.send(item).is_err() {
            self.state.send_modify(|s| s.enqueued -= 1);
            return Err(PipelineError::QueueClosed);
        }

        debug!(item_id = %item_id, "Enqueued work item");
        Ok(())
    }

    pub fn pending(&self) -> u64 {
        self.state.borrow().pending()
    }

    pub fn state(&self) -> QueueState {
        *self.state.borrow()
    }

    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            rx: self.state.subscribe(),
        }
    }

    /// Waits until every item pushed so far has been acknowledged.
    pub async fn join(&self) {
        self.monitor().drained().await
    }
}

/// Read-only view of the queue counters that outlives the producer.
#[derive(Clone)]
pub struct QueueMonitor {
    rx: watch::Receiver<QueueState>,
}

impl QueueMonitor {
    pub async fn drained(&mut self) {
        // Err means every handle on the counters is gone, so nothing is outstanding.
        let _ = self.rx.wait_for(|s| s.pending() == 0).await;
    }

    pub fn state(&self) -> QueueState {
        *self.rx.borrow()
    }
}

pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<WorkItem>,
    state: Arc<watch::Sender<QueueState>>,
}

impl QueueConsumer {
    /// Next item in FIFO order; `None` once the producer is gone and the queue is
    /// empty. Cancel safe.
    pub async fn next(&mut self) -> Option<Delivery> {
        let item = self.rx.recv().await?;
        Some(Delivery {
            item,
            state: self.state.clone(),
        })
    }

    /// Non-blocking variant used when abandoning the remainder at shutdown.
    pub fn try_next(&mut self) -> Option<Delivery> {
        let item = self.rx.try_recv().ok()?;
        Some(Delivery {
            item,
            state: self.state.clone(),
        })
    }
}

/// One dequeued item. Acknowledged exactly once, when consumed or dropped.
pub struct Delivery {
    item: WorkItem,
    state: Arc<watch::Sender<QueueState>>,
}

impl Delivery {
    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    pub fn entry(&self) -> &FeedEntry {
        &self.item.entry
    }

    pub fn done(self) {}
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.acknowledged += 1);
        debug!(item_id = %self.item.id, "Work item done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_entry;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let (producer, mut consumer) = work_queue();
        for n in 0..3 {
            producer.push(sample_entry(&format!("https://example.com/{}", n), "t")).unwrap();
        }

        for n in 0..3 {
            let delivery = consumer.next().await.unwrap();
            assert_eq!(delivery.entry().url, format!("https://example.com/{}", n));
            delivery.done();
        }
        assert_eq!(producer.pending(), 0);
    }

    #[tokio::test]
    async fn each_delivery_is_acknowledged_exactly_once() {
        let (producer, mut consumer) = work_queue();
        producer.push(sample_entry("https://example.com/a", "a")).unwrap();
        producer.push(sample_entry("https://example.com/b", "b")).unwrap();

        // explicit done
        consumer.next().await.unwrap().done();
        // dropped without done
        drop(consumer.next().await.unwrap());

        let state = producer.state();
        assert_eq!(state.enqueued, 2);
        assert_eq!(state.acknowledged, 2);
    }

    #[tokio::test]
    async fn join_waits_for_outstanding_items() {
        let (producer, mut consumer) = work_queue();
        producer.push(sample_entry("https://example.com/a", "a")).unwrap();

        let delivery = consumer.next().await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(50), producer.join()).await;
        assert!(pending.is_err(), "join must not return while an item is in flight");

        delivery.done();
        tokio::time::timeout(Duration::from_secs(1), producer.join())
            .await
            .expect("join returns once the item is done");
    }

    #[tokio::test]
    async fn consumer_sees_end_of_queue_after_producer_drops() {
        let (producer, mut consumer) = work_queue();
        producer.push(sample_entry("https://example.com/a", "a")).unwrap();
        let mut monitor = producer.monitor();
        drop(producer);

        assert!(consumer.next().await.is_some());
        assert!(consumer.next().await.is_none());
        monitor.drained().await;
        assert_eq!(monitor.state().pending(), 0);
    }

    #[tokio::test]
    async fn push_fails_once_consumer_is_gone() {
        let (producer, consumer) = work_queue();
        drop(consumer);
        let result = producer.push(sample_entry("https://example.com/a", "a"));
        assert!(matches!(result, Err(PipelineError::QueueClosed)));
        assert_eq!(producer.pending(), 0);
    }
}
