//! Lock-step fan-out of captured rows to independent consumers.
//!
//! One producer task pulls rows from a [`RowSource`] and publishes each one
//! (or the end-of-job marker) to a single shared slot. A reusable barrier
//! keeps everyone in step: the producer waits at it twice per cycle, once so
//! every consumer can observe the slot and once so it cannot overwrite the
//! slot before the slowest consumer has read it. The slot is the only
//! buffering there is, so the producer never runs more than one row ahead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::capture::RowSource;
use crate::{Error, Row};

struct BarrierInner {
    participants: usize,
    count: usize,
    generation: u64,
}

/// Reusable N-party rendezvous.
///
/// No participant proceeds until all registered participants have arrived;
/// arrival of the last one atomically resets the barrier for the next
/// cycle. The party count may only grow while nothing is waiting.
pub struct Barrier {
    inner: Mutex<BarrierInner>,
    release: watch::Sender<u64>,
}

impl Barrier {
    pub fn new(participants: usize) -> Self {
        let (release, _) = watch::channel(0);
        Barrier {
            inner: Mutex::new(BarrierInner {
                participants,
                count: participants,
                generation: 0,
            }),
            release,
        }
    }

    /// Register one more participant, raising the count required to release
    /// every cycle from now on.
    pub fn add_participant(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.participants += 1;
        inner.count = inner.participants;
    }

    pub async fn wait(&self) {
        let mut release = self.release.subscribe();
        let arrived_at = {
            let mut inner = self.inner.lock().unwrap();
            inner.count -= 1;
            if inner.count == 0 {
                inner.count = inner.participants;
                inner.generation += 1;
                let generation = inner.generation;
                drop(inner);
                self.release.send_replace(generation);
                return;
            }
            inner.generation
        };
        // Generations are monotonic, so a release between subscribing and
        // waiting is observed rather than missed.
        while *release.borrow_and_update() <= arrived_at {
            if release.changed().await.is_err() {
                return;
            }
        }
    }
}

struct Shared {
    barrier: Barrier,
    slot: Mutex<Option<Row>>,
    running: AtomicBool,
}

/// Fan-out of one row stream to any number of lock-step consumers.
///
/// Consumers must attach before [`RowFanOut::produce`] starts; the producer
/// and all consumers then live for the process lifetime, with jobs as
/// temporal windows inside the shared stream.
pub struct RowFanOut {
    shared: Arc<Shared>,
}

impl RowFanOut {
    pub fn new() -> Self {
        RowFanOut {
            shared: Arc::new(Shared {
                barrier: Barrier::new(1),
                slot: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Attach a new consumer.
    ///
    /// Fails with [`Error::ProducerRunning`] once the producer has started:
    /// changing the barrier party count mid-flight would desynchronize the
    /// rendezvous.
    pub fn add_consumer(&self) -> Result<Consumer, Error> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(Error::ProducerRunning);
        }
        self.shared.barrier.add_participant();
        Ok(Consumer {
            shared: self.shared.clone(),
            first: true,
        })
    }

    /// Run the producer forever, publishing every row (and every
    /// end-of-job `None`) of `source` to the attached consumers.
    pub async fn produce<S: RowSource>(&self, mut source: S) {
        self.shared.running.store(true, Ordering::SeqCst);
        loop {
            let item = source.next_row().await;
            *self.shared.slot.lock().unwrap() = item;
            self.shared.barrier.wait().await;
            self.shared.barrier.wait().await;
        }
    }
}

impl Default for RowFanOut {
    fn default() -> Self {
        Self::new()
    }
}

/// Independent cursor into the fan-out's row stream.
///
/// Observes every published row exactly once and in production order.
/// `None` marks the end of the current job; the consumer stays attached and
/// resumes with the first row of the next job.
pub struct Consumer {
    shared: Arc<Shared>,
    first: bool,
}

impl Consumer {
    fn read(&self) -> Option<Row> {
        self.shared.slot.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSource for Consumer {
    async fn next_row(&mut self) -> Option<Row> {
        self.shared.barrier.wait().await;
        if self.first {
            self.first = false;
            return self.read();
        }
        self.shared.barrier.wait().await;
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ROW_BYTES;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource {
        items: VecDeque<Option<Row>>,
    }

    impl ScriptedSource {
        fn rows(count: usize) -> Self {
            let mut items: VecDeque<Option<Row>> = (0..count)
                .map(|i| Some(Row::new([i as u8; ROW_BYTES])))
                .collect();
            items.push_back(None);
            ScriptedSource { items }
        }
    }

    #[async_trait]
    impl RowSource for ScriptedSource {
        async fn next_row(&mut self) -> Option<Row> {
            match self.items.pop_front() {
                Some(item) => item,
                // keep the producer parked once the script runs out
                None => std::future::pending().await,
            }
        }
    }

    async fn drain(consumer: &mut Consumer) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Some(row) = consumer.next_row().await {
            seen.push(row.as_bytes()[0]);
        }
        seen
    }

    #[tokio::test]
    async fn every_consumer_sees_every_row_in_order() {
        let fanout = RowFanOut::new();
        let mut a = fanout.add_consumer().unwrap();
        let mut b = fanout.add_consumer().unwrap();
        let mut c = fanout.add_consumer().unwrap();

        let producer = tokio::spawn(async move {
            fanout.produce(ScriptedSource::rows(5)).await;
        });

        let (seen_a, seen_b, seen_c) = tokio::join!(drain(&mut a), drain(&mut b), drain(&mut c));
        assert_eq!(seen_a, vec![0, 1, 2, 3, 4]);
        assert_eq!(seen_b, seen_a);
        assert_eq!(seen_c, seen_a);
        producer.abort();
    }

    #[tokio::test]
    async fn slow_consumer_backpressures_producer() {
        let fanout = RowFanOut::new();
        let mut fast = fanout.add_consumer().unwrap();
        let mut slow = fanout.add_consumer().unwrap();

        let producer = tokio::spawn(async move {
            fanout.produce(ScriptedSource::rows(3)).await;
        });

        let slow_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(row) = slow.next_row().await {
                // dawdle before the next advance; the shared slot must
                // still hold this row's successor when we come back
                tokio::time::sleep(Duration::from_millis(10)).await;
                seen.push(row.as_bytes()[0]);
            }
            seen
        });

        let seen_fast = drain(&mut fast).await;
        let seen_slow = slow_task.await.unwrap();
        assert_eq!(seen_fast, vec![0, 1, 2]);
        assert_eq!(seen_slow, seen_fast);
        producer.abort();
    }

    #[tokio::test]
    async fn consumer_resumes_with_next_job() {
        let mut items: VecDeque<Option<Row>> = VecDeque::new();
        items.push_back(Some(Row::new([1; ROW_BYTES])));
        items.push_back(None);
        items.push_back(Some(Row::new([2; ROW_BYTES])));
        items.push_back(None);
        let source = ScriptedSource { items };

        let fanout = RowFanOut::new();
        let mut consumer = fanout.add_consumer().unwrap();
        let producer = tokio::spawn(async move {
            fanout.produce(source).await;
        });

        assert_eq!(drain(&mut consumer).await, vec![1]);
        assert_eq!(drain(&mut consumer).await, vec![2]);
        producer.abort();
    }

    #[tokio::test]
    async fn late_attachment_is_rejected() {
        let fanout = Arc::new(RowFanOut::new());
        let mut consumer = fanout.add_consumer().unwrap();

        let producing = fanout.clone();
        let producer = tokio::spawn(async move {
            producing.produce(ScriptedSource::rows(1)).await;
        });

        assert!(consumer.next_row().await.is_some());
        assert!(matches!(
            fanout.add_consumer(),
            Err(Error::ProducerRunning)
        ));
        producer.abort();
    }

    #[tokio::test]
    async fn barrier_releases_all_parties_and_resets() {
        let barrier = Arc::new(Barrier::new(3));
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                barrier.wait().await;
            }));
        }
        barrier.wait().await;
        barrier.wait().await; // reused for a second cycle
        for task in tasks {
            task.await.unwrap();
        }
    }
}
