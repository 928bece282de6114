use crate::source::Source;
use crate::types::{Frame, VehicleRecord};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub type Snapshot = Arc<Vec<VehicleRecord>>;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPolicy {
    #[default]
    LastResolvedWins,
    NewestIssuedWins,
}

struct Shared {
    policy: PollPolicy,
    records: watch::Sender<Snapshot>,
    frame: watch::Sender<Option<Frame>>,
    poll_generation: AtomicU64,
    frame_generation: AtomicU64,
    issued: AtomicU64,
    newest_applied: AtomicU64,
}

impl Shared {
    fn complete_poll(
        &self,
        source: &str,
        generation: u64,
        sequence: u64,
        result: Result<Vec<VehicleRecord>, failure::Error>,
    ) {
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                // Stale-but-available: keep serving the previous snapshot.
                error!("Error polling {}: {}", source, e);
                return;
            }
        };
        let count = records.len();
        // The check runs under the slot's write lock so it cannot race with
        // another completion or with stop_polling.
        let applied = self.records.send_if_modified(|snapshot| {
            if self.poll_generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if self.policy == PollPolicy::NewestIssuedWins {
                if sequence < self.newest_applied.load(Ordering::SeqCst) {
                    return false;
                }
                self.newest_applied.store(sequence, Ordering::SeqCst);
            }
            *snapshot = Arc::new(records);
            true
        });
        if applied {
            debug!("Replaced record snapshot with {} records (request #{})", count, sequence);
        } else {
            debug!("Discarded stale poll result (request #{})", sequence);
        }
    }
}

pub struct StateSynchronizer {
    shared: Arc<Shared>,
    poller: Option<JoinHandle<()>>,
    frames: Option<JoinHandle<()>>,
}

impl StateSynchronizer {
    pub fn new(policy: PollPolicy) -> Self {
        let (records, _) = watch::channel(Arc::new(Vec::new()));
        let (frame, _) = watch::channel(None);
        StateSynchronizer {
            shared: Arc::new(Shared {
                policy,
                records,
                frame,
                poll_generation: AtomicU64::new(0),
                frame_generation: AtomicU64::new(0),
                issued: AtomicU64::new(0),
                newest_applied: AtomicU64::new(0),
            }),
            poller: None,
            frames: None,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.shared.policy
    }

    pub fn records(&self) -> Snapshot {
        self.shared.records.borrow().clone()
    }

    pub fn watch_records(&self) -> watch::Receiver<Snapshot> {
        self.shared.records.subscribe()
    }

    pub fn frame(&self) -> Option<Frame> {
        self.shared.frame.borrow().clone()
    }

    pub fn watch_frame(&self) -> watch::Receiver<Option<Frame>> {
        self.shared.frame.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Pulls `source` immediately and then every `every`, replacing the
    /// snapshot with each successful response. Replaces any running poll.
    pub fn start_polling<S>(&mut self, source: S, every: Duration)
    where
        S: Source<Vec<VehicleRecord>>,
    {
        self.stop_polling();
        if every < MIN_POLL_INTERVAL {
            warn!("Poll interval {:?} too short, using {:?}", every, MIN_POLL_INTERVAL);
        }
        let every = every.max(MIN_POLL_INTERVAL);
        let generation = self.shared.poll_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = self.shared.clone();
        let source = Arc::new(source);
        info!("Polling {} every {:?}", source.name(), every);
        self.poller = Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sequence = shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let request = source.pull();
                let shared = shared.clone();
                let source = source.clone();
                // Detached: a slow response must not hold up the next tick.
                tokio::spawn(async move {
                    let result = request.await;
                    shared.complete_poll(source.name(), generation, sequence, result);
                });
            }
        }));
    }

    /// Cancels the timer. Requests already in flight run to completion but
    /// their results are discarded.
    pub fn stop_polling(&mut self) {
        self.shared.poll_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(poller) = self.poller.take() {
            poller.abort();
            info!("Stopped polling");
        }
    }

    pub fn subscribe_frames<S>(&mut self, source: S)
    where
        S: Source<Frame>,
    {
        self.subscribe_frames_with(source, |_| {});
    }

    pub fn subscribe_frames_with<S, F>(&mut self, source: S, mut on_frame: F)
    where
        S: Source<Frame>,
        F: FnMut(&Frame) + Send + 'static,
    {
        self.unsubscribe_frames();
        let generation = self.shared.frame_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = self.shared.clone();
        let mut frames = source.on_push();
        info!("Subscribed to frames from {}", source.name());
        self.frames = Some(tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                if shared.frame_generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                on_frame(&frame);
                shared.frame.send_replace(Some(frame));
            }
            debug!("Frame feed ended");
        }));
    }

    /// Detaches from the push feed. The last frame stays in the slot.
    pub fn unsubscribe_frames(&mut self) {
        self.shared.frame_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(frames) = self.frames.take() {
            frames.abort();
            info!("Unsubscribed from frames");
        }
    }
}

impl Default for StateSynchronizer {
    fn default() -> Self {
        StateSynchronizer::new(PollPolicy::default())
    }
}

impl Drop for StateSynchronizer {
    fn drop(&mut self) {
        self.stop_polling();
        self.unsubscribe_frames();
    }
}
