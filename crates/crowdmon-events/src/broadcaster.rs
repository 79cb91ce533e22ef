//! Event broadcaster.
//!
//! Publishing never blocks. Each subscription owns a bounded ring; when an
//! observer falls behind, its oldest events are dropped and counted.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crowdmon_models::{Event, JobId, SystemPhase};

/// Default per-observer buffer size.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Which job events a subscription receives. System-wide events always pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionFilter {
    #[default]
    All,
    Jobs(HashSet<JobId>),
}

impl SubscriptionFilter {
    pub fn job(job_id: JobId) -> Self {
        SubscriptionFilter::Jobs(HashSet::from([job_id]))
    }

    pub fn matches(&self, event: &Event) -> bool {
        match (self, event.job_id()) {
            (_, None) => true,
            (SubscriptionFilter::All, Some(_)) => true,
            (SubscriptionFilter::Jobs(jobs), Some(id)) => jobs.contains(id),
        }
    }
}

/// Fan-out of [`Event`]s to any number of observers.
pub struct EventBroadcaster {
    sender: broadcast::Sender<Arc<Event>>,
    status: RwLock<Arc<Event>>,
    capacity: usize,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            status: RwLock::new(Arc::new(Event::system_status(
                SystemPhase::Loading,
                "Starting up",
            ))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deliver an event to every current observer. Returns how many there were.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        if matches!(*event, Event::SystemStatus { .. }) {
            match self.status.write() {
                Ok(mut status) => *status = Arc::clone(&event),
                Err(poisoned) => *poisoned.into_inner() = Arc::clone(&event),
            }
        }

        metrics::counter!("crowdmon_events_published_total", "type" => event.event_type())
            .increment(1);
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    /// Publish a system status change.
    pub fn system_status(&self, phase: SystemPhase, message: impl Into<String>) -> usize {
        self.publish(Event::system_status(phase, message))
    }

    /// Publish capability loading progress.
    pub fn loading_progress(&self, percent: u8, message: impl Into<String>) -> usize {
        self.publish(Event::loading_progress(percent, message))
    }

    /// Last published system status.
    pub fn current_status(&self) -> Event {
        let status = match self.status.read() {
            Ok(status) => Arc::clone(&status),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        (*status).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Start observing. The first event delivered is the current system status.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        let initial = match self.status.read() {
            Ok(status) => Arc::clone(&status),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        debug!(observers = self.sender.receiver_count(), "Observer subscribed");
        Subscription {
            receiver,
            filter,
            initial: Some(initial),
            dropped: 0,
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

/// One observer's view of the event stream.
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<Event>>,
    filter: SubscriptionFilter,
    initial: Option<Arc<Event>>,
    dropped: u64,
}

impl Subscription {
    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Receive events for every job.
    pub fn watch_all(&mut self) {
        self.filter = SubscriptionFilter::All;
    }

    /// Narrow to (or add) a specific job.
    pub fn watch_job(&mut self, job_id: JobId) {
        match &mut self.filter {
            SubscriptionFilter::Jobs(jobs) => {
                jobs.insert(job_id);
            }
            SubscriptionFilter::All => self.filter = SubscriptionFilter::job(job_id),
        }
    }

    /// Events lost because this observer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        metrics::counter!("crowdmon_events_dropped_total").increment(skipped);
        warn!(
            skipped,
            total_dropped = self.dropped,
            "Observer fell behind, oldest events dropped"
        );
    }

    /// Wait for the next matching event. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
