//! Event probe - records quantizer notifications in the order they fire

use std::sync::Arc;
use std::time::{Duration, Instant};

use clockq_core::SubscriptionId;
use clockq_time::{ClockQuantizer, NewInterval};
use parking_lot::{Condvar, Mutex};

/// Which notification an event came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Advanced,
    MetronomeTicked,
}

#[derive(Default)]
struct Log {
    events: Mutex<Vec<(EventKind, NewInterval)>>,
    arrived: Condvar,
}

impl Log {
    fn push(&self, kind: EventKind, event: &NewInterval) {
        self.events.lock().push((kind, event.clone()));
        self.arrived.notify_all();
    }
}

/// Subscribes to both quantizer notifications and keeps every event
pub struct EventProbe {
    quantizer: ClockQuantizer,
    log: Arc<Log>,
    advanced: SubscriptionId,
    metronome_ticked: SubscriptionId,
}

impl EventProbe {
    pub fn attach(quantizer: &ClockQuantizer) -> Self {
        let log = Arc::new(Log::default());

        let sink = log.clone();
        let advanced = quantizer.on_advanced(move |_, e| sink.push(EventKind::Advanced, e));
        let sink = log.clone();
        let metronome_ticked =
            quantizer.on_metronome_ticked(move |_, e| sink.push(EventKind::MetronomeTicked, e));

        EventProbe {
            quantizer: quantizer.clone(),
            log,
            advanced,
            metronome_ticked,
        }
    }

    pub fn events(&self) -> Vec<(EventKind, NewInterval)> {
        self.log.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.log.events.lock().iter().map(|(k, _)| *k).collect()
    }

    /// Events of one kind, in order
    pub fn of_kind(&self, kind: EventKind) -> Vec<NewInterval> {
        self.log
            .events
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` events of `kind` arrived. Returns false on
    /// timeout.
    pub fn wait_for(&self, kind: EventKind, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.log.events.lock();
        loop {
            if events.iter().filter(|(k, _)| *k == kind).count() >= count {
                return true;
            }
            if self.log.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.iter().filter(|(k, _)| *k == kind).count() >= count;
            }
        }
    }

    pub fn clear(&self) {
        self.log.events.lock().clear();
    }
}

impl Drop for EventProbe {
    fn drop(&mut self) {
        self.quantizer.unsubscribe_advanced(self.advanced);
        self.quantizer.unsubscribe_metronome_ticked(self.metronome_ticked);
    }
}
