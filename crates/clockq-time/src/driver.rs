//! Metronome driver - supplies interval-boundary pulses from exactly one source
//!
//! Either the driver owns a [`Metronome`], or it relays the pulse of an
//! external [`TemporalContext`]. Clock adjustments announced by the context
//! are relayed in both cases.
//!
//! While quiescent, pulses are dropped and only the latest clock adjustment is
//! retained; unquiescing delivers that one adjustment before anything else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clockq_core::{
    ClockAdjusted, ClockqError, ClockqResult, Notifier, PulseTicked, SubscriptionId,
    TemporalContext,
};
use parking_lot::{Mutex, ReentrantMutex};

use crate::Metronome;

struct ContextSubscriptions {
    clock_adjusted: SubscriptionId,
    pulse_ticked: Option<SubscriptionId>,
}

struct DriverShared {
    context: Option<Arc<dyn TemporalContext>>,
    subscriptions: Mutex<Option<ContextSubscriptions>>,
    clock_adjusted: Notifier<ClockAdjusted>,
    metronome_ticked: Notifier<PulseTicked>,
    period: Duration,
    thread_name: String,
    internal: bool,
    quiescent: AtomicBool,
    pending_clock_adjusted: Mutex<Option<ClockAdjusted>>,
    /// Serializes pulse delivery against quiescence transitions
    gate: ReentrantMutex<()>,
    metronome: Mutex<Option<Metronome>>,
    disposed: AtomicBool,
}

/// Pulse source for a quantizer
pub struct MetronomeDriver {
    shared: Arc<DriverShared>,
}

impl MetronomeDriver {
    /// Create a driver. Without a context, or with one that does not provide
    /// a pulse, the driver owns a metronome ticking every `period`; it starts
    /// quiescent and the metronome is created on the first unquiesce.
    pub fn new(
        context: Option<Arc<dyn TemporalContext>>,
        period: Duration,
        thread_name: impl Into<String>,
    ) -> ClockqResult<Self> {
        let internal = context.as_ref().map_or(true, |c| !c.provides_pulse());
        if internal && period.is_zero() {
            return Err(ClockqError::InvalidConfiguration(
                "metronome period must be positive when no external pulse is provided".into(),
            ));
        }

        let shared = Arc::new(DriverShared {
            context,
            subscriptions: Mutex::new(None),
            clock_adjusted: Notifier::new(),
            metronome_ticked: Notifier::new(),
            period,
            thread_name: thread_name.into(),
            internal,
            quiescent: AtomicBool::new(internal),
            pending_clock_adjusted: Mutex::new(None),
            gate: ReentrantMutex::new(()),
            metronome: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        DriverShared::attach(&shared);

        Ok(MetronomeDriver { shared })
    }

    /// True if pulses come from a metronome owned by this driver
    pub fn has_internal_metronome(&self) -> bool {
        self.shared.internal
    }

    pub fn is_quiescent(&self) -> bool {
        self.shared.quiescent.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Clock adjustments, raised only while not quiescent
    pub fn clock_adjusted(&self) -> &Notifier<ClockAdjusted> {
        &self.shared.clock_adjusted
    }

    /// Pulses, raised only while not quiescent
    pub fn metronome_ticked(&self) -> &Notifier<PulseTicked> {
        &self.shared.metronome_ticked
    }

    /// Stop delivering pulses and release the owned metronome, if any
    pub fn quiesce(&self) {
        let shared = &self.shared;
        let _gate = shared.gate.lock();
        shared.quiescent.store(true, Ordering::Release);
        if let Some(metronome) = shared.metronome.lock().take() {
            metronome.stop();
        }
        tracing::debug!(internal = shared.internal, "driver quiesced");
    }

    /// Resume delivery. A retained clock adjustment is delivered first; an
    /// owned metronome is (re)started. Returns true if this call started it.
    /// No-op once disposed.
    pub fn unquiesce(&self) -> bool {
        DriverShared::unquiesce(&self.shared)
    }

    /// Make sure pulses flow. Returns true if an owned metronome was started
    /// by this call; always false when pulses are external.
    pub fn ensure_metronome_running(&self) -> bool {
        if self.shared.internal {
            self.unquiesce()
        } else {
            false
        }
    }

    /// Relay one pulse from an external source
    pub fn relay_pulse(&self) -> ClockqResult<()> {
        if self.shared.internal {
            return Err(ClockqError::InvalidOperation(
                "driver owns its metronome; external pulses are not accepted".into(),
            ));
        }
        self.shared.deliver_pulse();
        Ok(())
    }

    /// Relay one clock adjustment from an external source
    pub fn relay_clock_adjusted(&self, event: ClockAdjusted) {
        self.shared.deliver_clock_adjusted(event);
    }

    /// Detach from the context and release the metronome. Idempotent; does
    /// not wait for a pulse that is being delivered.
    pub fn dispose(&self) {
        if let Some(metronome) = self.shared.retire() {
            metronome.stop();
        }
    }

    /// Like [`dispose`](Self::dispose), but waits for the metronome thread
    /// to exit
    pub async fn dispose_async(&self) {
        let metronome = self.shared.retire();
        if let Some(metronome) = metronome {
            metronome.stop_async().await;
        }
    }
}

impl Drop for MetronomeDriver {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl DriverShared {
    fn attach(shared: &Arc<Self>) {
        let Some(context) = shared.context.as_ref() else {
            return;
        };

        let weak = Arc::downgrade(shared);
        let clock_adjusted = context.clock_adjusted().subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver_clock_adjusted(*event);
            }
        });

        let pulse_ticked = context.provides_pulse().then(|| {
            let weak = Arc::downgrade(shared);
            context.pulse_ticked().subscribe(move |_| {
                if let Some(shared) = weak.upgrade() {
                    shared.deliver_pulse();
                }
            })
        });

        *shared.subscriptions.lock() = Some(ContextSubscriptions {
            clock_adjusted,
            pulse_ticked,
        });
    }

    fn detach(&self) {
        let Some(subscriptions) = self.subscriptions.lock().take() else {
            return;
        };
        if let Some(context) = self.context.as_ref() {
            context
                .clock_adjusted()
                .unsubscribe(subscriptions.clock_adjusted);
            if let Some(id) = subscriptions.pulse_ticked {
                context.pulse_ticked().unsubscribe(id);
            }
        }
    }

    /// Mark disposed, detach, drop any retained adjustment, and hand back the
    /// metronome for release
    fn retire(&self) -> Option<Metronome> {
        self.detach();
        self.disposed.store(true, Ordering::Release);
        self.pending_clock_adjusted.lock().take();
        self.metronome.lock().take()
    }

    fn unquiesce(shared: &Arc<Self>) -> bool {
        let _gate = shared.gate.lock();
        if shared.disposed.load(Ordering::Acquire) {
            return false;
        }

        let pending = shared.pending_clock_adjusted.lock().take();
        shared.quiescent.store(false, Ordering::Release);
        if let Some(event) = pending {
            // delivered only now that we are no longer quiescent
            shared.clock_adjusted.notify(&event);
        }

        let starting = shared.internal && Self::start_metronome(shared);
        tracing::debug!(internal = shared.internal, starting, "driver unquiesced");
        starting
    }

    fn start_metronome(shared: &Arc<Self>) -> bool {
        let mut slot = shared.metronome.lock();
        if slot.is_some() || shared.disposed.load(Ordering::Acquire) {
            return false;
        }

        let weak = Arc::downgrade(shared);
        let started = Metronome::start(&shared.thread_name, shared.period, move || {
            if let Some(shared) = weak.upgrade() {
                shared.deliver_pulse();
            }
        });

        match started {
            Ok(metronome) => {
                *slot = Some(metronome);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start metronome thread");
                false
            }
        }
    }

    fn deliver_pulse(&self) {
        let _gate = self.gate.lock();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if self.quiescent.load(Ordering::Acquire) {
            tracing::trace!("pulse dropped while quiescent");
            return;
        }
        self.metronome_ticked.notify(&PulseTicked);
    }

    fn deliver_clock_adjusted(&self, event: ClockAdjusted) {
        let _gate = self.gate.lock();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if self.quiescent.load(Ordering::Acquire) {
            tracing::trace!(offset = event.offset.units(), "clock adjustment retained while quiescent");
            *self.pending_clock_adjusted.lock() = Some(event);
            return;
        }
        self.clock_adjusted.notify(&event);
    }
}
