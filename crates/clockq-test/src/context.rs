//! Test Temporal Context - a scriptable clock with an optional metronome
//!
//! Provides:
//! - A manual clock (fixed start, moves only when told) or a linked
//!   wall-clock function
//! - Clock adjustments raised on demand
//! - A metronome that is either fired by hand or driven by a timer, which
//!   can be suspended and resumed

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clockq_core::{
    Clock, ClockAdjusted, ClockOffset, ClockqError, ClockqResult, ManualClock, Notifier,
    PulseTicked, TemporalContext,
};
use clockq_time::Metronome;
use parking_lot::Mutex;

/// 2013-06-15 12:34:56.789 UTC, the default start of manual test clocks
pub fn canonical_start() -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(1_371_299_696_789)
}

/// How the context's metronome behaves
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetronomeOptions {
    /// Timer period; manual clocks move this far before every timer tick
    pub max_interval: Duration,
    /// Fired by hand through `fire_metronome_ticked*` instead of a timer
    pub is_manual: bool,
    /// Timer metronomes only: wait for `resume_metronome` before ticking
    pub start_suspended: bool,
}

impl Default for MetronomeOptions {
    fn default() -> Self {
        MetronomeOptions {
            max_interval: Duration::from_secs(60),
            is_manual: false,
            start_suspended: true,
        }
    }
}

impl MetronomeOptions {
    /// Metronome fired by hand
    pub fn manual() -> Self {
        MetronomeOptions {
            is_manual: true,
            ..Self::default()
        }
    }

    /// Timer metronome that starts ticking right away
    pub fn automatic() -> Self {
        MetronomeOptions {
            start_suspended: false,
            ..Self::default()
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }
}

struct ContextShared {
    /// Time source when manual, and home of both notifiers either way
    clock: ManualClock,
    linked: Option<Box<dyn Fn() -> SystemTime + Send + Sync>>,
    options: Option<MetronomeOptions>,
}

impl ContextShared {
    fn now(&self) -> SystemTime {
        match &self.linked {
            Some(now) => now(),
            None => self.clock.now(),
        }
    }

    fn timer_tick(&self) {
        let fired = match (&self.linked, self.options.as_ref()) {
            // a manual clock moves with its own timer, silently
            (None, Some(options)) => self
                .clock
                .fire_pulse_at(self.clock.now() + options.max_interval),
            _ => self.clock.fire_pulse(),
        };
        if let Err(e) = fired {
            tracing::warn!(error = %e, "test context metronome tick skipped");
        }
    }
}

/// Scriptable temporal context for tests
pub struct TestTemporalContext {
    shared: Arc<ContextShared>,
    has_timer: bool,
    timer: Mutex<Option<Metronome>>,
}

impl TestTemporalContext {
    /// Manual clock starting at [`canonical_start`]
    pub fn new(options: Option<MetronomeOptions>) -> ClockqResult<Self> {
        Self::starting_at(canonical_start(), options)
    }

    /// Manual clock starting at `start`
    pub fn starting_at(start: SystemTime, options: Option<MetronomeOptions>) -> ClockqResult<Self> {
        Self::build(start, None, options)
    }

    /// Clock linked to `now`; it cannot be moved through the context
    pub fn linked<F>(now: F, options: Option<MetronomeOptions>) -> ClockqResult<Self>
    where
        F: Fn() -> SystemTime + Send + Sync + 'static,
    {
        Self::build(UNIX_EPOCH, Some(Box::new(now)), options)
    }

    /// Clock linked to the system clock, without a metronome
    pub fn system() -> Self {
        TestTemporalContext {
            shared: Arc::new(ContextShared {
                clock: ManualClock::with_pulse(UNIX_EPOCH),
                linked: Some(Box::new(SystemTime::now)),
                options: None,
            }),
            has_timer: false,
            timer: Mutex::new(None),
        }
    }

    fn build(
        start: SystemTime,
        linked: Option<Box<dyn Fn() -> SystemTime + Send + Sync>>,
        options: Option<MetronomeOptions>,
    ) -> ClockqResult<Self> {
        let has_timer = options.as_ref().map_or(false, |o| !o.is_manual);
        let start_timer = has_timer && options.as_ref().map_or(false, |o| !o.start_suspended);
        if has_timer && options.as_ref().map_or(false, |o| o.max_interval.is_zero()) {
            return Err(ClockqError::OutOfRange(
                "metronome max interval must be positive".into(),
            ));
        }

        let context = TestTemporalContext {
            shared: Arc::new(ContextShared {
                clock: ManualClock::with_pulse(start),
                linked,
                options,
            }),
            has_timer,
            timer: Mutex::new(None),
        };
        if start_timer {
            let mut timer = context.timer.lock();
            context.start_timer(&mut timer)?;
        }
        Ok(context)
    }

    /// True if the clock is linked to a function rather than manual
    pub fn has_external_clock(&self) -> bool {
        self.shared.linked.is_some()
    }

    pub fn options(&self) -> Option<&MetronomeOptions> {
        self.shared.options.as_ref()
    }

    /// True while a timer metronome is ticking
    pub fn is_metronome_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Move a manual clock forward by `span` and raise a clock adjustment
    pub fn add(&self, span: Duration) -> ClockqResult<()> {
        self.require_manual()?.add(span);
        Ok(())
    }

    /// Set a manual clock to `time` and raise a clock adjustment
    pub fn adjust_clock(&self, time: SystemTime) -> ClockqResult<()> {
        self.require_manual()?.adjust_to(time);
        Ok(())
    }

    /// Raise a metronome tick by hand
    pub fn fire_metronome_ticked(&self) -> ClockqResult<()> {
        self.require_no_timer()?;
        self.shared.clock.fire_pulse()
    }

    /// Move a manual clock forward to `time`, then raise a metronome tick.
    /// No clock adjustment is raised.
    pub fn fire_metronome_ticked_at(&self, time: SystemTime) -> ClockqResult<()> {
        self.require_no_timer()?;
        self.require_manual()?.fire_pulse_at(time)
    }

    /// Pause the timer metronome. Safe to call from inside a tick.
    pub fn suspend_metronome(&self) -> ClockqResult<()> {
        self.require_timer()?;
        match self.timer.lock().take() {
            Some(timer) => {
                timer.stop();
                Ok(())
            }
            None => Err(ClockqError::InvalidOperation(
                "metronome is already suspended".into(),
            )),
        }
    }

    pub fn resume_metronome(&self) -> ClockqResult<()> {
        self.require_timer()?;
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Err(ClockqError::InvalidOperation(
                "metronome is already running".into(),
            ));
        }
        self.start_timer(&mut timer)
    }

    fn start_timer(&self, slot: &mut Option<Metronome>) -> ClockqResult<()> {
        let period = self
            .shared
            .options
            .as_ref()
            .map(|o| o.max_interval)
            .unwrap_or_default();
        let shared = self.shared.clone();
        let timer = Metronome::start("test-context-metronome", period, move || shared.timer_tick())
            .map_err(|e| ClockqError::InvalidOperation(format!("failed to start metronome: {e}")))?;
        *slot = Some(timer);
        Ok(())
    }

    fn require_manual(&self) -> ClockqResult<&ManualClock> {
        if self.has_external_clock() {
            Err(ClockqError::InvalidOperation(
                "clock is linked to an external source".into(),
            ))
        } else {
            Ok(&self.shared.clock)
        }
    }

    fn require_timer(&self) -> ClockqResult<()> {
        if self.has_timer {
            Ok(())
        } else {
            Err(ClockqError::InvalidOperation(
                "context has no timer metronome".into(),
            ))
        }
    }

    fn require_no_timer(&self) -> ClockqResult<()> {
        if self.has_timer {
            Err(ClockqError::InvalidOperation(
                "metronome is driven by a timer".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Clock for TestTemporalContext {
    fn now(&self) -> SystemTime {
        self.shared.now()
    }

    fn now_offset(&self) -> ClockOffset {
        self.offset_of(self.now())
    }

    fn units_per_millisecond(&self) -> i64 {
        self.shared.clock.units_per_millisecond()
    }

    fn offset_of(&self, time: SystemTime) -> ClockOffset {
        self.shared.clock.offset_of(time)
    }

    fn to_timestamp(&self, offset: ClockOffset) -> SystemTime {
        self.shared.clock.to_timestamp(offset)
    }
}

impl TemporalContext for TestTemporalContext {
    fn provides_pulse(&self) -> bool {
        self.shared.options.is_some()
    }

    fn clock_adjusted(&self) -> &Notifier<ClockAdjusted> {
        self.shared.clock.clock_adjusted()
    }

    fn pulse_ticked(&self) -> &Notifier<PulseTicked> {
        self.shared.clock.pulse_ticked()
    }
}

impl std::fmt::Debug for TestTemporalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTemporalContext")
            .field("now", &self.now())
            .field("external_clock", &self.has_external_clock())
            .field("options", &self.shared.options)
            .field("metronome_running", &self.is_metronome_running())
            .finish()
    }
}
