//! Clock Quantizer - divides a reference clock into discrete intervals
//!
//! The quantizer holds the current [`Interval`] and replaces it on:
//! - an explicit [`advance`](ClockQuantizer::advance) or exact claim with advance
//! - a clock adjustment announced by the temporal context
//! - a metronome pulse, internal or external
//!
//! Every replacement reads the clock exactly once, installs a sealed interval,
//! then raises `advanced` and, for metronomic advances, `metronome_ticked`.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use clockq_core::{
    Clock, ClockOffset, ClockqError, ClockqResult, Notifier, SubscriptionId, TemporalContext,
};
use parking_lot::RwLock;

use crate::{Interval, LazyPosition, MetronomeDriver};

/// Quantizer configuration
#[derive(Clone, Debug)]
pub struct QuantizerConfig {
    /// Longest an interval may last; also the internal metronome period
    pub max_interval: Duration,
    /// Name of the internal metronome thread
    pub metronome_thread_name: String,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        QuantizerConfig {
            max_interval: Duration::from_secs(1),
            metronome_thread_name: "clockq-metronome".to_string(),
        }
    }
}

impl QuantizerConfig {
    pub fn new(max_interval: Duration) -> Self {
        QuantizerConfig {
            max_interval,
            ..Self::default()
        }
    }

    /// Short intervals for high-churn caches
    pub fn fine() -> Self {
        Self::new(Duration::from_millis(10))
    }

    /// Long intervals for mostly idle caches
    pub fn coarse() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// Check the configuration against the clock it will quantize
    pub fn validate(&self, has_external_pulse: bool, units_per_millisecond: i64) -> ClockqResult<()> {
        if units_per_millisecond <= 0 {
            return Err(ClockqError::InvalidConfiguration(format!(
                "clock reports {units_per_millisecond} units per millisecond"
            )));
        }
        if has_external_pulse {
            return Ok(());
        }
        if self.max_interval.is_zero() {
            return Err(ClockqError::InvalidConfiguration(
                "max interval must be positive without an external pulse".into(),
            ));
        }
        if clockq_core::duration_to_units(self.max_interval, units_per_millisecond) == 0 {
            return Err(ClockqError::InvalidConfiguration(format!(
                "max interval {:?} is shorter than one clock unit",
                self.max_interval
            )));
        }
        Ok(())
    }
}

/// Raised for every interval the quantizer installs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInterval {
    /// Anchor offset of the new interval
    pub offset: ClockOffset,
    /// Wall time of the anchor offset
    pub timestamp: SystemTime,
    /// True if a metronome pulse (or the first internal advance) caused it
    pub is_metronomic: bool,
    /// Time by which the new interval started later than the previous one
    /// was allowed to last, if any
    pub gap: Option<Duration>,
}

struct QuantizerState {
    current: Option<Arc<Interval>>,
    next_metronomic_offset: Option<ClockOffset>,
}

struct QuantizerInner {
    clock: Arc<dyn Clock>,
    max_interval: Duration,
    max_interval_units: i64,
    state: RwLock<QuantizerState>,
    advanced: Notifier<NewInterval>,
    metronome_ticked: Notifier<NewInterval>,
    driver: MetronomeDriver,
}

/// Clock quantizer handle. Clones share the same intervals and subscribers;
/// the driver is disposed once the last handle goes away.
#[derive(Clone)]
pub struct ClockQuantizer {
    inner: Arc<QuantizerInner>,
}

impl ClockQuantizer {
    /// Quantizer over a plain clock, pulsed by its own metronome
    pub fn new(clock: Arc<dyn Clock>, max_interval: Duration) -> ClockqResult<Self> {
        Self::with_config(clock, None, QuantizerConfig::new(max_interval))
    }

    /// Quantizer over a temporal context, which is also the clock. Its clock
    /// adjustments always advance the quantizer; its pulse replaces the
    /// internal metronome if it provides one.
    pub fn with_context<C>(context: Arc<C>, max_interval: Duration) -> ClockqResult<Self>
    where
        C: TemporalContext + 'static,
    {
        let clock: Arc<dyn Clock> = context.clone();
        let context: Arc<dyn TemporalContext> = context;
        Self::with_config(clock, Some(context), QuantizerConfig::new(max_interval))
    }

    pub fn with_config(
        clock: Arc<dyn Clock>,
        context: Option<Arc<dyn TemporalContext>>,
        config: QuantizerConfig,
    ) -> ClockqResult<Self> {
        let has_external_pulse = context.as_ref().map_or(false, |c| c.provides_pulse());
        config.validate(has_external_pulse, clock.units_per_millisecond())?;

        let max_interval_units = clock.duration_to_units(config.max_interval);
        let driver =
            MetronomeDriver::new(context, config.max_interval, config.metronome_thread_name)?;

        let inner = Arc::new(QuantizerInner {
            clock,
            max_interval: config.max_interval,
            max_interval_units,
            state: RwLock::new(QuantizerState {
                current: None,
                next_metronomic_offset: None,
            }),
            advanced: Notifier::new(),
            metronome_ticked: Notifier::new(),
            driver,
        });

        let weak = Arc::downgrade(&inner);
        inner.driver.clock_adjusted().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.advance_internal(false, None);
            }
        });
        let weak = Arc::downgrade(&inner);
        inner.driver.metronome_ticked().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.advance_internal(true, None);
            }
        });

        Ok(ClockQuantizer { inner })
    }

    /// Replace the current interval. The advance is never metronomic unless
    /// it is the first one and the quantizer owns its metronome.
    pub fn advance(&self) -> Arc<Interval> {
        self.inner.advance_internal(false, None)
    }

    /// Make `position` exact. An exact position is left as it is. Otherwise,
    /// with `advance` the quantizer advances and the position becomes the
    /// first claim of the new interval; without it the position is taken
    /// from a one-off interval anchored at a fresh clock read.
    pub fn ensure_initialized_exact(&self, position: &mut LazyPosition, advance: bool) {
        if position.is_exact() {
            return;
        }
        if advance {
            self.inner.advance_internal(false, Some(position));
        } else {
            self.inner.claim_detached(position);
        }
    }

    /// Give `position` a value if it has none. Before the first advance the
    /// value is exact; afterwards it is an ordinary claim on the current
    /// interval.
    pub fn ensure_initialized(&self, position: &mut LazyPosition) {
        if position.has_value() {
            return;
        }
        match self.current_interval() {
            Some(interval) => interval.ensure_initialized(position),
            None => self.inner.claim_detached(position),
        }
    }

    /// None until the first advance
    pub fn current_interval(&self) -> Option<Arc<Interval>> {
        self.inner.state.read().current.clone()
    }

    /// Offset at which the next metronomic advance is expected, set by the
    /// latest metronomic advance
    pub fn next_metronomic_offset(&self) -> Option<ClockOffset> {
        self.inner.state.read().next_metronomic_offset
    }

    pub fn max_interval(&self) -> Duration {
        self.inner.max_interval
    }

    pub fn now(&self) -> SystemTime {
        self.inner.clock.now()
    }

    pub fn now_offset(&self) -> ClockOffset {
        self.inner.clock.now_offset()
    }

    /// Truncates below one clock unit
    pub fn duration_to_units(&self, duration: Duration) -> i64 {
        self.inner.clock.duration_to_units(duration)
    }

    pub fn units_to_duration(&self, units: i64) -> Duration {
        self.inner.clock.units_to_duration(units)
    }

    pub fn offset_to_timestamp(&self, offset: ClockOffset) -> SystemTime {
        self.inner.clock.to_timestamp(offset)
    }

    /// Truncates below one clock unit
    pub fn timestamp_to_offset(&self, time: SystemTime) -> ClockOffset {
        self.inner.clock.offset_of(time)
    }

    /// Wall time at which `interval` started
    pub fn interval_timestamp(&self, interval: &Interval) -> SystemTime {
        self.offset_to_timestamp(interval.offset())
    }

    /// Subscribe to every advance. Callbacks run synchronously on the
    /// advancing thread, after the new interval is installed.
    pub fn on_advanced<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ClockQuantizer, &NewInterval) + Send + Sync + 'static,
    {
        self.inner.advanced.subscribe(self.bind(callback))
    }

    /// Subscribe to metronomic advances; raised right after `advanced` with
    /// the same event
    pub fn on_metronome_ticked<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ClockQuantizer, &NewInterval) + Send + Sync + 'static,
    {
        self.inner.metronome_ticked.subscribe(self.bind(callback))
    }

    pub fn unsubscribe_advanced(&self, id: SubscriptionId) -> bool {
        self.inner.advanced.unsubscribe(id)
    }

    pub fn unsubscribe_metronome_ticked(&self, id: SubscriptionId) -> bool {
        self.inner.metronome_ticked.unsubscribe(id)
    }

    /// Stop pulses; clock adjustments are held back, latest only
    pub fn quiesce(&self) {
        self.inner.driver.quiesce();
    }

    /// Resume pulses, delivering a held-back clock adjustment first
    pub fn unquiesce(&self) {
        self.inner.driver.unquiesce();
    }

    pub fn is_quiescent(&self) -> bool {
        self.inner.driver.is_quiescent()
    }

    pub fn has_internal_metronome(&self) -> bool {
        self.inner.driver.has_internal_metronome()
    }

    /// Stop all future pulses and clock adjustments. Explicit advances keep
    /// working. Idempotent.
    pub fn shutdown(&self) {
        self.inner.driver.dispose();
    }

    /// Like [`shutdown`](Self::shutdown), but waits for the internal
    /// metronome thread to exit
    pub async fn shutdown_async(&self) {
        self.inner.driver.dispose_async().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.driver.is_disposed()
    }

    fn bind<F>(&self, callback: F) -> impl Fn(&NewInterval) + Send + Sync + 'static
    where
        F: Fn(&ClockQuantizer, &NewInterval) + Send + Sync + 'static,
    {
        let weak: Weak<QuantizerInner> = Arc::downgrade(&self.inner);
        move |event| {
            if let Some(inner) = weak.upgrade() {
                callback(&ClockQuantizer { inner }, event);
            }
        }
    }
}

impl std::fmt::Debug for ClockQuantizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("ClockQuantizer")
            .field("max_interval", &self.inner.max_interval)
            .field("current", &state.current.as_ref().map(|i| i.offset()))
            .field("next_metronomic_offset", &state.next_metronomic_offset)
            .field("internal_metronome", &self.has_internal_metronome())
            .field("quiescent", &self.is_quiescent())
            .finish()
    }
}

impl QuantizerInner {
    fn advance_internal(
        &self,
        is_metronomic: bool,
        exact: Option<&mut LazyPosition>,
    ) -> Arc<Interval> {
        let internal = self.driver.has_internal_metronome();

        let (interval, event, first) = {
            let mut state = self.state.write();
            let first = state.current.is_none();
            let is_metronomic = is_metronomic || (first && internal);

            let offset = self.clock.now_offset();

            // internal pulses jitter; only they are exempt from gap detection
            let gap = match state.current.as_ref() {
                Some(previous) if !is_metronomic || !internal => {
                    let late = offset
                        .units_since(previous.offset())
                        .saturating_sub(self.max_interval_units);
                    (late > 0).then(|| self.clock.units_to_duration(late))
                }
                _ => None,
            };

            let event = NewInterval {
                offset,
                timestamp: self.clock.to_timestamp(offset),
                is_metronomic,
                gap,
            };

            let interval = Arc::new(Interval::new(offset));
            if let Some(position) = exact {
                // first claim on the unsealed interval is the exact one
                interval.ensure_initialized(position);
            }
            interval.seal();
            state.current = Some(interval.clone());

            if is_metronomic {
                state.next_metronomic_offset =
                    Some(offset.saturating_add_units(self.max_interval_units));
            }

            (interval, event, first)
        };

        tracing::debug!(
            offset = event.offset.units(),
            metronomic = event.is_metronomic,
            gap = ?event.gap,
            "interval advanced"
        );

        self.advanced.notify(&event);
        if event.is_metronomic {
            self.metronome_ticked.notify(&event);
        }

        if first && internal {
            self.driver.ensure_metronome_running();
        }

        interval
    }

    fn claim_detached(&self, position: &mut LazyPosition) {
        let interval = Interval::new(self.clock.now_offset());
        interval.ensure_initialized(position);
    }
}
