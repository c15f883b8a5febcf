//! Scenario tests across the clock, context, driver and quantizer

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use clockq_core::{Clock, ClockqError, TemporalContext};
use clockq_time::{ClockQuantizer, LazyPosition};

use crate::{canonical_start, EventKind, EventProbe, MetronomeOptions, TestTemporalContext};

fn manual_context(max_interval: Duration) -> Arc<TestTemporalContext> {
    let options = MetronomeOptions::manual().with_max_interval(max_interval);
    Arc::new(TestTemporalContext::new(Some(options)).unwrap())
}

fn quantizer_for(context: &Arc<TestTemporalContext>) -> ClockQuantizer {
    let max_interval = context
        .options()
        .map_or(Duration::from_secs(60), |o| o.max_interval);
    quantizer_for_period(context, max_interval)
}

fn quantizer_for_period(context: &Arc<TestTemporalContext>, max_interval: Duration) -> ClockQuantizer {
    ClockQuantizer::with_context(context.clone(), max_interval).unwrap()
}

// ============================================================================
// GAP DETECTION
// ============================================================================

#[test]
fn test_add_with_gap_reports_gap() {
    let context = manual_context(Duration::from_millis(5));
    let quantizer = quantizer_for(&context);

    let interval = quantizer.advance();
    assert_eq!(interval.offset(), context.offset_of(canonical_start()));

    let probe = EventProbe::attach(&quantizer);
    context.add(Duration::from_secs(60)).unwrap();

    let events = probe.of_kind(EventKind::Advanced);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, canonical_start() + Duration::from_secs(60));
    assert!(!events[0].is_metronomic);
    assert_eq!(
        events[0].gap,
        Some(Duration::from_secs(60) - Duration::from_millis(5))
    );
}

#[test]
fn test_add_without_gap_reports_none() {
    let context = manual_context(Duration::from_millis(5));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let probe = EventProbe::attach(&quantizer);
    context.add(Duration::from_millis(5)).unwrap();

    let events = probe.of_kind(EventKind::Advanced);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, canonical_start() + Duration::from_millis(5));
    assert_eq!(events[0].gap, None);
}

#[test]
fn test_adjust_clock_with_gap_reports_gap() {
    let context = manual_context(Duration::from_millis(5));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let probe = EventProbe::attach(&quantizer);
    let target = canonical_start() + Duration::from_secs(60);
    context.adjust_clock(target).unwrap();

    let events = probe.of_kind(EventKind::Advanced);
    assert_eq!(events[0].timestamp, target);
    assert!(!events[0].is_metronomic);
    assert_eq!(
        events[0].gap,
        Some(Duration::from_secs(60) - Duration::from_millis(5))
    );
}

#[test]
fn test_adjust_clock_without_gap_reports_none() {
    let context = manual_context(Duration::from_millis(5));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let probe = EventProbe::attach(&quantizer);
    context
        .adjust_clock(canonical_start() + Duration::from_millis(3))
        .unwrap();

    let events = probe.of_kind(EventKind::Advanced);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].gap, None);
}

#[test]
fn test_backward_adjustment_reports_no_gap() {
    let context = manual_context(Duration::from_millis(5));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let probe = EventProbe::attach(&quantizer);
    let target = canonical_start() - Duration::from_secs(60);
    context.adjust_clock(target).unwrap();

    let events = probe.of_kind(EventKind::Advanced);
    assert_eq!(events[0].timestamp, target);
    assert_eq!(events[0].gap, None);
}

// ============================================================================
// EXTERNAL METRONOME
// ============================================================================

#[test]
fn test_external_tick_raises_events_in_order() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    assert!(!quantizer.has_internal_metronome());

    let probe = EventProbe::attach(&quantizer);
    context.fire_metronome_ticked().unwrap();

    let events = probe.events();
    assert_eq!(
        probe.kinds(),
        [EventKind::Advanced, EventKind::MetronomeTicked]
    );
    assert_eq!(events[0].1, events[1].1);
    assert_eq!(events[0].1.timestamp, canonical_start());
    assert!(events[0].1.is_metronomic);
}

#[test]
fn test_external_tick_at_future_time() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let probe = EventProbe::attach(&quantizer);
    let later = canonical_start() + Duration::from_secs(30);
    context.fire_metronome_ticked_at(later).unwrap();

    let events = probe.events();
    assert_eq!(
        probe.kinds(),
        [EventKind::Advanced, EventKind::MetronomeTicked]
    );
    assert_eq!(events[1].1.timestamp, later);
    assert_eq!(events[1].1.gap, None);
    assert_eq!(
        quantizer.next_metronomic_offset(),
        Some(context.offset_of(later + Duration::from_secs(60)))
    );
}

#[test]
fn test_external_tick_at_future_time_with_gap() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let probe = EventProbe::attach(&quantizer);
    let gap = Duration::from_millis(1234);
    let later = canonical_start() + Duration::from_secs(60) + gap;
    context.fire_metronome_ticked_at(later).unwrap();

    let ticked = probe.of_kind(EventKind::MetronomeTicked);
    assert_eq!(ticked[0].timestamp, later);
    assert_eq!(ticked[0].gap, Some(gap));
}

// ============================================================================
// INTERNAL METRONOME
// ============================================================================

#[test]
fn test_internal_metronome_ignores_jitter() {
    const TICKS: usize = 10;
    let max_interval = Duration::from_micros(20_500);

    let context = Arc::new(TestTemporalContext::system());
    let quantizer = quantizer_for_period(&context, max_interval);
    let probe = EventProbe::attach(&quantizer);

    let start = quantizer.advance().offset();
    assert!(quantizer.has_internal_metronome());
    assert!(probe.wait_for(EventKind::MetronomeTicked, TICKS + 1, Duration::from_secs(10)));
    quantizer.shutdown();

    let ticked = probe.of_kind(EventKind::MetronomeTicked);
    assert!(ticked.iter().all(|e| e.is_metronomic && e.gap.is_none()));
    assert_eq!(ticked[0].offset, start);
    assert!(ticked.windows(2).all(|w| w[0].offset <= w[1].offset));
}

#[test]
fn test_adjustment_before_first_advance_is_delivered_after_it() {
    let context = Arc::new(TestTemporalContext::new(None).unwrap());
    let quantizer = quantizer_for_period(&context, Duration::from_secs(3600));
    let probe = EventProbe::attach(&quantizer);

    context.add(Duration::from_secs(1)).unwrap();
    context.add(Duration::from_secs(1)).unwrap();
    assert!(probe.is_empty());

    let first = quantizer.advance();
    quantizer.shutdown();

    let advanced = probe.of_kind(EventKind::Advanced);
    assert_eq!(advanced.len(), 2);
    assert!(advanced[0].is_metronomic);
    assert!(!advanced[1].is_metronomic);
    assert_eq!(advanced[1].offset, first.offset());
    assert_eq!(probe.of_kind(EventKind::MetronomeTicked).len(), 1);
}

// ============================================================================
// POSITIONS
// ============================================================================

#[test]
fn test_exact_claim_from_default_position() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut position, false);

    assert!(position.has_value());
    assert!(position.is_exact());
}

#[test]
fn test_exact_position_untouched_without_advance() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let mut position = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut position, false);
    let copy = position;

    context.add(Duration::from_secs(1)).unwrap();
    quantizer.ensure_initialized_exact(&mut position, false);

    assert_eq!(position, copy);
}

#[test]
fn test_exact_position_untouched_with_advance() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let interval = quantizer.advance();

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut position, false);
    let copy = position;

    let probe = EventProbe::attach(&quantizer);
    quantizer.ensure_initialized_exact(&mut position, true);

    assert_eq!(position, copy);
    assert!(probe.is_empty());
    assert!(Arc::ptr_eq(&interval, &quantizer.current_interval().unwrap()));
}

#[test]
fn test_non_exact_position_becomes_exact() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let interval = quantizer.advance();

    let mut position = interval.new_position();
    assert!(!position.is_exact());
    context.add(Duration::from_secs(1)).unwrap();
    quantizer.ensure_initialized_exact(&mut position, false);

    assert!(position.is_exact());
    assert_eq!(position.offset().unwrap(), context.now_offset());
}

#[test]
fn test_claim_after_first_advance_is_not_exact() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let interval = quantizer.advance();

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized(&mut position);

    assert!(!position.is_exact());
    assert_eq!(position.offset().unwrap(), interval.offset());
}

#[test]
fn test_claim_before_first_advance_is_exact() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized(&mut position);

    assert!(position.is_exact());
    assert!(quantizer.current_interval().is_none());
}

#[test]
fn test_claim_leaves_taken_positions_untouched() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let mut exact = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut exact, true);
    let mut ordinary = LazyPosition::default();
    quantizer.ensure_initialized(&mut ordinary);
    let (exact_copy, ordinary_copy) = (exact, ordinary);

    quantizer.advance();
    quantizer.ensure_initialized(&mut exact);
    quantizer.ensure_initialized(&mut ordinary);

    assert_eq!(exact, exact_copy);
    assert_eq!(ordinary, ordinary_copy);
}

#[test]
fn test_advance_yields_sealed_interval_and_raises_event() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let probe = EventProbe::attach(&quantizer);

    let interval = quantizer.advance();

    assert!(Arc::ptr_eq(&interval, &quantizer.current_interval().unwrap()));
    assert_eq!(interval.issued(), 1);
    assert!(!interval.new_position().is_exact());
    assert_eq!(probe.len(), 1);
    assert_eq!(
        quantizer.interval_timestamp(&interval),
        probe.events()[0].1.timestamp
    );
}

#[test]
fn test_exact_claim_without_advance_keeps_current_interval() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let interval = quantizer.advance();
    let probe = EventProbe::attach(&quantizer);

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut position, false);

    assert!(Arc::ptr_eq(&interval, &quantizer.current_interval().unwrap()));
    assert!(probe.is_empty());
}

#[test]
fn test_exact_claim_with_advance_replaces_current_interval() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let interval = quantizer.advance();
    let probe = EventProbe::attach(&quantizer);

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut position, true);

    let current = quantizer.current_interval().unwrap();
    assert!(!Arc::ptr_eq(&interval, &current));
    assert!(position.is_exact());
    assert_eq!(position.offset().unwrap(), current.offset());
    assert_eq!(probe.kinds(), [EventKind::Advanced]);
}

#[test]
fn test_exact_claim_survives_interference_from_subscriber() {
    let context = Arc::new(
        TestTemporalContext::linked(SystemTime::now, Some(MetronomeOptions::manual())).unwrap(),
    );
    assert!(context.has_external_clock());
    let quantizer = quantizer_for(&context);
    let interval = quantizer.advance();

    let raised = Arc::new(AtomicBool::new(false));
    let flag = raised.clone();
    let superseded = interval.clone();
    quantizer.on_advanced(move |q, _| {
        let recurse = !flag.swap(true, Ordering::SeqCst);

        let current = q.current_interval().unwrap();
        assert!(!Arc::ptr_eq(&superseded, &current));

        let mut stale = LazyPosition::default();
        superseded.ensure_initialized(&mut stale);
        assert!(stale.has_value());

        assert!(current.new_position().has_value());

        let mut exact = LazyPosition::default();
        // recurse once only
        q.ensure_initialized_exact(&mut exact, recurse);
        assert!(exact.is_exact());
    });

    let mut position = LazyPosition::default();
    quantizer.ensure_initialized_exact(&mut position, true);

    let current = quantizer.current_interval().unwrap();
    assert!(position.is_exact());
    assert!(!Arc::ptr_eq(&interval, &current));
    assert!(current.offset() >= position.offset().unwrap());
    assert!(raised.load(Ordering::SeqCst));
}

#[test]
fn test_concurrent_claims_during_advances() {
    const THREADS: usize = 4;
    const CLAIMS: usize = 2_000;

    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    quantizer.advance();

    let claimers: Vec<_> = (0..THREADS)
        .map(|_| {
            let quantizer = quantizer.clone();
            thread::spawn(move || {
                let mut taken = Vec::with_capacity(CLAIMS);
                for _ in 0..CLAIMS {
                    let mut position = LazyPosition::default();
                    quantizer.ensure_initialized(&mut position);
                    assert!(!position.is_exact());
                    taken.push(position);
                }
                taken
            })
        })
        .collect();

    // every adjustment installs a later interval
    for _ in 0..50 {
        context.add(Duration::from_millis(1)).unwrap();
    }

    let mut seen = HashSet::new();
    for claimer in claimers {
        let taken = claimer.join().unwrap();
        assert!(taken.windows(2).all(|w| w[0] < w[1]));
        for position in taken {
            let key = (position.offset().unwrap(), position.serial().unwrap());
            assert!(seen.insert(key), "duplicate position {key:?}");
        }
    }
    assert_eq!(seen.len(), THREADS * CLAIMS);
}

// ============================================================================
// QUIESCENCE
// ============================================================================

#[test]
fn test_quiesce_delivers_latest_adjustment_once() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    quantizer.advance();
    let probe = EventProbe::attach(&quantizer);

    quantizer.quiesce();
    context.fire_metronome_ticked().unwrap();
    context.add(Duration::from_secs(1)).unwrap();
    context.add(Duration::from_secs(2)).unwrap();
    context.add(Duration::from_secs(3)).unwrap();
    assert!(probe.is_empty());

    quantizer.unquiesce();
    quantizer.unquiesce();

    let events = probe.events();
    assert_eq!(probe.kinds(), [EventKind::Advanced]);
    assert_eq!(events[0].1.timestamp, canonical_start() + Duration::from_secs(6));
}

#[test]
fn test_shutdown_stops_context_delivery() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);
    let probe = EventProbe::attach(&quantizer);

    quantizer.shutdown();
    quantizer.shutdown();
    context.fire_metronome_ticked().unwrap();
    context.add(Duration::from_secs(1)).unwrap();

    assert!(probe.is_empty());
    assert!(context.pulse_ticked().is_empty());
    assert!(context.clock_adjusted().is_empty());
}

#[test]
fn test_quantizer_rejects_unusable_period() {
    let context = Arc::new(TestTemporalContext::new(None).unwrap());
    let result = ClockQuantizer::with_context(context, Duration::ZERO);
    assert!(matches!(result, Err(ClockqError::InvalidConfiguration(_))));
}

// ============================================================================
// CONVERSIONS
// ============================================================================

#[test]
fn test_duration_to_units_round_trips() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);

    for span in [
        Duration::from_millis(1),
        Duration::from_secs(60),
        Duration::from_micros(42_500),
    ] {
        let units = quantizer.duration_to_units(span);
        assert_eq!(quantizer.units_to_duration(units), span);
    }
}

#[test]
fn test_units_to_duration_round_trips() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);

    for units in [1, 10_000, 425_000, 600_000_000] {
        let span = quantizer.units_to_duration(units);
        assert_eq!(quantizer.duration_to_units(span), units);
    }
}

#[test]
fn test_timestamp_to_offset_round_trips_within_a_millisecond() {
    let context = Arc::new(TestTemporalContext::system());
    let quantizer = quantizer_for_period(&context, Duration::from_secs(60));

    let now = SystemTime::now();
    let back = quantizer.offset_to_timestamp(quantizer.timestamp_to_offset(now));
    let drift = now.duration_since(back).unwrap_or_default();
    assert!(drift < Duration::from_millis(1));
    assert!(back <= now);
}

#[test]
fn test_offset_to_timestamp_round_trips() {
    let context = manual_context(Duration::from_secs(60));
    let quantizer = quantizer_for(&context);

    let offset = quantizer.now_offset();
    let timestamp = quantizer.offset_to_timestamp(offset);
    assert_eq!(timestamp, canonical_start());
    assert_eq!(quantizer.timestamp_to_offset(timestamp), offset);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_duration_round_trips_through_quantizer(ticks in 0u64..1_000_000_000_000) {
            let context = Arc::new(TestTemporalContext::new(None).unwrap());
            let quantizer = ClockQuantizer::with_context(context, Duration::from_secs(1)).unwrap();
            let span = Duration::from_nanos(ticks * 100);
            let units = quantizer.duration_to_units(span);
            prop_assert_eq!(units, ticks as i64);
            prop_assert_eq!(quantizer.units_to_duration(units), span);
        }

        #[test]
        fn prop_exact_claim_anchors_at_clock(offset_ms in 0u64..10_000_000) {
            let start = canonical_start() + Duration::from_millis(offset_ms);
            let context = Arc::new(
                TestTemporalContext::starting_at(start, Some(MetronomeOptions::manual())).unwrap(),
            );
            let quantizer = quantizer_for(&context);
            let mut position = LazyPosition::default();
            quantizer.ensure_initialized_exact(&mut position, true);
            prop_assert!(position.is_exact());
            prop_assert_eq!(quantizer.offset_to_timestamp(position.offset().unwrap()), start);
        }
    }
}
