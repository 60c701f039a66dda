// End-to-end quantize runs through the public API

use rhythmic::engine::TupletContext;
use rhythmic::groove::RestCollapse;
use rhythmic::notation::NoteFragment;
use rhythmic::{
    quantize, CancelFlag, DurationNormalizer, Meter, NoteValue, QuantizationPolicy,
    QuantizeEngine, QuantizeError, QuantizeParams, TimedEvent, TupletSpec,
};

const POLICIES: [QuantizationPolicy; 3] = [
    QuantizationPolicy::Grid,
    QuantizationPolicy::Legato,
    QuantizationPolicy::Heuristic,
];

fn params(unit: i64) -> QuantizeParams {
    QuantizeParams {
        grid_unit_ticks: unit,
        ..QuantizeParams::default()
    }
}

#[test]
fn test_near_triplet_run_becomes_triplet() {
    let events = vec![
        TimedEvent::note(0, 155, 60),
        TimedEvent::note(158, 155, 62),
        TimedEvent::note(322, 155, 64),
    ];
    let outcome = quantize(&events, QuantizationPolicy::Heuristic, &params(240)).unwrap();

    let starts: Vec<i64> = outcome.results.iter().map(|r| r.notation_start).collect();
    assert_eq!(starts, vec![0, 160, 320]);
    for result in &outcome.results {
        assert_eq!(
            result.tuplet_context,
            Some(TupletContext {
                spec: TupletSpec::new(3, 2, 240).unwrap(),
                span_start: 0
            })
        );
    }
}

#[test]
fn test_700_ticks_spelled_exactly() {
    let normalizer = DurationNormalizer::new(Meter::default(), 3, false);
    let chain = normalizer.normalize(0, 700).unwrap();

    assert_eq!(chain.total_ticks(), 700);
    assert_eq!(
        chain.fragments()[..2],
        [
            NoteFragment { value: NoteValue::Eighth, dots: 0, ticks: 480 },
            NoteFragment { value: NoteValue::ThirtySecond, dots: 2, ticks: 210 },
        ]
    );
    let mut position = 0;
    for fragment in chain.fragments() {
        position += fragment.ticks;
        assert!(position <= 3840);
    }
}

#[test]
fn test_notation_only_leaves_performance_bit_identical() {
    let mut events = vec![
        TimedEvent::note(13, 211, 60),
        TimedEvent::note(251, 190, 64),
        TimedEvent::rest(470, 30),
        TimedEvent::note(505, 433, 67),
    ];
    let timing = |events: &[TimedEvent]| -> Vec<(i64, i64)> {
        events
            .iter()
            .map(|e| (e.start_ticks, e.duration_ticks))
            .collect()
    };
    let before = timing(&events);

    for policy in POLICIES {
        QuantizeEngine::new(params(240))
            .apply(&mut events, policy)
            .unwrap();
        let after = timing(&events);
        assert_eq!(before, after, "policy {:?}", policy);
        assert!(events.iter().all(|e| e.is_quantized()));
        assert_ne!(events[0].notation.as_ref().unwrap().start_ticks, 13);
    }
}

#[test]
fn test_durations_conserved_across_policies() {
    let events: Vec<TimedEvent> = (0..24)
        .map(|i| {
            TimedEvent::note(i * 173 + (i % 4) * 11, 90 + (i % 5) * 120, 60)
                .in_voice((i % 2) as u32)
        })
        .collect();

    for policy in POLICIES {
        let outcome = quantize(&events, policy, &params(120)).unwrap();
        for result in &outcome.results {
            assert!(result.notation_ticks > 0);
            assert_eq!(result.notation_duration.total_ticks(), result.notation_ticks);
            assert!(result.notation_duration.fragments().iter().all(|f| f.ticks > 0));
        }
    }
}

#[test]
fn test_grid_results_never_overlap_within_voice() {
    let events: Vec<TimedEvent> = (0..30)
        .map(|i| TimedEvent::note(i * 131, 300, 60))
        .collect();
    let outcome = quantize(&events, QuantizationPolicy::Grid, &params(240)).unwrap();

    let mut spans: Vec<(i64, i64)> = outcome
        .results
        .iter()
        .map(|r| (r.notation_start, r.notation_end()))
        .collect();
    spans.sort();
    for pair in spans.windows(2) {
        if pair[1].0 > pair[0].0 {
            assert!(pair[0].1 <= pair[1].0);
        }
    }
}

#[test]
fn test_legato_rest_collapse_reports_target() {
    let events = vec![
        TimedEvent::note(0, 400, 60),
        TimedEvent::rest(480, 100),
        TimedEvent::note(720, 240, 62),
    ];
    let p = QuantizeParams {
        collapse_rests: RestCollapse::IntoPreceding,
        ..params(240)
    };
    let outcome = quantize(&events, QuantizationPolicy::Legato, &p).unwrap();

    assert_eq!(outcome.results[1].absorbed_into, Some(events[0].id));
    assert_eq!(outcome.results[0].notation_ticks, 720);
}

#[test]
fn test_cancel_from_another_thread_handle() {
    let cancel = CancelFlag::new();
    let engine = QuantizeEngine::new(params(240)).with_cancel_flag(cancel.clone());

    let handle = std::thread::spawn(move || cancel.cancel());
    handle.join().unwrap();

    let mut events = vec![TimedEvent::note(10, 100, 60)];
    assert_eq!(
        engine.apply(&mut events, QuantizationPolicy::Grid).unwrap_err(),
        QuantizeError::Cancelled
    );
    assert!(!events[0].is_quantized());
}
