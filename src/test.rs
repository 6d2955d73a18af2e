use crate::{
    convert_length_from, convert_length_to, convert_time_from, convert_time_to,
    convert_time_to_type, parse::*, BarBeatFractionTimeSpan, BarBeatTicksTimeSpan, Change,
    ErrorKind, Fps, MathOperation, MathTimeSpan, MetricTimeSpan, MidiTimeSpan, MusicalTimeSpan,
    OrderedTimeline, ParseError, RawChange, Tempo, TempoMap, TimeDivision, TimeSignature,
    TimeSpan, TimeSpanType, Tuplet, ValueChange, ValueLine,
};
use std::time::{Duration, Instant};

/// Tempo change, in microseconds per quarter note.
macro_rules! tempo {
    ($micros:expr) => {
        Change::Tempo(Tempo::new($micros).unwrap())
    };
}

/// Time signature change.
macro_rules! sig {
    ($num:expr, $den:expr) => {
        Change::TimeSignature(TimeSignature::new($num, $den).unwrap())
    };
}

/// Assert that a fallible operation fails with the given kind of error.
macro_rules! assert_fails {
    ($op:expr, $kind:ident) => {
        match $op {
            Ok(val) => panic!("expected a {} error, got {:?}", stringify!($kind), val),
            Err(err) => assert!(
                matches!(err.kind(), ErrorKind::$kind(_)),
                "expected a {} error, got {:?}",
                stringify!($kind),
                err
            ),
        }
    };
}

fn tpqn(ticks: u16) -> TimeDivision {
    TimeDivision::ticks_per_quarter_note(ticks).unwrap()
}

/// Small deterministic generator, so that failures are reproducible.
struct Lcg(u64);
impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, max: u64) -> u64 {
        self.next() % max
    }
}

/// A map with plenty of tempo and time signature changes at odd positions.
fn random_map(seed: u64, changes: usize) -> TempoMap {
    let mut rng = Lcg(seed);
    let mut list = Vec::with_capacity(changes);
    for _ in 0..changes {
        let time = rng.below(200_000);
        if rng.below(3) == 0 {
            let num = 1 + rng.below(7) as u16;
            let den = 1 << (1 + rng.below(4));
            list.push((time, sig!(num, den)));
        } else {
            list.push((time, tempo!(200_000 + rng.below(1_300_000) as u32)));
        }
    }
    TempoMap::build(tpqn(480), list)
}

/// Take note of how long an operation takes.
fn time<F: FnOnce() -> R, R>(activity: &str, op: F) -> R {
    let start = Instant::now();
    let result = op();
    let took = Instant::now() - start;
    println!("{}: {}ms", activity, took.as_millis());
    result
}

/// Test the red-black tree structure.
mod timeline {
    use super::*;

    #[test]
    fn random_insert_delete() {
        let mut rng = Lcg(7);
        let mut tree = OrderedTimeline::new();
        let mut handles = Vec::new();
        time("timeline_insert", || {
            for i in 0..2000u64 {
                handles.push(tree.insert(rng.below(200), i));
                if i % 100 == 0 {
                    tree.validate().unwrap();
                }
            }
        });
        assert_eq!(tree.len(), 2000);
        tree.validate().unwrap();

        time("timeline_delete", || {
            while handles.len() > 1000 {
                let idx = rng.below(handles.len() as u64) as usize;
                let node = handles.swap_remove(idx);
                assert!(tree.delete(node).is_some());
                if handles.len() % 100 == 0 {
                    tree.validate().unwrap();
                }
            }
        });
        assert_eq!(tree.len(), 1000);
        tree.validate().unwrap();
        for &node in &handles {
            assert!(tree.get(node).is_some());
        }
        let keys: Vec<u64> = tree.iter().map(|(&k, _)| k).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn duplicate_keys_keep_insertion_order() {
        let mut tree = OrderedTimeline::new();
        tree.insert(5, 'a');
        tree.insert(5, 'b');
        tree.insert(3, 'x');
        tree.insert(5, 'c');
        tree.insert(8, 'y');
        let at_five: Vec<char> = tree
            .find_all_at(&5)
            .map(|node| *tree.get(node).unwrap().1)
            .collect();
        assert_eq!(at_five, vec!['a', 'b', 'c']);
        assert_eq!(tree.get(tree.find_exact(&5).unwrap()), Some((&5, &'a')));
        assert!(tree.find_exact(&4).is_none());
        assert_eq!(tree.find_all_at(&4).count(), 0);
        tree.validate().unwrap();
    }

    #[test]
    fn stale_handles_are_ignored() {
        let mut tree = OrderedTimeline::new();
        let old = tree.insert(10, "old");
        assert_eq!(tree.delete(old), Some((10, "old")));
        assert_eq!(tree.delete(old), None);
        //The freed slot gets reused, but the old handle must not reach it
        let new = tree.insert(10, "new");
        assert!(tree.get(old).is_none());
        assert_eq!(tree.get(new), Some((&10, &"new")));
        assert_eq!(tree.len(), 1);
        tree.clear();
        assert!(tree.is_empty());
        assert!(tree.get(new).is_none());
        tree.validate().unwrap();
    }

    #[test]
    fn neighbor_queries() {
        let mut tree = OrderedTimeline::new();
        for key in [30u64, 10, 20] {
            tree.insert(key, key * 2);
        }
        let key_of = |node| *tree.get(node).unwrap().0;
        assert_eq!(tree.last_at_or_below(&20).map(key_of), Some(20));
        assert_eq!(tree.last_at_or_below(&25).map(key_of), Some(20));
        assert_eq!(tree.last_below(&20).map(key_of), Some(10));
        assert_eq!(tree.last_at_or_below(&5), None);
        assert_eq!(tree.last_below(&10), None);
        assert_eq!(
            tree.last_at_or_below_by(&45, |_, &value| value).map(key_of),
            Some(20)
        );
        assert_eq!(tree.first().map(key_of), Some(10));
        assert_eq!(tree.last().map(key_of), Some(30));

        let mut walk = Vec::new();
        let mut cur = tree.first();
        while let Some(node) = cur {
            walk.push(key_of(node));
            cur = tree.next(node);
        }
        assert_eq!(walk, vec![10, 20, 30]);
        let second = tree.prev(tree.last().unwrap()).unwrap();
        assert_eq!(key_of(second), 20);
        *tree.get_mut(second).unwrap() = 99;
        assert_eq!(tree.get(second), Some((&20, &99)));
    }
}

/// Test piecewise-constant parameter lines.
mod value_line {
    use super::*;

    fn changes(line: &ValueLine<u32>) -> Vec<(u64, u32)> {
        line.values().map(|c| (c.time, c.value)).collect()
    }

    #[test]
    fn default_and_lookup() {
        let mut line = ValueLine::new(1u32);
        line.set_value(100, 2);
        line.set_value(50, 3);
        assert_eq!(*line.default_value(), 1);
        assert_eq!(*line.at_time(0), 1);
        assert_eq!(*line.at_time(49), 1);
        assert_eq!(*line.at_time(50), 3);
        assert_eq!(*line.at_time(100), 2);
        assert_eq!(*line.at_time(u64::MAX), 2);
        assert_eq!(line.change_at(50), Some(&3));
        assert_eq!(line.change_at(51), None);
        assert_eq!(changes(&line), vec![(50, 3), (100, 2)]);
    }

    #[test]
    fn set_value_is_idempotent() {
        let mut line = ValueLine::new(0u32);
        line.set_value(100, 0);
        assert!(line.is_empty());
        line.set_value(100, 5);
        line.set_value(100, 5);
        line.set_value(100, 7);
        assert_eq!(changes(&line), vec![(100, 7)]);
        line.timeline().validate().unwrap();
    }

    #[test]
    fn redundant_changes_coalesce() {
        let mut line = ValueLine::new(0u32);
        line.set_value(100, 5);
        line.set_value(200, 0);
        assert_eq!(line.len(), 2);
        //Resetting the first change makes the second one repeat the default
        line.set_value(100, 0);
        assert!(line.is_empty());

        line.set_value(100, 5);
        line.set_value(200, 7);
        line.set_value(200, 5);
        assert_eq!(changes(&line), vec![(100, 5)]);
    }

    #[test]
    fn delete_values_is_inclusive() {
        let mut line = ValueLine::new(0u32);
        for (time, value) in [(10, 1), (20, 2), (30, 3), (40, 4)] {
            line.set_value(time, value);
        }
        assert_eq!(line.delete_values(20, 30), 2);
        assert_eq!(changes(&line), vec![(10, 1), (40, 4)]);
        assert_eq!(line.delete_values(50, 40), 0);

        let mut line = ValueLine::new(0u32);
        for (time, value) in [(10, 1), (20, 2), (30, 1)] {
            line.set_value(time, value);
        }
        assert_eq!(line.delete_values(20, 20), 1);
        assert_eq!(changes(&line), vec![(10, 1)]);
    }

    #[test]
    fn neighbors() {
        let mut line = ValueLine::new(0u32);
        for (time, value) in [(10, 1), (20, 2), (30, 3)] {
            line.set_value(time, value);
        }
        let after: Vec<u64> = line.changes_after(10).map(|c| c.time).collect();
        assert_eq!(after, vec![20, 30]);
        let before: Vec<u64> = line.changes_before(30).map(|c| c.time).collect();
        assert_eq!(before, vec![20, 10]);
        assert_eq!(
            line.next_change_after(0),
            Some(ValueChange {
                time: 10,
                value: &1
            })
        );
        assert_eq!(line.next_change_after(30), None);
    }

    #[test]
    fn random_edits_keep_tree_valid() {
        let mut rng = Lcg(99);
        let mut line = ValueLine::new(0u32);
        for _ in 0..3000 {
            let time = rng.below(500);
            if rng.below(5) == 0 {
                let end = time + rng.below(20);
                line.delete_values(time, end);
            } else {
                line.set_value(time, rng.below(4) as u32);
            }
        }
        line.timeline().validate().unwrap();
        //No change repeats the value active before it
        let mut prev = *line.default_value();
        for change in line.values() {
            assert_ne!(change.value, prev);
            prev = change.value;
        }
    }
}

/// Test tempo map construction and serialization.
mod tempo_map {
    use super::*;

    #[test]
    fn unordered_input() {
        let ordered = TempoMap::build(
            tpqn(480),
            vec![(0, tempo!(400_000)), (960, sig!(3, 4)), (1920, tempo!(600_000))],
        );
        let shuffled = TempoMap::build(
            tpqn(480),
            vec![(1920, tempo!(600_000)), (0, tempo!(400_000)), (960, sig!(3, 4))],
        );
        assert_eq!(
            ordered.tempo_changes().collect::<Vec<_>>(),
            shuffled.tempo_changes().collect::<Vec<_>>()
        );
        assert_eq!(
            ordered.time_signature_changes().collect::<Vec<_>>(),
            shuffled.time_signature_changes().collect::<Vec<_>>()
        );
        assert_eq!(shuffled.tempo_at(1919).as_micros(), 400_000);
        assert_eq!(shuffled.time_signature_at(960), TimeSignature::new(3, 4).unwrap());
    }

    #[test]
    fn last_change_at_a_tick_wins() {
        let map = TempoMap::build(tpqn(96), vec![(0, tempo!(400_000)), (0, tempo!(300_000))]);
        assert_eq!(map.tempo_at(0).as_micros(), 300_000);
        assert_eq!(map.tempo_line().len(), 1);
    }

    #[test]
    fn defaults() {
        let map = TempoMap::default();
        assert_eq!(map.tempo_at(12345), Tempo::DEFAULT);
        assert_eq!(map.tempo_at(0).bpm(), 120.0);
        assert_eq!(map.time_signature_at(12345), TimeSignature::DEFAULT);
        assert_eq!(map.time_division(), tpqn(96));
    }

    #[test]
    fn raw_round_trip() {
        let raw = vec![
            (0, RawChange::Tempo(600_000)),
            (
                0,
                RawChange::TimeSignature {
                    numerator: 6,
                    denominator_pow: 3,
                },
            ),
            (960, RawChange::Tempo(400_000)),
        ];
        let map = TempoMap::from_raw_events(tpqn(480), raw.clone()).unwrap();
        assert_eq!(map.time_signature_at(0), TimeSignature::new(6, 8).unwrap());
        assert_eq!(map.to_raw_events().unwrap(), raw);
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn malformed_records_are_skipped() {
        let raw = vec![
            (0, RawChange::Tempo(0x1000000)),
            (10, RawChange::Tempo(0)),
            (
                20,
                RawChange::TimeSignature {
                    numerator: 3,
                    denominator_pow: 16,
                },
            ),
            (30, RawChange::Tempo(250_000)),
        ];
        let map = TempoMap::from_raw_events(tpqn(480), raw).unwrap();
        assert_eq!(map.tempo_at(29), Tempo::DEFAULT);
        assert_eq!(map.tempo_at(30).as_micros(), 250_000);
        assert!(map.time_signature_line().is_empty());
    }

    #[test]
    #[cfg(feature = "strict")]
    fn malformed_records_are_rejected() {
        let raw = vec![(0, RawChange::Tempo(0x1000000))];
        let err = TempoMap::from_raw_events(tpqn(480), raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed("invalid tempo map record"));
        #[cfg(debug_assertions)]
        assert_eq!(
            err.source().map(|src| src.kind()),
            Some(ErrorKind::Malformed("tempo exceeds 24 bits"))
        );
    }

    #[test]
    fn encode_rejects_unstorable_values() {
        assert_fails!(
            RawChange::encode(Change::Tempo(Tempo::new(0x1000000).unwrap())),
            InvalidArgument
        );
        assert_fails!(
            RawChange::encode(Change::TimeSignature(TimeSignature::new(300, 4).unwrap())),
            InvalidArgument
        );
    }

    #[test]
    fn later_tracks_override() {
        let tracks: Vec<Vec<(u64, RawChange)>> = vec![
            vec![(0, RawChange::Tempo(400_000)), (480, RawChange::Tempo(450_000))],
            vec![(480, RawChange::Tempo(300_000))],
        ];
        let map = TempoMap::from_tracks(tpqn(480), &tracks).unwrap();
        assert_eq!(map.tempo_at(0).as_micros(), 400_000);
        assert_eq!(map.tempo_at(480).as_micros(), 300_000);
    }

    #[test]
    fn large_track_sets() {
        let mut rng = Lcg(3);
        let tracks: Vec<Vec<(u64, RawChange)>> = (0..4)
            .map(|_| {
                (0..1000)
                    .map(|_| {
                        let micros = 100_000 + rng.below(900_000) as u32;
                        (rng.below(1_000_000), RawChange::Tempo(micros))
                    })
                    .collect()
            })
            .collect();
        let merged = time("from_tracks", || {
            TempoMap::from_tracks(tpqn(480), &tracks).unwrap()
        });
        let serial =
            TempoMap::from_raw_events(tpqn(480), tracks.iter().flatten().copied()).unwrap();
        assert_eq!(
            merged.tempo_changes().collect::<Vec<_>>(),
            serial.tempo_changes().collect::<Vec<_>>()
        );
    }

    #[test]
    fn editing_leaves_the_original_alone() {
        let map = TempoMap::build(
            tpqn(480),
            vec![(960, tempo!(1_000_000)), (1920, tempo!(250_000))],
        );
        let mut editor = map.edit();
        editor
            .set_tempo(480, Tempo::new(750_000).unwrap())
            .set_time_signature(0, TimeSignature::new(7, 8).unwrap());
        assert_eq!(editor.clear_tempo(900, 2000), 2);
        assert_eq!(editor.tempo_map().tempo_at(2000).as_micros(), 750_000);
        let edited = editor.finish();

        assert_eq!(edited.tempo_line().len(), 1);
        assert_eq!(edited.time_signature_at(0).numerator(), 7);
        assert_eq!(map.tempo_at(2000).as_micros(), 250_000);
        assert_eq!(map.time_signature_at(0), TimeSignature::DEFAULT);

        let mut editor = edited.edit();
        assert_eq!(editor.clear_time_signature(0, 0), 1);
        assert!(editor.finish().time_signature_line().is_empty());
    }

    #[test]
    fn flip_mirrors_around_a_tick() {
        let (d, a, b) = (Tempo::DEFAULT, 300_000, 700_000);
        let map = TempoMap::build(
            tpqn(480),
            vec![(100, tempo!(a)), (300, tempo!(b)), (400, tempo!(1))],
        );
        let flipped = map.flip(400);
        assert_eq!(flipped.tempo_at(0).as_micros(), b);
        assert_eq!(flipped.tempo_at(99).as_micros(), b);
        assert_eq!(flipped.tempo_at(100).as_micros(), a);
        assert_eq!(flipped.tempo_at(299).as_micros(), a);
        assert_eq!(flipped.tempo_at(300), d);
        assert_eq!(flipped.tempo_at(100_000), d);
        for x in 0..400 {
            assert_eq!(flipped.tempo_at(x), map.tempo_at(399 - x));
        }
    }
}

/// Test wall-clock conversions.
mod metric {
    use super::*;

    fn slowing_map() -> TempoMap {
        TempoMap::build(tpqn(480), vec![(960, tempo!(1_000_000))])
    }

    #[test]
    fn integrates_over_tempo_segments() {
        let map = slowing_map();
        let span: MetricTimeSpan = convert_time_to(1920, &map).unwrap();
        assert_eq!(span.total_micros(), 3_000_000);
        let span: MetricTimeSpan = convert_time_to(960, &map).unwrap();
        assert_eq!(span.total_micros(), 1_000_000);
        assert_eq!(
            convert_time_from(&MetricTimeSpan::from_micros(3_000_000), &map).unwrap(),
            1920
        );
        assert_eq!(
            convert_time_from(&MetricTimeSpan::from_micros(1_500_000), &map).unwrap(),
            1200
        );
    }

    #[test]
    fn lengths_are_anchored() {
        let map = slowing_map();
        let early: MetricTimeSpan = convert_length_to(960, 0, &map).unwrap();
        let late: MetricTimeSpan = convert_length_to(960, 960, &map).unwrap();
        let straddling: MetricTimeSpan = convert_length_to(960, 480, &map).unwrap();
        assert_eq!(early.total_micros(), 1_000_000);
        assert_eq!(late.total_micros(), 2_000_000);
        assert_eq!(straddling.total_micros(), 1_500_000);
        let one_second = MetricTimeSpan::from_micros(1_000_000);
        assert_eq!(convert_length_from(&one_second, 0, &map).unwrap(), 960);
        assert_eq!(convert_length_from(&one_second, 960, &map).unwrap(), 480);
    }

    #[test]
    fn round_trip_within_a_tick() {
        let map = random_map(11, 200);
        let mut rng = Lcg(12);
        for _ in 0..2000 {
            let ticks = rng.below(250_000);
            let span: MetricTimeSpan = convert_time_to(ticks, &map).unwrap();
            let back = convert_time_from(&span, &map).unwrap();
            assert!(
                back.abs_diff(ticks) <= 1,
                "{} ticks became {} after a round trip",
                ticks,
                back
            );
        }
    }

    #[test]
    fn monotonic() {
        let map = random_map(21, 300);
        let mut last = 0;
        for ticks in (0..250_000).step_by(97) {
            let span: MetricTimeSpan = convert_time_to(ticks, &map).unwrap();
            assert!(span.total_micros() >= last);
            last = span.total_micros();
        }
    }

    #[test]
    fn clock_components() {
        let span = MetricTimeSpan::new(1, 2, 3, 4).unwrap();
        assert_eq!(span.total_micros(), 3_723_004_000);
        assert_eq!(
            (span.hours(), span.minutes(), span.seconds(), span.millis()),
            (1, 2, 3, 4)
        );
        assert_eq!(span.to_string(), "1:2:3:4");
        assert_fails!(MetricTimeSpan::new(u64::MAX, 0, 0, 0), InvalidArgument);
    }

    #[test]
    fn durations() {
        let span = MetricTimeSpan::try_from(Duration::from_millis(1500)).unwrap();
        assert_eq!(span.total_micros(), 1_500_000);
        assert_eq!(Duration::from(span), Duration::from_millis(1500));
        assert_fails!(MetricTimeSpan::try_from(Duration::MAX), InvalidArgument);
    }

    #[test]
    fn anchored_round_trip_within_a_tick() {
        let map = random_map(13, 200);
        let mut rng = Lcg(14);
        for _ in 0..2000 {
            let (start, len) = (rng.below(200_000), rng.below(50_000));
            let span: MetricTimeSpan = convert_length_to(len, start, &map).unwrap();
            let back = convert_length_from(&span, start, &map).unwrap();
            assert!(
                back.abs_diff(len) <= 1,
                "{} ticks from {} became {} after a round trip",
                len,
                start,
                back
            );
        }
    }
}

/// Test SMPTE time divisions.
mod smpte {
    use super::*;

    #[test]
    fn raw_division_word() {
        let division = TimeDivision::from_raw(0xE728).unwrap();
        assert_eq!(division, TimeDivision::smpte(Fps::Fps25, 40).unwrap());
        assert_eq!(division.to_raw(), 0xE728);
        assert_eq!(TimeDivision::from_raw(480).unwrap(), tpqn(480));
        assert_eq!(tpqn(480).to_raw(), 480);
        assert_fails!(TimeDivision::from_raw(0), InvalidArgument);
        assert_fails!(TimeDivision::from_raw(0xE900), InvalidArgument);
    }

    #[test]
    fn ignores_tempo() {
        let division = TimeDivision::smpte(Fps::Fps25, 40).unwrap();
        let map = TempoMap::build(division, vec![(500, tempo!(1_000_000))]);
        let span: MetricTimeSpan = convert_time_to(1500, &map).unwrap();
        assert_eq!(span.total_micros(), 1_500_000);
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1500);
    }

    #[test]
    fn drop_frame_rate() {
        let map = TempoMap::new(TimeDivision::smpte(Fps::Fps29, 100).unwrap());
        let span: MetricTimeSpan = convert_time_to(2997, &map).unwrap();
        assert_eq!(span.total_micros(), 999_999);
    }

    #[test]
    fn musical_representations_need_beats() {
        let map = TempoMap::new(TimeDivision::smpte(Fps::Fps30, 80).unwrap());
        assert_fails!(convert_time_to::<BarBeatTicksTimeSpan>(100, &map), UnsupportedConversion);
        assert_fails!(
            convert_time_from(&MusicalTimeSpan::QUARTER, &map),
            UnsupportedConversion
        );
    }
}

/// Test bar/beat conversions.
mod bar_beat {
    use super::*;

    fn meter_change() -> TempoMap {
        TempoMap::build(tpqn(480), vec![(0, sig!(3, 4)), (2880, sig!(4, 4))])
    }

    #[test]
    fn residual_uses_the_new_signature() {
        let map = meter_change();
        let bbt: BarBeatTicksTimeSpan = convert_time_to(4330, &map).unwrap();
        assert_eq!(bbt, BarBeatTicksTimeSpan::new(2, 3, 10));
        assert_eq!(convert_time_from(&bbt, &map).unwrap(), 4330);

        let bbf: BarBeatFractionTimeSpan = convert_time_to(4330, &map).unwrap();
        assert_eq!(bbf.bars(), 2);
        assert!((bbf.beats() - (3.0 + 10.0 / 480.0)).abs() < 1e-9);
        let half = BarBeatFractionTimeSpan::new(2, 3.5).unwrap();
        assert_eq!(convert_time_from(&half, &map).unwrap(), 2880 + 1680);
    }

    #[test]
    fn mid_bar_change_waits_for_the_next_bar() {
        let map = TempoMap::build(tpqn(480), vec![(0, sig!(3, 4)), (2000, sig!(4, 4))]);
        let bbt: BarBeatTicksTimeSpan = convert_time_to(2880, &map).unwrap();
        assert_eq!(bbt, BarBeatTicksTimeSpan::new(2, 0, 0));
        let bbt: BarBeatTicksTimeSpan = convert_time_to(2879, &map).unwrap();
        assert_eq!(bbt, BarBeatTicksTimeSpan::new(1, 2, 479));
        let third_bar = BarBeatTicksTimeSpan::new(3, 0, 0);
        assert_eq!(convert_time_from(&third_bar, &map).unwrap(), 2880 + 1920);
    }

    #[test]
    fn lengths_are_anchored() {
        let map = meter_change();
        let from_start: BarBeatTicksTimeSpan = convert_length_to(1920, 0, &map).unwrap();
        assert_eq!(from_start, BarBeatTicksTimeSpan::new(1, 1, 0));
        let later: BarBeatTicksTimeSpan = convert_length_to(1920, 2880, &map).unwrap();
        assert_eq!(later, BarBeatTicksTimeSpan::new(1, 0, 0));
        let one_bar = BarBeatTicksTimeSpan::new(1, 0, 0);
        assert_eq!(convert_length_from(&one_bar, 0, &map).unwrap(), 1440);
        assert_eq!(convert_length_from(&one_bar, 2880, &map).unwrap(), 1920);
    }

    #[test]
    fn round_trip() {
        let map = random_map(5, 300);
        let mut rng = Lcg(6);
        for _ in 0..2000 {
            let ticks = rng.below(250_000);
            let bbt: BarBeatTicksTimeSpan = convert_time_to(ticks, &map).unwrap();
            assert_eq!(convert_time_from(&bbt, &map).unwrap(), ticks);
        }
    }

    #[test]
    fn fraction_round_trip() {
        let map = random_map(7, 300);
        let mut rng = Lcg(8);
        for _ in 0..2000 {
            let ticks = rng.below(250_000);
            let bbf: BarBeatFractionTimeSpan = convert_time_to(ticks, &map).unwrap();
            assert_eq!(convert_time_from(&bbf, &map).unwrap(), ticks);
        }
    }

    #[test]
    fn anchored_round_trip() {
        let map = random_map(9, 300);
        let mut rng = Lcg(10);
        for _ in 0..2000 {
            let (start, len) = (rng.below(200_000), rng.below(50_000));
            let bbt: BarBeatTicksTimeSpan = convert_length_to(len, start, &map).unwrap();
            assert_eq!(convert_length_from(&bbt, start, &map).unwrap(), len);
            let bbf: BarBeatFractionTimeSpan = convert_length_to(len, start, &map).unwrap();
            assert_eq!(convert_length_from(&bbf, start, &map).unwrap(), len);
        }
    }

    #[test]
    fn runtime_selected_targets() {
        let map = meter_change();
        assert_eq!(
            convert_time_to_type(4330, TimeSpanType::BarBeatTicks, &map).unwrap(),
            TimeSpan::BarBeatTicks(BarBeatTicksTimeSpan::new(2, 3, 10))
        );
        assert_eq!(
            convert_time_to_type(4330, TimeSpanType::Midi, &map).unwrap(),
            TimeSpan::Midi(MidiTimeSpan(4330))
        );
        assert_fails!(convert_time_to_type(10, TimeSpanType::Musical, &map), UnsupportedConversion);
        assert_fails!(convert_time_to_type(10, TimeSpanType::Math, &map), UnsupportedConversion);
    }
}

/// Test note-fraction lengths.
mod musical {
    use super::*;

    fn ticks(span: MusicalTimeSpan) -> u64 {
        convert_length_from(&span, 12345, &TempoMap::new(tpqn(480))).unwrap()
    }

    #[test]
    fn fractions_dots_and_tuplets() {
        assert_eq!(ticks(MusicalTimeSpan::QUARTER), 480);
        assert_eq!(ticks(MusicalTimeSpan::WHOLE), 1920);
        assert_eq!(ticks(MusicalTimeSpan::QUARTER.dotted(1).unwrap()), 720);
        assert_eq!(ticks(MusicalTimeSpan::QUARTER.dotted(2).unwrap()), 840);
        assert_eq!(ticks(MusicalTimeSpan::EIGHTH.triplet()), 160);
        assert_eq!(ticks(MusicalTimeSpan::QUARTER.duplet()), 720);
        assert_eq!(ticks(MusicalTimeSpan::new(3, 8).unwrap()), 720);
        assert_eq!(
            ticks(MusicalTimeSpan::HALF.tupled(Tuplet::new(5, 4).unwrap())),
            768
        );
    }

    #[test]
    fn rounds_half_away_from_zero() {
        let map = TempoMap::new(tpqn(96));
        let seventh = MusicalTimeSpan::new(1, 7).unwrap();
        assert_eq!(convert_time_from(&seventh, &map).unwrap(), 55);
        let tiny = MusicalTimeSpan::new(1, 768).unwrap();
        assert_eq!(convert_time_from(&tiny, &map).unwrap(), 1);
    }

    #[test]
    fn invalid_values() {
        assert_fails!(MusicalTimeSpan::new(1, 0), InvalidArgument);
        assert_fails!(MusicalTimeSpan::QUARTER.dotted(33), InvalidArgument);
        assert_fails!(Tuplet::new(0, 2), InvalidArgument);
    }

    #[test]
    fn oversized_lengths_fail() {
        let map = TempoMap::new(tpqn(8192));
        let huge = MusicalTimeSpan::new(1 << 63, 1)
            .unwrap()
            .dotted(32)
            .unwrap()
            .tupled(Tuplet::new(1, 66_536).unwrap());
        assert_fails!(convert_time_from(&huge, &map), InvalidArgument);
    }
}

/// Test spans combining several representations.
mod math {
    use super::*;

    fn slowing_map() -> TempoMap {
        TempoMap::build(tpqn(480), vec![(960, tempo!(1_000_000))])
    }

    fn math(
        op: MathOperation,
        first: impl Into<TimeSpan>,
        second: impl Into<TimeSpan>,
    ) -> MathTimeSpan {
        MathTimeSpan::new(op, first.into(), second.into())
    }

    #[test]
    fn addition_walks_forward() {
        let map = slowing_map();
        let span = math(
            MathOperation::Add,
            MidiTimeSpan(960),
            MetricTimeSpan::from_micros(1_000_000),
        );
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1440);
        let span = math(
            MathOperation::Add,
            MusicalTimeSpan::QUARTER,
            MetricTimeSpan::from_micros(1_000_000),
        );
        assert_eq!(convert_length_from(&span, 480, &map).unwrap(), 480 + 480);
    }

    #[test]
    fn subtraction_walks_backward() {
        let map = slowing_map();
        let span = math(
            MathOperation::Subtract,
            MidiTimeSpan(1920),
            MetricTimeSpan::from_micros(1_000_000),
        );
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1440);

        let map = TempoMap::build(
            tpqn(480),
            vec![(0, tempo!(1_000_000)), (1440, tempo!(500_000))],
        );
        let span = math(
            MathOperation::Subtract,
            MidiTimeSpan(1920),
            MetricTimeSpan::from_micros(1_000_000),
        );
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1200);
    }

    #[test]
    fn change_at_the_pivot_is_excluded() {
        let map = slowing_map();
        let span = math(
            MathOperation::Subtract,
            MidiTimeSpan(960),
            MetricTimeSpan::from_micros(500_000),
        );
        assert_eq!(convert_time_from(&span, &map).unwrap(), 480);
    }

    #[test]
    fn subtracting_bars_uses_the_preceding_meter() {
        let map = TempoMap::build(tpqn(480), vec![(0, sig!(3, 4)), (2880, sig!(4, 4))]);
        let span = math(
            MathOperation::Subtract,
            MidiTimeSpan(2880),
            BarBeatTicksTimeSpan::new(1, 0, 0),
        );
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1440);
    }

    #[test]
    fn nested_subtraction_turns_around() {
        let map = slowing_map();
        //Two seconds back from 1920 reach 960, and half a second forward from there is 240
        let removed = math(
            MathOperation::Subtract,
            MetricTimeSpan::from_micros(2_000_000),
            MetricTimeSpan::from_micros(500_000),
        );
        let span = math(MathOperation::Subtract, MidiTimeSpan(1920), TimeSpan::from(removed));
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1200);

        let removed = math(
            MathOperation::Add,
            MusicalTimeSpan::QUARTER,
            MetricTimeSpan::from_micros(500_000),
        );
        let span = math(MathOperation::Subtract, MidiTimeSpan(1920), TimeSpan::from(removed));
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1200);
    }

    #[test]
    fn backward_walk_matches_the_flipped_map() {
        let map = random_map(31, 400);
        let mut rng = Lcg(32);
        for _ in 0..300 {
            let pivot = rng.below(250_000);
            let removed: [TimeSpan; 3] = [
                MetricTimeSpan::from_micros(rng.below(3_000_000)).into(),
                BarBeatTicksTimeSpan::new(rng.below(4), rng.below(3), rng.below(480)).into(),
                BarBeatFractionTimeSpan::new(rng.below(4), 0.5).unwrap().into(),
            ];
            for second in removed {
                let expected = convert_time_from(&second, &map.flip(pivot)).unwrap();
                let span = math(MathOperation::Subtract, MidiTimeSpan(pivot), second);
                match convert_time_from(&span, &map) {
                    Ok(ticks) => assert_eq!(ticks, pivot - expected),
                    Err(_) => assert!(expected > pivot),
                }
            }
        }
    }

    #[test]
    fn deep_pivots_touch_few_segments() {
        let map = random_map(3, 20_000);
        let span = math(
            MathOperation::Subtract,
            MidiTimeSpan(199_000),
            MetricTimeSpan::from_micros(1_000),
        );
        let first = convert_time_from(&span, &map).unwrap();
        time("math_deep_subtraction", || {
            for _ in 0..2000 {
                assert_eq!(convert_time_from(&span, &map).unwrap(), first);
            }
        });
        assert!(first < 199_000);
    }

    #[test]
    fn negative_results_fail() {
        let map = slowing_map();
        let span = math(
            MathOperation::Subtract,
            MidiTimeSpan(100),
            MetricTimeSpan::from_micros(1_000_000),
        );
        assert_fails!(convert_time_from(&span, &map), InvalidArgument);
    }

    #[test]
    fn nested() {
        let map = slowing_map();
        let inner = math(MathOperation::Add, MidiTimeSpan(480), MusicalTimeSpan::QUARTER);
        let span = math(
            MathOperation::Add,
            TimeSpan::from(inner),
            MetricTimeSpan::from_micros(2_000_000),
        );
        assert_eq!(convert_time_from(&span, &map).unwrap(), 1920);
    }
}

/// Test span arithmetic without a tempo map.
mod arithmetic {
    use super::*;

    #[test]
    fn same_kind_combines_directly() {
        let sum = TimeSpan::from(MidiTimeSpan(100))
            .add(&MidiTimeSpan(50).into())
            .unwrap();
        assert_eq!(sum, TimeSpan::Midi(MidiTimeSpan(150)));

        let sum = TimeSpan::from(MusicalTimeSpan::QUARTER.dotted(1).unwrap())
            .add(&MusicalTimeSpan::EIGHTH.into())
            .unwrap();
        assert_eq!(sum, TimeSpan::Musical(MusicalTimeSpan::HALF));

        let diff = TimeSpan::from(MusicalTimeSpan::QUARTER)
            .subtract(&MusicalTimeSpan::EIGHTH.into())
            .unwrap();
        assert_eq!(diff, TimeSpan::Musical(MusicalTimeSpan::EIGHTH));

        let sum = TimeSpan::from(BarBeatTicksTimeSpan::new(1, 2, 3))
            .add(&BarBeatTicksTimeSpan::new(0, 3, 400).into())
            .unwrap();
        assert_eq!(sum, TimeSpan::BarBeatTicks(BarBeatTicksTimeSpan::new(1, 5, 403)));
    }

    #[test]
    fn mixed_kinds_make_math() {
        let sum = TimeSpan::from(MidiTimeSpan(100))
            .add(&MetricTimeSpan::from_micros(5).into())
            .unwrap();
        assert_eq!(sum.kind(), TimeSpanType::Math);
        assert_eq!(sum.to_string(), "(100 + 0:0:0:0)");
    }

    #[test]
    fn negative_differences_fail() {
        assert_fails!(
            TimeSpan::from(MidiTimeSpan(1)).subtract(&MidiTimeSpan(2).into()),
            InvalidArgument
        );
        assert_fails!(
            TimeSpan::from(BarBeatTicksTimeSpan::new(2, 0, 0))
                .subtract(&BarBeatTicksTimeSpan::new(1, 1, 0).into()),
            InvalidArgument
        );
        assert_fails!(
            TimeSpan::from(MusicalTimeSpan::EIGHTH).subtract(&MusicalTimeSpan::QUARTER.into()),
            InvalidArgument
        );
    }

    #[test]
    fn multiply() {
        assert_eq!(
            TimeSpan::from(MidiTimeSpan(100)).multiply(1.5).unwrap(),
            TimeSpan::Midi(MidiTimeSpan(150))
        );
        assert_eq!(
            TimeSpan::from(MusicalTimeSpan::QUARTER).multiply(0.5).unwrap(),
            TimeSpan::Musical(MusicalTimeSpan::EIGHTH)
        );
        assert_fails!(TimeSpan::from(MidiTimeSpan(1)).multiply(-1.0), InvalidArgument);
        assert_fails!(TimeSpan::from(MidiTimeSpan(1)).multiply(f64::NAN), InvalidArgument);
    }

    #[test]
    fn divide() {
        let ratio = TimeSpan::from(MidiTimeSpan(300))
            .divide(&MidiTimeSpan(100).into())
            .unwrap();
        assert_eq!(ratio, 3.0);
        let ratio = TimeSpan::from(MusicalTimeSpan::HALF)
            .divide(&MusicalTimeSpan::EIGHTH.into())
            .unwrap();
        assert_eq!(ratio, 4.0);
        assert_fails!(
            TimeSpan::from(MidiTimeSpan(300)).divide(&MidiTimeSpan(0).into()),
            InvalidArgument
        );
        assert_fails!(
            TimeSpan::from(BarBeatTicksTimeSpan::new(2, 0, 0))
                .divide(&BarBeatTicksTimeSpan::new(1, 0, 0).into()),
            UnsupportedConversion
        );
        assert_fails!(
            TimeSpan::from(MidiTimeSpan(300)).divide(&MetricTimeSpan::from_micros(1).into()),
            UnsupportedConversion
        );
    }
}

/// Test the textual time span formats.
mod parse {
    use super::*;

    fn parsed(text: &str) -> TimeSpan {
        match parse_time_span(text) {
            Ok(span) => span,
            Err(err) => panic!("failed to parse {:?}: {}", text, err),
        }
    }

    #[test]
    fn each_representation() {
        assert_eq!(parsed("960"), TimeSpan::Midi(MidiTimeSpan(960)));
        assert_eq!(
            parsed("2.1.240"),
            TimeSpan::BarBeatTicks(BarBeatTicksTimeSpan::new(2, 1, 240))
        );
        assert_eq!(
            parsed("2_1.5"),
            TimeSpan::BarBeatFraction(BarBeatFractionTimeSpan::new(2, 1.5).unwrap())
        );
        assert_eq!(
            parsed("1h2m3s4ms"),
            TimeSpan::Metric(MetricTimeSpan::new(1, 2, 3, 4).unwrap())
        );
        assert_eq!(
            parsed("1:30"),
            TimeSpan::Metric(MetricTimeSpan::new(0, 1, 30, 0).unwrap())
        );
        assert_eq!(
            parsed("0:1:30:250"),
            TimeSpan::Metric(MetricTimeSpan::new(0, 1, 30, 250).unwrap())
        );
        assert_eq!(
            parsed("250ms"),
            TimeSpan::Metric(MetricTimeSpan::from_micros(250_000))
        );
        assert_eq!(
            parsed("3/8"),
            TimeSpan::Musical(MusicalTimeSpan::new(3, 8).unwrap())
        );
        assert_eq!(parsed("h"), TimeSpan::Musical(MusicalTimeSpan::HALF));
    }

    #[test]
    fn musical_shorthands() {
        assert_eq!(
            parsed("q."),
            TimeSpan::Musical(MusicalTimeSpan::QUARTER.dotted(1).unwrap())
        );
        assert_eq!(parsed("et"), parsed("[3:2]e"));
        assert_eq!(parsed("et"), parsed("e[3:2]"));
        assert_eq!(
            parsed("sd"),
            TimeSpan::Musical(MusicalTimeSpan::SIXTEENTH.duplet())
        );
        assert_eq!(
            "3/8..".parse::<MusicalTimeSpan>(),
            Ok(MusicalTimeSpan::new(3, 8).unwrap().dotted(2).unwrap())
        );
    }

    #[test]
    fn math_expressions() {
        let span = parsed("1:30 + q.");
        assert_eq!(span.kind(), TimeSpanType::Math);
        let span = parsed("(960 - 1/4) + 2.0.0");
        match span {
            TimeSpan::Math(math) => {
                assert_eq!(math.operation, MathOperation::Add);
                assert_eq!(math.first.kind(), TimeSpanType::Math);
                assert_eq!(
                    math.second,
                    TimeSpan::BarBeatTicks(BarBeatTicksTimeSpan::new(2, 0, 0))
                );
            }
            other => panic!("expected a math span, got {:?}", other),
        }
    }

    #[test]
    fn nested_parentheses() {
        assert_eq!(parsed("((1 + 2))"), parsed("1 + 2"));
        assert_eq!(parsed("( ((q)) - (960) )"), parsed("q - 960"));
        assert_eq!(parsed("((1 + 2)) - 3").kind(), TimeSpanType::Math);
        assert_eq!(parse_math("(1 + 2))"), Parsing::NotMatched);
    }

    #[test]
    fn tri_state() {
        assert_eq!(parse_midi("q"), Parsing::NotMatched);
        assert!(parse_musical("q").is_parsed());
        assert!(matches!(parse_metric("1:75"), Parsing::OutOfRange(_)));
        assert!(matches!(parse_musical("1/0"), Parsing::OutOfRange(_)));
        assert!(matches!(parse_musical("[3:2]et"), Parsing::OutOfRange(_)));
        assert_eq!(parse_time_span("abc"), Err(ParseError::NotMatched));
        assert_eq!(parse_time_span(""), Err(ParseError::NotMatched));
        assert!(matches!(
            parse_time_span("1:30 - 2/0"),
            Err(ParseError::OutOfRange(_))
        ));
        assert_eq!(
            parse_midi("99999999999999999999999"),
            Parsing::OutOfRange("tick count out of range")
        );
    }

    #[test]
    fn display_round_trip() {
        let spans: Vec<TimeSpan> = vec![
            MidiTimeSpan(960).into(),
            BarBeatTicksTimeSpan::new(2, 1, 240).into(),
            BarBeatFractionTimeSpan::new(2, 1.5).unwrap().into(),
            MetricTimeSpan::new(1, 2, 3, 4).unwrap().into(),
            MusicalTimeSpan::new(3, 8)
                .unwrap()
                .dotted(2)
                .unwrap()
                .tupled(Tuplet::new(5, 4).unwrap())
                .into(),
            MathTimeSpan::new(
                MathOperation::Subtract,
                MidiTimeSpan(960).into(),
                MathTimeSpan::new(
                    MathOperation::Add,
                    MusicalTimeSpan::QUARTER.into(),
                    MetricTimeSpan::from_micros(1_000_000).into(),
                )
                .into(),
            )
            .into(),
        ];
        for span in spans {
            let text = span.to_string();
            assert_eq!(parsed(&text), span, "{:?} did not survive a round trip", text);
        }
    }
}
