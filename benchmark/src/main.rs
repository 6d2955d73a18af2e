use midly_tempo::{
    convert_time_from, convert_time_to, parse_time_span, BarBeatTicksTimeSpan, MathOperation,
    MathTimeSpan, MetricTimeSpan, MidiTimeSpan, RawChange, TempoMap, TimeDivision,
};
use std::{env, time::Instant};

/// Tempo map sizes to run every operation against, as `(name, tempo changes, meter changes)`.
const MAPS: &[(&str, usize, usize)] = &[
    ("tiny", 4, 1),
    ("song", 300, 20),
    ("dense", 20_000, 2_000),
];

/// Amount of queries each operation performs per run.
const QUERIES: u64 = 1_000;

const OPERATIONS: &[(&str, fn(&Workload) -> Result<u64, String>)] = &[
    ("build", build),
    ("metric", metric),
    ("bar-beat", bar_beat),
    ("math", math),
    ("parse", parse),
];

/// Raw records and the map built out of them.
struct Workload {
    records: Vec<Vec<(u64, RawChange)>>,
    map: TempoMap,
    end: u64,
}
impl Workload {
    fn new(tempos: usize, meters: usize) -> Result<Workload, String> {
        //Deterministic, so that runs are comparable
        let mut state = 0x2545F4914F6CDD1Du64;
        let mut next = move |max: u64| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state % max
        };
        let end = 480 * 4 * (tempos.max(meters) as u64 + 1) * 8;
        let tempo_track = (0..tempos)
            .map(|_| (next(end), RawChange::Tempo(200_000 + next(1_000_000) as u32)))
            .collect();
        let meter_track = (0..meters)
            .map(|_| {
                let change = RawChange::TimeSignature {
                    numerator: 1 + next(12) as u8,
                    denominator_pow: 1 + next(4) as u8,
                };
                (next(end), change)
            })
            .collect();
        let records: Vec<Vec<(u64, RawChange)>> = vec![tempo_track, meter_track];
        let map =
            TempoMap::from_tracks(division()?, &records).map_err(|err| format!("{}", err))?;
        Ok(Workload { records, map, end })
    }

    fn ticks(&self) -> impl Iterator<Item = u64> + '_ {
        (0..QUERIES).map(move |i| i * self.end / QUERIES)
    }
}

fn division() -> Result<TimeDivision, String> {
    TimeDivision::ticks_per_quarter_note(480).map_err(|err| format!("{}", err))
}

fn build(work: &Workload) -> Result<u64, String> {
    let map =
        TempoMap::from_tracks(division()?, &work.records).map_err(|err| format!("{}", err))?;
    Ok(map.tempo_line().len() as u64)
}

fn metric(work: &Workload) -> Result<u64, String> {
    let mut checksum = 0;
    for ticks in work.ticks() {
        let span: MetricTimeSpan =
            convert_time_to(ticks, &work.map).map_err(|err| format!("{}", err))?;
        checksum ^= convert_time_from(&span, &work.map).map_err(|err| format!("{}", err))?;
    }
    Ok(checksum)
}

fn bar_beat(work: &Workload) -> Result<u64, String> {
    let mut checksum = 0;
    for ticks in work.ticks() {
        let span: BarBeatTicksTimeSpan =
            convert_time_to(ticks, &work.map).map_err(|err| format!("{}", err))?;
        checksum ^= convert_time_from(&span, &work.map).map_err(|err| format!("{}", err))?;
    }
    Ok(checksum)
}

fn math(work: &Workload) -> Result<u64, String> {
    let mut checksum = 0;
    for ticks in work.ticks().step_by(10) {
        let span = MathTimeSpan::new(
            MathOperation::Subtract,
            MidiTimeSpan(ticks).into(),
            MetricTimeSpan::from_micros(250_000).into(),
        );
        //Spans reaching before the start of the file fail, which is expected
        if let Ok(found) = convert_time_from(&span, &work.map) {
            checksum ^= found;
        }
    }
    Ok(checksum)
}

fn parse(work: &Workload) -> Result<u64, String> {
    let mut checksum = 0;
    for ticks in work.ticks() {
        let text = format!("{}.{}.{} + 1:30 - q.", ticks % 97, ticks % 4, ticks % 480);
        let span = parse_time_span(&text).map_err(|err| format!("{}", err))?;
        checksum ^= convert_time_from(&span, &work.map).unwrap_or(0);
    }
    Ok(checksum)
}

fn use_operation(
    op: fn(&Workload) -> Result<u64, String>,
    work: &Workload,
) -> Result<(), String> {
    let round = |num: f64| (num * 100.0).round() / 100.0;

    let runtime = || -> Result<_, String> {
        let start = Instant::now();
        let out = op(work)?;
        let time = round((start.elapsed().as_micros() as f64) / 1000.0);
        Ok((out, time))
    };

    let (checksum, cold_time) = runtime()?;
    let runtime = || -> Result<_, String> {
        let (out, time) = runtime()?;
        assert_eq!(out, checksum, "operation is not deterministic");
        Ok(time)
    };

    let iters = (2000.0 / cold_time.max(0.01)).floor() as u64 + 1;
    let mut total_time = 0.0;
    let mut max_time = cold_time;
    let mut min_time = cold_time;
    for _ in 0..iters {
        let time = runtime()?;
        total_time += time;
        max_time = max_time.max(time);
        min_time = min_time.min(time);
    }
    let avg_time = round(total_time / (iters as f64));

    eprintln!(
        "{} iters / min {} / avg {} / max {}",
        iters, min_time, avg_time, max_time
    );

    Ok(())
}

fn main() {
    let map_filter = env::args().nth(1).unwrap_or_default().to_lowercase();
    let op_filter = env::args().nth(2).unwrap_or_default().to_lowercase();

    let ops = OPERATIONS
        .iter()
        .filter(|(name, _)| name.contains(&op_filter))
        .collect::<Vec<_>>();
    if ops.is_empty() {
        eprintln!("no operations match the pattern \"{}\"", op_filter);
        eprint!("available operations: ");
        for (i, (name, _)) in OPERATIONS.iter().enumerate() {
            if i > 0 {
                eprint!(", ");
            }
            eprint!("{}", name);
        }
        eprintln!();
    }

    let maps = MAPS
        .iter()
        .filter(|(name, _, _)| name.contains(&map_filter))
        .collect::<Vec<_>>();
    if maps.is_empty() {
        eprintln!("no tempo maps match the pattern \"{}\"", map_filter);
        eprintln!("available tempo maps:");
        for (name, tempos, meters) in MAPS.iter() {
            eprintln!("  {} ({} tempo, {} meter changes)", name, tempos, meters);
        }
    } else {
        for &&(name, tempos, meters) in maps.iter() {
            let work = match Workload::new(tempos, meters) {
                Ok(work) => work,
                Err(err) => {
                    eprintln!("failed to build tempo map \"{}\": {}", name, err);
                    continue;
                }
            };
            eprintln!(
                "tempo map \"{}\" ({} tempo, {} meter changes)",
                name, tempos, meters
            );
            for &&(op_name, op) in ops.iter() {
                eprint!("  {}: ", op_name);
                if let Err(err) = use_operation(op, &work) {
                    eprintln!("error: {}", err);
                }
            }
            eprintln!();
        }
    }
}
