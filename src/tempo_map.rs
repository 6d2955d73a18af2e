//! The tempo map: the time division plus the tempo and time signature timelines of a file.

use crate::{
    prelude::*,
    primitive::{u24, Tempo, TimeDivision, TimeSignature},
    value_line::{ValueChange, ValueLine},
};

/// A decoded tempo map event.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Change {
    Tempo(Tempo),
    TimeSignature(TimeSignature),
}
impl From<Tempo> for Change {
    fn from(tempo: Tempo) -> Change {
        Change::Tempo(tempo)
    }
}
impl From<TimeSignature> for Change {
    fn from(time_signature: TimeSignature) -> Change {
        Change::TimeSignature(time_signature)
    }
}

/// A tempo map event exactly as stored by the `Tempo` and `TimeSignature` meta messages.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum RawChange {
    /// Microseconds per quarter note, a 24-bit value in the file.
    Tempo(u32),
    /// The denominator is stored as a power of two, so `6/8` is stored as `(6, 3)`.
    TimeSignature { numerator: u8, denominator_pow: u8 },
}
impl RawChange {
    /// Check the record against the MIDI storage constraints and decode it.
    pub fn decode(&self) -> Result<Change> {
        Ok(match *self {
            RawChange::Tempo(micros) => {
                ensure!(
                    u24::try_from(micros).is_some(),
                    err_malformed!("tempo exceeds 24 bits")
                );
                Change::Tempo(Tempo::new(micros).context(err_malformed!("invalid tempo record"))?)
            }
            RawChange::TimeSignature {
                numerator,
                denominator_pow,
            } => {
                ensure!(
                    denominator_pow < 16,
                    err_malformed!("time signature denominator exceeds 16 bits")
                );
                Change::TimeSignature(
                    TimeSignature::new(numerator as u16, 1 << denominator_pow)
                        .context(err_malformed!("invalid time signature record"))?,
                )
            }
        })
    }

    /// Encode a change into its storage form.
    ///
    /// Fails if the value does not fit the meta message fields.
    pub fn encode(change: Change) -> Result<RawChange> {
        Ok(match change {
            Change::Tempo(tempo) => {
                let micros = u24::try_from(tempo.as_micros())
                    .ok_or(err_invalid!("tempo does not fit in 24 bits"))?;
                RawChange::Tempo(micros.as_int())
            }
            Change::TimeSignature(ts) => {
                let numerator = u8::try_from(ts.numerator())
                    .map_err(|_| err_invalid!("time signature numerator does not fit in a byte"))?;
                RawChange::TimeSignature {
                    numerator,
                    denominator_pow: ts.denominator().trailing_zeros() as u8,
                }
            }
        })
    }
}

/// Record lists shorter than this are never validated in parallel.
#[cfg(feature = "parallel")]
const PARALLEL_ENABLE_THRESHOLD: usize = 3 * 1024;

/// A snapshot of every tempo and time signature change of a file, used for all time
/// conversions.
///
/// Once built the map is read-only: conversions take it by shared reference and never modify
/// it, so one map can be shared between threads freely. Edits go through
/// [`TempoMap::edit`], which works on a deep copy.
#[derive(Clone, Debug)]
pub struct TempoMap {
    time_division: TimeDivision,
    tempo: ValueLine<Tempo>,
    time_signature: ValueLine<TimeSignature>,
}
impl Default for TempoMap {
    fn default() -> TempoMap {
        TempoMap::new(TimeDivision::default())
    }
}
impl TempoMap {
    /// A map with default tempo (120 BPM) and time signature (4/4) throughout.
    pub fn new(time_division: TimeDivision) -> TempoMap {
        TempoMap {
            time_division,
            tempo: ValueLine::new(Tempo::DEFAULT),
            time_signature: ValueLine::new(TimeSignature::DEFAULT),
        }
    }

    /// Build a map out of time-stamped changes.
    ///
    /// The changes need not be ordered. Changes are applied in time order, and among changes
    /// of the same kind at the same tick the one appearing last wins.
    pub fn build<I>(time_division: TimeDivision, changes: I) -> TempoMap
    where
        I: IntoIterator<Item = (u64, Change)>,
    {
        let mut changes: Vec<(u64, Change)> = changes.into_iter().collect();
        //Stable, so that later duplicates still override earlier ones
        changes.sort_by_key(|&(time, _)| time);
        let mut map = TempoMap::new(time_division);
        for &(time, change) in &changes {
            map.apply(time, change);
        }
        debug!(
            "built tempo map from {} changes: {} tempo, {} time signature",
            changes.len(),
            map.tempo.len(),
            map.time_signature.len()
        );
        map
    }

    /// Build a map out of raw meta message records.
    ///
    /// Records violating the MIDI storage format are skipped with a warning, unless the
    /// `strict` feature is enabled, in which case they fail with `ErrorKind::Malformed`.
    pub fn from_raw_events<I>(time_division: TimeDivision, events: I) -> Result<TempoMap>
    where
        I: IntoIterator<Item = (u64, RawChange)>,
    {
        let mut changes = Vec::new();
        decode_records(events, &mut changes)?;
        Ok(TempoMap::build(time_division, changes))
    }

    /// Build a map out of the raw records of several tracks.
    ///
    /// Tracks are merged by time; at equal ticks, records from later tracks override earlier
    /// ones. With the `parallel` feature large inputs are decoded on several threads.
    pub fn from_tracks<T>(time_division: TimeDivision, tracks: &[T]) -> Result<TempoMap>
    where
        T: AsRef<[(u64, RawChange)]> + Sync,
    {
        let decode_track = |track: &T| -> Result<Vec<(u64, Change)>> {
            let track = track.as_ref();
            let mut changes = Vec::with_capacity(track.len());
            decode_records(track.iter().copied(), &mut changes)?;
            Ok(changes)
        };

        //Attempt to use multiple threads if possible and enabled
        #[cfg(feature = "parallel")]
        {
            let total: usize = tracks.iter().map(|track| track.as_ref().len()).sum();
            if total >= PARALLEL_ENABLE_THRESHOLD {
                use rayon::prelude::*;

                let decoded = tracks
                    .par_iter()
                    .map(decode_track)
                    .collect::<Result<Vec<_>>>()?;
                return Ok(TempoMap::build(
                    time_division,
                    decoded.into_iter().flatten(),
                ));
            }
        }

        //Fall back to single-threaded
        let mut merged = Vec::new();
        for track in tracks {
            merged.extend(decode_track(track)?);
        }
        Ok(TempoMap::build(time_division, merged))
    }

    /// The resolution of the ticks this map is expressed in.
    #[inline]
    pub fn time_division(&self) -> TimeDivision {
        self.time_division
    }

    /// The tempo active at the given tick.
    #[inline]
    pub fn tempo_at(&self, time: u64) -> Tempo {
        *self.tempo.at_time(time)
    }

    /// The time signature active at the given tick.
    #[inline]
    pub fn time_signature_at(&self, time: u64) -> TimeSignature {
        *self.time_signature.at_time(time)
    }

    #[inline]
    pub fn tempo_line(&self) -> &ValueLine<Tempo> {
        &self.tempo
    }

    #[inline]
    pub fn time_signature_line(&self) -> &ValueLine<TimeSignature> {
        &self.time_signature
    }

    /// All tempo changes, in ascending time order.
    pub fn tempo_changes(&self) -> impl Iterator<Item = ValueChange<Tempo>> + '_ {
        self.tempo.values()
    }

    /// All time signature changes, in ascending time order.
    pub fn time_signature_changes(&self) -> impl Iterator<Item = ValueChange<TimeSignature>> + '_ {
        self.time_signature.values()
    }

    /// Every change of the map as raw meta message records, ready to be written into a track.
    ///
    /// Records are ordered by time, with tempo records before time signature records at
    /// equal ticks.
    pub fn to_raw_events(&self) -> Result<Vec<(u64, RawChange)>> {
        let mut tempos = self.tempo.values().peekable();
        let mut signatures = self.time_signature.values().peekable();
        let mut raw = Vec::with_capacity(self.tempo.len() + self.time_signature.len());
        loop {
            let take_tempo = match (tempos.peek(), signatures.peek()) {
                (Some(tempo), Some(ts)) => tempo.time <= ts.time,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let (time, change) = if take_tempo {
                tempos
                    .next()
                    .map(|c| (c.time, Change::Tempo(c.value)))
            } else {
                signatures
                    .next()
                    .map(|c| (c.time, Change::TimeSignature(c.value)))
            }
            .ok_or(err_invalid!("tempo map changed while serializing"))?;
            raw.push((time, RawChange::encode(change)?));
        }
        Ok(raw)
    }

    /// Start editing a copy of this map.
    pub fn edit(&self) -> TempoMapEditor {
        TempoMapEditor { map: self.clone() }
    }

    /// Mirror this map around `time`, so that tick `x` of the result carries the tempo and
    /// time signature of tick `time - 1 - x` of the original.
    ///
    /// Walking forward through the flipped map from zero is equivalent to walking backward
    /// through the original from `time`. A change located exactly at `time` lies outside the
    /// mirrored interval and does not influence it, and ticks mirrored from before zero carry
    /// the default values.
    pub fn flip(&self, time: u64) -> TempoMap {
        TempoMap {
            time_division: self.time_division,
            tempo: flip_line(&self.tempo, time),
            time_signature: flip_line(&self.time_signature, time),
        }
    }

    fn apply(&mut self, time: u64, change: Change) {
        match change {
            Change::Tempo(tempo) => self.tempo.set_value(time, tempo),
            Change::TimeSignature(ts) => self.time_signature.set_value(time, ts),
        }
    }
}

/// Owns a mutable copy of a tempo map and hands out the edited snapshot when done.
#[derive(Clone, Debug)]
pub struct TempoMapEditor {
    map: TempoMap,
}
impl TempoMapEditor {
    /// Set the tempo from `time` onwards, up to the next tempo change.
    pub fn set_tempo(&mut self, time: u64, tempo: Tempo) -> &mut Self {
        self.map.tempo.set_value(time, tempo);
        self
    }

    /// Set the time signature from `time` onwards, up to the next time signature change.
    pub fn set_time_signature(&mut self, time: u64, ts: TimeSignature) -> &mut Self {
        self.map.time_signature.set_value(time, ts);
        self
    }

    /// Remove the tempo changes within `start..=end`, returning how many were removed.
    pub fn clear_tempo(&mut self, start: u64, end: u64) -> usize {
        self.map.tempo.delete_values(start, end)
    }

    /// Remove the time signature changes within `start..=end`, returning how many were removed.
    pub fn clear_time_signature(&mut self, start: u64, end: u64) -> usize {
        self.map.time_signature.delete_values(start, end)
    }

    /// The map as edited so far.
    #[inline]
    pub fn tempo_map(&self) -> &TempoMap {
        &self.map
    }

    /// Finish editing, yielding the new snapshot.
    pub fn finish(self) -> TempoMap {
        debug!(
            "edited tempo map now has {} tempo and {} time signature changes",
            self.map.tempo.len(),
            self.map.time_signature.len()
        );
        self.map
    }
}

fn decode_records<I>(records: I, out: &mut Vec<(u64, Change)>) -> Result<()>
where
    I: IntoIterator<Item = (u64, RawChange)>,
{
    for (time, raw) in records {
        match raw.decode() {
            Ok(change) => out.push((time, change)),
            Err(err) => {
                if cfg!(feature = "strict") {
                    return Err(err).context(err_malformed!("invalid tempo map record"));
                } else {
                    //Ignore the record, keeping whatever was active before
                    warn!("skipping tempo map record at tick {}: {}", time, err);
                }
            }
        }
    }
    Ok(())
}

fn flip_line<T: Clone + PartialEq>(line: &ValueLine<T>, time: u64) -> ValueLine<T> {
    let first = match time.checked_sub(1) {
        Some(last) => line.at_time(last),
        None => line.default_value(),
    };
    let mut flipped = ValueLine::new(first.clone());
    //Each change before the pivot becomes a change back to the value it replaced
    let mut changes = line.changes_before(time).peekable();
    while let Some(change) = changes.next() {
        let replaced = changes.peek().map_or(line.default_value(), |prev| prev.value);
        flipped.set_value(time - change.time, replaced.clone());
    }
    flipped
}
