//! Conversions between raw ticks and the other time span representations.
//!
//! A tick count means nothing on its own: how long it lasts depends on the tempo changes it
//! crosses, and how many bars it spans depends on the time signature changes it crosses. All
//! conversions therefore walk the segments of a [`TempoMap`] between the start and the end of
//! the span.
//!
//! Points in time are treated as lengths starting at tick zero.

use crate::{
    prelude::*,
    primitive::{Fps, Tempo, TimeDivision, TimeSignature},
    span::{
        BarBeatFractionTimeSpan, BarBeatTicksTimeSpan, MathOperation, MathTimeSpan,
        MetricTimeSpan, MidiTimeSpan, MusicalTimeSpan, TimeSpan, TimeSpanType,
    },
    tempo_map::TempoMap,
    value_line::ValueLine,
};

const OVERFLOW: &ErrorKind = err_invalid!("tick count overflows 64 bits");

/// Representations that can be measured in ticks.
pub trait IntoTicks {
    /// The length of this span in ticks, when laid out starting at tick `start`.
    fn length_ticks(&self, start: u64, map: &TempoMap) -> Result<u64>;
}

/// Representations that can be built out of a tick count.
///
/// `MusicalTimeSpan` and `MathTimeSpan` do not implement this trait, as a tick count has no
/// canonical form in either of them.
pub trait FromTicks: Sized {
    /// Express `length` ticks starting at tick `start` in this representation.
    fn from_length_ticks(length: u64, start: u64, map: &TempoMap) -> Result<Self>;
}

/// Express the absolute tick `ticks` in the representation `R`.
#[inline]
pub fn convert_time_to<R: FromTicks>(ticks: u64, map: &TempoMap) -> Result<R> {
    R::from_length_ticks(ticks, 0, map)
}

/// The absolute tick that `span` refers to, measuring from the start of the file.
#[inline]
pub fn convert_time_from<S: IntoTicks + ?Sized>(span: &S, map: &TempoMap) -> Result<u64> {
    span.length_ticks(0, map)
}

/// Express a length of `length` ticks starting at tick `start` in the representation `R`.
#[inline]
pub fn convert_length_to<R: FromTicks>(length: u64, start: u64, map: &TempoMap) -> Result<R> {
    R::from_length_ticks(length, start, map)
}

/// The length in ticks of `span` when it starts at tick `start`.
#[inline]
pub fn convert_length_from<S: IntoTicks + ?Sized>(
    span: &S,
    start: u64,
    map: &TempoMap,
) -> Result<u64> {
    span.length_ticks(start, map)
}

/// Like `convert_time_to`, but with the target representation chosen at runtime.
pub fn convert_time_to_type(ticks: u64, kind: TimeSpanType, map: &TempoMap) -> Result<TimeSpan> {
    convert_length_to_type(ticks, 0, kind, map)
}

/// Like `convert_length_to`, but with the target representation chosen at runtime.
pub fn convert_length_to_type(
    length: u64,
    start: u64,
    kind: TimeSpanType,
    map: &TempoMap,
) -> Result<TimeSpan> {
    Ok(match kind {
        TimeSpanType::Midi => MidiTimeSpan::from_length_ticks(length, start, map)?.into(),
        TimeSpanType::Metric => MetricTimeSpan::from_length_ticks(length, start, map)?.into(),
        TimeSpanType::BarBeatTicks => {
            BarBeatTicksTimeSpan::from_length_ticks(length, start, map)?.into()
        }
        TimeSpanType::BarBeatFraction => {
            BarBeatFractionTimeSpan::from_length_ticks(length, start, map)?.into()
        }
        TimeSpanType::Musical => {
            bail!(err_unsupported!("ticks cannot be converted to a musical span"))
        }
        TimeSpanType::Math => bail!(err_unsupported!("ticks cannot be converted to a math span")),
    })
}

impl IntoTicks for MidiTimeSpan {
    #[inline]
    fn length_ticks(&self, _start: u64, _map: &TempoMap) -> Result<u64> {
        Ok(self.0)
    }
}
impl FromTicks for MidiTimeSpan {
    #[inline]
    fn from_length_ticks(length: u64, _start: u64, _map: &TempoMap) -> Result<MidiTimeSpan> {
        Ok(MidiTimeSpan(length))
    }
}

impl FromTicks for MetricTimeSpan {
    fn from_length_ticks(length: u64, start: u64, map: &TempoMap) -> Result<MetricTimeSpan> {
        let walk = Walk::forward(map, start);
        walk.ensure_fits(length)?;
        Ok(MetricTimeSpan::from_micros(micros_between(walk, length)?))
    }
}

impl FromTicks for BarBeatTicksTimeSpan {
    fn from_length_ticks(length: u64, start: u64, map: &TempoMap) -> Result<BarBeatTicksTimeSpan> {
        let walk = Walk::forward(map, start);
        walk.ensure_fits(length)?;
        let tpqn = map.time_division().quarter_note_ticks()?;
        let (bars, bar_start) = split_bars(walk, tpqn, length)?;
        let beat_len = walk.time_signature(bar_start).beat_length(tpqn)?;
        let rest = length - bar_start;
        Ok(BarBeatTicksTimeSpan::new(bars, rest / beat_len, rest % beat_len))
    }
}

impl FromTicks for BarBeatFractionTimeSpan {
    fn from_length_ticks(
        length: u64,
        start: u64,
        map: &TempoMap,
    ) -> Result<BarBeatFractionTimeSpan> {
        let walk = Walk::forward(map, start);
        walk.ensure_fits(length)?;
        let tpqn = map.time_division().quarter_note_ticks()?;
        let (bars, bar_start) = split_bars(walk, tpqn, length)?;
        let beat_len = walk.time_signature(bar_start).beat_length(tpqn)?;
        BarBeatFractionTimeSpan::new(bars, (length - bar_start) as f64 / beat_len as f64)
    }
}

/// Spans that are measured by walking the map, in either direction.
trait Measure {
    /// The length of this span in ticks, laid out along `walk`.
    fn measure(&self, walk: Walk) -> Result<u64>;
}

macro_rules! impl_into_ticks {
    ($($span:ty),*) => {$(
        impl IntoTicks for $span {
            #[inline]
            fn length_ticks(&self, start: u64, map: &TempoMap) -> Result<u64> {
                self.measure(Walk::forward(map, start))
            }
        }
    )*};
}
impl_into_ticks!(
    MetricTimeSpan,
    MusicalTimeSpan,
    BarBeatTicksTimeSpan,
    BarBeatFractionTimeSpan,
    MathTimeSpan,
    TimeSpan
);

impl Measure for MetricTimeSpan {
    fn measure(&self, walk: Walk) -> Result<u64> {
        ticks_for_micros(walk, self.total_micros())
    }
}

impl Measure for MusicalTimeSpan {
    /// Musical lengths do not depend on tempo or meter, only on the tick resolution.
    fn measure(&self, walk: Walk) -> Result<u64> {
        let whole = walk.map.time_division().whole_note_ticks()? as u128;
        let (num, den) = self.fraction()?;
        let ticks = whole
            .checked_mul(num)
            .map(|scaled| round_div(scaled, den))
            .ok_or(OVERFLOW)?;
        let ticks = u64::try_from(ticks).map_err(|_| Error::new(OVERFLOW))?;
        walk.ensure_fits(ticks)
    }
}

impl Measure for BarBeatTicksTimeSpan {
    fn measure(&self, walk: Walk) -> Result<u64> {
        let tpqn = walk.map.time_division().quarter_note_ticks()?;
        let bar_start = advance_bars(walk, tpqn, self.bars)?;
        let beat_len = walk.time_signature(bar_start).beat_length(tpqn)?;
        let len = self
            .beats
            .checked_mul(beat_len)
            .and_then(|beats| beats.checked_add(self.ticks))
            .and_then(|offset| bar_start.checked_add(offset))
            .ok_or(OVERFLOW)?;
        walk.ensure_fits(len)
    }
}

impl Measure for BarBeatFractionTimeSpan {
    fn measure(&self, walk: Walk) -> Result<u64> {
        let tpqn = walk.map.time_division().quarter_note_ticks()?;
        let bar_start = advance_bars(walk, tpqn, self.bars())?;
        let beat_len = walk.time_signature(bar_start).beat_length(tpqn)?;
        let offset = (self.beats() * beat_len as f64).round();
        ensure!(offset <= u64::MAX as f64, OVERFLOW);
        let len = bar_start.checked_add(offset as u64).ok_or(OVERFLOW)?;
        walk.ensure_fits(len)
    }
}

impl Measure for MathTimeSpan {
    fn measure(&self, walk: Walk) -> Result<u64> {
        let first = self.first.measure(walk)?;
        let pivot = walk.advance(first)?;
        trace!("{} spans {} ticks, pivoting at tick {}", self.first, first, pivot.origin);
        match self.operation {
            MathOperation::Add => {
                let second = self.second.measure(pivot)?;
                first.checked_add(second).ok_or(OVERFLOW.into())
            }
            MathOperation::Subtract => {
                //The removed length lies behind the pivot, so walk back from there
                let second = self.second.measure(pivot.reverse())?;
                first
                    .checked_sub(second)
                    .ok_or(err_invalid!("math span difference is negative").into())
            }
        }
    }
}

impl Measure for TimeSpan {
    fn measure(&self, walk: Walk) -> Result<u64> {
        match self {
            TimeSpan::Midi(s) => walk.ensure_fits(s.0),
            TimeSpan::Metric(s) => s.measure(walk),
            TimeSpan::Musical(s) => s.measure(walk),
            TimeSpan::BarBeatTicks(s) => s.measure(walk),
            TimeSpan::BarBeatFraction(s) => s.measure(walk),
            TimeSpan::Math(s) => s.measure(walk),
        }
    }
}

/// A direction in which a span is laid out across the map, starting from an origin tick.
///
/// Offsets along the walk count ticks away from the origin. Walking backward, the tick at
/// offset `x` is `origin - 1 - x`, so a change located exactly at the origin is behind the
/// walk. Ticks before zero carry the default tempo and time signature.
#[derive(Copy, Clone, Debug)]
struct Walk<'a> {
    map: &'a TempoMap,
    origin: i128,
    backward: bool,
}
impl<'a> Walk<'a> {
    #[inline]
    fn forward(map: &'a TempoMap, start: u64) -> Walk<'a> {
        Walk {
            map,
            origin: start as i128,
            backward: false,
        }
    }

    /// Continue in the same direction from `offset`.
    fn advance(self, offset: u64) -> Result<Walk<'a>> {
        let origin = if self.backward {
            self.origin - offset as i128
        } else {
            self.origin + offset as i128
        };
        ensure!(origin <= u64::MAX as i128, OVERFLOW);
        Ok(Walk { origin, ..self })
    }

    /// Turn around at the origin.
    #[inline]
    fn reverse(self) -> Walk<'a> {
        Walk {
            backward: !self.backward,
            ..self
        }
    }

    /// Walking forward, a span of `len` ticks must end within 64 bits.
    fn ensure_fits(self, len: u64) -> Result<u64> {
        ensure!(
            self.backward || self.origin + len as i128 <= u64::MAX as i128,
            OVERFLOW
        );
        Ok(len)
    }

    fn value<T: Clone + PartialEq>(self, line: &'a ValueLine<T>, offset: u64) -> &'a T {
        let tick = if self.backward {
            self.origin - 1 - offset as i128
        } else {
            self.origin + offset as i128
        };
        if tick < 0 {
            line.default_value()
        } else {
            line.at_time(u64::try_from(tick).unwrap_or(u64::MAX))
        }
    }

    /// The offset of the closest change strictly after `offset`.
    fn next_change<T: Clone + PartialEq>(self, line: &'a ValueLine<T>, offset: u64) -> Option<u64> {
        if self.backward {
            let edge = self.origin - offset as i128;
            if edge <= 0 {
                return None;
            }
            let edge = u64::try_from(edge).unwrap_or(u64::MAX);
            let change = line.changes_before(edge).next()?;
            u64::try_from(self.origin - change.time as i128).ok()
        } else {
            let tick = self.origin + offset as i128;
            let time = if tick < 0 {
                match line.change_at(0) {
                    Some(_) => 0,
                    None => line.next_change_after(0)?.time,
                }
            } else {
                line.next_change_after(u64::try_from(tick).ok()?)?.time
            };
            u64::try_from(time as i128 - self.origin).ok()
        }
    }

    #[inline]
    fn tempo(self, offset: u64) -> Tempo {
        *self.value(self.map.tempo_line(), offset)
    }

    #[inline]
    fn time_signature(self, offset: u64) -> TimeSignature {
        *self.value(self.map.time_signature_line(), offset)
    }
}

/// Divide rounding half away from zero.
#[inline]
fn round_div(num: u128, den: u128) -> u128 {
    let (quot, rem) = (num / den, num % den);
    quot + (rem >= den - rem) as u128
}

/// SMPTE ticks per microsecond, as a `(numerator, denominator)` pair.
fn smpte_ticks_per_micro(fps: Fps, ticks_per_frame: u8) -> Result<(u128, u128)> {
    ensure!(ticks_per_frame > 0, err_invalid!("ticks per frame must be positive"));
    let (num, den) = fps.as_ratio();
    Ok((num as u128 * ticks_per_frame as u128, den as u128 * 1_000_000))
}

/// The sum of `ticks * tempo` over every tempo segment in the first `len` ticks of `walk`.
///
/// Dividing this area by the ticks per quarter note yields microseconds.
fn tempo_area(walk: Walk, len: u64) -> u128 {
    let mut area = 0u128;
    let mut pos = 0;
    while let Some(next) = walk.next_change(walk.map.tempo_line(), pos) {
        if next >= len {
            break;
        }
        area += (next - pos) as u128 * walk.tempo(pos).as_micros() as u128;
        pos = next;
    }
    area + (len - pos) as u128 * walk.tempo(pos).as_micros() as u128
}

/// Microseconds elapsed over the first `len` ticks of `walk`.
fn micros_between(walk: Walk, len: u64) -> Result<u64> {
    let micros = match walk.map.time_division() {
        TimeDivision::TicksPerQuarterNote(_) => {
            let tpqn = walk.map.time_division().quarter_note_ticks()? as u128;
            round_div(tempo_area(walk, len), tpqn)
        }
        TimeDivision::Smpte(fps, ticks_per_frame) => {
            let (num, den) = smpte_ticks_per_micro(fps, ticks_per_frame)?;
            round_div(len as u128 * den, num)
        }
    };
    u64::try_from(micros)
        .map_err(|_| err_invalid!("duration overflows 64 bits of microseconds").into())
}

/// Ticks needed to cover `micros` microseconds along `walk`.
fn ticks_for_micros(walk: Walk, micros: u64) -> Result<u64> {
    let ticks = match walk.map.time_division() {
        TimeDivision::TicksPerQuarterNote(_) => {
            let tpqn = walk.map.time_division().quarter_note_ticks()? as u128;
            let mut remaining = micros as u128 * tpqn;
            let mut pos = 0;
            let mut tempo = walk.tempo(pos).as_micros() as u128;
            while let Some(next) = walk.next_change(walk.map.tempo_line(), pos) {
                let segment = (next - pos) as u128 * tempo;
                if segment >= remaining {
                    break;
                }
                remaining -= segment;
                pos = next;
                tempo = walk.tempo(pos).as_micros() as u128;
            }
            pos as u128 + round_div(remaining, tempo)
        }
        TimeDivision::Smpte(fps, ticks_per_frame) => {
            let (num, den) = smpte_ticks_per_micro(fps, ticks_per_frame)?;
            round_div(micros as u128 * num, den)
        }
    };
    let ticks = u64::try_from(ticks).map_err(|_| Error::new(OVERFLOW))?;
    walk.ensure_fits(ticks)
}

/// The offset at which bar number `bars` begins along `walk`.
///
/// The time signature active at the start of each bar sets the length of the whole bar.
fn advance_bars(walk: Walk, tpqn: u64, bars: u64) -> Result<u64> {
    let mut pos = 0u64;
    let mut remaining = bars;
    while remaining > 0 {
        let bar_len = walk.time_signature(pos).bar_length(tpqn)?;
        //Bars starting before the next signature change all share this length
        let uniform = match walk.next_change(walk.map.time_signature_line(), pos) {
            Some(next) => (next - pos).div_ceil(bar_len),
            None => remaining,
        };
        let n = uniform.min(remaining);
        pos = n
            .checked_mul(bar_len)
            .and_then(|len| pos.checked_add(len))
            .ok_or(OVERFLOW)?;
        remaining -= n;
    }
    Ok(pos)
}

/// Count the whole bars that fit in the first `len` ticks of `walk`, returning the count and
/// the offset at which the leftover partial bar begins.
fn split_bars(walk: Walk, tpqn: u64, len: u64) -> Result<(u64, u64)> {
    let mut pos = 0u64;
    let mut bars = 0u64;
    loop {
        let bar_len = walk.time_signature(pos).bar_length(tpqn)?;
        let fitting = (len - pos) / bar_len;
        if fitting == 0 {
            break;
        }
        let uniform = match walk.next_change(walk.map.time_signature_line(), pos) {
            Some(next) => (next - pos).div_ceil(bar_len),
            None => fitting,
        };
        let n = uniform.min(fitting);
        pos += n * bar_len;
        bars += n;
    }
    Ok((bars, pos))
}
