//! In-memory time span representations.
//!
//! Every representation can describe either a point in time (a span measured from tick zero)
//! or a length (a span measured from some start tick). Which one is meant depends on the
//! conversion function it is handed to.

use crate::prelude::*;

/// A span in raw MIDI ticks.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
pub struct MidiTimeSpan(pub u64);
impl MidiTimeSpan {
    #[inline]
    pub fn ticks(self) -> u64 {
        self.0
    }
}
impl fmt::Display for MidiTimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A span of wall-clock time, stored in microseconds.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
pub struct MetricTimeSpan {
    total_micros: u64,
}
impl MetricTimeSpan {
    #[inline]
    pub const fn from_micros(total_micros: u64) -> MetricTimeSpan {
        MetricTimeSpan { total_micros }
    }

    /// Build a span out of clock components, which need not be normalized
    /// (`90` minutes is fine).
    pub fn new(hours: u64, minutes: u64, seconds: u64, millis: u64) -> Result<MetricTimeSpan> {
        let total = hours
            .checked_mul(60)
            .and_then(|m| m.checked_add(minutes))
            .and_then(|m| m.checked_mul(60))
            .and_then(|s| s.checked_add(seconds))
            .and_then(|s| s.checked_mul(1_000))
            .and_then(|ms| ms.checked_add(millis))
            .and_then(|ms| ms.checked_mul(1_000))
            .ok_or(err_invalid!("metric time span exceeds 64 bits of microseconds"))?;
        Ok(MetricTimeSpan::from_micros(total))
    }

    #[inline]
    pub fn total_micros(&self) -> u64 {
        self.total_micros
    }

    #[inline]
    pub fn hours(&self) -> u64 {
        self.total_micros / 3_600_000_000
    }

    #[inline]
    pub fn minutes(&self) -> u64 {
        self.total_micros / 60_000_000 % 60
    }

    #[inline]
    pub fn seconds(&self) -> u64 {
        self.total_micros / 1_000_000 % 60
    }

    #[inline]
    pub fn millis(&self) -> u64 {
        self.total_micros / 1_000 % 1_000
    }
}
impl TryFrom<core::time::Duration> for MetricTimeSpan {
    type Error = Error;

    /// Fails if the duration does not fit in 64 bits of microseconds.
    fn try_from(duration: core::time::Duration) -> Result<MetricTimeSpan> {
        let micros = u64::try_from(duration.as_micros())
            .map_err(|_| err_invalid!("duration overflows 64 bits of microseconds"))?;
        Ok(MetricTimeSpan::from_micros(micros))
    }
}
impl From<MetricTimeSpan> for core::time::Duration {
    fn from(span: MetricTimeSpan) -> core::time::Duration {
        core::time::Duration::from_micros(span.total_micros)
    }
}
impl fmt::Display for MetricTimeSpan {
    /// Formats as `hours:minutes:seconds:milliseconds`, dropping sub-millisecond precision.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.hours(),
            self.minutes(),
            self.seconds(),
            self.millis()
        )
    }
}

/// A tuplet ratio: `notes` notes played in the space of `space` regular notes.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Tuplet {
    notes: u32,
    space: u32,
}
impl Tuplet {
    /// Three notes in the space of two.
    pub const TRIPLET: Tuplet = Tuplet { notes: 3, space: 2 };
    /// Two notes in the space of three.
    pub const DUPLET: Tuplet = Tuplet { notes: 2, space: 3 };

    pub fn new(notes: u32, space: u32) -> Result<Tuplet> {
        ensure!(notes > 0 && space > 0, err_invalid!("tuplet parts must be positive"));
        Ok(Tuplet { notes, space })
    }

    #[inline]
    pub fn notes(&self) -> u32 {
        self.notes
    }

    #[inline]
    pub fn space(&self) -> u32 {
        self.space
    }
}

/// A fraction of a whole note, optionally dotted and tupled.
///
/// Musical spans are pure lengths: they convert into ticks, but there is no canonical musical
/// form for an arbitrary tick count, so they cannot be produced from ticks.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct MusicalTimeSpan {
    numerator: u64,
    denominator: u64,
    dots: u8,
    tuplet: Option<Tuplet>,
}
impl MusicalTimeSpan {
    /// More dots than this would overflow the exact fraction arithmetic.
    pub const MAX_DOTS: u8 = 32;

    pub const WHOLE: MusicalTimeSpan = MusicalTimeSpan::plain(1, 1);
    pub const HALF: MusicalTimeSpan = MusicalTimeSpan::plain(1, 2);
    pub const QUARTER: MusicalTimeSpan = MusicalTimeSpan::plain(1, 4);
    pub const EIGHTH: MusicalTimeSpan = MusicalTimeSpan::plain(1, 8);
    pub const SIXTEENTH: MusicalTimeSpan = MusicalTimeSpan::plain(1, 16);

    const fn plain(numerator: u64, denominator: u64) -> MusicalTimeSpan {
        MusicalTimeSpan {
            numerator,
            denominator,
            dots: 0,
            tuplet: None,
        }
    }

    /// `numerator/denominator` of a whole note.
    pub fn new(numerator: u64, denominator: u64) -> Result<MusicalTimeSpan> {
        ensure!(denominator > 0, err_invalid!("musical denominator must be positive"));
        Ok(MusicalTimeSpan::plain(numerator, denominator))
    }

    /// Apply `dots` augmentation dots, each adding half of the previous value.
    pub fn dotted(self, dots: u8) -> Result<MusicalTimeSpan> {
        ensure!(dots <= Self::MAX_DOTS, err_invalid!("too many dots"));
        Ok(MusicalTimeSpan { dots, ..self })
    }

    /// Play this length as part of a tuplet.
    #[inline]
    pub fn tupled(self, tuplet: Tuplet) -> MusicalTimeSpan {
        MusicalTimeSpan {
            tuplet: Some(tuplet),
            ..self
        }
    }

    #[inline]
    pub fn triplet(self) -> MusicalTimeSpan {
        self.tupled(Tuplet::TRIPLET)
    }

    #[inline]
    pub fn duplet(self) -> MusicalTimeSpan {
        self.tupled(Tuplet::DUPLET)
    }

    #[inline]
    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    #[inline]
    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    #[inline]
    pub fn dots(&self) -> u8 {
        self.dots
    }

    #[inline]
    pub fn tuplet(&self) -> Option<Tuplet> {
        self.tuplet
    }

    /// The exact length as a fraction of a whole note, with dots and tuplet folded in.
    ///
    /// The fraction is not reduced.
    pub fn fraction(&self) -> Result<(u128, u128)> {
        let dots = self.dots as u32;
        //Each dot multiplies by 3/2, cumulatively: (2^(k+1) - 1) / 2^k
        let (dot_num, dot_den) = ((1u128 << (dots + 1)) - 1, 1u128 << dots);
        let (tup_num, tup_den) = match self.tuplet {
            Some(t) => (t.space as u128, t.notes as u128),
            None => (1, 1),
        };
        let num = (self.numerator as u128)
            .checked_mul(dot_num)
            .and_then(|n| n.checked_mul(tup_num));
        let den = (self.denominator as u128)
            .checked_mul(dot_den)
            .and_then(|d| d.checked_mul(tup_den));
        match (num, den) {
            (Some(num), Some(den)) => Ok((num, den)),
            _ => bail!(err_invalid!("musical length overflows")),
        }
    }

    /// Build a plain span out of an exact fraction, reducing it first.
    fn from_fraction(num: u128, den: u128) -> Result<MusicalTimeSpan> {
        let g = gcd(num, den).max(1);
        let (num, den) = (num / g, den / g);
        match (u64::try_from(num), u64::try_from(den)) {
            (Ok(num), Ok(den)) => MusicalTimeSpan::new(num, den),
            _ => bail!(err_invalid!("musical length overflows")),
        }
    }
}
impl Default for MusicalTimeSpan {
    fn default() -> MusicalTimeSpan {
        MusicalTimeSpan::plain(0, 1)
    }
}
impl fmt::Display for MusicalTimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(tuplet) = self.tuplet {
            write!(f, "[{}:{}]", tuplet.notes, tuplet.space)?;
        }
        write!(f, "{}/{}", self.numerator, self.denominator)?;
        for _ in 0..self.dots {
            f.write_str(".")?;
        }
        Ok(())
    }
}

/// A span of whole bars, then beats, then leftover ticks.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct BarBeatTicksTimeSpan {
    pub bars: u64,
    pub beats: u64,
    pub ticks: u64,
}
impl BarBeatTicksTimeSpan {
    #[inline]
    pub fn new(bars: u64, beats: u64, ticks: u64) -> BarBeatTicksTimeSpan {
        BarBeatTicksTimeSpan { bars, beats, ticks }
    }
}
impl fmt::Display for BarBeatTicksTimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.bars, self.beats, self.ticks)
    }
}

/// A span of whole bars, then a fractional amount of beats.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct BarBeatFractionTimeSpan {
    bars: u64,
    beats: f64,
}
impl BarBeatFractionTimeSpan {
    pub fn new(bars: u64, beats: f64) -> Result<BarBeatFractionTimeSpan> {
        ensure!(
            beats.is_finite() && beats >= 0.0,
            err_invalid!("beats must be finite and non-negative")
        );
        Ok(BarBeatFractionTimeSpan { bars, beats })
    }

    #[inline]
    pub fn bars(&self) -> u64 {
        self.bars
    }

    #[inline]
    pub fn beats(&self) -> f64 {
        self.beats
    }
}
impl fmt::Display for BarBeatFractionTimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.bars, self.beats)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MathOperation {
    Add,
    Subtract,
}
impl MathOperation {
    fn symbol(self) -> char {
        match self {
            MathOperation::Add => '+',
            MathOperation::Subtract => '-',
        }
    }
}

/// Two spans combined, possibly of different representations.
///
/// The second operand is measured from where the first one ends. When subtracting, it is
/// measured backward from that point, so it sees the tempo and meter of the part being removed.
#[derive(Clone, PartialEq, Debug)]
pub struct MathTimeSpan {
    pub operation: MathOperation,
    pub first: TimeSpan,
    pub second: TimeSpan,
}
impl MathTimeSpan {
    pub fn new(operation: MathOperation, first: TimeSpan, second: TimeSpan) -> MathTimeSpan {
        MathTimeSpan {
            operation,
            first,
            second,
        }
    }
}
impl fmt::Display for MathTimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({} {} {})",
            self.first,
            self.operation.symbol(),
            self.second
        )
    }
}

/// The kinds of time span, for choosing a target representation at runtime.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum TimeSpanType {
    Midi,
    Metric,
    Musical,
    BarBeatTicks,
    BarBeatFraction,
    Math,
}

/// Any time span.
#[derive(Clone, PartialEq, Debug)]
pub enum TimeSpan {
    Midi(MidiTimeSpan),
    Metric(MetricTimeSpan),
    Musical(MusicalTimeSpan),
    BarBeatTicks(BarBeatTicksTimeSpan),
    BarBeatFraction(BarBeatFractionTimeSpan),
    Math(Box<MathTimeSpan>),
}
impl TimeSpan {
    pub fn kind(&self) -> TimeSpanType {
        match self {
            TimeSpan::Midi(_) => TimeSpanType::Midi,
            TimeSpan::Metric(_) => TimeSpanType::Metric,
            TimeSpan::Musical(_) => TimeSpanType::Musical,
            TimeSpan::BarBeatTicks(_) => TimeSpanType::BarBeatTicks,
            TimeSpan::BarBeatFraction(_) => TimeSpanType::BarBeatFraction,
            TimeSpan::Math(_) => TimeSpanType::Math,
        }
    }

    /// Sum of two spans.
    ///
    /// Spans of the same representation are combined directly; otherwise the result is a
    /// `Math` span, resolved only when converted against a tempo map.
    pub fn add(&self, other: &TimeSpan) -> Result<TimeSpan> {
        use TimeSpan::*;
        const OVERFLOW: &ErrorKind = err_invalid!("time span sum overflows");
        Ok(match (self, other) {
            (Midi(a), Midi(b)) => Midi(MidiTimeSpan(a.0.checked_add(b.0).ok_or(OVERFLOW)?)),
            (Metric(a), Metric(b)) => Metric(MetricTimeSpan::from_micros(
                a.total_micros.checked_add(b.total_micros).ok_or(OVERFLOW)?,
            )),
            (Musical(a), Musical(b)) => {
                let ((an, ad), (bn, bd)) = (a.fraction()?, b.fraction()?);
                let num = an
                    .checked_mul(bd)
                    .zip(bn.checked_mul(ad))
                    .and_then(|(x, y)| x.checked_add(y))
                    .ok_or(OVERFLOW)?;
                let den = ad.checked_mul(bd).ok_or(OVERFLOW)?;
                Musical(MusicalTimeSpan::from_fraction(num, den)?)
            }
            (BarBeatTicks(a), BarBeatTicks(b)) => BarBeatTicks(BarBeatTicksTimeSpan {
                bars: a.bars.checked_add(b.bars).ok_or(OVERFLOW)?,
                beats: a.beats.checked_add(b.beats).ok_or(OVERFLOW)?,
                ticks: a.ticks.checked_add(b.ticks).ok_or(OVERFLOW)?,
            }),
            (BarBeatFraction(a), BarBeatFraction(b)) => {
                BarBeatFraction(BarBeatFractionTimeSpan::new(
                    a.bars.checked_add(b.bars).ok_or(OVERFLOW)?,
                    a.beats + b.beats,
                )?)
            }
            _ => self.combine(MathOperation::Add, other),
        })
    }

    /// Difference of two spans.
    ///
    /// Same-representation differences that would go negative, in total or in any bar/beat
    /// component, fail with `InvalidArgument`.
    pub fn subtract(&self, other: &TimeSpan) -> Result<TimeSpan> {
        use TimeSpan::*;
        const NEGATIVE: &ErrorKind = err_invalid!("time span difference is negative");
        Ok(match (self, other) {
            (Midi(a), Midi(b)) => Midi(MidiTimeSpan(a.0.checked_sub(b.0).ok_or(NEGATIVE)?)),
            (Metric(a), Metric(b)) => Metric(MetricTimeSpan::from_micros(
                a.total_micros.checked_sub(b.total_micros).ok_or(NEGATIVE)?,
            )),
            (Musical(a), Musical(b)) => {
                let ((an, ad), (bn, bd)) = (a.fraction()?, b.fraction()?);
                let (x, y) = an
                    .checked_mul(bd)
                    .zip(bn.checked_mul(ad))
                    .ok_or(err_invalid!("musical length overflows"))?;
                let den = ad
                    .checked_mul(bd)
                    .ok_or(err_invalid!("musical length overflows"))?;
                Musical(MusicalTimeSpan::from_fraction(
                    x.checked_sub(y).ok_or(NEGATIVE)?,
                    den,
                )?)
            }
            (BarBeatTicks(a), BarBeatTicks(b)) => BarBeatTicks(BarBeatTicksTimeSpan {
                bars: a.bars.checked_sub(b.bars).ok_or(NEGATIVE)?,
                beats: a.beats.checked_sub(b.beats).ok_or(NEGATIVE)?,
                ticks: a.ticks.checked_sub(b.ticks).ok_or(NEGATIVE)?,
            }),
            (BarBeatFraction(a), BarBeatFraction(b)) => {
                ensure!(a.beats >= b.beats, NEGATIVE);
                BarBeatFraction(BarBeatFractionTimeSpan::new(
                    a.bars.checked_sub(b.bars).ok_or(NEGATIVE)?,
                    a.beats - b.beats,
                )?)
            }
            _ => self.combine(MathOperation::Subtract, other),
        })
    }

    /// Scale a span by a non-negative factor, rounding integral components.
    pub fn multiply(&self, factor: f64) -> Result<TimeSpan> {
        use TimeSpan::*;
        ensure!(
            factor.is_finite() && factor >= 0.0,
            err_invalid!("factor must be finite and non-negative")
        );
        let scale = |x: u64| -> Result<u64> {
            let scaled = (x as f64 * factor).round();
            ensure!(
                scaled <= u64::MAX as f64,
                err_invalid!("scaled time span overflows")
            );
            Ok(scaled as u64)
        };
        Ok(match self {
            Midi(a) => Midi(MidiTimeSpan(scale(a.0)?)),
            Metric(a) => Metric(MetricTimeSpan::from_micros(scale(a.total_micros)?)),
            Musical(a) => {
                //Keep six decimal digits of the factor exact
                const PRECISION: u128 = 1_000_000;
                let (num, den) = a.fraction()?;
                let factor = (factor * PRECISION as f64).round() as u128;
                let num = num
                    .checked_mul(factor)
                    .ok_or(err_invalid!("musical length overflows"))?;
                let den = den
                    .checked_mul(PRECISION)
                    .ok_or(err_invalid!("musical length overflows"))?;
                Musical(MusicalTimeSpan::from_fraction(num, den)?)
            }
            BarBeatTicks(a) => BarBeatTicks(BarBeatTicksTimeSpan {
                bars: scale(a.bars)?,
                beats: scale(a.beats)?,
                ticks: scale(a.ticks)?,
            }),
            BarBeatFraction(a) => {
                BarBeatFraction(BarBeatFractionTimeSpan::new(scale(a.bars)?, a.beats * factor)?)
            }
            Math(m) => Math(Box::new(MathTimeSpan::new(
                m.operation,
                m.first.multiply(factor)?,
                m.second.multiply(factor)?,
            ))),
        })
    }

    /// Ratio between two spans of the same representation.
    ///
    /// Bar/beat spans have no proportional division, since the length of a bar depends on
    /// where it lies, and neither do `Math` spans.
    pub fn divide(&self, other: &TimeSpan) -> Result<f64> {
        use TimeSpan::*;
        const BY_ZERO: &ErrorKind = err_invalid!("division by a zero time span");
        match (self, other) {
            (Midi(a), Midi(b)) => {
                ensure!(b.0 > 0, BY_ZERO);
                Ok(a.0 as f64 / b.0 as f64)
            }
            (Metric(a), Metric(b)) => {
                ensure!(b.total_micros > 0, BY_ZERO);
                Ok(a.total_micros as f64 / b.total_micros as f64)
            }
            (Musical(a), Musical(b)) => {
                let ((an, ad), (bn, bd)) = (a.fraction()?, b.fraction()?);
                ensure!(bn > 0, BY_ZERO);
                Ok((an as f64 * bd as f64) / (ad as f64 * bn as f64))
            }
            (BarBeatTicks(_), BarBeatTicks(_)) | (BarBeatFraction(_), BarBeatFraction(_)) => {
                bail!(err_unsupported!("bar/beat spans cannot be divided"))
            }
            (Math(_), _) | (_, Math(_)) => bail!(err_unsupported!("math spans cannot be divided")),
            _ => bail!(err_unsupported!("cannot divide spans of different representations")),
        }
    }

    fn combine(&self, operation: MathOperation, other: &TimeSpan) -> TimeSpan {
        TimeSpan::Math(Box::new(MathTimeSpan::new(
            operation,
            self.clone(),
            other.clone(),
        )))
    }
}
impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeSpan::Midi(s) => fmt::Display::fmt(s, f),
            TimeSpan::Metric(s) => fmt::Display::fmt(s, f),
            TimeSpan::Musical(s) => fmt::Display::fmt(s, f),
            TimeSpan::BarBeatTicks(s) => fmt::Display::fmt(s, f),
            TimeSpan::BarBeatFraction(s) => fmt::Display::fmt(s, f),
            TimeSpan::Math(s) => fmt::Display::fmt(s, f),
        }
    }
}

macro_rules! impl_from_span {
    {$( $variant:ident ( $ty:ty ) ),*} => {
        $(
            impl From<$ty> for TimeSpan {
                #[inline]
                fn from(span: $ty) -> TimeSpan {
                    TimeSpan::$variant(span.into())
                }
            }
        )*
    };
}
impl_from_span! {
    Midi(MidiTimeSpan),
    Metric(MetricTimeSpan),
    Musical(MusicalTimeSpan),
    BarBeatTicks(BarBeatTicksTimeSpan),
    BarBeatFraction(BarBeatFractionTimeSpan),
    Math(MathTimeSpan)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
