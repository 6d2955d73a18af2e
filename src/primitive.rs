//! Simple building-block values that every tempo map is made of.
//! All primitives are small `Copy` types that validate their invariants on construction.

use crate::prelude::*;

/// Slightly restricted integers.
macro_rules! restricted_int {
    {$(#[$attr:meta])* $name:ident : $inner:tt => $bits:expr} => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
        #[repr(transparent)]
        #[allow(non_camel_case_types)]
        pub struct $name($inner);
        impl From<$inner> for $name {
            /// Lossy conversion, loses the top bits.
            #[inline]
            fn from(raw: $inner) -> $name {
                $name::from_int_lossy(raw)
            }
        }
        impl From<$name> for $inner {
            #[inline]
            fn from(restricted: $name) -> $inner {restricted.0}
        }
        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
        impl $name {
            const MASK: $inner = (1 << $bits) - 1;

            /// The maximum value that this restricted integer can hold.
            #[inline]
            pub const fn max_value() -> $name {
                $name (Self::MASK)
            }

            /// Creates a restricted int from its non-restricted counterpart by masking off the
            /// extra bits.
            #[inline]
            pub const fn new(raw: $inner) -> $name {
                $name (raw & Self::MASK)
            }

            /// Creates a restricted int from its non-restricted counterpart by masking off the
            /// extra bits.
            #[inline]
            pub const fn from_int_lossy(raw: $inner) -> $name {
                $name (raw & Self::MASK)
            }

            /// Returns `Some` if the raw integer is within range of the restricted integer, and
            /// `None` otherwise.
            #[inline]
            pub fn try_from(raw: $inner) -> Option<$name> {
                if raw <= Self::MASK {
                    Some($name(raw))
                }else{
                    None
                }
            }

            /// Get the inner integer out of the wrapper.
            /// The inner integer is guaranteed to be in range of the restricted wrapper.
            #[inline]
            pub fn as_int(self) -> $inner {
                Into::into(self)
            }
        }
        impl PartialEq<$inner> for $name {
            fn eq(&self, rhs: &$inner) -> bool {
                self.as_int() == *rhs
            }
        }
        impl PartialOrd<$inner> for $name {
            fn partial_cmp(&self, rhs: &$inner) -> Option<core::cmp::Ordering> {
                Some(self.as_int().cmp(rhs))
            }
        }
    };
}
restricted_int! {
    /// A 15-bit integer type.
    ///
    /// Wraps the `u16` type and ensures that the top bit is always zero.
    u15: u16 => 15
}
restricted_int! {
    /// A 24-bit integer type.
    ///
    /// Wraps the `u32` type and ensures that the top 8 bits are always zero.
    /// Tempo meta events store their microseconds-per-quarter-note in this width.
    u24: u32 => 24
}

/// The resolution of a single MIDI tick.
/// This can be in ticks/beat or ticks/second.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum TimeDivision {
    /// Specifies ticks/quarter-note as a 15-bit integer.
    ///
    /// The length of a quarter note is not fixed, so the real duration of a tick depends on the
    /// tempo active at that tick.
    TicksPerQuarterNote(u15),
    /// Specifies ticks/second by dividing a second into frames and then into subframes.
    /// Therefore the length of a tick is `1/fps/subframe`, regardless of tempo.
    Smpte(Fps, u8),
}
impl TimeDivision {
    /// Create a ticks-per-quarter-note division, rejecting zero and values wider than 15 bits.
    pub fn ticks_per_quarter_note(tpqn: u16) -> Result<TimeDivision> {
        let tpqn =
            u15::try_from(tpqn).ok_or(err_invalid!("ticks per quarter note exceed 15 bits"))?;
        ensure!(tpqn.as_int() > 0, err_invalid!("ticks per quarter note must be positive"));
        Ok(TimeDivision::TicksPerQuarterNote(tpqn))
    }

    /// Create an SMPTE division, rejecting a zero subframe count.
    pub fn smpte(fps: Fps, ticks_per_frame: u8) -> Result<TimeDivision> {
        ensure!(ticks_per_frame > 0, err_invalid!("ticks per frame must be positive"));
        Ok(TimeDivision::Smpte(fps, ticks_per_frame))
    }

    /// Decode the 16-bit division word of an SMF header.
    pub fn from_raw(raw: u16) -> Result<TimeDivision> {
        if bit_range(raw, 15..16) != 0 {
            //Smpte, fps is stored as a negative byte
            let fps = (bit_range(raw, 8..16) as u8 as i8).wrapping_neg();
            let subframe = bit_range(raw, 0..8) as u8;
            let fps = Fps::from_int(fps as u8).ok_or(err_invalid!("invalid smpte fps"))?;
            TimeDivision::smpte(fps, subframe)
        } else {
            TimeDivision::ticks_per_quarter_note(raw)
        }
    }

    /// Encode this division as the 16-bit word stored in an SMF header.
    pub fn to_raw(&self) -> u16 {
        match self {
            TimeDivision::TicksPerQuarterNote(tpqn) => tpqn.as_int(),
            TimeDivision::Smpte(fps, ticks_per_frame) => {
                u16::from_be_bytes([(-(fps.as_int() as i8)) as u8, *ticks_per_frame])
            }
        }
    }

    /// The ticks-per-quarter-note resolution, if this is a metrical division.
    ///
    /// Musical and bar/beat representations are only meaningful with a metrical division, so
    /// an SMPTE division yields `UnsupportedConversion`.
    pub fn quarter_note_ticks(&self) -> Result<u64> {
        match self {
            TimeDivision::TicksPerQuarterNote(tpqn) => {
                ensure!(tpqn.as_int() > 0, err_invalid!("ticks per quarter note must be positive"));
                Ok(tpqn.as_int() as u64)
            }
            TimeDivision::Smpte(..) => {
                bail!(err_unsupported!("representation requires a ticks per quarter note division"))
            }
        }
    }

    /// Ticks in a whole note, `4 * tpqn`.
    #[inline]
    pub fn whole_note_ticks(&self) -> Result<u64> {
        Ok(4 * self.quarter_note_ticks()?)
    }
}
impl Default for TimeDivision {
    /// 96 ticks per quarter note, a common resolution for sequencers.
    fn default() -> TimeDivision {
        TimeDivision::TicksPerQuarterNote(u15::new(96))
    }
}

/// One of the four FPS values available for SMPTE times, as defined by the MIDI standard.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Fps {
    /// 24 frames per second.
    Fps24,
    /// 25 frames per second.
    Fps25,
    /// Actually `29.97 = 30 / 1.001` frames per second.
    ///
    /// Quite an exotic value because of interesting historical reasons.
    Fps29,
    /// 30 frames per second.
    Fps30,
}
impl Fps {
    /// Converts an integer representing the semantic fps to an `Fps` value (ie. `24` -> `Fps24`).
    #[inline]
    pub fn from_int(raw: u8) -> Option<Fps> {
        Some(match raw {
            24 => Fps::Fps24,
            25 => Fps::Fps25,
            29 => Fps::Fps29,
            30 => Fps::Fps30,
            _ => return None,
        })
    }

    /// Get the integral approximate fps out.
    #[inline]
    pub fn as_int(self) -> u8 {
        match self {
            Fps::Fps24 => 24,
            Fps::Fps25 => 25,
            Fps::Fps29 => 29,
            Fps::Fps30 => 30,
        }
    }

    /// Get the exact fps as a `(numerator, denominator)` pair of frames per second.
    #[inline]
    pub fn as_ratio(self) -> (u64, u64) {
        match self {
            Fps::Fps24 => (24, 1),
            Fps::Fps25 => (25, 1),
            Fps::Fps29 => (30000, 1001),
            Fps::Fps30 => (30, 1),
        }
    }

    /// Get the actual `f64` fps out.
    #[inline]
    pub fn as_f64(self) -> f64 {
        let (num, den) = self.as_ratio();
        num as f64 / den as f64
    }
}
impl From<Fps> for u8 {
    fn from(x: Fps) -> Self {
        x.as_int()
    }
}

/// A tempo, in microseconds per quarter note.
///
/// Always positive. The default tempo of a MIDI file is 500000µs per quarter note, that is,
/// 120 beats per minute.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Tempo(u32);
impl Tempo {
    /// The tempo assumed when a file has no tempo events, 120 BPM.
    pub const DEFAULT: Tempo = Tempo(500_000);

    /// Create a tempo from microseconds per quarter note.
    #[inline]
    pub fn new(micros_per_quarter: u32) -> Result<Tempo> {
        ensure!(micros_per_quarter > 0, err_invalid!("tempo must be positive"));
        Ok(Tempo(micros_per_quarter))
    }

    /// Create a tempo from quarter notes per minute, rounding to the nearest microsecond.
    pub fn from_bpm(bpm: f64) -> Result<Tempo> {
        ensure!(bpm.is_finite() && bpm > 0.0, err_invalid!("bpm must be positive and finite"));
        let micros = (60_000_000.0 / bpm).round();
        ensure!(
            micros >= 1.0 && micros <= u32::MAX as f64,
            err_invalid!("bpm out of representable range")
        );
        Tempo::new(micros as u32)
    }

    /// Microseconds per quarter note.
    #[inline]
    pub fn as_micros(self) -> u32 {
        self.0
    }

    /// Quarter notes per minute.
    #[inline]
    pub fn bpm(self) -> f64 {
        60_000_000.0 / self.0 as f64
    }
}
impl Default for Tempo {
    #[inline]
    fn default() -> Tempo {
        Tempo::DEFAULT
    }
}

/// A musical meter, like `3/4` or `6/8`.
///
/// The numerator is positive and the denominator is a positive power of two.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TimeSignature {
    numerator: u16,
    denominator: u16,
}
impl TimeSignature {
    /// Common time.
    pub const DEFAULT: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    pub fn new(numerator: u16, denominator: u16) -> Result<TimeSignature> {
        ensure!(numerator > 0, err_invalid!("time signature numerator must be positive"));
        ensure!(
            denominator.is_power_of_two(),
            err_invalid!("time signature denominator must be a power of two")
        );
        Ok(TimeSignature {
            numerator,
            denominator,
        })
    }

    #[inline]
    pub fn numerator(&self) -> u16 {
        self.numerator
    }

    #[inline]
    pub fn denominator(&self) -> u16 {
        self.denominator
    }

    /// Length of one beat in ticks, given the ticks in a quarter note.
    ///
    /// Fails if the resolution is too coarse to express a single beat.
    pub fn beat_length(&self, quarter_note_ticks: u64) -> Result<u64> {
        let len = 4 * quarter_note_ticks / self.denominator as u64;
        ensure!(len > 0, err_unsupported!("time division too coarse for time signature"));
        Ok(len)
    }

    /// Length of one bar in ticks, given the ticks in a quarter note.
    #[inline]
    pub fn bar_length(&self, quarter_note_ticks: u64) -> Result<u64> {
        Ok(self.numerator as u64 * self.beat_length(quarter_note_ticks)?)
    }
}
impl Default for TimeSignature {
    #[inline]
    fn default() -> TimeSignature {
        TimeSignature::DEFAULT
    }
}
impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}
