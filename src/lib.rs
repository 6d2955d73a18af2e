//! # Overview
//!
//! `midly_tempo` converts MIDI tick positions and lengths to and from human-facing time
//! representations: wall-clock time, bars and beats, note fractions, and arithmetic
//! combinations of them.
//!
//! Converting is as simple as:
//!
//! ```rust
//! use midly_tempo::{
//!     convert_time_to, Change, MetricTimeSpan, Tempo, TempoMap, TimeDivision,
//! };
//!
//! let division = TimeDivision::ticks_per_quarter_note(480).unwrap();
//! let map = TempoMap::build(division, vec![(960, Change::Tempo(Tempo::new(1_000_000).unwrap()))]);
//!
//! let time: MetricTimeSpan = convert_time_to(1920, &map).unwrap();
//! assert_eq!(time.total_micros(), 3_000_000);
//! ```
//!
//! The [`TempoMap`](struct.TempoMap.html) struct is the main type in the crate.
//! It holds the tempo and time signature timelines of a file, and every conversion reads from
//! it.
//!
//! # Times and lengths
//!
//! A tick count can stand for a point in time or for the length of something.
//! Points in time are measured from the start of the file, while lengths need to know where
//! they start, since the tempo and meter they cross depend on it:
//!
//! ```rust
//! use midly_tempo::{
//!     convert_length_to, BarBeatTicksTimeSpan, Change, TempoMap, TimeDivision, TimeSignature,
//! };
//!
//! let division = TimeDivision::ticks_per_quarter_note(480).unwrap();
//! let map = TempoMap::build(
//!     division,
//!     vec![(0, Change::TimeSignature(TimeSignature::new(3, 4).unwrap()))],
//! );
//!
//! // One and a half 3/4 bars
//! let len: BarBeatTicksTimeSpan = convert_length_to(2160, 0, &map).unwrap();
//! assert_eq!(len, BarBeatTicksTimeSpan::new(1, 1, 240));
//! ```
//!
//! # Parsing
//!
//! Every time span representation has a textual form, and any of them can be parsed without
//! knowing the representation beforehand:
//!
//! ```rust
//! use midly_tempo::{convert_time_from, TempoMap, TimeSpan};
//!
//! let map = TempoMap::default();
//! let span: TimeSpan = "1:30 + q.".parse().unwrap();
//! let ticks = convert_time_from(&span, &map).unwrap();
//!
//! // 90 seconds at 120 BPM and 96 ticks per quarter note, plus a dotted quarter
//! assert_eq!(ticks, 17_280 + 144);
//! ```
//!
//! # About features
//!
//! The mode in which the crate works is configurable through the use of cargo features.
//! Two optional features are available: `parallel` and `strict`.
//! Only `parallel` is enabled by default.
//!
//! - The `parallel` feature
//!
//!   This feature enables automatic parallelization of `TempoMap::from_tracks` for large inputs
//!   (through the `rayon` dependency).
//!
//! - The `strict` feature
//!
//!   By default tempo and time signature records that violate the MIDI storage format are
//!   skipped with a warning, keeping whatever value was active before them.
//!   By enabling the `strict` feature such records are rejected, throwing errors of the kind
//!   `ErrorKind::Malformed`.
//!
//! # Logging
//!
//! Diagnostics are emitted through the `log` facade. The crate never installs a logger.

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

/// All of the errors this crate produces.
#[macro_use]
mod error;

mod prelude {
    pub(crate) use crate::error::{Error, ErrorKind, ParseError, Result, ResultExt, StdResult};
    pub(crate) use core::{cmp::Ordering, fmt, ops};
    pub(crate) use log::{debug, trace, warn};

    pub(crate) fn bit_range<T>(val: T, range: ops::Range<u32>) -> T
    where
        T: From<u8>
            + ops::Shr<u32, Output = T>
            + ops::Shl<u32, Output = T>
            + ops::Not<Output = T>
            + ops::BitAnd<Output = T>,
    {
        let mask = !((!T::from(0)) << (range.end - range.start));
        (val >> range.start) & mask
    }
}

mod convert;
pub mod parse;
mod primitive;
mod span;
mod tempo_map;
mod timeline;
mod value_line;

pub use crate::{
    convert::{
        convert_length_from, convert_length_to, convert_length_to_type, convert_time_from,
        convert_time_to, convert_time_to_type, FromTicks, IntoTicks,
    },
    error::{Error, ErrorKind, ParseError, Result},
    parse::parse_time_span,
    primitive::{Fps, Tempo, TimeDivision, TimeSignature},
    span::{
        BarBeatFractionTimeSpan, BarBeatTicksTimeSpan, MathOperation, MathTimeSpan,
        MetricTimeSpan, MidiTimeSpan, MusicalTimeSpan, TimeSpan, TimeSpanType, Tuplet,
    },
    tempo_map::{Change, RawChange, TempoMap, TempoMapEditor},
    timeline::{NodeRef, OrderedTimeline},
    value_line::{ValueChange, ValueLine},
};

/// Exotically-sized integers used by the MIDI standard.
pub mod num {
    pub use crate::primitive::{u15, u24};
}

#[cfg(test)]
mod test;
