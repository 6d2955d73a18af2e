//! Text grammars for every time span representation.
//!
//! Each representation has its own parser, returning a tri-state [`Parsing`]: the text either
//! parses, does not look like the representation at all, or looks like it but carries an
//! unusable component. [`parse_time_span`] tries every parser in turn, moving on only when a
//! parser does not match.
//!
//! The accepted forms are:
//!
//! - Midi: `960`
//! - Bar/beat/ticks: `2.1.240`
//! - Bar/beat fraction: `2_1.5`
//! - Metric: `0:1:30:250` (`h:m:s:ms`), `0:1:30` (`h:m:s`), `1:30` (`m:s`) or any ordered
//!   combination of `1h`, `2m`, `3s` and `4ms`
//! - Musical: `3/8`, or one of `w`, `h`, `q`, `e`, `s`; followed by any amount of dots and an
//!   optional `t` (triplet) or `d` (duplet). A `[notes:space]` tuplet may precede or follow.
//! - Math: two spans joined by `+` or `-`, optionally parenthesized

use crate::{
    prelude::*,
    span::{
        BarBeatFractionTimeSpan, BarBeatTicksTimeSpan, MathOperation, MathTimeSpan,
        MetricTimeSpan, MidiTimeSpan, MusicalTimeSpan, TimeSpan, TimeSpanType, Tuplet,
    },
};
use regex::{Captures, Regex};
use std::{str::FromStr, sync::OnceLock};

/// The outcome of a single representation parser.
#[derive(Clone, PartialEq, Debug)]
pub enum Parsing<T> {
    Parsed(T),
    /// The text is not in this representation's format.
    NotMatched,
    /// The text is in this representation's format, but a component is unusable.
    OutOfRange(&'static str),
}
impl<T> Parsing<T> {
    #[inline]
    pub fn is_parsed(&self) -> bool {
        matches!(self, Parsing::Parsed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsing<U> {
        match self {
            Parsing::Parsed(value) => Parsing::Parsed(f(value)),
            Parsing::NotMatched => Parsing::NotMatched,
            Parsing::OutOfRange(msg) => Parsing::OutOfRange(msg),
        }
    }

    pub fn into_result(self) -> StdResult<T, ParseError> {
        match self {
            Parsing::Parsed(value) => Ok(value),
            Parsing::NotMatched => Err(ParseError::NotMatched),
            Parsing::OutOfRange(msg) => Err(ParseError::OutOfRange(msg)),
        }
    }
}
impl<T> From<StdResult<T, &'static str>> for Parsing<T> {
    fn from(res: StdResult<T, &'static str>) -> Parsing<T> {
        match res {
            Ok(value) => Parsing::Parsed(value),
            Err(msg) => Parsing::OutOfRange(msg),
        }
    }
}

macro_rules! grammar {
    ($pattern:expr) => {{
        static GRAMMAR: OnceLock<Regex> = OnceLock::new();
        GRAMMAR.get_or_init(|| Regex::new($pattern).expect("time span grammar must compile"))
    }};
}

macro_rules! captures_or_skip {
    ($grammar:expr, $text:expr) => {
        match $grammar.captures($text) {
            Some(caps) => caps,
            None => return Parsing::NotMatched,
        }
    };
}

/// Parse a named integer group, or `None` if the group did not participate.
fn int_group<T: FromStr>(
    caps: &Captures,
    name: &str,
    msg: &'static str,
) -> StdResult<Option<T>, &'static str> {
    caps.name(name)
        .map(|m| m.as_str().parse::<T>().map_err(|_| msg))
        .transpose()
}

/// Parse a named integer group that always participates in the match.
fn int<T: FromStr>(caps: &Captures, name: &str, msg: &'static str) -> StdResult<T, &'static str> {
    int_group(caps, name, msg)?.ok_or(msg)
}

pub fn parse_midi(text: &str) -> Parsing<MidiTimeSpan> {
    let caps = captures_or_skip!(grammar!(r"^(?P<ticks>\d+)$"), text);
    int(&caps, "ticks", "tick count out of range")
        .map(MidiTimeSpan)
        .into()
}

pub fn parse_bar_beat_ticks(text: &str) -> Parsing<BarBeatTicksTimeSpan> {
    let caps = captures_or_skip!(
        grammar!(r"^(?P<bars>\d+)\.(?P<beats>\d+)\.(?P<ticks>\d+)$"),
        text
    );
    bar_beat_ticks(&caps).into()
}

fn bar_beat_ticks(caps: &Captures) -> StdResult<BarBeatTicksTimeSpan, &'static str> {
    Ok(BarBeatTicksTimeSpan::new(
        int(caps, "bars", "bar count out of range")?,
        int(caps, "beats", "beat count out of range")?,
        int(caps, "ticks", "tick count out of range")?,
    ))
}

pub fn parse_bar_beat_fraction(text: &str) -> Parsing<BarBeatFractionTimeSpan> {
    let caps = captures_or_skip!(
        grammar!(r"^(?P<bars>\d+)_(?P<beats>\d+(?:\.\d+)?)$"),
        text
    );
    bar_beat_fraction(&caps).into()
}

fn bar_beat_fraction(caps: &Captures) -> StdResult<BarBeatFractionTimeSpan, &'static str> {
    let bars = int(caps, "bars", "bar count out of range")?;
    let beats: f64 = caps["beats"]
        .parse()
        .map_err(|_| "beat fraction out of range")?;
    BarBeatFractionTimeSpan::new(bars, beats).map_err(|_| "beat fraction out of range")
}

const METRIC_RANGE: &str = "metric component out of range";

pub fn parse_metric(text: &str) -> Parsing<MetricTimeSpan> {
    let colon = grammar!(
        r"(?x)
        ^(?P<first>\d+)
        :(?P<second>\d+)
        (?: :(?P<third>\d+) )?
        (?: :(?P<fourth>\d+) )?$"
    );
    let suffixed = grammar!(
        r"(?x)
        ^(?: (?P<hours>\d+)h )?
        (?: (?P<minutes>\d+)m )?
        (?: (?P<seconds>\d+)s )?
        (?: (?P<millis>\d+)ms )?$"
    );
    if let Some(caps) = colon.captures(text) {
        return metric_colon(&caps).into();
    }
    let caps = captures_or_skip!(suffixed, text);
    if caps.iter().skip(1).all(|group| group.is_none()) {
        return Parsing::NotMatched;
    }
    metric_suffixed(&caps).into()
}

fn metric_colon(caps: &Captures) -> StdResult<MetricTimeSpan, &'static str> {
    let first: u64 = int(caps, "first", METRIC_RANGE)?;
    let second: u64 = int(caps, "second", METRIC_RANGE)?;
    let (h, m, s, ms) = match (
        int_group(caps, "third", METRIC_RANGE)?,
        int_group(caps, "fourth", METRIC_RANGE)?,
    ) {
        (None, _) => (0, first, second, 0),
        (Some(s), None) => (first, second, s, 0),
        (Some(s), Some(ms)) => (first, second, s, ms),
    };
    //The leading component may exceed its natural range, the rest may not
    let leading_hours = caps.name("third").is_some();
    if (leading_hours && m >= 60) || s >= 60 || ms >= 1_000 {
        return Err(METRIC_RANGE);
    }
    MetricTimeSpan::new(h, m, s, ms).map_err(|_| "metric time span overflows")
}

fn metric_suffixed(caps: &Captures) -> StdResult<MetricTimeSpan, &'static str> {
    MetricTimeSpan::new(
        int_group(caps, "hours", METRIC_RANGE)?.unwrap_or(0),
        int_group(caps, "minutes", METRIC_RANGE)?.unwrap_or(0),
        int_group(caps, "seconds", METRIC_RANGE)?.unwrap_or(0),
        int_group(caps, "millis", METRIC_RANGE)?.unwrap_or(0),
    )
    .map_err(|_| "metric time span overflows")
}

pub fn parse_musical(text: &str) -> Parsing<MusicalTimeSpan> {
    let caps = captures_or_skip!(
        grammar!(
            r"(?x)
            ^(?: \[ (?P<pre_notes>\d+) : (?P<pre_space>\d+) \] )?
            (?:
                (?P<numerator>\d+) / (?P<denominator>\d+)
                |
                (?P<mnemonic>[whqes])
            )
            (?P<dots>\.*)
            (?:
                \[ (?P<post_notes>\d+) : (?P<post_space>\d+) \]
                |
                (?P<tuplet>[td])
            )?$"
        ),
        text
    );
    musical(&caps).into()
}

fn musical(caps: &Captures) -> StdResult<MusicalTimeSpan, &'static str> {
    let base = match caps.name("mnemonic").map(|m| m.as_str()) {
        Some("w") => MusicalTimeSpan::WHOLE,
        Some("h") => MusicalTimeSpan::HALF,
        Some("q") => MusicalTimeSpan::QUARTER,
        Some("e") => MusicalTimeSpan::EIGHTH,
        Some("s") => MusicalTimeSpan::SIXTEENTH,
        _ => {
            let numerator = int(caps, "numerator", "musical numerator out of range")?;
            let denominator = int(caps, "denominator", "musical denominator out of range")?;
            MusicalTimeSpan::new(numerator, denominator)
                .map_err(|_| "musical denominator must be positive")?
        }
    };
    let dots = u8::try_from(caps["dots"].len()).map_err(|_| "too many dots")?;
    let span = base.dotted(dots).map_err(|_| "too many dots")?;

    let pre = bracketed_tuplet(caps, "pre_notes", "pre_space")?;
    let post = match caps.name("tuplet").map(|m| m.as_str()) {
        Some("t") => Some(Tuplet::TRIPLET),
        Some("d") => Some(Tuplet::DUPLET),
        _ => bracketed_tuplet(caps, "post_notes", "post_space")?,
    };
    match (pre, post) {
        (Some(_), Some(_)) => Err("musical span has two tuplets"),
        (Some(tuplet), None) | (None, Some(tuplet)) => Ok(span.tupled(tuplet)),
        (None, None) => Ok(span),
    }
}

fn bracketed_tuplet(
    caps: &Captures,
    notes: &str,
    space: &str,
) -> StdResult<Option<Tuplet>, &'static str> {
    match (
        int_group(caps, notes, "tuplet out of range")?,
        int_group(caps, space, "tuplet out of range")?,
    ) {
        (Some(notes), Some(space)) => Tuplet::new(notes, space)
            .map(Some)
            .map_err(|_| "tuplet parts must be positive"),
        _ => Ok(None),
    }
}

pub fn parse_math(text: &str) -> Parsing<MathTimeSpan> {
    let inner = strip_parens(text);
    let (idx, operation) = match top_level_operator(inner) {
        Some(found) => found,
        None => return Parsing::NotMatched,
    };
    let first = match parse_time_span(strip_parens(&inner[..idx])) {
        Ok(span) => span,
        Err(ParseError::NotMatched) => return Parsing::NotMatched,
        Err(ParseError::OutOfRange(msg)) => return Parsing::OutOfRange(msg),
    };
    let second = match parse_time_span(strip_parens(&inner[idx + 1..])) {
        Ok(span) => span,
        Err(ParseError::NotMatched) => return Parsing::NotMatched,
        Err(ParseError::OutOfRange(msg)) => return Parsing::OutOfRange(msg),
    };
    Parsing::Parsed(MathTimeSpan::new(operation, first, second))
}

/// Remove every pair of parentheses that encloses the whole text.
fn strip_parens(mut text: &str) -> &str {
    text = text.trim();
    while encloses(text) {
        text = text[1..text.len() - 1].trim();
    }
    text
}

/// Whether the text opens with a parenthesis that closes at its very end.
fn encloses(text: &str) -> bool {
    if !(text.starts_with('(') && text.ends_with(')')) {
        return false;
    }
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// The last `+` or `-` outside of any parentheses, so that chains associate to the left.
fn top_level_operator(text: &str) -> Option<(usize, MathOperation)> {
    let mut depth = 0i32;
    let mut found = None;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '+' if depth == 0 => found = Some((i, MathOperation::Add)),
            '-' if depth == 0 => found = Some((i, MathOperation::Subtract)),
            _ => {}
        }
    }
    found
}

type SpanParser = fn(&str) -> Parsing<TimeSpan>;

/// Parsers in the order they are attempted.
///
/// Grammars are disjoint except for `Math`, which embeds the others, so it goes last.
const PARSERS: &[(TimeSpanType, SpanParser)] = &[
    (TimeSpanType::Midi, |t| parse_midi(t).map(TimeSpan::from)),
    (TimeSpanType::BarBeatTicks, |t| {
        parse_bar_beat_ticks(t).map(TimeSpan::from)
    }),
    (TimeSpanType::BarBeatFraction, |t| {
        parse_bar_beat_fraction(t).map(TimeSpan::from)
    }),
    (TimeSpanType::Metric, |t| parse_metric(t).map(TimeSpan::from)),
    (TimeSpanType::Musical, |t| parse_musical(t).map(TimeSpan::from)),
    (TimeSpanType::Math, |t| parse_math(t).map(TimeSpan::from)),
];

/// Parse a time span in any representation.
pub fn parse_time_span(text: &str) -> StdResult<TimeSpan, ParseError> {
    let text = text.trim();
    for &(kind, parser) in PARSERS {
        match parser(text) {
            Parsing::Parsed(span) => return Ok(span),
            Parsing::NotMatched => trace!("{:?} grammar does not match {:?}", kind, text),
            Parsing::OutOfRange(msg) => return Err(ParseError::OutOfRange(msg)),
        }
    }
    Err(ParseError::NotMatched)
}

macro_rules! impl_from_str {
    {$( $ty:ty => $parser:ident ),*} => {
        $(
            impl FromStr for $ty {
                type Err = ParseError;
                fn from_str(text: &str) -> StdResult<$ty, ParseError> {
                    $parser(text.trim()).into_result()
                }
            }
        )*
    };
}
impl_from_str! {
    MidiTimeSpan => parse_midi,
    MetricTimeSpan => parse_metric,
    MusicalTimeSpan => parse_musical,
    BarBeatTicksTimeSpan => parse_bar_beat_ticks,
    BarBeatFractionTimeSpan => parse_bar_beat_fraction,
    MathTimeSpan => parse_math
}
impl FromStr for TimeSpan {
    type Err = ParseError;
    fn from_str(text: &str) -> StdResult<TimeSpan, ParseError> {
        parse_time_span(text)
    }
}
