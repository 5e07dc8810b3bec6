//! Query time spans
//!
//! A [`TimeSpanSpec`] is the partially filled window a caller asks for. It
//! is resolved exactly once into a [`TimeSpan`] in which every field is
//! known:
//!
//! ```text
//! period sources:  (start, end) | width | (window_count, window_width)
//! anchors:         start | end
//! windows:         window_count | window_width
//! ```
//!
//! Exactly one period source must be authoritative. Missing categories are
//! defaulted (window count 240, `end = now`, width of one day) before the
//! remaining fields are derived from the authoritative ones.

use super::duration::deserialize_opt;
use super::error::{SpanError, SpanResult};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Default width used when no period source is given
pub const DEFAULT_WIDTH_DAYS: i64 = 1;

/// Default number of aggregation windows when neither window field is given
pub const DEFAULT_WINDOW_COUNT: u32 = 240;

/// A partially specified time window
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSpanSpec {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt")]
    pub width: Option<Duration>,
    #[serde(default)]
    pub window_count: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt")]
    pub window_width: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodSource {
    Bounds,
    Width,
    Windows,
}

impl std::fmt::Display for PeriodSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bounds => write!(f, "(start, end)"),
            Self::Width => write!(f, "width"),
            Self::Windows => write!(f, "(window_count, window_width)"),
        }
    }
}

/// Which of the span's fields are currently pinned
#[derive(Debug)]
struct Fixers {
    period: Vec<PeriodSource>,
    anchors: usize,
    windows: usize,
}

impl Fixers {
    fn classify(spec: &TimeSpanSpec) -> Self {
        let mut period = Vec::new();
        if spec.start.is_some() && spec.end.is_some() {
            period.push(PeriodSource::Bounds);
        }
        if spec.width.is_some() {
            period.push(PeriodSource::Width);
        }
        if spec.window_count.is_some() && spec.window_width.is_some() {
            period.push(PeriodSource::Windows);
        }

        let anchors = spec.start.is_some() as usize + spec.end.is_some() as usize;
        let windows = spec.window_count.is_some() as usize + spec.window_width.is_some() as usize;

        Self {
            period,
            anchors,
            windows,
        }
    }

    fn over_constrained(&self) -> bool {
        self.period.len() > 1
            || (self.anchors > 1 && !self.period.contains(&PeriodSource::Bounds))
    }

    fn under_constrained(&self) -> bool {
        self.period.is_empty() || self.anchors == 0 || self.windows == 0
    }

    fn describe(&self) -> String {
        self.period
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

impl TimeSpanSpec {
    /// Empty spec; resolves entirely from defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the start anchor
    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Builder method: set the end anchor
    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Builder method: set the width
    pub fn width(mut self, width: Duration) -> Self {
        self.width = Some(width);
        self
    }

    /// Builder method: set the number of aggregation windows
    pub fn window_count(mut self, count: u32) -> Self {
        self.window_count = Some(count);
        self
    }

    /// Builder method: set the aggregation window width
    pub fn window_width(mut self, width: Duration) -> Self {
        self.window_width = Some(width);
        self
    }

    /// Resolve against the current wall clock
    pub fn resolve_now(&self) -> SpanResult<TimeSpan> {
        self.resolve(Utc::now())
    }

    /// Resolve into a fully determined span, using `now` as the default end
    ///
    /// # Panics
    ///
    /// Panics if injecting a default re-introduces an over-constrained state.
    /// That can only happen through a bug in the solver, never through input.
    pub fn resolve(&self, now: DateTime<Utc>) -> SpanResult<TimeSpan> {
        if self.window_count == Some(0) {
            return Err(SpanError::InvalidWindow(
                "window_count must be at least 1".to_string(),
            ));
        }
        if self.window_width.is_some_and(|w| w <= Duration::zero()) {
            return Err(SpanError::InvalidWindow(
                "window_width must be positive".to_string(),
            ));
        }

        let mut fixers = Fixers::classify(self);
        if fixers.over_constrained() {
            return Err(SpanError::OverConstrained(if fixers.period.len() > 1 {
                format!("period given by {}", fixers.describe())
            } else {
                "both start and end given alongside another period".to_string()
            }));
        }

        let mut spec = self.clone();
        while fixers.under_constrained() {
            if fixers.windows == 0 {
                spec.window_count = Some(DEFAULT_WINDOW_COUNT);
            } else if spec.end.is_none() {
                spec.end = Some(now);
            } else if spec.width.is_none() {
                spec.width = Some(Duration::days(DEFAULT_WIDTH_DAYS));
            } else {
                panic!("time span solver made no progress on {:?}", spec);
            }

            fixers = Fixers::classify(&spec);
            if fixers.over_constrained() {
                panic!(
                    "time span solver over-constrained {:?} while applying defaults; input was {:?}",
                    spec, self
                );
            }
        }

        spec.fill_remainder(&fixers)
    }

    fn fill_remainder(&self, fixers: &Fixers) -> SpanResult<TimeSpan> {
        let (window_count, window_width) = (self.window_count, self.window_width);

        let period = match (fixers.period[0], self.start, self.end, self.width) {
            (PeriodSource::Bounds, Some(start), Some(end), _) => end - start,
            (PeriodSource::Width, _, _, Some(width)) => width,
            (PeriodSource::Windows, ..) => match (window_count, window_width) {
                (Some(count), Some(width)) => width
                    .checked_mul(window_factor(count)?)
                    .ok_or_else(|| {
                        SpanError::OutOfRange(format!(
                            "{} windows of {}",
                            count,
                            super::duration::format_duration(width)
                        ))
                    })?,
                _ => unreachable!("windows period source without both window fields"),
            },
            _ => unreachable!("period source classified without its fields"),
        };

        if period <= Duration::zero() {
            return Err(SpanError::NonPositivePeriod);
        }

        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start, shift(start, period, Shift::Forward)?),
            (None, Some(end)) => (shift(end, period, Shift::Backward)?, end),
            (None, None) => unreachable!("resolved span has no anchor"),
        };

        let (window_count, window_width, window_source) = match (window_count, window_width) {
            (Some(count), Some(width)) => (count, width, WindowSource::Width),
            (Some(count), None) => (count, period / window_factor(count)?, WindowSource::Count),
            (None, Some(width)) => (ceil_div(period, width)?, width, WindowSource::Width),
            (None, None) => unreachable!("resolved span has no window"),
        };

        Ok(TimeSpan {
            start,
            end,
            width: period,
            window_count,
            window_width,
            window_source,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Shift {
    Forward,
    Backward,
}

/// Move an anchor by the period without leaving chrono's date range
fn shift(anchor: DateTime<Utc>, period: Duration, direction: Shift) -> SpanResult<DateTime<Utc>> {
    let moved = match direction {
        Shift::Forward => anchor.checked_add_signed(period),
        Shift::Backward => anchor.checked_sub_signed(period),
    };
    moved.ok_or_else(|| {
        SpanError::OutOfRange(format!(
            "{} {} {}",
            anchor.to_rfc3339(),
            match direction {
                Shift::Forward => "+",
                Shift::Backward => "-",
            },
            super::duration::format_duration(period)
        ))
    })
}

fn window_factor(count: u32) -> SpanResult<i32> {
    i32::try_from(count)
        .map_err(|_| SpanError::InvalidWindow(format!("window_count {} is too large", count)))
}

/// Number of windows of `width` needed to cover `period`, rounding up
fn ceil_div(period: Duration, width: Duration) -> SpanResult<u32> {
    let (p, w) = match (period.num_nanoseconds(), width.num_nanoseconds()) {
        (Some(p), Some(w)) => (p, w),
        _ => (period.num_milliseconds(), width.num_milliseconds()),
    };
    if w <= 0 {
        return Err(SpanError::InvalidWindow(
            "window_width is too small for this period".to_string(),
        ));
    }

    let count = p / w + i64::from(p % w != 0);
    u32::try_from(count)
        .map_err(|_| SpanError::InvalidWindow(format!("{} windows exceed the supported count", count)))
}

#[derive(Debug, Clone, Copy)]
enum WindowSource {
    Count,
    Width,
}

/// A fully resolved time window
///
/// Immutable once resolved. Equality compares the resolved fields only.
#[derive(Debug, Clone)]
pub struct TimeSpan {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    width: Duration,
    window_count: u32,
    window_width: Duration,
    window_source: WindowSource,
}

impl TimeSpan {
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn width(&self) -> Duration {
        self.width
    }

    pub fn window_count(&self) -> u32 {
        self.window_count
    }

    pub fn window_width(&self) -> Duration {
        self.window_width
    }

    /// Minimal spec that resolves back to this span
    pub fn to_spec(&self) -> TimeSpanSpec {
        let spec = TimeSpanSpec::new().start(self.start).end(self.end);
        match self.window_source {
            WindowSource::Count => spec.window_count(self.window_count),
            WindowSource::Width => spec.window_width(self.window_width),
        }
    }
}

impl PartialEq for TimeSpan {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.width == other.width
            && self.window_count == other.window_count
            && self.window_width == other.window_width
    }
}

impl Eq for TimeSpan {}

impl std::fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} .. {} ({} x {})",
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.window_count,
            super::duration::format_duration(self.window_width)
        )
    }
}
