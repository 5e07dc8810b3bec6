//! Request model
//!
//! - **time_span**: partially specified windows and their resolution
//! - **item**: export requests and strategies
//! - **duration**: `15m` / `2h` / `1d` literals
//! - **error**: span resolution errors
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use fluxplan::model::{ExportStrategy, QueryItem, TimeSpanSpec};
//!
//! let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
//! let span = TimeSpanSpec::new()
//!     .width(Duration::hours(1))
//!     .window_count(4)
//!     .resolve(now)
//!     .unwrap();
//! assert_eq!(span.window_width(), Duration::minutes(15));
//!
//! let item = QueryItem::new("monitors", span, "lab.temp", "temperature", ExportStrategy::Raw)
//!     .tag("site", "lab");
//! assert_eq!(item.export_name(), "lab.temp");
//! ```

pub mod duration;
pub mod error;
pub mod item;
pub mod time_span;

pub use duration::{format_duration, parse_duration};
pub use error::{SpanError, SpanResult};
pub use item::{ExportStrategy, QueryItem, QueryRequest};
pub use time_span::{TimeSpan, TimeSpanSpec, DEFAULT_WIDTH_DAYS, DEFAULT_WINDOW_COUNT};
