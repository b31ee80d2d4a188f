//! Single-value converters.
//!
//! Every typed accessor on [`RequestContext`](super::RequestContext) goes through a
//! [`ParamConverter`]. A failed conversion is a [`BadRequest::CanNotConvert`] carrying the field
//! name, the raw value and the destination type.

use crate::error::BadRequest;
use crate::json::{self, EnumAdapter};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

pub trait ParamConverter<T> {
    /// Convert `raw`, reported as field `name` on failure.
    ///
    /// `Ok(None)` means there was nothing to convert.
    fn convert(&self, name: &str, raw: &str) -> Result<Option<T>, BadRequest>;
}

/// Numbers and dates: the empty string converts to `None`.
macro_rules! parse_converter {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $destination:literal, $parse:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl ParamConverter<$ty> for $name {
            fn convert(&self, name: &str, raw: &str) -> Result<Option<$ty>, BadRequest> {
                if raw.is_empty() {
                    return Ok(None);
                }
                let parse: fn(&str) -> Option<$ty> = $parse;
                parse(raw)
                    .map(Some)
                    .ok_or_else(|| BadRequest::can_not_convert(name, raw, $destination))
            }
        }
    };
}

parse_converter!(
    /// Signed 64-bit integers.
    LongConverter,
    i64,
    "i64",
    |raw| raw.parse::<i64>().ok()
);
parse_converter!(
    /// `yyyy-MM-dd`.
    LocalDateConverter,
    NaiveDate,
    "NaiveDate",
    |raw| json::parse_date(raw).ok()
);
parse_converter!(
    /// `yyyy-MM-ddTHH:mm:ss`, optional fraction.
    LocalDateTimeConverter,
    NaiveDateTime,
    "NaiveDateTime",
    |raw| json::parse_date_time(raw).ok()
);
parse_converter!(
    /// RFC 3339 with an explicit offset or `Z`.
    ZonedDateTimeConverter,
    DateTime<FixedOffset>,
    "DateTime<FixedOffset>",
    |raw| json::parse_zoned(raw).ok()
);

/// Enum values through a registered [`EnumAdapter`]. Unknown names, including the empty
/// string, are rejected.
pub struct EnumConverter<'a, T> {
    adapter: &'a EnumAdapter<T>,
}

impl<'a, T> EnumConverter<'a, T>
where
    T: Copy + PartialEq + Send + Sync + 'static,
{
    pub fn new(adapter: &'a EnumAdapter<T>) -> Self {
        Self { adapter }
    }
}

impl<T> ParamConverter<T> for EnumConverter<'_, T>
where
    T: Copy + PartialEq + Send + Sync + 'static,
{
    fn convert(&self, name: &str, raw: &str) -> Result<Option<T>, BadRequest> {
        self.adapter.deserialize(raw).map(Some).ok_or_else(|| {
            BadRequest::can_not_convert_described(
                name,
                raw,
                self.adapter.description(),
                self.adapter.type_name(),
            )
        })
    }
}

/// Convert an optional raw value.
pub fn convert_opt<T, C: ParamConverter<T>>(
    converter: &C,
    name: &str,
    raw: Option<&str>,
) -> Result<Option<T>, BadRequest> {
    match raw {
        Some(raw) => converter.convert(name, raw),
        None => Ok(None),
    }
}

/// Convert every value of a multi-valued parameter, skipping null and empty results.
pub fn convert_all<T, C: ParamConverter<T>>(
    converter: &C,
    name: &str,
    values: &[Option<String>],
) -> Result<Vec<T>, BadRequest> {
    let mut out = Vec::with_capacity(values.len());
    for raw in values.iter().flatten() {
        if let Some(v) = converter.convert(name, raw)? {
            out.push(v);
        }
    }
    Ok(out)
}
