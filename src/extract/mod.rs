//! # Parameter Extraction
//!
//! Turns a matched request into a [`RequestContext`]:
//!
//! - **path**: captures bound to the route's parameter names, percent-decoded
//! - **query**: `&`-separated tokens split on the first `=` into an ordered [`MultiMap`]; a token
//!   without `=` is a key with a null value
//! - **body**: chosen by `Content-Type` ([`BodyKind`]): a JSON object, a url-encoded form, or a
//!   multipart body with [`FileField`]s. Other content types yield no parameters.
//!
//! Conversions of single values go through a [`ParamConverter`]; failures are
//! [`BadRequest`](crate::BadRequest) values, never panics.

mod body;
mod context;
mod convert;
mod file;
mod multipart;
mod query;

pub use body::{multimap_to_json, parse_body, BodyKind, ExtractOptions, ParsedBody};
pub use context::{RequestContext, RequestParts};
pub use convert::{
    convert_all, convert_opt, EnumConverter, LocalDateConverter, LocalDateTimeConverter,
    LongConverter, ParamConverter, ZonedDateTimeConverter,
};
pub use file::FileField;
pub use multipart::{parse_multipart, MultipartBody};
pub use query::{decode_component, parse_form, parse_query, MalformedEscape, MultiMap};
