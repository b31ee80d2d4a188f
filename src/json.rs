//! # JSON Context
//!
//! [`JsonContext`] is the serializer configuration shared by renderers and converters. It is built
//! once at startup, wrapped in an `Arc` and passed to the [`Dispatcher`](crate::dispatcher::Dispatcher),
//! which hands it to every renderer call and every [`RequestContext`](crate::extract::RequestContext).
//!
//! ## Enums
//!
//! Enums that cross the wire by name are described by an [`EnumAdapter`]: the canonical name each
//! value serialises to, plus the alternate names accepted when reading. Adapters are collected in an
//! [`EnumRegistry`] keyed by the Rust type.
//!
//! ```rust
//! use pinhttp::json::{EnumAdapter, EnumRegistry, JsonContext};
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! enum Month { April, May }
//!
//! let mut enums = EnumRegistry::new();
//! enums.register(
//!     EnumAdapter::new("Month")
//!         .variant(Month::April, "APRIL", &[])
//!         .variant(Month::May, "MAYO", &["mayo", "mayito"]),
//! );
//! let json = JsonContext::new().with_enums(enums);
//! assert_eq!(json.enum_value::<Month>("mayito"), Some(Month::May));
//! assert_eq!(json.enum_name(&Month::May), Some("MAYO"));
//! ```
//!
//! Fields marked `#[serde(with = "pinhttp::json::registered_enum")]` go through the registry of the
//! context doing the (de)serialization: [`JsonContext`] methods make their registry visible for the
//! duration of the call, and the dispatcher does the same around every handler.
//!
//! ```rust
//! # use pinhttp::json::{EnumAdapter, EnumRegistry, JsonContext};
//! # #[derive(Debug, Clone, Copy, PartialEq)]
//! # enum Month { April, May }
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Holiday {
//!     #[serde(with = "pinhttp::json::registered_enum")]
//!     month: Month,
//! }
//!
//! let mut enums = EnumRegistry::new();
//! enums.register(EnumAdapter::new("Month").variant(Month::May, "MAYO", &["mayito"]));
//! let json = JsonContext::new().with_enums(enums);
//! let holiday: Holiday = json.from_slice(br#"{"month":"mayito"}"#).unwrap();
//! assert_eq!(json.to_string(&holiday).unwrap(), r#"{"month":"MAYO"}"#);
//! ```
//!
//! ## Dates
//!
//! [`iso_date`], [`iso_date_time`] and [`iso_zoned`] are `#[serde(with = ...)]` adapters for the
//! ISO-8601 forms used on the wire: `2020-01-31`, `2020-01-31T10:15:30` and
//! `2020-01-31T10:15:30+01:00` (`Z` for UTC).

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;

struct EnumEntry<T> {
    value: T,
    name: String,
    aliases: Vec<String>,
}

/// Name mapping for one enum type.
pub struct EnumAdapter<T> {
    type_name: &'static str,
    entries: Vec<EnumEntry<T>>,
}

impl<T> EnumAdapter<T>
where
    T: Copy + PartialEq + Send + Sync + 'static,
{
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            entries: Vec::new(),
        }
    }

    /// Add a value with its canonical name and accepted aliases.
    #[must_use]
    pub fn variant(mut self, value: T, name: &str, aliases: &[&str]) -> Self {
        self.entries.push(EnumEntry {
            value,
            name: name.to_owned(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
        });
        self
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Canonical name of `value`.
    #[must_use]
    pub fn serialize(&self, value: &T) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.value == *value)
            .map(|e| e.name.as_str())
    }

    /// Value for a canonical name, falling back to aliases.
    #[must_use]
    pub fn deserialize(&self, name: &str) -> Option<T> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.aliases.iter().any(|a| a == name))
            })
            .map(|e| e.value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// `Type[A,B,...]`, used in conversion error messages.
    #[must_use]
    pub fn description(&self) -> String {
        let names: Vec<&str> = self.names().collect();
        format!("{}[{}]", self.type_name, names.join(","))
    }
}

/// Enum adapters indexed by Rust type.
#[derive(Default, Clone)]
pub struct EnumRegistry {
    adapters: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl EnumRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for `T`.
    pub fn register<T>(&mut self, adapter: EnumAdapter<T>)
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        self.adapters.insert(TypeId::of::<T>(), Arc::new(adapter));
    }

    #[must_use]
    pub fn get<T>(&self) -> Option<&EnumAdapter<T>>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        self.adapters
            .get(&TypeId::of::<T>())
            .and_then(|a| a.downcast_ref::<EnumAdapter<T>>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

thread_local! {
    static ACTIVE_ENUMS: RefCell<Vec<Arc<EnumRegistry>>> = const { RefCell::new(Vec::new()) };
}

fn active_enums() -> Option<Arc<EnumRegistry>> {
    ACTIVE_ENUMS.with(|stack| stack.borrow().last().cloned())
}

/// Keeps a context's enum registry visible to [`registered_enum`] on this thread until dropped.
#[must_use = "the registry is only visible while the scope is alive"]
pub struct EnumScope {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for EnumScope {
    fn drop(&mut self) {
        ACTIVE_ENUMS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Serializer configuration injected into renderers, converters and event streams.
#[derive(Default, Clone)]
pub struct JsonContext {
    enums: Arc<EnumRegistry>,
    pretty: bool,
}

impl JsonContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enums(mut self, enums: EnumRegistry) -> Self {
        self.enums = Arc::new(enums);
        self
    }

    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    #[inline]
    #[must_use]
    pub fn enums(&self) -> &EnumRegistry {
        &self.enums
    }

    /// Make this context's enum registry the one [`registered_enum`] fields resolve through on
    /// the current thread. Scopes nest; the innermost wins.
    pub fn enter(&self) -> EnumScope {
        ACTIVE_ENUMS.with(|stack| stack.borrow_mut().push(Arc::clone(&self.enums)));
        EnumScope {
            _thread_bound: PhantomData,
        }
    }

    pub fn to_writer<W: Write, T: Serialize + ?Sized>(
        &self,
        out: W,
        value: &T,
    ) -> serde_json::Result<()> {
        let _scope = self.enter();
        if self.pretty {
            serde_json::to_writer_pretty(out, value)
        } else {
            serde_json::to_writer(out, value)
        }
    }

    pub fn to_string<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<String> {
        let _scope = self.enter();
        if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
    }

    pub fn to_value<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<Value> {
        let _scope = self.enter();
        serde_json::to_value(value)
    }

    pub fn from_value<T: DeserializeOwned>(&self, value: Value) -> serde_json::Result<T> {
        let _scope = self.enter();
        serde_json::from_value(value)
    }

    pub fn from_slice<T: DeserializeOwned>(&self, bytes: &[u8]) -> serde_json::Result<T> {
        let _scope = self.enter();
        serde_json::from_slice(bytes)
    }

    /// Canonical wire name of an enum value, if its type is registered.
    #[must_use]
    pub fn enum_name<T>(&self, value: &T) -> Option<&str>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        self.enums.get::<T>().and_then(|a| a.serialize(value))
    }

    /// Enum value for a wire name or alias.
    #[must_use]
    pub fn enum_value<T>(&self, name: &str) -> Option<T>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        self.enums.get::<T>().and_then(|a| a.deserialize(name))
    }
}

/// `#[serde(with = ...)]` adapter naming an enum through the active [`EnumRegistry`].
///
/// Values are written under their canonical name; canonical names and aliases are read. Outside
/// any [`JsonContext`] scope, or for a type with no registered adapter, (de)serialization fails.
pub mod registered_enum {
    use super::{active_enums, EnumRegistry};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::any::type_name;

    fn no_adapter<T>() -> String {
        format!("no enum adapter registered for {}", type_name::<T>())
    }

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
        S: Serializer,
    {
        let enums = active_enums();
        let Some(adapter) = enums.as_deref().and_then(EnumRegistry::get::<T>) else {
            return Err(serde::ser::Error::custom(no_adapter::<T>()));
        };
        match adapter.serialize(value) {
            Some(name) => serializer.serialize_str(name),
            None => Err(serde::ser::Error::custom(format!(
                "value has no name in {}",
                adapter.description()
            ))),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let enums = active_enums();
        let Some(adapter) = enums.as_deref().and_then(EnumRegistry::get::<T>) else {
            return Err(serde::de::Error::custom(no_adapter::<T>()));
        };
        match adapter.deserialize(&raw) {
            Some(value) => Ok(value),
            None => Err(serde::de::Error::custom(format!(
                "unknown value {raw} for {}",
                adapter.description()
            ))),
        }
    }
}

/// Wire format of local date-times.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Wire format of dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[must_use]
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> chrono::ParseResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
}

#[must_use]
pub fn format_date_time(value: &NaiveDateTime) -> String {
    value.format(DATE_TIME_FORMAT).to_string()
}

/// Accepts `yyyy-MM-ddTHH:mm:ss` with optional fractional seconds.
pub fn parse_date_time(raw: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
}

/// RFC 3339 with the offset, `Z` when the offset is zero.
#[must_use]
pub fn format_zoned(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_zoned(raw: &str) -> chrono::ParseResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
}

macro_rules! serde_adapter {
    ($module:ident, $ty:ty, $format:path, $parse:path, $doc:literal) => {
        #[doc = $doc]
        pub mod $module {
            use super::*;
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(value: &$ty, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&$format(value))
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<$ty, D::Error> {
                let raw = String::deserialize(deserializer)?;
                $parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_adapter!(iso_date, NaiveDate, format_date, parse_date, "`yyyy-MM-dd` dates.");
serde_adapter!(
    iso_date_time,
    NaiveDateTime,
    format_date_time,
    parse_date_time,
    "`yyyy-MM-ddTHH:mm:ss` local date-times."
);
serde_adapter!(
    iso_zoned,
    DateTime<FixedOffset>,
    format_zoned,
    parse_zoned,
    "Offset date-times, `Z` for UTC."
);
