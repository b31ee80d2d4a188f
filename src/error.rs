//! # Error Module
//!
//! Failures travel as values through the request pipeline:
//!
//! - the extraction layer returns [`BadRequest`] at the point a value cannot be converted or parsed
//! - handlers return [`HandlerError`], which is either a [`BadRequest`] or an internal failure
//! - the dispatcher folds the handler result into an [`Outcome`], the only shape renderers see
//!
//! Startup problems are reported as [`InitializationError`] before any request is served.
//!
//! ## Wire Format
//!
//! ```text
//! 400 {"type":"pinhttp::error::BadRequest","message":"The field id with value x can not be converted to i64",
//!      "messageKey":"CAN_NOT_CONVERT","fieldName":"id","currentValue":"x","destinationClassName":"i64"}
//! 400 {"type":"serde_json::error::Error","message":"expected value at line 1 column 1","messageKey":"CAN_NOT_PARSE"}
//! 500 {"type":"my_service::StoreError","message":"connection refused"}
//! ```

use crate::response::ResponseDescriptor;
use serde_json::{json, Value};
use std::any::{type_name, Any};
use std::fmt;
use thiserror::Error;

/// Message key for values that could not be coerced to the requested type.
pub const CAN_NOT_CONVERT: &str = "CAN_NOT_CONVERT";
/// Message key for bodies that could not be decoded.
pub const CAN_NOT_PARSE: &str = "CAN_NOT_PARSE";

/// Type identifier reported for panics escaping a handler.
pub const PANIC_TYPE: &str = "panic";

/// A client-attributable failure raised while converting or parsing request data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BadRequest {
    /// A single raw value could not be converted to `destination`.
    ///
    /// `destination` is the human readable target (for enums it lists the accepted names),
    /// `destination_class_name` is the bare type name.
    #[error("The field {field_name} with value {current_value} can not be converted to {destination}")]
    CanNotConvert {
        field_name: String,
        current_value: String,
        destination: String,
        destination_class_name: String,
    },
    /// A body or structured value could not be decoded.
    #[error("{message}")]
    CanNotParse { type_name: String, message: String },
}

impl BadRequest {
    /// Conversion failure where the message and the class name use the same type name.
    pub fn can_not_convert(
        field_name: impl Into<String>,
        current_value: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        let destination = destination.into();
        BadRequest::CanNotConvert {
            field_name: field_name.into(),
            current_value: current_value.into(),
            destination_class_name: destination.clone(),
            destination,
        }
    }

    /// Conversion failure with a descriptive destination (e.g. `Month[JANUARY,FEBRUARY]`).
    pub fn can_not_convert_described(
        field_name: impl Into<String>,
        current_value: impl Into<String>,
        destination: impl Into<String>,
        destination_class_name: impl Into<String>,
    ) -> Self {
        BadRequest::CanNotConvert {
            field_name: field_name.into(),
            current_value: current_value.into(),
            destination: destination.into(),
            destination_class_name: destination_class_name.into(),
        }
    }

    /// Parse failure carrying the parser's error type and message.
    pub fn can_not_parse<E: std::error::Error + 'static>(err: &E) -> Self {
        BadRequest::CanNotParse {
            type_name: type_name::<E>().to_owned(),
            message: err.to_string(),
        }
    }

    /// Parse failure with an explicit type identifier.
    pub fn parse_message(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        BadRequest::CanNotParse {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message_key(&self) -> &'static str {
        match self {
            BadRequest::CanNotConvert { .. } => CAN_NOT_CONVERT,
            BadRequest::CanNotParse { .. } => CAN_NOT_PARSE,
        }
    }

    /// Structured payload handed to the renderer.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            BadRequest::CanNotConvert {
                field_name,
                current_value,
                destination_class_name,
                ..
            } => json!({
                "type": type_name::<BadRequest>(),
                "message": self.to_string(),
                "messageKey": CAN_NOT_CONVERT,
                "fieldName": field_name,
                "currentValue": current_value,
                "destinationClassName": destination_class_name,
            }),
            BadRequest::CanNotParse { type_name, message } => json!({
                "type": type_name,
                "message": message,
                "messageKey": CAN_NOT_PARSE,
            }),
        }
    }
}

/// Failure returned by a handler.
///
/// Any `std::error::Error` converts into this type with `?`: a [`BadRequest`] keeps its
/// classification, everything else becomes `Internal` with the concrete error type as identifier.
#[derive(Debug)]
pub enum HandlerError {
    BadRequest(BadRequest),
    Internal { type_name: String, message: String },
}

impl HandlerError {
    pub fn internal(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Internal {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Classify a payload caught by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        HandlerError::Internal {
            type_name: PANIC_TYPE.to_owned(),
            message,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::BadRequest(err) => write!(f, "bad request: {err}"),
            HandlerError::Internal { type_name, message } => write!(f, "{type_name}: {message}"),
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let message = err.to_string();
        let boxed: Box<dyn Any> = Box::new(err);
        match boxed.downcast::<BadRequest>() {
            Ok(bad) => HandlerError::BadRequest(*bad),
            Err(_) => HandlerError::Internal {
                type_name: type_name::<E>().to_owned(),
                message,
            },
        }
    }
}

/// Closed set of results the render pipeline knows how to emit.
#[derive(Debug)]
pub enum Outcome {
    Success(ResponseDescriptor),
    BadRequest(BadRequest),
    Internal { type_name: String, message: String },
}

impl Outcome {
    /// Turn the outcome into the descriptor that is actually rendered.
    ///
    /// Error variants have no renderer preference so the route default applies.
    #[must_use]
    pub fn into_descriptor(self) -> ResponseDescriptor {
        match self {
            Outcome::Success(descriptor) => descriptor,
            Outcome::BadRequest(err) => ResponseDescriptor::json(400, err.payload()),
            Outcome::Internal { type_name, message } => {
                ResponseDescriptor::json(500, json!({ "type": type_name, "message": message }))
            }
        }
    }
}

impl From<Result<ResponseDescriptor, HandlerError>> for Outcome {
    fn from(result: Result<ResponseDescriptor, HandlerError>) -> Self {
        match result {
            Ok(descriptor) => Outcome::Success(descriptor),
            Err(HandlerError::BadRequest(err)) => Outcome::BadRequest(err),
            Err(HandlerError::Internal { type_name, message }) => {
                Outcome::Internal { type_name, message }
            }
        }
    }
}

/// An identical `(method, template)` pair was registered twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("route {method} {template} is already registered")]
pub struct DuplicateRouteError {
    pub method: String,
    pub template: String,
}

/// Configuration rejected at startup.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("invalid port {0}: must be between 0 and 65535")]
    InvalidPort(i64),
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
    #[error("invalid app context {context:?}: {reason}")]
    InvalidAppContext { context: String, reason: &'static str },
    #[error("path {path:?} contains characters outside [a-z0-9-.]")]
    InvalidCharset { path: String },
    #[error("invalid external folder {path:?}: {reason}")]
    ExternalFolder { path: String, reason: String },
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),
    #[error("worker count must be at least 1")]
    InvalidWorkers,
    #[error("queue bound must be at least 1")]
    InvalidQueueBound,
    #[error("invalid value {value:?} for {key}")]
    InvalidSetting { key: &'static str, value: String },
    #[error(transparent)]
    DuplicateRoute(#[from] DuplicateRouteError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to spawn server threads: {0}")]
    Spawn(#[source] std::io::Error),
}
