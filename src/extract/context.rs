//! Per-request parameter access.

use super::body::{parse_body, ExtractOptions, ParsedBody};
use super::convert::{
    convert_all, convert_opt, EnumConverter, LocalDateConverter, LocalDateTimeConverter,
    LongConverter, ZonedDateTimeConverter,
};
use super::file::FileField;
use super::query::{parse_query, MultiMap};
use crate::error::{BadRequest, HandlerError};
use crate::ids::RequestId;
use crate::json::{EnumAdapter, JsonContext};
use crate::router::ParamVec;
use crate::server::{Headers, IncomingRequest, ResponseSink};
use crate::sse::EventStream;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use http::Method;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything extracted from a request before the handler runs.
#[derive(Debug, Default)]
pub struct RequestParts {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub path_params: ParamVec,
    pub query_params: MultiMap,
    pub body: ParsedBody,
}

impl RequestParts {
    /// Run the extraction pipeline: query string, then body by content type.
    ///
    /// # Errors
    ///
    /// Body parse failures are bad requests; body read failures are internal errors.
    pub fn extract(
        mut request: IncomingRequest,
        method: Method,
        path_params: ParamVec,
        request_id: RequestId,
        options: &ExtractOptions,
    ) -> Result<Self, HandlerError> {
        let query_params = request.query.as_deref().map(parse_query).unwrap_or_default();
        let body = parse_body(
            request.headers.get("Content-Type"),
            &mut *request.body,
            options,
        )?;
        Ok(Self {
            request_id,
            method,
            path: request.path,
            query: request.query,
            headers: request.headers,
            path_params,
            query_params,
            body,
        })
    }
}

/// The handler's view of a request.
///
/// Typed accessors return `Ok(None)` for an absent parameter and a [`BadRequest`] when the value
/// is present but cannot be converted. The response sink lives here until the dispatcher renders
/// the handler's result or the handler claims it with
/// [`open_event_stream`](RequestContext::open_event_stream).
pub struct RequestContext {
    parts: RequestParts,
    json: Arc<JsonContext>,
    sink: Mutex<Option<Box<dyn ResponseSink>>>,
}

impl RequestContext {
    pub fn new(parts: RequestParts, json: Arc<JsonContext>, sink: Box<dyn ResponseSink>) -> Self {
        Self {
            parts,
            json,
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Hand the sink back; `None` once a stream has claimed it.
    pub fn take_sink(&self) -> Option<Box<dyn ResponseSink>> {
        self.sink.lock().take()
    }

    /// Claim the response for Server-Sent Events.
    ///
    /// The stream headers and a `200` status are written immediately. The handler must return
    /// [`ResponseDescriptor::keep_open`](crate::ResponseDescriptor::keep_open) afterwards.
    ///
    /// # Errors
    ///
    /// Fails when the sink was already taken or the status could not be written.
    pub fn open_event_stream(&self) -> Result<EventStream, HandlerError> {
        let sink = self.take_sink().ok_or_else(|| {
            HandlerError::internal(type_name::<EventStream>(), "response already claimed")
        })?;
        Ok(EventStream::open(sink, Arc::clone(&self.json))?)
    }

    // raw request

    #[inline]
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.parts.path
    }

    /// Raw query string, still percent-encoded.
    #[inline]
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.parts.query.as_deref()
    }

    #[must_use]
    pub fn request_uri(&self) -> String {
        match &self.parts.query {
            Some(q) => format!("{}?{}", self.parts.path, q),
            None => self.parts.path.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn request_headers(&self) -> &Headers {
        &self.parts.headers
    }

    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name)
    }

    #[must_use]
    pub fn request_accept(&self) -> Option<&str> {
        self.header("Accept")
    }

    #[must_use]
    pub fn request_content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.parts.request_id
    }

    #[inline]
    #[must_use]
    pub fn json(&self) -> &JsonContext {
        &self.json
    }

    // path

    /// Percent-decoded path parameter.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.parts
            .path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn path_params(&self) -> &ParamVec {
        &self.parts.path_params
    }

    pub fn path_param_as_enum<T>(&self, name: &str) -> Result<Option<T>, HandlerError>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        let conv = EnumConverter::new(self.enum_adapter::<T>()?);
        Ok(convert_opt(&conv, name, self.path_param(name))?)
    }

    // query

    #[inline]
    #[must_use]
    pub fn query_params(&self) -> &MultiMap {
        &self.parts.query_params
    }

    /// First value of a query parameter; `None` when absent or given without `=`.
    #[must_use]
    pub fn query_param_first(&self, name: &str) -> Option<&str> {
        self.parts.query_params.first(name)
    }

    /// Every value of a query parameter in arrival order; empty when absent.
    #[must_use]
    pub fn query_param_list(&self, name: &str) -> &[Option<String>] {
        self.parts.query_params.get(name).unwrap_or_default()
    }

    pub fn query_param_first_as_enum<T>(&self, name: &str) -> Result<Option<T>, HandlerError>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        let conv = EnumConverter::new(self.enum_adapter::<T>()?);
        Ok(convert_opt(&conv, name, self.query_param_first(name))?)
    }

    pub fn query_param_as_enum_list<T>(&self, name: &str) -> Result<Vec<T>, HandlerError>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        let conv = EnumConverter::new(self.enum_adapter::<T>()?);
        Ok(convert_all(&conv, name, self.query_param_list(name))?)
    }

    // form

    /// First text field of a url-encoded or multipart body.
    #[must_use]
    pub fn form_param_first(&self, name: &str) -> Option<&str> {
        self.parts.body.form.first(name)
    }

    #[must_use]
    pub fn form_param_list(&self, name: &str) -> &[Option<String>] {
        self.parts.body.form.get(name).unwrap_or_default()
    }

    pub fn form_param_first_as_enum<T>(&self, name: &str) -> Result<Option<T>, HandlerError>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        let conv = EnumConverter::new(self.enum_adapter::<T>()?);
        Ok(convert_opt(&conv, name, self.form_param_first(name))?)
    }

    // body

    /// Body parameters: the JSON object, or form fields as arrays of strings.
    #[inline]
    #[must_use]
    pub fn body_params(&self) -> &Map<String, Value> {
        &self.parts.body.params
    }

    /// Decode the body parameters into `T`.
    ///
    /// # Errors
    ///
    /// A body that does not fit `T` is a [`BadRequest::CanNotParse`].
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, BadRequest> {
        self.json
            .from_value(Value::Object(self.parts.body.params.clone()))
            .map_err(|e| BadRequest::can_not_parse(&e))
    }

    #[must_use]
    pub fn file_param(&self, name: &str) -> Option<&Arc<FileField>> {
        self.parts.body.files.get(name)
    }

    #[must_use]
    pub fn file_params(&self) -> &HashMap<String, Arc<FileField>> {
        &self.parts.body.files
    }

    /// First value named `name` found in the path, the query string or the body, in that order.
    ///
    /// Body arrays yield their first element; non-string body values are returned as JSON text.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<Cow<'_, str>> {
        if let Some(v) = self.path_param(name) {
            return Some(Cow::Borrowed(v));
        }
        if let Some(v) = self.query_param_first(name) {
            return Some(Cow::Borrowed(v));
        }
        match self.parts.body.params.get(name)? {
            Value::Array(items) => items.first().and_then(value_text),
            other => value_text(other),
        }
    }

    fn enum_adapter<T>(&self) -> Result<&EnumAdapter<T>, HandlerError>
    where
        T: Copy + PartialEq + Send + Sync + 'static,
    {
        self.json.enums().get::<T>().ok_or_else(|| {
            HandlerError::internal(
                type_name::<EnumAdapter<T>>(),
                format!("no enum adapter registered for {}", type_name::<T>()),
            )
        })
    }
}

fn value_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Cow::Borrowed(s)),
        other => Some(Cow::Owned(other.to_string())),
    }
}

macro_rules! typed_accessors {
    ($($conv:ident => $ty:ty {
        path: $path:ident,
        query_first: $query_first:ident,
        query_list: $query_list:ident,
        form_first: $form_first:ident $(,)?
    })*) => {
        impl RequestContext {
            $(
                #[doc = concat!("Path parameter as `", stringify!($ty), "`.")]
                pub fn $path(&self, name: &str) -> Result<Option<$ty>, BadRequest> {
                    convert_opt(&$conv, name, self.path_param(name))
                }

                #[doc = concat!("First query value as `", stringify!($ty), "`.")]
                pub fn $query_first(&self, name: &str) -> Result<Option<$ty>, BadRequest> {
                    convert_opt(&$conv, name, self.query_param_first(name))
                }

                #[doc = concat!("All query values as `", stringify!($ty), "`, skipping empty ones.")]
                pub fn $query_list(&self, name: &str) -> Result<Vec<$ty>, BadRequest> {
                    convert_all(&$conv, name, self.query_param_list(name))
                }

                #[doc = concat!("First form value as `", stringify!($ty), "`.")]
                pub fn $form_first(&self, name: &str) -> Result<Option<$ty>, BadRequest> {
                    convert_opt(&$conv, name, self.form_param_first(name))
                }
            )*
        }
    };
}

typed_accessors! {
    LongConverter => i64 {
        path: path_param_as_long,
        query_first: query_param_first_as_long,
        query_list: query_param_as_long_list,
        form_first: form_param_first_as_long,
    }
    LocalDateConverter => NaiveDate {
        path: path_param_as_local_date,
        query_first: query_param_first_as_local_date,
        query_list: query_param_as_local_date_list,
        form_first: form_param_first_as_local_date,
    }
    LocalDateTimeConverter => NaiveDateTime {
        path: path_param_as_local_date_time,
        query_first: query_param_first_as_local_date_time,
        query_list: query_param_as_local_date_time_list,
        form_first: form_param_first_as_local_date_time,
    }
    ZonedDateTimeConverter => DateTime<FixedOffset> {
        path: path_param_as_zoned_date_time,
        query_first: query_param_first_as_zoned_date_time,
        query_list: query_param_as_zoned_date_time_list,
        form_first: form_param_first_as_zoned_date_time,
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("parts", &self.parts)
            .field("sink_taken", &self.sink.lock().is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::EnumRegistry;
    use crate::server::MemorySink;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Color {
        Red,
        Green,
    }

    fn json_ctx() -> Arc<JsonContext> {
        let mut enums = EnumRegistry::new();
        enums.register(
            EnumAdapter::new("Color")
                .variant(Color::Red, "RED", &["rojo"])
                .variant(Color::Green, "GREEN", &[]),
        );
        Arc::new(JsonContext::new().with_enums(enums))
    }

    fn ctx(target: &str, path_params: &[(&str, &str)], body: Option<(&str, &str)>) -> RequestContext {
        let mut request = IncomingRequest::new("POST", target);
        if let Some((ct, data)) = body {
            request = request.with_header("Content-Type", ct).with_body(data);
        }
        let params = path_params
            .iter()
            .map(|(k, v)| (Arc::<str>::from(*k), (*v).to_owned()))
            .collect();
        let parts = RequestParts::extract(
            request,
            Method::POST,
            params,
            RequestId::new(),
            &ExtractOptions::default(),
        )
        .unwrap();
        let (sink, _probe) = MemorySink::new();
        RequestContext::new(parts, json_ctx(), Box::new(sink))
    }

    #[test]
    fn test_path_accessors() {
        let c = ctx("/users/42", &[("id", "42"), ("day", "2021-03-04")], None);
        assert_eq!(c.path_param("id"), Some("42"));
        assert_eq!(c.path_param_as_long("id").unwrap(), Some(42));
        assert_eq!(c.path_param_as_long("missing").unwrap(), None);
        assert_eq!(
            c.path_param_as_local_date("day").unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 4)
        );
        let err = c.path_param_as_long("day").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The field day with value 2021-03-04 can not be converted to i64"
        );
    }

    #[test]
    fn test_empty_path_param_converts_to_none() {
        let c = ctx("/a//b", &[("id", "")], None);
        assert_eq!(c.path_param("id"), Some(""));
        assert_eq!(c.path_param_as_long("id").unwrap(), None);
    }

    #[test]
    fn test_query_accessors() {
        let c = ctx("/q?n=1&n=&n=3&flag&c=rojo&c=GREEN", &[], None);
        assert_eq!(c.query_param_first("n"), Some("1"));
        assert_eq!(c.query_param_list("n").len(), 3);
        assert_eq!(c.query_param_as_long_list("n").unwrap(), vec![1, 3]);
        assert_eq!(c.query_param_first("flag"), None);
        assert!(c.query_params().contains_key("flag"));
        assert!(c.query_param_list("absent").is_empty());
        assert_eq!(
            c.query_param_as_enum_list::<Color>("c").unwrap(),
            vec![Color::Red, Color::Green]
        );
    }

    #[test]
    fn test_enum_errors() {
        let c = ctx("/q?c=BLUE", &[], None);
        match c.query_param_first_as_enum::<Color>("c").unwrap_err() {
            HandlerError::BadRequest(bad) => assert_eq!(
                bad.to_string(),
                "The field c with value BLUE can not be converted to Color[RED,GREEN]"
            ),
            other => panic!("unexpected {other}"),
        }

        #[derive(Debug, Clone, Copy, PartialEq)]
        struct Unregistered;
        assert!(matches!(
            c.query_param_first_as_enum::<Unregistered>("c"),
            Err(HandlerError::Internal { .. })
        ));
    }

    #[derive(Debug, Deserialize)]
    struct Paint {
        #[serde(with = "crate::json::registered_enum")]
        color: Color,
    }

    #[test]
    fn test_body_as_resolves_enum_aliases() {
        let c = ctx("/paint", &[], Some(("application/json", r#"{"color":"rojo"}"#)));
        assert_eq!(c.body_as::<Paint>().unwrap().color, Color::Red);

        let c = ctx("/paint", &[], Some(("application/json", r#"{"color":"BLUE"}"#)));
        let err = c.body_as::<Paint>().unwrap_err();
        assert_eq!(err.message_key(), crate::error::CAN_NOT_PARSE);
    }

    #[test]
    fn test_form_accessors() {
        let c = ctx(
            "/f",
            &[],
            Some(("application/x-www-form-urlencoded", "age=33&when=2020-01-02T03:04:05")),
        );
        assert_eq!(c.form_param_first_as_long("age").unwrap(), Some(33));
        assert!(c.form_param_first_as_local_date_time("when").unwrap().is_some());
        assert_eq!(c.body_params()["age"], json!(["33"]));
    }

    #[test]
    fn test_param_lookup_order() {
        let c = ctx(
            "/p/from-path?id=from-query&q=from-query",
            &[("id", "from-path")],
            Some((
                "application/json",
                r#"{"id":"from-body","q":"from-body","b":["first","second"],"n":5,"z":null,"e":[]}"#,
            )),
        );
        assert_eq!(c.param("id").as_deref(), Some("from-path"));
        assert_eq!(c.param("q").as_deref(), Some("from-query"));
        assert_eq!(c.param("b").as_deref(), Some("first"));
        assert_eq!(c.param("n").as_deref(), Some("5"));
        assert_eq!(c.param("z"), None);
        assert_eq!(c.param("e"), None);
        assert_eq!(c.param("missing"), None);
    }

    #[test]
    fn test_body_as_typed() {
        #[derive(Debug, Deserialize)]
        struct User {
            name: String,
            age: u32,
        }
        let c = ctx("/u", &[], Some(("application/json", r#"{"name":"ana","age":30}"#)));
        let user: User = c.body_as().unwrap();
        assert_eq!(user.name, "ana");
        assert_eq!(user.age, 30);

        let bad = ctx("/u", &[], Some(("application/json", r#"{"name":"ana"}"#)));
        let err = bad.body_as::<User>().unwrap_err();
        assert_eq!(err.message_key(), crate::error::CAN_NOT_PARSE);
    }

    #[test]
    fn test_event_stream_claims_sink_once() {
        let c = ctx("/events", &[], None);
        let stream = c.open_event_stream().unwrap();
        assert!(c.take_sink().is_none());
        assert!(matches!(
            c.open_event_stream(),
            Err(HandlerError::Internal { .. })
        ));
        drop(stream);
    }
}
