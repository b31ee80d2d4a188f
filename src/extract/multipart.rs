//! `multipart/*` bodies, decoded with `multer` over the fully read body.

use super::file::FileField;
use super::query::MultiMap;
use crate::error::BadRequest;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Fields and files of a multipart body.
#[derive(Debug, Default)]
pub struct MultipartBody {
    pub fields: MultiMap,
    pub files: HashMap<String, Arc<FileField>>,
}

/// Decode a multipart body.
///
/// Parts with a file name become [`FileField`]s keyed by the part name (the last part wins on
/// repeated names); every other part is a UTF-8 text field.
///
/// # Errors
///
/// A missing or invalid boundary, or a body that does not follow it, is a bad request.
pub fn parse_multipart(content_type: &str, body: Vec<u8>) -> Result<MultipartBody, BadRequest> {
    let boundary =
        multer::parse_boundary(content_type).map_err(|e| BadRequest::can_not_parse(&e))?;
    let stream =
        futures::stream::once(async move { Ok::<Bytes, std::io::Error>(Bytes::from(body)) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    futures::executor::block_on(async move {
        let mut parsed = MultipartBody::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| BadRequest::can_not_parse(&e))?
        {
            let name = field.name().unwrap_or_default().to_owned();
            let file_name = field.file_name().map(str::to_owned);
            let content_type = field.content_type().map(ToString::to_string);
            let data = field.bytes().await.map_err(|e| BadRequest::can_not_parse(&e))?;
            match file_name {
                Some(file_name) => {
                    debug!(
                        field = %name,
                        file_name = %file_name,
                        size = data.len(),
                        "Multipart file part"
                    );
                    let size = data.len() as u64;
                    let file = FileField::new(file_name, content_type, size, Cursor::new(data));
                    parsed.files.insert(name, Arc::new(file));
                }
                None => {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    parsed.fields.push(name, Some(value));
                }
            }
        }
        Ok::<MultipartBody, BadRequest>(parsed)
    })
}
