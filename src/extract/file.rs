//! Uploaded file parts.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read};

enum FileState {
    Pending(Box<dyn Read + Send>),
    Ready(Bytes),
    Failed(String),
}

/// A file part of a multipart body.
///
/// The underlying byte source is drained on the first call to [`content`](FileField::content)
/// and cached; the mutex is held for the whole drain so concurrent first reads wait for it and
/// then share the cached bytes.
pub struct FileField {
    name: String,
    content_type: Option<String>,
    declared_size: u64,
    state: Mutex<FileState>,
}

impl FileField {
    pub fn new(
        name: impl Into<String>,
        content_type: Option<String>,
        declared_size: u64,
        source: impl Read + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            content_type,
            declared_size,
            state: Mutex::new(FileState::Pending(Box::new(source))),
        }
    }

    /// Client supplied file name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Whether the source has already been drained.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        !matches!(*self.state.lock(), FileState::Pending(_))
    }

    /// File bytes; the first call reads the source, later calls return the cache.
    ///
    /// # Errors
    ///
    /// Returns the read error of the first drain, on that call and every later one.
    pub fn content(&self) -> io::Result<Bytes> {
        let mut state = self.state.lock();
        let placeholder = FileState::Failed(String::from("drain interrupted"));
        let mut source = match std::mem::replace(&mut *state, placeholder) {
            FileState::Pending(source) => source,
            FileState::Ready(bytes) => {
                *state = FileState::Ready(bytes.clone());
                return Ok(bytes);
            }
            FileState::Failed(msg) => {
                let err = io::Error::new(io::ErrorKind::Other, msg.clone());
                *state = FileState::Failed(msg);
                return Err(err);
            }
        };
        let mut buf = Vec::with_capacity(usize::try_from(self.declared_size).unwrap_or(0));
        match source.read_to_end(&mut buf) {
            Ok(_) => {
                let bytes = Bytes::from(buf);
                *state = FileState::Ready(bytes.clone());
                Ok(bytes)
            }
            Err(err) => {
                *state = FileState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn content_as_string(&self) -> io::Result<String> {
        self.content()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

impl fmt::Debug for FileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileField")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("declared_size", &self.declared_size)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
