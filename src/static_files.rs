//! Fallback resources served when no route matches a `GET` or `HEAD`.
//!
//! The dispatcher consults its matchers in order (external folder, then bundled resources) with
//! the app context already stripped from the path, and ends with [`not_found_response`].

use crate::error::InitializationError;
use crate::render::{RendererKind, CONTENT_TYPE};
use crate::response::ResponseDescriptor;
use crate::server::Headers;
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const INDEX_FILE: &str = "index.html";

pub trait ResourceMatcher: Send + Sync {
    /// A response for `path`, or `None` to let the next matcher try.
    fn lookup(&self, path: &str) -> Option<ResponseDescriptor>;
}

/// Files below a directory on disk.
#[derive(Debug, Clone)]
pub struct ExternalFolder {
    base_dir: PathBuf,
}

impl ExternalFolder {
    /// # Errors
    ///
    /// The folder must exist and be a directory.
    pub fn new(base: impl AsRef<Path>) -> Result<Self, InitializationError> {
        let base = base.as_ref();
        let invalid = |reason: &str| InitializationError::ExternalFolder {
            path: base.display().to_string(),
            reason: reason.to_owned(),
        };
        let base_dir = base
            .canonicalize()
            .map_err(|e| invalid(&e.to_string()))?;
        if !base_dir.is_dir() {
            return Err(invalid("not a directory"));
        }
        Ok(Self { base_dir })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a url path below the base directory; `..`, absolute and prefixed components are rejected.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(url_path).ok()?;
        let mut pb = self.base_dir.clone();
        for comp in Path::new(decoded.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }
}

impl ResourceMatcher for ExternalFolder {
    fn lookup(&self, path: &str) -> Option<ResponseDescriptor> {
        let mut file_path = self.map_path(path)?;
        if file_path.is_dir() {
            file_path.push(INDEX_FILE);
        }
        // symlinks must not lead outside the folder
        let resolved = file_path.canonicalize().ok()?;
        if !resolved.starts_with(&self.base_dir) || !resolved.is_file() {
            return None;
        }
        let file = File::open(&resolved).ok()?;
        let name = resolved.file_name()?.to_string_lossy().into_owned();
        debug!(path = %path, file = %resolved.display(), "Serving external file");
        Some(ResponseDescriptor::ok_file(file, name))
    }
}

/// In-memory resources, typically filled with `include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct BundledResources {
    files: HashMap<String, &'static [u8]>,
}

impl BundledResources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource under `path`; leading slashes are ignored.
    #[must_use]
    pub fn with(mut self, path: &str, bytes: &'static [u8]) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&mut self, path: &str, bytes: &'static [u8]) {
        self.files
            .insert(path.trim_start_matches('/').to_owned(), bytes);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl ResourceMatcher for BundledResources {
    fn lookup(&self, path: &str) -> Option<ResponseDescriptor> {
        let key = path.trim_matches('/');
        let (key, bytes) = match self.files.get_key_value(key) {
            Some((k, b)) => (k.as_str(), *b),
            None => {
                let index = if key.is_empty() {
                    INDEX_FILE.to_owned()
                } else {
                    format!("{key}/{INDEX_FILE}")
                };
                let (k, b) = self.files.get_key_value(index.as_str())?;
                (k.as_str(), *b)
            }
        };
        let name = key.rsplit('/').next().unwrap_or(key);
        debug!(path = %path, resource = %key, "Serving bundled resource");
        Some(ResponseDescriptor::ok_file(Cursor::new(bytes), name))
    }
}

/// Terminal fallback: JSON when the client speaks JSON, plain text otherwise.
#[must_use]
pub fn not_found_response(request_uri: &str, headers: &Headers) -> ResponseDescriptor {
    let wants_json = ["Accept", CONTENT_TYPE].iter().any(|name| {
        headers
            .get(name)
            .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
    });
    if wants_json {
        ResponseDescriptor::json(404, json!({ "requestUri": request_uri }))
            .with_renderer(RendererKind::Json)
    } else {
        ResponseDescriptor::ok_text(format!("Can not find {request_uri}")).with_status(404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn folder() -> (tempfile::TempDir, ExternalFolder) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "Hello\n").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join(INDEX_FILE), "<h1>docs</h1>").unwrap();
        let folder = ExternalFolder::new(dir.path()).unwrap();
        (dir, folder)
    }

    #[test]
    fn test_missing_folder_is_rejected() {
        assert!(matches!(
            ExternalFolder::new("/definitely/not/here"),
            Err(InitializationError::ExternalFolder { .. })
        ));
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(ExternalFolder::new(file.path()).is_err());
    }

    #[test]
    fn test_map_path_prevents_traversal() {
        let (_dir, folder) = folder();
        assert!(folder.map_path("../Cargo.toml").is_none());
        assert!(folder.map_path("/a/../../etc/passwd").is_none());
        assert!(folder.map_path("%2e%2e/secret").is_none());
        assert!(folder.lookup("/../hello.txt").is_none());
    }

    #[test]
    fn test_serves_file_and_index() {
        let (_dir, folder) = folder();
        let d = folder.lookup("/hello.txt").unwrap();
        assert_eq!(d.renderer(), Some(RendererKind::File));
        assert_eq!(d.file_name(), Some("hello.txt"));
        let idx = folder.lookup("/docs").unwrap();
        assert_eq!(idx.file_name(), Some(INDEX_FILE));
        assert!(folder.lookup("/nope.txt").is_none());
    }

    #[test]
    fn test_bundled_lookup() {
        let bundled = BundledResources::new()
            .with("/static/app.js", b"console.log(1)")
            .with("index.html", b"<html></html>");
        assert_eq!(
            bundled.lookup("/static/app.js").unwrap().file_name(),
            Some("app.js")
        );
        assert_eq!(bundled.lookup("/").unwrap().file_name(), Some(INDEX_FILE));
        assert!(bundled.lookup("/static/missing.css").is_none());
    }

    #[test]
    fn test_not_found_negotiation() {
        let json_headers: Headers = [("Accept", "application/json")].into_iter().collect();
        let d = not_found_response("/x?y=1", &json_headers);
        assert_eq!(d.status(), 404);
        assert!(matches!(d.payload(), crate::render::Payload::Json(v) if v["requestUri"] == "/x?y=1"));

        let d = not_found_response("/x", &Headers::new());
        assert_eq!(d.status(), 404);
        assert_eq!(d.renderer(), Some(RendererKind::Text));
        assert!(matches!(d.payload(), crate::render::Payload::Text(t) if t == "Can not find /x"));
    }
}
