use std::path::Path;

const DEFAULT_MIME: &str = "application/octet-stream";

// sorted by extension for binary search
const MIME_TYPES: &[(&str, &str)] = &[
    ("au", "audio/basic"),
    ("avi", "video/x-msvideo"),
    ("bmp", "image/bmp"),
    ("bz2", "application/x-bzip2"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "dotx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.template",
    ),
    ("dtd", "application/xml-dtd"),
    ("eot", "application/vnd.ms-fontobject"),
    ("es", "application/ecmascript"),
    ("exe", "application/octet-stream"),
    ("gif", "image/gif"),
    ("gz", "application/x-gzip"),
    ("hqx", "application/mac-binhex40"),
    ("htm", "text/html; charset=utf-8"),
    ("html", "text/html; charset=utf-8"),
    ("ico", "image/x-icon"),
    ("jar", "application/java-archive"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("midi", "audio/x-midi"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("mpeg", "video/mpeg"),
    ("ogg", "audio/vorbis"),
    ("otf", "application/font-otf"),
    ("pdf", "application/pdf"),
    ("pl", "application/x-perl"),
    ("png", "image/png"),
    (
        "potx",
        "application/vnd.openxmlformats-officedocument.presentationml.template",
    ),
    (
        "ppsx",
        "application/vnd.openxmlformats-officedocument.presentationml.slideshow",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("ps", "application/postscript"),
    ("qt", "video/quicktime"),
    ("ra", "audio/x-pn-realaudio"),
    ("ram", "audio/x-pn-realaudio"),
    ("rar", "application/x-rar-compressed"),
    ("rdf", "application/rdf+xml"),
    ("rtf", "application/rtf"),
    ("sgml", "text/sgml"),
    ("sit", "application/x-stuffit"),
    (
        "sldx",
        "application/vnd.openxmlformats-officedocument.presentationml.slide",
    ),
    ("svg", "image/svg+xml"),
    ("swf", "application/x-shockwave-flash"),
    ("tgz", "application/x-tar"),
    ("tiff", "image/tiff"),
    ("tsv", "text/tab-separated-values"),
    ("ttf", "application/font-ttf"),
    ("txt", "text/plain"),
    ("wav", "audio/wav"),
    ("webp", "image/webp"),
    ("woff", "application/font-woff"),
    ("woff2", "application/font-woff2"),
    ("xlam", "application/vnd.ms-excel.addin.macroEnabled.12"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsb", "application/vnd.ms-excel.sheet.binary.macroEnabled.12"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        "xltx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.template",
    ),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// MIME type for a file name, by extension (case-insensitive).
#[must_use]
pub fn from_file_name(name: &str) -> &'static str {
    let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
        return DEFAULT_MIME;
    };
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .binary_search_by(|(k, _)| (*k).cmp(ext.as_str()))
        .map(|i| MIME_TYPES[i].1)
        .unwrap_or(DEFAULT_MIME)
}
