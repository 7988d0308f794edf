//! Schema loading from files, strings and HTTP URLs.
//!
//! Loading only fetches text and settles its format; parsing is left to
//! [`LoadedSchema::parse`] so callers can report I/O and syntax failures
//! separately.

use std::path::Path;

use tracing::debug;

use crate::convert;
use crate::error::SchemaError;
use crate::ir::Schema;
use crate::types::Format;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Native schema text together with where it came from and its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSchema {
    /// File path or URL, for diagnostics.
    pub source: String,
    pub format: Format,
    pub text: String,
}

impl LoadedSchema {
    /// Parse the text with the codec for its format.
    pub fn parse(&self) -> Result<Schema, SchemaError> {
        convert::parse(&self.text, self.format)
    }
}

/// Read schema text from a file path.
///
/// # Errors
///
/// Returns `SchemaError::FileNotFound` if the file doesn't exist,
/// or `SchemaError::ReadError` if it cannot be read as UTF-8.
pub fn load_schema(path: &Path) -> Result<String, SchemaError> {
    if !path.exists() {
        return Err(SchemaError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| SchemaError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// Wrap in-memory schema text, detecting its format from the content when
/// none is given.
///
/// # Errors
///
/// Returns `SchemaError::UnknownFormat` if the format cannot be detected.
pub fn load_schema_str(text: &str, format: Option<Format>) -> Result<LoadedSchema, SchemaError> {
    let source = "<string>".to_string();
    let format = match format.or_else(|| sniff_format(text)) {
        Some(format) => format,
        None => return Err(SchemaError::UnknownFormat { source_name: source }),
    };
    Ok(LoadedSchema {
        source,
        format,
        text: text.to_string(),
    })
}

/// Fetch schema text from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `SchemaError::NetworkError` if the request fails or the server
/// answers with an error status.
#[cfg(feature = "remote")]
pub fn load_schema_url(url: &str) -> Result<String, SchemaError> {
    let network_error = |source: reqwest::Error| SchemaError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network_error)?;

    let response = client.get(url).send().map_err(network_error)?;

    // Check for HTTP errors before reading the body
    let response = response.error_for_status().map_err(network_error)?;

    response.text().map_err(network_error)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load from a file path or URL and settle the format.
///
/// An explicit `format` wins; otherwise the extension decides (`.avsc`,
/// `.proto`, `.json`), then the content.
///
/// # Errors
///
/// I/O errors from loading, or `SchemaError::UnknownFormat`.
pub fn load_schema_auto(source: &str, format: Option<Format>) -> Result<LoadedSchema, SchemaError> {
    let text = if is_url(source) {
        fetch(source)?
    } else {
        load_schema(Path::new(source))?
    };

    // Ignore query strings and fragments when looking at a URL's extension.
    let path_part = source.split(['?', '#']).next().unwrap_or(source);
    let format = format
        .or_else(|| Format::from_path(Path::new(path_part)))
        .or_else(|| sniff_format(&text))
        .ok_or_else(|| SchemaError::UnknownFormat {
            source_name: source.to_string(),
        })?;

    debug!(source, %format, bytes = text.len(), "loaded schema");
    Ok(LoadedSchema {
        source: source.to_string(),
        format,
        text,
    })
}

#[cfg(feature = "remote")]
fn fetch(url: &str) -> Result<String, SchemaError> {
    load_schema_url(url)
}

#[cfg(not(feature = "remote"))]
fn fetch(url: &str) -> Result<String, SchemaError> {
    Err(SchemaError::FileNotFound {
        path: std::path::PathBuf::from(url),
    })
}

/// Guess the format from the text itself.
fn sniff_format(text: &str) -> Option<Format> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        let looks_like_proto = trimmed
            .lines()
            .map(str::trim)
            .any(|line| line.starts_with("syntax") || line.starts_with("message ") || line.starts_with("package "));
        return looks_like_proto.then_some(Format::Protobuf);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    match &value {
        serde_json::Value::Array(_) => Some(Format::Avro),
        serde_json::Value::Object(map) => {
            if map.contains_key("$schema") || map.contains_key("properties") || map.contains_key("$defs") {
                Some(Format::JsonSchema)
            } else if matches!(
                map.get("type").and_then(|t| t.as_str()),
                Some("record" | "error" | "enum" | "fixed")
            ) {
                Some(Format::Avro)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    const USER_AVSC: &str = r#"{"type": "record", "name": "User", "fields": [{"name": "id", "type": "long"}]}"#;

    #[test]
    fn load_schema_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{USER_AVSC}").unwrap();

        let text = load_schema(file.path()).unwrap();
        assert_eq!(text, USER_AVSC);
    }

    #[test]
    fn load_schema_file_not_found() {
        let result = load_schema(Path::new("/nonexistent/user.avsc"));
        assert!(matches!(result, Err(SchemaError::FileNotFound { .. })));
    }

    #[test]
    fn load_schema_str_sniffs_format() {
        assert_eq!(load_schema_str(USER_AVSC, None).unwrap().format, Format::Avro);
        assert_eq!(
            load_schema_str("syntax = \"proto3\";\nmessage A {}", None).unwrap().format,
            Format::Protobuf
        );
        assert_eq!(
            load_schema_str(r#"{"properties": {}}"#, None).unwrap().format,
            Format::JsonSchema
        );
        assert!(matches!(
            load_schema_str("plain words", None),
            Err(SchemaError::UnknownFormat { .. })
        ));
        assert_eq!(
            load_schema_str("plain words", Some(Format::Protobuf)).unwrap().format,
            Format::Protobuf
        );
    }

    #[test]
    fn is_url_https() {
        assert!(is_url("https://example.com/user.avsc"));
    }

    #[test]
    fn is_url_http() {
        assert!(is_url("http://example.com/user.proto"));
    }

    #[test]
    fn is_url_file_path() {
        assert!(!is_url("/path/to/user.avsc"));
        assert!(!is_url("./user.proto"));
        assert!(!is_url("user.json"));
    }

    #[test]
    fn load_schema_auto_uses_extension() {
        let mut file = Builder::new().suffix(".avsc").tempfile().unwrap();
        write!(file, "{USER_AVSC}").unwrap();

        let loaded = load_schema_auto(file.path().to_str().unwrap(), None).unwrap();
        assert_eq!(loaded.format, Format::Avro);
        let schema = loaded.parse().unwrap();
        assert!(schema.contains("User"));
    }

    #[test]
    fn load_schema_auto_explicit_format_wins() {
        let mut file = Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, r#"{{"title": "T", "properties": {{}}}}"#).unwrap();

        let loaded = load_schema_auto(file.path().to_str().unwrap(), Some(Format::JsonSchema)).unwrap();
        assert_eq!(loaded.format, Format::JsonSchema);
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_schema_url_valid() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/schemas/user.avsc")
                .with_status(200)
                .with_body(USER_AVSC)
                .create();

            let text = load_schema_url(&format!("{}/schemas/user.avsc", server.url())).unwrap();
            assert_eq!(text, USER_AVSC);
            mock.assert();
        }

        #[test]
        fn load_schema_url_404() {
            let mut server = mockito::Server::new();
            let _mock = server.mock("GET", "/missing.proto").with_status(404).create();

            let result = load_schema_url(&format!("{}/missing.proto", server.url()));
            assert!(matches!(result, Err(SchemaError::NetworkError { .. })));
        }

        #[test]
        fn load_schema_auto_url_detects_by_extension() {
            let mut server = mockito::Server::new();
            let _mock = server
                .mock("GET", "/user.avsc")
                .match_query(mockito::Matcher::Any)
                .with_body(USER_AVSC)
                .create();

            let loaded = load_schema_auto(&format!("{}/user.avsc?rev=2", server.url()), None).unwrap();
            assert_eq!(loaded.format, Format::Avro);
        }
    }
}
