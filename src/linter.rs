//! Schema linting - batch checking of schema files.
//!
//! Every `.avsc`, `.proto` and `.json` file is parsed with its codec. Files
//! that parse are then rendered into the other two formats to flag
//! constructs that would not survive a conversion.
//!
//! | Code | Severity | Meaning |
//! |------|----------|---------|
//! | E001 | error | syntax error or unsupported feature |
//! | E002 | error | file cannot be read |
//! | E003 | error | unknown, unresolved or unboundedly recursive type reference |
//! | E004 | error | format constraint violated |
//! | W001 | warning | cannot be rendered as Avro |
//! | W002 | warning | cannot be rendered as Protobuf (after numbering fields) |
//! | W003 | warning | cannot be rendered as JSON Schema |

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::convert::{self, assign_field_numbers};
use crate::error::{ErrorKind, SchemaError};
use crate::ir::Schema;
use crate::loader::load_schema;
use crate::types::{Format, RenderOptions};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// IR path or source location of the issue (e.g., "/Person/id", "line 4")
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub format: Format,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all schema files.
/// If `strict` is true, warnings are treated as errors.
/// Returns aggregated results for all files.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_schema_files(path);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for (file, format) in &files {
        let file_result = lint_file(file, *format, path);
        for d in &file_result.diagnostics {
            match d.severity {
                Severity::Error => total_errors += 1,
                Severity::Warning => total_warnings += 1,
            }
        }
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    debug!(files = files.len(), errors = total_errors, warnings = total_warnings, "lint finished");
    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Lint a single schema file of a known format.
pub fn lint_file(file: &Path, format: Format, base_path: &Path) -> FileResult {
    let diagnostics = match load_schema(file) {
        Ok(text) => match convert::parse(&text, format) {
            Ok(schema) => portability(&schema, format, file),
            Err(e) => vec![error_diagnostic(&e, file)],
        },
        Err(e) => vec![error_diagnostic(&e, file)],
    };

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        format,
        status,
        diagnostics,
    }
}

fn error_diagnostic(err: &SchemaError, file: &Path) -> Diagnostic {
    let code = match err.kind() {
        ErrorKind::Parse | ErrorKind::UnsupportedFeature => "E001",
        ErrorKind::Io | ErrorKind::Argument => "E002",
        ErrorKind::UnknownTypeReference | ErrorKind::UnresolvedTypeReference | ErrorKind::UnboundedRecursion => {
            "E003"
        }
        ErrorKind::Validation | ErrorKind::Serialization => "E004",
    };
    Diagnostic {
        severity: Severity::Error,
        code: code.to_string(),
        file: file.to_path_buf(),
        path: error_location(err),
        message: err.to_string(),
        hint: err.hint(),
    }
}

fn error_location(err: &SchemaError) -> String {
    match err {
        SchemaError::Parse { location, .. } => location.clone(),
        SchemaError::UnknownTypeReference { path, .. }
        | SchemaError::UnresolvedTypeReference { path, .. }
        | SchemaError::Validation { path, .. }
        | SchemaError::Serialization { path, .. } => path.clone(),
        _ => "/".to_string(),
    }
}

/// Render a parsed schema into the other formats and report what fails.
fn portability(schema: &Schema, source: Format, file: &Path) -> Vec<Diagnostic> {
    let options = RenderOptions::new();
    let mut diagnostics = Vec::new();

    for target in Format::ALL {
        if target == source {
            continue;
        }
        let result = match target {
            // Field numbers are expected to be missing outside Protobuf.
            Format::Protobuf => convert::render(&assign_field_numbers(schema), target, &options),
            _ => convert::render(schema, target, &options),
        };
        if let Err(e) = result {
            let code = match target {
                Format::Avro => "W001",
                Format::Protobuf => "W002",
                Format::JsonSchema => "W003",
            };
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                code: code.to_string(),
                file: file.to_path_buf(),
                path: error_location(&e),
                message: format!("not portable to {target}: {e}"),
                hint: e.hint(),
            });
        }
    }
    diagnostics
}

/// Collect all schema files in a path (file or directory) with their format.
fn collect_schema_files(path: &Path) -> Vec<(PathBuf, Format)> {
    if path.is_file() {
        return Format::from_path(path)
            .map(|format| vec![(path.to_path_buf(), format)])
            .unwrap_or_default();
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
        .into_iter()
        .filter_map(|file| Format::from_path(&file).map(|format| (file, format)))
        .collect()
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if Format::from_path(&path).is_some() {
            files.push(path);
        }
    }
}
