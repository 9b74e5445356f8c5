//! Generation job payloads.
//!
//! A job travels through the queue as the raw JSON body the client posted.
//! It is checked twice: once at submission ([`validate_submission`], so bad
//! requests are rejected before anything is enqueued) and again by the worker
//! ([`GenerationJob::from_payload`]), which also normalizes pattern lists and
//! applies defaults.
//!
//! ```json
//! {
//!   "gemini_key": "…",
//!   "github_token": "…",
//!   "repo_url": "https://github.com/acme/widget",
//!   "include_patterns": "*.rs,*.md",
//!   "exclude_patterns": "target/*",
//!   "max_file_size": 100000
//! }
//! ```

use std::collections::BTreeSet;

use globset::Glob;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{TutorError, TutorResult};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000;

pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.py", "*.js", "*.jsx", "*.ts", "*.tsx", "*.go", "*.java", "*.pyi", "*.pyx", "*.c", "*.cc",
    "*.cpp", "*.h", "*.md", "*.rst", "Dockerfile", "Makefile", "*.yaml", "*.yml",
];

pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "venv/*",
    ".venv/*",
    "*test*",
    "tests/*",
    "docs/*",
    "examples/*",
    "v1/*",
    "dist/*",
    "build/*",
    "experimental/*",
    "deprecated/*",
    "legacy/*",
    ".git/*",
    ".github/*",
    ".next/*",
    ".vscode/*",
    "obj/*",
    "bin/*",
    "node_modules/*",
    "*.log",
];

const MISSING_FIELDS: &str = "Missing required fields: gemini_key, repo_url";

/// Why the worker refused a queued payload. The display text is what lands
/// in the error sink.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid JSON in queue message: {0}")]
    InvalidJson(String),

    #[error("Missing required fields: gemini_key, repo_url.")]
    MissingFields,

    #[error("Invalid glob pattern: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid max_file_size: {0}")]
    InvalidMaxFileSize(String),
}

/// Submission-time check for `POST /start-job`.
///
/// On success the caller forwards `body` to the queue unchanged.
pub fn validate_submission(body: &[u8]) -> TutorResult<()> {
    let object = parse_object(body).map_err(|_| TutorError::client("Invalid JSON"))?;
    if required_str(&object, "gemini_key").is_none() || required_str(&object, "repo_url").is_none()
    {
        return Err(TutorError::client(MISSING_FIELDS));
    }
    Ok(())
}

/// A fully validated job, ready for the flow engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub gemini_key: String,
    pub github_token: Option<String>,
    pub repo_url: String,
    pub include_patterns: BTreeSet<String>,
    pub exclude_patterns: BTreeSet<String>,
    pub max_file_size: u64,
}

impl GenerationJob {
    pub fn from_payload(payload: &str) -> Result<Self, JobError> {
        let object =
            parse_object(payload.as_bytes()).map_err(|e| JobError::InvalidJson(e.to_string()))?;

        let (Some(gemini_key), Some(repo_url)) = (
            required_str(&object, "gemini_key"),
            required_str(&object, "repo_url"),
        ) else {
            return Err(JobError::MissingFields);
        };

        let github_token = required_str(&object, "github_token").map(str::to_string);

        let include_patterns = pattern_set(&object, "include_patterns", DEFAULT_INCLUDE_PATTERNS)?;
        let exclude_patterns = pattern_set(&object, "exclude_patterns", DEFAULT_EXCLUDE_PATTERNS)?;

        let max_file_size = match object.get("max_file_size") {
            None | Some(Value::Null) => DEFAULT_MAX_FILE_SIZE,
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| JobError::InvalidMaxFileSize(n.to_string()))?,
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| JobError::InvalidMaxFileSize(s.clone()))?,
            Some(other) => return Err(JobError::InvalidMaxFileSize(other.to_string())),
        };

        Ok(Self {
            gemini_key: gemini_key.to_string(),
            github_token,
            repo_url: repo_url.to_string(),
            include_patterns,
            exclude_patterns,
            max_file_size,
        })
    }
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_slice(body)
}

fn required_str<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    match object.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

/// Split a comma-joined pattern string; fall back to `defaults` when the
/// field is absent or yields no patterns.
fn pattern_set(
    object: &Map<String, Value>,
    field: &str,
    defaults: &[&str],
) -> Result<BTreeSet<String>, JobError> {
    let raw = match object.get(field) {
        Some(Value::String(s)) => s.as_str(),
        _ => "",
    };

    let patterns = split_patterns(raw);
    if patterns.is_empty() {
        return Ok(defaults.iter().map(|p| p.to_string()).collect());
    }

    for pattern in &patterns {
        Glob::new(pattern).map_err(|e| JobError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(patterns)
}

pub fn split_patterns(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
