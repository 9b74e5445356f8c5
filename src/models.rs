//! Core data models used throughout Codebase Tutor.
//!
//! These types describe the repository listings that feed the pattern
//! analyzer and the tutorial trees served back to clients.

use serde::{Deserialize, Serialize};

/// One blob in a repository's source tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileEntry {
    pub path: String,
    /// Size in bytes. Listings without a size count as zero.
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }
}

/// How a [`PatternSuggestion`] was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Directory,
    Extension,
    SpecificFile,
}

/// A ranked include/exclude glob candidate with aggregate sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternSuggestion {
    pub pattern: String,
    pub label: String,
    #[serde(rename = "count")]
    pub match_count: u64,
    #[serde(rename = "size")]
    pub total_size_bytes: u64,
    pub formatted_size: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
}

/// A single Markdown artifact inside a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub title: String,
    /// Object key relative to the repository prefix.
    pub path: String,
}

impl Lesson {
    pub fn new(title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub lessons: Vec<Lesson>,
}

/// Chapter/lesson view synthesized from an artifact listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtifactTree {
    pub chapters: Vec<Chapter>,
}

/// A failure diagnostic persisted by the error sink.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub id: uuid::Uuid,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            message: message.into(),
        }
    }

    /// Object key under the error namespace.
    pub fn key(&self) -> String {
        format!("log-{}.txt", self.id)
    }
}
