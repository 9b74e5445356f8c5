//! File-pattern suggestions.
//!
//! Turns a repository file listing into ranked include/exclude glob
//! candidates so a caller can scope generation before submitting a job.
//! The analysis is a pure function of the listing.
//!
//! # Classification
//!
//! | Bucket | Key | Pattern |
//! |--------|-----|---------|
//! | Directory | first path segment | `*<dir>*` |
//! | Extension | lower-cased text after the last dot (max 10 chars) | `*.<ext>` |
//! | Specific file | dotfiles without a further dot, `Dockerfile`, `Makefile`, `README`, `LICENSE` | literal name |
//!
//! Output is grouped directories → extensions → specific files, each group
//! sorted by match count, descending. Ties keep the order in which buckets
//! were first seen.

use std::collections::HashMap;

use crate::models::{FileEntry, PatternKind, PatternSuggestion};

/// Extensions longer than this are treated as part of the file name.
const MAX_EXTENSION_LEN: usize = 10;

const SPECIAL_FILES: [&str; 4] = ["Dockerfile", "Makefile", "README", "LICENSE"];

/// Hidden directories that are still worth suggesting.
const VISIBLE_DOT_DIRS: [&str; 2] = [".github", ".vscode"];

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

#[derive(Default, Clone, Copy)]
struct Tally {
    count: u64,
    size: u64,
}

/// Insertion-ordered tally map.
#[derive(Default)]
struct Buckets {
    order: Vec<(String, Tally)>,
    index: HashMap<String, usize>,
}

impl Buckets {
    fn add(&mut self, key: &str, size: u64) {
        let slot = match self.index.get(key) {
            Some(&i) => i,
            None => {
                self.order.push((key.to_string(), Tally::default()));
                self.index.insert(key.to_string(), self.order.len() - 1);
                self.order.len() - 1
            }
        };
        let tally = &mut self.order[slot].1;
        tally.count += 1;
        tally.size += size;
    }

    fn into_entries(self) -> impl Iterator<Item = (String, Tally)> {
        self.order.into_iter()
    }
}

/// Analyze a file listing and return ranked pattern suggestions.
pub fn suggest_patterns(files: &[FileEntry]) -> Vec<PatternSuggestion> {
    let mut directories = Buckets::default();
    let mut extensions = Buckets::default();
    let mut specific_files = Buckets::default();

    for entry in files {
        let size = entry.size_bytes;
        let filename = match entry.path.split_once('/') {
            Some((top_dir, _)) => {
                directories.add(top_dir, size);
                entry.path.rsplit('/').next().unwrap_or_default()
            }
            None => entry.path.as_str(),
        };

        if is_bare_dotfile(filename) || SPECIAL_FILES.contains(&filename) {
            specific_files.add(filename, size);
            continue;
        }

        if let Some((_, ext)) = filename.rsplit_once('.') {
            let ext = ext.to_lowercase();
            if ext.chars().count() <= MAX_EXTENSION_LEN {
                extensions.add(&ext, size);
            }
        }
    }

    tracing::debug!(
        extensions = extensions.order.len(),
        directories = directories.order.len(),
        specific_files = specific_files.order.len(),
        "analyzed file listing"
    );

    let mut dir_suggestions: Vec<PatternSuggestion> = directories
        .into_entries()
        .filter(|(name, _)| !name.starts_with('.') || VISIBLE_DOT_DIRS.contains(&name.as_str()))
        .map(|(name, tally)| {
            suggestion(
                format!("*{}*", name),
                directory_label(&name),
                tally,
                PatternKind::Directory,
            )
        })
        .collect();

    let mut ext_suggestions: Vec<PatternSuggestion> = extensions
        .into_entries()
        .map(|(ext, tally)| {
            suggestion(
                format!("*.{}", ext),
                extension_label(&ext),
                tally,
                PatternKind::Extension,
            )
        })
        .collect();

    let mut file_suggestions: Vec<PatternSuggestion> = specific_files
        .into_entries()
        .map(|(name, tally)| {
            let label = format!("{} Files", name);
            suggestion(name, label, tally, PatternKind::SpecificFile)
        })
        .collect();

    // sort_by is stable, so equal counts keep first-seen order.
    for group in [
        &mut dir_suggestions,
        &mut ext_suggestions,
        &mut file_suggestions,
    ] {
        group.sort_by(|a, b| b.match_count.cmp(&a.match_count));
    }

    let mut out = dir_suggestions;
    out.extend(ext_suggestions);
    out.extend(file_suggestions);
    out
}

/// Format a byte count with binary units and one decimal place.
///
/// ```
/// use codebase_tutor::patterns::format_size;
///
/// assert_eq!(format_size(500), "500 B");
/// assert_eq!(format_size(2048), "2.0 KB");
/// ```
pub fn format_size(bytes: u64) -> String {
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

fn suggestion(
    pattern: String,
    label: String,
    tally: Tally,
    kind: PatternKind,
) -> PatternSuggestion {
    PatternSuggestion {
        pattern,
        label,
        match_count: tally.count,
        total_size_bytes: tally.size,
        formatted_size: format_size(tally.size),
        kind,
    }
}

/// `.gitignore`-style names: a leading dot and no other dot.
fn is_bare_dotfile(name: &str) -> bool {
    name.strip_prefix('.')
        .map(|rest| !rest.contains('.'))
        .unwrap_or(false)
}

fn extension_label(ext: &str) -> String {
    let name = match ext {
        "py" => "Python",
        "js" => "JavaScript",
        "jsx" => "React JSX",
        "ts" => "TypeScript",
        "tsx" => "TypeScript React",
        "go" => "Go",
        "java" => "Java",
        "c" => "C",
        "cpp" => "C++",
        "h" => "Header",
        "md" => "Markdown",
        "yml" | "yaml" => "YAML",
        "json" => "JSON",
        "css" => "CSS",
        "html" => "HTML",
        "rs" => "Rust",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        _ => return format!("Files with .{} extension (*.{})", ext, ext),
    };
    format!("{} Files (*.{})", name, ext)
}

fn directory_label(dir: &str) -> String {
    let name = match dir {
        "src" => "Source",
        "lib" => "Library",
        "test" => "Test",
        "tests" => "Tests",
        "docs" => "Documentation",
        "examples" => "Examples",
        "node_modules" => "Node Modules",
        "build" => "Build Output",
        "dist" => "Distribution",
        "venv" | ".venv" => "Python Virtual Environment",
        _ => return format!("{}/** Folder", dir),
    };
    format!("{} Folder ({}/**)", name, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(out: &'a [PatternSuggestion], pattern: &str) -> &'a PatternSuggestion {
        out.iter()
            .find(|s| s.pattern == pattern)
            .unwrap_or_else(|| panic!("no suggestion for {}", pattern))
    }

    #[test]
    fn aggregates_extensions_and_directories() {
        let files = vec![
            FileEntry::new("a.py", 100),
            FileEntry::new("b.py", 200),
            FileEntry::new("src/c.py", 50),
        ];
        let out = suggest_patterns(&files);

        let py = find(&out, "*.py");
        assert_eq!(py.match_count, 3);
        assert_eq!(py.total_size_bytes, 350);
        assert_eq!(py.kind, PatternKind::Extension);
        assert_eq!(py.label, "Python Files (*.py)");

        let src = find(&out, "*src*");
        assert_eq!(src.match_count, 1);
        assert_eq!(src.total_size_bytes, 50);
        assert_eq!(src.label, "Source Folder (src/**)");
    }

    #[test]
    fn format_size_uses_binary_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * GB), "3.0 GB");
    }

    #[test]
    fn groups_are_ordered_directories_extensions_files() {
        let files = vec![
            FileEntry::new("Dockerfile", 10),
            FileEntry::new("main.rs", 10),
            FileEntry::new("lib/x.rs", 10),
        ];
        let out = suggest_patterns(&files);
        let kinds: Vec<PatternKind> = out.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PatternKind::Directory,
                PatternKind::Extension,
                PatternKind::SpecificFile
            ]
        );
    }

    #[test]
    fn sorts_each_group_by_count_descending() {
        let files = vec![
            FileEntry::new("a.md", 1),
            FileEntry::new("b.rs", 1),
            FileEntry::new("c.rs", 1),
            FileEntry::new("docs/x.md", 1),
            FileEntry::new("src/y.rs", 1),
            FileEntry::new("src/z.rs", 1),
        ];
        let out = suggest_patterns(&files);
        let patterns: Vec<&str> = out.iter().map(|s| s.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["*src*", "*docs*", "*.rs", "*.md"]);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let files = vec![
            FileEntry::new("b.go", 1),
            FileEntry::new("a.js", 1),
            FileEntry::new("c.ts", 1),
        ];
        let out = suggest_patterns(&files);
        let patterns: Vec<&str> = out.iter().map(|s| s.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["*.go", "*.js", "*.ts"]);
    }

    #[test]
    fn reordered_input_gives_same_aggregates() {
        let files = vec![
            FileEntry::new("src/a.py", 10),
            FileEntry::new("src/b.py", 20),
            FileEntry::new("tests/c.py", 5),
            FileEntry::new("README.md", 7),
        ];
        let mut reversed = files.clone();
        reversed.reverse();

        let a = suggest_patterns(&files);
        let b = suggest_patterns(&reversed);
        assert_eq!(a.len(), b.len());
        for s in &a {
            let other = find(&b, &s.pattern);
            assert_eq!(s.match_count, other.match_count);
            assert_eq!(s.total_size_bytes, other.total_size_bytes);
            assert_eq!(s.kind, other.kind);
        }
    }

    #[test]
    fn dotfiles_and_special_names_are_specific_files() {
        let files = vec![
            FileEntry::new(".gitignore", 3),
            FileEntry::new("sub/.gitignore", 4),
            FileEntry::new("Makefile", 9),
            FileEntry::new("NOTES", 1),
        ];
        let out = suggest_patterns(&files);

        let gitignore = find(&out, ".gitignore");
        assert_eq!(gitignore.kind, PatternKind::SpecificFile);
        assert_eq!(gitignore.match_count, 2);
        assert_eq!(gitignore.total_size_bytes, 7);
        assert_eq!(gitignore.label, ".gitignore Files");

        assert_eq!(find(&out, "Makefile").kind, PatternKind::SpecificFile);
        assert!(out.iter().all(|s| s.pattern != "NOTES"));
    }

    #[test]
    fn dotfile_with_extension_counts_as_extension() {
        let out = suggest_patterns(&[FileEntry::new(".eslintrc.json", 5)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pattern, "*.json");
    }

    #[test]
    fn long_extensions_are_discarded_and_case_folded() {
        let files = vec![
            FileEntry::new("archive.verylongextension", 1),
            FileEntry::new("Photo.PNG", 2),
        ];
        let out = suggest_patterns(&files);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pattern, "*.png");
        assert_eq!(out[0].label, "Files with .png extension (*.png)");
    }

    #[test]
    fn hidden_directories_are_skipped_except_known_ones() {
        let files = vec![
            FileEntry::new(".git/config", 1),
            FileEntry::new(".github/workflows/ci.yml", 1),
            FileEntry::new(".vscode/settings.json", 1),
            FileEntry::new(".venv/bin/python", 1),
        ];
        let out = suggest_patterns(&files);
        let dirs: Vec<&str> = out
            .iter()
            .filter(|s| s.kind == PatternKind::Directory)
            .map(|s| s.pattern.as_str())
            .collect();
        assert_eq!(dirs, vec!["*.github*", "*.vscode*"]);
        assert_eq!(find(&out, "*.github*").label, ".github/** Folder");
    }

    #[test]
    fn generic_directory_label() {
        let out = suggest_patterns(&[FileEntry::new("scripts/run.sh", 1)]);
        assert_eq!(find(&out, "*scripts*").label, "scripts/** Folder");
    }

    #[test]
    fn empty_listing_yields_nothing() {
        assert!(suggest_patterns(&[]).is_empty());
    }

    #[test]
    fn missing_size_deserializes_as_zero() {
        let entry: FileEntry = serde_json::from_str(r#"{"path":"a.py"}"#).unwrap();
        assert_eq!(entry.size_bytes, 0);
    }
}
