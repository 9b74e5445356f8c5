//! Tutorial artifact repository.
//!
//! Generated tutorials are stored as Markdown objects keyed
//! `<repo_id>/<path>.md` in a flat namespace. This module rebuilds the
//! chapter/lesson hierarchy from key names on every read; the tree itself is
//! never stored.
//!
//! # Layouts
//!
//! ```text
//! chaptered                      flat fallback
//! ─────────                      ─────────────
//! widget/chapter_1/intro.md      widget/index.md      → "Overview"
//! widget/chapter_1/setup.md      widget/usage.md      → "Usage"
//! widget/chapter_2/api.md
//! ```
//!
//! Chaptered layouts win whenever at least one `chapter_*` directory holds a
//! Markdown key. Chapters sort by their numeric suffix; suffixes that are not
//! numbers sort last.
//!
//! # Path safety
//!
//! Content is addressed by the full key `<repo_id>/<file_path>`. The repo
//! part is always re-sanitized by [`repo_name_from_url`], and backends treat
//! keys as opaque strings, so a `file_path` containing `..` names a
//! different (missing) object rather than a parent directory. The
//! filesystem backend enforces the same property explicitly.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;

use crate::error::{TutorError, TutorResult};
use crate::models::{ArtifactTree, Chapter, Lesson};
use crate::repo_id::repo_name_from_url;
use crate::store::ObjectStore;

const CHAPTER_PREFIX: &str = "chapter_";
const MARKDOWN_EXT: &str = ".md";
const INDEX_FILE: &str = "index.md";

#[derive(Clone)]
pub struct ArtifactRepository {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactRepository {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Discover the chapter/lesson tree for `repo_name`.
    ///
    /// `repo_name` may be a bare name or a full URL; it is sanitized before
    /// use. In flat mode the synthetic chapter is titled with `repo_name`
    /// exactly as given.
    pub async fn structure(&self, repo_name: &str) -> TutorResult<ArtifactTree> {
        let repo_id = repo_name_from_url(repo_name);
        let prefix = format!("{}/", repo_id);

        let objects = self.store.list(&prefix).await?;
        if objects.is_empty() {
            return Err(TutorError::not_found(
                "Output not found for this repository",
            ));
        }

        // Relative keys of Markdown objects, split into segments.
        let markdown: Vec<Vec<&str>> = objects
            .iter()
            .filter(|o| o.key.ends_with(MARKDOWN_EXT))
            .map(|o| o.key.split('/').collect())
            .collect();

        let chapter_dirs: BTreeSet<&str> = markdown
            .iter()
            .filter(|parts| parts.len() > 2 && parts[1].starts_with(CHAPTER_PREFIX))
            .map(|parts| parts[1])
            .collect();

        let mut tree = ArtifactTree::default();

        if chapter_dirs.is_empty() {
            let lessons = flat_lessons(&markdown);
            if lessons.is_empty() {
                return Err(TutorError::not_found(
                    "Could not determine tutorial structure (no chapter_* dirs or *.md files found)",
                ));
            }
            tree.chapters.push(Chapter {
                title: repo_name.to_string(),
                lessons,
            });
            return Ok(tree);
        }

        let mut chapter_dirs: Vec<&str> = chapter_dirs.into_iter().collect();
        chapter_dirs.sort_by_key(|name| (chapter_sort_key(name), *name));

        for chapter in chapter_dirs {
            let mut paths: Vec<String> = markdown
                .iter()
                .filter(|parts| parts.len() == 3 && parts[1] == chapter)
                .map(|parts| parts[1..].join("/"))
                .collect();
            paths.sort();

            if paths.is_empty() {
                continue;
            }

            let lessons = paths
                .into_iter()
                .map(|path| {
                    let file = path.rsplit('/').next().unwrap_or_default();
                    Lesson::new(display_title(stem(file)), path.clone())
                })
                .collect();
            tree.chapters.push(Chapter {
                title: display_title(chapter),
                lessons,
            });
        }

        if tree.chapters.is_empty() {
            return Err(TutorError::not_found(
                "Could not determine tutorial structure (found chapter_* dirs but no *.md files inside)",
            ));
        }

        Ok(tree)
    }

    /// Return one artifact's full text.
    pub async fn content(&self, repo_name: &str, file_path: &str) -> TutorResult<String> {
        let key = format!("{}/{}", repo_name_from_url(repo_name), file_path);

        if !self.store.exists(&key).await? {
            return Err(TutorError::not_found("File not found"));
        }
        let bytes = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| TutorError::not_found("File not found"))?;

        String::from_utf8(bytes)
            .map_err(|e| TutorError::Transient(anyhow!("{} is not valid UTF-8: {}", key, e)))
    }

    /// Write one artifact under the repository prefix.
    pub async fn publish(&self, repo_id: &str, relative_path: &str, body: &[u8]) -> anyhow::Result<()> {
        self.store
            .put(&format!("{}/{}", repo_id, relative_path), body)
            .await
    }
}

/// Lessons directly under the repository prefix, `index.md` first.
fn flat_lessons(markdown: &[Vec<&str>]) -> Vec<Lesson> {
    let mut lessons = Vec::new();
    for parts in markdown.iter().filter(|parts| parts.len() == 2) {
        let file = parts[1];
        if file == INDEX_FILE {
            lessons.insert(0, Lesson::new("Overview", INDEX_FILE));
        } else {
            lessons.push(Lesson::new(display_title(stem(file)), file));
        }
    }
    lessons
}

/// Numeric suffixes first, in numeric order; anything else after.
fn chapter_sort_key(name: &str) -> (u8, u64) {
    let suffix = name.strip_prefix(CHAPTER_PREFIX).unwrap_or(name);
    if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = suffix.parse::<u64>() {
            return (0, n);
        }
    }
    (1, 0)
}

fn stem(file: &str) -> &str {
    file.strip_suffix(MARKDOWN_EXT).unwrap_or(file)
}

/// `"chapter_1"` → `"Chapter 1"`, `"getting_STARTED"` → `"Getting Started"`.
///
/// Letters that follow another letter are lower-cased, every other letter is
/// upper-cased.
pub fn display_title(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_letter = false;
    for c in name.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphabetic() {
            if prev_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(c);
            prev_letter = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryObjectStore;

    async fn repo_with(keys: &[(&str, &str)]) -> ArtifactRepository {
        let store = Arc::new(InMemoryObjectStore::new());
        for (key, body) in keys {
            store.put(key, body.as_bytes()).await.unwrap();
        }
        ArtifactRepository::new(store)
    }

    fn titles(tree: &ArtifactTree) -> Vec<&str> {
        tree.chapters.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn display_titles() {
        assert_eq!(display_title("chapter_1"), "Chapter 1");
        assert_eq!(display_title("getting_STARTED"), "Getting Started");
        assert_eq!(display_title("01_intro"), "01 Intro");
        assert_eq!(display_title("what's_new"), "What'S New");
    }

    #[test]
    fn chapter_keys() {
        assert_eq!(chapter_sort_key("chapter_2"), (0, 2));
        assert_eq!(chapter_sort_key("chapter_10"), (0, 10));
        assert_eq!(chapter_sort_key("chapter_intro"), (1, 0));
        assert_eq!(chapter_sort_key("chapter_"), (1, 0));
        assert_eq!(chapter_sort_key("chapter_+3"), (1, 0));
    }

    #[tokio::test]
    async fn chapters_sort_numerically() {
        let repo = repo_with(&[
            ("widget/chapter_2/b.md", "b"),
            ("widget/chapter_10/c.md", "c"),
            ("widget/chapter_1/a.md", "a"),
            ("widget/chapter_appendix/z.md", "z"),
        ])
        .await;

        let tree = repo.structure("widget").await.unwrap();
        assert_eq!(
            titles(&tree),
            vec!["Chapter 1", "Chapter 2", "Chapter 10", "Chapter Appendix"]
        );
        assert_eq!(tree.chapters[0].lessons, vec![Lesson::new("A", "chapter_1/a.md")]);
    }

    #[tokio::test]
    async fn lessons_sort_lexicographically_and_ignore_other_files() {
        let repo = repo_with(&[
            ("widget/chapter_1/02_usage.md", ""),
            ("widget/chapter_1/01_setup.md", ""),
            ("widget/chapter_1/diagram.png", ""),
            ("widget/chapter_1/deep/nested.md", ""),
            ("widget/index.md", ""),
        ])
        .await;

        let tree = repo.structure("widget").await.unwrap();
        assert_eq!(tree.chapters.len(), 1);
        assert_eq!(
            tree.chapters[0].lessons,
            vec![
                Lesson::new("01 Setup", "chapter_1/01_setup.md"),
                Lesson::new("02 Usage", "chapter_1/02_usage.md"),
            ]
        );
    }

    #[tokio::test]
    async fn flat_fallback_puts_index_first() {
        let repo = repo_with(&[("widget/notes.md", "n"), ("widget/index.md", "i")]).await;

        let tree = repo.structure("https://github.com/acme/widget.git").await.unwrap();
        assert_eq!(titles(&tree), vec!["https://github.com/acme/widget.git"]);
        assert_eq!(
            tree.chapters[0].lessons,
            vec![Lesson::new("Overview", "index.md"), Lesson::new("Notes", "notes.md")]
        );
    }

    #[tokio::test]
    async fn missing_prefix_is_not_found() {
        let repo = repo_with(&[("other/index.md", "x")]).await;
        let err = repo.structure("widget").await.unwrap_err();
        assert!(matches!(err, TutorError::NotFound(ref m) if m.contains("Output not found")));
    }

    #[tokio::test]
    async fn prefix_without_markdown_is_not_found() {
        let repo = repo_with(&[("widget/output.json", "{}")]).await;
        let err = repo.structure("widget").await.unwrap_err();
        assert!(matches!(err, TutorError::NotFound(ref m) if m.contains("no chapter_* dirs")));
    }

    #[tokio::test]
    async fn empty_chapters_are_not_found() {
        let repo = repo_with(&[("widget/chapter_1/deep/x.md", "")]).await;
        let err = repo.structure("widget").await.unwrap_err();
        assert!(matches!(err, TutorError::NotFound(ref m) if m.contains("found chapter_* dirs")));
    }

    #[tokio::test]
    async fn similar_prefixes_do_not_leak() {
        let repo = repo_with(&[("widget-pro/index.md", "")]).await;
        assert!(repo.structure("widget").await.is_err());
    }

    #[tokio::test]
    async fn content_returns_exact_text() {
        let body = "# Título\n\nLine with `code`.\n";
        let repo = repo_with(&[("widget/chapter_1/intro.md", body)]).await;
        let text = repo.content("widget", "chapter_1/intro.md").await.unwrap();
        assert_eq!(text, body);
    }

    #[tokio::test]
    async fn content_missing_is_not_found() {
        let repo = repo_with(&[("widget/index.md", "x")]).await;
        let err = repo.content("widget", "nope.md").await.unwrap_err();
        assert!(matches!(err, TutorError::NotFound(ref m) if m == "File not found"));
    }

    #[tokio::test]
    async fn content_cannot_escape_repository_prefix() {
        let repo = repo_with(&[("secret/index.md", "classified"), ("widget/index.md", "ok")]).await;
        assert!(repo.content("widget", "../secret/index.md").await.is_err());
        assert_eq!(repo.content("widget", "index.md").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn invalid_utf8_is_transient() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("widget/bin.md", &[0xff, 0xfe]).await.unwrap();
        let repo = ArtifactRepository::new(store);
        let err = repo.content("widget", "bin.md").await.unwrap_err();
        assert!(matches!(err, TutorError::Transient(_)));
    }
}
