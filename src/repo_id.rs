//! Repository identifiers.
//!
//! A repository URL is reduced to a single path-safe segment that names the
//! repository's artifact prefix (`<repo_id>/...`) and defaults the job's
//! `repo_name`. The same function re-sanitizes names arriving on read routes.

/// Identifier returned when nothing usable survives sanitization.
pub const UNKNOWN_REPO: &str = "unknown_repo";

/// Derive a namespace-safe repository identifier from a source URL.
///
/// Strips one trailing `.git`, keeps the last `/`-separated segment and
/// removes every `..` and `/` from it. Never fails: degenerate input yields
/// [`UNKNOWN_REPO`].
///
/// ```
/// use codebase_tutor::repo_id::repo_name_from_url;
///
/// assert_eq!(repo_name_from_url("https://github.com/acme/widget.git"), "widget");
/// assert_eq!(repo_name_from_url(""), "unknown_repo");
/// ```
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.strip_suffix(".git").unwrap_or(url);
    let last = trimmed.rsplit('/').next().unwrap_or_default();
    let name = last.replace("..", "").replace('/', "");

    if name.is_empty() {
        UNKNOWN_REPO.to_string()
    } else {
        name
    }
}
