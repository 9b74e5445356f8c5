//! GitHub tree listing for the pattern analyzer.
//!
//! Fetches the recursive git tree of a repository's default branch
//! (`main`, falling back to `master` on 404) and keeps only blobs.
//!
//! # Authentication
//!
//! Public repositories need no token. When a token is supplied it is sent
//! as `Authorization: token <value>` for that request only.

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::GithubConfig;
use crate::error::{TutorError, TutorResult};
use crate::models::FileEntry;

const USER_AGENT: &str = concat!("codebase-tutor/", env!("CARGO_PKG_VERSION"));

/// Owner and repository name parsed from a GitHub URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

/// Accepts `https://github.com/owner/repo[.git]` and
/// `git@github.com:owner/repo.git`.
pub fn parse_github_url(url: &str) -> TutorResult<RepoSlug> {
    if url.trim_matches('/').split('/').count() < 2 {
        return Err(TutorError::client("Invalid repository URL format"));
    }
    if !url.contains("github.com") {
        return Err(TutorError::client("Only GitHub repositories are supported"));
    }

    let rest = match url.split_once("github.com/") {
        Some((_, rest)) => rest,
        None => url.split_once(':').map(|(_, rest)| rest).unwrap_or(""),
    };

    let mut parts = rest.split('/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => Ok(RepoSlug {
            owner: owner.to_string(),
            repo: repo.replace(".git", ""),
        }),
        _ => Err(TutorError::client("Invalid repository URL format")),
    }
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

pub struct GithubClient {
    client: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// All blobs in the repository's default branch.
    pub async fn list_files(&self, slug: &RepoSlug, token: Option<&str>) -> TutorResult<Vec<FileEntry>> {
        let mut response = self.fetch_tree(slug, "main", token).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(owner = %slug.owner, repo = %slug.repo, "no main branch, trying master");
            response = self.fetch_tree(slug, "master", token).await?;
        }

        let status = response.status();
        if status != StatusCode::OK {
            let details = response
                .json::<ApiMessage>()
                .await
                .ok()
                .and_then(|m| m.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(TutorError::Upstream {
                status: status.as_u16(),
                message: format!("GitHub API error: {}", status.as_u16()),
                details,
            });
        }

        let body: TreeResponse = response
            .json()
            .await
            .map_err(|e| TutorError::Transient(anyhow::anyhow!("Invalid tree response: {}", e)))?;
        if body.truncated {
            tracing::warn!(owner = %slug.owner, repo = %slug.repo, "tree listing truncated by GitHub");
        }

        Ok(body
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob")
            .map(|item| FileEntry::new(item.path, item.size.unwrap_or(0)))
            .collect())
    }

    async fn fetch_tree(
        &self,
        slug: &RepoSlug,
        git_ref: &str,
        token: Option<&str>,
    ) -> TutorResult<reqwest::Response> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, slug.owner, slug.repo, git_ref
        );
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.header("Authorization", format!("token {}", token));
        }

        request.send().await.map_err(|e| TutorError::Upstream {
            status: 500,
            message: "Failed to connect to GitHub API".to_string(),
            details: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug(owner: &str, repo: &str) -> RepoSlug {
        RepoSlug {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    #[test]
    fn parses_https_and_ssh_urls() {
        assert_eq!(
            parse_github_url("https://github.com/acme/widget").unwrap(),
            slug("acme", "widget")
        );
        assert_eq!(
            parse_github_url("https://github.com/acme/widget.git/").unwrap(),
            slug("acme", "widget")
        );
        assert_eq!(
            parse_github_url("git@github.com:acme/widget.git").unwrap(),
            slug("acme", "widget")
        );
        assert_eq!(
            parse_github_url("https://github.com/acme/widget/tree/dev").unwrap(),
            slug("acme", "widget")
        );
    }

    #[test]
    fn rejects_other_hosts_and_short_urls() {
        let err = parse_github_url("https://gitlab.com/acme/widget").unwrap_err();
        assert_eq!(err.to_string(), "Only GitHub repositories are supported");

        let err = parse_github_url("widget").unwrap_err();
        assert_eq!(err.to_string(), "Invalid repository URL format");

        let err = parse_github_url("https://github.com/acme").unwrap_err();
        assert_eq!(err.to_string(), "Invalid repository URL format");
    }

    #[test]
    fn tree_response_keeps_sizes() {
        let body: TreeResponse = serde_json::from_str(
            r#"{"sha":"x","tree":[
                {"path":"src","type":"tree"},
                {"path":"src/main.rs","type":"blob","size":120},
                {"path":"vendor","type":"commit"}
            ],"truncated":false}"#,
        )
        .unwrap();
        assert_eq!(body.tree.len(), 3);
        assert_eq!(body.tree[1].size, Some(120));
        assert!(body.tree[0].size.is_none());
    }
}
