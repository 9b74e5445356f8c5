//! S3-backed [`ObjectStore`].
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication,
//! using only pure-Rust dependencies (`hmac`, `sha2`). Each logical
//! namespace lives under the key prefix `<namespace>/` of one bucket.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//!
//! [storage.s3]
//! bucket = "acme-tutorials"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional
//!
//! Large namespaces are listed with `ListObjectsV2` continuation tokens.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};

use super::fs::is_safe_key;
use super::{ObjectMeta, ObjectStore};
use crate::config::S3StorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// An S3 bucket prefix acting as one namespace.
pub struct S3ObjectStore {
    config: S3StorageConfig,
    creds: AwsCredentials,
    /// `"<namespace>/"`, prepended to every key.
    key_prefix: String,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(config: S3StorageConfig, creds: AwsCredentials, namespace: &str) -> Self {
        Self {
            config,
            creds,
            key_prefix: format!("{}/", namespace.trim_matches('/')),
            client: reqwest::Client::new(),
        }
    }

    /// Build a store with credentials read from the environment.
    pub fn from_env(config: S3StorageConfig, namespace: &str) -> Result<Self> {
        Ok(Self::new(config, AwsCredentials::from_env()?, namespace))
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Sign and send one request. `key` is the full bucket key, or `None`
    /// for bucket-level operations.
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: &[u8],
    ) -> Result<reqwest::Response> {
        let endpoint = Endpoint::for_config(&self.config);
        let canonical_uri = endpoint.canonical_uri(&self.config.bucket, key);

        let mut sorted = query.to_vec();
        sorted.sort();
        let canonical_query: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(body);
        let signer = SigV4 {
            creds: &self.creds,
            region: &self.config.region,
            service: "s3",
        };
        let headers = signer.sign(
            method.as_str(),
            &endpoint.host,
            &canonical_uri,
            &canonical_query,
            &payload_hash,
            Utc::now(),
        );

        let mut url = format!("{}://{}{}", endpoint.scheme, endpoint.host, canonical_uri);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut req = self.client.request(method.clone(), &url);
        for (name, value) in headers {
            // reqwest sets Host itself.
            if name != "host" {
                req = req.header(name, value);
            }
        }
        if method == Method::PUT {
            req = req.body(body.to_vec());
        }

        req.send().await.with_context(|| {
            format!(
                "S3 {} s3://{}{} failed",
                method,
                self.config.bucket,
                canonical_uri
            )
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let full_prefix = self.full_key(prefix);
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("prefix".to_string(), full_prefix.clone()),
            ];
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.send(Method::GET, None, &query, b"").await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let page = parse_list_objects_response(&resp.text().await?);
            objects.extend(page.objects.into_iter().filter_map(|o| {
                o.key
                    .strip_prefix(&self.key_prefix)
                    .map(|key| ObjectMeta {
                        key: key.to_string(),
                        size: o.size,
                    })
            }));

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !is_safe_key(key) {
            return Ok(None);
        }
        let full_key = self.full_key(key);
        let resp = self.send(Method::GET, Some(&full_key), &[], b"").await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            s => bail!("S3 GetObject failed (HTTP {}) for key '{}'", s, full_key),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if !is_safe_key(key) {
            return Ok(false);
        }
        let full_key = self.full_key(key);
        let resp = self.send(Method::HEAD, Some(&full_key), &[], b"").await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => bail!("S3 HeadObject failed (HTTP {}) for key '{}'", s, full_key),
        }
    }

    async fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        if !is_safe_key(key) {
            bail!("invalid object key: {:?}", key);
        }
        let full_key = self.full_key(key);
        let resp = self.send(Method::PUT, Some(&full_key), &[], body).await?;
        if !resp.status().is_success() {
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}'",
                resp.status(),
                full_key
            );
        }
        Ok(())
    }
}

// ============ AWS Credentials ============

/// AWS credentials for request signing.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Endpoint resolution ============

struct Endpoint {
    scheme: String,
    host: String,
    /// Custom endpoints (MinIO, LocalStack) are addressed path-style.
    path_style: bool,
}

impl Endpoint {
    fn for_config(config: &S3StorageConfig) -> Self {
        match config.endpoint_url {
            Some(ref endpoint) => {
                let (scheme, rest) = match endpoint.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), endpoint.as_str()),
                };
                Self {
                    scheme,
                    host: rest.trim_end_matches('/').to_string(),
                    path_style: true,
                }
            }
            None => Self {
                scheme: "https".to_string(),
                host: format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                path_style: false,
            },
        }
    }

    fn canonical_uri(&self, bucket: &str, key: Option<&str>) -> String {
        let encoded_key = key.map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"));
        match (self.path_style, encoded_key) {
            (true, Some(k)) => format!("/{}/{}", uri_encode(bucket), k),
            (true, None) => format!("/{}", uri_encode(bucket)),
            (false, Some(k)) => format!("/{}", k),
            (false, None) => "/".to_string(),
        }
    }
}

// ============ AWS SigV4 ============

/// Signature V4 signer for a single region/service pair.
struct SigV4<'a> {
    creds: &'a AwsCredentials,
    region: &'a str,
    service: &'a str,
}

impl SigV4<'_> {
    /// Return the headers (lower-case names) that must accompany the request,
    /// including `authorization`.
    fn sign(
        &self,
        method: &str,
        host: &str,
        canonical_uri: &str,
        canonical_query: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            self.region,
            self.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        headers.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.creds.access_key_id, credential_scope, signed_headers, signature
            ),
        ));
        headers
    }
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

// ============ ListObjectsV2 parsing ============

struct ListedObject {
    key: String,
    size: u64,
}

struct ListPage {
    objects: Vec<ListedObject>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(xml: &str) -> ListPage {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        // Zero-byte "folder" markers carry no content.
        if key.is_empty() || key.ends_with('/') {
            continue;
        }
        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        objects.push(ListedObject { key, size });
    }

    ListPage {
        objects,
        is_truncated,
        next_token,
    }
}

/// Text content of the first `<tag>` (simple, non-nested), entity-decoded.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(unescape_xml(&xml[start..start + end]))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
