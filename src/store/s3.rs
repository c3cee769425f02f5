//! Amazon S3 (and S3-compatible) object store.
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication.
//! Listing uses `ListObjectsV2` continuation tokens as the page cursor.
//!
//! # Configuration
//!
//! ```toml
//! [store.blob.s3]
//! bucket = "kserc-rag"
//! region = "auto"
//! # endpoint_url = "https://<account>.r2.cloudflarestorage.com"
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional)
//!
//! With a custom `endpoint_url` requests are path-style
//! (`<endpoint>/<bucket>/<key>`); otherwise virtual-hosted
//! (`https://<bucket>.s3.<region>.amazonaws.com/<key>`).

use std::fmt::Write;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};

use super::object::{ListPage, ObjectInfo, ObjectStore};
use super::{Result, StoreError};
use crate::config::S3Config;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> anyhow::Result<Self> {
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

/// Where requests go and how their paths are formed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    /// `scheme://host[:port]`
    base_url: String,
    /// Value of the signed `host` header.
    host: String,
    /// `/<bucket>` for path-style addressing, empty for virtual-hosted.
    path_prefix: String,
}

impl Endpoint {
    fn for_config(config: &S3Config) -> Self {
        match config.endpoint_url {
            Some(ref endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://")
                {
                    endpoint.to_string()
                } else {
                    format!("https://{}", endpoint)
                };
                Self {
                    base_url,
                    host,
                    path_prefix: format!("/{}", config.bucket),
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", config.bucket, config.region);
                Self {
                    base_url: format!("https://{}", host),
                    host,
                    path_prefix: String::new(),
                }
            }
        }
    }

    /// Canonical (already encoded) path for an object key, or the bucket root.
    fn canonical_path(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => {
                let encoded = key.split('/').map(percent_encode).collect::<Vec<_>>().join("/");
                format!("{}/{}", self.path_prefix, encoded)
            }
            None if self.path_prefix.is_empty() => "/".to_string(),
            None => self.path_prefix.clone(),
        }
    }
}

pub struct S3ObjectStore {
    config: S3Config,
    endpoint: Endpoint,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn from_env(config: S3Config) -> anyhow::Result<Self> {
        let creds = AwsCredentials::from_env()?;
        Ok(Self {
            endpoint: Endpoint::for_config(&config),
            config,
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Build a SigV4-signed request.
    fn signed_request(
        &self,
        method: Method,
        key: Option<&str>,
        mut query_params: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> reqwest::RequestBuilder {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical query string must be sorted
        query_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = sha256_hex(&body);
        let canonical_uri = self.endpoint.canonical_path(key);

        let mut headers = vec![
            ("host".to_string(), self.endpoint.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let derived = signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex::encode(hmac(&derived, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}{}", self.endpoint.base_url, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| {
            StoreError::Remote(format!("{} in s3://{}: {}", what, self.config.bucket, e))
        })
    }
}

async fn failure(resp: reqwest::Response, what: &str) -> StoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    StoreError::Remote(format!(
        "{} failed (HTTP {}): {}",
        what,
        status,
        body.chars().take(500).collect::<String>()
    ))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let request = self.signed_request(Method::GET, Some(key), Vec::new(), Vec::new());
        let resp = self.send(request, "GetObject").await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(failure(resp, &format!("GetObject '{}'", key)).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, content_type: &str) -> Result<()> {
        let request = self
            .signed_request(Method::PUT, Some(key), Vec::new(), value)
            .header("content-type", content_type);
        let resp = self.send(request, "PutObject").await?;
        if !resp.status().is_success() {
            return Err(failure(resp, &format!("PutObject '{}'", key)).await);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage> {
        let mut query_params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), limit.clamp(1, 1000).to_string()),
        ];
        if !prefix.is_empty() {
            query_params.push(("prefix".to_string(), prefix.to_string()));
        }
        if let Some(token) = cursor {
            query_params.push(("continuation-token".to_string(), token.to_string()));
        }

        let request = self.signed_request(Method::GET, None, query_params, Vec::new());
        let resp = self.send(request, "ListObjectsV2").await?;
        if !resp.status().is_success() {
            return Err(failure(resp, "ListObjectsV2").await);
        }
        let xml_body = resp
            .text()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;
        Ok(parse_list_objects_response(&xml_body))
    }
}

// ============ Request Signing ============

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// SigV4 signing key: `"AWS4" + secret` chained through an HMAC of each
/// credential-scope part in order.
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    [date, region, service, "aws4_request"]
        .iter()
        .fold(format!("AWS4{}", secret).into_bytes(), |key, part| {
            hmac(&key, part.as_bytes())
        })
}

/// Percent-encode every byte outside the RFC 3986 unreserved set.
fn percent_encode(s: &str) -> String {
    s.bytes().fold(String::with_capacity(s.len()), |mut out, b| {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
        out
    })
}

// ============ XML Parsing ============

fn parse_list_objects_response(xml: &str) -> ListPage {
    let truncated = xml_value(xml, "IsTruncated").is_some_and(|v| v == "true");
    let cursor = xml_value(xml, "NextContinuationToken").map(|t| xml_unescape(&t));

    let mut objects = Vec::new();
    let mut rest = xml;
    while let Some((_, opened)) = rest.split_once("<Contents>") {
        let Some((block, after)) = opened.split_once("</Contents>") else {
            break;
        };
        rest = after;

        let key = xml_value(block, "Key")
            .map(|k| xml_unescape(&k))
            .unwrap_or_default();
        // Folder placeholders are not documents.
        if key.is_empty() || key.ends_with('/') {
            continue;
        }
        let size = xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        objects.push(ObjectInfo { key, size });
    }

    ListPage {
        objects,
        truncated,
        cursor,
    }
}

/// Text between the first `<tag>` and the `</tag>` after it.
fn xml_value(xml: &str, tag: &str) -> Option<String> {
    let (_, rest) = xml.split_once(&format!("<{}>", tag))?;
    let (value, _) = rest.split_once(&format!("</{}>", tag))?;
    Some(value.to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
