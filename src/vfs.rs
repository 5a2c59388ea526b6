//! Byte-stream reads over `file://`, `http(s)://` and `s3://` locations

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("error reading {url}: {source}")]
    Io {
        url: String,
        source: std::io::Error,
    },

    #[error("error fetching {url}: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },

    #[error("access to {location} was denied (HTTP {status}); s3:// locations are read without credentials")]
    S3Denied { location: String, status: u16 },

    #[error("unsupported location {0}")]
    UnsupportedScheme(String),

    #[error("invalid location {location:?}: {message}")]
    InvalidLocation { location: String, message: String },
}

/// Reads the bytes at a location
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn read(&self, location: &Url) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher for local files, plain HTTP(S) and publicly readable S3 objects.
/// `S3_ENDPOINT` redirects S3 reads to a path-style endpoint.
#[derive(Clone, Default)]
pub struct DefaultFetcher {
    http: reqwest::Client,
    s3_endpoint: Option<String>,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self {
            s3_endpoint: std::env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            ..Self::default()
        }
    }

    pub fn with_s3_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.s3_endpoint = Some(endpoint.into());
        self
    }

    async fn read_s3(&self, location: &Url) -> Result<Vec<u8>, FetchError> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .ok();
        let https = s3_to_https(location, region.as_deref(), self.s3_endpoint.as_deref())?;
        self.read_http(&https).await.map_err(|err| match err {
            FetchError::Http { source, .. }
                if matches!(
                    source.status(),
                    Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
                ) =>
            {
                FetchError::S3Denied {
                    location: location.to_string(),
                    status: source.status().map_or(0, |s| s.as_u16()),
                }
            }
            err => err,
        })
    }

    async fn read_http(&self, location: &Url) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(url = %location, "fetching over http");
        let http_err = |source| FetchError::Http {
            url: location.to_string(),
            source,
        };
        let response = self
            .http
            .get(location.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        let body = response.bytes().await.map_err(http_err)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn read(&self, location: &Url) -> Result<Vec<u8>, FetchError> {
        match location.scheme() {
            "file" => {
                let path = location
                    .to_file_path()
                    .map_err(|_| FetchError::InvalidLocation {
                        location: location.to_string(),
                        message: "not a local path".to_string(),
                    })?;
                tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
                    url: location.to_string(),
                    source,
                })
            }
            "http" | "https" => self.read_http(location).await,
            "s3" => self.read_s3(location).await,
            _ => Err(FetchError::UnsupportedScheme(location.to_string())),
        }
    }
}

/// HTTPS address of an `s3://bucket/key` location: virtual-hosted on AWS,
/// path-style under a custom `endpoint`
pub fn s3_to_https(location: &Url, region: Option<&str>, endpoint: Option<&str>) -> Result<Url, FetchError> {
    let bucket = location
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| FetchError::InvalidLocation {
            location: location.to_string(),
            message: "missing bucket".to_string(),
        })?;
    let address = match (endpoint, region) {
        (Some(endpoint), _) => format!("{}/{}{}", endpoint.trim_end_matches('/'), bucket, location.path()),
        (None, Some(region)) if !region.is_empty() => {
            format!("https://{}.s3.{}.amazonaws.com{}", bucket, region, location.path())
        }
        (None, _) => format!("https://{}.s3.amazonaws.com{}", bucket, location.path()),
    };
    Url::parse(&address).map_err(|e| FetchError::InvalidLocation {
        location: location.to_string(),
        message: e.to_string(),
    })
}

/// Parse a location, treating anything without a scheme as a local path
/// relative to `cwd`.
pub fn parse_location(location: &str, cwd: &Path) -> Result<Url, FetchError> {
    if let Ok(url) = Url::parse(location)
        && url.scheme().len() > 1
    {
        return Ok(url);
    }
    let path = cwd.join(location);
    Url::from_file_path(&path).map_err(|_| FetchError::InvalidLocation {
        location: location.to_string(),
        message: "cannot convert to a file URL".to_string(),
    })
}

/// Resolve `reference` against `base` when it is relative
pub fn resolve_location(base: &Url, reference: &str) -> Result<Url, FetchError> {
    base.join(reference).map_err(|e| FetchError::InvalidLocation {
        location: reference.to_string(),
        message: e.to_string(),
    })
}

/// Hex sha256 digest of manifest bytes
pub fn manifest_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
