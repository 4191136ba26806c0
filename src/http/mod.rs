use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha2Digest, Sha256, Sha512};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::filesystem::{self, FilesystemError};

/// Errors raised by the shared HTTP layer.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with a status that is not retryable, or retries ran out.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    /// HTTP 429 persisted through every retry.
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },
    /// Transport failure (timeout, connection reset, broken body).
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Downloaded bytes do not match the digest published by the registry.
    #[error("hash mismatch for {url}: got {actual}, want {expected}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

impl HttpError {
    /// Status code carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Enum representing supported hashers for file integrity verification.
pub enum HasherEnum {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    None,
}

impl HasherEnum {
    /// Picks a hasher from the length of a hex-encoded digest.
    pub fn for_digest(expected: Option<&str>) -> Self {
        match expected.map(str::len) {
            Some(40) => HasherEnum::Sha1(Sha1::new()),
            Some(64) => HasherEnum::Sha256(Sha256::new()),
            Some(128) => HasherEnum::Sha512(Sha512::new()),
            _ => HasherEnum::None,
        }
    }

    /// Updates the internal state of the hasher with the provided data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            HasherEnum::Sha1(h) => Sha1Digest::update(h, data),
            HasherEnum::Sha256(h) => Sha2Digest::update(h, data),
            HasherEnum::Sha512(h) => Sha2Digest::update(h, data),
            HasherEnum::None => {}
        }
    }

    /// Finalizes the hash computation and returns the resulting digest as a byte vector.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            HasherEnum::Sha1(h) => h.finalize().to_vec(),
            HasherEnum::Sha256(h) => h.finalize().to_vec(),
            HasherEnum::Sha512(h) => h.finalize().to_vec(),
            HasherEnum::None => Vec::new(),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, HasherEnum::None)
    }
}

/// Bounded exponential backoff shared by every registry client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries. Handy in tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// 429 and 5xx are worth another try; every other status is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Builds the client every registry and download call goes through.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
}

/// Sends a request, retrying transient failures according to `policy`.
///
/// `make_request` is called once per attempt since a `RequestBuilder`
/// cannot be replayed.
///
/// # Errors
///
/// * `HttpError::Status` for terminal statuses (including 404), or 5xx after the last retry.
/// * `HttpError::RateLimited` when 429 persists after the last retry.
/// * `HttpError::Network` for transport failures.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    url: &str,
    make_request: F,
) -> Result<Response, HttpError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let reason = match make_request().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                if !is_retryable_status(status) {
                    return Err(HttpError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                if attempt >= policy.max_retries {
                    return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                        HttpError::RateLimited {
                            url: url.to_string(),
                            attempts: attempt + 1,
                        }
                    } else {
                        HttpError::Status {
                            url: url.to_string(),
                            status: status.as_u16(),
                        }
                    });
                }
                format!("HTTP {}", status.as_u16())
            }
            Err(source) => {
                if !is_transient(&source) || attempt >= policy.max_retries {
                    return Err(HttpError::Network {
                        url: url.to_string(),
                        source,
                    });
                }
                source.to_string()
            }
        };

        let delay = policy.delay_for(attempt);
        warn!(
            "Request to {} failed ({}), retry {}/{} in {:?}",
            url,
            reason,
            attempt + 1,
            policy.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Downloads a file from the given URL and saves it to the specified path.
///
/// Bytes are streamed into a partial file next to `dest` and only renamed into
/// place once complete (and verified, when `expected_hash` is given). On any
/// failure the partial file is removed.
///
/// # Arguments
///
/// * `client` - Shared HTTP client.
/// * `policy` - Retry policy for the initial request.
/// * `url` - The URL to download the file from.
/// * `dest` - The local file path to save the downloaded file.
/// * `expected_hash` - Optional hex digest (SHA-1, SHA-256 or SHA-512 by length).
///
/// # Returns
///
/// The number of bytes written.
pub async fn download_to_file(
    client: &Client,
    policy: &RetryPolicy,
    url: &str,
    dest: &Path,
    expected_hash: Option<&str>,
) -> Result<u64, HttpError> {
    debug!("Downloading {} -> {}", url, dest.display());
    let response = send_with_retry(policy, url, || client.get(url)).await?;

    let mut partial = filesystem::partial_file_for(dest)?;
    let mut hasher = HasherEnum::for_digest(expected_hash);
    let mut written = 0u64;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| HttpError::Network {
            url: url.to_string(),
            source,
        })?;
        partial.as_file_mut().write_all(&chunk)?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
    }
    partial.as_file_mut().flush()?;

    if let Some(expected) = expected_hash {
        if !hasher.is_none() {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(HttpError::HashMismatch {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
    }

    filesystem::persist(partial, dest)?;
    Ok(written)
}

/// Verifies the hash of a file against an expected hash string.
///
/// Supports SHA-1, SHA-256, and SHA-512 based on the length of the expected hash.
/// Digests of any other length cannot be checked and count as a match.
///
/// # Returns
///
/// * `io::Result<bool>` - Returns `Ok(true)` if the hash matches, `Ok(false)` otherwise, or an error if reading fails.
pub fn verify_hash(path: &Path, expected: &str) -> io::Result<bool> {
    let f = File::open(path)?;
    let mut reader = BufReader::new(f);

    let mut hasher = HasherEnum::for_digest(Some(expected));
    if hasher.is_none() {
        return Ok(true);
    }

    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let actual = hex::encode(hasher.finalize());
    Ok(actual.eq_ignore_ascii_case(expected))
}
