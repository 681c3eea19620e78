//! Transfer request construction
//!
//! Everything that can be rejected without touching the network is checked here: the digest
//! encoding, the destination path and the source URL.

use std::path::{Component, Path, PathBuf};

use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::error::RequestError;
use crate::rate::RateLimiter;
use crate::types::WorkItem;
use crate::verify::{DigestAlgorithm, StreamVerifier};

/// Fully resolved unit of work handed to a worker
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub item: WorkItem,
    pub url: Url,
    pub destination: PathBuf,
    pub expected_size: u64,
    pub algorithm: DigestAlgorithm,
    pub expected_digest: Vec<u8>,
    /// Shared by every request of the run
    pub cancel: CancellationToken,
    /// Per-worker allotment in bytes per second
    pub rate_limit: Option<u64>,
}

impl TransferRequest {
    pub fn verifier(&self) -> StreamVerifier {
        StreamVerifier::new(self.algorithm, self.expected_digest.clone())
    }

    pub fn limiter(&self) -> Option<RateLimiter> {
        self.rate_limit.map(RateLimiter::new)
    }
}

/// Run-scoped inputs needed to turn a work item into a request
#[derive(Debug, Clone)]
pub struct RequestFactory {
    install_root: PathBuf,
    base_url: String,
    cancel: CancellationToken,
    rate_limit: Option<u64>,
}

impl RequestFactory {
    pub fn new(
        install_root: PathBuf,
        base_url: &str,
        cancel: CancellationToken,
        rate_limit: Option<u64>,
    ) -> Self {
        Self {
            install_root,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel,
            rate_limit,
        }
    }

    pub fn build(&self, item: WorkItem) -> Result<TransferRequest, RequestError> {
        let algorithm: DigestAlgorithm =
            item.digest
                .algorithm
                .parse()
                .map_err(|algorithm| RequestError::UnknownAlgorithm {
                    path: item.path.clone(),
                    algorithm,
                })?;
        let expected_digest =
            hex::decode(item.digest.hex.trim()).map_err(|source| RequestError::InvalidDigest {
                path: item.path.clone(),
                source,
            })?;
        if expected_digest.len() != algorithm.output_len() {
            return Err(RequestError::DigestLength {
                path: item.path.clone(),
                algorithm: algorithm.name(),
                expected: algorithm.output_len(),
                actual: expected_digest.len(),
            });
        }

        let relative = safe_relative_path(&item.path).ok_or_else(|| RequestError::UnsafePath {
            path: item.path.clone(),
        })?;
        let destination = self.install_root.join(relative);

        let raw_url = format!("{}/{}", self.base_url, item.path.trim_start_matches('/'));
        let url = Url::parse(&raw_url).map_err(|e| RequestError::InvalidUrl {
            url: raw_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(TransferRequest {
            expected_size: item.size,
            item,
            url,
            destination,
            algorithm,
            expected_digest,
            cancel: self.cancel.clone(),
            rate_limit: self.rate_limit,
        })
    }
}

/// Relative path made only of normal components, or `None` if it could escape the root
pub(crate) fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
