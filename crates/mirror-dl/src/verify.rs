//! Incremental digest verification for streamed content

use std::fmt;
use std::str::FromStr;

use sha2::Digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Raw digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(s.to_string()),
        }
    }
}

enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

/// Incremental digest of a byte stream
pub struct ContentHasher {
    inner: Hasher,
}

impl ContentHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let inner = match algorithm {
            DigestAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        };
        Self { inner }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.inner {
            Hasher::Sha1(h) => h.update(chunk),
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha512(h) => h.update(chunk),
        }
    }

    /// Raw digest bytes
    pub fn finish(self) -> Vec<u8> {
        match self.inner {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Hashes chunks as they are written and compares against the expected digest at the end
pub struct StreamVerifier {
    expected: Vec<u8>,
    hasher: ContentHasher,
}

impl StreamVerifier {
    pub fn new(algorithm: DigestAlgorithm, expected: Vec<u8>) -> Self {
        Self {
            expected,
            hasher: ContentHasher::new(algorithm),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Consume the verifier. `Err` carries the (expected, computed) hex pair on mismatch.
    pub fn finish(self) -> Result<(), (String, String)> {
        let actual = self.hasher.finish();
        if actual == self.expected {
            Ok(())
        } else {
            Err((hex::encode(&self.expected), hex::encode(actual)))
        }
    }
}
