//! Promotion edge types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SignError, SignResult};

/// Registry identity, e.g. `gcr.io/k8s-staging-foo`.
///
/// May carry a path below the host; the host is always the first segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryName(String);

impl RegistryName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image name within a registry plus the tag it was promoted under.
///
/// The tag is informational; references are always built from the name and
/// the digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageTag {
    /// Image name (e.g., "pause").
    pub name: String,

    /// Tag (e.g., "3.9").
    #[serde(default)]
    pub tag: Option<String>,
}

impl ImageTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Content-addressed manifest digest (`<algorithm>:<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    ///
    /// `sha256` digests must have 64 lowercase hex characters and `sha512`
    /// digests 128. Other algorithms only need a non-empty lowercase hex part.
    pub fn parse(digest: &str) -> SignResult<Self> {
        let invalid = |reason: &str| SignError::InvalidDigest {
            digest: digest.to_string(),
            reason: reason.to_string(),
        };

        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| invalid("missing algorithm prefix"))?;

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(invalid("invalid algorithm"));
        }

        if hex.is_empty() || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(invalid("encoded part must be lowercase hex"));
        }

        let expected_len = match algorithm {
            "sha256" => Some(64),
            "sha512" => Some(128),
            _ => None,
        };
        if let Some(expected) = expected_len {
            if hex.len() != expected {
                return Err(invalid(&format!(
                    "{} digest must be {} hex characters, got {}",
                    algorithm,
                    expected,
                    hex.len()
                )));
            }
        }

        Ok(Self(digest.to_string()))
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = SignError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

/// A single image move from a staging registry to a production registry.
///
/// There is one digest for both sides: promotion never changes image
/// content, only where it lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromotionEdge {
    pub src_registry: RegistryName,
    pub src_image_tag: ImageTag,
    pub dst_registry: RegistryName,
    pub dst_image_tag: ImageTag,
    pub digest: Digest,
}

impl PromotionEdge {
    pub fn new(
        src_registry: RegistryName,
        src_image_tag: ImageTag,
        dst_registry: RegistryName,
        dst_image_tag: ImageTag,
        digest: Digest,
    ) -> Self {
        Self {
            src_registry,
            src_image_tag,
            dst_registry,
            dst_image_tag,
            digest,
        }
    }
}

/// Edges of one promotion batch, keyed by edge with an opaque annotation.
///
/// Ordered so that batches are processed in a reproducible order.
pub type EdgeSet<A = ()> = BTreeMap<PromotionEdge, A>;
