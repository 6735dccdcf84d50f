//! Image references.
//!
//! A reference has the form `registry/repository@digest`:
//! - `gcr.io/k8s-staging-foo/pause@sha256:...` → staging source
//! - `registry.k8s.io/pause@sha256:...` → promoted destination
//!
//! References are derived per edge and per operation; they are never stored.

use std::fmt;

use crate::error::{SignError, SignResult};
use crate::types::{Digest, PromotionEdge, RegistryName};

/// Digest-pinned image reference handed to the signer gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    image: String,
    digest: Digest,
}

impl ImageReference {
    pub fn new(registry: &RegistryName, image: impl Into<String>, digest: Digest) -> Self {
        Self {
            registry: registry.as_str().to_string(),
            image: image.into(),
            digest,
        }
    }

    /// Reference to the staged (source) image of an edge.
    pub fn source(edge: &PromotionEdge) -> Self {
        Self::new(
            &edge.src_registry,
            edge.src_image_tag.name.clone(),
            edge.digest.clone(),
        )
    }

    /// Reference to the promoted (destination) image of an edge.
    pub fn destination(edge: &PromotionEdge) -> Self {
        Self::new(
            &edge.dst_registry,
            edge.dst_image_tag.name.clone(),
            edge.digest.clone(),
        )
    }

    /// Parse a reference string.
    ///
    /// The first path segment becomes the registry, the remainder the image.
    ///
    /// # Examples
    ///
    /// ```
    /// use promo_sign::ImageReference;
    ///
    /// let digest = format!("sha256:{}", "a".repeat(64));
    /// let reference = ImageReference::parse(&format!("registry.k8s.io/pause@{digest}")).unwrap();
    /// assert_eq!(reference.host(), "registry.k8s.io");
    /// assert_eq!(reference.repository(), "pause");
    /// ```
    pub fn parse(reference: &str) -> SignResult<Self> {
        let reference = reference.trim();
        let invalid = |reason: &str| SignError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (path, digest) = reference
            .rsplit_once('@')
            .ok_or_else(|| invalid("missing @digest"))?;
        let digest = Digest::parse(digest).map_err(|e| invalid(&e.to_string()))?;

        let (registry, image) = path
            .split_once('/')
            .ok_or_else(|| invalid("missing repository"))?;
        if registry.is_empty() || image.is_empty() || image.ends_with('/') {
            return Err(invalid("missing repository"));
        }
        if image.contains(':') {
            return Err(invalid("tags are not allowed in digest references"));
        }

        Ok(Self {
            registry: registry.to_string(),
            image: image.to_string(),
            digest,
        })
    }

    /// Registry host (first segment of the registry name).
    pub fn host(&self) -> &str {
        self.registry.split('/').next().unwrap_or(&self.registry)
    }

    /// Repository path below the host, including any registry path prefix.
    pub fn repository(&self) -> String {
        match self.registry.split_once('/') {
            Some((_, prefix)) => format!("{}/{}", prefix, self.image),
            None => self.image.clone(),
        }
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.registry, self.image, self.digest)
    }
}
