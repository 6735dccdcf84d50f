//! Signature handling for container image promotion.
//!
//! Images move from a staging registry to a production registry in batches
//! of promotion edges. This crate provides:
//!
//! - Staging signature validation (verify what is signed, skip what is not)
//! - Signing of promoted images
//! - SBOM attachment (extension point, currently a no-op)
//! - Identity tokens for keyless signing
//!
//! Every batch operation is all-or-nothing: the first failing edge aborts the
//! batch with an error naming its image reference.
//!
//! # Quick Start
//!
//! ```no_run
//! use promo_sign::{EdgeSet, Promoter, SyncContext};
//!
//! # async fn example(edges: EdgeSet) -> Result<(), promo_sign::SignError> {
//! let promoter = Promoter::from_env()?;
//!
//! promoter.validate_staging_signatures(&edges).await?;
//! // ... promote images ...
//! let context = SyncContext::new();
//! if promoter.options().sign_images {
//!     promoter.sign_images(&context, &edges).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PROMO_SIGN_IMAGES` | Sign promoted images |
//! | `PROMO_SIGNER_ACCOUNT` | Service account used for keyless signing |
//! | `PROMO_COSIGN_PATH` | cosign binary (default: `cosign`) |
//! | `PROMO_COSIGN_TIMEOUT` | cosign timeout in seconds (default: 180) |
//! | `PROMO_COSIGN_IDENTITY_TOKEN` | Identity token passed to cosign |
//! | `PROMO_COSIGN_CERTIFICATE_IDENTITY` | Expected signer identity |
//! | `PROMO_COSIGN_CERTIFICATE_OIDC_ISSUER` | Expected signer OIDC issuer |
//! | `PROMO_IAM_CREDENTIALS_URL` | IAM credentials base URL |
//! | `GOOGLE_OAUTH_ACCESS_TOKEN` | Access token for IAM |
//! | `GOOGLE_APPLICATION_CREDENTIALS` | Service account key or `authorized_user` file for IAM |
//! | `CLOUDSDK_CONFIG` | gcloud config dir holding `application_default_credentials.json` |

pub mod error;
pub mod identity;
pub mod options;
pub mod promoter;
pub mod reference;
pub mod sbom;
pub mod sign;
pub mod signer;
pub mod types;
pub mod validate;

// Re-export main types
pub use error::{ErrorClass, GatewayError, SignError, SignResult};
pub use identity::{
    get_identity_token, CredentialSource, IamCredentialsConfig, IamCredentialsIssuer,
    IdentityToken, IdentityTokenIssuer, TokenClaims, SIGSTORE_AUDIENCE,
};
pub use options::{PromoterOptions, SyncContext};
pub use promoter::Promoter;
pub use reference::ImageReference;
pub use sbom::write_sboms;
pub use sign::sign_images;
pub use signer::{CosignOptions, CosignSigner, SignOutcome, SignerGateway, VerifyOutcome};
pub use types::{Digest, EdgeSet, ImageTag, PromotionEdge, RegistryName};
pub use validate::validate_staging_signatures;
