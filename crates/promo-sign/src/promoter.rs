//! Promoter facade bundling the signer gateway and token issuer.

use crate::error::{SignError, SignResult};
use crate::identity::{self, IamCredentialsIssuer, IdentityToken, IdentityTokenIssuer};
use crate::options::{PromoterOptions, SyncContext};
use crate::sbom;
use crate::sign;
use crate::signer::{CosignSigner, SignerGateway};
use crate::types::EdgeSet;
use crate::validate;

/// Signing steps of a promotion run.
#[derive(Debug, Clone)]
pub struct Promoter<S, I> {
    signer: S,
    issuer: I,
    options: PromoterOptions,
}

impl Promoter<CosignSigner, IamCredentialsIssuer> {
    /// Cosign gateway and IAM issuer, both configured from the environment.
    pub fn from_env() -> SignResult<Self> {
        Ok(Self::new(
            CosignSigner::from_env()?,
            IamCredentialsIssuer::from_env(),
            PromoterOptions::from_env(),
        ))
    }
}

impl<S, I> Promoter<S, I>
where
    S: SignerGateway,
    I: IdentityTokenIssuer,
{
    pub fn new(signer: S, issuer: I, options: PromoterOptions) -> Self {
        Self {
            signer,
            issuer,
            options,
        }
    }

    pub fn options(&self) -> &PromoterOptions {
        &self.options
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    pub async fn validate_staging_signatures<A>(&self, edges: &EdgeSet<A>) -> SignResult<()> {
        validate::validate_staging_signatures(&self.signer, edges).await
    }

    pub async fn sign_images<A>(
        &self,
        sync_context: &SyncContext,
        edges: &EdgeSet<A>,
    ) -> SignResult<()> {
        sign::sign_images(&self.signer, &self.options, sync_context, edges).await
    }

    pub async fn write_sboms<A>(
        &self,
        sync_context: &SyncContext,
        edges: &EdgeSet<A>,
    ) -> SignResult<()> {
        sbom::write_sboms(&self.options, sync_context, edges).await
    }

    pub async fn get_identity_token(&self, service_account: &str) -> SignResult<IdentityToken> {
        identity::get_identity_token(&self.issuer, &self.options, service_account).await
    }

    /// Identity token for the configured signer account.
    pub async fn signer_identity_token(&self) -> SignResult<IdentityToken> {
        let account = self
            .options
            .signer_account
            .as_deref()
            .ok_or_else(|| SignError::Config {
                message: "no signer account configured".into(),
            })?;
        self.get_identity_token(account).await
    }
}
