//! Promotion run options and shared run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Options of a promotion run relevant to signing.
///
/// The surrounding pipeline decides from `sign_images` whether to call the
/// signer at all; the operations in this crate never consult it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoterOptions {
    /// Sign images after a successful promotion.
    #[serde(default)]
    pub sign_images: bool,

    /// Service account whose identity signs promoted images.
    #[serde(default)]
    pub signer_account: Option<String>,
}

impl PromoterOptions {
    /// Create options from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PROMO_SIGN_IMAGES` | Sign promoted images (`1`/`true`) |
    /// | `PROMO_SIGNER_ACCOUNT` | Signing service account |
    pub fn from_env() -> Self {
        Self {
            sign_images: std::env::var("PROMO_SIGN_IMAGES")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            signer_account: std::env::var("PROMO_SIGNER_ACCOUNT")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }

    pub fn with_sign_images(mut self, sign: bool) -> Self {
        self.sign_images = sign;
        self
    }

    pub fn with_signer_account(mut self, account: impl Into<String>) -> Self {
        self.signer_account = Some(account.into());
        self
    }
}

/// State shared across one promotion run.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Identifier used to correlate log lines of a run.
    pub run_id: Uuid,

    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new()
    }
}
