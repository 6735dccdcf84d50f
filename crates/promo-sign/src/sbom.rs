//! SBOM attachment for promoted images.

use tracing::debug;

use crate::error::SignResult;
use crate::options::{PromoterOptions, SyncContext};
use crate::types::EdgeSet;

/// Attach a software bill of materials to each promoted image.
///
/// Not implemented: this always succeeds without doing any work. The
/// signature is fixed so an implementation can land without touching
/// callers.
pub async fn write_sboms<A>(
    _options: &PromoterOptions,
    sync_context: &SyncContext,
    edges: &EdgeSet<A>,
) -> SignResult<()> {
    debug!(
        run_id = %sync_context.run_id,
        edges = edges.len(),
        "SBOM writing not implemented, skipping"
    );
    Ok(())
}
