use tracing::{info, warn};

use crate::error::{LaunchError, LaunchResult};
use crate::manifest;
use crate::provision::{Outcome, StepContext};

/// What the operator has to do when R2 is off for the account.
pub const ENABLE_STORAGE_HINT: &str = "R2 is not enabled for this account. Enable it in the \
     Cloudflare dashboard (R2 Object Storage > Purchase R2 Plan; the free tier is enough), \
     then run the deploy again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Ready(Outcome),
    /// R2 is disabled for the account; nothing was created.
    StorageDisabled,
}

/// Make sure the R2 bucket exists and is named in the manifest.
pub fn ensure_bucket(ctx: &StepContext<'_>) -> LaunchResult<BucketStatus> {
    let name = ctx.config.bucket_name();

    let buckets = match ctx.api.list_buckets(ctx.account_id) {
        Ok(buckets) => buckets,
        Err(LaunchError::StorageNotEnabled) => {
            warn!("{ENABLE_STORAGE_HINT}");
            return Ok(BucketStatus::StorageDisabled);
        }
        Err(e) => return Err(e),
    };

    let outcome = if buckets.iter().any(|b| b.name == name) {
        info!(bucket = %name, "R2 bucket already exists");
        Outcome::Reused
    } else {
        match ctx.api.create_bucket(ctx.account_id, &name) {
            Ok(_) => {
                info!(bucket = %name, "R2 bucket created");
                Outcome::Created
            }
            Err(e) if e.is_already_exists() => Outcome::Reused,
            Err(LaunchError::StorageNotEnabled) => {
                warn!("{ENABLE_STORAGE_HINT}");
                return Ok(BucketStatus::StorageDisabled);
            }
            Err(e) => return Err(e),
        }
    };

    let path = &ctx.config.project.manifest;
    manifest::upsert_key(path, "bucket_name", &name)?;
    manifest::upsert_key(path, "preview_bucket_name", &name)?;

    Ok(BucketStatus::Ready(outcome))
}
