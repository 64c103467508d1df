//! Cloudflare Access in front of the admin path.

use std::collections::BTreeSet;

use tracing::info;

use crate::api::{AccessApp, AccessAppInput, AccessPolicyInput};
use crate::error::LaunchResult;
use crate::provision::{Outcome, StepContext, Upsert};

/// Name of the policy that lists the admin emails.
pub const POLICY_NAME: &str = "Admin Policy";

/// Name given to a newly created Access application.
pub const APP_NAME: &str = "Admin Access";

/// Domain the application protects, e.g. `example.com/admin`.
#[must_use]
pub fn app_domain(domain: &str, admin_path: &str) -> String {
    format!("{domain}{admin_path}")
}

/// Find the Access application for the admin path, creating it if
/// needed.
pub fn ensure_app(ctx: &StepContext<'_>, domain: &str) -> LaunchResult<(AccessApp, Outcome)> {
    let access = &ctx.config.cloudflare.access;
    let target = app_domain(domain, &access.admin_path);

    let apps = ctx.api.list_access_apps(ctx.account_id)?;
    if let Some(app) = apps.into_iter().find(|a| a.domain == target) {
        info!(app = %app.name, domain = %target, "Access application already exists");
        return Ok((app, Outcome::Reused));
    }

    let input = AccessAppInput {
        name: APP_NAME.to_string(),
        domain: target.clone(),
        session_duration: access.session_duration.clone(),
        app_type: "self_hosted".to_string(),
    };
    let app = ctx.api.create_access_app(ctx.account_id, &input)?;
    info!(app = %app.name, domain = %target, "Access application created");
    Ok((app, Outcome::Created))
}

/// Make the `Admin Policy` policy allow exactly the configured emails.
///
/// An existing policy has its include list replaced, not merged.
pub fn ensure_policy(ctx: &StepContext<'_>, app_id: &str) -> LaunchResult<Upsert> {
    let emails = &ctx.config.cloudflare.access.admin_emails;
    let input = AccessPolicyInput::allow_emails(POLICY_NAME, emails);

    let policies = ctx.api.list_access_policies(ctx.account_id, app_id)?;
    let Some(existing) = policies.into_iter().find(|p| p.name == POLICY_NAME) else {
        ctx.api.create_access_policy(ctx.account_id, app_id, &input)?;
        info!(policy = POLICY_NAME, count = emails.len(), "Access policy created");
        return Ok(Upsert::Created);
    };

    let current: BTreeSet<String> = existing.emails().into_iter().collect();
    let wanted: BTreeSet<String> = emails.iter().cloned().collect();
    if existing.decision == "allow" && current == wanted && existing.include.len() == wanted.len()
    {
        return Ok(Upsert::Unchanged);
    }

    ctx.api
        .update_access_policy(ctx.account_id, app_id, &existing.id, &input)?;
    info!(policy = POLICY_NAME, count = emails.len(), "Access policy replaced");
    Ok(Upsert::Updated)
}
