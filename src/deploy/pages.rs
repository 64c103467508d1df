use tracing::{info, warn};

use crate::error::{LaunchError, LaunchResult};
use crate::provision::{Outcome, StepContext};
use crate::wrangler::{DeployRequest, Deployment};

/// Make sure the Pages project exists.
///
/// A failing project listing is not fatal: creation is attempted and
/// an "already exists" answer counts as reuse.
pub fn ensure_project(ctx: &StepContext<'_>) -> LaunchResult<Outcome> {
    let project = &ctx.config.project;

    match ctx.tool.list_projects(ctx.env) {
        Ok(names) if names.iter().any(|n| n == &project.name) => {
            info!(project = %project.name, "Pages project already exists");
            return Ok(Outcome::Reused);
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not list Pages projects, trying to create"),
    }

    match ctx
        .tool
        .create_project(ctx.env, &project.name, &project.production_branch)
    {
        Ok(()) => {
            info!(
                project = %project.name,
                branch = %project.production_branch,
                "Pages project created"
            );
            Ok(Outcome::Created)
        }
        Err(e) if e.is_already_exists() => Ok(Outcome::Reused),
        Err(e) => Err(e),
    }
}

/// Upload the build output directory.
pub fn deploy(ctx: &StepContext<'_>) -> LaunchResult<Deployment> {
    let project = &ctx.config.project;
    let dir = ctx.config.output_dir_path();

    if !dir.is_dir() {
        return Err(LaunchError::FileNotFound(format!(
            "build output directory {}",
            dir.display()
        )));
    }

    eprintln!(
        "Deploying {} to Cloudflare Pages project '{}'...",
        dir.display(),
        project.name
    );

    let request = DeployRequest {
        project: &project.name,
        branch: &project.production_branch,
        directory: dir,
        commit_message: &ctx.config.deployment.commit_message,
    };
    let deployment = ctx.tool.deploy(ctx.env, &request)?;

    if let Some(url) = &deployment.url {
        info!(%url, "deployment live");
    }
    Ok(deployment)
}

/// Custom domains for `domain`: the apex and `www`.
#[must_use]
pub fn custom_domains(domain: &str) -> [String; 2] {
    [domain.to_string(), format!("www.{domain}")]
}

/// Attach the apex and `www` domains to the project.
///
/// Each domain is tried on its own; the result for each is returned
/// so the caller can report failures without stopping.
pub fn attach_domains(
    ctx: &StepContext<'_>,
    domain: &str,
) -> Vec<(String, LaunchResult<Outcome>)> {
    let project = &ctx.config.project.name;

    let existing = ctx
        .api
        .list_pages_domains(ctx.account_id, project)
        .unwrap_or_else(|e| {
            warn!(error = %e, "could not list Pages domains");
            Vec::new()
        });

    custom_domains(domain)
        .into_iter()
        .map(|name| {
            if existing.iter().any(|d| d.name == name) {
                info!(domain = %name, "custom domain already attached");
                return (name, Ok(Outcome::Reused));
            }
            let result = match ctx.api.add_pages_domain(ctx.account_id, project, &name) {
                Ok(_) => {
                    info!(domain = %name, "custom domain attached");
                    Ok(Outcome::Created)
                }
                Err(e) if e.is_already_exists() => Ok(Outcome::Reused),
                Err(e) => {
                    warn!(domain = %name, error = %e, "custom domain attach failed");
                    Err(e)
                }
            };
            (name, result)
        })
        .collect()
}
