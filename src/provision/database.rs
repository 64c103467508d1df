use std::path::Path;

use tracing::{info, warn};

use crate::error::LaunchResult;
use crate::manifest;
use crate::provision::{Outcome, StepContext};
use crate::wrangler::D1Database;

/// Make sure the D1 database exists and its id is in the manifest.
pub fn ensure_database(ctx: &StepContext<'_>) -> LaunchResult<(D1Database, Outcome)> {
    let name = ctx.config.database_name();
    let existing = find(ctx, &name)?;

    let (database, outcome) = match existing {
        Some(db) => {
            info!(database = %db.name, id = %db.id, "D1 database already exists");
            (db, Outcome::Reused)
        }
        None => match ctx.tool.create_database(ctx.env, &name) {
            Ok(db) => (db, Outcome::Created),
            Err(e) if e.is_already_exists() => {
                let db = find(ctx, &name)?.ok_or(e)?;
                (db, Outcome::Reused)
            }
            Err(e) => return Err(e),
        },
    };

    manifest::upsert_key(&ctx.config.project.manifest, "database_id", &database.id)?;
    Ok((database, outcome))
}

fn find(ctx: &StepContext<'_>, name: &str) -> LaunchResult<Option<D1Database>> {
    Ok(ctx
        .tool
        .list_databases(ctx.env)?
        .into_iter()
        .find(|db| db.name == name))
}

/// Run the schema file, then the seed file, against the remote
/// database. Files missing on disk are skipped. Failures are
/// returned as notices instead of errors.
pub fn import_files(ctx: &StepContext<'_>, database: &str) -> Vec<String> {
    let db = &ctx.config.cloudflare.database;
    let files = [("schema", &db.schema_file), ("seed", &db.seed_file)];
    let mut notices = Vec::new();

    for (label, file) in files {
        let Some(file) = file.as_deref() else {
            continue;
        };
        if let Err(e) = import(ctx, database, label, file) {
            warn!(%database, file = %file.display(), error = %e, "{label} import failed");
            notices.push(format!("{label} import from {} failed: {e}", file.display()));
        }
    }

    notices
}

fn import(ctx: &StepContext<'_>, database: &str, label: &str, file: &Path) -> LaunchResult<()> {
    if !file.exists() {
        info!(file = %file.display(), "no {label} file, skipping import");
        return Ok(());
    }
    ctx.tool.execute_file(ctx.env, database, file)?;
    info!(%database, file = %file.display(), "{label} imported");
    Ok(())
}
