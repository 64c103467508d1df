//! The local `wrangler.toml` deployment manifest.
//!
//! The file is owned by the operator. It is rendered once when
//! missing and afterwards only touched through [`upsert_key`], which
//! rewrites the value of a single key and leaves every other byte
//! alone.

use std::path::Path;

use chrono::NaiveDate;
use indexmap::IndexMap;
use regex::{NoExpand, Regex};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LaunchConfig;
use crate::error::{LaunchError, LaunchResult};

/// Written as `database_id` until the real id is known.
pub const PLACEHOLDER_DATABASE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Replace every `key = "..."` (or `key = '...'`) in `content` so
/// that it holds `value`, written as a TOML string.
///
/// Returns the new content and the number of replaced occurrences.
#[must_use]
pub fn upsert_key_in(content: &str, key: &str, value: &str) -> (String, usize) {
    let pattern = format!(r#"\b{}\s*=\s*(?:"(?:[^"\\\n]|\\.)*"|'[^'\n]*')"#, regex::escape(key));
    let Ok(re) = Regex::new(&pattern) else {
        return (content.to_string(), 0);
    };

    let count = re.find_iter(content).count();
    if count == 0 {
        return (content.to_string(), 0);
    }

    let replacement = format!("{key} = {}", toml::Value::String(value.to_string()));
    let updated = re.replace_all(content, NoExpand(&replacement)).into_owned();
    (updated, count)
}

/// Set `key` to `value` in the manifest at `path`.
///
/// Returns `false`, after logging, when the key does not occur in
/// the file. The file is left untouched in that case.
pub fn upsert_key(path: &Path, key: &str, value: &str) -> LaunchResult<bool> {
    if !path.exists() {
        return Err(LaunchError::FileNotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let (updated, count) = upsert_key_in(&content, key, value);

    if count == 0 {
        warn!(
            manifest = %path.display(),
            %key,
            "key not present in manifest; add it by hand"
        );
        return Ok(false);
    }

    if updated != content {
        std::fs::write(path, updated)?;
        info!(manifest = %path.display(), %key, %value, "manifest updated");
    }
    Ok(true)
}

#[derive(Serialize)]
struct Manifest<'a> {
    name: &'a str,
    compatibility_date: String,
    pages_build_output_dir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    d1_databases: Vec<D1Binding<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    r2_buckets: Vec<R2Binding<'a>>,
    vars: IndexMap<&'a str, &'a str>,
}

#[derive(Serialize)]
struct D1Binding<'a> {
    binding: &'a str,
    database_name: String,
    database_id: &'a str,
}

#[derive(Serialize)]
struct R2Binding<'a> {
    binding: &'a str,
    bucket_name: String,
    preview_bucket_name: String,
}

/// Render the initial manifest for `config`.
pub fn render(config: &LaunchConfig, compatibility_date: NaiveDate) -> LaunchResult<String> {
    let project = &config.project;
    let features = config.features();

    let mut manifest = Manifest {
        name: &project.name,
        compatibility_date: compatibility_date.format("%Y-%m-%d").to_string(),
        pages_build_output_dir: config.output_dir_path().to_string_lossy().into_owned(),
        d1_databases: Vec::new(),
        r2_buckets: Vec::new(),
        vars: project
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
    };

    if features.database {
        manifest.d1_databases.push(D1Binding {
            binding: &config.cloudflare.database.binding,
            database_name: config.database_name(),
            database_id: PLACEHOLDER_DATABASE_ID,
        });
    }

    if features.storage {
        manifest.r2_buckets.push(R2Binding {
            binding: &config.cloudflare.storage.binding,
            bucket_name: config.bucket_name(),
            preview_bucket_name: config.bucket_name(),
        });
    }

    if manifest.vars.is_empty() {
        manifest.vars.insert("NODE_ENV", "production");
    }

    Ok(toml::to_string(&manifest)?)
}

/// Write the initial manifest unless one already exists.
///
/// Returns `true` when a new file was written.
pub fn ensure(path: &Path, config: &LaunchConfig) -> LaunchResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    let content = render(config, chrono::Utc::now().date_naive())?;
    std::fs::write(path, content)?;
    info!(manifest = %path.display(), "manifest created");
    Ok(true)
}
