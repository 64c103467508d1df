//! The `wrangler` CLI boundary.
//!
//! Everything that scrapes text out of wrangler's output lives here;
//! the rest of the crate only sees typed results.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cmd;
use crate::error::{LaunchError, LaunchResult};

/// Credential handed to a wrangler child process.
///
/// Only ever merged into the child's environment; the parent's
/// environment is never modified. Operator credentials inherited
/// from the parent are stripped so the scoped token is the only one
/// the child can use.
#[derive(Clone, Copy)]
pub struct ToolEnv<'a> {
    pub api_token: &'a str,
    pub account_id: &'a str,
}

impl ToolEnv<'_> {
    /// Variables wrangler would prefer over `CLOUDFLARE_API_TOKEN`.
    pub const STRIPPED: [&'static str; 4] = [
        "CLOUDFLARE_API_KEY",
        "CLOUDFLARE_EMAIL",
        "CF_API_KEY",
        "CF_EMAIL",
    ];

    #[must_use]
    pub fn vars(&self) -> [(&str, &str); 2] {
        [
            ("CLOUDFLARE_API_TOKEN", self.api_token),
            ("CLOUDFLARE_ACCOUNT_ID", self.account_id),
        ]
    }
}

/// A D1 database as reported by wrangler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct D1Database {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DeployRequest<'a> {
    pub project: &'a str,
    pub branch: &'a str,
    pub directory: &'a Path,
    pub commit_message: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployment {
    /// Preview URL printed by wrangler, when it printed one.
    pub url: Option<String>,
}

/// Build/deploy tool operations the pipeline needs.
pub trait DeployTool {
    /// Verify the tool is installed; returns its version string.
    fn check(&self) -> LaunchResult<String>;

    fn list_databases(&self, env: ToolEnv<'_>) -> LaunchResult<Vec<D1Database>>;

    /// Create a database and return it with its generated id.
    fn create_database(&self, env: ToolEnv<'_>, name: &str) -> LaunchResult<D1Database>;

    fn execute_file(&self, env: ToolEnv<'_>, database: &str, file: &Path) -> LaunchResult<()>;

    fn list_projects(&self, env: ToolEnv<'_>) -> LaunchResult<Vec<String>>;

    fn create_project(&self, env: ToolEnv<'_>, name: &str, branch: &str) -> LaunchResult<()>;

    fn deploy(&self, env: ToolEnv<'_>, request: &DeployRequest<'_>) -> LaunchResult<Deployment>;
}

/// [`DeployTool`] backed by the `wrangler` binary.
pub struct Wrangler {
    program: String,
    verbose: bool,
}

impl Wrangler {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self {
            program: "wrangler".to_string(),
            verbose,
        }
    }

    /// Use another executable, e.g. `npx`-installed wrangler.
    #[must_use]
    pub fn program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn run(&self, env: ToolEnv<'_>, args: &[&str]) -> LaunchResult<cmd::Captured> {
        cmd::run_with_env(
            &self.program,
            args,
            &env.vars(),
            &ToolEnv::STRIPPED,
            self.verbose,
        )
    }
}

impl DeployTool for Wrangler {
    fn check(&self) -> LaunchResult<String> {
        let version = cmd::run(&self.program, &["--version"]).map_err(|e| match e {
            LaunchError::CommandNotFound(p) => LaunchError::CommandNotFound(format!(
                "{p} (install it with: npm install -g wrangler)"
            )),
            other => other,
        })?;
        debug!(%version, "wrangler detected");
        Ok(version)
    }

    fn list_databases(&self, env: ToolEnv<'_>) -> LaunchResult<Vec<D1Database>> {
        let out = self.run(env, &["d1", "list", "--json"])?;
        parse_d1_list(&out.stdout)
    }

    fn create_database(&self, env: ToolEnv<'_>, name: &str) -> LaunchResult<D1Database> {
        let out = self.run(env, &["d1", "create", name])?;
        let id = extract_identifier(&out.combined(), "database_id")?;
        info!(database = %name, %id, "D1 database created");
        Ok(D1Database {
            id,
            name: name.to_string(),
        })
    }

    fn execute_file(&self, env: ToolEnv<'_>, database: &str, file: &Path) -> LaunchResult<()> {
        let file = file.to_string_lossy();
        self.run(
            env,
            &["d1", "execute", database, "--remote", "--yes", "--file", &file],
        )?;
        Ok(())
    }

    fn list_projects(&self, env: ToolEnv<'_>) -> LaunchResult<Vec<String>> {
        let out = self.run(env, &["pages", "project", "list"])?;
        Ok(parse_table_first_column(&out.stdout, "Project Name"))
    }

    fn create_project(&self, env: ToolEnv<'_>, name: &str, branch: &str) -> LaunchResult<()> {
        let branch_arg = format!("--production-branch={branch}");
        self.run(env, &["pages", "project", "create", name, &branch_arg])?;
        Ok(())
    }

    fn deploy(&self, env: ToolEnv<'_>, request: &DeployRequest<'_>) -> LaunchResult<Deployment> {
        let directory = request.directory.to_string_lossy();
        let branch_arg = format!("--branch={}", request.branch);
        let message_arg = format!("--commit-message={}", request.commit_message);
        let out = self.run(
            env,
            &[
                "pages",
                "deploy",
                &directory,
                "--project-name",
                request.project,
                &branch_arg,
                "--commit-dirty=true",
                &message_arg,
            ],
        )?;
        Ok(Deployment {
            url: extract_deployment_url(&out.combined()),
        })
    }
}

/// Pull `key = "value"` (TOML) or `"key": "value"` (JSON) out of
/// tool output. `key` must match as a whole word.
pub fn extract_identifier(output: &str, key: &str) -> LaunchResult<String> {
    let pattern = format!(r#""?\b{}\b"?\s*[=:]\s*"([^"]+)""#, regex::escape(key));
    let re = Regex::new(&pattern).map_err(|_| LaunchError::Parse {
        key: key.to_string(),
    })?;

    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| LaunchError::Parse {
            key: key.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct D1ListEntry {
    uuid: String,
    name: String,
}

/// Parse `wrangler d1 list --json`.
pub fn parse_d1_list(output: &str) -> LaunchResult<Vec<D1Database>> {
    // wrangler may print banner lines before the JSON array.
    let start = output.find('[').ok_or_else(|| LaunchError::Parse {
        key: "d1 list".to_string(),
    })?;
    let entries: Vec<D1ListEntry> = serde_json::from_str(&output[start..])?;
    Ok(entries
        .into_iter()
        .map(|e| D1Database {
            id: e.uuid,
            name: e.name,
        })
        .collect())
}

/// First-column values of a box-drawn or ASCII table, without the
/// header and separator rows.
#[must_use]
pub fn parse_table_first_column(output: &str, header: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let row = line
                .strip_prefix('│')
                .or_else(|| line.strip_prefix('|'))?;
            let cell = row.split(['│', '|']).next()?.trim();
            let separator = cell.chars().all(|c| matches!(c, '-' | '─' | '=' | '+' | ':'));
            (!separator && cell != header).then(|| cell.to_string())
        })
        .collect()
}

/// The `*.pages.dev` URL wrangler prints after a deploy.
#[must_use]
pub fn extract_deployment_url(output: &str) -> Option<String> {
    let re = Regex::new(r"https://[A-Za-z0-9.-]+\.pages\.dev\S*").ok()?;
    re.find(output).map(|m| m.as_str().to_string())
}
