use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};

/// Default config file looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "flarelaunch.yaml";

/// Project configuration, usually read from `flarelaunch.yaml`.
///
/// # Example
///
/// ```
/// use flarelaunch::LaunchConfig;
///
/// let config = LaunchConfig::new("demo")
///     .source_dir("./dist")
///     .storage(true)
///     .database(true);
///
/// assert_eq!(config.database_name(), "demo");
/// assert_eq!(config.bucket_name(), "demo-uploads");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Built site; must contain `index.html`.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Directory uploaded to Pages. The source directory is copied
    /// here first when the two differ.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_branch")]
    pub production_branch: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    /// Written to the manifest's `[vars]` block, in order.
    #[serde(default)]
    pub vars: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudflareConfig {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub services: Features,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

/// Independently toggleable platform features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub storage: bool,
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub access: bool,
    /// Custom domains and the `www` record, when a domain is set.
    #[serde(default = "default_true")]
    pub dns: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            storage: false,
            database: false,
            access: false,
            dns: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_db_binding")]
    pub binding: String,
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: None,
            binding: default_db_binding(),
            schema_file: None,
            seed_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default = "default_bucket_binding")]
    pub binding: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_name: None,
            binding: default_bucket_binding(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_admin_path")]
    pub admin_path: String,
    #[serde(default)]
    pub admin_emails: Vec<String>,
    #[serde(default = "default_session_duration")]
    pub session_duration: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            admin_path: default_admin_path(),
            admin_emails: Vec::new(),
            session_duration: default_session_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Stream wrangler output live.
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: u32,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            commit_message: default_commit_message(),
            token_ttl_minutes: default_token_ttl(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("./dist")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_manifest() -> PathBuf {
    PathBuf::from("wrangler.toml")
}

fn default_db_binding() -> String {
    "DB".to_string()
}

fn default_bucket_binding() -> String {
    "R2".to_string()
}

fn default_admin_path() -> String {
    "/admin".to_string()
}

fn default_session_duration() -> String {
    "720h".to_string()
}

fn default_commit_message() -> String {
    "Automated deploy".to_string()
}

const fn default_token_ttl() -> u32 {
    60
}

impl LaunchConfig {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            project: ProjectConfig {
                name: name.to_string(),
                source_dir: default_source_dir(),
                output_dir: None,
                production_branch: default_branch(),
                domain: None,
                manifest: default_manifest(),
                vars: IndexMap::new(),
            },
            cloudflare: CloudflareConfig::default(),
            deployment: DeploymentConfig::default(),
        }
    }

    /// Read a YAML config file.
    pub fn load(path: &Path) -> LaunchResult<Self> {
        if !path.exists() {
            return Err(LaunchError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> LaunchResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    #[must_use]
    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project.source_dir = dir.into();
        self
    }

    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project.output_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn production_branch(mut self, branch: &str) -> Self {
        self.project.production_branch = branch.to_string();
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.project.domain = Some(domain.to_string());
        self
    }

    #[must_use]
    pub fn manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.project.manifest = path.into();
        self
    }

    #[must_use]
    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.project.vars.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn account_id(mut self, id: &str) -> Self {
        self.cloudflare.account_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn storage(mut self, enabled: bool) -> Self {
        self.cloudflare.services.storage = enabled;
        self
    }

    #[must_use]
    pub fn database(mut self, enabled: bool) -> Self {
        self.cloudflare.services.database = enabled;
        self
    }

    #[must_use]
    pub fn dns(mut self, enabled: bool) -> Self {
        self.cloudflare.services.dns = enabled;
        self
    }

    /// Directory handed to Pages: `output_dir`, or the source
    /// directory itself.
    #[must_use]
    pub fn output_dir_path(&self) -> &Path {
        self.project
            .output_dir
            .as_deref()
            .unwrap_or(&self.project.source_dir)
    }

    #[must_use]
    pub fn bucket_name(&self) -> String {
        self.cloudflare
            .storage
            .bucket_name
            .clone()
            .unwrap_or_else(|| format!("{}-uploads", self.project.name))
    }

    #[must_use]
    pub fn database_name(&self) -> String {
        self.cloudflare
            .database
            .name
            .clone()
            .unwrap_or_else(|| self.project.name.clone())
    }

    #[must_use]
    pub fn schema_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cloudflare.database.schema_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn seed_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cloudflare.database.seed_file = Some(path.into());
        self
    }

    /// Enable Cloudflare Access on the admin path for the given
    /// emails.
    #[must_use]
    pub fn access(mut self, admin_emails: &[&str]) -> Self {
        self.cloudflare.services.access = true;
        self.cloudflare.access.admin_emails =
            admin_emails.iter().map(|e| (*e).to_string()).collect();
        self
    }

    #[must_use]
    pub fn admin_path(mut self, path: &str) -> Self {
        self.cloudflare.access.admin_path = path.to_string();
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.deployment.verbose = verbose;
        self
    }

    #[must_use]
    pub const fn features(&self) -> Features {
        self.cloudflare.services
    }

    /// URL the deployment is reachable at once the pipeline is done.
    #[must_use]
    pub fn site_url(&self) -> String {
        self.project.domain.as_ref().map_or_else(
            || format!("https://{}.pages.dev", self.project.name),
            |d| format!("https://{d}"),
        )
    }

    /// Check the configuration, reporting every problem at once.
    pub fn validate(&self) -> LaunchResult<()> {
        let mut errors = Vec::new();

        let name = &self.project.name;
        if name.is_empty() {
            errors.push("project name is required".to_string());
        } else if !is_valid_project_name(name) {
            errors.push(format!(
                "project name '{name}' must be lowercase letters, digits and dashes"
            ));
        }

        if self.project.source_dir.as_os_str().is_empty() {
            errors.push("source directory is required".to_string());
        }
        if self
            .project
            .output_dir
            .as_ref()
            .is_some_and(|d| d.as_os_str().is_empty())
        {
            errors.push("output directory must not be empty".to_string());
        }

        if self.project.production_branch.is_empty() {
            errors.push("production branch is required".to_string());
        }

        let services = self.cloudflare.services;
        if services.database && self.cloudflare.database.name.as_deref() == Some("") {
            errors.push("database name must not be empty when the database is enabled".into());
        }
        if services.storage && self.cloudflare.storage.bucket_name.as_deref() == Some("") {
            errors.push("bucket name must not be empty when storage is enabled".into());
        }

        if services.access {
            if self.project.domain.is_none() {
                errors.push("a domain is required for Cloudflare Access".to_string());
            }
            if self.cloudflare.access.admin_emails.is_empty() {
                errors.push("admin emails are required for Cloudflare Access".to_string());
            }
            for email in &self.cloudflare.access.admin_emails {
                if !email.contains('@') {
                    errors.push(format!("'{email}' is not an email address"));
                }
            }
            if !self.cloudflare.access.admin_path.starts_with('/') {
                errors.push("admin path must start with '/'".to_string());
            }
        }

        if self.deployment.token_ttl_minutes == 0 {
            errors.push("token_ttl_minutes must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LaunchError::Config(errors.join("; ")))
        }
    }
}

fn is_valid_project_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// The operator's long-lived identity, used only to discover the
/// account, mint the scoped token, and revoke it.
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    /// An API token allowed to create other tokens.
    Token(String),
    /// Account email plus global API key.
    GlobalKey { email: String, key: String },
}

impl Identity {
    /// Read the identity from `CLOUDFLARE_API_TOKEN`, or from
    /// `CLOUDFLARE_EMAIL` + `CLOUDFLARE_API_KEY`.
    pub fn from_env() -> LaunchResult<Self> {
        Self::from_vars(
            std::env::var("CLOUDFLARE_API_TOKEN").ok(),
            std::env::var("CLOUDFLARE_EMAIL").ok(),
            std::env::var("CLOUDFLARE_API_KEY").ok(),
        )
    }

    pub fn from_vars(
        token: Option<String>,
        email: Option<String>,
        key: Option<String>,
    ) -> LaunchResult<Self> {
        match (token, email, key) {
            (Some(token), _, _) if !token.is_empty() => Ok(Self::Token(token)),
            (_, Some(email), Some(key)) if !email.is_empty() && !key.is_empty() => {
                Ok(Self::GlobalKey { email, key })
            }
            _ => Err(LaunchError::EnvMissing(
                "set CLOUDFLARE_API_TOKEN, or CLOUDFLARE_EMAIL and CLOUDFLARE_API_KEY".into(),
            )),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Identity::Token(***)"),
            Self::GlobalKey { email, .. } => write!(f, "Identity::GlobalKey({email}, ***)"),
        }
    }
}
