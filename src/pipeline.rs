use std::fmt;

use tracing::{info, warn};

use crate::api::CloudflareApi;
use crate::broker::{Capability, CredentialBroker};
use crate::config::LaunchConfig;
use crate::deploy::{self, output, pages};
use crate::discovery;
use crate::dns;
use crate::error::{LaunchError, LaunchResult};
use crate::manifest;
use crate::provision::bucket::{self, BucketStatus};
use crate::provision::{Outcome, StepContext, StepReport, Upsert, access, database};
use crate::wrangler::{DeployTool, ToolEnv};

/// A pipeline step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Prepare,
    Discovery,
    Credential,
    Manifest,
    Database,
    SchemaImport,
    Bucket,
    Project,
    Deploy,
    Domain,
    Dns,
    AccessApp,
    AccessPolicy,
    Revoke,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepare => "prepare",
            Self::Discovery => "discovery",
            Self::Credential => "credential",
            Self::Manifest => "manifest",
            Self::Database => "database",
            Self::SchemaImport => "schema import",
            Self::Bucket => "bucket",
            Self::Project => "pages project",
            Self::Deploy => "deploy",
            Self::Domain => "custom domains",
            Self::Dns => "dns",
            Self::AccessApp => "access application",
            Self::AccessPolicy => "access policy",
            Self::Revoke => "revoke",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Database,
    Bucket,
    Project,
    Domain,
    DnsRecord,
    AccessApp,
    AccessPolicy,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Database => "D1 database",
            Self::Bucket => "R2 bucket",
            Self::Project => "Pages project",
            Self::Domain => "custom domain",
            Self::DnsRecord => "DNS record",
            Self::AccessApp => "Access application",
            Self::AccessPolicy => "Access policy",
        };
        f.write_str(s)
    }
}

/// A managed resource and whether this run created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: Outcome,
}

impl fmt::Display for ResourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.name, self.outcome)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub account_id: String,
    pub resources: Vec<ResourceReport>,
    pub steps: Vec<StepReport>,
    /// Where the site is served once DNS has propagated.
    pub url: String,
    /// Preview URL of this particular upload.
    pub deployment_url: Option<String>,
    /// Things the operator should look at; none of them failed the run.
    pub notices: Vec<String>,
    pub dropped_capabilities: Vec<Capability>,
}

impl PipelineReport {
    #[must_use]
    pub fn created(&self) -> usize {
        self.count(Outcome::Created)
    }

    #[must_use]
    pub fn reused(&self) -> usize {
        self.count(Outcome::Reused)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.resources.iter().filter(|r| r.outcome == outcome).count()
    }

    #[must_use]
    pub fn resource(&self, kind: ResourceKind) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.kind == kind)
    }

    #[must_use]
    pub fn step(&self, step: Step) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }

    fn add(&mut self, kind: ResourceKind, name: &str, outcome: Outcome) {
        eprintln!("  {kind} {name}: {outcome}");
        self.resources.push(ResourceReport {
            kind,
            name: name.to_string(),
            outcome,
        });
    }

    fn notice(&mut self, message: String) {
        warn!("{message}");
        self.notices.push(message);
    }

    fn skip(&mut self, step: Step, reason: &str) -> LaunchResult<()> {
        let mut report = StepReport::new(step);
        report.skip(reason)?;
        self.steps.push(report);
        Ok(())
    }

    /// Record a non-fatal failure and keep going.
    fn tolerate(&mut self, mut step: StepReport, error: &LaunchError) {
        step.fail(error.to_string());
        self.notice(format!("{} failed: {error}", step.step));
        self.steps.push(step);
    }

    /// Record a fatal failure and build the error the run returns.
    fn abort(&mut self, mut step: StepReport, error: LaunchError) -> LaunchError {
        step.fail(error.to_string());
        let failed = step.step;
        self.steps.push(step);
        LaunchError::StepFailed {
            step: failed,
            provisioned: self.resources.clone(),
            source: Box::new(error),
        }
    }
}

/// Runs every provisioning step for one project in order.
///
/// `api` authenticates as the operator. It is used only to resolve
/// the account, mint the scoped token and revoke it; every step in
/// between talks to the API through the scoped token.
pub struct Pipeline<'a> {
    config: &'a LaunchConfig,
    api: &'a dyn CloudflareApi,
    tool: &'a dyn DeployTool,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        config: &'a LaunchConfig,
        api: &'a dyn CloudflareApi,
        tool: &'a dyn DeployTool,
    ) -> Self {
        Self { config, api, tool }
    }

    /// Provision and deploy.
    ///
    /// The scoped token is revoked exactly once before this returns,
    /// whether the steps succeeded or not. A fatal step failure comes
    /// back as [`LaunchError::StepFailed`] carrying the resources
    /// provisioned before it.
    pub fn run(&self) -> LaunchResult<PipelineReport> {
        self.config.validate()?;
        self.tool.check()?;

        let mut report = PipelineReport {
            url: self.config.site_url(),
            ..PipelineReport::default()
        };

        let mut step = StepReport::new(Step::Prepare);
        match output::prepare(self.config) {
            Ok(copied) => {
                step.complete(if copied { Outcome::Created } else { Outcome::Reused })?;
                let dir = self.config.output_dir_path().display().to_string();
                report.steps.push(step.with_detail(dir));
            }
            Err(e) => return Err(report.abort(step, e)),
        }

        let mut step = StepReport::new(Step::Discovery);
        let account = match discovery::resolve_account(self.api, &self.config.cloudflare) {
            Ok(account) => account,
            Err(e) => return Err(report.abort(step, e)),
        };
        step.complete(Outcome::Reused)?;
        report.steps.push(step.with_detail(format!("account {}", account.id)));
        report.account_id.clone_from(&account.id);
        eprintln!("Account: {} ({})", account.name, account.id);

        let broker = CredentialBroker::new(self.api, self.config.deployment.token_ttl_minutes);
        let step = StepReport::new(Step::Credential);
        let minted = self
            .api
            .user_id()
            .and_then(|user_id| broker.mint(self.config.features(), &account.id, &user_id));
        let credential = match minted {
            Ok(credential) => credential,
            Err(e) => return Err(report.abort(step, e)),
        };
        let token = credential.value.clone();
        let token_id = credential.id.clone();
        let dropped = credential.dropped.clone();
        let lease = broker.lease(credential);
        self.record_credential(&mut report, step, &token_id, &dropped)?;

        let scoped = self.api.scoped(&token);
        let ctx = StepContext {
            config: self.config,
            api: scoped.as_ref(),
            tool: self.tool,
            env: ToolEnv {
                api_token: &token,
                account_id: &account.id,
            },
            account_id: &account.id,
        };
        let outcome = self.provision(&ctx, &mut report);

        lease.release();
        let mut step = StepReport::new(Step::Revoke);
        step.complete(Outcome::Reused)?;
        report.steps.push(step.with_detail(format!("token {token_id}")));

        outcome.map(|()| report)
    }

    fn record_credential(
        &self,
        report: &mut PipelineReport,
        mut step: StepReport,
        token_id: &str,
        dropped: &[Capability],
    ) -> LaunchResult<()> {
        step.complete(Outcome::Created)?;
        report.steps.push(step.with_detail(format!("token {token_id}")));
        report.dropped_capabilities = dropped.to_vec();
        if !dropped.is_empty() {
            let names: Vec<&str> = dropped.iter().map(|c| c.name()).collect();
            report.notice(format!(
                "scoped token lacks {}; steps needing them may fail",
                names.join(", ")
            ));
        }
        info!(
            project = %self.config.project.name,
            ttl_minutes = self.config.deployment.token_ttl_minutes,
            "credential ready"
        );
        Ok(())
    }

    fn provision(&self, ctx: &StepContext<'_>, report: &mut PipelineReport) -> LaunchResult<()> {
        let features = self.config.features();

        let mut step = StepReport::new(Step::Manifest);
        let path = &self.config.project.manifest;
        match manifest::ensure(path, self.config) {
            Ok(created) => {
                step.complete(if created { Outcome::Created } else { Outcome::Reused })?;
                report.steps.push(step.with_detail(path.display().to_string()));
            }
            Err(e) => return Err(report.abort(step, e)),
        }

        if features.database {
            self.database(ctx, report)?;
        } else {
            report.skip(Step::Database, "database disabled")?;
            report.skip(Step::SchemaImport, "database disabled")?;
        }

        if features.storage {
            Self::bucket(ctx, report)?;
        } else {
            report.skip(Step::Bucket, "storage disabled")?;
        }

        self.project(ctx, report)?;

        match self.config.project.domain.as_deref() {
            Some(domain) if features.dns => {
                self.domains(ctx, domain, report)?;
                self.dns(ctx, domain, report)?;
            }
            Some(_) => {
                report.skip(Step::Domain, "dns disabled")?;
                report.skip(Step::Dns, "dns disabled")?;
            }
            None => {
                report.skip(Step::Domain, "no domain configured")?;
                report.skip(Step::Dns, "no domain configured")?;
            }
        }

        match self.config.project.domain.as_deref() {
            Some(domain) if features.access => self.access(ctx, domain, report)?,
            _ => {
                report.skip(Step::AccessApp, "access disabled")?;
                report.skip(Step::AccessPolicy, "access disabled")?;
            }
        }

        Ok(())
    }

    fn database(&self, ctx: &StepContext<'_>, report: &mut PipelineReport) -> LaunchResult<()> {
        let mut step = StepReport::new(Step::Database);
        let (db, outcome) = match database::ensure_database(ctx) {
            Ok(found) => found,
            Err(e) => return Err(report.abort(step, e)),
        };
        step.complete(outcome)?;
        report.steps.push(step.with_detail(db.id.clone()));
        report.add(ResourceKind::Database, &db.name, outcome);

        let files = &self.config.cloudflare.database;
        if files.schema_file.is_none() && files.seed_file.is_none() {
            return report.skip(Step::SchemaImport, "no schema or seed file configured");
        }

        let mut step = StepReport::new(Step::SchemaImport);
        let notices = database::import_files(ctx, &db.name);
        if notices.is_empty() {
            step.complete(Outcome::Created)?;
            report.steps.push(step);
        } else {
            step.fail(notices.join("; "));
            report.steps.push(step);
            for notice in notices {
                report.notice(notice);
            }
        }
        Ok(())
    }

    fn bucket(ctx: &StepContext<'_>, report: &mut PipelineReport) -> LaunchResult<()> {
        let mut step = StepReport::new(Step::Bucket);
        let name = ctx.config.bucket_name();
        match bucket::ensure_bucket(ctx) {
            Ok(BucketStatus::Ready(outcome)) => {
                step.complete(outcome)?;
                report.steps.push(step);
                report.add(ResourceKind::Bucket, &name, outcome);
            }
            Ok(BucketStatus::StorageDisabled) => {
                step.skip("R2 not enabled")?;
                report.steps.push(step);
                report.notice(bucket::ENABLE_STORAGE_HINT.to_string());
            }
            Err(e) => return Err(report.abort(step, e)),
        }
        Ok(())
    }

    fn project(&self, ctx: &StepContext<'_>, report: &mut PipelineReport) -> LaunchResult<()> {
        let name = &self.config.project.name;

        let mut step = StepReport::new(Step::Project);
        let outcome = match pages::ensure_project(ctx) {
            Ok(outcome) => outcome,
            Err(e) => return Err(report.abort(step, e)),
        };
        step.complete(outcome)?;
        report.steps.push(step);
        report.add(ResourceKind::Project, name, outcome);

        let mut step = StepReport::new(Step::Deploy);
        let deployment = match pages::deploy(ctx) {
            Ok(deployment) => deployment,
            Err(e) => return Err(report.abort(step, e)),
        };
        step.complete(Outcome::Created)?;
        report
            .steps
            .push(step.with_detail(deployment.url.clone().unwrap_or_default()));
        report.deployment_url = deployment.url;
        Ok(())
    }

    fn domains(
        &self,
        ctx: &StepContext<'_>,
        domain: &str,
        report: &mut PipelineReport,
    ) -> LaunchResult<()> {
        let mut step = StepReport::new(Step::Domain);
        let mut failed = Vec::new();
        let mut created = false;

        for (name, result) in pages::attach_domains(ctx, domain) {
            match result {
                Ok(outcome) => {
                    created |= outcome == Outcome::Created;
                    report.add(ResourceKind::Domain, &name, outcome);
                }
                Err(e) => {
                    report.notice(format!(
                        "custom domain {name} was not attached to {}: {e}",
                        self.config.project.name
                    ));
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            step.complete(if created { Outcome::Created } else { Outcome::Reused })?;
        } else {
            step.fail(format!("not attached: {}", failed.join(", ")));
        }
        report.steps.push(step);
        Ok(())
    }

    fn dns(
        &self,
        ctx: &StepContext<'_>,
        domain: &str,
        report: &mut PipelineReport,
    ) -> LaunchResult<()> {
        let mut step = StepReport::new(Step::Dns);
        let zone = match discovery::find_zone(ctx.api, ctx.account_id, domain) {
            Ok(zone) => zone,
            Err(e) => return Err(report.abort(step, e)),
        };

        let record = format!("www.{domain}");
        let target = deploy::pages_host(&self.config.project.name);
        match dns::upsert_cname(ctx.api, &zone.id, &record, &target) {
            Ok(upsert) => {
                step.complete(upsert.outcome())?;
                let detail = format!("{record} -> {target} ({})", upsert_label(upsert));
                report.steps.push(step.with_detail(detail));
                report.add(ResourceKind::DnsRecord, &record, upsert.outcome());
            }
            Err(e) => report.tolerate(step, &e),
        }

        report.notice(dns::apex_notice(domain, &target));
        Ok(())
    }

    fn access(
        &self,
        ctx: &StepContext<'_>,
        domain: &str,
        report: &mut PipelineReport,
    ) -> LaunchResult<()> {
        if self.config.cloudflare.access.admin_emails.is_empty() {
            report.skip(Step::AccessApp, "no admin emails configured")?;
            return report.skip(Step::AccessPolicy, "no admin emails configured");
        }

        let mut step = StepReport::new(Step::AccessApp);
        let app = match access::ensure_app(ctx, domain) {
            Ok((app, outcome)) => {
                step.complete(outcome)?;
                report.steps.push(step.with_detail(app.domain.clone()));
                report.add(ResourceKind::AccessApp, &app.domain, outcome);
                app
            }
            Err(e) => {
                report.tolerate(step, &e);
                return report.skip(Step::AccessPolicy, "no Access application");
            }
        };

        let mut step = StepReport::new(Step::AccessPolicy);
        match access::ensure_policy(ctx, &app.id) {
            Ok(upsert) => {
                step.complete(upsert.outcome())?;
                report.steps.push(step.with_detail(upsert_label(upsert)));
                report.add(ResourceKind::AccessPolicy, access::POLICY_NAME, upsert.outcome());
            }
            Err(e) => report.tolerate(step, &e),
        }
        Ok(())
    }
}

const fn upsert_label(upsert: Upsert) -> &'static str {
    match upsert {
        Upsert::Created => "created",
        Upsert::Updated => "updated",
        Upsert::Unchanged => "unchanged",
    }
}
