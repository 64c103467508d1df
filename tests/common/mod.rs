//! In-memory stand-ins for Cloudflare and wrangler.
//!
//! Both fakes append to one shared event log so tests can assert on
//! the order of remote calls across the two.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use flarelaunch::LaunchConfig;
use flarelaunch::api::{
    AccessApp, AccessAppInput, AccessPolicy, AccessPolicyInput, Account, Bucket, CloudflareApi,
    DnsRecord, DnsRecordInput, IssuedToken, Page, PagesDomain, PermissionGroup, TokenRequest, Zone,
};
use flarelaunch::error::{LaunchError, LaunchResult};
use flarelaunch::wrangler::{D1Database, DeployRequest, DeployTool, Deployment, ToolEnv};

pub type Events = Rc<RefCell<Vec<String>>>;

pub const OPERATOR: &str = "operator";

#[derive(Default)]
pub struct CloudState {
    pub accounts: Vec<Account>,
    pub omit_total_pages: bool,
    pub zones: Vec<Zone>,
    pub user_id: String,
    pub catalog: Vec<PermissionGroup>,
    pub minted: Vec<TokenRequest>,
    pub active_tokens: Vec<String>,
    pub revoked: Vec<String>,
    pub storage_enabled: bool,
    pub buckets: Vec<String>,
    pub pages_domains: Vec<String>,
    pub dns: Vec<(String, DnsRecord)>,
    pub apps: Vec<AccessApp>,
    pub policies: Vec<(String, AccessPolicy)>,
    pub fail: HashSet<&'static str>,
    /// `(operation, credential)` for every call.
    pub calls: Vec<(String, String)>,
    next_id: u32,
}

impl CloudState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

pub fn catalog() -> Vec<PermissionGroup> {
    let account = "com.cloudflare.api.account";
    let groups = [
        ("Pages Write", account),
        ("Pages Read", account),
        ("Workers Scripts Write", account),
        ("DNS Write", "com.cloudflare.api.account.zone"),
        ("Workers R2 Storage Write", account),
        ("Workers R2 Storage Read", account),
        ("D1 Write", account),
        ("Access: Apps and Policies Write", account),
        ("Access: Apps and Policies Read", account),
        ("Account Settings Read", account),
        ("User Details Read", "com.cloudflare.api.user"),
        ("Memberships Read", "com.cloudflare.api.user"),
    ];
    groups
        .iter()
        .enumerate()
        .map(|(i, (name, scope))| PermissionGroup {
            id: format!("pg-{i}"),
            name: (*name).to_string(),
            scopes: vec![(*scope).to_string()],
        })
        .collect()
}

/// Fake Cloudflare API. Clones made through `scoped` share state.
#[derive(Clone)]
pub struct FakeCloudflare {
    pub state: Rc<RefCell<CloudState>>,
    events: Events,
    credential: String,
}

impl FakeCloudflare {
    pub fn new(events: Events) -> Self {
        let state = CloudState {
            accounts: vec![Account {
                id: "acc-1".into(),
                name: "Demo Account".into(),
            }],
            zones: vec![Zone {
                id: "zone-1".into(),
                name: "example.com".into(),
                account_id: "acc-1".into(),
            }],
            user_id: "user-1".into(),
            catalog: catalog(),
            storage_enabled: true,
            ..CloudState::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            events,
            credential: OPERATOR.to_string(),
        }
    }

    pub fn fail(&self, operation: &'static str) {
        self.state.borrow_mut().fail.insert(operation);
    }

    /// Operations made with something other than the operator identity.
    pub fn scoped_calls(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(_, who)| who != OPERATOR)
            .map(|(op, _)| op.clone())
            .collect()
    }

    pub fn operator_calls(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(_, who)| who == OPERATOR)
            .map(|(op, _)| op.clone())
            .collect()
    }

    fn call(&self, operation: &'static str) -> LaunchResult<()> {
        self.events.borrow_mut().push(format!("api:{operation}"));
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push((operation.to_string(), self.credential.clone()));
        if state.fail.contains(operation) {
            return Err(LaunchError::Api {
                context: operation.to_string(),
                code: 1000,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

fn page<T: Clone>(items: &[T], page: u32, per_page: u32, omit_total: bool) -> Page<T> {
    let per_page = per_page as usize;
    let start = (page as usize - 1) * per_page;
    let slice = items.iter().skip(start).take(per_page).cloned().collect();
    let total = items.len().div_ceil(per_page).max(1);
    Page {
        items: slice,
        total_pages: (!omit_total).then(|| u32::try_from(total).unwrap()),
    }
}

impl CloudflareApi for FakeCloudflare {
    fn scoped(&self, token: &str) -> Box<dyn CloudflareApi> {
        Box::new(Self {
            state: Rc::clone(&self.state),
            events: Rc::clone(&self.events),
            credential: token.to_string(),
        })
    }

    fn user_id(&self) -> LaunchResult<String> {
        self.call("user_id")?;
        Ok(self.state.borrow().user_id.clone())
    }

    fn permission_groups(&self) -> LaunchResult<Vec<PermissionGroup>> {
        self.call("permission_groups")?;
        Ok(self.state.borrow().catalog.clone())
    }

    fn create_token(&self, request: &TokenRequest) -> LaunchResult<IssuedToken> {
        self.call("create_token")?;
        let mut state = self.state.borrow_mut();
        let id = state.id("token");
        state.minted.push(request.clone());
        state.active_tokens.push(id.clone());
        Ok(IssuedToken {
            value: format!("secret-{id}"),
            id,
        })
    }

    fn delete_token(&self, token_id: &str) -> LaunchResult<()> {
        self.call("delete_token")?;
        let mut state = self.state.borrow_mut();
        state.revoked.push(token_id.to_string());
        let before = state.active_tokens.len();
        state.active_tokens.retain(|t| t != token_id);
        if state.active_tokens.len() == before {
            return Err(LaunchError::Api {
                context: "token delete".into(),
                code: 1003,
                message: "Invalid token".into(),
            });
        }
        Ok(())
    }

    fn accounts_page(&self, p: u32, per_page: u32) -> LaunchResult<Page<Account>> {
        self.call("accounts_page")?;
        let state = self.state.borrow();
        Ok(page(&state.accounts, p, per_page, state.omit_total_pages))
    }

    fn zones_page(&self, account_id: &str, p: u32, per_page: u32) -> LaunchResult<Page<Zone>> {
        self.call("zones_page")?;
        let state = self.state.borrow();
        let zones: Vec<Zone> = state
            .zones
            .iter()
            .filter(|z| z.account_id == account_id)
            .cloned()
            .collect();
        Ok(page(&zones, p, per_page, state.omit_total_pages))
    }

    fn list_buckets(&self, _account_id: &str) -> LaunchResult<Vec<Bucket>> {
        self.call("list_buckets")?;
        let state = self.state.borrow();
        if !state.storage_enabled {
            return Err(LaunchError::StorageNotEnabled);
        }
        Ok(state
            .buckets
            .iter()
            .map(|name| Bucket { name: name.clone() })
            .collect())
    }

    fn create_bucket(&self, _account_id: &str, name: &str) -> LaunchResult<Bucket> {
        self.call("create_bucket")?;
        self.state.borrow_mut().buckets.push(name.to_string());
        Ok(Bucket {
            name: name.to_string(),
        })
    }

    fn list_pages_domains(&self, _account_id: &str, _project: &str) -> LaunchResult<Vec<PagesDomain>> {
        self.call("list_pages_domains")?;
        Ok(self
            .state
            .borrow()
            .pages_domains
            .iter()
            .map(|name| PagesDomain {
                name: name.clone(),
                status: Some("active".into()),
            })
            .collect())
    }

    fn add_pages_domain(
        &self,
        _account_id: &str,
        _project: &str,
        domain: &str,
    ) -> LaunchResult<PagesDomain> {
        self.call("add_pages_domain")?;
        self.state.borrow_mut().pages_domains.push(domain.to_string());
        Ok(PagesDomain {
            name: domain.to_string(),
            status: Some("pending".into()),
        })
    }

    fn list_dns_records(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> LaunchResult<Vec<DnsRecord>> {
        self.call("list_dns_records")?;
        Ok(self
            .state
            .borrow()
            .dns
            .iter()
            .filter(|(z, r)| z == zone_id && r.record_type == record_type && r.name == name)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn create_dns_record(&self, zone_id: &str, record: &DnsRecordInput) -> LaunchResult<DnsRecord> {
        self.call("create_dns_record")?;
        let mut state = self.state.borrow_mut();
        let created = DnsRecord {
            id: state.id("rec"),
            record_type: record.record_type.clone(),
            name: record.name.clone(),
            content: record.content.clone(),
            ttl: record.ttl,
            proxied: record.proxied,
        };
        state.dns.push((zone_id.to_string(), created.clone()));
        Ok(created)
    }

    fn update_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DnsRecordInput,
    ) -> LaunchResult<DnsRecord> {
        self.call("update_dns_record")?;
        let mut state = self.state.borrow_mut();
        let (_, existing) = state
            .dns
            .iter_mut()
            .find(|(z, r)| z == zone_id && r.id == record_id)
            .unwrap();
        existing.content.clone_from(&record.content);
        existing.ttl = record.ttl;
        existing.proxied = record.proxied;
        Ok(existing.clone())
    }

    fn list_access_apps(&self, _account_id: &str) -> LaunchResult<Vec<AccessApp>> {
        self.call("list_access_apps")?;
        Ok(self.state.borrow().apps.clone())
    }

    fn create_access_app(&self, _account_id: &str, app: &AccessAppInput) -> LaunchResult<AccessApp> {
        self.call("create_access_app")?;
        let mut state = self.state.borrow_mut();
        let created = AccessApp {
            id: state.id("app"),
            name: app.name.clone(),
            domain: app.domain.clone(),
        };
        state.apps.push(created.clone());
        Ok(created)
    }

    fn list_access_policies(&self, _account_id: &str, app_id: &str) -> LaunchResult<Vec<AccessPolicy>> {
        self.call("list_access_policies")?;
        Ok(self
            .state
            .borrow()
            .policies
            .iter()
            .filter(|(a, _)| a == app_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn create_access_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy: &AccessPolicyInput,
    ) -> LaunchResult<AccessPolicy> {
        self.call("create_access_policy")?;
        let mut state = self.state.borrow_mut();
        let created = AccessPolicy {
            id: state.id("pol"),
            name: policy.name.clone(),
            decision: policy.decision.clone(),
            include: policy.include.clone(),
        };
        state.policies.push((app_id.to_string(), created.clone()));
        Ok(created)
    }

    fn update_access_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy_id: &str,
        policy: &AccessPolicyInput,
    ) -> LaunchResult<AccessPolicy> {
        self.call("update_access_policy")?;
        let mut state = self.state.borrow_mut();
        let (_, existing) = state
            .policies
            .iter_mut()
            .find(|(a, p)| a == app_id && p.id == policy_id)
            .unwrap();
        existing.decision.clone_from(&policy.decision);
        existing.include.clone_from(&policy.include);
        Ok(existing.clone())
    }
}

#[derive(Default)]
pub struct ToolState {
    pub databases: Vec<D1Database>,
    pub projects: Vec<String>,
    pub executed: Vec<PathBuf>,
    pub deployments: u32,
    pub deployed_dirs: Vec<PathBuf>,
    /// `(CLOUDFLARE_API_TOKEN, CLOUDFLARE_ACCOUNT_ID)` of every call.
    pub envs: Vec<(String, String)>,
    pub fail: HashSet<&'static str>,
    pub missing: bool,
    next_id: u32,
}

/// Fake wrangler.
#[derive(Clone)]
pub struct FakeWrangler {
    pub state: Rc<RefCell<ToolState>>,
    events: Events,
}

impl FakeWrangler {
    pub fn new(events: Events) -> Self {
        Self {
            state: Rc::new(RefCell::new(ToolState::default())),
            events,
        }
    }

    pub fn fail(&self, operation: &'static str) {
        self.state.borrow_mut().fail.insert(operation);
    }

    fn call(&self, operation: &'static str, env: ToolEnv<'_>) -> LaunchResult<()> {
        self.events.borrow_mut().push(format!("tool:{operation}"));
        let mut state = self.state.borrow_mut();
        state
            .envs
            .push((env.api_token.to_string(), env.account_id.to_string()));
        if state.fail.contains(operation) {
            return Err(LaunchError::CommandNotFound(format!("wrangler {operation}")));
        }
        Ok(())
    }
}

impl DeployTool for FakeWrangler {
    fn check(&self) -> LaunchResult<String> {
        if self.state.borrow().missing {
            return Err(LaunchError::CommandNotFound("wrangler".into()));
        }
        Ok("3.99.0".into())
    }

    fn list_databases(&self, env: ToolEnv<'_>) -> LaunchResult<Vec<D1Database>> {
        self.call("list_databases", env)?;
        Ok(self.state.borrow().databases.clone())
    }

    fn create_database(&self, env: ToolEnv<'_>, name: &str) -> LaunchResult<D1Database> {
        self.call("create_database", env)?;
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let db = D1Database {
            id: format!("db-uuid-{}", state.next_id),
            name: name.to_string(),
        };
        state.databases.push(db.clone());
        Ok(db)
    }

    fn execute_file(&self, env: ToolEnv<'_>, _database: &str, file: &Path) -> LaunchResult<()> {
        self.call("execute_file", env)?;
        self.state.borrow_mut().executed.push(file.to_path_buf());
        Ok(())
    }

    fn list_projects(&self, env: ToolEnv<'_>) -> LaunchResult<Vec<String>> {
        self.call("list_projects", env)?;
        Ok(self.state.borrow().projects.clone())
    }

    fn create_project(&self, env: ToolEnv<'_>, name: &str, _branch: &str) -> LaunchResult<()> {
        self.call("create_project", env)?;
        let mut state = self.state.borrow_mut();
        if state.projects.iter().any(|p| p == name) {
            return Err(LaunchError::Api {
                context: "pages project create".into(),
                code: 8_000_002,
                message: "A project with this name already exists".into(),
            });
        }
        state.projects.push(name.to_string());
        Ok(())
    }

    fn deploy(&self, env: ToolEnv<'_>, request: &DeployRequest<'_>) -> LaunchResult<Deployment> {
        self.call("deploy", env)?;
        let mut state = self.state.borrow_mut();
        state.deployments += 1;
        state.deployed_dirs.push(request.directory.to_path_buf());
        Ok(Deployment {
            url: Some(format!("https://abc123.{}.pages.dev", request.project)),
        })
    }
}

pub fn events() -> Events {
    Rc::new(RefCell::new(Vec::new()))
}

/// Fakes wired to one event log.
pub fn world() -> (FakeCloudflare, FakeWrangler, Events) {
    let log = events();
    (
        FakeCloudflare::new(Rc::clone(&log)),
        FakeWrangler::new(Rc::clone(&log)),
        log,
    )
}

/// A project directory with a build output, schema and seed file.
pub fn project_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let dist = dir.path().join("dist");
    fs::create_dir_all(&dist).unwrap();
    fs::write(dist.join("index.html"), "<h1>demo</h1>").unwrap();
    fs::write(dir.path().join("schema.sql"), "CREATE TABLE t (id INTEGER);").unwrap();
    fs::write(dir.path().join("seed.sql"), "INSERT INTO t VALUES (1);").unwrap();
    dir
}

/// `demo` with storage and database, rooted in `dir`.
pub fn demo_config(dir: &Path) -> LaunchConfig {
    LaunchConfig::new("demo")
        .source_dir(dir.join("dist"))
        .manifest(dir.join("wrangler.toml"))
        .storage(true)
        .database(true)
        .schema_file(dir.join("schema.sql"))
        .seed_file(dir.join("seed.sql"))
}
