pub mod http;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LaunchResult;

/// A Cloudflare account. Discovered, never created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
}

/// A zone (domain) inside an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub account_id: String,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` when the API did not report pagination metadata.
    pub total_pages: Option<u32>,
}

/// An entry from the permission-group catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPolicy {
    pub effect: String,
    /// Resource scope, e.g. `com.cloudflare.api.account.<id>` -> `*`.
    pub resources: BTreeMap<String, String>,
    pub permission_groups: Vec<PermissionGroupRef>,
}

impl TokenPolicy {
    /// The single resource scope this policy applies to.
    #[must_use]
    pub fn resource_scope(&self) -> Option<&str> {
        self.resources.keys().next().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub name: String,
    pub policies: Vec<TokenPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedToken {
    pub id: String,
    pub value: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("id", &self.id)
            .field("value", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagesDomain {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordInput {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessApp {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAppInput {
    pub name: String,
    pub domain: String,
    pub session_duration: String,
    #[serde(rename = "type")]
    pub app_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub include: Vec<serde_json::Value>,
}

impl AccessPolicy {
    /// Emails named by `email` include rules.
    #[must_use]
    pub fn emails(&self) -> Vec<String> {
        self.include
            .iter()
            .filter_map(|rule| rule["email"]["email"].as_str())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicyInput {
    pub name: String,
    pub decision: String,
    pub include: Vec<serde_json::Value>,
}

impl AccessPolicyInput {
    /// An allow policy matching exactly `emails`.
    #[must_use]
    pub fn allow_emails(name: &str, emails: &[String]) -> Self {
        Self {
            name: name.to_string(),
            decision: "allow".to_string(),
            include: emails
                .iter()
                .map(|e| serde_json::json!({ "email": { "email": e } }))
                .collect(),
        }
    }
}

/// The slice of the Cloudflare REST API the pipeline consumes.
///
/// Every call is blocking and returns once the remote side has
/// answered. Implementations carry their own credential; use
/// [`CloudflareApi::scoped`] to get a client that authenticates with
/// a minted token instead.
pub trait CloudflareApi {
    /// A client for the same API authenticating with `token`.
    fn scoped(&self, token: &str) -> Box<dyn CloudflareApi>;

    fn user_id(&self) -> LaunchResult<String>;

    fn permission_groups(&self) -> LaunchResult<Vec<PermissionGroup>>;

    fn create_token(&self, request: &TokenRequest) -> LaunchResult<IssuedToken>;

    fn delete_token(&self, token_id: &str) -> LaunchResult<()>;

    /// Accounts ordered by name, ascending.
    fn accounts_page(&self, page: u32, per_page: u32) -> LaunchResult<Page<Account>>;

    /// Zones of `account_id` ordered by name, ascending.
    fn zones_page(&self, account_id: &str, page: u32, per_page: u32) -> LaunchResult<Page<Zone>>;

    /// Fails with [`crate::error::LaunchError::StorageNotEnabled`] when
    /// R2 has not been turned on for the account.
    fn list_buckets(&self, account_id: &str) -> LaunchResult<Vec<Bucket>>;

    fn create_bucket(&self, account_id: &str, name: &str) -> LaunchResult<Bucket>;

    fn list_pages_domains(&self, account_id: &str, project: &str)
    -> LaunchResult<Vec<PagesDomain>>;

    fn add_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> LaunchResult<PagesDomain>;

    fn list_dns_records(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> LaunchResult<Vec<DnsRecord>>;

    fn create_dns_record(&self, zone_id: &str, record: &DnsRecordInput)
    -> LaunchResult<DnsRecord>;

    fn update_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DnsRecordInput,
    ) -> LaunchResult<DnsRecord>;

    fn list_access_apps(&self, account_id: &str) -> LaunchResult<Vec<AccessApp>>;

    fn create_access_app(&self, account_id: &str, app: &AccessAppInput)
    -> LaunchResult<AccessApp>;

    fn list_access_policies(&self, account_id: &str, app_id: &str)
    -> LaunchResult<Vec<AccessPolicy>>;

    fn create_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy: &AccessPolicyInput,
    ) -> LaunchResult<AccessPolicy>;

    fn update_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
        policy: &AccessPolicyInput,
    ) -> LaunchResult<AccessPolicy>;
}
