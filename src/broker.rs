//! Short-lived, minimally scoped API tokens.
//!
//! The pipeline never deploys with the operator's own credential.
//! It mints a token covering exactly the permission groups the
//! enabled features need, hands that token to every step, and
//! revokes it when the run ends.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::api::{CloudflareApi, PermissionGroup, PermissionGroupRef, TokenPolicy, TokenRequest};
use crate::config::Features;
use crate::error::{LaunchError, LaunchResult};

const ACCOUNT_SCOPE: &str = "com.cloudflare.api.account";
const ZONE_SCOPE: &str = "com.cloudflare.api.account.zone";
const USER_SCOPE: &str = "com.cloudflare.api.user";

/// Level a permission group must be granted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Account,
    User,
}

impl Scope {
    fn accepts(self, catalog_scope: &str) -> bool {
        match self {
            Self::Account => catalog_scope == ACCOUNT_SCOPE || catalog_scope == ZONE_SCOPE,
            Self::User => catalog_scope == USER_SCOPE,
        }
    }
}

/// A logical capability the pipeline may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    PagesWrite,
    PagesRead,
    ScriptsWrite,
    DnsWrite,
    StorageWrite,
    StorageRead,
    D1Write,
    AccessAppsWrite,
    AccessAppsRead,
    AccountSettingsRead,
    UserRead,
    UserMembershipsRead,
}

impl Capability {
    /// Short capability name, e.g. `pages:write`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PagesWrite => "pages:write",
            Self::PagesRead => "pages:read",
            Self::ScriptsWrite => "scripts:write",
            Self::DnsWrite => "dns:write",
            Self::StorageWrite => "storage:write",
            Self::StorageRead => "storage:read",
            Self::D1Write => "d1:write",
            Self::AccessAppsWrite => "access:apps:write",
            Self::AccessAppsRead => "access:apps:read",
            Self::AccountSettingsRead => "account:settings:read",
            Self::UserRead => "user:read",
            Self::UserMembershipsRead => "user:memberships:read",
        }
    }

    /// Name of the matching entry in the permission-group catalog.
    #[must_use]
    pub const fn group_name(self) -> &'static str {
        match self {
            Self::PagesWrite => "Pages Write",
            Self::PagesRead => "Pages Read",
            Self::ScriptsWrite => "Workers Scripts Write",
            Self::DnsWrite => "DNS Write",
            Self::StorageWrite => "Workers R2 Storage Write",
            Self::StorageRead => "Workers R2 Storage Read",
            Self::D1Write => "D1 Write",
            Self::AccessAppsWrite => "Access: Apps and Policies Write",
            Self::AccessAppsRead => "Access: Apps and Policies Read",
            Self::AccountSettingsRead => "Account Settings Read",
            Self::UserRead => "User Details Read",
            Self::UserMembershipsRead => "Memberships Read",
        }
    }

    #[must_use]
    pub const fn scope(self) -> Scope {
        match self {
            Self::UserRead | Self::UserMembershipsRead => Scope::User,
            _ => Scope::Account,
        }
    }

    /// Capabilities needed to provision the given features.
    #[must_use]
    pub fn required(features: Features) -> Vec<Self> {
        let mut caps = vec![
            Self::PagesWrite,
            Self::PagesRead,
            Self::ScriptsWrite,
            Self::DnsWrite,
            Self::AccountSettingsRead,
            Self::UserRead,
            Self::UserMembershipsRead,
        ];
        if features.storage {
            caps.extend([Self::StorageWrite, Self::StorageRead]);
        }
        if features.database {
            caps.push(Self::D1Write);
        }
        if features.access {
            caps.extend([Self::AccessAppsWrite, Self::AccessAppsRead]);
        }
        caps
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Catalog groups picked for a set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSelection {
    pub account: Vec<PermissionGroupRef>,
    pub user: Vec<PermissionGroupRef>,
    /// Capabilities with no matching group in the catalog.
    pub dropped: Vec<Capability>,
}

/// Match each capability to a catalog group by name and scope.
///
/// A group whose name matches but whose scopes do not include the
/// required level is not used. Unmatched capabilities are dropped.
#[must_use]
pub fn select_groups(catalog: &[PermissionGroup], capabilities: &[Capability]) -> GroupSelection {
    let mut selection = GroupSelection::default();

    for &cap in capabilities {
        let scope = cap.scope();
        let found = catalog.iter().find(|g| {
            g.name == cap.group_name() && g.scopes.iter().any(|s| scope.accepts(s))
        });

        match found {
            Some(group) => {
                let group_ref = PermissionGroupRef {
                    id: group.id.clone(),
                    name: group.name.clone(),
                };
                match scope {
                    Scope::Account => selection.account.push(group_ref),
                    Scope::User => selection.user.push(group_ref),
                }
            }
            None => {
                let err = LaunchError::PermissionLookup {
                    name: cap.group_name().to_string(),
                };
                warn!(capability = %cap, "{err}; capability dropped from token");
                selection.dropped.push(cap);
            }
        }
    }

    selection
}

/// One allow policy per non-empty group list.
#[must_use]
pub fn build_policies(
    account_id: &str,
    user_id: &str,
    selection: &GroupSelection,
) -> Vec<TokenPolicy> {
    let mut policies = Vec::new();

    let scoped = [
        (format!("{ACCOUNT_SCOPE}.{account_id}"), &selection.account),
        (format!("{USER_SCOPE}.{user_id}"), &selection.user),
    ];

    for (resource, groups) in scoped {
        if groups.is_empty() {
            continue;
        }
        policies.push(TokenPolicy {
            effect: "allow".to_string(),
            resources: BTreeMap::from([(resource, "*".to_string())]),
            permission_groups: groups.clone(),
        });
    }

    policies
}

/// A minted token. The secret value never appears in `Debug` output.
#[derive(Clone)]
pub struct ScopedCredential {
    pub value: String,
    pub id: String,
    pub policies: Vec<TokenPolicy>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub dropped: Vec<Capability>,
}

impl fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("id", &self.id)
            .field("value", &"***")
            .field("policies", &self.policies)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("dropped", &self.dropped)
            .finish()
    }
}

/// Mints and revokes scoped tokens with the operator identity.
pub struct CredentialBroker<'a> {
    api: &'a dyn CloudflareApi,
    ttl: Duration,
}

impl<'a> CredentialBroker<'a> {
    #[must_use]
    pub fn new(api: &'a dyn CloudflareApi, ttl_minutes: u32) -> Self {
        Self {
            api,
            ttl: Duration::minutes(i64::from(ttl_minutes)),
        }
    }

    /// Mint a token covering the capabilities `features` need.
    pub fn mint(
        &self,
        features: Features,
        account_id: &str,
        user_id: &str,
    ) -> LaunchResult<ScopedCredential> {
        let catalog = self.api.permission_groups()?;
        let capabilities = Capability::required(features);
        let selection = select_groups(&catalog, &capabilities);
        let policies = build_policies(account_id, user_id, &selection);

        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;
        let request = TokenRequest {
            name: format!("flarelaunch deploy token - {}", issued_at.format("%Y-%m-%d")),
            policies: policies.clone(),
            expires_on: Some(expires_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        };

        let token = self.api.create_token(&request)?;
        info!(
            token_id = %token.id,
            groups = selection.account.len() + selection.user.len(),
            dropped = selection.dropped.len(),
            expires_at = %request.expires_on.as_deref().unwrap_or_default(),
            "scoped token minted"
        );

        Ok(ScopedCredential {
            value: token.value,
            id: token.id,
            policies,
            issued_at,
            expires_at,
            dropped: selection.dropped,
        })
    }

    /// Revoke a token. Never fails: errors are logged, since
    /// revocation runs during cleanup and must not hide the run's
    /// own outcome.
    pub fn revoke(&self, credential: &ScopedCredential) {
        match self.api.delete_token(&credential.id) {
            Ok(()) => info!(token_id = %credential.id, "scoped token revoked"),
            Err(e) => warn!(
                token_id = %credential.id,
                error = %e,
                "failed to revoke scoped token; delete it from the dashboard"
            ),
        }
    }

    /// Tie a credential's lifetime to the returned lease.
    #[must_use]
    pub fn lease(&'a self, credential: ScopedCredential) -> CredentialLease<'a> {
        CredentialLease {
            broker: self,
            credential: Some(credential),
        }
    }
}

/// Revokes its credential exactly once: on [`CredentialLease::release`]
/// or, failing that, when dropped (including during a panic unwind).
pub struct CredentialLease<'a> {
    broker: &'a CredentialBroker<'a>,
    credential: Option<ScopedCredential>,
}

impl CredentialLease<'_> {
    /// The leased credential, `None` once released.
    #[must_use]
    pub fn credential(&self) -> Option<&ScopedCredential> {
        self.credential.as_ref()
    }

    pub fn release(mut self) {
        self.revoke_once();
    }

    fn revoke_once(&mut self) {
        if let Some(credential) = self.credential.take() {
            self.broker.revoke(&credential);
        }
    }
}

impl Drop for CredentialLease<'_> {
    fn drop(&mut self) {
        self.revoke_once();
    }
}
