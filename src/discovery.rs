//! Paginated discovery of accounts and zones.

use tracing::{debug, info};

use crate::api::{Account, CloudflareApi, Page, Zone};
use crate::config::CloudflareConfig;
use crate::error::{LaunchError, LaunchResult};

/// Page size used for every listing.
pub const PAGE_SIZE: u32 = 50;

/// Drain a paginated listing, starting at page 1.
///
/// Keeps requesting while the reported `total_pages` says there is
/// more. A response without pagination metadata ends the walk after
/// its first page.
pub fn paginate<T>(
    mut fetch: impl FnMut(u32, u32) -> LaunchResult<Page<T>>,
) -> LaunchResult<Vec<T>> {
    let mut items = Vec::new();
    let mut page = 1;

    loop {
        let batch = fetch(page, PAGE_SIZE)?;
        debug!(page, count = batch.items.len(), total_pages = ?batch.total_pages, "fetched page");
        items.extend(batch.items);

        match batch.total_pages {
            Some(total) if page < total => page += 1,
            _ => break,
        }
    }

    Ok(items)
}

pub fn list_accounts(api: &dyn CloudflareApi) -> LaunchResult<Vec<Account>> {
    paginate(|page, per_page| api.accounts_page(page, per_page))
}

pub fn list_zones(api: &dyn CloudflareApi, account_id: &str) -> LaunchResult<Vec<Zone>> {
    paginate(|page, per_page| api.zones_page(account_id, page, per_page))
}

/// Decide which account to deploy into.
///
/// A configured id wins without any API call. Otherwise the
/// accounts visible to the identity are listed: a single account is
/// used as is, several are narrowed by `account_name`.
pub fn resolve_account(
    api: &dyn CloudflareApi,
    config: &CloudflareConfig,
) -> LaunchResult<Account> {
    if let Some(id) = &config.account_id {
        return Ok(Account {
            id: id.clone(),
            name: config.account_name.clone().unwrap_or_default(),
        });
    }

    let accounts = list_accounts(api)?;
    let chosen = match (accounts.len(), &config.account_name) {
        (0, _) => {
            return Err(LaunchError::Config(
                "no Cloudflare accounts are visible to this identity".into(),
            ));
        }
        (1, None) => accounts.into_iter().next(),
        (_, Some(name)) => accounts.into_iter().find(|a| &a.name == name),
        (_, None) => {
            let names: Vec<&str> = accounts.iter().map(|a| a.name.as_str()).collect();
            return Err(LaunchError::Config(format!(
                "several accounts available ({}); set cloudflare.account_name or account_id",
                names.join(", ")
            )));
        }
    };

    let account = chosen.ok_or_else(|| {
        LaunchError::Config(format!(
            "account '{}' not found",
            config.account_name.as_deref().unwrap_or_default()
        ))
    })?;
    info!(account = %account.name, id = %account.id, "using account");
    Ok(account)
}

/// The zone serving `domain`: an exact match, or else the zone with
/// the longest name that `domain` is a subdomain of.
#[must_use]
pub fn zone_for<'a>(domain: &str, zones: &'a [Zone]) -> Option<&'a Zone> {
    zones
        .iter()
        .filter(|z| domain == z.name || domain.ends_with(&format!(".{}", z.name)))
        .max_by_key(|z| z.name.len())
}

/// Look up the zone serving `domain` within an account.
pub fn find_zone(api: &dyn CloudflareApi, account_id: &str, domain: &str) -> LaunchResult<Zone> {
    let zones = list_zones(api, account_id)?;
    zone_for(domain, &zones)
        .cloned()
        .ok_or_else(|| LaunchError::ZoneNotFound(domain.to_string()))
}
