use tracing::info;

use crate::api::{CloudflareApi, DnsRecordInput};
use crate::error::LaunchResult;
use crate::provision::Upsert;

/// TTL of the `www` record, in seconds.
pub const CNAME_TTL: u32 = 3600;

/// Create or update a proxied CNAME `name -> target` in a zone.
///
/// An existing record with the same name is updated in place, so
/// the zone never holds more than one. Cloudflare reports proxied
/// records with TTL 1 (automatic), so TTL is not compared for them.
pub fn upsert_cname(
    api: &dyn CloudflareApi,
    zone_id: &str,
    name: &str,
    target: &str,
) -> LaunchResult<Upsert> {
    let record = DnsRecordInput {
        record_type: "CNAME".to_string(),
        name: name.to_string(),
        content: target.to_string(),
        ttl: CNAME_TTL,
        proxied: true,
    };

    let existing = api.list_dns_records(zone_id, "CNAME", name)?;

    if let Some(current) = existing.first() {
        if current.content == target && current.proxied {
            info!(%name, %target, "CNAME record up to date");
            return Ok(Upsert::Unchanged);
        }
        info!(%name, from = %current.content, to = %target, "updating CNAME record");
        api.update_dns_record(zone_id, &current.id, &record)?;
        return Ok(Upsert::Updated);
    }

    info!(%name, %target, "creating CNAME record");
    api.create_dns_record(zone_id, &record)?;
    Ok(Upsert::Created)
}

/// What the operator has to do by hand for the apex record.
#[must_use]
pub fn apex_notice(domain: &str, target: &str) -> String {
    format!(
        "apex DNS for {domain} is not automated: add a CNAME '@' -> {target} \
         (flattened by Cloudflare) in the dashboard if the root should serve the site"
    )
}
