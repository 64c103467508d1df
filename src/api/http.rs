use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{
    AccessApp, AccessAppInput, AccessPolicy, AccessPolicyInput, Account, Bucket, CloudflareApi,
    DnsRecord, DnsRecordInput, IssuedToken, Page, PagesDomain, PermissionGroup, TokenRequest,
    Zone,
};
use crate::config::Identity;
use crate::error::{LaunchError, LaunchResult};

pub const CF_API: &str = "https://api.cloudflare.com/client/v4";

/// Error code returned by the R2 endpoints when R2 has not been
/// enabled on the account.
pub const R2_NOT_ENABLED: i64 = 10042;

/// Error codes that mean the credential itself was rejected.
const AUTH_ERROR_CODES: [i64; 4] = [9103, 9106, 9109, 10000];

/// Blocking client for the Cloudflare v4 REST API.
pub struct HttpApi {
    client: Client,
    base_url: String,
    identity: Identity,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiZone {
    id: String,
    name: String,
    #[serde(default)]
    account: Option<ApiId>,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

impl HttpApi {
    pub fn new(identity: Identity) -> LaunchResult<Self> {
        Self::with_base_url(identity, CF_API)
    }

    /// Point the client at another API root (a mock server in tests).
    pub fn with_base_url(identity: Identity, base_url: &str) -> LaunchResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("flarelaunch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.identity {
            Identity::Token(token) => builder.bearer_auth(token),
            Identity::GlobalKey { email, key } => builder
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
        }
    }

    fn execute(&self, builder: RequestBuilder, context: &str) -> LaunchResult<Envelope> {
        let response = self.authorize(builder).send()?;
        let status = response.status();
        let body = response.text()?;
        debug!(%context, %status, "Cloudflare API response");

        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| LaunchError::Api {
            context: context.to_string(),
            code: i64::from(status.as_u16()),
            message: format!("unreadable response: {e}"),
        })?;

        if envelope.success {
            return Ok(envelope);
        }

        let (code, message) = envelope.errors.first().map_or_else(
            || (i64::from(status.as_u16()), "unknown error".to_string()),
            |e| (e.code, e.message.clone()),
        );

        if status == StatusCode::UNAUTHORIZED || AUTH_ERROR_CODES.contains(&code) {
            return Err(LaunchError::Authentication(format!("{context}: {message}")));
        }

        Err(LaunchError::Api {
            context: context.to_string(),
            code,
            message,
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, context: &str) -> LaunchResult<T> {
        let envelope = self.execute(self.client.get(self.url(path)), context)?;
        decode(envelope.result, context)
    }

    fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> LaunchResult<(Vec<T>, Option<u32>)> {
        let builder = self.client.get(self.url(path)).query(query);
        let envelope = self.execute(builder, context)?;
        let total_pages = envelope.result_info.and_then(|info| info.total_pages);
        Ok((decode(envelope.result, context)?, total_pages))
    }

    fn send_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
        context: &str,
    ) -> LaunchResult<T> {
        let builder = self.client.request(method, self.url(path)).json(body);
        let envelope = self.execute(builder, context)?;
        decode(envelope.result, context)
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value, context: &str) -> LaunchResult<T> {
    serde_json::from_value(value).map_err(|e| LaunchError::Api {
        context: context.to_string(),
        code: 0,
        message: format!("unexpected result shape: {e}"),
    })
}

fn storage_error(err: LaunchError) -> LaunchError {
    match err {
        LaunchError::Api { code, message, .. }
            if code == R2_NOT_ENABLED || message.contains("enable R2") =>
        {
            LaunchError::StorageNotEnabled
        }
        other => other,
    }
}

fn page_query(page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    vec![
        ("page", page.to_string()),
        ("per_page", per_page.to_string()),
        ("order", "name".to_string()),
        ("direction", "asc".to_string()),
    ]
}

impl CloudflareApi for HttpApi {
    fn scoped(&self, token: &str) -> Box<dyn CloudflareApi> {
        Box::new(Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            identity: Identity::Token(token.to_string()),
        })
    }

    fn user_id(&self) -> LaunchResult<String> {
        let user: ApiId = self.get("/user", "user lookup")?;
        Ok(user.id)
    }

    fn permission_groups(&self) -> LaunchResult<Vec<PermissionGroup>> {
        self.get("/user/tokens/permission_groups", "permission groups")
    }

    fn create_token(&self, request: &TokenRequest) -> LaunchResult<IssuedToken> {
        self.send_json(reqwest::Method::POST, "/user/tokens", request, "token create")
    }

    fn delete_token(&self, token_id: &str) -> LaunchResult<()> {
        let builder = self
            .client
            .delete(self.url(&format!("/user/tokens/{token_id}")));
        self.execute(builder, "token delete")?;
        Ok(())
    }

    fn accounts_page(&self, page: u32, per_page: u32) -> LaunchResult<Page<Account>> {
        let (items, total_pages) =
            self.get_page("/accounts", &page_query(page, per_page), "accounts list")?;
        Ok(Page { items, total_pages })
    }

    fn zones_page(&self, account_id: &str, page: u32, per_page: u32) -> LaunchResult<Page<Zone>> {
        let mut query = vec![("account.id", account_id.to_string())];
        query.extend(page_query(page, per_page));
        let (zones, total_pages): (Vec<ApiZone>, _) =
            self.get_page("/zones", &query, "zones list")?;
        let items = zones
            .into_iter()
            .map(|z| Zone {
                id: z.id,
                name: z.name,
                account_id: z.account.map_or_else(|| account_id.to_string(), |a| a.id),
            })
            .collect();
        Ok(Page { items, total_pages })
    }

    fn list_buckets(&self, account_id: &str) -> LaunchResult<Vec<Bucket>> {
        let list: BucketList = self
            .get(&format!("/accounts/{account_id}/r2/buckets"), "R2 bucket list")
            .map_err(storage_error)?;
        Ok(list.buckets)
    }

    fn create_bucket(&self, account_id: &str, name: &str) -> LaunchResult<Bucket> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/accounts/{account_id}/r2/buckets"),
                &serde_json::json!({ "name": name }),
                "R2 bucket create",
            )
            .map_err(storage_error)?;
        Ok(Bucket {
            name: name.to_string(),
        })
    }

    fn list_pages_domains(
        &self,
        account_id: &str,
        project: &str,
    ) -> LaunchResult<Vec<PagesDomain>> {
        self.get(
            &format!("/accounts/{account_id}/pages/projects/{project}/domains"),
            "Pages domain list",
        )
    }

    fn add_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> LaunchResult<PagesDomain> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/accounts/{account_id}/pages/projects/{project}/domains"),
            &serde_json::json!({ "name": domain }),
            "Pages domain attach",
        )
    }

    fn list_dns_records(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> LaunchResult<Vec<DnsRecord>> {
        let builder = self
            .client
            .get(self.url(&format!("/zones/{zone_id}/dns_records")))
            .query(&[("type", record_type), ("name", name)]);
        let envelope = self.execute(builder, "DNS record list")?;
        decode(envelope.result, "DNS record list")
    }

    fn create_dns_record(
        &self,
        zone_id: &str,
        record: &DnsRecordInput,
    ) -> LaunchResult<DnsRecord> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/zones/{zone_id}/dns_records"),
            record,
            "DNS record create",
        )
    }

    fn update_dns_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DnsRecordInput,
    ) -> LaunchResult<DnsRecord> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/zones/{zone_id}/dns_records/{record_id}"),
            record,
            "DNS record update",
        )
    }

    fn list_access_apps(&self, account_id: &str) -> LaunchResult<Vec<AccessApp>> {
        self.get(
            &format!("/accounts/{account_id}/access/apps"),
            "Access app list",
        )
    }

    fn create_access_app(
        &self,
        account_id: &str,
        app: &AccessAppInput,
    ) -> LaunchResult<AccessApp> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/accounts/{account_id}/access/apps"),
            app,
            "Access app create",
        )
    }

    fn list_access_policies(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> LaunchResult<Vec<AccessPolicy>> {
        self.get(
            &format!("/accounts/{account_id}/access/apps/{app_id}/policies"),
            "Access policy list",
        )
    }

    fn create_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy: &AccessPolicyInput,
    ) -> LaunchResult<AccessPolicy> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/accounts/{account_id}/access/apps/{app_id}/policies"),
            policy,
            "Access policy create",
        )
    }

    fn update_access_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
        policy: &AccessPolicyInput,
    ) -> LaunchResult<AccessPolicy> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/accounts/{account_id}/access/apps/{app_id}/policies/{policy_id}"),
            policy,
            "Access policy update",
        )
    }
}
