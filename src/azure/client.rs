//! Azure Resource Manager REST client.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    AzureCredentials, ManagementApi, NicRecord, NsgRecord, PublicIpRecord, ResourceRef, VmRecord,
};
use crate::config::ScanConfig;
use crate::error::{PostureError, Result};
use crate::resource::{name_from_id, SecurityRule, StorageProperties};

const STORAGE_API_VERSION: &str = "2023-01-01";
const COMPUTE_API_VERSION: &str = "2023-09-01";
const NETWORK_API_VERSION: &str = "2023-05-01";

const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Refresh the bearer token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Blocking ARM client shared by all enumerators of a scan.
///
/// One client-credential token is cached behind a mutex, so concurrent
/// enumerators authenticate once.
pub struct ArmClient {
    http: Client,
    credentials: AzureCredentials,
    management_endpoint: Url,
    login_endpoint: Url,
    token: Mutex<Option<CachedToken>>,
}

impl ArmClient {
    pub fn new(credentials: &AzureCredentials, config: &ScanConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("azposture/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PostureError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials: credentials.clone(),
            management_endpoint: parse_endpoint(&config.management_endpoint)?,
            login_endpoint: parse_endpoint(&config.login_endpoint)?,
            token: Mutex::new(None),
        })
    }

    fn subscription(&self) -> Result<&str> {
        self.credentials
            .subscription_id
            .as_deref()
            .ok_or_else(|| PostureError::Access("Azure subscription id missing".into()))
    }

    fn bearer_token(&self) -> Result<String> {
        self.credentials.ensure_configured()?;

        let mut cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let tenant = self.credentials.tenant_id.as_deref().unwrap_or_default();
        let url = self
            .login_endpoint
            .join(&format!("{tenant}/oauth2/v2.0/token"))
            .map_err(|e| PostureError::Config(format!("token endpoint: {e}")))?;

        debug!(tenant, "requesting management token");
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_id",
                    self.credentials.client_id.as_deref().unwrap_or_default(),
                ),
                (
                    "client_secret",
                    self.credentials.client_secret.as_deref().unwrap_or_default(),
                ),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .map_err(transport_error)?;

        let token: TokenResponse = decode(check_status(response, "token request")?)?;
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    /// GET a management path (or an absolute `nextLink`) and decode it.
    fn get<T: DeserializeOwned>(&self, path_or_url: &str, api_version: &str) -> Result<T> {
        let url = api_url(&self.management_endpoint, path_or_url, api_version)?;
        let token = self.bearer_token()?;

        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .map_err(transport_error)?;

        decode(check_status(response, path_or_url)?)
    }

    /// GET a list endpoint, following `nextLink` until exhausted.
    fn list<T: DeserializeOwned>(&self, path: &str, api_version: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());

        while let Some(page_url) = next.take() {
            let page: ArmPage<T> = self.get(&page_url, api_version)?;
            items.extend(page.value);
            next = page.next_link;
        }

        Ok(items)
    }
}

impl ManagementApi for ArmClient {
    fn ensure_configured(&self) -> Result<()> {
        self.credentials.ensure_configured()
    }

    fn list_storage_accounts(&self) -> Result<Vec<ResourceRef>> {
        let path = format!(
            "/subscriptions/{}/providers/Microsoft.Storage/storageAccounts",
            self.subscription()?
        );
        let accounts: Vec<ArmResource<serde_json::Value>> = self.list(&path, STORAGE_API_VERSION)?;
        Ok(accounts
            .into_iter()
            .map(|a| ResourceRef {
                id: a.id,
                name: a.name,
            })
            .collect())
    }

    fn get_storage_account(&self, id: &str) -> Result<StorageProperties> {
        let account: ArmResource<StorageProperties> = self.get(id, STORAGE_API_VERSION)?;
        Ok(account.properties)
    }

    fn list_virtual_machines(&self) -> Result<Vec<VmRecord>> {
        let path = format!(
            "/subscriptions/{}/providers/Microsoft.Compute/virtualMachines",
            self.subscription()?
        );
        let vms: Vec<ArmResource<VmProps>> = self.list(&path, COMPUTE_API_VERSION)?;
        Ok(vms
            .into_iter()
            .map(|vm| VmRecord {
                id: vm.id,
                name: vm.name,
                network_interface_ids: vm
                    .properties
                    .network_profile
                    .map(|p| p.network_interfaces.into_iter().map(|n| n.id).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn get_network_interface(&self, id: &str) -> Result<NicRecord> {
        let nic: ArmResource<NicProps> = self.get(id, NETWORK_API_VERSION)?;
        Ok(NicRecord {
            public_ip_ids: nic
                .properties
                .ip_configurations
                .into_iter()
                .filter_map(|c| c.properties.public_ip_address.map(|r| r.id))
                .collect(),
            id: nic.id,
            name: nic.name,
        })
    }

    fn get_public_ip_address(&self, id: &str) -> Result<PublicIpRecord> {
        let pip: ArmResource<PublicIpProps> = self.get(id, NETWORK_API_VERSION)?;
        Ok(PublicIpRecord {
            id: pip.id,
            name: pip.name,
            ip_address: pip.properties.ip_address,
        })
    }

    fn list_network_security_groups(&self) -> Result<Vec<NsgRecord>> {
        let path = format!(
            "/subscriptions/{}/providers/Microsoft.Network/networkSecurityGroups",
            self.subscription()?
        );
        let nsgs: Vec<ArmResource<NsgProps>> = self.list(&path, NETWORK_API_VERSION)?;
        Ok(nsgs
            .into_iter()
            .map(|nsg| NsgRecord {
                id: nsg.id,
                name: nsg.name,
                security_rules: nsg
                    .properties
                    .security_rules
                    .into_iter()
                    .map(SecurityRule::from)
                    .collect(),
            })
            .collect())
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    // A trailing slash keeps `Url::join` from dropping the last segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| PostureError::Config(format!("endpoint '{raw}': {e}")))
}

/// Resolve a management path or absolute URL, adding `api-version` when the
/// URL does not already carry one (ARM `nextLink`s do).
fn api_url(endpoint: &Url, path_or_url: &str, api_version: &str) -> Result<Url> {
    let mut url = if path_or_url.starts_with("https://") || path_or_url.starts_with("http://") {
        Url::parse(path_or_url)
    } else {
        endpoint.join(path_or_url.trim_start_matches('/'))
    }
    .map_err(|e| PostureError::Validation(format!("resource path '{path_or_url}': {e}")))?;

    if !url.query_pairs().any(|(k, _)| k == "api-version") {
        url.query_pairs_mut().append_pair("api-version", api_version);
    }
    Ok(url)
}

fn transport_error(e: reqwest::Error) -> PostureError {
    if e.is_timeout() {
        PostureError::Transient(format!("request timed out: {e}"))
    } else {
        PostureError::Transient(e.to_string())
    }
}

fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let detail = body.chars().take(300).collect::<String>();
    let message = format!("{what} returned {status}: {detail}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PostureError::Access(message)),
        // AAD answers bad client credentials with 400 invalid_client.
        StatusCode::BAD_REQUEST if body.contains("invalid_client") => {
            Err(PostureError::Access(message))
        }
        _ => Err(PostureError::Transient(message)),
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .map_err(|e| PostureError::Transient(format!("unexpected response body: {e}")))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ArmPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct ArmResource<P> {
    id: String,
    name: String,
    #[serde(default)]
    properties: P,
}

#[derive(Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmProps {
    network_profile: Option<NetworkProfile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkProfile {
    #[serde(default)]
    network_interfaces: Vec<IdRef>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NicProps {
    #[serde(default)]
    ip_configurations: Vec<IpConfiguration>,
}

#[derive(Deserialize)]
struct IpConfiguration {
    #[serde(default)]
    properties: IpConfigurationProps,
}

#[derive(Default, Deserialize)]
struct IpConfigurationProps {
    #[serde(rename = "publicIPAddress")]
    public_ip_address: Option<IdRef>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIpProps {
    ip_address: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NsgProps {
    #[serde(default)]
    security_rules: Vec<RuleWire>,
}

#[derive(Deserialize)]
struct RuleWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    properties: RuleProps,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleProps {
    source_address_prefix: Option<String>,
    destination_port_range: Option<String>,
    protocol: Option<String>,
    access: Option<String>,
    direction: Option<String>,
    priority: Option<i64>,
}

impl From<RuleWire> for SecurityRule {
    fn from(rule: RuleWire) -> Self {
        let name = rule
            .name
            .or_else(|| rule.id.as_deref().map(|id| name_from_id(id).to_string()))
            .unwrap_or_default();
        SecurityRule {
            name,
            source_address_prefix: rule.properties.source_address_prefix,
            destination_port_range: rule.properties.destination_port_range,
            protocol: rule.properties.protocol,
            access: rule.properties.access,
            direction: rule.properties.direction,
            priority: rule.properties.priority,
        }
    }
}
