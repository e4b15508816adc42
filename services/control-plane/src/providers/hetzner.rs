use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, unexpected, Provider, ProviderError, ProvisionRequest, ProvisionedServer};

const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud";
const DEFAULT_SERVER_TYPE: &str = "cx32";
const DEFAULT_LOCATION: &str = "fsn1";
const IMAGE: &str = "ubuntu-22.04";

/// Hetzner Cloud servers API.
pub struct HetznerProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    location: String,
    ssh_keys: Vec<String>,
}

impl HetznerProvider {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            location: DEFAULT_LOCATION.to_string(),
            ssh_keys: Vec::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_location(mut self, location: String) -> Self {
        self.location = location;
        self
    }

    pub fn with_ssh_keys(mut self, ssh_keys: Vec<String>) -> Self {
        self.ssh_keys = ssh_keys;
        self
    }
}

#[async_trait]
impl Provider for HetznerProvider {
    fn name(&self) -> &'static str {
        "hetzner"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedServer, ProviderError> {
        let url = format!("{}/v1/servers", self.base_url);
        let body = json!({
            "name": format!("appz-{}", request.name.to_lowercase()),
            "server_type": request.server_type.as_deref().unwrap_or(DEFAULT_SERVER_TYPE),
            "image": IMAGE,
            "location": self.location,
            "ssh_keys": self.ssh_keys,
        });
        debug!(url = %url, name = %request.name, "Creating Hetzner server");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if response.status().as_u16() != 201 {
            return Err(unexpected(response).await);
        }

        let data: Value = response.json().await?;
        let server = &data["server"];
        let server_id = match &server["id"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return Err(ProviderError::InvalidResponse("missing server.id".into())),
        };
        let address = server["public_net"]["ipv4"]["ip"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("missing server.public_net.ipv4.ip".into()))?
            .to_string();

        Ok(ProvisionedServer { server_id, address })
    }

    async fn destroy(&self, server_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/v1/servers/{}", self.base_url, server_id);
        let response = self.client.delete(&url).bearer_auth(&self.api_key).send().await?;
        if response.status().as_u16() != 200 {
            return Err(unexpected(response).await);
        }
        Ok(())
    }
}
