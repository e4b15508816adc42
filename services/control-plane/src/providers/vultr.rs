use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{http_client, unexpected, Provider, ProviderError, ProvisionRequest, ProvisionedServer};

const DEFAULT_BASE_URL: &str = "https://api.vultr.com";
const DEFAULT_PLAN: &str = "vc2-1c-1gb";
const DEFAULT_REGION: &str = "fra";
/// Ubuntu 22.04 x64.
const OS_ID: u32 = 1743;

/// Vultr instances API.
pub struct VultrProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    region: String,
}

#[derive(Deserialize)]
struct CreateInstanceResponse {
    instance: Instance,
}

#[derive(Deserialize)]
struct Instance {
    id: String,
    main_ip: String,
}

impl VultrProvider {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            region: DEFAULT_REGION.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_region(mut self, region: String) -> Self {
        self.region = region;
        self
    }
}

#[async_trait]
impl Provider for VultrProvider {
    fn name(&self) -> &'static str {
        "vultr"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedServer, ProviderError> {
        let url = format!("{}/v2/instances", self.base_url);
        let body = json!({
            "label": format!("appz-{}", request.name.to_lowercase()),
            "plan": request.server_type.as_deref().unwrap_or(DEFAULT_PLAN),
            "os_id": OS_ID,
            "region": self.region,
        });
        debug!(url = %url, name = %request.name, "Creating Vultr instance");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if response.status().as_u16() != 202 {
            return Err(unexpected(response).await);
        }

        let text = response.text().await?;
        let created: CreateInstanceResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(ProvisionedServer {
            server_id: created.instance.id,
            address: created.instance.main_ip,
        })
    }

    async fn destroy(&self, server_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/v2/instances/{}", self.base_url, server_id);
        let response = self.client.delete(&url).bearer_auth(&self.api_key).send().await?;
        if response.status().as_u16() != 204 {
            return Err(unexpected(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Resources;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_provision_and_destroy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/instances"))
            .and(header("authorization", "Bearer vk"))
            .and(body_partial_json(serde_json::json!({
                "label": "appz-edge-2",
                "plan": "vc2-1c-1gb",
                "os_id": 1743,
                "region": "fra",
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "instance": {"id": "cb676a46-66fd-4dfb-b839-443f2e6c0b60", "main_ip": "0.0.0.0"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v2/instances/cb676a46-66fd-4dfb-b839-443f2e6c0b60"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let provider = VultrProvider::new("vk".into()).unwrap().with_base_url(server.uri());
        let created = provider
            .provision(&ProvisionRequest {
                name: "Edge-2".into(),
                server_type: None,
                capacity: Resources::new(1.0, 1.0, 25.0),
            })
            .await
            .unwrap();

        assert_eq!(created.server_id, "cb676a46-66fd-4dfb-b839-443f2e6c0b60");
        provider.destroy(&created.server_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_provision_rejects_other_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad plan"))
            .mount(&server)
            .await;

        let provider = VultrProvider::new("vk".into()).unwrap().with_base_url(server.uri());
        let err = provider
            .provision(&ProvisionRequest {
                name: "x".into(),
                server_type: Some("nope".into()),
                capacity: Resources::default(),
            })
            .await
            .unwrap_err();
        match err {
            ProviderError::UnexpectedStatus { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad plan");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
