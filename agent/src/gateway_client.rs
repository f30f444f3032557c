//! Thin HTTP client for the Gateway's Control Plane API.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};

use crate::{config::Protocol, error::GatewayError};

#[derive(Serialize)]
struct AllocateRequest {
    local_port: u16,
    preferred_port: Option<u16>,
    protocol: Protocol,
    agent_mapping_id: String,
}

#[derive(Deserialize, Debug)]
pub struct AllocateResponse {
    pub success: bool,
    pub public_port: u16,
    pub protocol: Protocol,
}

pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: String) -> Result<Self, GatewayError> {
        Ok(Self {
            client: ClientBuilder::new().timeout(Duration::from_secs(10)).build()?,
            base_url,
        })
    }

    pub async fn allocate(
        &self,
        local_port: u16,
        preferred_port: Option<u16>,
        protocol: Protocol,
        agent_mapping_id: &str,
    ) -> Result<AllocateResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/ports/allocate", self.base_url))
            .json(&AllocateRequest {
                local_port,
                preferred_port,
                protocol,
                agent_mapping_id: agent_mapping_id.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Refused(message));
        }

        Ok(response.json().await?)
    }

    pub async fn release(&self, local_port: u16) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(format!("{}/ports/mapping/{}", self.base_url, local_port))
            .send()
            .await?;
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Refused(message));
        }
        Ok(())
    }
}
