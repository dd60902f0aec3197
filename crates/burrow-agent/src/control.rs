//! Typed client for the broker's control plane.

use std::time::Duration;

use burrow_proto::{
    AccountCheckRequest, AccountCheckResponse, NodeNameRequest, ProvideProxyRequest,
    RandomPortResponse,
};
use reqwest::StatusCode;

use crate::error::AgentError;

/// Bound on every control-plane round trip; expiry is a proceed failure.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// One broker's control endpoints, addressed by host and API port.
pub struct ControlApi {
    base: String,
    client: reqwest::Client,
}

impl ControlApi {
    pub fn new(server_host: &str, control_api_port: u16) -> Self {
        Self {
            base: format!("http://{server_host}:{control_api_port}"),
            client: reqwest::Client::new(),
        }
    }

    pub async fn check_account(
        &self,
        node_name: &str,
        node_password: &str,
    ) -> Result<bool, AgentError> {
        let response = self
            .client
            .get(format!("{}/node/account/check", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(&AccountCheckRequest {
                node_name: node_name.to_string(),
                node_password: node_password.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<AccountCheckResponse>().await?.valid)
    }

    pub async fn random_port(&self) -> Result<u16, AgentError> {
        let response = self
            .client
            .get(format!("{}/port/random", self.base))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Err(AgentError::ResourceExhausted);
        }

        let response = response.error_for_status()?;
        Ok(response.json::<RandomPortResponse>().await?.port)
    }

    pub async fn provide_proxy(&self, request: &ProvideProxyRequest) -> Result<(), AgentError> {
        let response = self
            .client
            .post(format!("{}/proxy/provide", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(request)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AgentError::AuthenticationRejected(request.node_name.clone()));
        }

        response.error_for_status()?;
        Ok(())
    }

    pub async fn disconnect(&self, node_name: &str) -> Result<(), AgentError> {
        self.client
            .post(format!("{}/node/disconnect", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(&NodeNameRequest {
                node_name: node_name.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
