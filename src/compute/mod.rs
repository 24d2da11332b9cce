//! Google Compute Engine implementation of [`Gateway`].
//!
//! Talks to the Compute REST API v1 with a bearer token. Every mutating call
//! returns as soon as the API accepts the request; the orchestrator confirms
//! completion by polling the status queries.

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

mod error;
mod firewalls;
mod images;
mod instances;
mod types;

pub use error::ComputeError;

use crate::gateway::{
    Gateway, GatewayFuture, ImageStatus, InstanceStatus, RuleDeletion, RuleInsert,
};
use crate::lab::{FirewallRule, ImageRequest, InstanceRequest};
use types::ApiErrorEnvelope;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URL of the Compute Engine REST API.
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Connection settings for [`ComputeGateway`].
#[derive(Clone, Eq, PartialEq)]
pub struct ComputeSettings {
    /// OAuth access token sent as a bearer token.
    pub access_token: String,
    /// Project owning the lab resources.
    pub project_id: String,
    /// Zone hosting the instance.
    pub zone: String,
    /// API root, overridable for private endpoints.
    pub api_base: String,
}

impl std::fmt::Debug for ComputeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSettings")
            .field("access_token", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("zone", &self.zone)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Gateway bound to one project and zone.
#[derive(Clone, Debug)]
pub struct ComputeGateway {
    settings: ComputeSettings,
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug)]
struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    fn is_conflict(&self) -> bool {
        self.status == StatusCode::CONFLICT
    }

    fn ensure_success(self, operation: &'static str) -> Result<Self, ComputeError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let message = serde_json::from_str::<ApiErrorEnvelope>(&self.body)
            .map_or_else(|_| self.body.trim().to_owned(), |envelope| envelope.error.message);
        Err(ComputeError::Api {
            operation,
            status: self.status.as_u16(),
            message,
        })
    }

    fn decode<T: DeserializeOwned>(&self, operation: &'static str) -> Result<T, ComputeError> {
        serde_json::from_str(&self.body).map_err(|err| ComputeError::Decode {
            operation,
            message: err.to_string(),
        })
    }
}

impl ComputeGateway {
    /// Creates a gateway after checking that every setting is present.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Config`] naming the first empty setting.
    pub fn new(settings: ComputeSettings) -> Result<Self, ComputeError> {
        for (value, field) in [
            (&settings.access_token, "access_token"),
            (&settings.project_id, "project_id"),
            (&settings.zone, "zone"),
            (&settings.api_base, "api_base"),
        ] {
            if value.trim().is_empty() {
                return Err(ComputeError::Config(field.to_owned()));
            }
        }
        Ok(Self { settings })
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ComputeSettings {
        &self.settings
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{path}",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.project_id
        )
    }

    fn zone_url(&self, path: &str) -> String {
        self.project_url(&format!("zones/{}/{path}", self.settings.zone))
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<ApiResponse, ComputeError> {
        let transport = |err: reqwest::Error| ComputeError::Transport {
            operation,
            message: err.to_string(),
        };
        let response = request
            .bearer_auth(&self.settings.access_token)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        Ok(ApiResponse { status, body })
    }

    fn client() -> &'static reqwest::Client {
        &HTTP_CLIENT
    }
}

impl Gateway for ComputeGateway {
    type Error = ComputeError;

    fn image_status<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, ImageStatus, Self::Error> {
        Box::pin(self.fetch_image_status(name))
    }

    fn create_image<'a>(&'a self, request: &'a ImageRequest) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.insert_image(request))
    }

    fn delete_image<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.remove_image(name))
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.insert_instance(request))
    }

    fn instance_status<'a>(
        &'a self,
        name: &'a str,
    ) -> GatewayFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(self.fetch_instance_status(name))
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.remove_instance(name))
    }

    fn stop_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.instance_action(name, "stop", "stop_instance"))
    }

    fn start_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(self.instance_action(name, "start", "start_instance"))
    }

    fn external_address<'a>(
        &'a self,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<IpAddr>, Self::Error> {
        Box::pin(self.fetch_external_address(name))
    }

    fn upsert_firewall_rule<'a>(
        &'a self,
        rule: &'a FirewallRule,
    ) -> GatewayFuture<'a, RuleInsert, Self::Error> {
        Box::pin(self.insert_firewall_rule(rule))
    }

    fn firewall_rule_exists<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, bool, Self::Error> {
        Box::pin(self.fetch_firewall_rule(name))
    }

    fn delete_firewall_rules<'a>(
        &'a self,
        names: &'a [String],
    ) -> GatewayFuture<'a, Vec<RuleDeletion>, Self::Error> {
        Box::pin(self.remove_firewall_rules(names))
    }
}

#[cfg(test)]
mod tests;
