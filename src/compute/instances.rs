//! Instance calls.

use std::net::IpAddr;

use crate::gateway::InstanceStatus;
use crate::lab::InstanceRequest;

use super::types::{InstanceBody, InstanceResource};
use super::{ApiResponse, ComputeError, ComputeGateway};

impl ComputeGateway {
    async fn fetch_instance(&self, name: &str) -> Result<Option<InstanceResource>, ComputeError> {
        let request = Self::client().get(self.zone_url(&format!("instances/{name}")));
        let response = self.send("instance_status", request).await?;
        instance_from(response)
    }

    pub(super) async fn fetch_instance_status(
        &self,
        name: &str,
    ) -> Result<InstanceStatus, ComputeError> {
        Ok(self
            .fetch_instance(name)
            .await?
            .map_or(InstanceStatus::Absent, |instance| {
                InstanceStatus::from_provider(&instance.status)
            }))
    }

    pub(super) async fn fetch_external_address(
        &self,
        name: &str,
    ) -> Result<Option<IpAddr>, ComputeError> {
        let Some(instance) = self.fetch_instance(name).await? else {
            return Ok(None);
        };
        external_address_of(name, &instance)
    }

    pub(super) async fn insert_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<(), ComputeError> {
        let body = InstanceBody::new(request, &self.settings.zone);
        let http = Self::client().post(self.zone_url("instances")).json(&body);
        self.send("create_instance", http)
            .await?
            .ensure_success("create_instance")?;
        Ok(())
    }

    pub(super) async fn remove_instance(&self, name: &str) -> Result<(), ComputeError> {
        let request = Self::client().delete(self.zone_url(&format!("instances/{name}")));
        self.send("delete_instance", request)
            .await?
            .ensure_success("delete_instance")?;
        Ok(())
    }

    pub(super) async fn instance_action(
        &self,
        name: &str,
        action: &str,
        operation: &'static str,
    ) -> Result<(), ComputeError> {
        let request = Self::client()
            .post(self.zone_url(&format!("instances/{name}/{action}")))
            .header(reqwest::header::CONTENT_LENGTH, "0");
        self.send(operation, request)
            .await?
            .ensure_success(operation)?;
        Ok(())
    }
}

pub(super) fn instance_from(
    response: ApiResponse,
) -> Result<Option<InstanceResource>, ComputeError> {
    if response.is_not_found() {
        return Ok(None);
    }
    response
        .ensure_success("instance_status")?
        .decode("instance_status")
        .map(Some)
}

pub(super) fn external_address_of(
    name: &str,
    instance: &InstanceResource,
) -> Result<Option<IpAddr>, ComputeError> {
    instance
        .nat_address()
        .map(|raw| {
            raw.parse().map_err(|_| ComputeError::InvalidAddress {
                instance: name.to_owned(),
                value: raw.to_owned(),
            })
        })
        .transpose()
}
