//! Custom image calls.

use crate::gateway::ImageStatus;
use crate::lab::ImageRequest;

use super::types::{ImageBody, ImageResource};
use super::{ApiResponse, ComputeError, ComputeGateway};

impl ComputeGateway {
    pub(super) async fn fetch_image_status(&self, name: &str) -> Result<ImageStatus, ComputeError> {
        let request = Self::client().get(self.project_url(&format!("global/images/{name}")));
        let response = self.send("image_status", request).await?;
        image_status_from(response)
    }

    pub(super) async fn insert_image(&self, request: &ImageRequest) -> Result<(), ComputeError> {
        let body = ImageBody::from(request);
        let http = Self::client()
            .post(self.project_url("global/images"))
            .json(&body);
        self.send("create_image", http)
            .await?
            .ensure_success("create_image")?;
        Ok(())
    }

    pub(super) async fn remove_image(&self, name: &str) -> Result<(), ComputeError> {
        let request = Self::client().delete(self.project_url(&format!("global/images/{name}")));
        let response = self.send("delete_image", request).await?;
        if response.is_not_found() {
            return Ok(());
        }
        response.ensure_success("delete_image")?;
        Ok(())
    }
}

pub(super) fn image_status_from(response: ApiResponse) -> Result<ImageStatus, ComputeError> {
    if response.is_not_found() {
        return Ok(ImageStatus::Absent);
    }
    let resource: ImageResource = response
        .ensure_success("image_status")?
        .decode("image_status")?;
    Ok(ImageStatus::from_provider(&resource.status))
}
