//! Cloud resource gateway abstraction.
//!
//! The orchestrator never talks to a provider directly. It drives a
//! [`Gateway`], whose mutating calls return once the provider has accepted the
//! request; terminal states are confirmed by polling the status queries.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use crate::lab::{FirewallRule, ImageRequest, InstanceRequest};

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Lifecycle state of the lab instance as seen by the provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum InstanceStatus {
    /// No instance with the requested name exists.
    Absent,
    /// The provider is allocating or booting the instance.
    Provisioning,
    /// The instance is up.
    Running,
    /// The instance is shutting down or suspending.
    Stopping,
    /// The instance is stopped and can be started again.
    Terminated,
}

impl InstanceStatus {
    /// Maps a provider status string onto the lifecycle model.
    ///
    /// Unknown values are treated as transitional so callers keep polling.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "STOPPING" | "SUSPENDING" => Self::Stopping,
            "TERMINATED" | "STOPPED" | "SUSPENDED" => Self::Terminated,
            _ => Self::Provisioning,
        }
    }

    /// Lower-case label for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the custom boot image.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ImageStatus {
    /// No image with the requested name exists.
    Absent,
    /// The provider is still building (or deleting) the image.
    Pending,
    /// The image can back new disks.
    Ready,
    /// The build failed; the image is unusable.
    Failed,
}

impl ImageStatus {
    /// Maps a provider status string onto the image model.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "READY" => Self::Ready,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "absent",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Result of inserting a firewall rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuleInsert {
    /// The provider created the rule.
    Created,
    /// A rule with the same name already existed.
    AlreadyExists,
}

/// Per-rule result of a bulk firewall deletion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleDeletion {
    /// Rule name.
    pub name: String,
    /// `false` when the rule did not exist.
    pub deleted: bool,
}

/// Operations the orchestrator needs from a cloud provider.
///
/// Implementations are bound to a single project and zone at construction.
pub trait Gateway {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reports the state of the named image.
    fn image_status<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, ImageStatus, Self::Error>;

    /// Returns `true` when the named image exists and is ready.
    fn image_exists<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, bool, Self::Error>
    where
        Self: Sync,
    {
        Box::pin(async move { Ok(self.image_status(name).await? == ImageStatus::Ready) })
    }

    /// Starts building an image.
    fn create_image<'a>(&'a self, request: &'a ImageRequest) -> GatewayFuture<'a, (), Self::Error>;

    /// Deletes the named image.
    fn delete_image<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Requests a new instance.
    fn create_instance<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Reports the state of the named instance.
    fn instance_status<'a>(&'a self, name: &'a str)
    -> GatewayFuture<'a, InstanceStatus, Self::Error>;

    /// Requests deletion of the named instance.
    fn delete_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Requests a stop of the named instance.
    fn stop_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Requests a start of the named instance.
    fn start_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Public address of the named instance, if one has been assigned.
    fn external_address<'a>(
        &'a self,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<IpAddr>, Self::Error>;

    /// Inserts a firewall rule, tolerating an existing rule of the same name.
    fn upsert_firewall_rule<'a>(
        &'a self,
        rule: &'a FirewallRule,
    ) -> GatewayFuture<'a, RuleInsert, Self::Error>;

    /// Returns `true` when the named firewall rule exists.
    fn firewall_rule_exists<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, bool, Self::Error>;

    /// Deletes each named rule. Missing rules are reported, not raised.
    fn delete_firewall_rules<'a>(
        &'a self,
        names: &'a [String],
    ) -> GatewayFuture<'a, Vec<RuleDeletion>, Self::Error>;
}
