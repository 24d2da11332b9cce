//! Sequences the lab lifecycle against a [`Gateway`] and a remote shell.
//!
//! Each operation runs strictly in order on the calling task. Provider
//! mutations only return once accepted, so every terminal state is confirmed
//! by polling. The [`Status`] record is updated as soon as a stage finishes;
//! a failing run hands back what it completed alongside the error.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapOutcome, Bootstrapper, DEFAULT_SETTLE};
use crate::gateway::{Gateway, ImageStatus, InstanceStatus, RuleInsert};
use crate::lab::{Direction, LabSpec};
use crate::poll::Poller;
use crate::shell::{CommandRunner, RemoteShell};
use crate::status::{ImageChange, InstanceChange, RuleChange, SettingsChange, Status};

mod error;

pub use error::{LabError, LabFailure};

const DEFAULT_IMAGE_POLL: Duration = Duration::from_secs(10);
const DEFAULT_INSTANCE_POLL: Duration = Duration::from_secs(8);
const DEFAULT_ADDRESS_POLL: Duration = Duration::from_secs(5);

/// Lifecycle operation requested by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Build or reconcile the lab and bootstrap it.
    Create,
    /// Delete the instance and build it again.
    Reset,
    /// Stop the instance.
    Stop,
    /// Delete the instance, its firewall rules and the custom image.
    Teardown,
}

impl Operation {
    /// Lowercase name used on the command line and in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Reset => "reset",
            Self::Stop => "stop",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poll and settle intervals.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timings {
    /// Between image status checks.
    pub image_poll: Duration,
    /// Between instance status checks.
    pub instance_poll: Duration,
    /// Between external address checks.
    pub address_poll: Duration,
    /// After a reboot, before the next bootstrap script.
    pub settle: Duration,
}

impl Timings {
    /// Zero-length intervals, for tests.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            image_poll: Duration::ZERO,
            instance_poll: Duration::ZERO,
            address_poll: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            image_poll: DEFAULT_IMAGE_POLL,
            instance_poll: DEFAULT_INSTANCE_POLL,
            address_poll: DEFAULT_ADDRESS_POLL,
            settle: DEFAULT_SETTLE,
        }
    }
}

type LabResult<T, E> = Result<T, LabError<E>>;

/// Drives one lab through create, reset, stop and teardown.
#[derive(Debug)]
pub struct LabOrchestrator<G, R: CommandRunner> {
    gateway: G,
    shell: RemoteShell<R>,
    lab: LabSpec,
    timings: Timings,
    cancel: CancellationToken,
}

impl<G, R> LabOrchestrator<G, R>
where
    G: Gateway,
    R: CommandRunner,
{
    /// Creates an orchestrator with default timings and a fresh cancellation
    /// token.
    #[must_use]
    pub fn new(lab: LabSpec, gateway: G, shell: RemoteShell<R>) -> Self {
        Self {
            gateway,
            shell,
            lab,
            timings: Timings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the poll and settle intervals.
    #[must_use]
    pub const fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Uses `cancel` to abort waits and remote round trips.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The lab being driven.
    #[must_use]
    pub const fn lab(&self) -> &LabSpec {
        &self.lab
    }

    /// The gateway in use.
    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Runs `operation` and returns the resulting status record.
    ///
    /// # Errors
    ///
    /// Returns [`LabFailure`] carrying the status of the stages that
    /// completed and the [`LabError`] that stopped the run. Nothing is rolled
    /// back.
    pub async fn run(&self, operation: Operation) -> Result<Status, LabFailure<G::Error>> {
        info!(lab = %self.lab.name, %operation, "starting lab operation");
        let mut status = Status::default();
        let result = match operation {
            Operation::Create => self.create(&mut status).await,
            Operation::Reset => self.reset(&mut status).await,
            Operation::Stop => self.stop(&mut status).await,
            Operation::Teardown => self.teardown(&mut status).await,
        };
        match result {
            Ok(()) => {
                info!(lab = %self.lab.name, %operation, "lab operation complete");
                Ok(status)
            }
            Err(error) => Err(LabFailure { status, error }),
        }
    }

    async fn create(&self, status: &mut Status) -> LabResult<(), G::Error> {
        if self.lab.create_custom_image {
            status.image = self.ensure_image().await?;
        }

        let mut current = self.instance_status().await?;
        if current == InstanceStatus::Stopping {
            current = self
                .wait_for_instance("instance to finish stopping", |s| {
                    s != InstanceStatus::Stopping
                })
                .await?;
        }
        match current {
            InstanceStatus::Absent => {
                self.create_instance().await?;
                status.instance = InstanceChange::Created;
                current = InstanceStatus::Running;
            }
            InstanceStatus::Provisioning => {
                info!(instance = %self.lab.name, "instance is provisioning");
                current = self.wait_for_running().await?;
            }
            InstanceStatus::Running | InstanceStatus::Stopping | InstanceStatus::Terminated => {
                info!(instance = %self.lab.name, state = %current, "instance exists; skipping creation");
            }
        }

        self.ensure_firewall(status).await?;

        if current == InstanceStatus::Terminated {
            info!(instance = %self.lab.name, "starting stopped instance");
            self.gateway
                .start_instance(&self.lab.name)
                .await
                .map_err(|err| LabError::gateway("start_instance", &self.lab.name, err))?;
            self.wait_for_running().await?;
        }

        let address = self.wait_for_address().await?;
        let bootstrapper = Bootstrapper::new(
            &self.shell,
            &self.lab,
            self.timings.settle,
            self.cancel.clone(),
        );
        let outcome = bootstrapper.run(address).await?;
        status.settings = match outcome {
            BootstrapOutcome::Configured => SettingsChange::Configured,
            BootstrapOutcome::AlreadyConfigured => SettingsChange::NotModified,
        };
        Ok(())
    }

    async fn reset(&self, status: &mut Status) -> LabResult<(), G::Error> {
        if self.instance_status().await? == InstanceStatus::Absent {
            info!(instance = %self.lab.name, "no instance to reset; creating");
        } else {
            self.delete_instance().await?;
            status.instance = InstanceChange::Deleted;
            status.settings = SettingsChange::GoneWithInstance;
        }
        self.create(status).await
    }

    async fn stop(&self, status: &mut Status) -> LabResult<(), G::Error> {
        let name = &self.lab.name;
        match self.instance_status().await? {
            current @ (InstanceStatus::Absent | InstanceStatus::Terminated) => {
                return Err(LabError::Precondition {
                    instance: name.clone(),
                    status: current,
                });
            }
            InstanceStatus::Stopping => {
                info!(instance = %name, "instance already stopping");
            }
            InstanceStatus::Running | InstanceStatus::Provisioning => {
                info!(instance = %name, "stopping instance");
                self.gateway
                    .stop_instance(name)
                    .await
                    .map_err(|err| LabError::gateway("stop_instance", name, err))?;
            }
        }
        self.wait_for_instance("instance to stop", |s| s == InstanceStatus::Terminated)
            .await?;
        status.instance = InstanceChange::Stopped;
        Ok(())
    }

    async fn teardown(&self, status: &mut Status) -> LabResult<(), G::Error> {
        if self.instance_status().await? == InstanceStatus::Absent {
            info!(instance = %self.lab.name, "instance already absent");
        } else {
            self.delete_instance().await?;
            status.instance = InstanceChange::Deleted;
            status.settings = SettingsChange::GoneWithInstance;
        }

        let names = self.lab.firewall_rule_names();
        let deletions = self
            .gateway
            .delete_firewall_rules(&names)
            .await
            .map_err(|err| LabError::gateway("delete_firewall_rules", &names.join(","), err))?;
        for direction in Direction::ALL {
            let name = self.lab.firewall_rule_name(direction);
            let deleted = deletions
                .iter()
                .any(|deletion| deletion.name == name && deletion.deleted);
            let change = if deleted {
                RuleChange::Deleted
            } else {
                RuleChange::NotFound
            };
            info!(rule = %name, deleted, "firewall rule teardown");
            status.firewall.set(direction, change);
        }

        let image = &self.lab.custom_image_name;
        let image_status = self
            .gateway
            .image_status(image)
            .await
            .map_err(|err| LabError::gateway("image_status", image, err))?;
        status.image = if image_status == ImageStatus::Absent {
            info!(image = %image, "no custom image to delete");
            ImageChange::NotFound
        } else {
            self.gateway
                .delete_image(image)
                .await
                .map_err(|err| LabError::gateway("delete_image", image, err))?;
            info!(image = %image, "custom image deleted");
            ImageChange::Deleted
        };
        Ok(())
    }

    async fn ensure_image(&self) -> LabResult<ImageChange, G::Error> {
        let name = &self.lab.custom_image_name;
        let current = self
            .gateway
            .image_status(name)
            .await
            .map_err(|err| LabError::gateway("image_status", name, err))?;
        let change = match current {
            ImageStatus::Ready => {
                info!(image = %name, "custom image exists");
                return Ok(ImageChange::NotModified);
            }
            ImageStatus::Failed => {
                return Err(LabError::ImageFailed {
                    image: name.clone(),
                });
            }
            ImageStatus::Pending => {
                info!(image = %name, "custom image is still building");
                ImageChange::NotModified
            }
            ImageStatus::Absent => {
                info!(image = %name, "building custom image");
                self.gateway
                    .create_image(&self.lab.image_request())
                    .await
                    .map_err(|err| LabError::gateway("create_image", name, err))?;
                ImageChange::Created
            }
        };

        let poller = Poller::new(self.timings.image_poll, self.cancel.clone());
        let settled = poller
            .wait_until("custom image build", || async move {
                let image = self.gateway.image_status(name).await?;
                debug!(image = %name, state = ?image, "image status");
                Ok::<_, G::Error>(
                    matches!(image, ImageStatus::Ready | ImageStatus::Failed).then_some(image),
                )
            })
            .await
            .map_err(|err| LabError::from_poll(err, "image_status", name))?;
        if settled == ImageStatus::Failed {
            return Err(LabError::ImageFailed {
                image: name.clone(),
            });
        }
        info!(image = %name, "custom image ready");
        Ok(change)
    }

    async fn ensure_firewall(&self, status: &mut Status) -> LabResult<(), G::Error> {
        for direction in Direction::ALL {
            let rule = self.lab.firewall_rule(direction);
            let exists = self
                .gateway
                .firewall_rule_exists(&rule.name)
                .await
                .map_err(|err| LabError::gateway("firewall_rule_exists", &rule.name, err))?;
            let change = if exists {
                RuleChange::NotModified
            } else {
                match self
                    .gateway
                    .upsert_firewall_rule(&rule)
                    .await
                    .map_err(|err| LabError::gateway("upsert_firewall_rule", &rule.name, err))?
                {
                    RuleInsert::Created => RuleChange::Created,
                    RuleInsert::AlreadyExists => RuleChange::NotModified,
                }
            };
            info!(rule = %rule.name, ?change, "firewall rule reconciled");
            status.firewall.set(direction, change);
        }
        Ok(())
    }

    async fn instance_status(&self) -> LabResult<InstanceStatus, G::Error> {
        let status = self
            .gateway
            .instance_status(&self.lab.name)
            .await
            .map_err(|err| LabError::gateway("instance_status", &self.lab.name, err))?;
        debug!(instance = %self.lab.name, state = %status, "instance status");
        Ok(status)
    }

    async fn create_instance(&self) -> LabResult<(), G::Error> {
        info!(instance = %self.lab.name, image = %self.lab.boot_image(), "creating instance");
        self.gateway
            .create_instance(&self.lab.instance_request())
            .await
            .map_err(|err| LabError::gateway("create_instance", &self.lab.name, err))?;
        self.wait_for_running().await?;
        info!(instance = %self.lab.name, "instance running");
        Ok(())
    }

    async fn delete_instance(&self) -> LabResult<(), G::Error> {
        info!(instance = %self.lab.name, "deleting instance");
        self.gateway
            .delete_instance(&self.lab.name)
            .await
            .map_err(|err| LabError::gateway("delete_instance", &self.lab.name, err))?;
        self.wait_for_instance("instance deletion", |s| s == InstanceStatus::Absent)
            .await?;
        info!(instance = %self.lab.name, "instance deleted");
        Ok(())
    }

    async fn wait_for_running(&self) -> LabResult<InstanceStatus, G::Error> {
        self.wait_for_instance("instance to run", |s| s == InstanceStatus::Running)
            .await
    }

    /// Polls the instance until `done` accepts its state and returns that
    /// state.
    async fn wait_for_instance<F>(&self, what: &str, done: F) -> LabResult<InstanceStatus, G::Error>
    where
        F: Fn(InstanceStatus) -> bool,
    {
        let name = &self.lab.name;
        let accept = &done;
        Poller::new(self.timings.instance_poll, self.cancel.clone())
            .wait_until(what, || async move {
                let status = self.gateway.instance_status(name).await?;
                debug!(instance = %name, state = %status, "instance status");
                Ok::<_, G::Error>(accept(status).then_some(status))
            })
            .await
            .map_err(|err| LabError::from_poll(err, "instance_status", name))
    }

    async fn wait_for_address(&self) -> LabResult<IpAddr, G::Error> {
        let name = &self.lab.name;
        let address = Poller::new(self.timings.address_poll, self.cancel.clone())
            .wait_until("external address", || async move {
                self.gateway.external_address(name).await
            })
            .await
            .map_err(|err| LabError::from_poll(err, "external_address", name))?;
        info!(instance = %name, %address, "external address assigned");
        Ok(address)
    }
}

#[cfg(test)]
mod tests;
