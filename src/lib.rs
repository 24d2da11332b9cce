//! Core library for the Stend lab provisioning tool.
//!
//! The crate drives a single-node virtual lab on Google Compute Engine: it
//! creates an optional custom boot image, the lab instance and its firewall
//! rules, then bootstraps the instance over SSH by uploading and running setup
//! scripts with reboots in between. Every cloud mutation goes through the
//! [`Gateway`] trait and every remote command goes through a
//! [`CommandRunner`], so the lifecycle can be exercised against fakes.

pub mod bootstrap;
pub mod compute;
pub mod config;
pub mod gateway;
pub mod lab;
mod local_fs;
pub mod orchestrator;
pub mod poll;
pub mod shell;
pub mod status;
pub mod test_support;

pub use bootstrap::{ALREADY_CONFIGURED_SENTINEL, BootstrapError, BootstrapOutcome, ScriptOutcome};
pub use compute::{ComputeError, ComputeGateway, ComputeSettings};
pub use config::{ConfigError, LabConfig};
pub use gateway::{Gateway, GatewayFuture, ImageStatus, InstanceStatus, RuleDeletion, RuleInsert};
pub use lab::{BootstrapScript, Direction, FirewallRule, ImageRequest, InstanceRequest, LabSpec};
pub use orchestrator::{LabError, LabFailure, LabOrchestrator, Operation, Timings};
pub use poll::{PollError, Poller};
pub use shell::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput, RemoteShell, Session,
    ShellConfig, ShellError,
};
pub use status::{FirewallStatus, ImageChange, InstanceChange, RuleChange, SettingsChange, Status};
pub use tokio_util::sync::CancellationToken;
