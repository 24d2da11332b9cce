//! Command-line interface definitions for the `stend` binary.
//!
//! The parser lives here on its own so the build script can render the
//! manual page from the same definitions.

use clap::Parser;

/// Top-level CLI for the `stend` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stend",
    version,
    about = "Provision and bootstrap a single-node lab on Google Compute Engine",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Build the lab, or reconcile an existing one, and bootstrap it.
    #[command(name = "create", about = "Create or reconcile the lab and bootstrap it")]
    Create(LabArgs),
    /// Delete the instance and build it again.
    #[command(name = "reset", about = "Delete the lab instance and create it again")]
    Reset(LabArgs),
    /// Stop the instance, keeping its disk.
    #[command(name = "stop", about = "Stop the lab instance")]
    Stop(LabArgs),
    /// Remove the instance, firewall rules and custom image.
    #[command(
        name = "teardown",
        about = "Delete the lab instance, its firewall rules and the custom image"
    )]
    Teardown(LabArgs),
}

/// Arguments shared by every subcommand.
#[derive(Debug, Parser)]
pub(crate) struct LabArgs {
    /// Name of the lab instance.
    ///
    /// Falls back to `instance_name` from the configuration (or
    /// `STEND_INSTANCE_NAME`) when omitted.
    #[arg(long, value_name = "NAME")]
    pub(crate) instance_name: Option<String>,
    /// Read settings from this TOML or YAML file instead of the discovered
    /// `stend.toml`.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<String>,
    /// Boot from the custom image, building it first when missing.
    #[arg(long)]
    pub(crate) create_custom_image: bool,
}
