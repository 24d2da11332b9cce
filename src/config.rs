//! Configuration loading via `ortho-config`.
//!
//! [`LabConfig`] merges defaults, `stend.toml` (found through the usual
//! discovery rules or `STEND_CONFIG_PATH`) and `STEND_*` environment
//! variables. A file named explicitly on the command line is read instead of
//! the discovered one; it may be TOML or YAML.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use ortho_config::toml;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::compute::{COMPUTE_API_BASE, ComputeSettings};
use crate::lab::{BootstrapScript, DEFAULT_SCRIPTS, LabSpec};
use crate::local_fs;
use crate::orchestrator::Timings;
use crate::shell::{ShellConfig, expand_home};

const APP_NAME: &str = "stend";
const ACCESS_TOKEN_ENV: &str = "STEND_ACCESS_TOKEN";
const CONFIG_PATH_FLAG: &str = "--config-path";
const MAX_LAB_NAME_LEN: usize = 55;

const DEFAULT_DISK_SIZE_GB: u32 = 10;
const DEFAULT_SSH_BIN: &str = "ssh";
const DEFAULT_SCP_BIN: &str = "scp";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_KNOWN_HOSTS_FILE: &str = "/dev/null";
const DEFAULT_SCRIPT_DIR: &str = ".";
const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_CONNECT_BACKOFF_SECS: u32 = 20;
const DEFAULT_SETTLE_SECS: u32 = 60;
const DEFAULT_IMAGE_POLL_SECS: u32 = 10;
const DEFAULT_INSTANCE_POLL_SECS: u32 = 8;
const DEFAULT_ADDRESS_POLL_SECS: u32 = 5;

/// Default zone.
pub const DEFAULT_ZONE: &str = "us-central1-a";
/// Default machine type.
pub const DEFAULT_MACHINE_TYPE: &str = "c2-standard-4";
/// Default custom image name.
pub const DEFAULT_IMAGE_NAME: &str = "lab-image";
/// Default image the lab is built from.
pub const DEFAULT_SOURCE_IMAGE: &str =
    "projects/ubuntu-os-cloud/global/images/family/ubuntu-2204-lts";
/// Default network.
pub const DEFAULT_NETWORK: &str = "global/networks/default";
/// Default minimum CPU platform; nested virtualisation needs Cascade Lake.
pub const DEFAULT_MIN_CPU_PLATFORM: &str = "Intel Cascade Lake";
/// Default public key path.
pub const DEFAULT_PUBLIC_KEY_FILE: &str = "~/.ssh/id_ed25519.pub";

/// Lab settings loaded from defaults, files and `STEND_*` variables.
#[derive(Clone, Debug, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STEND",
    discovery(
        app_name = "stend",
        env_var = "STEND_CONFIG_PATH",
        config_file_name = "stend.toml",
        dotfile_name = ".stend.toml",
        project_file_name = "stend.toml"
    )
)]
pub struct LabConfig {
    /// OAuth access token for the Compute API (for example the output of
    /// `gcloud auth print-access-token`).
    #[ortho_config(default = String::new())]
    pub access_token: String,
    /// Project that owns the lab.
    #[ortho_config(default = String::new())]
    pub project_id: String,
    /// Lab name used when the command line does not supply one.
    pub instance_name: Option<String>,
    /// Zone hosting the instance.
    #[ortho_config(default = DEFAULT_ZONE.to_owned())]
    pub zone: String,
    /// Machine type for the instance.
    #[ortho_config(default = DEFAULT_MACHINE_TYPE.to_owned())]
    pub machine_type: String,
    /// Boot disk size in gigabytes.
    #[ortho_config(default = DEFAULT_DISK_SIZE_GB)]
    pub disk_size_gb: u32,
    /// Name of the custom boot image.
    #[ortho_config(default = DEFAULT_IMAGE_NAME.to_owned())]
    pub custom_image_name: String,
    /// Image the lab is built from.
    #[ortho_config(default = DEFAULT_SOURCE_IMAGE.to_owned())]
    pub source_image: String,
    /// Network for the instance and firewall rules.
    #[ortho_config(default = DEFAULT_NETWORK.to_owned())]
    pub network: String,
    /// Minimum CPU platform.
    #[ortho_config(default = DEFAULT_MIN_CPU_PLATFORM.to_owned())]
    pub min_cpu_platform: String,
    /// Remote login user. Required.
    #[ortho_config(default = String::new())]
    pub ssh_user: String,
    /// Public key published to the instance; `~/` is expanded.
    #[ortho_config(default = DEFAULT_PUBLIC_KEY_FILE.to_owned())]
    pub ssh_public_key_file: String,
    /// Private key used by `ssh` and `scp`; client defaults apply when unset.
    pub ssh_identity_file: Option<String>,
    /// Path to the `ssh` executable.
    #[ortho_config(default = DEFAULT_SSH_BIN.to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = DEFAULT_SCP_BIN.to_owned())]
    pub scp_bin: String,
    /// SSH port on the instance.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Forces batch mode so password prompts fail fast.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Enforces host key checking; off by default for freshly built labs.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file; `/dev/null` by default.
    #[ortho_config(default = DEFAULT_KNOWN_HOSTS_FILE.to_owned())]
    pub ssh_known_hosts_file: String,
    /// Directory holding the bootstrap scripts.
    #[ortho_config(default = DEFAULT_SCRIPT_DIR.to_owned())]
    pub script_dir: String,
    /// Comma separated bootstrap scripts, run in order.
    #[ortho_config(default = DEFAULT_SCRIPTS.join(","))]
    pub scripts: String,
    /// SSH connection attempts per script.
    #[ortho_config(default = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,
    /// Seconds between SSH connection attempts.
    #[ortho_config(default = DEFAULT_CONNECT_BACKOFF_SECS)]
    pub connect_backoff_secs: u32,
    /// Seconds to wait after a reboot before the next script.
    #[ortho_config(default = DEFAULT_SETTLE_SECS)]
    pub settle_secs: u32,
    /// Seconds between image status checks.
    #[ortho_config(default = DEFAULT_IMAGE_POLL_SECS)]
    pub image_poll_secs: u32,
    /// Seconds between instance status checks.
    #[ortho_config(default = DEFAULT_INSTANCE_POLL_SECS)]
    pub instance_poll_secs: u32,
    /// Seconds between external address checks.
    #[ortho_config(default = DEFAULT_ADDRESS_POLL_SECS)]
    pub address_poll_secs: u32,
    /// Compute API root.
    #[ortho_config(default = COMPUTE_API_BASE.to_owned())]
    pub api_base: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl LabConfig {
    /// Every setting at its default; required values are empty. Uses the
    /// same constants as the loader attributes.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            access_token: String::new(),
            project_id: String::new(),
            instance_name: None,
            zone: DEFAULT_ZONE.to_owned(),
            machine_type: DEFAULT_MACHINE_TYPE.to_owned(),
            disk_size_gb: DEFAULT_DISK_SIZE_GB,
            custom_image_name: DEFAULT_IMAGE_NAME.to_owned(),
            source_image: DEFAULT_SOURCE_IMAGE.to_owned(),
            network: DEFAULT_NETWORK.to_owned(),
            min_cpu_platform: DEFAULT_MIN_CPU_PLATFORM.to_owned(),
            ssh_user: String::new(),
            ssh_public_key_file: DEFAULT_PUBLIC_KEY_FILE.to_owned(),
            ssh_identity_file: None,
            ssh_bin: DEFAULT_SSH_BIN.to_owned(),
            scp_bin: DEFAULT_SCP_BIN.to_owned(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: DEFAULT_KNOWN_HOSTS_FILE.to_owned(),
            script_dir: DEFAULT_SCRIPT_DIR.to_owned(),
            scripts: DEFAULT_SCRIPTS.join(","),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff_secs: DEFAULT_CONNECT_BACKOFF_SECS,
            settle_secs: DEFAULT_SETTLE_SECS,
            image_poll_secs: DEFAULT_IMAGE_POLL_SECS,
            instance_poll_secs: DEFAULT_INSTANCE_POLL_SECS,
            address_poll_secs: DEFAULT_ADDRESS_POLL_SECS,
            api_base: COMPUTE_API_BASE.to_owned(),
        }
    }

    /// Loads configuration from discovered files and the environment without
    /// parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration with `path` in place of the discovered file.
    /// Defaults sit below the file and `STEND_*` variables above it.
    ///
    /// Files ending in `.yaml` or `.yml` are read as YAML, anything else as
    /// TOML. Keys the configuration does not define are rejected before the
    /// layers are merged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it is malformed, names unknown keys, or
    /// the merge fails.
    pub fn load_from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = local_fs::read_to_string(path).map_err(|err| ConfigError::FileRead {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        check_keys(path, &parse_document(path, &raw)?)?;
        let config = Self::load_from_iter([
            OsString::from(APP_NAME),
            OsString::from(CONFIG_PATH_FLAG),
            OsString::from(path.as_str()),
        ])
        .map_err(|err| ConfigError::Parse(format!("{path}: {err}")))?;
        debug!(path = %path, "loaded configuration file");
        Ok(config)
    }

    /// Loads from `path` when given, otherwise through discovery.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Self::load_from_path`] and
    /// [`Self::load_without_cli_args`].
    pub fn resolve(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        path.map_or_else(Self::load_without_cli_args, Self::load_from_path)
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to stend.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_positive(value: u32, field: &'static str) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{field} must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Checks required values and numeric ranges. Messages name the
    /// environment variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] or [`ConfigError::InvalidValue`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.access_token,
                FieldMetadata::new("Compute API access token", ACCESS_TOKEN_ENV, "access_token"),
            ),
            (
                &self.project_id,
                FieldMetadata::new("project ID", "STEND_PROJECT_ID", "project_id"),
            ),
            (
                &self.ssh_user,
                FieldMetadata::new("SSH user", "STEND_SSH_USER", "ssh_user"),
            ),
            (
                &self.ssh_public_key_file,
                FieldMetadata::new(
                    "SSH public key file",
                    "STEND_SSH_PUBLIC_KEY_FILE",
                    "ssh_public_key_file",
                ),
            ),
            (
                &self.zone,
                FieldMetadata::new("zone", "STEND_ZONE", "zone"),
            ),
            (
                &self.machine_type,
                FieldMetadata::new("machine type", "STEND_MACHINE_TYPE", "machine_type"),
            ),
            (
                &self.custom_image_name,
                FieldMetadata::new(
                    "custom image name",
                    "STEND_CUSTOM_IMAGE_NAME",
                    "custom_image_name",
                ),
            ),
            (
                &self.source_image,
                FieldMetadata::new("source image", "STEND_SOURCE_IMAGE", "source_image"),
            ),
            (
                &self.network,
                FieldMetadata::new("network", "STEND_NETWORK", "network"),
            ),
            (
                &self.scripts,
                FieldMetadata::new("bootstrap scripts", "STEND_SCRIPTS", "scripts"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        if BootstrapScript::from_list(&self.scripts).is_empty() {
            return Err(ConfigError::InvalidValue(String::from(
                "scripts must name at least one bootstrap script",
            )));
        }
        Self::require_positive(self.disk_size_gb, "disk_size_gb")?;
        Self::require_positive(self.connect_attempts, "connect_attempts")?;
        if self.ssh_port == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "ssh_port must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Builds the lab description for `instance_name`, falling back to the
    /// configured name. Reads the public key file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails, no usable lab name is
    /// available, or the key file cannot be read.
    pub fn lab_spec(
        &self,
        instance_name: Option<&str>,
        create_custom_image: bool,
    ) -> Result<LabSpec, ConfigError> {
        self.validate()?;
        let name = instance_name
            .or_else(|| self.instance_name.as_deref())
            .map(str::trim)
            .unwrap_or_default();
        Self::require_field(
            name,
            &FieldMetadata::new("lab name", "STEND_INSTANCE_NAME", "instance_name"),
        )?;
        validate_lab_name(name)?;

        let key_path = expand_home(&self.ssh_public_key_file);
        let ssh_public_key = local_fs::read_to_string(Utf8Path::new(&key_path))
            .map_err(|err| ConfigError::FileRead {
                path: key_path.clone(),
                message: err.to_string(),
            })?
            .trim()
            .to_owned();
        if ssh_public_key.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "SSH public key file {key_path} is empty"
            )));
        }

        Ok(LabSpec {
            project_id: self.project_id.trim().to_owned(),
            name: name.to_owned(),
            zone: self.zone.trim().to_owned(),
            machine_type: self.machine_type.trim().to_owned(),
            disk_size_gb: self.disk_size_gb,
            create_custom_image,
            custom_image_name: self.custom_image_name.trim().to_owned(),
            source_image: self.source_image.trim().to_owned(),
            network: self.network.trim().to_owned(),
            min_cpu_platform: self.min_cpu_platform.trim().to_owned(),
            ssh_user: self.ssh_user.trim().to_owned(),
            ssh_public_key,
            script_dir: expand_home(&self.script_dir).into(),
            scripts: BootstrapScript::from_list(&self.scripts),
        })
    }

    /// SSH client settings.
    #[must_use]
    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            ssh_bin: self.ssh_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            ssh_user: self.ssh_user.trim().to_owned(),
            ssh_port: self.ssh_port,
            identity_file: self.ssh_identity_file.clone(),
            batch_mode: self.ssh_batch_mode,
            strict_host_key_checking: self.ssh_strict_host_key_checking,
            known_hosts_file: self.ssh_known_hosts_file.clone(),
            connect_attempts: self.connect_attempts,
            connect_backoff: secs(self.connect_backoff_secs),
        }
    }

    /// Compute API settings.
    #[must_use]
    pub fn compute_settings(&self) -> ComputeSettings {
        ComputeSettings {
            access_token: self.access_token.trim().to_owned(),
            project_id: self.project_id.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            api_base: self.api_base.trim().to_owned(),
        }
    }

    /// Poll and settle intervals.
    #[must_use]
    pub fn timings(&self) -> Timings {
        Timings {
            image_poll: secs(self.image_poll_secs),
            instance_poll: secs(self.instance_poll_secs),
            address_poll: secs(self.address_poll_secs),
            settle: secs(self.settle_secs),
        }
    }
}

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}

/// Rejects keys that name no setting.
fn check_keys(path: &Utf8Path, document: &Value) -> Result<(), ConfigError> {
    let parse = |message: String| ConfigError::Parse(format!("{path}: {message}"));
    let Value::Object(settings) = document else {
        return Err(parse(String::from("expected a table of settings")));
    };
    let known = serde_json::to_value(LabConfig::with_defaults())
        .map_err(|err| parse(err.to_string()))?;
    let Value::Object(fields) = known else {
        return Err(parse(String::from("settings did not serialise to a table")));
    };
    match settings.keys().find(|key| !fields.contains_key(*key)) {
        Some(key) => Err(parse(format!("unknown setting `{key}`"))),
        None => Ok(()),
    }
}

fn parse_document(path: &Utf8Path, raw: &str) -> Result<Value, ConfigError> {
    let parse = |message: String| ConfigError::Parse(format!("{path}: {message}"));
    match path.extension() {
        Some("yaml" | "yml") => serde_yaml::from_str(raw).map_err(|err| parse(err.to_string())),
        _ => toml::from_str(raw).map_err(|err| parse(err.to_string())),
    }
}

/// Lab names become instance names, disk names and firewall rule suffixes,
/// so they follow the provider's resource naming rules with room for the
/// `ingress-` prefix.
fn validate_lab_name(name: &str) -> Result<(), ConfigError> {
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let body_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let ends_ok = !name.ends_with('-');
    if starts_with_letter && body_ok && ends_ok && name.len() <= MAX_LAB_NAME_LEN {
        return Ok(());
    }
    Err(ConfigError::InvalidValue(format!(
        "lab name `{name}` must start with a lowercase letter, contain only lowercase \
         letters, digits and hyphens, not end with a hyphen, and be at most \
         {MAX_LAB_NAME_LEN} characters"
    )))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required setting is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A setting is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// A configuration or key file could not be read.
    #[error("failed to read {path}: {message}")]
    FileRead {
        /// File path.
        path: String,
        /// Operating system error text.
        message: String,
    },
    /// The loader could not merge or parse sources.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
