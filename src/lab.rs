//! Lab definition and the provider requests derived from it.
//!
//! A [`LabSpec`] is built once from configuration and never mutated. Every
//! resource the orchestrator touches (boot image, instance, firewall rules,
//! remote script paths) is derived from it alone, so two runs against
//! the same lab name always address the same resources.

use std::fmt;
use std::slice;

use camino::Utf8PathBuf;

/// Scripts uploaded and executed during bootstrap when none are configured.
pub const DEFAULT_SCRIPTS: [&str; 2] = ["install.sh", "lab-initial-setup.sh"];

/// Licence enabling nested virtualisation on images built by the tool.
pub const NESTED_VIRTUALISATION_LICENSE: &str =
    "https://compute.googleapis.com/compute/v1/projects/vm-options/global/licenses/enable-vmx";

/// Network tags applied to every lab instance in addition to the lab name.
pub const BASE_NETWORK_TAGS: [&str; 2] = ["http-server", "https-server"];

const FIREWALL_PRIORITY: u32 = 1000;
const FIREWALL_PROTOCOL: &str = "tcp";
const FIREWALL_PORTS: &str = "0-65535";
const ANY_ADDRESS: &str = "0.0.0.0/0";

/// Traffic direction governed by a firewall rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Direction {
    /// Traffic entering the lab instance.
    Ingress,
    /// Traffic leaving the lab instance.
    Egress,
}

impl Direction {
    /// Both directions in the order the orchestrator applies them.
    pub const ALL: [Self; 2] = [Self::Ingress, Self::Egress];

    /// Lower-case label used in rule names and status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }

    /// Upper-case value expected by the Compute API.
    #[must_use]
    pub const fn provider_value(self) -> &'static str {
        match self {
            Self::Ingress => "INGRESS",
            Self::Egress => "EGRESS",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of bootstrap script file names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapScript {
    names: Vec<String>,
}

impl BootstrapScript {
    /// Builds a script list, dropping blank entries and surrounding whitespace.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    /// Parses a comma separated list such as `install.sh,setup.sh`.
    #[must_use]
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Iterates over the script names in execution order.
    pub fn iter(&self) -> slice::Iter<'_, String> {
        self.names.iter()
    }

    /// Number of scripts in the list.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` when no scripts are configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for BootstrapScript {
    fn default() -> Self {
        Self::new(DEFAULT_SCRIPTS)
    }
}

impl<'a> IntoIterator for &'a BootstrapScript {
    type Item = &'a String;
    type IntoIter = slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Immutable description of one lab.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabSpec {
    /// Cloud project that owns every lab resource.
    pub project_id: String,
    /// Lab name. Doubles as the instance name and the firewall target tag.
    pub name: String,
    /// Zone hosting the instance (for example `us-central1-a`).
    pub zone: String,
    /// Machine type for the instance (for example `c2-standard-4`).
    pub machine_type: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Whether the run should build the custom boot image.
    pub create_custom_image: bool,
    /// Name of the custom boot image.
    pub custom_image_name: String,
    /// Image the custom image (or, without one, the boot disk) is built from.
    pub source_image: String,
    /// Network the instance and firewall rules attach to.
    pub network: String,
    /// Minimum CPU platform requested for the instance.
    pub min_cpu_platform: String,
    /// Remote login user; owns the upload directory.
    pub ssh_user: String,
    /// Public key material published through instance metadata.
    pub ssh_public_key: String,
    /// Local directory holding the bootstrap scripts.
    pub script_dir: Utf8PathBuf,
    /// Bootstrap scripts in execution order.
    pub scripts: BootstrapScript,
}

impl LabSpec {
    /// Deterministic firewall rule name for `direction`.
    #[must_use]
    pub fn firewall_rule_name(&self, direction: Direction) -> String {
        format!("{direction}-{}", self.name)
    }

    /// Names of both firewall rules, ingress first.
    #[must_use]
    pub fn firewall_rule_names(&self) -> Vec<String> {
        Direction::ALL
            .iter()
            .map(|direction| self.firewall_rule_name(*direction))
            .collect()
    }

    /// Firewall rule opening every TCP port in `direction`.
    #[must_use]
    pub fn firewall_rule(&self, direction: Direction) -> FirewallRule {
        FirewallRule {
            name: self.firewall_rule_name(direction),
            direction,
            network: self.network.clone(),
            priority: FIREWALL_PRIORITY,
            protocol: FIREWALL_PROTOCOL.to_owned(),
            ports: vec![FIREWALL_PORTS.to_owned()],
            ranges: vec![ANY_ADDRESS.to_owned()],
            target_tag: self.name.clone(),
        }
    }

    /// Name of the boot disk created alongside the instance.
    #[must_use]
    pub fn boot_disk_name(&self) -> String {
        format!("{}-root", self.name)
    }

    /// Image reference the boot disk is initialised from.
    ///
    /// Points at the project's custom image when one is requested and falls
    /// back to the source image otherwise.
    #[must_use]
    pub fn boot_image(&self) -> String {
        if self.create_custom_image {
            format!(
                "projects/{}/global/images/{}",
                self.project_id, self.custom_image_name
            )
        } else {
            self.source_image.clone()
        }
    }

    /// Request body for the lab instance.
    #[must_use]
    pub fn instance_request(&self) -> InstanceRequest {
        let mut tags: Vec<String> = BASE_NETWORK_TAGS
            .iter()
            .map(|tag| (*tag).to_owned())
            .collect();
        tags.push(self.name.clone());
        InstanceRequest {
            name: self.name.clone(),
            description: format!("Stend lab {}", self.name),
            machine_type: self.machine_type.clone(),
            min_cpu_platform: self.min_cpu_platform.clone(),
            boot_disk_name: self.boot_disk_name(),
            boot_image: self.boot_image(),
            disk_size_gb: self.disk_size_gb,
            network: self.network.clone(),
            tags,
            ssh_keys: format!("{}:{}", self.ssh_user, self.ssh_public_key.trim()),
        }
    }

    /// Request body for the custom boot image.
    #[must_use]
    pub fn image_request(&self) -> ImageRequest {
        ImageRequest {
            name: self.custom_image_name.clone(),
            source_image: self.source_image.clone(),
            disk_size_gb: self.disk_size_gb,
            licenses: vec![NESTED_VIRTUALISATION_LICENSE.to_owned()],
        }
    }

    /// Home directory of the remote user; uploads land here.
    #[must_use]
    pub fn remote_home(&self) -> String {
        format!("/home/{}", self.ssh_user)
    }

    /// Remote path a script is uploaded to.
    #[must_use]
    pub fn remote_script_path(&self, script: &str) -> String {
        format!("{}/{script}", self.remote_home())
    }

    /// Local path of a bootstrap script.
    #[must_use]
    pub fn local_script_path(&self, script: &str) -> Utf8PathBuf {
        self.script_dir.join(script)
    }
}

/// Firewall rule derived from a lab.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirewallRule {
    /// Rule name, `<direction>-<lab>`.
    pub name: String,
    /// Direction of the governed traffic.
    pub direction: Direction,
    /// Network the rule applies to.
    pub network: String,
    /// Rule priority; lower wins.
    pub priority: u32,
    /// Allowed IP protocol.
    pub protocol: String,
    /// Allowed port ranges.
    pub ports: Vec<String>,
    /// Source ranges for ingress rules, destination ranges for egress rules.
    pub ranges: Vec<String>,
    /// Instances carrying this tag are governed by the rule.
    pub target_tag: String,
}

/// Parameters for creating the lab instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Instance name.
    pub name: String,
    /// Free-form description stored with the instance.
    pub description: String,
    /// Machine type, without the zone prefix.
    pub machine_type: String,
    /// Minimum CPU platform.
    pub min_cpu_platform: String,
    /// Name of the boot disk.
    pub boot_disk_name: String,
    /// Image the boot disk is initialised from.
    pub boot_image: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Network for the primary interface.
    pub network: String,
    /// Network tags.
    pub tags: Vec<String>,
    /// `ssh-keys` metadata value, `<user>:<public key>`.
    pub ssh_keys: String,
}

/// Parameters for creating the custom boot image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRequest {
    /// Image name.
    pub name: String,
    /// Source image reference.
    pub source_image: String,
    /// Disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Licence URLs attached to the image.
    pub licenses: Vec<String>,
}
