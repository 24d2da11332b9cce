//! Wire bodies for the Compute Engine REST API.

use serde::{Deserialize, Serialize};

use crate::lab::{Direction, FirewallRule, ImageRequest, InstanceRequest};

const DISK_TYPE: &str = "pd-ssd";
const NAT_NAME: &str = "External NAT";
const NAT_TYPE: &str = "ONE_TO_ONE_NAT";
const SERVICE_ACCOUNT: &str = "default";
const SERVICE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/devstorage.full_control",
    "https://www.googleapis.com/auth/compute",
];

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceBody {
    pub(super) name: String,
    pub(super) description: String,
    pub(super) machine_type: String,
    pub(super) min_cpu_platform: String,
    pub(super) can_ip_forward: bool,
    pub(super) tags: Tags,
    pub(super) disks: Vec<AttachedDisk>,
    pub(super) network_interfaces: Vec<NetworkInterface>,
    pub(super) service_accounts: Vec<ServiceAccount>,
    pub(super) metadata: Metadata,
}

impl InstanceBody {
    pub(super) fn new(request: &InstanceRequest, zone: &str) -> Self {
        Self {
            name: request.name.clone(),
            description: request.description.clone(),
            machine_type: format!("zones/{zone}/machineTypes/{}", request.machine_type),
            min_cpu_platform: request.min_cpu_platform.clone(),
            can_ip_forward: true,
            tags: Tags {
                items: request.tags.clone(),
            },
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                kind: String::from("PERSISTENT"),
                mode: String::from("READ_WRITE"),
                initialize_params: InitializeParams {
                    disk_name: request.boot_disk_name.clone(),
                    disk_size_gb: request.disk_size_gb.to_string(),
                    disk_type: format!("zones/{zone}/diskTypes/{DISK_TYPE}"),
                    source_image: request.boot_image.clone(),
                },
            }],
            network_interfaces: vec![NetworkInterface {
                network: request.network.clone(),
                access_configs: vec![AccessConfig {
                    name: NAT_NAME.to_owned(),
                    kind: NAT_TYPE.to_owned(),
                }],
            }],
            service_accounts: vec![ServiceAccount {
                email: SERVICE_ACCOUNT.to_owned(),
                scopes: SERVICE_SCOPES.iter().map(|scope| (*scope).to_owned()).collect(),
            }],
            metadata: Metadata {
                items: vec![MetadataItem {
                    key: String::from("ssh-keys"),
                    value: request.ssh_keys.clone(),
                }],
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(super) struct Tags {
    pub(super) items: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct AttachedDisk {
    pub(super) boot: bool,
    pub(super) auto_delete: bool,
    #[serde(rename = "type")]
    pub(super) kind: String,
    pub(super) mode: String,
    pub(super) initialize_params: InitializeParams,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct InitializeParams {
    pub(super) disk_name: String,
    // int64 fields travel as strings
    pub(super) disk_size_gb: String,
    pub(super) disk_type: String,
    pub(super) source_image: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct NetworkInterface {
    pub(super) network: String,
    pub(super) access_configs: Vec<AccessConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(super) struct AccessConfig {
    pub(super) name: String,
    #[serde(rename = "type")]
    pub(super) kind: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(super) struct ServiceAccount {
    pub(super) email: String,
    pub(super) scopes: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(super) struct Metadata {
    pub(super) items: Vec<MetadataItem>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(super) struct MetadataItem {
    pub(super) key: String,
    pub(super) value: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct ImageBody {
    pub(super) name: String,
    pub(super) source_image: String,
    pub(super) disk_size_gb: String,
    pub(super) licenses: Vec<String>,
}

impl From<&ImageRequest> for ImageBody {
    fn from(request: &ImageRequest) -> Self {
        Self {
            name: request.name.clone(),
            source_image: request.source_image.clone(),
            disk_size_gb: request.disk_size_gb.to_string(),
            licenses: request.licenses.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct FirewallBody {
    pub(super) name: String,
    pub(super) network: String,
    pub(super) priority: u32,
    pub(super) direction: String,
    pub(super) target_tags: Vec<String>,
    pub(super) allowed: Vec<Allowed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(super) source_ranges: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(super) destination_ranges: Vec<String>,
}

impl From<&FirewallRule> for FirewallBody {
    fn from(rule: &FirewallRule) -> Self {
        let (source_ranges, destination_ranges) = match rule.direction {
            Direction::Ingress => (rule.ranges.clone(), Vec::new()),
            Direction::Egress => (Vec::new(), rule.ranges.clone()),
        };
        Self {
            name: rule.name.clone(),
            network: rule.network.clone(),
            priority: rule.priority,
            direction: rule.direction.provider_value().to_owned(),
            target_tags: vec![rule.target_tag.clone()],
            allowed: vec![Allowed {
                ip_protocol: rule.protocol.clone(),
                ports: rule.ports.clone(),
            }],
            source_ranges,
            destination_ranges,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(super) struct Allowed {
    #[serde(rename = "IPProtocol")]
    pub(super) ip_protocol: String,
    pub(super) ports: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceResource {
    pub(super) status: String,
    #[serde(default)]
    pub(super) network_interfaces: Vec<InterfaceResource>,
}

impl InstanceResource {
    /// NAT address of the last access config that carries one.
    pub(super) fn nat_address(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .flat_map(|interface| interface.access_configs.iter())
            .filter_map(|config| config.nat_ip.as_deref())
            .filter(|address| !address.is_empty())
            .last()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct InterfaceResource {
    #[serde(default)]
    pub(super) access_configs: Vec<AccessConfigResource>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(super) struct AccessConfigResource {
    #[serde(rename = "natIP")]
    pub(super) nat_ip: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(super) struct ImageResource {
    pub(super) status: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(super) struct ApiErrorEnvelope {
    pub(super) error: ApiErrorDetail,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(super) struct ApiErrorDetail {
    pub(super) message: String,
}
