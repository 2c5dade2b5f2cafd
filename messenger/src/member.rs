use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
    str::FromStr,
};

use membership_net::{
    data_types::{PortNumber, ProcessId},
    destination::Destination,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of process a member is. Locators help other processes find the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmKind {
    Normal,
    Locator,
    AdminOnly,
    Loner,
}

impl VmKind {
    pub fn as_str(self: &Self) -> &'static str {
        match self {
            VmKind::Normal => "normal",
            VmKind::Locator => "locator",
            VmKind::AdminOnly => "admin_only",
            VmKind::Loner => "loner",
        }
    }
}

impl Default for VmKind {
    fn default() -> Self { VmKind::Normal }
}

impl FromStr for VmKind {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(VmKind::Normal),
            "locator" => Ok(VmKind::Locator),
            "admin_only" | "admin-only" | "admin" => Ok(VmKind::AdminOnly),
            "loner" => Ok(VmKind::Loner),
            _ => Err(format!("'{text}' is not a vm kind, expected normal, locator, admin_only or loner")),
        }
    }
}

impl Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a client whose subscriptions survive a disconnect for `timeout_seconds`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableClientAttributes {
    pub id: String,
    pub timeout_seconds: u32,
}

/// Attributes fixed when the local member starts. They travel with the member but do not
/// take part in member identity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberAttributes {
    pub process_id: ProcessId,
    pub vm_kind: VmKind,
    pub name: String,
    pub groups: Vec<String>,
    pub durable_client: Option<DurableClientAttributes>,
    pub network_partition_detection: bool,
    pub locator: bool,
}

/// A process in the cluster. Two members are the same member if they share an address and
/// a logical id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    host: String,
    port: PortNumber,
    id: Uuid,
    attributes: MemberAttributes,
}

impl Member {
    /// A member with a newly generated logical id
    pub fn new(host: &str, port: PortNumber, attributes: MemberAttributes) -> Self {
        Self::with_id(host, port, Uuid::new_v4(), attributes)
    }

    pub fn with_id(host: &str, port: PortNumber, id: Uuid, attributes: MemberAttributes) -> Self {
        Self {
            host: String::from(host),
            port,
            id,
            attributes,
        }
    }

    pub fn host(self: &Self) -> &str { &self.host }
    pub fn port(self: &Self) -> PortNumber { self.port }
    pub fn id(self: &Self) -> Uuid { self.id }
    pub fn attributes(self: &Self) -> &MemberAttributes { &self.attributes }

    pub fn destination(self: &Self) -> Destination { Destination::new(&self.host, self.port) }

    pub fn is_locator(self: &Self) -> bool {
        self.attributes.locator || self.attributes.vm_kind == VmKind::Locator
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.id == other.id && self.host == other.host
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.id.hash(state);
    }
}

impl Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attributes.name.is_empty() {
            write!(f, "{}({}:{})", self.destination(), self.attributes.process_id, self.attributes.vm_kind)
        } else {
            write!(
                f,
                "{}({}:{}:{})",
                self.destination(),
                self.attributes.name,
                self.attributes.process_id,
                self.attributes.vm_kind
            )
        }
    }
}

/// Merges the comma separated `roles` and `groups` settings into one list. Entries are
/// trimmed, empty entries are dropped and only the first occurrence of a name is kept
pub fn parse_groups(roles: &str, groups: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for group in roles.split(',').chain(groups.split(',')) {
        let group = group.trim();
        if !group.is_empty() && !result.iter().any(|g| g == group) {
            result.push(String::from(group));
        }
    }
    result
}
