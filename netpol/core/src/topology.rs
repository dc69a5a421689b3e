use crate::{labels::Labels, registry::PodId, version::VersionConstraint};
use std::collections::BTreeSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A port declared by a [`SourcePod`].
///
/// Declaration order is irrelevant to rule semantics and only affects the
/// order in which manifest content is rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub number: u16,
    pub protocol: Protocol,
}

/// A named external network endpoint.
///
/// Identity is `(host_name, port)`. The `policy` field names the egress
/// manifest that grants access to this host; several hosts may share one
/// policy name, in which case they are rendered into a single manifest (the
/// RFC-1918 blocks all fall under `allow-to-private-networks`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Host {
    pub description: String,
    /// An IP address or CIDR block.
    pub host_name: String,
    /// The reachable port; `None` leaves the grant unrestricted by port.
    pub port: Option<u16>,
    pub protocol: Protocol,
    /// CIDR blocks carved out of the grant.
    pub except: Vec<String>,
    /// Name of the manifest object that grants egress to this host.
    pub policy: String,
}

/// A named, label-selected control-plane workload with its declared ports
/// and an optional version gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePod {
    /// Unique within a provider's registry.
    pub name: String,
    pub selector: Labels,
    pub ports: Vec<Port>,
    /// Marks this pod as one member of a version-gated variant pair.
    pub version: Option<VersionConstraint>,
    /// How this pod is named when it is the target of an egress grant
    /// (`allow-to-<reach_alias>`). Version-gated variants share an alias so
    /// the pair is covered by a single manifest.
    pub reach_alias: String,
    /// How this pod is named when it is the peer of an ingress grant
    /// (`allow-from-<from_alias>`).
    pub from_alias: String,
    /// The declared names of the manifest objects that must select this pod.
    pub expected_policies: BTreeSet<String>,
}

/// A reference to one declared port of a registered pod, used only to narrow
/// an allow entry to part of the target's surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodPortRef {
    pub pod: PodId,
    pub port: String,
}

// === impl Protocol ===

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Port ===

impl Port {
    pub fn tcp(name: impl Into<String>, number: u16) -> Self {
        Self {
            name: name.into(),
            number,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(name: impl Into<String>, number: u16) -> Self {
        Self {
            name: name.into(),
            number,
            protocol: Protocol::Udp,
        }
    }
}

// === impl Host ===

impl Host {
    pub fn new(
        description: impl Into<String>,
        host_name: impl Into<String>,
        port: u16,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            host_name: host_name.into(),
            port: Some(port),
            protocol: Protocol::Tcp,
            except: vec![],
            policy: policy.into(),
        }
    }

    /// A host grant unrestricted by port, e.g. the public internet.
    pub fn any_port(
        description: impl Into<String>,
        host_name: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            host_name: host_name.into(),
            port: None,
            protocol: Protocol::Tcp,
            except: vec![],
            policy: policy.into(),
        }
    }

    pub fn udp(mut self) -> Self {
        self.protocol = Protocol::Udp;
        self
    }

    pub fn except(mut self, blocks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.except = blocks.into_iter().map(Into::into).collect();
        self
    }

    /// The host rendered as a CIDR block; bare addresses become /32 (or /128).
    pub fn cidr(&self) -> String {
        if self.host_name.contains('/') {
            return self.host_name.clone();
        }
        if self.host_name.contains(':') {
            return format!("{}/128", self.host_name);
        }
        format!("{}/32", self.host_name)
    }
}

// === impl SourcePod ===

impl SourcePod {
    pub fn new(name: impl Into<String>, selector: Labels, ports: Vec<Port>) -> Self {
        let name = name.into();
        Self {
            reach_alias: name.clone(),
            from_alias: name.clone(),
            name,
            selector,
            ports,
            version: None,
            expected_policies: BTreeSet::new(),
        }
    }

    pub fn versioned(mut self, constraint: VersionConstraint) -> Self {
        self.version = Some(constraint);
        self
    }

    pub fn reached_as(mut self, alias: impl Into<String>) -> Self {
        self.reach_alias = alias.into();
        self
    }

    pub fn known_from(mut self, alias: impl Into<String>) -> Self {
        self.from_alias = alias.into();
        self
    }

    pub fn expecting(mut self, policies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.expected_policies = policies.into_iter().map(Into::into).collect();
        self
    }

    pub fn port_named(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// True when this pod serves clusters of the given version.
    pub fn active_for(&self, version: &semver::Version) -> bool {
        self.version.as_ref().map_or(true, |c| c.matches(version))
    }
}

// === impl PodId ===

impl PodId {
    /// Narrows an allow entry to one named port of this pod.
    pub fn from_port(self, port: impl Into<String>) -> PodPortRef {
        PodPortRef {
            pod: self,
            port: port.into(),
        }
    }
}
