use crate::{
    defect::CatalogueDefect,
    topology::{Host, SourcePod},
};
use ahash::AHashMap as HashMap;
use ipnet::IpNet;
use std::net::IpAddr;

/// A stable handle to a pod definition in a [`Registry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId(usize);

/// A stable handle to a host definition in a [`Registry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(usize);

/// The flat arena of pod and host definitions backing one catalogue.
///
/// Definitions are registered once during catalogue initialization and are
/// immutable afterwards. Rules hold [`PodId`]/[`HostId`] handles rather than
/// references, so mutually referential definitions (the metrics collector
/// allows traffic from pods whose own rules allow traffic to it) cannot form
/// cycles; handles are resolved lazily when a rule is built.
#[derive(Debug, Default)]
pub struct Registry {
    pods: Vec<SourcePod>,
    pods_by_name: HashMap<String, PodId>,
    hosts: Vec<Host>,
    hosts_by_identity: HashMap<(String, Option<u16>), HostId>,
}

// === impl Registry ===

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pod(&mut self, pod: SourcePod) -> Result<PodId, CatalogueDefect> {
        if self.pods_by_name.contains_key(&pod.name) {
            return Err(CatalogueDefect::DuplicatePod(pod.name));
        }
        for port in &pod.ports {
            if pod.ports.iter().filter(|p| p.name == port.name).count() > 1 {
                return Err(CatalogueDefect::DuplicatePort {
                    pod: pod.name.clone(),
                    port: port.name.clone(),
                });
            }
        }

        let id = PodId(self.pods.len());
        self.pods_by_name.insert(pod.name.clone(), id);
        self.pods.push(pod);
        Ok(id)
    }

    pub fn register_host(&mut self, host: Host) -> Result<HostId, CatalogueDefect> {
        let identity = (host.host_name.clone(), host.port);
        if self.hosts_by_identity.contains_key(&identity) {
            return Err(CatalogueDefect::DuplicateHost(host_identity(&host)));
        }
        validate_cidr(&host.host_name).map_err(|reason| CatalogueDefect::InvalidHost {
            host: host_identity(&host),
            reason,
        })?;
        for block in &host.except {
            if block.parse::<IpNet>().is_err() {
                return Err(CatalogueDefect::InvalidHost {
                    host: host_identity(&host),
                    reason: format!("except block {:?} is not a CIDR", block),
                });
            }
        }

        let id = HostId(self.hosts.len());
        self.hosts_by_identity.insert(identity, id);
        self.hosts.push(host);
        Ok(id)
    }

    pub fn pod(&self, id: PodId) -> &SourcePod {
        &self.pods[id.0]
    }

    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.0]
    }

    pub fn pod_named(&self, name: &str) -> Option<PodId> {
        self.pods_by_name.get(name).copied()
    }

    pub fn pods(&self) -> impl Iterator<Item = (PodId, &SourcePod)> {
        self.pods.iter().enumerate().map(|(i, p)| (PodId(i), p))
    }

    pub fn hosts(&self) -> impl Iterator<Item = (HostId, &Host)> {
        self.hosts.iter().enumerate().map(|(i, h)| (HostId(i), h))
    }
}

pub(crate) fn host_identity(host: &Host) -> String {
    match host.port {
        Some(port) => format!("{}:{}", host.host_name, port),
        None => host.host_name.clone(),
    }
}

fn validate_cidr(host_name: &str) -> Result<(), String> {
    if host_name.parse::<IpNet>().is_ok() || host_name.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    Err(format!("{:?} is neither an IP address nor a CIDR", host_name))
}
