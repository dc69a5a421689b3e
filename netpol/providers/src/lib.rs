//! Per-cloud-provider network-policy catalogues.
//!
//! Every provider enumerates the complete rule set for the control-plane
//! topology it hosts. Provider-agnostic pods (the API server, the etcd pair,
//! the metrics pipeline) are defined once in [`agnostic`] and referenced by
//! every catalogue, so cross-provider consistency is structural rather than
//! enforced. A catalogue is built once, immutably; querying it re-derives
//! rules deterministically.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod agnostic;
mod alicloud;
mod aws;
mod azure;
mod gcp;
mod openstack;
mod packet;

pub use self::{
    alicloud::AliCloudPolicies, aws::AwsPolicies, azure::AzurePolicies, gcp::GcpPolicies,
    openstack::OpenStackPolicies, packet::PacketPolicies,
};
use anyhow::{anyhow, Error};
use trellis_netpol_core::{CatalogueDefect, HostId, PodId, Registry, Rule, RuleBuilder, SourcePod};

/// The cloud providers this control plane can be hosted on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    AliCloud,
    Aws,
    Azure,
    Gcp,
    OpenStack,
    Packet,
}

/// The contract each provider's policy catalogue satisfies.
///
/// Adding a cloud provider means adding one implementation of this trait;
/// no existing catalogue is touched.
pub trait ProviderCatalogue {
    /// The provider identity, used for manifest labeling and test selection.
    fn provider(&self) -> Provider;

    fn registry(&self) -> &Registry;

    /// The closed pod universe backing totality checks and baseline denies.
    fn all_pods(&self) -> &[PodId];

    /// The closed host universe backing totality checks and baseline denies.
    fn all_hosts(&self) -> &[HostId];

    /// The registered API server pod, the only pod reachable from outside
    /// the control-plane namespace.
    fn api_server(&self) -> PodId;

    /// One rule per distinct source pod, in stable order.
    fn to_sources(&self) -> Result<Vec<Rule>, CatalogueDefect>;

    /// Whether the test harness should generate isolation tests for this
    /// provider.
    fn isolation_tests_enabled(&self) -> bool {
        true
    }

    /// The uniform boundary rule for a pod outside this control plane's
    /// namespace: every registered pod except the API server is denied.
    /// Shared by every provider.
    fn egress_from_other_namespaces(&self, source: &SourcePod) -> Result<Rule, CatalogueDefect> {
        RuleBuilder::foreign(self.registry(), self.all_pods(), self.all_hosts(), source.clone())
            .deny_pod(self.all_pods().iter().copied())
            .deny_host(self.all_hosts().iter().copied())
            .allow_pod([self.api_server()])
            .build()
    }
}

// === impl Provider ===

impl Provider {
    pub const ALL: [Self; 6] = [
        Self::AliCloud,
        Self::Aws,
        Self::Azure,
        Self::Gcp,
        Self::OpenStack,
        Self::Packet,
    ];

    /// Builds this provider's catalogue.
    pub fn catalogue(self) -> Result<Box<dyn ProviderCatalogue>, CatalogueDefect> {
        Ok(match self {
            Self::AliCloud => Box::new(AliCloudPolicies::new()?),
            Self::Aws => Box::new(AwsPolicies::new()?),
            Self::Azure => Box::new(AzurePolicies::new()?),
            Self::Gcp => Box::new(GcpPolicies::new()?),
            Self::OpenStack => Box::new(OpenStackPolicies::new()?),
            Self::Packet => Box::new(PacketPolicies::new()?),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AliCloud => "alicloud",
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::OpenStack => "openstack",
            Self::Packet => "packet",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "alicloud" => Ok(Self::AliCloud),
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            "openstack" => Ok(Self::OpenStack),
            "packet" => Ok(Self::Packet),
            s => Err(anyhow!("unknown provider: {:?}", s)),
        }
    }
}
