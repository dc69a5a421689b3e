use crate::{
    agnostic::{self, Agnostics},
    Provider, ProviderCatalogue,
};
use trellis_netpol_core::{CatalogueDefect, HostId, PodId, Registry, Rule, RuleBuilder};

/// Packet-hosted control planes.
///
/// Bare-metal topology: there is no instance metadata service, and the
/// cloud-controller-manager was introduced after the HTTPS port switch, so a
/// single unversioned variant is registered. The isolation-test harness is
/// not generated for this provider while its bare-metal test environment
/// lacks a seed cluster to run against.
pub struct PacketPolicies {
    agnostics: Agnostics,
    cloud_controller_manager: PodId,
    pods: Vec<PodId>,
    hosts: Vec<HostId>,
}

// === impl PacketPolicies ===

impl PacketPolicies {
    pub fn new() -> Result<Self, CatalogueDefect> {
        let mut agnostics = Agnostics::new()?;
        let cloud_controller_manager = agnostics.registry.register_pod(
            agnostic::cloud_controller_manager("cloud-controller-manager", 10258, None)?,
        )?;

        let mut pods = agnostics.shared_pods();
        pods.push(cloud_controller_manager);
        let hosts = agnostics.shared_hosts();

        Ok(Self {
            agnostics,
            cloud_controller_manager,
            pods,
            hosts,
        })
    }

    fn new_source(&self, pod: PodId) -> RuleBuilder<'_> {
        RuleBuilder::new(&self.agnostics.registry, &self.pods, &self.hosts, pod)
            .deny_pod(self.pods.iter().copied())
            .deny_host(self.hosts.iter().copied())
    }
}

impl ProviderCatalogue for PacketPolicies {
    fn provider(&self) -> Provider {
        Provider::Packet
    }

    fn registry(&self) -> &Registry {
        &self.agnostics.registry
    }

    fn all_pods(&self) -> &[PodId] {
        &self.pods
    }

    fn all_hosts(&self) -> &[HostId] {
        &self.hosts
    }

    fn api_server(&self) -> PodId {
        self.agnostics.kube_apiserver
    }

    fn isolation_tests_enabled(&self) -> bool {
        false
    }

    fn to_sources(&self) -> Result<Vec<Rule>, CatalogueDefect> {
        let a = &self.agnostics;
        Ok(vec![
            self.new_source(a.kube_apiserver)
                .allow_pod([a.etcd_main, a.etcd_events])
                .allow_host([a.dns, a.public_networks, a.seed_apiserver])
                .allow_from_all_namespaces()
                .allow_from_pod_port(a.prometheus, "https")
                .build()?,
            self.new_source(a.etcd_main)
                .allow_host([a.dns, a.public_networks])
                .allow_from_pod_port(a.kube_apiserver, "client")
                .allow_from_pod_port(a.prometheus, "client")
                .build()?,
            self.new_source(a.etcd_events)
                .allow_host([a.dns, a.public_networks])
                .allow_from_pod_port(a.kube_apiserver, "client")
                .allow_from_pod_port(a.prometheus, "client")
                .build()?,
            self.new_source(self.cloud_controller_manager)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks])
                .allow_host(a.private_networks())
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_controller_manager_http)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks])
                .allow_host(a.private_networks())
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_controller_manager_https)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks])
                .allow_host(a.private_networks())
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_scheduler_http)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns])
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_scheduler_https)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns])
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_state_metrics_seed)
                .allow_host([a.dns, a.seed_apiserver])
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_state_metrics_shoot)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns])
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.machine_controller_manager)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks, a.seed_apiserver])
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.addon_manager)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns])
                .build()?,
            self.new_source(a.dependency_watchdog)
                .allow_host([a.dns, a.seed_apiserver])
                .build()?,
            self.new_source(a.elasticsearch)
                .allow_from_pod_port(a.kibana, "http")
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kibana)
                .allow_target_pod(a.elasticsearch.from_port("http"))
                .allow_host([a.dns])
                .build()?,
            self.new_source(a.grafana)
                .allow_pod([a.prometheus])
                .allow_host([a.dns])
                .build()?,
            self.new_source(a.prometheus)
                .allow_pod([
                    a.kube_apiserver,
                    a.etcd_main,
                    a.etcd_events,
                    self.cloud_controller_manager,
                    a.kube_controller_manager_http,
                    a.kube_controller_manager_https,
                    a.kube_scheduler_http,
                    a.kube_scheduler_https,
                    a.kube_state_metrics_seed,
                    a.kube_state_metrics_shoot,
                    a.machine_controller_manager,
                ])
                .allow_target_pod(a.elasticsearch.from_port("metrics"))
                .allow_host([a.dns, a.public_networks, a.seed_apiserver, a.garden_prometheus])
                .allow_from_pod_port(a.grafana, "web")
                .build()?,
        ])
    }
}
