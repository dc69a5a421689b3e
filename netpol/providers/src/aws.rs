use crate::{
    agnostic::{self, Agnostics, ALLOW_TO_DNS, ALLOW_TO_PUBLIC_NETWORKS},
    Provider, ProviderCatalogue,
};
use std::iter::FromIterator;
use trellis_netpol_core::{
    CatalogueDefect, HostId, Labels, PodId, Registry, Rule, RuleBuilder, SourcePod,
};

/// AWS-hosted control planes.
///
/// Besides the version-gated cloud-controller-manager pair, AWS runs a load
/// balancer readvertiser that keeps the API server's ELB records current.
pub struct AwsPolicies {
    agnostics: Agnostics,
    cloud_controller_manager_http: PodId,
    cloud_controller_manager_https: PodId,
    lb_readvertiser: PodId,
    metadata_service: HostId,
    pods: Vec<PodId>,
    hosts: Vec<HostId>,
}

// === impl AwsPolicies ===

impl AwsPolicies {
    pub fn new() -> Result<Self, CatalogueDefect> {
        let mut agnostics = Agnostics::new()?;
        let cloud_controller_manager_http =
            agnostics.registry.register_pod(agnostic::cloud_controller_manager(
                "cloud-controller-manager-http",
                10253,
                Some("< 1.13"),
            )?)?;
        let cloud_controller_manager_https =
            agnostics.registry.register_pod(agnostic::cloud_controller_manager(
                "cloud-controller-manager-https",
                10258,
                Some(">= 1.13"),
            )?)?;
        let lb_readvertiser = agnostics.registry.register_pod(
            SourcePod::new(
                "aws-lb-readvertiser",
                Labels::from_iter(Some(("app", "aws-lb-readvertiser"))),
                vec![],
            )
            .expecting([
                ALLOW_TO_DNS,
                ALLOW_TO_PUBLIC_NETWORKS,
                "allow-to-shoot-apiserver",
                "deny-all",
            ]),
        )?;
        let metadata_service = agnostics
            .registry
            .register_host(agnostic::metadata_service("169.254.169.254"))?;

        let mut pods = agnostics.shared_pods();
        pods.extend([
            cloud_controller_manager_http,
            cloud_controller_manager_https,
            lb_readvertiser,
        ]);
        let mut hosts = agnostics.shared_hosts();
        hosts.push(metadata_service);

        Ok(Self {
            agnostics,
            cloud_controller_manager_http,
            cloud_controller_manager_https,
            lb_readvertiser,
            metadata_service,
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

impl ProviderCatalogue for AwsPolicies {
    fn provider(&self) -> Provider {
        Provider::Aws
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
            self.new_source(self.cloud_controller_manager_http)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks, self.metadata_service])
                .allow_host(a.private_networks())
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(self.cloud_controller_manager_https)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks, self.metadata_service])
                .allow_host(a.private_networks())
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(self.lb_readvertiser)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks])
                .build()?,
            self.new_source(a.kube_controller_manager_http)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks, self.metadata_service])
                .allow_host(a.private_networks())
                .allow_from_pod_port(a.prometheus, "metrics")
                .build()?,
            self.new_source(a.kube_controller_manager_https)
                .allow_pod([a.kube_apiserver])
                .allow_host([a.dns, a.public_networks, self.metadata_service])
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
                    self.cloud_controller_manager_http,
                    self.cloud_controller_manager_https,
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
