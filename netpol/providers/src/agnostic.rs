//! Provider-agnostic control-plane topology.
//!
//! These pods and hosts appear in every provider's universe; each catalogue
//! references the same definitions so that a shared component is represented
//! identically wherever it appears.

use trellis_netpol_core::{
    CatalogueDefect, Host, HostId, Labels, PodId, Port, Registry, SourcePod, VersionConstraint,
};
use std::iter::FromIterator;

pub const ALLOW_TO_DNS: &str = "allow-to-dns";
pub const ALLOW_TO_PUBLIC_NETWORKS: &str = "allow-to-public-networks";
pub const ALLOW_TO_PRIVATE_NETWORKS: &str = "allow-to-private-networks";
pub const ALLOW_TO_SEED_APISERVER: &str = "allow-to-seed-apiserver";
pub const ALLOW_TO_GARDEN_PROMETHEUS: &str = "allow-to-garden-prometheus";

/// The RFC-1918 and carrier-grade-NAT blocks carved out of the public
/// grant.
const PRIVATE_BLOCKS: [&str; 4] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "100.64.0.0/10",
];

/// Registry handles for the pods and hosts shared by every provider.
pub struct Agnostics {
    pub(crate) registry: Registry,

    pub(crate) kube_apiserver: PodId,
    pub(crate) etcd_main: PodId,
    pub(crate) etcd_events: PodId,
    pub(crate) kube_controller_manager_http: PodId,
    pub(crate) kube_controller_manager_https: PodId,
    pub(crate) kube_scheduler_http: PodId,
    pub(crate) kube_scheduler_https: PodId,
    pub(crate) kube_state_metrics_seed: PodId,
    pub(crate) kube_state_metrics_shoot: PodId,
    pub(crate) machine_controller_manager: PodId,
    pub(crate) addon_manager: PodId,
    pub(crate) dependency_watchdog: PodId,
    pub(crate) elasticsearch: PodId,
    pub(crate) kibana: PodId,
    pub(crate) grafana: PodId,
    pub(crate) prometheus: PodId,

    pub(crate) dns: HostId,
    pub(crate) public_networks: HostId,
    pub(crate) private_network_a: HostId,
    pub(crate) private_network_b: HostId,
    pub(crate) private_network_c: HostId,
    pub(crate) seed_apiserver: HostId,
    pub(crate) garden_prometheus: HostId,
}

// === impl Agnostics ===

impl Agnostics {
    pub fn new() -> Result<Self, CatalogueDefect> {
        let mut registry = Registry::new();

        let kube_apiserver = registry.register_pod(
            SourcePod::new(
                "kube-apiserver",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "apiserver")]),
                vec![Port::tcp("https", 443)],
            )
            .reached_as("shoot-apiserver")
            .expecting([
                "allow-from-prometheus",
                "allow-kube-apiserver",
                ALLOW_TO_DNS,
                "allow-to-etcd",
                ALLOW_TO_PUBLIC_NETWORKS,
                ALLOW_TO_SEED_APISERVER,
                "deny-all",
            ]),
        )?;

        let etcd_main = registry.register_pod(
            SourcePod::new(
                "etcd-main",
                Labels::from_iter(vec![("app", "etcd-statefulset"), ("role", "main")]),
                vec![Port::tcp("client", 2379)],
            )
            .reached_as("etcd")
            .expecting([
                "allow-from-kube-apiserver",
                "allow-from-prometheus",
                ALLOW_TO_DNS,
                ALLOW_TO_PUBLIC_NETWORKS,
                "deny-all",
            ]),
        )?;

        let etcd_events = registry.register_pod(
            SourcePod::new(
                "etcd-events",
                Labels::from_iter(vec![("app", "etcd-statefulset"), ("role", "events")]),
                vec![Port::tcp("client", 2379)],
            )
            .reached_as("etcd")
            .expecting([
                "allow-from-kube-apiserver",
                "allow-from-prometheus",
                ALLOW_TO_DNS,
                ALLOW_TO_PUBLIC_NETWORKS,
                "deny-all",
            ]),
        )?;

        let controller_manager_expected = [
            "allow-from-prometheus",
            ALLOW_TO_DNS,
            ALLOW_TO_PRIVATE_NETWORKS,
            ALLOW_TO_PUBLIC_NETWORKS,
            "allow-to-shoot-apiserver",
            "deny-all",
        ];
        let kube_controller_manager_http = registry.register_pod(
            SourcePod::new(
                "kube-controller-manager-http",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "controller-manager")]),
                vec![Port::tcp("metrics", 10252)],
            )
            .versioned(gate("kube-controller-manager-http", "< 1.13")?)
            .reached_as("kube-controller-manager")
            .known_from("kube-controller-manager")
            .expecting(controller_manager_expected),
        )?;
        let kube_controller_manager_https = registry.register_pod(
            SourcePod::new(
                "kube-controller-manager-https",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "controller-manager")]),
                vec![Port::tcp("metrics", 10257)],
            )
            .versioned(gate("kube-controller-manager-https", ">= 1.13")?)
            .reached_as("kube-controller-manager")
            .known_from("kube-controller-manager")
            .expecting(controller_manager_expected),
        )?;

        let scheduler_expected = [
            "allow-from-prometheus",
            ALLOW_TO_DNS,
            "allow-to-shoot-apiserver",
            "deny-all",
        ];
        let kube_scheduler_http = registry.register_pod(
            SourcePod::new(
                "kube-scheduler-http",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "scheduler")]),
                vec![Port::tcp("metrics", 10251)],
            )
            .versioned(gate("kube-scheduler-http", "< 1.13")?)
            .reached_as("kube-scheduler")
            .known_from("kube-scheduler")
            .expecting(scheduler_expected),
        )?;
        let kube_scheduler_https = registry.register_pod(
            SourcePod::new(
                "kube-scheduler-https",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "scheduler")]),
                vec![Port::tcp("metrics", 10259)],
            )
            .versioned(gate("kube-scheduler-https", ">= 1.13")?)
            .reached_as("kube-scheduler")
            .known_from("kube-scheduler")
            .expecting(scheduler_expected),
        )?;

        let kube_state_metrics_seed = registry.register_pod(
            SourcePod::new(
                "kube-state-metrics-seed",
                Labels::from_iter(vec![("component", "kube-state-metrics"), ("type", "seed")]),
                vec![Port::tcp("metrics", 8080)],
            )
            .reached_as("kube-state-metrics")
            .expecting([
                "allow-from-prometheus",
                ALLOW_TO_DNS,
                ALLOW_TO_SEED_APISERVER,
                "deny-all",
            ]),
        )?;
        let kube_state_metrics_shoot = registry.register_pod(
            SourcePod::new(
                "kube-state-metrics-shoot",
                Labels::from_iter(vec![("component", "kube-state-metrics"), ("type", "shoot")]),
                vec![Port::tcp("metrics", 8080)],
            )
            .reached_as("kube-state-metrics")
            .expecting([
                "allow-from-prometheus",
                ALLOW_TO_DNS,
                "allow-to-shoot-apiserver",
                "deny-all",
            ]),
        )?;

        let machine_controller_manager = registry.register_pod(
            SourcePod::new(
                "machine-controller-manager",
                Labels::from_iter(vec![
                    ("app", "kubernetes"),
                    ("role", "machine-controller-manager"),
                ]),
                vec![Port::tcp("metrics", 10258)],
            )
            .expecting([
                "allow-from-prometheus",
                ALLOW_TO_DNS,
                ALLOW_TO_PUBLIC_NETWORKS,
                ALLOW_TO_SEED_APISERVER,
                "allow-to-shoot-apiserver",
                "deny-all",
            ]),
        )?;

        let addon_manager = registry.register_pod(
            SourcePod::new(
                "kube-addon-manager",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "addon-manager")]),
                vec![],
            )
            .expecting([ALLOW_TO_DNS, "allow-to-shoot-apiserver", "deny-all"]),
        )?;

        let dependency_watchdog = registry.register_pod(
            SourcePod::new(
                "dependency-watchdog",
                Labels::from_iter(Some(("role", "dependency-watchdog"))),
                vec![],
            )
            .expecting([ALLOW_TO_DNS, ALLOW_TO_SEED_APISERVER, "deny-all"]),
        )?;

        let elasticsearch = registry.register_pod(
            SourcePod::new(
                "elasticsearch-logging",
                Labels::from_iter(vec![("app", "elasticsearch-logging"), ("role", "logging")]),
                vec![Port::tcp("http", 9200), Port::tcp("metrics", 9114)],
            )
            .reached_as("elasticsearch")
            .known_from("elasticsearch")
            .expecting(["allow-from-kibana", "allow-from-prometheus", "deny-all"]),
        )?;

        let kibana = registry.register_pod(
            SourcePod::new(
                "kibana-logging",
                Labels::from_iter(vec![("app", "kibana-logging"), ("role", "logging")]),
                vec![Port::tcp("http", 5601)],
            )
            .reached_as("kibana")
            .known_from("kibana")
            .expecting([ALLOW_TO_DNS, "allow-to-elasticsearch-http", "deny-all"]),
        )?;

        let grafana = registry.register_pod(
            SourcePod::new(
                "grafana",
                Labels::from_iter(Some(("component", "grafana"))),
                vec![Port::tcp("web", 3000)],
            )
            .expecting([ALLOW_TO_DNS, "allow-to-prometheus", "deny-all"]),
        )?;

        let prometheus = registry.register_pod(
            SourcePod::new(
                "prometheus",
                Labels::from_iter(vec![("app", "prometheus"), ("role", "monitoring")]),
                vec![Port::tcp("web", 9090)],
            )
            .expecting([
                "allow-from-grafana",
                "allow-to-cloud-controller-manager",
                ALLOW_TO_DNS,
                "allow-to-elasticsearch-metrics",
                "allow-to-etcd",
                ALLOW_TO_GARDEN_PROMETHEUS,
                "allow-to-kube-controller-manager",
                "allow-to-kube-scheduler",
                "allow-to-kube-state-metrics",
                "allow-to-machine-controller-manager",
                ALLOW_TO_PUBLIC_NETWORKS,
                ALLOW_TO_SEED_APISERVER,
                "allow-to-shoot-apiserver",
                "deny-all",
            ]),
        )?;

        let dns = registry.register_host(
            Host::new("Cluster DNS", "0.0.0.0/0", 53, ALLOW_TO_DNS).udp(),
        )?;
        let public_networks = registry.register_host(
            Host::any_port("Public networks", "0.0.0.0/0", ALLOW_TO_PUBLIC_NETWORKS)
                .except(PRIVATE_BLOCKS.iter().copied().chain(Some("169.254.169.254/32"))),
        )?;
        let private_network_a = registry.register_host(Host::any_port(
            "Private networks (class A)",
            "10.0.0.0/8",
            ALLOW_TO_PRIVATE_NETWORKS,
        ))?;
        let private_network_b = registry.register_host(Host::any_port(
            "Private networks (class B)",
            "172.16.0.0/12",
            ALLOW_TO_PRIVATE_NETWORKS,
        ))?;
        let private_network_c = registry.register_host(Host::any_port(
            "Private networks (class C)",
            "192.168.0.0/16",
            ALLOW_TO_PRIVATE_NETWORKS,
        ))?;
        let seed_apiserver = registry.register_host(Host::new(
            "Seed cluster API server",
            "10.243.0.1",
            443,
            ALLOW_TO_SEED_APISERVER,
        ))?;
        let garden_prometheus = registry.register_host(Host::new(
            "Garden Prometheus",
            "10.242.0.20",
            443,
            ALLOW_TO_GARDEN_PROMETHEUS,
        ))?;

        Ok(Self {
            registry,
            kube_apiserver,
            etcd_main,
            etcd_events,
            kube_controller_manager_http,
            kube_controller_manager_https,
            kube_scheduler_http,
            kube_scheduler_https,
            kube_state_metrics_seed,
            kube_state_metrics_shoot,
            machine_controller_manager,
            addon_manager,
            dependency_watchdog,
            elasticsearch,
            kibana,
            grafana,
            prometheus,
            dns,
            public_networks,
            private_network_a,
            private_network_b,
            private_network_c,
            seed_apiserver,
            garden_prometheus,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn shared_pods(&self) -> Vec<PodId> {
        vec![
            self.kube_apiserver,
            self.etcd_main,
            self.etcd_events,
            self.kube_controller_manager_http,
            self.kube_controller_manager_https,
            self.kube_scheduler_http,
            self.kube_scheduler_https,
            self.kube_state_metrics_seed,
            self.kube_state_metrics_shoot,
            self.machine_controller_manager,
            self.addon_manager,
            self.dependency_watchdog,
            self.elasticsearch,
            self.kibana,
            self.grafana,
            self.prometheus,
        ]
    }

    pub(crate) fn shared_hosts(&self) -> Vec<HostId> {
        vec![
            self.dns,
            self.public_networks,
            self.private_network_a,
            self.private_network_b,
            self.private_network_c,
            self.seed_apiserver,
            self.garden_prometheus,
        ]
    }

    pub(crate) fn private_networks(&self) -> [HostId; 3] {
        [
            self.private_network_a,
            self.private_network_b,
            self.private_network_c,
        ]
    }
}

/// Builds a provider's cloud-controller-manager variant, optionally gated to
/// a cluster-version range.
pub(crate) fn cloud_controller_manager(
    name: &str,
    metrics_port: u16,
    version: Option<&str>,
) -> Result<SourcePod, CatalogueDefect> {
    let mut pod = SourcePod::new(
        name,
        Labels::from_iter(vec![("app", "kubernetes"), ("role", "cloud-controller-manager")]),
        vec![Port::tcp("metrics", metrics_port)],
    )
    .reached_as("cloud-controller-manager")
    .known_from("cloud-controller-manager")
    .expecting([
        "allow-from-prometheus",
        ALLOW_TO_DNS,
        ALLOW_TO_PRIVATE_NETWORKS,
        ALLOW_TO_PUBLIC_NETWORKS,
        "allow-to-shoot-apiserver",
        "deny-all",
    ]);
    if let Some(spec) = version {
        pod = pod.versioned(gate(name, spec)?);
    }
    Ok(pod)
}

/// The link-local metadata service most platforms expose to instances.
pub(crate) fn metadata_service(host_name: &str) -> Host {
    Host::new("Metadata service", host_name, 80, ALLOW_TO_PRIVATE_NETWORKS)
}

pub(crate) fn gate(pod: &str, spec: &str) -> Result<VersionConstraint, CatalogueDefect> {
    spec.parse().map_err(|error| CatalogueDefect::InvalidVersion {
        pod: pod.to_string(),
        error,
    })
}
