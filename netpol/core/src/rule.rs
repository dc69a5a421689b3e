use crate::{
    defect::CatalogueDefect,
    registry::{host_identity, HostId, PodId, Registry},
    topology::{Host, PodPortRef, Port, SourcePod},
};
use std::collections::{BTreeMap, BTreeSet};

/// An egress grant resolved against the registry: the source may open
/// connections to `pod`, on `port` only when the entry was narrowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodGrant {
    pub pod: SourcePod,
    pub port: Option<Port>,
}

/// An ingress allowance resolved against the registry: `peer` may open
/// connections to the source, on the source's `port` only when narrowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressGrant {
    pub peer: SourcePod,
    pub port: Option<Port>,
}

/// The resolved, immutable allow/deny relation from one source pod to every
/// registered pod and host.
///
/// Denied entries carry no manifest content; they exist to witness that the
/// totality check classified the entire universe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub source: SourcePod,
    pub allowed_pods: Vec<PodGrant>,
    pub denied_pods: Vec<String>,
    pub allowed_hosts: Vec<Host>,
    pub denied_hosts: Vec<String>,
    pub ingress: Vec<IngressGrant>,
    pub allow_from_all: bool,
    pub expected_policies: BTreeSet<String>,
}

/// Composes the allow/deny relation for a single source pod.
///
/// The canonical construction order is a baseline deny over the whole
/// universe followed by targeted allows; an allow layered over a deny wins
/// unconditionally. The builder is consumed by [`RuleBuilder::build`], which
/// asserts totality and registry closure before producing a [`Rule`].
#[derive(Debug)]
pub struct RuleBuilder<'a> {
    registry: &'a Registry,
    universe_pods: &'a [PodId],
    universe_hosts: &'a [HostId],
    source: SourcePod,
    source_id: Option<PodId>,

    allowed_pods: BTreeMap<PodId, Option<String>>,
    denied_pods: BTreeSet<PodId>,
    allowed_hosts: BTreeSet<HostId>,
    denied_hosts: BTreeSet<HostId>,
    ingress: BTreeMap<PodId, Option<String>>,
    allow_from_all: bool,

    /// The first defect recorded by a fluent call, surfaced by `build`.
    defect: Option<CatalogueDefect>,
}

// === impl RuleBuilder ===

impl<'a> RuleBuilder<'a> {
    /// Starts a rule for a registered source pod.
    pub fn new(
        registry: &'a Registry,
        universe_pods: &'a [PodId],
        universe_hosts: &'a [HostId],
        source: PodId,
    ) -> Self {
        Self {
            source: registry.pod(source).clone(),
            source_id: Some(source),
            registry,
            universe_pods,
            universe_hosts,
            allowed_pods: BTreeMap::new(),
            denied_pods: BTreeSet::new(),
            allowed_hosts: BTreeSet::new(),
            denied_hosts: BTreeSet::new(),
            ingress: BTreeMap::new(),
            allow_from_all: false,
            defect: None,
        }
    }

    /// Starts a rule for a pod outside this catalogue's namespace, e.g. to
    /// express the uniform cross-namespace boundary.
    pub fn foreign(
        registry: &'a Registry,
        universe_pods: &'a [PodId],
        universe_hosts: &'a [HostId],
        source: SourcePod,
    ) -> Self {
        Self {
            source,
            source_id: None,
            registry,
            universe_pods,
            universe_hosts,
            allowed_pods: BTreeMap::new(),
            denied_pods: BTreeSet::new(),
            allowed_hosts: BTreeSet::new(),
            denied_hosts: BTreeSet::new(),
            ingress: BTreeMap::new(),
            allow_from_all: false,
            defect: None,
        }
    }

    /// Allows the source to reach every declared port of the given pods.
    /// Overrides an earlier deny.
    pub fn allow_pod(mut self, pods: impl IntoIterator<Item = PodId>) -> Self {
        for pod in pods {
            self.denied_pods.remove(&pod);
            self.allowed_pods.insert(pod, None);
        }
        self
    }

    /// Allows the source to reach exactly one named port of the target.
    /// Overrides an earlier deny.
    pub fn allow_target_pod(mut self, target: PodPortRef) -> Self {
        if self.registry.pod(target.pod).port_named(&target.port).is_none() {
            self.record(CatalogueDefect::UnknownPort {
                pod: self.registry.pod(target.pod).name.clone(),
                port: target.port.clone(),
            });
            return self;
        }
        self.denied_pods.remove(&target.pod);
        self.allowed_pods.insert(target.pod, Some(target.port));
        self
    }

    /// Denies the source access to the given pods. Denying a pod that was
    /// already explicitly allowed is a construction defect.
    pub fn deny_pod(mut self, pods: impl IntoIterator<Item = PodId>) -> Self {
        for pod in pods {
            if self.allowed_pods.contains_key(&pod) {
                let entity = self.registry.pod(pod).name.clone();
                let source = self.source.name.clone();
                self.record(CatalogueDefect::DenyAfterAllow { subject: source, entity });
                continue;
            }
            self.denied_pods.insert(pod);
        }
        self
    }

    /// Allows the source to reach the given hosts. Overrides an earlier deny.
    pub fn allow_host(mut self, hosts: impl IntoIterator<Item = HostId>) -> Self {
        for host in hosts {
            self.denied_hosts.remove(&host);
            self.allowed_hosts.insert(host);
        }
        self
    }

    /// Denies the source access to the given hosts. Denying a host that was
    /// already explicitly allowed is a construction defect.
    pub fn deny_host(mut self, hosts: impl IntoIterator<Item = HostId>) -> Self {
        for host in hosts {
            if self.allowed_hosts.contains(&host) {
                let entity = host_identity(self.registry.host(host));
                let source = self.source.name.clone();
                self.record(CatalogueDefect::DenyAfterAllow { subject: source, entity });
                continue;
            }
            self.denied_hosts.insert(host);
        }
        self
    }

    /// Declares that the peer may open connections to any of the source's
    /// declared ports.
    pub fn allow_from_pod(mut self, peers: impl IntoIterator<Item = PodId>) -> Self {
        for peer in peers {
            self.ingress.insert(peer, None);
        }
        self
    }

    /// Declares that the peer may open connections to one named port of the
    /// source, leaving the rest of its surface closed to that peer.
    pub fn allow_from_pod_port(mut self, peer: PodId, port: impl Into<String>) -> Self {
        let port = port.into();
        if self.source.port_named(&port).is_none() {
            self.record(CatalogueDefect::UnknownPort {
                pod: self.source.name.clone(),
                port,
            });
            return self;
        }
        self.ingress.insert(peer, Some(port));
        self
    }

    /// Declares the any-namespace ingress carve-out; only the cluster's API
    /// server endpoint warrants this.
    pub fn allow_from_all_namespaces(mut self) -> Self {
        self.allow_from_all = true;
        self
    }

    /// Finalizes the rule, asserting totality over the universe and closure
    /// of every reference against it.
    pub fn build(mut self) -> Result<Rule, CatalogueDefect> {
        if let Some(defect) = self.defect.take() {
            return Err(defect);
        }

        // The baseline deny sweeps in the source itself; a pod never needs a
        // rule about reaching its own ports.
        if let Some(source) = self.source_id {
            self.allowed_pods.remove(&source);
            self.denied_pods.remove(&source);
        }

        let universe_pods: BTreeSet<PodId> = self.universe_pods.iter().copied().collect();
        let universe_hosts: BTreeSet<HostId> = self.universe_hosts.iter().copied().collect();

        for id in self.allowed_pods.keys().chain(self.denied_pods.iter()) {
            if !universe_pods.contains(id) {
                return Err(CatalogueDefect::DanglingPod {
                    subject: self.source.name.clone(),
                    pod: self.registry.pod(*id).name.clone(),
                });
            }
        }
        for id in self.ingress.keys() {
            if !universe_pods.contains(id) {
                return Err(CatalogueDefect::DanglingPod {
                    subject: self.source.name.clone(),
                    pod: self.registry.pod(*id).name.clone(),
                });
            }
        }
        for id in self.allowed_hosts.iter().chain(self.denied_hosts.iter()) {
            if !universe_hosts.contains(id) {
                return Err(CatalogueDefect::DanglingHost {
                    subject: self.source.name.clone(),
                    host: host_identity(self.registry.host(*id)),
                });
            }
        }

        for id in &universe_pods {
            if Some(*id) == self.source_id {
                continue;
            }
            if !self.allowed_pods.contains_key(id) && !self.denied_pods.contains(id) {
                return Err(CatalogueDefect::UnclassifiedPod {
                    subject: self.source.name.clone(),
                    pod: self.registry.pod(*id).name.clone(),
                });
            }
        }
        for id in &universe_hosts {
            if !self.allowed_hosts.contains(id) && !self.denied_hosts.contains(id) {
                return Err(CatalogueDefect::UnclassifiedHost {
                    subject: self.source.name.clone(),
                    host: host_identity(self.registry.host(*id)),
                });
            }
        }

        let mut allowed_pods: Vec<PodGrant> = self
            .allowed_pods
            .iter()
            .map(|(id, port)| {
                let pod = self.registry.pod(*id).clone();
                let port = port.as_ref().map(|name| {
                    pod.port_named(name)
                        .expect("narrowed ports are validated on entry")
                        .clone()
                });
                PodGrant { pod, port }
            })
            .collect();
        allowed_pods.sort_by(|a, b| {
            (&a.pod.name, a.port.as_ref().map(|p| &p.name))
                .cmp(&(&b.pod.name, b.port.as_ref().map(|p| &p.name)))
        });

        let mut denied_pods: Vec<String> = self
            .denied_pods
            .iter()
            .map(|id| self.registry.pod(*id).name.clone())
            .collect();
        denied_pods.sort();

        let mut allowed_hosts: Vec<Host> = self
            .allowed_hosts
            .iter()
            .map(|id| self.registry.host(*id).clone())
            .collect();
        allowed_hosts.sort_by(|a, b| {
            (&a.policy, &a.host_name, a.port).cmp(&(&b.policy, &b.host_name, b.port))
        });

        let mut denied_hosts: Vec<String> = self
            .denied_hosts
            .iter()
            .map(|id| host_identity(self.registry.host(*id)))
            .collect();
        denied_hosts.sort();

        let mut ingress: Vec<IngressGrant> = self
            .ingress
            .iter()
            .map(|(id, port)| {
                let port = port.as_ref().map(|name| {
                    self.source
                        .port_named(name)
                        .expect("narrowed ports are validated on entry")
                        .clone()
                });
                IngressGrant {
                    peer: self.registry.pod(*id).clone(),
                    port,
                }
            })
            .collect();
        ingress.sort_by(|a, b| a.peer.name.cmp(&b.peer.name));

        let expected_policies = self.source.expected_policies.clone();
        Ok(Rule {
            source: self.source,
            allowed_pods,
            denied_pods,
            allowed_hosts,
            denied_hosts,
            ingress,
            allow_from_all: self.allow_from_all,
            expected_policies,
        })
    }

    fn record(&mut self, defect: CatalogueDefect) {
        if self.defect.is_none() {
            self.defect = Some(defect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{labels::Labels, topology::Port};
    use std::iter::FromIterator;

    struct Fixture {
        registry: Registry,
        pods: Vec<PodId>,
        hosts: Vec<HostId>,
    }

    fn fixture() -> Fixture {
        let mut registry = Registry::new();
        let apiserver = registry
            .register_pod(SourcePod::new(
                "kube-apiserver",
                Labels::from_iter(vec![("app", "kubernetes"), ("role", "apiserver")]),
                vec![Port::tcp("https", 443)],
            ))
            .unwrap();
        let prometheus = registry
            .register_pod(SourcePod::new(
                "prometheus",
                Labels::from_iter(Some(("app", "prometheus"))),
                vec![Port::tcp("web", 9090)],
            ))
            .unwrap();
        let elastic = registry
            .register_pod(SourcePod::new(
                "elasticsearch",
                Labels::from_iter(Some(("app", "elasticsearch"))),
                vec![Port::tcp("http", 9200), Port::tcp("metrics", 9114)],
            ))
            .unwrap();
        let dns = registry
            .register_host(Host::any_port("DNS", "0.0.0.0/0", "allow-to-dns").udp())
            .unwrap();
        let metadata = registry
            .register_host(Host::new(
                "Metadata service",
                "169.254.169.254",
                80,
                "allow-to-private-networks",
            ))
            .unwrap();
        Fixture {
            registry,
            pods: vec![apiserver, prometheus, elastic],
            hosts: vec![dns, metadata],
        }
    }

    #[test]
    fn baseline_deny_then_allow_builds_a_total_rule() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_pod(Some(f.pods[0]))
            .allow_host(Some(f.hosts[0]))
            .build()
            .unwrap();

        assert_eq!(rule.source.name, "prometheus");
        assert_eq!(rule.allowed_pods.len(), 1);
        assert_eq!(rule.allowed_pods[0].pod.name, "kube-apiserver");
        assert_eq!(rule.allowed_pods[0].port, None);
        assert_eq!(rule.denied_pods, vec!["elasticsearch".to_string()]);
        assert_eq!(rule.allowed_hosts.len(), 1);
        assert_eq!(rule.denied_hosts, vec!["169.254.169.254:80".to_string()]);
    }

    #[test]
    fn unclassified_pod_fails_totality() {
        let f = fixture();
        let err = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_host(f.hosts.iter().copied())
            .deny_pod(Some(f.pods[0]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CatalogueDefect::UnclassifiedPod {
                subject: "prometheus".to_string(),
                pod: "elasticsearch".to_string(),
            },
        );
    }

    #[test]
    fn unclassified_host_fails_totality() {
        let f = fixture();
        let err = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(Some(f.hosts[0]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogueDefect::UnclassifiedHost { .. }));
    }

    #[test]
    fn deny_after_explicit_allow_is_a_defect() {
        let f = fixture();
        let err = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .allow_pod(Some(f.pods[0]))
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CatalogueDefect::DenyAfterAllow {
                subject: "prometheus".to_string(),
                entity: "kube-apiserver".to_string(),
            },
        );
    }

    #[test]
    fn references_outside_the_universe_are_dangling() {
        let f = fixture();
        // Shrink the universe to exclude elasticsearch while a rule still
        // references it.
        let universe = &f.pods[..2];
        let err = RuleBuilder::new(&f.registry, universe, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CatalogueDefect::DanglingPod {
                subject: "prometheus".to_string(),
                pod: "elasticsearch".to_string(),
            },
        );
    }

    #[test]
    fn narrowing_to_an_undeclared_port_is_a_defect() {
        let f = fixture();
        let err = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_target_pod(f.pods[2].from_port("grpc"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CatalogueDefect::UnknownPort {
                pod: "elasticsearch".to_string(),
                port: "grpc".to_string(),
            },
        );
    }

    #[test]
    fn narrowed_allow_resolves_the_target_port() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_target_pod(f.pods[2].from_port("metrics"))
            .allow_pod(Some(f.pods[0]))
            .build()
            .unwrap();
        let grant = rule
            .allowed_pods
            .iter()
            .find(|g| g.pod.name == "elasticsearch")
            .unwrap();
        assert_eq!(grant.port.as_ref().map(|p| p.number), Some(9114));
    }

    #[test]
    fn ingress_narrowing_validates_the_sources_own_ports() {
        let f = fixture();
        let err = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[2])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_from_pod_port(f.pods[1], "web")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CatalogueDefect::UnknownPort {
                pod: "elasticsearch".to_string(),
                port: "web".to_string(),
            },
        );
    }

    #[test]
    fn the_source_is_never_classified_against_itself() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_pod(Some(f.pods[0]))
            .build()
            .unwrap();
        assert!(!rule.denied_pods.contains(&"prometheus".to_string()));
        assert!(rule.allowed_pods.iter().all(|g| g.pod.name != "prometheus"));
    }

    #[test]
    fn foreign_sources_are_exempt_from_self_exclusion() {
        let f = fixture();
        let foreign = SourcePod::new(
            "drifter",
            Labels::from_iter(Some(("app", "drifter"))),
            vec![],
        );
        let rule = RuleBuilder::foreign(&f.registry, &f.pods, &f.hosts, foreign)
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_pod(Some(f.pods[0]))
            .build()
            .unwrap();
        assert_eq!(rule.source.name, "drifter");
        assert_eq!(rule.denied_pods.len(), 2);
        assert_eq!(rule.allowed_pods.len(), 1);
    }
}
