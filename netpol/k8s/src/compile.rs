use crate::{selector, DENY_ALL, MANAGED_BY};
use k8s_openapi::{
    api::networking::v1::{
        IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule,
        NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
    },
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use trellis_netpol_core::{Host, PodGrant, Port, Rule};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("the rule for {subject:?} produces more than one manifest named {name:?}")]
    DuplicateManifest { subject: String, name: String },
}

/// Renders the manifests one rule requires, sorted by name.
///
/// Every object selects the rule's source pod. A baseline `deny-all` object
/// is present whenever the rule carries denied entries, which by totality is
/// effectively always; allowed pods and hosts produce egress objects;
/// ingress allowances produce port-scoped ingress objects.
pub fn compile(rule: &Rule) -> Result<Vec<NetworkPolicy>, CompileError> {
    let mut objects: BTreeMap<String, NetworkPolicy> = BTreeMap::new();
    let source_selector = selector::label_selector(&rule.source.selector);

    if !rule.denied_pods.is_empty() || !rule.denied_hosts.is_empty() {
        insert(
            &mut objects,
            &rule.source.name,
            DENY_ALL.to_string(),
            NetworkPolicySpec {
                pod_selector: source_selector.clone(),
                policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
                ingress: None,
                egress: None,
            },
        )?;
    }

    let mut egress_to_pods: BTreeMap<String, Vec<&PodGrant>> = BTreeMap::new();
    for grant in &rule.allowed_pods {
        egress_to_pods
            .entry(pod_grant_name(grant))
            .or_default()
            .push(grant);
    }
    for (name, grants) in egress_to_pods {
        let egress = grants
            .iter()
            .map(|grant| NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    pod_selector: Some(selector::label_selector(&grant.pod.selector)),
                    ip_block: None,
                    namespace_selector: None,
                }]),
                ports: egress_pod_ports(grant),
            })
            .collect();
        insert(
            &mut objects,
            &rule.source.name,
            name,
            NetworkPolicySpec {
                pod_selector: source_selector.clone(),
                policy_types: Some(vec!["Egress".to_string()]),
                ingress: None,
                egress: Some(egress),
            },
        )?;
    }

    let mut egress_to_hosts: BTreeMap<String, Vec<&Host>> = BTreeMap::new();
    for host in &rule.allowed_hosts {
        egress_to_hosts
            .entry(host.policy.clone())
            .or_default()
            .push(host);
    }
    for (name, hosts) in egress_to_hosts {
        let egress = hosts
            .iter()
            .map(|host| NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    ip_block: Some(IPBlock {
                        cidr: host.cidr(),
                        except: if host.except.is_empty() {
                            None
                        } else {
                            Some(host.except.clone())
                        },
                    }),
                    pod_selector: None,
                    namespace_selector: None,
                }]),
                ports: host.port.map(|port| {
                    vec![NetworkPolicyPort {
                        port: Some(IntOrString::Int(port.into())),
                        protocol: Some(host.protocol.as_str().to_string()),
                        end_port: None,
                    }]
                }),
            })
            .collect();
        insert(
            &mut objects,
            &rule.source.name,
            name,
            NetworkPolicySpec {
                pod_selector: source_selector.clone(),
                policy_types: Some(vec!["Egress".to_string()]),
                ingress: None,
                egress: Some(egress),
            },
        )?;
    }

    let mut ingress_from_pods: BTreeMap<String, Vec<NetworkPolicyIngressRule>> = BTreeMap::new();
    for grant in &rule.ingress {
        ingress_from_pods
            .entry(format!("allow-from-{}", grant.peer.from_alias))
            .or_default()
            .push(NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    pod_selector: Some(selector::label_selector(&grant.peer.selector)),
                    ip_block: None,
                    namespace_selector: None,
                }]),
                ports: grant.port.as_ref().map(|port| vec![named_port(port)]),
            });
    }
    for (name, ingress) in ingress_from_pods {
        insert(
            &mut objects,
            &rule.source.name,
            name,
            NetworkPolicySpec {
                pod_selector: source_selector.clone(),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(ingress),
                egress: None,
            },
        )?;
    }

    if rule.allow_from_all {
        let ports: Vec<NetworkPolicyPort> = rule
            .source
            .ports
            .iter()
            .map(|port| NetworkPolicyPort {
                port: Some(IntOrString::Int(port.number.into())),
                protocol: Some(port.protocol.as_str().to_string()),
                end_port: None,
            })
            .collect();
        insert(
            &mut objects,
            &rule.source.name,
            format!("allow-{}", rule.source.from_alias),
            NetworkPolicySpec {
                pod_selector: source_selector,
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    // An empty namespace selector admits peers from every
                    // namespace.
                    from: Some(vec![NetworkPolicyPeer {
                        namespace_selector: Some(Default::default()),
                        pod_selector: None,
                        ip_block: None,
                    }]),
                    ports: if ports.is_empty() { None } else { Some(ports) },
                }]),
                egress: None,
            },
        )?;
    }

    Ok(objects.into_values().collect())
}

/// The manifest-name set [`compile`] produces for this rule.
pub fn policy_names(rule: &Rule) -> Result<BTreeSet<String>, CompileError> {
    let objects = compile(rule)?;
    Ok(objects
        .into_iter()
        .filter_map(|object| object.metadata.name)
        .collect())
}

fn insert(
    objects: &mut BTreeMap<String, NetworkPolicy>,
    source: &str,
    name: String,
    spec: NetworkPolicySpec,
) -> Result<(), CompileError> {
    let object = NetworkPolicy {
        metadata: metadata(&name),
        spec: Some(spec),
    };
    if objects.insert(name.clone(), object).is_some() {
        return Err(CompileError::DuplicateManifest {
            subject: source.to_string(),
            name,
        });
    }
    Ok(())
}

fn pod_grant_name(grant: &PodGrant) -> String {
    match &grant.port {
        Some(port) => format!("allow-to-{}-{}", grant.pod.reach_alias, port.name),
        None => format!("allow-to-{}", grant.pod.reach_alias),
    }
}

fn egress_pod_ports(grant: &PodGrant) -> Option<Vec<NetworkPolicyPort>> {
    if let Some(port) = &grant.port {
        return Some(vec![named_port(port)]);
    }
    if grant.pod.ports.is_empty() {
        return None;
    }
    Some(
        grant
            .pod
            .ports
            .iter()
            .map(|port| NetworkPolicyPort {
                port: Some(IntOrString::Int(port.number.into())),
                protocol: Some(port.protocol.as_str().to_string()),
                end_port: None,
            })
            .collect(),
    )
}

/// Named ports resolve against each selected pod's own declaration, so a
/// merged grant can never open a port its target does not declare.
fn named_port(port: &Port) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::String(port.name.clone())),
        protocol: Some(port.protocol.as_str().to_string()),
        end_port: None,
    }
}

fn metadata(name: &str) -> ObjectMeta {
    let (key, value) = MANAGED_BY;
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(
            Some((key.to_string(), value.to_string()))
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;
    use trellis_netpol_core::{Host, Labels, Port, Registry, RuleBuilder, SourcePod};

    struct Fixture {
        registry: Registry,
        pods: Vec<trellis_netpol_core::PodId>,
        hosts: Vec<trellis_netpol_core::HostId>,
    }

    fn fixture() -> Fixture {
        let mut registry = Registry::new();
        let apiserver = registry
            .register_pod(
                SourcePod::new(
                    "kube-apiserver",
                    Labels::from_iter(vec![("app", "kubernetes"), ("role", "apiserver")]),
                    vec![Port::tcp("https", 443)],
                )
                .reached_as("shoot-apiserver"),
            )
            .unwrap();
        let collector = registry
            .register_pod(SourcePod::new(
                "prometheus",
                Labels::from_iter(Some(("app", "prometheus"))),
                vec![Port::tcp("web", 9090)],
            ))
            .unwrap();
        let index = registry
            .register_pod(
                SourcePod::new(
                    "elasticsearch-logging",
                    Labels::from_iter(Some(("app", "elasticsearch-logging"))),
                    vec![Port::tcp("http", 9200), Port::tcp("metrics", 9114)],
                )
                .reached_as("elasticsearch")
                .known_from("elasticsearch"),
            )
            .unwrap();
        let dns = registry
            .register_host(Host::new("Cluster DNS", "0.0.0.0/0", 53, "allow-to-dns").udp())
            .unwrap();
        let private_a = registry
            .register_host(Host::any_port(
                "Private networks (class A)",
                "10.0.0.0/8",
                "allow-to-private-networks",
            ))
            .unwrap();
        let private_b = registry
            .register_host(Host::any_port(
                "Private networks (class B)",
                "172.16.0.0/12",
                "allow-to-private-networks",
            ))
            .unwrap();
        Fixture {
            registry,
            pods: vec![apiserver, collector, index],
            hosts: vec![dns, private_a, private_b],
        }
    }

    #[test]
    fn denies_compile_to_a_bare_default_deny() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        assert_eq!(objects.len(), 1);
        let deny = &objects[0];
        assert_eq!(deny.metadata.name.as_deref(), Some(DENY_ALL));
        let spec = deny.spec.as_ref().unwrap();
        assert_eq!(
            spec.policy_types,
            Some(vec!["Ingress".to_string(), "Egress".to_string()])
        );
        assert!(spec.ingress.is_none());
        assert!(spec.egress.is_none());
        assert_eq!(
            spec.pod_selector.match_labels.as_ref().unwrap().get("app"),
            Some(&"prometheus".to_string())
        );
    }

    #[test]
    fn whole_pod_grants_open_every_declared_target_port() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_pod([f.pods[0]])
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        let to_apiserver = objects
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some("allow-to-shoot-apiserver"))
            .expect("an egress manifest per allowed pod");
        let egress = to_apiserver.spec.as_ref().unwrap().egress.as_ref().unwrap();
        assert_eq!(egress.len(), 1);
        assert_eq!(
            egress[0].ports.as_ref().unwrap()[0].port,
            Some(IntOrString::Int(443))
        );
    }

    #[test]
    fn narrowed_grants_use_the_named_target_port() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_target_pod(f.pods[2].from_port("metrics"))
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        let narrowed = objects
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some("allow-to-elasticsearch-metrics"))
            .expect("narrowed grants carry the port in the manifest name");
        let egress = narrowed.spec.as_ref().unwrap().egress.as_ref().unwrap();
        assert_eq!(
            egress[0].ports.as_ref().unwrap()[0].port,
            Some(IntOrString::String("metrics".to_string()))
        );
    }

    #[test]
    fn hosts_sharing_a_policy_merge_into_one_manifest() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_host([f.hosts[1], f.hosts[2]])
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        let private = objects
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some("allow-to-private-networks"))
            .unwrap();
        let egress = private.spec.as_ref().unwrap().egress.as_ref().unwrap();
        let cidrs: Vec<&str> = egress
            .iter()
            .map(|rule| {
                rule.to.as_ref().unwrap()[0]
                    .ip_block
                    .as_ref()
                    .unwrap()
                    .cidr
                    .as_str()
            })
            .collect();
        assert_eq!(cidrs, vec!["10.0.0.0/8", "172.16.0.0/12"]);
        assert!(egress.iter().all(|rule| rule.ports.is_none()));
    }

    #[test]
    fn dns_hosts_carry_port_and_protocol() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_host([f.hosts[0]])
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        let dns = objects
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some("allow-to-dns"))
            .unwrap();
        let ports = dns.spec.as_ref().unwrap().egress.as_ref().unwrap()[0]
            .ports
            .as_ref()
            .unwrap();
        assert_eq!(ports[0].port, Some(IntOrString::Int(53)));
        assert_eq!(ports[0].protocol.as_deref(), Some("UDP"));
    }

    #[test]
    fn ingress_allowances_are_port_scoped_per_peer() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[2])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_from_pod_port(f.pods[1], "metrics")
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        let from = objects
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some("allow-from-prometheus"))
            .unwrap();
        let spec = from.spec.as_ref().unwrap();
        assert_eq!(spec.policy_types, Some(vec!["Ingress".to_string()]));
        let ingress = spec.ingress.as_ref().unwrap();
        assert_eq!(
            ingress[0].ports.as_ref().unwrap()[0].port,
            Some(IntOrString::String("metrics".to_string()))
        );
        let peer = &ingress[0].from.as_ref().unwrap()[0];
        assert_eq!(
            peer.pod_selector
                .as_ref()
                .unwrap()
                .match_labels
                .as_ref()
                .unwrap()
                .get("app"),
            Some(&"prometheus".to_string())
        );
    }

    #[test]
    fn unnarrowed_ingress_allowances_leave_ports_open() {
        let f = fixture();
        let rule = RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[0])
            .deny_pod(f.pods.iter().copied())
            .deny_host(f.hosts.iter().copied())
            .allow_from_pod([f.pods[1]])
            .build()
            .unwrap();

        let objects = compile(&rule).unwrap();
        let from = objects
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some("allow-from-prometheus"))
            .unwrap();
        let ingress = from.spec.as_ref().unwrap().ingress.as_ref().unwrap();
        assert!(ingress[0].ports.is_none());
    }

    #[test]
    fn compilation_is_deterministic_across_runs() {
        let f = fixture();
        let build = || {
            RuleBuilder::new(&f.registry, &f.pods, &f.hosts, f.pods[1])
                .deny_pod(f.pods.iter().copied())
                .deny_host(f.hosts.iter().copied())
                .allow_pod([f.pods[0]])
                .allow_target_pod(f.pods[2].from_port("metrics"))
                .allow_host(f.hosts.iter().copied().skip(1))
                .build()
                .unwrap()
        };
        let first = serde_json::to_string(&compile(&build()).unwrap()).unwrap();
        let second = serde_json::to_string(&compile(&build()).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}
