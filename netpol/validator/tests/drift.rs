//! Drift detection against a simulated cluster.

use anyhow::Result;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use maplit::{btreemap, convert_args};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;
use trellis_netpol_k8s::compile_namespace;
use trellis_netpol_providers::{Provider, ProviderCatalogue};
use trellis_netpol_validator::{ClusterPolicies, Outcome, Validator};

const NAMESPACE: &str = "shoot--garden--drift";

/// An in-memory cluster: manifests keyed by namespace, with optional
/// injected outages.
#[derive(Default)]
struct SimulatedCluster {
    policies: BTreeMap<String, Vec<NetworkPolicy>>,
    fail_once: AtomicBool,
    hang: bool,
}

impl SimulatedCluster {
    fn seeded(namespace: &str, policies: Vec<NetworkPolicy>) -> Self {
        Self {
            policies: Some((namespace.to_string(), policies)).into_iter().collect(),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl ClusterPolicies for SimulatedCluster {
    async fn list_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail_once.swap(false, Ordering::SeqCst) {
            anyhow::bail!("simulated API outage");
        }
        Ok(self.policies.get(namespace).cloned().unwrap_or_default())
    }
}

fn openstack_union() -> (Box<dyn ProviderCatalogue>, Vec<NetworkPolicy>) {
    let catalogue = Provider::OpenStack.catalogue().unwrap();
    let rules = catalogue.to_sources().unwrap();
    let union = compile_namespace(&rules).unwrap();
    (catalogue, union)
}

fn no_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the sender alive for the duration of the test.
    std::mem::forget(tx);
    rx
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "trellis=trace,debug".parse().unwrap()),
            )
            .finish(),
    )
}

#[tokio::test]
async fn a_cluster_holding_the_compiled_union_passes() {
    let _tracing = init_tracing();
    let (catalogue, union) = openstack_union();
    let cluster = SimulatedCluster::seeded(NAMESPACE, union);

    let report = Validator::new(NAMESPACE)
        .validate(&cluster, catalogue.as_ref(), no_shutdown())
        .await
        .unwrap();

    assert!(report.complete);
    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.checks.len(), catalogue.all_pods().len());
}

#[tokio::test]
async fn one_missing_manifest_is_reported_for_exactly_one_pod() {
    let _tracing = init_tracing();
    let (catalogue, union) = openstack_union();
    let thinned: Vec<NetworkPolicy> = union
        .into_iter()
        .filter(|o| o.metadata.name.as_deref() != Some("allow-to-elasticsearch-http"))
        .collect();
    let cluster = SimulatedCluster::seeded(NAMESPACE, thinned);

    let report = Validator::new(NAMESPACE)
        .with_concurrency(4)
        .validate(&cluster, catalogue.as_ref(), no_shutdown())
        .await
        .unwrap();

    assert!(!report.passed());
    for check in &report.checks {
        if check.pod == "kibana-logging" {
            assert_eq!(
                check.outcome,
                Outcome::Mismatch {
                    missing: Some("allow-to-elasticsearch-http".to_string())
                        .into_iter()
                        .collect(),
                    unexpected: Default::default(),
                },
            );
        } else {
            assert_eq!(check.outcome, Outcome::Passed, "{}", check.pod);
        }
    }
}

#[tokio::test]
async fn a_stray_manifest_is_reported_as_unexpected() {
    let _tracing = init_tracing();
    let (catalogue, mut union) = openstack_union();
    union.push(NetworkPolicy {
        metadata: kube::api::ObjectMeta {
            name: Some("allow-debug-shell".to_string()),
            ..Default::default()
        },
        spec: Some(k8s_openapi::api::networking::v1::NetworkPolicySpec {
            pod_selector: k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
                match_labels: Some(convert_args!(btreemap!(
                    "app" => "kibana-logging",
                ))),
                match_expressions: None,
            },
            ..Default::default()
        }),
    });
    let cluster = SimulatedCluster::seeded(NAMESPACE, union);

    let report = Validator::new(NAMESPACE)
        .validate(&cluster, catalogue.as_ref(), no_shutdown())
        .await
        .unwrap();

    let kibana = report
        .checks
        .iter()
        .find(|c| c.pod == "kibana-logging")
        .unwrap();
    assert_eq!(
        kibana.outcome,
        Outcome::Mismatch {
            missing: Default::default(),
            unexpected: Some("allow-debug-shell".to_string()).into_iter().collect(),
        },
    );
    assert_eq!(report.mismatches().count(), 1);
}

#[tokio::test]
async fn a_query_failure_does_not_abort_sibling_checks() {
    let _tracing = init_tracing();
    let (catalogue, union) = openstack_union();
    let cluster = SimulatedCluster {
        fail_once: AtomicBool::new(true),
        ..SimulatedCluster::seeded(NAMESPACE, union)
    };

    let report = Validator::new(NAMESPACE)
        .with_concurrency(4)
        .validate(&cluster, catalogue.as_ref(), no_shutdown())
        .await
        .unwrap();

    assert!(report.complete);
    assert!(!report.passed());
    assert_eq!(report.query_failures().count(), 1);
    assert_eq!(report.mismatches().count(), 0);
    let passed = report
        .checks
        .iter()
        .filter(|c| c.outcome == Outcome::Passed)
        .count();
    assert_eq!(passed, catalogue.all_pods().len() - 1);

    let failure = report.query_failures().next().unwrap();
    match &failure.outcome {
        Outcome::QueryFailed { reason } => assert!(reason.contains("simulated API outage")),
        outcome => panic!("unexpected outcome {:?}", outcome),
    }
}

#[tokio::test(start_paused = true)]
async fn a_hanging_query_times_out_as_inconclusive() {
    let _tracing = init_tracing();
    let (catalogue, _) = openstack_union();
    let cluster = SimulatedCluster {
        hang: true,
        ..Default::default()
    };

    let report = Validator::new(NAMESPACE)
        .with_list_timeout(std::time::Duration::from_millis(50))
        .validate(&cluster, catalogue.as_ref(), no_shutdown())
        .await
        .unwrap();

    assert!(report.complete);
    assert_eq!(report.query_failures().count(), report.checks.len());
    assert!(report
        .query_failures()
        .all(|c| matches!(&c.outcome, Outcome::QueryFailed { reason } if reason.contains("timed out"))));
}

#[tokio::test]
async fn shutdown_returns_a_partial_report() {
    let _tracing = init_tracing();
    let (catalogue, union) = openstack_union();
    let cluster = SimulatedCluster::seeded(NAMESPACE, union);

    let (tx, rx) = watch::channel(true);
    let report = Validator::new(NAMESPACE)
        .validate(&cluster, catalogue.as_ref(), rx)
        .await
        .unwrap();
    drop(tx);

    assert!(!report.complete);
    assert!(!report.passed());
}
