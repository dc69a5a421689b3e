//! Verifies that the manifests present in a cluster match each rule's
//! declared expectation set.
//!
//! The validator is the only component touching external I/O. Per-pod checks
//! are independent: they run concurrently under a worker bound, a failed or
//! timed-out query never aborts sibling checks, and a query failure is
//! reported as its own outcome rather than as a clean pass. There is no
//! retry; a flaky dependency should surface as inconclusive, not be masked
//! by a second attempt that happens to succeed.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod report;

pub use self::report::{Outcome, PodCheck, Report};

use anyhow::Result;
use futures::{stream, StreamExt};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{api::ListParams, Api, ResourceExt};
use std::collections::BTreeSet;
use tokio::{sync::watch, time};
use tracing::{debug, info_span, Instrument};
use trellis_netpol_core::{CatalogueDefect, Rule};
use trellis_netpol_k8s::{effective_labels, selector_matches};
use trellis_netpol_providers::ProviderCatalogue;

/// Lists the network-policy manifests of a namespace.
///
/// Implemented for [`kube::Client`]; test harnesses provide an in-memory
/// implementation to validate against a simulated cluster.
#[async_trait::async_trait]
pub trait ClusterPolicies {
    async fn list_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>>;
}

#[async_trait::async_trait]
impl ClusterPolicies for kube::Client {
    async fn list_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>> {
        let api = Api::<NetworkPolicy>::namespaced(self.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// Checks one provider's catalogue against a live or simulated cluster.
#[derive(Clone, Debug)]
pub struct Validator {
    namespace: String,
    concurrency: usize,
    list_timeout: time::Duration,
}

// === impl Validator ===

impl Validator {
    const DEFAULT_CONCURRENCY: usize = 8;
    const DEFAULT_LIST_TIMEOUT: time::Duration = time::Duration::from_secs(30);

    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            concurrency: Self::DEFAULT_CONCURRENCY,
            list_timeout: Self::DEFAULT_LIST_TIMEOUT,
        }
    }

    /// Bounds the number of concurrently running per-pod checks.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Bounds the time a single List call may take before the check is
    /// reported inconclusive.
    pub fn with_list_timeout(mut self, timeout: time::Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Runs every per-pod check to completion and aggregates the outcomes.
    ///
    /// Signalling `shutdown` promptly stops outstanding checks; the partial
    /// report is returned with [`Report::complete`] unset so it cannot be
    /// mistaken for a clean run.
    pub async fn validate<C>(
        &self,
        cluster: &C,
        catalogue: &dyn ProviderCatalogue,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Report, CatalogueDefect>
    where
        C: ClusterPolicies + Sync,
    {
        let provider = catalogue.provider();
        let rules = catalogue.to_sources()?;
        debug!(%provider, rules = rules.len(), "validating");

        let mut checks = stream::iter(rules.into_iter().map(|rule| {
            let pod = rule.source.name.clone();
            self.check_rule(cluster, rule)
                .instrument(info_span!("check", %provider, %pod))
        }))
        .buffer_unordered(self.concurrency);

        let stopped = async move {
            // A dropped sender means shutdown can no longer be requested.
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                futures::future::pending::<()>().await;
            }
        };
        tokio::pin!(stopped);

        let mut entries = Vec::new();
        let mut complete = true;
        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    debug!(%provider, "shutdown requested, returning partial report");
                    complete = false;
                    break;
                }
                next = checks.next() => match next {
                    Some(check) => entries.push(check),
                    None => break,
                },
            }
        }
        entries.sort_by(|a, b| a.pod.cmp(&b.pod));

        Ok(Report {
            provider: provider.to_string(),
            complete,
            checks: entries,
        })
    }

    async fn check_rule<C>(&self, cluster: &C, rule: Rule) -> PodCheck
    where
        C: ClusterPolicies + Sync,
    {
        let labels = effective_labels(&rule.source);
        let listed = time::timeout(self.list_timeout, cluster.list_policies(&self.namespace)).await;

        let outcome = match listed {
            Err(_) => Outcome::QueryFailed {
                reason: format!("listing policies timed out after {:?}", self.list_timeout),
            },
            Ok(Err(error)) => Outcome::QueryFailed {
                reason: format!("{:#}", error),
            },
            Ok(Ok(policies)) => {
                let actual: BTreeSet<String> = policies
                    .iter()
                    .filter(|policy| {
                        policy
                            .spec
                            .as_ref()
                            .map_or(false, |spec| selector_matches(&spec.pod_selector, &labels))
                    })
                    .map(|policy| policy.name_any())
                    .collect();

                let missing: BTreeSet<String> = rule
                    .expected_policies
                    .difference(&actual)
                    .cloned()
                    .collect();
                let unexpected: BTreeSet<String> =
                    actual.difference(&rule.expected_policies).cloned().collect();

                if missing.is_empty() && unexpected.is_empty() {
                    Outcome::Passed
                } else {
                    Outcome::Mismatch { missing, unexpected }
                }
            }
        };

        debug!(pod = %rule.source.name, ?outcome, "checked");
        PodCheck {
            pod: rule.source.name,
            outcome,
        }
    }
}
