use crate::{
    compile::{compile, CompileError},
    selector::opt_in_label,
    DENY_ALL,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use std::collections::BTreeMap;
use thiserror::Error;
use trellis_netpol_core::Rule;

#[derive(Debug, Error)]
pub enum NamespaceCompileError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("manifests named {name:?} disagree between the rules for {left:?} and {right:?}")]
    Conflicting {
        name: String,
        left: String,
        right: String,
    },

    #[error("failed to canonicalize manifest content: {0}")]
    Canonicalize(#[from] serde_json::Error),
}

/// Renders the manifest union a reconciler applies to one control-plane
/// namespace.
///
/// Identically named manifests from different rules collapse into a single
/// canonical object: `deny-all` selects every pod in the namespace, the
/// `allow-to-*`/`allow-from-*` objects select workloads by the opt-in label
/// derived from their name, and per-source carve-outs keep the source's own
/// selector. Rule content merges by union; since grants are port-scoped by
/// named ports, a merged object never opens a port a selected pod does not
/// declare.
pub fn compile_namespace(rules: &[Rule]) -> Result<Vec<NetworkPolicy>, NamespaceCompileError> {
    let mut merged: BTreeMap<String, (String, NetworkPolicy)> = BTreeMap::new();

    for rule in rules {
        for object in compile(rule)? {
            use std::collections::btree_map::Entry;

            let name = object.metadata.name.clone().unwrap_or_default();
            let canonical = canonicalize(&name, object);

            match merged.entry(name) {
                Entry::Vacant(entry) => {
                    entry.insert((rule.source.name.clone(), canonical));
                }
                Entry::Occupied(mut entry) => {
                    let (first_source, existing) = entry.get_mut();
                    merge_into(existing, canonical).map_err(|name| {
                        NamespaceCompileError::Conflicting {
                            name,
                            left: first_source.clone(),
                            right: rule.source.name.clone(),
                        }
                    })?;
                }
            }
        }
    }

    merged
        .into_values()
        .map(|(_, mut object)| {
            sort_rules(&mut object)?;
            Ok(object)
        })
        .collect()
}

/// Swaps a per-source manifest's selector for the shared namespace-union
/// form.
fn canonicalize(name: &str, mut object: NetworkPolicy) -> NetworkPolicy {
    let Some(spec) = object.spec.as_mut() else {
        return object;
    };

    if name == DENY_ALL {
        // Baseline default-deny for the whole namespace.
        spec.pod_selector = Default::default();
        spec.ingress = None;
        spec.egress = None;
        return object;
    }

    if let Some((key, value)) = opt_in_label(name) {
        spec.pod_selector.match_labels = Some(Some((key, value)).into_iter().collect());
        spec.pod_selector.match_expressions = None;
    }
    object
}

/// Unions another manifest's rule lists into an existing one. Errors with
/// the manifest name when the two disagree on selector or policy types.
fn merge_into(existing: &mut NetworkPolicy, incoming: NetworkPolicy) -> Result<(), String> {
    let name = incoming.metadata.name.clone().unwrap_or_default();
    let (Some(spec), Some(new)) = (existing.spec.as_mut(), incoming.spec) else {
        return Err(name);
    };
    if spec.pod_selector != new.pod_selector || spec.policy_types != new.policy_types {
        return Err(name);
    }

    if let Some(rules) = new.ingress {
        spec.ingress.get_or_insert_with(Vec::new).extend(rules);
    }
    if let Some(rules) = new.egress {
        spec.egress.get_or_insert_with(Vec::new).extend(rules);
    }
    Ok(())
}

/// Deduplicates and orders rule lists by their serialized form so the union
/// is byte-identical regardless of rule order.
fn sort_rules(object: &mut NetworkPolicy) -> Result<(), NamespaceCompileError> {
    let Some(spec) = object.spec.as_mut() else {
        return Ok(());
    };
    if let Some(rules) = spec.ingress.take() {
        spec.ingress = Some(dedup_by_content(rules)?);
    }
    if let Some(rules) = spec.egress.take() {
        spec.egress = Some(dedup_by_content(rules)?);
    }
    Ok(())
}

fn dedup_by_content<T: serde::Serialize>(rules: Vec<T>) -> Result<Vec<T>, NamespaceCompileError> {
    let mut keyed: BTreeMap<String, T> = BTreeMap::new();
    for rule in rules {
        keyed.insert(serde_json::to_string(&rule)?, rule);
    }
    Ok(keyed.into_values().collect())
}
