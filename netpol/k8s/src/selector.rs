use crate::{DENY_ALL, OPT_IN_ALLOWED, OPT_IN_LABEL_PREFIX};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use trellis_netpol_core::{Labels, SourcePod};

pub(crate) fn label_selector(labels: &Labels) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels.as_ref().clone()),
        match_expressions: None,
    }
}

/// The opt-in label a workload carries for one granted manifest name.
///
/// `deny-all` selects every pod and the `allow-<pod>` carve-outs select by
/// the workload's own labels, so neither contributes an opt-in label.
pub fn opt_in_label(policy_name: &str) -> Option<(String, String)> {
    if policy_name == DENY_ALL {
        return None;
    }
    let suffix = policy_name.strip_prefix("allow-")?;
    if !suffix.starts_with("to-") && !suffix.starts_with("from-") {
        return None;
    }
    Some((
        format!("{}{}", OPT_IN_LABEL_PREFIX, suffix),
        OPT_IN_ALLOWED.to_string(),
    ))
}

/// The label set a live workload carries: its own selector labels plus the
/// opt-ins derived from its declared manifest names. The reconciler stamps
/// these on the workload; the validator matches manifest selectors against
/// them.
pub fn effective_labels(pod: &SourcePod) -> Labels {
    pod.selector.extended(
        pod.expected_policies
            .iter()
            .filter_map(|name| opt_in_label(name)),
    )
}

/// Whether a manifest's pod selector matches the given label set. An empty
/// selector matches every pod; an unknown expression operator matches none.
pub fn selector_matches(selector: &LabelSelector, labels: &Labels) -> bool {
    if let Some(required) = &selector.match_labels {
        if !labels.contains_all(required) {
            return false;
        }
    }

    for expr in selector.match_expressions.iter().flatten() {
        let value = labels.get(&expr.key);
        let values = expr.values.as_deref().unwrap_or(&[]);
        let matched = match expr.operator.as_str() {
            "In" => value.is_some_and(|v| values.iter().any(|x| x == v)),
            "NotIn" => value.map_or(true, |v| !values.iter().any(|x| x == v)),
            "Exists" => value.is_some(),
            "DoesNotExist" => value.is_none(),
            _ => false,
        };
        if !matched {
            return false;
        }
    }

    true
}
