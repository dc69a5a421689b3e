//! Compiles resolved [`Rule`]s into Kubernetes `NetworkPolicy` manifests.
//!
//! Two output shapes are provided. [`compile`] renders the manifests one rule
//! requires, each selecting the rule's source pod; this is the form whose
//! name set must equal the rule's declared expectation. [`compile_namespace`]
//! renders the union a reconciler applies to a control-plane namespace, in
//! which identically named manifests collapse into one canonical object that
//! selects workloads through stable opt-in labels.
//!
//! Compilation is pure and deterministic: the same input yields byte-identical
//! serialized output in any process. Denied entries never produce manifest
//! content; under the platform's "no matching rule means blocked" semantics,
//! absence of a manifest is the enforcement of a deny.
//!
//! [`Rule`]: trellis_netpol_core::Rule

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod compile;
mod namespace;
mod selector;

pub use self::{
    compile::{compile, policy_names, CompileError},
    namespace::{compile_namespace, NamespaceCompileError},
    selector::{effective_labels, opt_in_label, selector_matches},
};

/// Name of the baseline manifest establishing default-deny for a source.
pub const DENY_ALL: &str = "deny-all";

/// Label prefix for the opt-in labels carried by workloads in the
/// namespace-union manifest shape.
pub const OPT_IN_LABEL_PREFIX: &str = "netpol.trellis.dev/";

/// Value of every opt-in label.
pub const OPT_IN_ALLOWED: &str = "allowed";

/// Management label stamped on every compiled manifest.
pub const MANAGED_BY: (&str, &str) = ("app.kubernetes.io/managed-by", "trellis-netpol");
