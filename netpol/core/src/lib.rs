//! Core model of the seed network-isolation policy engine.
//!
//! A managed cluster's control plane runs as ordinary workloads inside one
//! namespace of a shared seed cluster. This crate defines the vocabulary for
//! describing that topology and the rule algebra that resolves it into a
//! total allow/deny relation:
//!
//! - [`SourcePod`], [`Port`], and [`Host`] describe the registered workloads
//!   and external endpoints.
//! - A [`Registry`] owns all definitions for one catalogue; entries are
//!   referenced through copyable [`PodId`]/[`HostId`] handles so definition
//!   order can never create a reference cycle.
//! - A [`RuleBuilder`] layers targeted allows over a baseline deny and
//!   finalizes into an immutable [`Rule`], asserting that every registered
//!   entity ends up classified exactly once.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod defect;
pub mod labels;
mod registry;
mod rule;
mod topology;
mod version;

pub use self::{
    defect::CatalogueDefect,
    labels::Labels,
    registry::{HostId, PodId, Registry},
    rule::{IngressGrant, PodGrant, Rule, RuleBuilder},
    topology::{Host, PodPortRef, Port, Protocol, SourcePod},
    version::{VersionConstraint, VersionError},
};
