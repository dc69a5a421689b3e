use crate::version::VersionError;
use thiserror::Error;

/// A fatal, construction-time defect in a provider catalogue.
///
/// These are programming errors in the catalogue definitions, not runtime
/// conditions; catalogue construction aborts on the first one.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogueDefect {
    #[error("pod {pod:?} referenced by the rule for {subject:?} is not in the registered universe")]
    DanglingPod { subject: String, pod: String },

    #[error("host {host:?} referenced by the rule for {subject:?} is not in the registered universe")]
    DanglingHost { subject: String, host: String },

    #[error("pod {pod:?} is neither allowed nor denied for source {subject:?}")]
    UnclassifiedPod { subject: String, pod: String },

    #[error("host {host:?} is neither allowed nor denied for source {subject:?}")]
    UnclassifiedHost { subject: String, host: String },

    #[error("{entity:?} is explicitly allowed for source {subject:?} and cannot also be denied")]
    DenyAfterAllow { subject: String, entity: String },

    #[error("a pod named {0:?} is already registered")]
    DuplicatePod(String),

    #[error("a host with identity {0:?} is already registered")]
    DuplicateHost(String),

    #[error("pod {pod:?} declares no port named {port:?}")]
    UnknownPort { pod: String, port: String },

    #[error("pod {pod:?} declares port {port:?} more than once")]
    DuplicatePort { pod: String, port: String },

    #[error("host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("pod {pod:?}: {error}")]
    InvalidVersion { pod: String, error: VersionError },
}
