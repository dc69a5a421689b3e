use semver::Version;
use thiserror::Error;

/// A single-comparator version gate, e.g. `"< 1.13"` or `">= 1.13"`.
///
/// Version-gated pod pairs carry mutually exclusive constraints so that
/// exactly one member of the pair is active for any concrete cluster
/// version. Minor-only versions such as `"1.13"` are read as `1.13.0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionConstraint {
    op: Op,
    version: Version,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Op {
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Exact,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty version constraint")]
    Empty,

    #[error("version constraint {0:?} must start with one of <, <=, >, >=, =")]
    UnknownOperator(String),

    #[error("invalid version in constraint {0:?}")]
    InvalidVersion(String),
}

// === impl VersionConstraint ===

impl VersionConstraint {
    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Less => version < &self.version,
            Op::LessEq => version <= &self.version,
            Op::Greater => version > &self.version,
            Op::GreaterEq => version >= &self.version,
            Op::Exact => version == &self.version,
        }
    }

    /// True when no cluster version satisfies both constraints.
    pub fn excludes(&self, other: &Self) -> bool {
        use Op::*;
        match (self.op, other.op) {
            (Less, GreaterEq) | (LessEq, Greater) => self.version <= other.version,
            (GreaterEq, Less) | (Greater, LessEq) => self.version >= other.version,
            (Less, Greater) => self.version <= other.version,
            (Greater, Less) => self.version >= other.version,
            (Exact, _) => !other.matches(&self.version),
            (_, Exact) => !self.matches(&other.version),
            _ => false,
        }
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (op, rest) = if let Some(rest) = s.strip_prefix("<=") {
            (Op::LessEq, rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (Op::GreaterEq, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (Op::Less, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (Op::Greater, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (Op::Exact, rest)
        } else {
            return Err(VersionError::UnknownOperator(s.to_string()));
        };

        let version = parse_lenient(rest.trim()).ok_or_else(|| VersionError::InvalidVersion(s.to_string()))?;
        Ok(Self { op, version })
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            Op::Less => "<",
            Op::LessEq => "<=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Exact => "=",
        };
        if self.version.patch == 0 {
            write!(f, "{} {}.{}", op, self.version.major, self.version.minor)
        } else {
            write!(f, "{} {}", op, self.version)
        }
    }
}

/// Accepts `major.minor` as well as full `major.minor.patch` versions.
fn parse_lenient(s: &str) -> Option<Version> {
    if s.is_empty() {
        return None;
    }
    let mut parts = s.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if parts.next().is_some() {
        return None;
    }
    Some(Version::new(major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(s: &str) -> VersionConstraint {
        s.parse().unwrap()
    }

    #[test]
    fn parses_all_operators() {
        for (spec, version, matches) in &[
            ("< 1.13", Version::new(1, 12, 8), true),
            ("< 1.13", Version::new(1, 13, 0), false),
            (">= 1.13", Version::new(1, 13, 0), true),
            (">= 1.13", Version::new(1, 12, 9), false),
            ("<= 1.13", Version::new(1, 13, 0), true),
            ("> 1.13", Version::new(1, 13, 4), true),
            ("= 1.13", Version::new(1, 13, 0), true),
            ("= 1.13", Version::new(1, 13, 1), false),
            (">=1.13.2", Version::new(1, 13, 2), true),
        ] {
            assert_eq!(constraint(spec).matches(version), *matches, "{} vs {}", spec, version);
        }
    }

    #[test]
    fn rejects_malformed_constraints() {
        assert_eq!("".parse::<VersionConstraint>(), Err(VersionError::Empty));
        assert!(matches!(
            "1.13".parse::<VersionConstraint>(),
            Err(VersionError::UnknownOperator(_))
        ));
        assert!(matches!(
            "< one.two".parse::<VersionConstraint>(),
            Err(VersionError::InvalidVersion(_))
        ));
        assert!(matches!(
            "<".parse::<VersionConstraint>(),
            Err(VersionError::InvalidVersion(_))
        ));
    }

    #[test]
    fn version_gated_pair_is_mutually_exclusive() {
        let http = constraint("< 1.13");
        let https = constraint(">= 1.13");
        assert!(http.excludes(&https));
        assert!(https.excludes(&http));

        for v in [Version::new(1, 11, 0), Version::new(1, 13, 0), Version::new(1, 16, 3)] {
            let active = [&http, &https].iter().filter(|c| c.matches(&v)).count();
            assert_eq!(active, 1, "exactly one variant active at {}", v);
        }
    }

    #[test]
    fn overlapping_constraints_are_not_exclusive() {
        assert!(!constraint("< 1.14").excludes(&constraint(">= 1.13")));
        assert!(!constraint("> 1.10").excludes(&constraint("> 1.12")));
    }

    #[test]
    fn displays_in_canonical_form() {
        assert_eq!(constraint("<1.13").to_string(), "< 1.13");
        assert_eq!(constraint(">= 1.13").to_string(), ">= 1.13");
    }
}
