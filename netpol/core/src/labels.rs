use std::{collections::BTreeMap, sync::Arc};

/// An immutable, shared label map.
#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

// === impl Labels ===

impl Labels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn contains_all(&self, other: &Map) -> bool {
        other.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns a copy of this label set extended with additional entries.
    pub fn extended(&self, extra: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut map = Map::clone(&self.0);
        map.extend(extra);
        Self(Arc::new(map))
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_contains_all() {
        for (labels, subset, contains, msg) in &[
            (Labels::default(), Map::new(), true, "empty subset"),
            (
                Labels::from_iter(vec![("app", "etcd"), ("role", "main")]),
                Map::from_iter([("app".to_string(), "etcd".to_string())]),
                true,
                "proper subset",
            ),
            (
                Labels::from_iter(Some(("app", "etcd"))),
                Map::from_iter([("app".to_string(), "kibana".to_string())]),
                false,
                "value mismatch",
            ),
            (
                Labels::from_iter(Some(("app", "etcd"))),
                Map::from_iter([("role".to_string(), "main".to_string())]),
                false,
                "missing key",
            ),
        ] {
            assert_eq!(labels.contains_all(subset), *contains, "{}", msg);
        }
    }

    #[test]
    fn test_extended_leaves_original_untouched() {
        let base = Labels::from_iter(Some(("app", "prometheus")));
        let extended = base.extended(Some(("tier".to_string(), "monitoring".to_string())));
        assert_eq!(base.get("tier"), None);
        assert_eq!(extended.get("tier"), Some("monitoring"));
        assert_eq!(extended.get("app"), Some("prometheus"));
    }
}
