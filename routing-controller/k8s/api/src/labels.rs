//! Label and annotation conventions shared by mesh-managed workloads.
//!
//! A `Service` takes part in mesh routing when it carries the full set of
//! application labels and is annotated as mesh-enabled. The value of the `app`
//! label names the component; `Strategy` and `VirtualService` resources are
//! bound to a component through that label.

use std::{collections::BTreeMap, sync::Arc};

pub type Map = BTreeMap<String, String>;

pub const APP_LABEL: &str = "app";
pub const APPLICATION_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APPLICATION_VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Every label an application component must carry.
pub const APPLICATION_LABELS: [&str; 3] =
    [APPLICATION_NAME_LABEL, APPLICATION_VERSION_LABEL, APP_LABEL];

pub const SERVICEMESH_ENABLED_ANNOTATION: &str = "servicemesh.kubesphere.io/enabled";

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

/// Matches resources whose labels are a superset of `match_labels`.
///
/// An empty selector matches everything.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
}

// === Selector ===

impl Selector {
    pub fn from_map(match_labels: Map) -> Self {
        Self { match_labels }
    }

    pub fn matches(&self, labels: &Map) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

// === Labels ===

impl Labels {
    /// Returns true if all application labels are present.
    pub fn is_application_component(&self) -> bool {
        APPLICATION_LABELS
            .iter()
            .all(|label| self.0.contains_key(*label))
    }

    /// Extracts the application labels, or `None` if any of them is missing.
    pub fn application_labels(&self) -> Option<Map> {
        APPLICATION_LABELS
            .iter()
            .map(|label| {
                let value = self.0.get(*label)?;
                Some((label.to_string(), value.clone()))
            })
            .collect()
    }

    /// The component name, i.e. the value of the `app` label, if set.
    pub fn component_name(&self) -> Option<&str> {
        self.0
            .get(APP_LABEL)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
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

/// Returns true if the annotations mark the workload as part of the mesh.
pub fn is_servicemesh_enabled(annotations: &Map) -> bool {
    annotations
        .get(SERVICEMESH_ENABLED_ANNOTATION)
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "insufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "value mismatch",
            ),
        ] {
            assert_eq!(selector.matches(labels.as_ref()), *matches, "{}", msg);
        }
    }

    #[test]
    fn application_labels() {
        let complete = Labels::from_iter(vec![
            (APPLICATION_NAME_LABEL, "bookinfo"),
            (APPLICATION_VERSION_LABEL, "v1"),
            (APP_LABEL, "reviews"),
            ("tier", "backend"),
        ]);
        assert!(complete.is_application_component());
        assert_eq!(
            complete.application_labels(),
            Some(maplit::btreemap! {
                APPLICATION_NAME_LABEL.to_string() => "bookinfo".to_string(),
                APPLICATION_VERSION_LABEL.to_string() => "v1".to_string(),
                APP_LABEL.to_string() => "reviews".to_string(),
            })
        );
        assert_eq!(complete.component_name(), Some("reviews"));

        let partial = Labels::from_iter(vec![(APP_LABEL, "reviews")]);
        assert!(!partial.is_application_component());
        assert_eq!(partial.application_labels(), None);

        let unnamed = Labels::from_iter(vec![(APP_LABEL, "")]);
        assert_eq!(unnamed.component_name(), None);
    }

    #[test]
    fn servicemesh_enabled() {
        let enabled = maplit::btreemap! {
            SERVICEMESH_ENABLED_ANNOTATION.to_string() => "true".to_string(),
        };
        assert!(is_servicemesh_enabled(&enabled));

        let disabled = maplit::btreemap! {
            SERVICEMESH_ENABLED_ANNOTATION.to_string() => "false".to_string(),
        };
        assert!(!is_servicemesh_enabled(&disabled));
        assert!(!is_servicemesh_enabled(&Map::new()));
    }
}
