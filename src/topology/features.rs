//! Cluster feature gate

use super::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Supported features of the normal nodes and the cluster-enabled set
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyFeatures {
    /// Supported features of normal nodes and of transitioning nodes that
    /// become normal again (rebuild, or a rolled back decommission or removal)
    pub normal_supported_features: BTreeMap<NodeId, BTreeSet<String>>,

    /// Features considered enabled by the cluster
    pub enabled_features: BTreeSet<String>,
}

impl TopologyFeatures {
    /// Features supported by every node in `normal_supported_features` but not yet enabled
    pub fn calculate_not_yet_enabled_features(&self) -> BTreeSet<String> {
        calculate_not_yet_enabled_features(
            &self.enabled_features,
            self.normal_supported_features.values(),
        )
    }
}

/// Intersection of `supported` minus `enabled`.
///
/// An empty iterator yields an empty set: with no normal nodes nothing can be enabled.
pub fn calculate_not_yet_enabled_features<'a, I>(
    enabled: &BTreeSet<String>,
    supported: I,
) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a BTreeSet<String>>,
{
    let mut nodes = supported.into_iter();
    let Some(first) = nodes.next() else {
        return BTreeSet::new();
    };

    let mut to_enable: BTreeSet<String> = first.difference(enabled).cloned().collect();
    for features in nodes {
        if to_enable.is_empty() {
            break;
        }
        to_enable.retain(|f| features.contains(f));
    }
    to_enable
}
