use crate::networking::VirtualServiceSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Describes how traffic for a component is split across its subsets during
/// a staged rollout.
///
/// A strategy is bound to its component through the `app` label on the
/// strategy's own metadata; at most one strategy may target a component.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "servicemesh.kubesphere.io",
    version = "v1alpha2",
    kind = "Strategy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub strategy_type: Option<StrategyType>,

    /// The subset that receives production traffic once the rollout
    /// completes.
    #[serde(default, rename = "principal", skip_serializing_if = "Option::is_none")]
    pub principal_version: Option<String>,

    /// When set, every port is routed entirely to this subset, ignoring the
    /// weights in the template.
    #[serde(default, rename = "governor", skip_serializing_if = "Option::is_none")]
    pub governor_version: Option<String>,

    #[serde(default)]
    pub template: VirtualServiceTemplateSpec,

    #[serde(default)]
    pub strategy_policy: StrategyPolicy,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct VirtualServiceTemplateSpec {
    #[serde(default)]
    pub spec: VirtualServiceSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum StrategyType {
    Canary,
    BlueGreen,
    Mirror,
}

/// Determines when a strategy's template takes effect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum StrategyPolicy {
    /// Apply the template as soon as the strategy exists.
    Immediately,

    /// Keep the default routing; the strategy is inert.
    #[serde(rename = "Paused", alias = "Pause")]
    Pause,

    /// Apply the template once every subset it references exists.
    WaitForWorkloadReady,

    /// No policy, or one this controller doesn't recognize.
    #[default]
    #[serde(other)]
    Unspecified,
}

// === impl StrategySpec ===

impl StrategySpec {
    /// The pinned subset, if the strategy is in governor mode.
    pub fn governor(&self) -> Option<&str> {
        self.governor_version
            .as_deref()
            .filter(|subset| !subset.is_empty())
    }

    /// Every subset named by the template's HTTP, TCP and TLS destinations and
    /// HTTP mirrors.
    pub fn referenced_subsets(&self) -> BTreeSet<&str> {
        self.template
            .spec
            .destinations()
            .filter_map(|dst| dst.subset.as_deref())
            .collect()
    }
}
