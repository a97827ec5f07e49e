//! KubeSphere `servicemesh.kubesphere.io/v1alpha2` resources.

pub mod strategy;

pub use self::strategy::{
    Strategy, StrategyPolicy, StrategySpec, StrategyType, VirtualServiceTemplateSpec,
};
