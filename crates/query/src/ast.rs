use std::time::Duration;

use serde::Serialize;
use telemorph_core::attr::Attributes;

/// A parsed metrics query: a selector with at most one function and one
/// aggregation applied on top, in that order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Query {
    pub metric_name: String,
    pub labels: Attributes,
    pub function: Option<String>,
    pub range: Option<Duration>,
    pub aggregation: Option<Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub operation: String,
    pub grouping: Grouping,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    #[default]
    None,
    By(Vec<String>),
    Without(Vec<String>),
}

impl Grouping {
    /// The subset of `labels` that identifies the output group.
    pub fn group_labels(&self, labels: &Attributes) -> Attributes {
        match self {
            Grouping::None => Attributes::new(),
            Grouping::By(keys) => labels
                .iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Grouping::Without(keys) => labels
                .iter()
                .filter(|(k, _)| !keys.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
