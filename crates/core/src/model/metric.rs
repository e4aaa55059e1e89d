use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attr::Attributes;

/// Label implicitly carried by every metric series: the record's service name.
pub const SERVICE_LABEL: &str = "service";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub labels: Attributes,
    pub service_name: String,
}

impl Metric {
    /// Labels identifying this record's series. An explicit `service` label
    /// takes precedence over the resource service name.
    pub fn series_labels(&self) -> Attributes {
        let mut labels = self.labels.clone();
        labels
            .entry(SERVICE_LABEL.to_string())
            .or_insert_with(|| self.service_name.clone());
        labels
    }
}
