use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bus topics the ERP publishes catalog updates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Product,
    Price,
    Stock,
}

impl Topic {
    /// Every topic the worker subscribes to.
    pub const ALL: [Topic; 3] = [Topic::Product, Topic::Price, Topic::Stock];

    /// Wire name of the topic on the bus.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Product => "product_updates",
            Topic::Price => "price_updates",
            Topic::Stock => "stock_updates",
        }
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A delivered message named a topic this worker does not handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}
