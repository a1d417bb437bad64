// Instance pool - ordered, equivalent endpoints for one provider

use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::RetrievalError;

/// Health as observed during the current request only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstanceHealth {
    #[default]
    Unknown,
    Healthy,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Base URL without trailing slash, or a pseudo address for local tools
    pub base_url: String,
    pub health: InstanceHealth,
}

impl Instance {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            health: InstanceHealth::Unknown,
        }
    }

    /// Join an API path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Static-priority list of instances, never empty
#[derive(Debug, Clone)]
pub struct InstancePool {
    instances: Vec<Instance>,
}

impl InstancePool {
    /// Build a pool from configured base URLs, keeping their order
    pub fn new<I, S>(base_urls: I) -> Result<Self, RetrievalError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut instances = Vec::new();

        for raw in base_urls {
            let raw = raw.as_ref().trim();
            let parsed = Url::parse(raw)
                .map_err(|e| RetrievalError::Config(format!("Invalid instance URL '{}': {}", raw, e)))?;

            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(RetrievalError::Config(format!(
                    "Instance URL '{}' must use http or https",
                    raw
                )));
            }

            instances.push(Instance::new(raw.trim_end_matches('/')));
        }

        if instances.is_empty() {
            return Err(RetrievalError::Config(
                "Instance pool must contain at least one instance".to_string(),
            ));
        }

        Ok(Self { instances })
    }

    /// Pool of one, for providers that are not network mirrors
    pub fn single(instance: Instance) -> Self {
        Self {
            instances: vec![instance],
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }
}
