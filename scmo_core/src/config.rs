use serde::{Deserialize, Serialize};

use crate::memory::layout::INSTANCE_MAIN_SIZE;

/// What to do with a supplied property or key binding that the bound class
/// does not declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Log at `warn` and skip the value.
    Drop,
    /// Fail with `NotFound`.
    #[default]
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes allocated for a fresh chunk. Raised to fit the main structure.
    pub initial_chunk_size: usize,
    /// Slots added each time the external reference index array fills up.
    pub ext_ref_growth: u32,
    pub unmatched_property_policy: UnmatchedPolicy,
    /// Free bytes added to chunks read back from a stream.
    pub stream_reserve: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_chunk_size: 4096,
            ext_ref_growth: 8,
            unmatched_property_policy: UnmatchedPolicy::default(),
            stream_reserve: 64,
        }
    }
}

impl EngineConfig {
    /// Clamps values that would make a chunk unusable.
    pub fn normalized(&self) -> Self {
        Self {
            initial_chunk_size: self.initial_chunk_size.max(INSTANCE_MAIN_SIZE + 8),
            ext_ref_growth: self.ext_ref_growth.max(1),
            unmatched_property_policy: self.unmatched_property_policy,
            stream_reserve: self.stream_reserve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "unmatched_property_policy": "drop" }"#).unwrap();
        assert_eq!(config.unmatched_property_policy, UnmatchedPolicy::Drop);
        assert_eq!(config.initial_chunk_size, 4096);
        assert_eq!(config.ext_ref_growth, 8);
        assert_eq!(config.stream_reserve, 64);

        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.unmatched_property_policy, UnmatchedPolicy::Reject);
    }

    #[test]
    fn normalized_clamps_small_values() {
        let config = EngineConfig {
            initial_chunk_size: 0,
            ext_ref_growth: 0,
            ..EngineConfig::default()
        }
        .normalized();
        assert!(config.initial_chunk_size > INSTANCE_MAIN_SIZE);
        assert_eq!(config.ext_ref_growth, 1);
    }
}
