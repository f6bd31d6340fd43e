//! Composed top-level configuration (§10.4): each component-owning crate
//! keeps its weights and thresholds as internal constants; the engine
//! only owns the knobs a deployer actually needs to move — pool sizes,
//! timeouts, and lock leases.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub default_item_limit: usize,
    pub suggest_limit: usize,
    pub pairwise_max_pairs: usize,
    pub pairwise_batch_size: usize,
    pub phase_lock_ttl_seconds: u64,
    pub list_lock_ttl_seconds: u64,
    pub embedding_model_path: String,
    pub embedding_dim: usize,
    pub lexical_index_path: String,
    pub redis_url: String,
    pub database_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_item_limit: 30,
            suggest_limit: 20,
            pairwise_max_pairs: 60,
            pairwise_batch_size: 12,
            phase_lock_ttl_seconds: 600,
            list_lock_ttl_seconds: 3600,
            embedding_model_path: "models/encoder.onnx".to_string(),
            embedding_dim: taste_embedding::EMBEDDING_DIM,
            lexical_index_path: "data/lexical_index".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_url: "postgres://localhost/taste".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Self {
        taste_core::config::load_layered("engine", "TASTE").unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_named_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_item_limit, 30);
        assert_eq!(cfg.suggest_limit, 20);
        assert_eq!(cfg.pairwise_max_pairs, 60);
        assert_eq!(cfg.phase_lock_ttl_seconds, 600);
        assert_eq!(cfg.list_lock_ttl_seconds, 3600);
    }
}
