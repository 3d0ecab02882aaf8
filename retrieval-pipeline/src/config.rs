//! Retrieval configuration. Serialized as a pack's `kg_config.json`, so
//! every knob is serde-defaulted and round-trips cleanly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HybridWeights {
    pub vector: f32,
    pub graph: f32,
    pub keyword: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.5,
            graph: 0.3,
            keyword: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RerankWeights {
    pub vector: f32,
    pub graph: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            graph: 0.4,
        }
    }
}

/// Toggles, thresholds, and weights for the retrieval engine. Each
/// enhancement is independently switchable for A/B comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enable_reranker: bool,
    pub enable_multidoc: bool,
    pub enable_fewshot: bool,
    pub enable_multi_query: bool,
    /// Legacy fallback that asks the LLM to generate a read query when
    /// vector confidence is low. Off by default; vector-primary stands
    /// alone.
    pub enable_llm_planner: bool,
    pub vector_confidence_threshold: f32,
    pub content_quality_threshold: f32,
    pub hybrid_weights: HybridWeights,
    pub rerank_weights: RerankWeights,
    pub synthesis_model: String,
    pub fast_model: String,
    pub few_shot_path: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enable_reranker: true,
            enable_multidoc: true,
            enable_fewshot: true,
            enable_multi_query: false,
            enable_llm_planner: false,
            vector_confidence_threshold: 0.6,
            content_quality_threshold: 0.3,
            hybrid_weights: HybridWeights::default(),
            rerank_weights: RerankWeights::default(),
            synthesis_model: "gpt-4o-mini".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            few_shot_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetrievalConfig::default();
        assert!(config.enable_reranker);
        assert!(!config.enable_multi_query);
        assert!(!config.enable_llm_planner);
        assert!((config.vector_confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert!((config.hybrid_weights.vector - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_round_trip_and_partial_json() {
        let config = RetrievalConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: RetrievalConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);

        // Missing fields take defaults, so old kg_config files stay valid
        let partial: RetrievalConfig =
            serde_json::from_str(r#"{"enable_multi_query": true}"#).expect("partial");
        assert!(partial.enable_multi_query);
        assert!(partial.enable_reranker);
    }
}
