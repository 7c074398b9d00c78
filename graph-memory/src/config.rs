//! Runtime configuration
//!
//! Defaults are usable as-is. [`MemoryConfig::from_env`] overlays
//! `GRAPH_MEMORY_*` environment variables for deployments that cannot
//! construct the struct directly.

use serde::{Deserialize, Serialize};

use crate::attributes::MergePolicy;
use crate::contradiction::ResolutionStrategy;
use crate::error::{MemoryError, Result};

/// Entity resolution tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum cosine similarity for an embedding match (default: 0.85)
    pub similarity_threshold: f32,
    /// Matches scoring within this distance of the best are ambiguous (default: 0.01)
    pub ambiguity_epsilon: f32,
    /// Neighbours requested from the vector index (default: 5)
    pub top_k: usize,
    /// How attributes of a matched mention are folded in
    pub merge_policy: MergePolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            ambiguity_epsilon: 0.01,
            top_k: 5,
            merge_policy: MergePolicy::PreferNew,
        }
    }
}

/// Top-level configuration for [`crate::GraphMemory`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub resolver: ResolverConfig,
    /// Strategy used when a caller does not pick one
    pub default_strategy: ResolutionStrategy,
    /// Detection passes before giving up on a contended triple (default: 3)
    pub max_resolution_attempts: u32,
    /// Open an episode on a session's first write
    pub implicit_episodes: bool,
    /// Name given to implicitly opened episodes
    pub implicit_episode_name: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            default_strategy: ResolutionStrategy::NewestWins,
            max_resolution_attempts: 3,
            implicit_episodes: true,
            implicit_episode_name: "session".to_string(),
        }
    }
}

impl MemoryConfig {
    /// Defaults overridden by environment variables
    ///
    /// Recognized variables:
    /// - `GRAPH_MEMORY_SIMILARITY_THRESHOLD`
    /// - `GRAPH_MEMORY_AMBIGUITY_EPSILON`
    /// - `GRAPH_MEMORY_TOP_K`
    /// - `GRAPH_MEMORY_MERGE_POLICY` (`prefer_new` | `prefer_existing`)
    /// - `GRAPH_MEMORY_DEFAULT_STRATEGY` (`newest_wins` | `merge` | `split_timeline`)
    /// - `GRAPH_MEMORY_MAX_RESOLUTION_ATTEMPTS`
    /// - `GRAPH_MEMORY_IMPLICIT_EPISODES` (`true` | `false`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MemoryConfig::from_env`] with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("GRAPH_MEMORY_SIMILARITY_THRESHOLD") {
            config.resolver.similarity_threshold = parse_var("GRAPH_MEMORY_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MEMORY_AMBIGUITY_EPSILON") {
            config.resolver.ambiguity_epsilon = parse_var("GRAPH_MEMORY_AMBIGUITY_EPSILON", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MEMORY_TOP_K") {
            config.resolver.top_k = parse_var("GRAPH_MEMORY_TOP_K", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MEMORY_MERGE_POLICY") {
            config.resolver.merge_policy = match v.trim() {
                "prefer_new" => MergePolicy::PreferNew,
                "prefer_existing" => MergePolicy::PreferExisting,
                other => {
                    return Err(MemoryError::config(format!(
                        "GRAPH_MEMORY_MERGE_POLICY: unknown policy '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("GRAPH_MEMORY_DEFAULT_STRATEGY") {
            config.default_strategy = v.trim().parse()?;
        }
        if let Some(v) = lookup("GRAPH_MEMORY_MAX_RESOLUTION_ATTEMPTS") {
            config.max_resolution_attempts = parse_var("GRAPH_MEMORY_MAX_RESOLUTION_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MEMORY_IMPLICIT_EPISODES") {
            config.implicit_episodes = parse_var("GRAPH_MEMORY_IMPLICIT_EPISODES", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the resolver cannot work with
    pub fn validate(&self) -> Result<()> {
        let r = &self.resolver;
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(MemoryError::config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                r.similarity_threshold
            )));
        }
        if r.ambiguity_epsilon.is_nan() || r.ambiguity_epsilon < 0.0 {
            return Err(MemoryError::config(format!(
                "ambiguity_epsilon must be non-negative, got {}",
                r.ambiguity_epsilon
            )));
        }
        if r.top_k == 0 {
            return Err(MemoryError::config("top_k must be at least 1"));
        }
        if self.max_resolution_attempts == 0 {
            return Err(MemoryError::config(
                "max_resolution_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.resolver.similarity_threshold = threshold;
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.resolver.merge_policy = policy;
        self
    }

    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn with_implicit_episodes(mut self, enabled: bool) -> Self {
        self.implicit_episodes = enabled;
        self
    }

    pub fn with_max_resolution_attempts(mut self, attempts: u32) -> Self {
        self.max_resolution_attempts = attempts;
        self
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| MemoryError::config(format!("{}: {}", name, e)))
}
