use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::reinfer::{DisabledSink, ReinferSink};

use super::palette::DEFAULT_COLOR_POOL;
use super::rule::RuleRegistry;
use super::target::{Color, Ext};

/// Entry returned by [`SimilarityIndex::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub name: String,
    #[serde(flatten)]
    pub extra: Ext,
}

/// Vector index over the members of one group (e.g. a face gallery).
pub trait SimilarityIndex: Send + Sync {
    fn group_id(&self) -> &str;

    fn group_name(&self) -> Option<&str>;

    /// Best match scoring at least `min_score`, as `(id, score)`.
    fn search(&self, feature: &[f32], min_score: f32) -> Option<(String, f32)>;

    fn query(&self, id: &str) -> Option<IndexRecord>;
}

/// Process-long registry shared by every pipeline instance.
///
/// Holds the rule factories, similarity indexes keyed by group id, the
/// outbound re-inference sink and the colour pool used for labels.
pub struct SharedContext {
    registry: RuleRegistry,
    indexes: RwLock<HashMap<String, Arc<dyn SimilarityIndex>>>,
    sink: Arc<dyn ReinferSink>,
    color_pool: Vec<Color>,
}

impl SharedContext {
    pub fn builder() -> SharedContextBuilder {
        SharedContextBuilder::default()
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &dyn ReinferSink {
        self.sink.as_ref()
    }

    pub fn color_pool(&self) -> &[Color] {
        &self.color_pool
    }

    pub fn index(&self, group_id: &str) -> Option<Arc<dyn SimilarityIndex>> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_id)
            .cloned()
    }

    /// Add or replace the index for its group.
    pub fn register_index(&self, index: Arc<dyn SimilarityIndex>) {
        let group_id = index.group_id().to_owned();
        tracing::info!(group_id = %group_id, "similarity index registered");
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group_id, index);
    }

    pub fn remove_index(&self, group_id: &str) -> bool {
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group_id)
            .is_some()
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("SharedContext")
            .field("rules", &self.registry.names())
            .field("groups", &groups)
            .field("color_pool", &self.color_pool)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct SharedContextBuilder {
    registry: Option<RuleRegistry>,
    indexes: Vec<Arc<dyn SimilarityIndex>>,
    sink: Option<Arc<dyn ReinferSink>>,
    color_pool: Option<Vec<Color>>,
}

impl SharedContextBuilder {
    /// Defaults to [`RuleRegistry::with_builtin`].
    pub fn registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.indexes.push(index);
        self
    }

    /// Defaults to [`DisabledSink`].
    pub fn sink(mut self, sink: impl ReinferSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn color_pool(mut self, pool: Vec<Color>) -> Self {
        self.color_pool = Some(pool);
        self
    }

    pub fn build(self) -> SharedContext {
        let indexes = self
            .indexes
            .into_iter()
            .map(|index| (index.group_id().to_owned(), index))
            .collect();
        SharedContext {
            registry: self.registry.unwrap_or_else(RuleRegistry::with_builtin),
            indexes: RwLock::new(indexes),
            sink: self.sink.unwrap_or_else(|| Arc::new(DisabledSink)),
            color_pool: self
                .color_pool
                .unwrap_or_else(|| DEFAULT_COLOR_POOL.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gallery;

    impl SimilarityIndex for Gallery {
        fn group_id(&self) -> &str {
            "g1"
        }

        fn group_name(&self) -> Option<&str> {
            Some("staff")
        }

        fn search(&self, _feature: &[f32], _min_score: f32) -> Option<(String, f32)> {
            None
        }

        fn query(&self, _id: &str) -> Option<IndexRecord> {
            None
        }
    }

    #[test]
    fn test_indexes_by_group() {
        let shared = SharedContext::builder().index(Arc::new(Gallery)).build();
        assert_eq!(
            shared.index("g1").and_then(|i| i.group_name().map(str::to_owned)),
            Some("staff".to_string())
        );
        assert!(shared.index("g2").is_none());
        assert!(shared.remove_index("g1"));
        assert!(shared.index("g1").is_none());

        shared.register_index(Arc::new(Gallery));
        assert!(shared.index("g1").is_some());
    }

    #[test]
    fn test_defaults() {
        let shared = SharedContext::default();
        assert_eq!(shared.color_pool().len(), DEFAULT_COLOR_POOL.len());
        assert!(shared.registry().contains("smoke"));
    }
}
