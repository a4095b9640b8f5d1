//! Hybrid search over one namespace's work items.
//!
//! # Scoring
//!
//! 1. Fetch up to `candidate_k` keyword candidates (FTS5 bm25, negated).
//! 2. Embed the query and fetch up to `candidate_k` vector candidates
//!    (cosine similarity).
//! 3. Map raw scores into `[0, 1]`. Single-mode queries keep an absolute
//!    scale: cosine clamped at zero, and bm25 as `x / (1 + x)`. Hybrid
//!    queries min-max normalize each candidate set on its own.
//! 4. Merge: `score = (1 - α) × keyword + α × semantic`, with α = 0 for
//!    keyword mode and α = 1 for semantic mode.
//! 5. Drop results below `min_score`. In single modes the threshold is
//!    absolute, so a weak best match can still be excluded.
//! 6. Sort by score (desc), `updated_at` (desc), id (asc), truncate to `limit`.
//!
//! Filters are compiled into both candidate queries, so `limit` counts
//! filtered results. When the embedding provider is missing or fails,
//! semantic and hybrid queries fall back to keyword ranking and the outcome
//! is flagged `degraded`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::model::WorkItem;
use crate::storage::{ItemFilter, RecordStore};

/// Retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    #[default]
    Hybrid,
}

impl SearchMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }

    const fn uses_keyword(self) -> bool {
        matches!(self, Self::Keyword | Self::Hybrid)
    }

    const fn uses_vectors(self) -> bool {
        matches!(self, Self::Semantic | Self::Hybrid)
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "semantic" | "vector" => Ok(Self::Semantic),
            "keyword" | "text" | "fts" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::validation(
                "mode",
                format!("unknown search mode '{other}' (use semantic, keyword or hybrid)"),
            )),
        }
    }
}

/// One search invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub filters: ItemFilter,
    pub limit: usize,
    /// Overrides the configured minimum score.
    pub min_score: Option<f64>,
    /// Deadline in milliseconds from the start of the call.
    pub timeout_ms: Option<u64>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: SearchMode::Hybrid,
            filters: ItemFilter::default(),
            limit: 10,
            min_score: None,
            timeout_ms: None,
        }
    }
}

impl SearchRequest {
    #[must_use]
    pub fn new(query: &str, mode: SearchMode) -> Self {
        Self {
            query: query.to_string(),
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: ItemFilter) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub item: WorkItem,
    /// Combined score in `[0, 1]`.
    pub score: f64,
    /// Keyword component on the scale of `score`, if a keyword candidate.
    pub keyword_score: Option<f64>,
    /// Semantic component on the scale of `score`, if a vector candidate.
    pub semantic_score: Option<f64>,
}

/// Results plus how they were produced.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    /// Mode actually used for ranking.
    pub mode: SearchMode,
    /// A semantic component was requested but unavailable.
    pub degraded: bool,
    pub reason: Option<String>,
    /// The deadline expired; results cover what was ranked before it.
    pub cancelled: bool,
}

impl SearchOutcome {
    fn empty(mode: SearchMode) -> Self {
        Self {
            results: Vec::new(),
            mode,
            degraded: false,
            reason: None,
            cancelled: false,
        }
    }
}

/// Search engine bound to one namespace's record store.
#[derive(Debug, Clone)]
pub struct HybridSearch {
    store: Arc<RecordStore>,
    config: SearchConfig,
}

impl HybridSearch {
    #[must_use]
    pub fn new(store: Arc<RecordStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run a search.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a candidate query fails. Embedding
    /// failures never error; they degrade the outcome.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let mut outcome = SearchOutcome::empty(request.mode);
        if request.query.trim().is_empty() || request.limit == 0 {
            return Ok(outcome);
        }

        let deadline = Deadline::from_millis(request.timeout_ms);
        let k = self.config.candidate_k.max(request.limit);
        let min_score = request.min_score.unwrap_or(self.config.min_score);

        let mut query_vec = None;
        if request.mode.uses_vectors() {
            match self.embed_query(&request.query, deadline).await {
                Ok(vector) => query_vec = Some(vector),
                Err(QueryEmbedding::TimedOut) => {
                    outcome.cancelled = true;
                    outcome.degraded = true;
                    outcome.reason = Some("query embedding did not finish before the deadline".into());
                }
                Err(QueryEmbedding::Unavailable(reason)) => {
                    warn!(reason = %reason, "Semantic search unavailable, falling back to keyword");
                    outcome.degraded = true;
                    outcome.reason = Some(reason);
                }
            }
        }

        let effective = match (request.mode, query_vec.is_some()) {
            (SearchMode::Keyword, _) | (_, false) => SearchMode::Keyword,
            (mode, true) => mode,
        };
        outcome.mode = effective;

        let keyword = if effective.uses_keyword() {
            self.store.text_query(&request.query, k, &request.filters)?
        } else {
            Vec::new()
        };

        let vector = match &query_vec {
            Some(qv) if !deadline.is_expired() => self.store.vector_query(qv, k, &request.filters)?,
            Some(_) => {
                outcome.cancelled = true;
                Vec::new()
            }
            None => Vec::new(),
        };

        let blend = Blend {
            mode: effective,
            alpha: self.config.hybrid_alpha,
            min_score,
        };
        outcome.results = merge(keyword, vector, &blend, request.limit);

        debug!(
            mode = effective.as_str(),
            results = outcome.results.len(),
            degraded = outcome.degraded,
            cancelled = outcome.cancelled,
            "Search complete"
        );
        Ok(outcome)
    }

    async fn embed_query(&self, query: &str, deadline: Deadline) -> std::result::Result<Vec<f32>, QueryEmbedding> {
        if self.store.embedder().is_none() {
            return Err(QueryEmbedding::Unavailable("no embedding provider configured".into()));
        }
        let embedding = self.store.embed_query(query);
        let result = match deadline.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, embedding)
                .await
                .map_err(|_| QueryEmbedding::TimedOut)?,
            None => embedding.await,
        };
        match result {
            Ok(vector) if !vector.is_empty() => Ok(vector),
            Ok(_) => Err(QueryEmbedding::Unavailable("embedding provider returned an empty vector".into())),
            Err(e) => Err(QueryEmbedding::Unavailable(e.to_string())),
        }
    }
}

enum QueryEmbedding {
    Unavailable(String),
    TimedOut,
}

/// Min-max normalize raw scores to `[0, 1]`.
///
/// A set whose scores are all equal normalizes to 1.0.
#[must_use]
pub fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }

    let s_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Map a negated bm25 rank onto `[0, 1)`. Non-matching scores map to 0.
#[must_use]
pub fn keyword_relevance(raw: f64) -> f64 {
    let x = raw.max(0.0);
    x / (1.0 + x)
}

/// Cosine similarity clamped to `[0, 1]`.
#[must_use]
pub fn semantic_relevance(cosine: f64) -> f64 {
    cosine.clamp(0.0, 1.0)
}

/// How candidate scores are combined.
struct Blend {
    mode: SearchMode,
    alpha: f64,
    min_score: f64,
}

fn merge(
    keyword: Vec<(WorkItem, f64)>,
    vector: Vec<(WorkItem, f64)>,
    blend: &Blend,
    limit: usize,
) -> Vec<SearchHit> {
    let raw = |set: &[(WorkItem, f64)]| set.iter().map(|(_, s)| *s).collect::<Vec<_>>();
    let (kw_norm, vec_norm, alpha) = match blend.mode {
        SearchMode::Hybrid => (normalize_scores(&raw(&keyword)), normalize_scores(&raw(&vector)), blend.alpha),
        SearchMode::Keyword => (raw(&keyword).into_iter().map(keyword_relevance).collect(), Vec::new(), 0.0),
        SearchMode::Semantic => (Vec::new(), raw(&vector).into_iter().map(semantic_relevance).collect(), 1.0),
    };
    let min_score = blend.min_score;

    let mut hits: HashMap<String, SearchHit> = HashMap::new();
    for ((item, _), norm) in keyword.into_iter().zip(kw_norm) {
        hits.insert(
            item.id.clone(),
            SearchHit {
                item,
                score: 0.0,
                keyword_score: Some(norm),
                semantic_score: None,
            },
        );
    }
    for ((item, _), norm) in vector.into_iter().zip(vec_norm) {
        hits.entry(item.id.clone())
            .or_insert_with(|| SearchHit {
                item,
                score: 0.0,
                keyword_score: None,
                semantic_score: None,
            })
            .semantic_score = Some(norm);
    }

    let mut results: Vec<SearchHit> = hits
        .into_values()
        .map(|mut hit| {
            let k = hit.keyword_score.unwrap_or(0.0);
            let v = hit.semantic_score.unwrap_or(0.0);
            hit.score = (1.0 - alpha) * k + alpha * v;
            hit
        })
        .filter(|hit| hit.score >= min_score)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.item.updated_at.cmp(&a.item.updated_at))
            .then(a.item.id.cmp(&b.item.id))
    });
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{BoxedProvider, EmbeddingProvider, HashingProvider, ProviderInfo};
    use crate::model::{ItemType, Status};

    struct DownProvider;

    impl EmbeddingProvider for DownProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "down".into(),
                model: "none".into(),
                dimensions: 16,
                max_chars: 1000,
            }
        }

        async fn is_available(&self) -> bool {
            false
        }

        async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("provider offline".into()))
        }
    }

    async fn seeded(provider: Option<BoxedProvider>) -> HybridSearch {
        let store = Arc::new(RecordStore::open_memory(provider.map(Arc::new)).unwrap());
        let items = [
            WorkItem::new(ItemType::Epic, "Authentication overhaul")
                .with_id("wi_auth")
                .with_description("Replace password authentication with single sign-on"),
            WorkItem::new(ItemType::Story, "Session handling")
                .with_id("wi_session")
                .with_description("Expire idle sessions after authentication"),
            WorkItem::new(ItemType::Task, "Invoice export")
                .with_id("wi_invoice")
                .with_description("Export invoices as CSV")
                .with_status(Status::Completed),
        ];
        for item in items {
            store.put(item).await.unwrap();
        }
        HybridSearch::new(store, SearchConfig::default())
    }

    fn hashing() -> Option<BoxedProvider> {
        Some(BoxedProvider::new(HashingProvider::new(128)))
    }

    #[test]
    fn test_normalize_scores() {
        assert!(normalize_scores(&[]).is_empty());
        assert_eq!(normalize_scores(&[5.0]), vec![1.0]);
        assert_eq!(normalize_scores(&[3.0, 3.0]), vec![1.0, 1.0]);
        let n = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((n[1] - 0.5).abs() < 1e-9);
        assert!(n.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("HYBRID".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!("fts".parse::<SearchMode>().unwrap(), SearchMode::Keyword);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let search = seeded(hashing()).await;
        let outcome = search
            .search(&SearchRequest::new("authentication", SearchMode::Keyword))
            .await
            .unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].item.id, "wi_auth");
        assert!(outcome.results.iter().all(|h| h.semantic_score.is_none()));
    }

    #[tokio::test]
    async fn test_semantic_search() {
        let search = seeded(hashing()).await;
        let outcome = search
            .search(&SearchRequest::new("invoice csv export", SearchMode::Semantic))
            .await
            .unwrap();
        assert_eq!(outcome.mode, SearchMode::Semantic);
        assert_eq!(outcome.results[0].item.id, "wi_invoice");
    }

    #[tokio::test]
    async fn test_filters_apply_before_limit() {
        let search = seeded(hashing()).await;
        let request = SearchRequest::new("authentication sessions invoices", SearchMode::Hybrid)
            .with_filters(ItemFilter::default().with_status(Status::Completed))
            .with_limit(1);
        let outcome = search.search(&request).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].item.id, "wi_invoice");
    }

    #[tokio::test]
    async fn test_hybrid_top_not_worse_than_single_modes() {
        let search = seeded(hashing()).await;
        let query = "authentication sessions";
        let hybrid = search
            .search(&SearchRequest::new(query, SearchMode::Hybrid).with_limit(50))
            .await
            .unwrap();
        let keyword = search
            .search(&SearchRequest::new(query, SearchMode::Keyword))
            .await
            .unwrap();
        let semantic = search
            .search(&SearchRequest::new(query, SearchMode::Semantic))
            .await
            .unwrap();

        let combined: HashMap<&str, f64> = hybrid
            .results
            .iter()
            .map(|h| (h.item.id.as_str(), h.score))
            .collect();
        let top = hybrid.results[0].score;
        for single in [&keyword, &semantic] {
            let id = single.results[0].item.id.as_str();
            assert!(top >= combined[id]);
        }
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_to_keyword() {
        let search = seeded(Some(BoxedProvider::new(DownProvider))).await;
        let outcome = search
            .search(&SearchRequest::new("authentication", SearchMode::Hybrid))
            .await
            .unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.mode, SearchMode::Keyword);
        assert!(outcome.reason.unwrap().contains("offline"));
        assert_eq!(outcome.results[0].item.id, "wi_auth");
    }

    #[tokio::test]
    async fn test_no_provider_degrades() {
        let search = seeded(None).await;
        let outcome = search
            .search(&SearchRequest::new("invoice", SearchMode::Semantic))
            .await
            .unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_min_score_excludes() {
        let search = seeded(hashing()).await;
        let all = search
            .search(&SearchRequest::new("authentication", SearchMode::Keyword))
            .await
            .unwrap();
        let (best, second) = (all.results[0].score, all.results[1].score);
        assert!(best > second);

        let mut request = SearchRequest::new("authentication", SearchMode::Keyword);
        request.min_score = Some((best + second) / 2.0);
        let outcome = search.search(&request).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].item.id, "wi_auth");

        request.min_score = Some(0.99);
        assert!(search.search(&request).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_semantic_query_falls_below_threshold() {
        let search = seeded(hashing()).await;
        let mut request = SearchRequest::new("zebra quantum bagpipe", SearchMode::Semantic);
        request.min_score = Some(0.9);
        let outcome = search.search(&request).await.unwrap();
        assert_eq!(outcome.mode, SearchMode::Semantic);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_single_match_keeps_absolute_score() {
        let search = seeded(hashing()).await;
        let outcome = search
            .search(&SearchRequest::new("invoices", SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        let score = outcome.results[0].score;
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_relevance_mappings() {
        assert!(keyword_relevance(-2.0).abs() < f64::EPSILON);
        assert!((keyword_relevance(1.0) - 0.5).abs() < 1e-9);
        assert!(keyword_relevance(8.0) > keyword_relevance(2.0));
        assert!(semantic_relevance(-0.3).abs() < f64::EPSILON);
        assert!((semantic_relevance(1.2) - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_query() {
        let search = seeded(hashing()).await;
        let outcome = search.search(&SearchRequest::new("   ", SearchMode::Hybrid)).await.unwrap();
        assert!(outcome.results.is_empty());
        assert!(!outcome.degraded);
    }

    #[test]
    fn test_merge_tie_break_prefers_newer() {
        let mut old = WorkItem::new(ItemType::Task, "a").with_id("b_old");
        old.updated_at = 1;
        let mut new = WorkItem::new(ItemType::Task, "a").with_id("a_new");
        new.updated_at = 2;
        let blend = Blend {
            mode: SearchMode::Keyword,
            alpha: 0.6,
            min_score: 0.0,
        };
        let hits = merge(vec![(old, 1.0), (new, 1.0)], Vec::new(), &blend, 10);
        assert_eq!(hits[0].item.id, "a_new");
    }
}
