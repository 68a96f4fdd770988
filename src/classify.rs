//! Keyword classifier — scores free text against the category catalog.
//!
//! Pure function over the catalog: no I/O, deterministic for identical
//! input. Override rules run first and short-circuit the keyword scoring
//! for phrase pairs that are unambiguous regardless of keyword totals.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::CategoryCatalog;

/// Winning score at or above this is high confidence; below is low.
pub const HIGH_CONFIDENCE_THRESHOLD: u32 = 3;

/// Classification score. `Override` is the unbounded sentinel used by
/// override rules — it beats any finite keyword total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Finite(u32),
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Low,
}

/// Routing decision for one message. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category_key: String,
    pub score: Score,
    pub confidence: Confidence,
}

/// A compound-phrase override: when every phrase appears in the text,
/// the category is forced at high confidence.
#[derive(Debug, Clone)]
pub struct OverrideRule {
    pub phrases: Vec<String>,
    pub category_key: String,
}

/// Scores free text against the catalog.
pub struct Classifier {
    catalog: Arc<CategoryCatalog>,
    overrides: Vec<OverrideRule>,
}

impl Classifier {
    /// Classifier with the default override rules.
    pub fn new(catalog: Arc<CategoryCatalog>) -> Self {
        // "Segunda via de nota fiscal" mentions both financeiro and
        // faturamento keywords but is always a financeiro request.
        let overrides = vec![OverrideRule {
            phrases: vec!["segunda via".into(), "nota fiscal".into()],
            category_key: "financeiro".into(),
        }];
        Self { catalog, overrides }
    }

    pub fn with_overrides(catalog: Arc<CategoryCatalog>, overrides: Vec<OverrideRule>) -> Self {
        Self { catalog, overrides }
    }

    /// Classify free text. `None` means unclassified (no keyword matched).
    ///
    /// Tie-break policy: when two categories reach the same maximal score,
    /// the one appearing earlier in catalog order wins. This is a
    /// deliberate, documented choice — the catalog is ordered by routing
    /// precedence.
    pub fn classify(&self, text: &str) -> Option<Classification> {
        let lowered = text.to_lowercase();

        for rule in &self.overrides {
            if rule.phrases.iter().all(|p| lowered.contains(p.as_str())) {
                debug!(category = %rule.category_key, "Override rule matched");
                return Some(Classification {
                    category_key: rule.category_key.clone(),
                    score: Score::Override,
                    confidence: Confidence::High,
                });
            }
        }

        let mut best: Option<(&str, u32)> = None;
        for category in self.catalog.iter() {
            let score: u32 = category
                .keywords
                .iter()
                .filter(|kw| lowered.contains(kw.to_lowercase().as_str()))
                .map(|_| category.priority)
                .sum();
            if score == 0 {
                continue;
            }
            // Strictly greater wins; ties keep the earlier category.
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((category.key.as_str(), score)),
            }
        }

        let (key, score) = best?;
        let confidence = if score >= HIGH_CONFIDENCE_THRESHOLD {
            Confidence::High
        } else {
            Confidence::Low
        };
        debug!(category = %key, score, ?confidence, "Keyword classification");
        Some(Classification {
            category_key: key.to_string(),
            score: Score::Finite(score),
            confidence,
        })
    }
}
