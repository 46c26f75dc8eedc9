//! Per-document preprocessors: filters and enrichers.
//!
//! Preprocessors run in registration order on every document a query
//! returns, before the document reaches the consumer. A filter decides
//! inclusion; an enricher mutates the document in place. The first filter
//! that rejects a document short-circuits the rest of the pipeline for
//! that document — later enrichers do not run on it — so registration
//! order is a caller-controlled contract, not an implementation detail.
//!
//! Rejection never influences pagination: the engine keeps fetching pages
//! until the *server* says the data is exhausted, however many documents
//! the filters discard.

use std::sync::Arc;

use crate::document::{Document, Value};
use crate::error::Result;
use crate::path::{expand, DottedPath, PathEvaluator};
use crate::query::QueryBuilder;

/// Whether a filter's predicate selects documents for inclusion or
/// exclusion. Final inclusion = `mode == Include` iff the predicate holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Keep documents the predicate matches.
    Include,
    /// Drop documents the predicate matches.
    Exclude,
}

/// A preprocessor's verdict for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Continue the pipeline; deliver if every later filter agrees.
    Keep,
    /// Stop the pipeline for this document and do not deliver it.
    Drop,
}

/// A per-document hook running inside query execution.
pub trait Preprocessor: Send + Sync {
    /// Called once at registration, with the builder the preprocessor is
    /// being attached to. A preprocessor that needs query context — say,
    /// an extra query parameter the server must see for the enriched
    /// field to be available — registers it here, before the first
    /// request executes. The default does nothing.
    fn attach(&mut self, _builder: &mut QueryBuilder) {}

    /// Applies to one document. Enrichers mutate and return
    /// [`Outcome::Keep`]; filters leave the document alone and return
    /// their verdict.
    fn apply(&self, doc: &mut Document) -> Result<Outcome>;
}

// ── Filters ─────────────────────────────────────────────────────────────

/// Filter around an arbitrary predicate.
pub struct PredicateFilter {
    mode: MatchMode,
    predicate: Box<dyn Fn(&Document) -> Result<bool> + Send + Sync>,
}

impl PredicateFilter {
    /// Keeps documents the predicate matches.
    pub fn including(
        predicate: impl Fn(&Document) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        PredicateFilter {
            mode: MatchMode::Include,
            predicate: Box::new(predicate),
        }
    }

    /// Drops documents the predicate matches.
    pub fn excluding(
        predicate: impl Fn(&Document) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        PredicateFilter {
            mode: MatchMode::Exclude,
            predicate: Box::new(predicate),
        }
    }
}

impl Preprocessor for PredicateFilter {
    fn apply(&self, doc: &mut Document) -> Result<Outcome> {
        let matched = (self.predicate)(doc)?;
        let keep = match self.mode {
            MatchMode::Include => matched,
            MatchMode::Exclude => !matched,
        };
        Ok(if keep { Outcome::Keep } else { Outcome::Drop })
    }
}

/// Filter comparing the value at a path against an expected value.
pub struct FieldFilter {
    path: String,
    expected: Value,
    mode: MatchMode,
    evaluator: Arc<dyn PathEvaluator>,
}

impl FieldFilter {
    /// Matches documents whose value at `path` equals `expected`; `mode`
    /// decides whether matching documents are kept or dropped.
    pub fn new(path: impl Into<String>, expected: impl Into<Value>, mode: MatchMode) -> Self {
        FieldFilter {
            path: path.into(),
            expected: expected.into(),
            mode,
            evaluator: Arc::new(DottedPath),
        }
    }

    /// Swaps in a different path evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PathEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }
}

impl Preprocessor for FieldFilter {
    fn apply(&self, doc: &mut Document) -> Result<Outcome> {
        let matched = self
            .evaluator
            .evaluate(doc, &self.path)?
            .map(|v| v == self.expected)
            .unwrap_or(false);
        let keep = match self.mode {
            MatchMode::Include => matched,
            MatchMode::Exclude => !matched,
        };
        Ok(if keep { Outcome::Keep } else { Outcome::Drop })
    }
}

// ── Enrichers ───────────────────────────────────────────────────────────

/// Enricher that computes a field from a `${path}` template — the classic
/// use is a deep link back into the vendor's UI, assembled from the
/// document's own identifiers. Applying twice overwrites the field rather
/// than stacking.
pub struct TemplateFieldEnricher {
    field: String,
    template: String,
    evaluator: Arc<dyn PathEvaluator>,
}

impl TemplateFieldEnricher {
    /// Stores the expansion of `template` under `field` on every document.
    pub fn new(field: impl Into<String>, template: impl Into<String>) -> Self {
        TemplateFieldEnricher {
            field: field.into(),
            template: template.into(),
            evaluator: Arc::new(DottedPath),
        }
    }

    /// Swaps in a different path evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PathEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }
}

impl Preprocessor for TemplateFieldEnricher {
    fn apply(&self, doc: &mut Document) -> Result<Outcome> {
        let value = expand(&self.template, doc, self.evaluator.as_ref())?;
        doc.insert(self.field.clone(), Value::Str(value));
        Ok(Outcome::Keep)
    }
}
