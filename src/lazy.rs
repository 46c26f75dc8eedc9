//! Memoized on-demand property resolution.
//!
//! An enricher can install an [`OnDemandSlot`] under a document key. The
//! slot holds a resolver — typically a secondary query against the same
//! connection, parameterized by fields of the parent document through a
//! templated path. The first read resolves and memoizes; every later read
//! (from any thread, through any clone of the document) returns the
//! memoized value without touching the network. Resolution is
//! synchronized per slot, so concurrent readers collapse into a single
//! resolver call — no duplicate requests, no lost updates.
//!
//! What happens when a resolver fails is the caller's choice per
//! enrichment, not hardcoded: see [`OnDemandPolicy`].

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::connection::{ApiRequest, Connection};
use crate::document::{Document, Value};
use crate::error::{Error, Result};
use crate::lock;
use crate::path::{expand, DottedPath, PathEvaluator};
use crate::preprocess::{Outcome, Preprocessor};

/// What to do when an on-demand resolver fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDemandPolicy {
    /// Propagate the failure to whoever read the property.
    Fail,
    /// Log at `warn` and degrade the property to null.
    LogWarn,
    /// Log at `info` and degrade the property to null.
    LogInfo,
    /// Log at `debug` and degrade the property to null.
    LogDebug,
    /// Degrade to null silently.
    Ignore,
}

/// The function that loads an on-demand value. Receives the property name
/// and the parent document; must not read its own property back through
/// [`Document::get`] (that would self-deadlock on the slot).
pub type Resolver = dyn Fn(&str, &Document) -> Result<Value> + Send + Sync;

enum SlotState {
    Pending(Arc<Resolver>),
    Resolved(Value),
}

/// One unresolved-or-memoized document property.
///
/// Stored inside a [`Value::Lazy`]; documents that clone share the slot,
/// so resolution through any clone is resolution for all of them.
pub struct OnDemandSlot {
    property: String,
    policy: OnDemandPolicy,
    state: Mutex<SlotState>,
}

impl OnDemandSlot {
    /// Creates an unresolved slot.
    pub fn new(
        property: impl Into<String>,
        policy: OnDemandPolicy,
        resolver: Arc<Resolver>,
    ) -> Arc<Self> {
        Arc::new(OnDemandSlot {
            property: property.into(),
            policy,
            state: Mutex::new(SlotState::Pending(resolver)),
        })
    }

    /// The property name this slot backs.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// True once a value (or a degraded null) has been memoized.
    pub fn is_resolved(&self) -> bool {
        matches!(&*lock(&self.state), SlotState::Resolved(_))
    }

    /// The memoized value, if resolution already happened. Never triggers
    /// the resolver — this is what serialization uses.
    pub fn resolved_value(&self) -> Option<Value> {
        match &*lock(&self.state) {
            SlotState::Resolved(v) => Some(v.clone()),
            SlotState::Pending(_) => None,
        }
    }

    /// Resolves (first read) or returns the memoized value. The slot lock
    /// is held across the resolver call, which is exactly what serializes
    /// concurrent readers of the same property into one request.
    pub(crate) fn read(&self, parent: &Document) -> Result<Value> {
        let mut state = lock(&self.state);
        let outcome = match &*state {
            SlotState::Resolved(v) => return Ok(v.clone()),
            SlotState::Pending(resolver) => resolver(&self.property, parent),
        };
        match outcome {
            Ok(value) => {
                debug!(target: "restq::lazy", property = %self.property, "on-demand property resolved");
                *state = SlotState::Resolved(value.clone());
                Ok(value)
            }
            Err(err) => match self.policy {
                // Leave the slot pending: a later read may succeed, and
                // the caller asked to see failures.
                OnDemandPolicy::Fail => Err(Error::OnDemand {
                    property: self.property.clone(),
                    source: Box::new(err),
                }),
                policy => {
                    match policy {
                        OnDemandPolicy::LogWarn => warn!(
                            target: "restq::lazy",
                            property = %self.property, error = %err,
                            "on-demand resolution failed; degrading to null"
                        ),
                        OnDemandPolicy::LogInfo => info!(
                            target: "restq::lazy",
                            property = %self.property, error = %err,
                            "on-demand resolution failed; degrading to null"
                        ),
                        OnDemandPolicy::LogDebug => debug!(
                            target: "restq::lazy",
                            property = %self.property, error = %err,
                            "on-demand resolution failed; degrading to null"
                        ),
                        _ => {}
                    }
                    // Memoize the null so the failing call is not re-issued
                    // on every read.
                    *state = SlotState::Resolved(Value::Null);
                    Ok(Value::Null)
                }
            },
        }
    }
}

impl std::fmt::Debug for OnDemandSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandSlot")
            .field("property", &self.property)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Installs an on-demand slot on a document under `property`.
/// Re-installing the same property replaces the previous slot.
pub fn install_lazy(
    doc: &mut Document,
    property: impl Into<String>,
    policy: OnDemandPolicy,
    resolver: Arc<Resolver>,
) {
    let property = property.into();
    let slot = OnDemandSlot::new(property.clone(), policy, resolver);
    doc.insert(property, Value::Lazy(slot));
}

// ── Enricher ────────────────────────────────────────────────────────────

/// Preprocessor that installs the same on-demand property on every
/// document flowing through a query.
///
/// Construct with [`OnDemandEnricher::new`] for an arbitrary resolver, or
/// [`OnDemandEnricher::query`] for the common case of a secondary GET
/// whose path is templated from the parent document (e.g.
/// `releases/${releaseId}/vulnerabilities/${vulnId}/details`). The
/// enrichment captures its connection handle directly — there is no
/// global registry to look it up in later.
pub struct OnDemandEnricher {
    property: String,
    policy: OnDemandPolicy,
    resolver: Arc<Resolver>,
}

impl OnDemandEnricher {
    /// Enricher with a caller-supplied resolver.
    pub fn new(
        property: impl Into<String>,
        policy: OnDemandPolicy,
        resolver: impl Fn(&str, &Document) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        OnDemandEnricher {
            property: property.into(),
            policy,
            resolver: Arc::new(resolver),
        }
    }

    /// Enricher whose resolver issues a GET on `connection`, with the
    /// request path produced by expanding `template` against the parent
    /// document. The response document becomes the property value.
    pub fn query(
        property: impl Into<String>,
        template: impl Into<String>,
        connection: Arc<Connection>,
        policy: OnDemandPolicy,
    ) -> Self {
        let template = template.into();
        let resolver = move |_property: &str, parent: &Document| -> Result<Value> {
            let path = expand(&template, parent, &DottedPath)?;
            let response = connection.execute(&ApiRequest::get(path), None)?;
            Ok(Value::Doc(response))
        };
        OnDemandEnricher {
            property: property.into(),
            policy,
            resolver: Arc::new(resolver),
        }
    }

    /// Same as [`query`](Self::query) but with a caller-chosen path
    /// evaluator for the template.
    pub fn query_with_evaluator(
        property: impl Into<String>,
        template: impl Into<String>,
        connection: Arc<Connection>,
        evaluator: Arc<dyn PathEvaluator>,
        policy: OnDemandPolicy,
    ) -> Self {
        let template = template.into();
        let resolver = move |_property: &str, parent: &Document| -> Result<Value> {
            let path = expand(&template, parent, evaluator.as_ref())?;
            let response = connection.execute(&ApiRequest::get(path), None)?;
            Ok(Value::Doc(response))
        };
        OnDemandEnricher {
            property: property.into(),
            policy,
            resolver: Arc::new(resolver),
        }
    }
}

impl Preprocessor for OnDemandEnricher {
    fn apply(&self, doc: &mut Document) -> Result<Outcome> {
        // Insert replaces any previous slot under the same name, so
        // applying twice re-registers rather than stacking.
        install_lazy(
            doc,
            self.property.clone(),
            self.policy,
            Arc::clone(&self.resolver),
        );
        Ok(Outcome::Keep)
    }
}
