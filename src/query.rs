//! Query configuration and the pagination execution engine.
//!
//! A caller assembles a [`QueryBuilder`] — target path, parameters,
//! preprocessors, paging protocol, result cap, caching — and calls
//! [`build`](QueryBuilder::build) for an immutable [`Query`]. Executing it
//! with [`get_all`](Query::get_all), [`get_unique`](Query::get_unique), or
//! [`process_all`](Query::process_all) drives one or more HTTP requests,
//! feeding every returned document through the preprocessor pipeline
//! before it reaches the consumer.
//!
//! Two invariants the loop lives by:
//! - The result cap applies to *delivered* documents only. Page size is
//!   never tied to the remaining quota, so a filter that discards whole
//!   pages cannot starve the loop into stopping early.
//! - Pages are fetched strictly sequentially in increasing start order —
//!   the server-reported total that plans page N+1 is only known after
//!   page N.

use std::sync::Arc;
use tracing::debug;

use crate::connection::{ApiRequest, Connection};
use crate::document::{Document, DocumentList};
use crate::error::{Error, Result};
use crate::paging::{OffsetLimit, PagingState, PagingStrategy, DEFAULT_PAGE_SIZE};
use crate::preprocess::{Outcome, Preprocessor};
use crate::transport::Method;

/// Hook invoked once before the first request of a query execution, used
/// to push server-side state the query depends on (e.g. configuring
/// search options on another endpoint).
pub type RequestInitializer = dyn Fn(&Connection) -> Result<()> + Send + Sync;

// ── Processor ───────────────────────────────────────────────────────────

/// Consumer of the documents a query delivers.
///
/// Any `FnMut(Document) -> Result<()>` closure is a processor; implement
/// the trait directly when page-progress notifications are wanted too.
/// Returning an error stops the pagination loop immediately and
/// propagates to the caller — it is the only way to abort a long
/// pagination from the consuming side.
pub trait DocumentProcessor {
    /// Notified before each page request with the cursor about to be
    /// used; for progress reporting. Default: ignored.
    fn next_page(&mut self, _state: &PagingState) {}

    /// Receives one delivered document.
    fn process(&mut self, doc: Document) -> Result<()>;
}

impl<F> DocumentProcessor for F
where
    F: FnMut(Document) -> Result<()>,
{
    fn process(&mut self, doc: Document) -> Result<()> {
        self(doc)
    }
}

// ── Pipeline decorator ──────────────────────────────────────────────────

/// Wraps the caller's processor with the per-document pipeline: counts
/// deliveries against the cap and runs the preprocessors in registration
/// order, short-circuiting on the first filter that rejects.
struct Pipeline<'a> {
    inner: &'a mut dyn DocumentProcessor,
    preprocessors: &'a [Box<dyn Preprocessor>],
    cap: Option<u64>,
    delivered: u64,
}

impl<'a> Pipeline<'a> {
    fn new(
        inner: &'a mut dyn DocumentProcessor,
        preprocessors: &'a [Box<dyn Preprocessor>],
        cap: Option<u64>,
    ) -> Self {
        Pipeline {
            inner,
            preprocessors,
            cap,
            delivered: 0,
        }
    }

    fn next_page(&mut self, state: &PagingState) {
        self.inner.next_page(state);
    }

    fn full(&self) -> bool {
        self.cap.is_some_and(|cap| self.delivered >= cap)
    }

    /// Feeds one raw document through the pipeline. `Ok(false)` signals
    /// the cap has been reached and no further document is wanted.
    fn feed(&mut self, mut doc: Document) -> Result<bool> {
        if self.full() {
            return Ok(false);
        }
        for preprocessor in self.preprocessors {
            if let Outcome::Drop = preprocessor.apply(&mut doc)? {
                // Filtered out. The loop keeps paging — rejection says
                // nothing about server-side exhaustion.
                return Ok(true);
            }
        }
        self.inner.process(doc)?;
        self.delivered += 1;
        Ok(!self.full())
    }
}

// ── Configuration snapshot ──────────────────────────────────────────────

struct QueryConfig {
    path: String,
    params: Vec<(String, String)>,
    preprocessors: Vec<Box<dyn Preprocessor>>,
    strategy: Box<dyn PagingStrategy>,
    paged: bool,
    page_size: u64,
    /// −1 means unbounded.
    max_results: i64,
    use_cache: bool,
    cache_name: String,
    method: Method,
    entity: Option<serde_json::Value>,
    request_initializer: Option<Box<RequestInitializer>>,
}

// ── Builder ─────────────────────────────────────────────────────────────

/// Accumulates query configuration through chained calls, then produces
/// an immutable [`Query`] via [`build`](Self::build).
///
/// The builder is consumed by `build`, so an already-built query can
/// never observe later mutation.
pub struct QueryBuilder {
    connection: Arc<Connection>,
    path_segments: Vec<String>,
    params: Vec<(String, String)>,
    template_values: Vec<(String, String)>,
    preprocessors: Vec<Box<dyn Preprocessor>>,
    strategy: Box<dyn PagingStrategy>,
    paged: bool,
    page_size: u64,
    max_results: i64,
    use_cache: bool,
    cache_name: Option<String>,
    method: Method,
    entity: Option<serde_json::Value>,
    request_initializer: Option<Box<RequestInitializer>>,
}

impl QueryBuilder {
    /// Starts a builder executing against `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        QueryBuilder {
            connection,
            path_segments: Vec::new(),
            params: Vec::new(),
            template_values: Vec::new(),
            preprocessors: Vec::new(),
            strategy: Box::new(OffsetLimit),
            paged: false,
            page_size: DEFAULT_PAGE_SIZE,
            max_results: -1,
            use_cache: false,
            cache_name: None,
            method: Method::Get,
            entity: None,
            request_initializer: None,
        }
    }

    /// Appends one segment to the target path. Segments may contain
    /// `${name}` placeholders filled by [`template_value`](Self::template_value).
    pub fn append_path(mut self, segment: impl Into<String>) -> Self {
        self.path_segments.push(segment.into());
        self
    }

    /// Adds a query parameter sent with every request of this query.
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// By-reference variant of [`query_param`](Self::query_param), for
    /// [`Preprocessor::attach`] hooks that only hold `&mut self`.
    pub fn add_query_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// Supplies the value for a `${name}` placeholder in the path.
    pub fn template_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_values.push((name.into(), value.into()));
        self
    }

    /// Registers a preprocessor. It runs on every returned document in
    /// registration order; its [`attach`](Preprocessor::attach) hook is
    /// invoked now, with this builder, so it can register query context
    /// it needs before the main request executes.
    pub fn pre_processor(mut self, mut preprocessor: impl Preprocessor + 'static) -> Self {
        preprocessor.attach(&mut self);
        self.preprocessors.push(Box::new(preprocessor));
        self
    }

    /// Declares the endpoint paginated, using `strategy`'s parameter
    /// encoding and envelope.
    pub fn paging(mut self, strategy: impl PagingStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self.paged = true;
        self
    }

    /// Sets the envelope convention without enabling pagination — for
    /// single-request endpoints that still wrap their response.
    pub fn envelope(mut self, strategy: impl PagingStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Items requested per page. Independent of the result cap.
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Caps delivered documents. `-1` (the default) means unbounded.
    pub fn max_results(mut self, max_results: i64) -> Self {
        self.max_results = max_results;
        self
    }

    /// Enables the connection's response cache for this query.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Names the cache partition. Defaults to the query's resolved path.
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }

    /// Sets the HTTP method. Defaults to GET.
    pub fn http_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Attaches a JSON request entity. Queries with an entity are never
    /// cached.
    pub fn entity(mut self, entity: serde_json::Value) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Registers a hook invoked once before the first request of each
    /// execution.
    pub fn request_initializer(
        mut self,
        initializer: impl Fn(&Connection) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.request_initializer = Some(Box::new(initializer));
        self
    }

    /// Produces the immutable query.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no path was appended (executing
    /// against the service root is always a programming error, never a
    /// default) or a `${name}` placeholder has no template value.
    pub fn build(self) -> Result<Query> {
        if self.path_segments.is_empty() {
            return Err(Error::config("query has no target path"));
        }
        let mut path = self
            .path_segments
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        for (name, value) in &self.template_values {
            path = path.replace(&format!("${{{name}}}"), value);
        }
        if let Some(open) = path.find("${") {
            let rest = &path[open..];
            let placeholder = rest.split('}').next().unwrap_or(rest);
            return Err(Error::config(format!(
                "unresolved path placeholder '{placeholder}}}'"
            )));
        }

        let cache_name = self.cache_name.unwrap_or_else(|| path.clone());
        Ok(Query {
            connection: self.connection,
            config: QueryConfig {
                path,
                params: self.params,
                preprocessors: self.preprocessors,
                strategy: self.strategy,
                paged: self.paged,
                page_size: self.page_size,
                max_results: self.max_results,
                use_cache: self.use_cache,
                cache_name,
                method: self.method,
                entity: self.entity,
                request_initializer: self.request_initializer,
            },
        })
    }
}

// ── Query ───────────────────────────────────────────────────────────────

/// An immutable, executable query. Cheap to execute repeatedly; each
/// execution owns its own paging cursor.
pub struct Query {
    connection: Arc<Connection>,
    config: QueryConfig,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("path", &self.config.path)
            .field("paged", &self.config.paged)
            .field("page_size", &self.config.page_size)
            .field("max_results", &self.config.max_results)
            .field("use_cache", &self.config.use_cache)
            .finish_non_exhaustive()
    }
}

impl Query {
    /// Starts a builder against `connection`. Equivalent to
    /// [`QueryBuilder::new`].
    pub fn builder(connection: Arc<Connection>) -> QueryBuilder {
        QueryBuilder::new(connection)
    }

    /// The resolved target path this query executes against.
    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Executes and collects every delivered document, in delivery order.
    pub fn get_all(&self) -> Result<DocumentList> {
        let mut all = DocumentList::new();
        let mut collect = |doc: Document| -> Result<()> {
            all.push(doc);
            Ok(())
        };
        self.run(&mut collect, self.cap())?;
        Ok(all)
    }

    /// Executes expecting at most one match.
    ///
    /// Runs with an effective cap of two — enough to prove non-uniqueness
    /// without fetching the world. Zero matches is `Ok(None)`; two or
    /// more is [`Error::NonUniqueResult`], a caller contract violation
    /// that is never retried.
    pub fn get_unique(&self) -> Result<Option<Document>> {
        let cap = Some(self.cap().map_or(2, |m| m.min(2)));
        let mut found: Vec<Document> = Vec::new();
        let mut collect = |doc: Document| -> Result<()> {
            found.push(doc);
            Ok(())
        };
        self.run(&mut collect, cap)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(Error::NonUniqueResult {
                path: self.config.path.clone(),
            }),
        }
    }

    /// Executes, streaming every delivered document into `processor`.
    /// A processor error aborts the loop and propagates unchanged.
    pub fn process_all(&self, processor: &mut dyn DocumentProcessor) -> Result<()> {
        self.run(processor, self.cap())
    }

    fn cap(&self) -> Option<u64> {
        if self.config.max_results < 0 {
            None
        } else {
            Some(self.config.max_results as u64)
        }
    }

    fn cache_name(&self) -> Option<&str> {
        self.config.use_cache.then_some(self.config.cache_name.as_str())
    }

    fn request(&self, state: Option<&PagingState>) -> ApiRequest {
        let mut request = ApiRequest::new(self.config.method, self.config.path.clone());
        request.query = self.config.params.clone();
        if let Some(state) = state {
            request
                .query
                .extend(self.config.strategy.page_params(state));
        }
        request.body = self.config.entity.clone();
        request
    }

    /// The execution engine shared by all three entry points.
    fn run(&self, processor: &mut dyn DocumentProcessor, cap: Option<u64>) -> Result<()> {
        if let Some(initializer) = &self.config.request_initializer {
            initializer(self.connection.as_ref())?;
        }

        let mut pipeline = Pipeline::new(processor, &self.config.preprocessors, cap);

        if !self.config.paged {
            let envelope = self
                .connection
                .execute(&self.request(None), self.cache_name())?;
            let (documents, _) = self.config.strategy.unwrap_page(&envelope)?;
            for doc in documents {
                if !pipeline.feed(doc)? {
                    break;
                }
            }
            return Ok(());
        }

        let mut state = PagingState::new(self.config.page_size);
        loop {
            pipeline.next_page(&state);
            let envelope = self
                .connection
                .execute(&self.request(Some(&state)), self.cache_name())?;
            let (documents, total) = self.config.strategy.unwrap_page(&envelope)?;
            if total.is_some() {
                state.total = total;
            }
            let fetched = documents.len();
            debug!(
                target: "restq::query",
                path = %self.config.path,
                start = state.start,
                fetched,
                total = state.total,
                "page received"
            );
            for doc in documents {
                if !pipeline.feed(doc)? {
                    return Ok(());
                }
            }
            state.advance(fetched);
            if state.exhausted() {
                return Ok(());
            }
        }
    }
}
