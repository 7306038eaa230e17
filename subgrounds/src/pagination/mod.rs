//! Automatic pagination.
//!
//! [`preprocess`] rewrites a document so that every list field is driven by
//! variables, [`strategies`] decide the values of those variables page after page,
//! and [`Paginator`] wraps a strategy into a resumable state machine that never
//! performs I/O itself.
use std::fmt::Debug;

use crate::Step;
use crate::configuration::PaginationConfig;
use crate::configuration::PaginationStrategyKind;
use crate::error::PaginationError;
use crate::error::SubgroundsError;
use crate::json_ext::Object;
use crate::query::Document;
use crate::schema::SchemaMeta;

pub mod preprocess;
pub mod strategies;

pub use strategies::Cursor;
pub use strategies::CursorMode;
pub use strategies::LegacyStrategy;
pub use strategies::ShallowStrategy;
pub use strategies::SkipStrategy;

/// What a strategy wants sent next.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyStep {
    /// Send `document` with `variables` bound on top of its own variables.
    Page { document: Document, variables: Object },
    /// Pagination is complete.
    Stop,
    /// The document needs no pagination: send it once, as written.
    Skip,
}

/// Computes the pages of one document.
///
/// The first call to [`step`](PaginationStrategy::step) receives `None`; each
/// following call receives the data of the page requested by the previous call.
pub trait PaginationStrategy: Debug + Send + Sync {
    fn step(&mut self, page: Option<&Object>) -> Result<StrategyStep, SubgroundsError>;
}

impl PaginationStrategyKind {
    /// Build the strategy for `document`.
    pub fn build(
        self,
        schema: &SchemaMeta,
        document: Document,
        config: &PaginationConfig,
    ) -> Result<Box<dyn PaginationStrategy>, SubgroundsError> {
        Ok(match self {
            Self::Legacy => Box::new(LegacyStrategy::new(schema, document, config.clone())?),
            Self::Shallow => Box::new(ShallowStrategy::new(schema, document, config.clone())?),
            Self::Skip => Box::new(SkipStrategy),
        })
    }
}

#[derive(Debug)]
enum State {
    Start,
    Paginating,
    Skipped,
    Done,
}

/// Pagination of one document as a resumable state machine.
///
/// ```text
/// let mut paginator = Paginator::new(document, strategy);
/// let mut page = None;
/// while let Step::Continue(document) = paginator.resume(page.as_ref())? {
///     page = Some(transport.fetch(&document)?);
/// }
/// ```
#[derive(Debug)]
pub struct Paginator {
    document: Document,
    strategy: Option<Box<dyn PaginationStrategy>>,
    state: State,
    pages: usize,
}

impl Paginator {
    pub fn new(document: Document, strategy: Box<dyn PaginationStrategy>) -> Self {
        Self {
            document,
            strategy: Some(strategy),
            state: State::Start,
            pages: 0,
        }
    }

    /// Build the configured strategy for `document` and wrap it.
    pub fn for_document(
        schema: &SchemaMeta,
        document: Document,
        kind: PaginationStrategyKind,
        config: &PaginationConfig,
    ) -> Result<Self, PaginationError> {
        let strategy = kind
            .build(schema, document.clone(), config)
            .map_err(|err| PaginationError::new(err, None))?;
        Ok(Self::new(document, strategy))
    }

    /// Number of documents issued so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Feed the data of the last issued page (`None` on the first call) and get the
    /// next document to send, or `Done` once pagination is complete.
    ///
    /// Every call after the first must carry the data of the page issued by the
    /// previous call; anything else ends pagination with a [`SubgroundsError::Step`].
    pub fn resume(&mut self, page: Option<&Object>) -> Result<Step<Document, ()>, PaginationError> {
        let misuse = match (&self.state, page) {
            (State::Done, _) => return Ok(Step::Done(())),
            (State::Start, Some(_)) => Some("resumed with data before the first page was issued"),
            (State::Paginating | State::Skipped, None) => {
                Some("resumed without the data of the last page")
            }
            _ => None,
        };
        if let Some(message) = misuse {
            self.state = State::Done;
            return Err(PaginationError::new(
                SubgroundsError::step(message),
                self.strategy.take(),
            ));
        }
        if let State::Skipped = self.state {
            self.state = State::Done;
            return Ok(Step::Done(()));
        }

        let Some(strategy) = self.strategy.as_mut() else {
            return Err(PaginationError::new(SubgroundsError::Completed, None));
        };
        let step = match strategy.step(page) {
            Ok(step) => step,
            Err(err) => {
                self.state = State::Done;
                return Err(PaginationError::new(err, self.strategy.take()));
            }
        };

        match step {
            StrategyStep::Page {
                mut document,
                variables,
            } => {
                self.state = State::Paginating;
                self.pages += 1;
                tracing::trace!(?variables, "page bindings");
                let mut bound = self.document.variables.clone();
                bound.extend(variables);
                document.variables = bound;
                tracing::debug!(
                    url = %document.url,
                    page = self.pages,
                    query = %document.graphql(),
                    "issuing page"
                );
                Ok(Step::Continue(document))
            }
            StrategyStep::Skip => {
                self.state = State::Skipped;
                self.pages += 1;
                tracing::debug!(url = %self.document.url, "pagination skipped");
                Ok(Step::Continue(self.document.clone()))
            }
            StrategyStep::Stop => {
                self.state = State::Done;
                tracing::debug!(url = %self.document.url, pages = self.pages, "pagination done");
                Ok(Step::Done(()))
            }
        }
    }
}
