//! The client: endpoint registry, request building and transport drivers.
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::Step;
use crate::configuration::Configuration;
use crate::configuration::PaginationStrategyKind;
use crate::error::BoxError;
use crate::error::SchemaError;
use crate::error::SubgroundsError;
use crate::execution::Execution;
use crate::execution::PageStep;
use crate::execution::StreamingExecution;
use crate::json_ext::Object;
use crate::pagination::Paginator;
use crate::query::DataRequest;
use crate::query::DataResponse;
use crate::query::Document;
use crate::query::DocumentResponse;
use crate::query::Query;
use crate::query::Selection;
use crate::schema::FieldMeta;
use crate::schema::SchemaMeta;
use crate::schema::TypeRef;
use crate::transform::DocumentTransform;
use crate::transform::LocalSyntheticField;
use crate::transform::RequestTransform;
use crate::transform::TransformPipeline;
use crate::transform::default_subgraph_transforms;

/// Sends one document and returns the `data` of the response.
pub trait Transport {
    fn fetch(&mut self, document: &Document) -> Result<Object, BoxError>;
}

impl<F> Transport for F
where
    F: FnMut(&Document) -> Result<Object, BoxError>,
{
    fn fetch(&mut self, document: &Document) -> Result<Object, BoxError> {
        self(document)
    }
}

/// Asynchronous [`Transport`].
#[async_trait]
pub trait AsyncTransport: Send {
    async fn fetch(&mut self, document: &Document) -> Result<Object, BoxError>;
}

/// A registered endpoint.
#[derive(Debug, Clone)]
pub struct Subgraph {
    url: String,
    schema: SchemaMeta,
    is_subgraph: bool,
    transforms: Vec<Arc<dyn DocumentTransform>>,
}

impl Subgraph {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn schema(&self) -> &SchemaMeta {
        &self.schema
    }

    /// Whether the endpoint follows subgraph conventions (paginated list fields,
    /// `BigDecimal`/`BigInt` scalars). Other endpoints are never paginated.
    pub fn is_subgraph(&self) -> bool {
        self.is_subgraph
    }

    /// Document transforms of this endpoint, outermost first.
    pub fn transforms(&self) -> &[Arc<dyn DocumentTransform>] {
        &self.transforms
    }

    /// Selection of a field of the query root type.
    pub fn query_field(&self, name: &str) -> Result<Selection, SchemaError> {
        Ok(Selection::new(self.schema.query_field(name)?.clone()))
    }

    /// Selection of a field of `type_name`.
    pub fn field(&self, type_name: &str, name: &str) -> Result<Selection, SchemaError> {
        Ok(Selection::new(self.schema.field(type_name, name)?.clone()))
    }
}

/// Registry of endpoints and transforms, and entry point for executing requests.
#[derive(Debug, Clone, Default)]
pub struct Subgrounds {
    configuration: Configuration,
    subgraphs: IndexMap<String, Subgraph>,
    global_transforms: Vec<Arc<dyn RequestTransform>>,
}

#[buildstructor::buildstructor]
impl Subgrounds {
    #[builder(visibility = "pub")]
    fn new(configuration: Option<Configuration>) -> Subgrounds {
        Subgrounds {
            configuration: configuration.unwrap_or_default(),
            subgraphs: IndexMap::new(),
            global_transforms: Vec::new(),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Register an endpoint. Subgraphs get the default scalar transforms.
    pub fn load_schema(
        &mut self,
        url: impl Into<String>,
        schema: SchemaMeta,
        is_subgraph: bool,
    ) -> &Subgraph {
        let url = url.into();
        let transforms = if is_subgraph {
            default_subgraph_transforms()
        } else {
            Vec::new()
        };
        tracing::debug!(%url, is_subgraph, "endpoint registered");
        let subgraph = Subgraph {
            url: url.clone(),
            schema,
            is_subgraph,
            transforms,
        };
        let (index, _) = self.subgraphs.insert_full(url, subgraph);
        &self.subgraphs[index]
    }

    pub fn load_subgraph(&mut self, url: impl Into<String>, schema: SchemaMeta) -> &Subgraph {
        self.load_schema(url, schema, true)
    }

    /// Register an endpoint that does not follow subgraph conventions.
    pub fn load_api(&mut self, url: impl Into<String>, schema: SchemaMeta) -> &Subgraph {
        self.load_schema(url, schema, false)
    }

    pub fn subgraph(&self, url: &str) -> Result<&Subgraph, SubgroundsError> {
        self.subgraphs
            .get(url)
            .ok_or_else(|| SubgroundsError::UnknownEndpoint(url.to_string()))
    }

    fn subgraph_mut(&mut self, url: &str) -> Result<&mut Subgraph, SubgroundsError> {
        self.subgraphs
            .get_mut(url)
            .ok_or_else(|| SubgroundsError::UnknownEndpoint(url.to_string()))
    }

    /// Add a request transform below the existing ones.
    pub fn add_global_transform(&mut self, transform: Arc<dyn RequestTransform>) {
        self.global_transforms.push(transform);
    }

    /// Add a document transform to an endpoint, above its existing transforms.
    pub fn add_document_transform(
        &mut self,
        url: &str,
        transform: Arc<dyn DocumentTransform>,
    ) -> Result<(), SubgroundsError> {
        self.subgraph_mut(url)?.transforms.insert(0, transform);
        Ok(())
    }

    /// Declare a field of `type_name` computed from `dependencies` by `f`.
    ///
    /// The field becomes selectable like any schema field. `default` stands in when
    /// a dependency is missing from the response or `f` fails.
    #[allow(clippy::too_many_arguments)]
    pub fn add_synthetic_field<F>(
        &mut self,
        url: &str,
        type_name: &str,
        name: &str,
        type_: TypeRef,
        f: F,
        default: Value,
        dependencies: Vec<Selection>,
    ) -> Result<FieldMeta, SubgroundsError>
    where
        F: Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let subgraph = self.subgraph_mut(url)?;
        let fmeta = FieldMeta::new(name, type_);
        subgraph.schema.add_field(type_name, fmeta.clone())?;
        let transform = LocalSyntheticField::new(fmeta.clone(), type_name, f, default, dependencies);
        subgraph.transforms.insert(0, Arc::new(transform));
        Ok(fmeta)
    }

    /// Group selections into one document per endpoint, in order of first
    /// appearance. Selections for the same endpoint are merged.
    pub fn make_request(
        &self,
        selections: impl IntoIterator<Item = (String, Selection)>,
    ) -> Result<DataRequest, SubgroundsError> {
        let mut queries: IndexMap<String, Query> = IndexMap::new();
        for (url, selection) in selections {
            self.subgraph(&url)?;
            let query = queries.entry(url).or_default();
            *query = std::mem::take(query).add_selection(selection)?;
        }
        Ok(DataRequest::new(
            queries
                .into_iter()
                .map(|(url, query)| Document::new(url, query))
                .collect(),
        ))
    }

    fn pipeline(&self) -> TransformPipeline {
        self.subgraphs.values().fold(
            self.global_transforms
                .iter()
                .cloned()
                .fold(TransformPipeline::new(), TransformPipeline::with_request_transform),
            |pipeline, subgraph| {
                pipeline.with_document_transforms(&subgraph.url, subgraph.transforms.iter().cloned())
            },
        )
    }

    fn paginator(
        &self,
        document: &Document,
        strategy: PaginationStrategyKind,
    ) -> Result<Paginator, SubgroundsError> {
        let subgraph = self.subgraph(&document.url)?;
        let strategy = if subgraph.is_subgraph {
            strategy
        } else {
            PaginationStrategyKind::Skip
        };
        Paginator::for_document(
            &subgraph.schema,
            document.clone(),
            strategy,
            &self.configuration.pagination,
        )
        .map_err(SubgroundsError::from)
    }

    fn check_endpoints(&self, request: &DataRequest) -> Result<(), SubgroundsError> {
        request
            .documents
            .iter()
            .try_for_each(|document| self.subgraph(&document.url).map(|_| ()))
    }

    /// Start an execution of `request` paginated with `strategy`.
    pub fn execution(
        &self,
        request: DataRequest,
        strategy: PaginationStrategyKind,
    ) -> Result<Execution, SubgroundsError> {
        self.check_endpoints(&request)?;
        let run = self.pipeline().start(request)?;
        Execution::new(run, |document| self.paginator(document, strategy))
    }

    /// Start a page by page execution of `request` paginated with `strategy`.
    pub fn streaming_execution(
        &self,
        request: DataRequest,
        strategy: PaginationStrategyKind,
    ) -> Result<StreamingExecution, SubgroundsError> {
        self.check_endpoints(&request)?;
        let run = self.pipeline().start(request)?;
        StreamingExecution::new(run, |document| self.paginator(document, strategy))
    }

    /// Execute `request` with the configured pagination strategy.
    pub fn execute<T: Transport>(
        &self,
        request: DataRequest,
        transport: &mut T,
    ) -> Result<DataResponse, SubgroundsError> {
        self.execute_with_strategy(request, self.configuration.pagination.strategy, transport)
    }

    #[tracing::instrument(skip_all, fields(documents = request.len(), ?strategy))]
    pub fn execute_with_strategy<T: Transport>(
        &self,
        request: DataRequest,
        strategy: PaginationStrategyKind,
        transport: &mut T,
    ) -> Result<DataResponse, SubgroundsError> {
        let mut execution = self.execution(request, strategy)?;
        let mut page = None;
        loop {
            match execution.resume(page.take())? {
                Step::Continue(document) => {
                    page = Some(transport.fetch(&document).map_err(SubgroundsError::Transport)?);
                }
                Step::Done(response) => return Ok(response),
            }
        }
    }

    /// Execute `request` page by page; each item is one page mapped through the
    /// transforms.
    pub fn execute_iter<'t, T: Transport>(
        &self,
        request: DataRequest,
        transport: &'t mut T,
    ) -> Result<Pages<'t, T>, SubgroundsError> {
        let execution =
            self.streaming_execution(request, self.configuration.pagination.strategy)?;
        Ok(Pages {
            execution,
            transport,
            finished: false,
        })
    }

    /// Execute `request` over an asynchronous transport.
    #[tracing::instrument(skip_all, fields(documents = request.len()))]
    pub async fn execute_async<T: AsyncTransport>(
        &self,
        request: DataRequest,
        transport: &mut T,
    ) -> Result<DataResponse, SubgroundsError> {
        let mut execution = self.execution(request, self.configuration.pagination.strategy)?;
        let mut page = None;
        loop {
            match execution.resume(page.take())? {
                Step::Continue(document) => {
                    page = Some(
                        transport
                            .fetch(&document)
                            .await
                            .map_err(SubgroundsError::Transport)?,
                    );
                }
                Step::Done(response) => return Ok(response),
            }
        }
    }

    /// Build, execute and return the data of one document per endpoint.
    pub fn query_json<T: Transport>(
        &self,
        selections: impl IntoIterator<Item = (String, Selection)>,
        transport: &mut T,
    ) -> Result<Vec<Object>, SubgroundsError> {
        let request = self.make_request(selections)?;
        let response = self.execute(request, transport)?;
        Ok(response
            .responses
            .into_iter()
            .map(|response| response.data)
            .collect())
    }
}

/// Pages of a streaming execution, see [`Subgrounds::execute_iter`].
pub struct Pages<'t, T> {
    execution: StreamingExecution,
    transport: &'t mut T,
    finished: bool,
}

impl<T: Transport> Iterator for Pages<'_, T> {
    type Item = Result<DocumentResponse, SubgroundsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut page = None;
        let result = loop {
            match self.execution.resume(page.take()) {
                Ok(PageStep::Fetch(document)) => match self.transport.fetch(&document) {
                    Ok(data) => page = Some(data),
                    Err(err) => break Some(Err(SubgroundsError::Transport(err))),
                },
                Ok(PageStep::Page(response)) => return Some(Ok(response)),
                Ok(PageStep::Done) => break None,
                Err(err) => break Some(Err(err)),
            }
        };
        self.finished = true;
        result
    }
}
