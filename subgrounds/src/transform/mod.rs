//! Request and response transforms.
//!
//! A transform rewrites what is sent and maps what comes back so that the caller
//! sees a response shaped like the request it built. Document transforms work on
//! one [`Document`] at a time and are scoped to one endpoint; request transforms see
//! the whole [`DataRequest`].
//!
//! A [`TransformPipeline`] runs in two phases. [`TransformPipeline::start`] pushes
//! the request down through every stage and records what each stage received; the
//! returned [`TransformRun`] then maps responses back up through the stages in
//! reverse order, as many times as needed.
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::TransformError;
use crate::query::DataRequest;
use crate::query::DataResponse;
use crate::query::Document;
use crate::query::DocumentResponse;

mod synthetic_field;
mod type_transform;

pub use synthetic_field::LocalSyntheticField;
pub use synthetic_field::SyntheticFn;
pub use type_transform::TypeTransform;
pub use type_transform::big_decimal;
pub use type_transform::big_int;
pub use type_transform::default_subgraph_transforms;

/// Rewrites one document and maps its response back.
pub trait DocumentTransform: Debug + Send + Sync {
    fn transform_document(&self, document: Document) -> Result<Document, TransformError> {
        Ok(document)
    }

    /// `document` is the document this transform received, before its own rewrite.
    fn transform_response(
        &self,
        document: &Document,
        response: DocumentResponse,
    ) -> Result<DocumentResponse, TransformError> {
        let _ = document;
        Ok(response)
    }
}

/// Rewrites a whole request and maps its response back.
pub trait RequestTransform: Debug + Send + Sync {
    fn transform_request(&self, request: DataRequest) -> Result<DataRequest, TransformError> {
        Ok(request)
    }

    /// `request` is the request this transform received, before its own rewrite.
    fn transform_response(
        &self,
        request: &DataRequest,
        response: DataResponse,
    ) -> Result<DataResponse, TransformError> {
        let _ = request;
        Ok(response)
    }
}

/// A document transform applied to the documents of one endpoint.
///
/// Documents targeting other endpoints pass through untouched, in place.
#[derive(Debug, Clone)]
pub struct DocumentRequestTransform {
    transform: Arc<dyn DocumentTransform>,
    url: String,
}

impl DocumentRequestTransform {
    pub fn new(transform: Arc<dyn DocumentTransform>, url: impl Into<String>) -> Self {
        Self {
            transform,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RequestTransform for DocumentRequestTransform {
    fn transform_request(&self, request: DataRequest) -> Result<DataRequest, TransformError> {
        let documents = request
            .documents
            .into_iter()
            .map(|document| {
                if document.url == self.url {
                    self.transform.transform_document(document)
                } else {
                    Ok(document)
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(DataRequest::new(documents))
    }

    fn transform_response(
        &self,
        request: &DataRequest,
        response: DataResponse,
    ) -> Result<DataResponse, TransformError> {
        if request.len() != response.len() {
            return Err(TransformError::ResponseCountMismatch {
                expected: request.len(),
                received: response.len(),
            });
        }
        let responses = request
            .documents
            .iter()
            .zip(response.responses)
            .map(|(document, response)| {
                if document.url == self.url {
                    self.transform.transform_response(document, response)
                } else {
                    Ok(response)
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(DataResponse::new(responses))
    }
}

/// An ordered stack of transforms, outermost first.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    stages: Vec<Arc<dyn RequestTransform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request transform below the current stages.
    pub fn with_request_transform(mut self, transform: Arc<dyn RequestTransform>) -> Self {
        self.stages.push(transform);
        self
    }

    /// Append document transforms scoped to `url` below the current stages, the first
    /// one outermost.
    pub fn with_document_transforms(
        mut self,
        url: &str,
        transforms: impl IntoIterator<Item = Arc<dyn DocumentTransform>>,
    ) -> Self {
        self.stages.extend(transforms.into_iter().map(|transform| {
            Arc::new(DocumentRequestTransform::new(transform, url)) as Arc<dyn RequestTransform>
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Push `request` down through every stage.
    pub fn start(&self, request: DataRequest) -> Result<TransformRun, TransformError> {
        let mut received = Vec::with_capacity(self.stages.len());
        let mut request = request;
        for stage in &self.stages {
            let next = stage.transform_request(request.clone())?;
            received.push(request);
            request = next;
        }
        tracing::trace!(
            stages = self.stages.len(),
            documents = request.len(),
            "request transformed"
        );
        Ok(TransformRun {
            stages: self.stages.clone(),
            received,
            request,
        })
    }
}

/// A request that went down a [`TransformPipeline`], waiting for its responses.
#[derive(Debug, Clone)]
pub struct TransformRun {
    stages: Vec<Arc<dyn RequestTransform>>,
    received: Vec<DataRequest>,
    request: DataRequest,
}

impl TransformRun {
    /// The fully transformed request, to be executed.
    pub fn request(&self) -> &DataRequest {
        &self.request
    }

    /// The request as the caller built it.
    pub fn original(&self) -> &DataRequest {
        self.received.first().unwrap_or(&self.request)
    }

    /// Map the response of the transformed request back up through every stage.
    pub fn transform_response(&self, response: DataResponse) -> Result<DataResponse, TransformError> {
        self.stages
            .iter()
            .zip(&self.received)
            .rev()
            .try_fold(response, |response, (stage, request)| {
                stage.transform_response(request, response)
            })
    }

    /// Map the response to a single document of the transformed request back up
    /// through every stage.
    ///
    /// # Errors
    ///
    /// Requires every stage to have kept the number of documents unchanged, so that
    /// `index` designates the same document at every level.
    pub fn transform_page(
        &self,
        index: usize,
        page: DocumentResponse,
    ) -> Result<DocumentResponse, TransformError> {
        let len = self.request.len();
        if index >= len {
            return Err(TransformError::PageIndexOutOfRange { index, len });
        }
        if let Some(changed) = self.received.iter().find(|request| request.len() != len) {
            return Err(TransformError::DocumentCountChanged {
                before: changed.len(),
                after: len,
            });
        }

        let mut response = DataResponse::new(vec![page]);
        for (stage, request) in self.stages.iter().zip(&self.received).rev() {
            let single = DataRequest::new(vec![request.documents[index].clone()]);
            response = stage.transform_response(&single, response)?;
        }
        let received = response.len();
        response
            .responses
            .pop()
            .filter(|_| received == 1)
            .ok_or(TransformError::ResponseCountMismatch {
                expected: 1,
                received,
            })
    }
}
