//! Resumable executions of a transformed request.
//!
//! An execution hands out one [`Document`] at a time and is resumed with the data
//! received for it. Documents of the request are paginated one after another.
//! [`Execution`] merges every page and returns the whole response at the end;
//! [`StreamingExecution`] hands back each page as soon as it has been mapped through
//! the transforms.
use crate::Step;
use crate::error::SubgroundsError;
use crate::json_ext;
use crate::json_ext::Object;
use crate::pagination::Paginator;
use crate::query::DataResponse;
use crate::query::Document;
use crate::query::DocumentResponse;
use crate::transform::TransformRun;

#[derive(Debug)]
struct Planned {
    document: Document,
    paginator: Paginator,
}

impl Planned {
    // Pages carry the fields pagination added; keep what the document asked for.
    fn trim(&self, mut data: Object) -> DocumentResponse {
        json_ext::project(&mut data, &self.document.query.selection);
        DocumentResponse::new(self.document.url.clone(), data)
    }
}

fn plan<F>(run: &TransformRun, mut paginator: F) -> Result<Vec<Planned>, SubgroundsError>
where
    F: FnMut(&Document) -> Result<Paginator, SubgroundsError>,
{
    run.request()
        .documents
        .iter()
        .map(|document| {
            Ok(Planned {
                paginator: paginator(document)?,
                document: document.clone(),
            })
        })
        .collect()
}

/// Executes a request and returns its merged response.
#[derive(Debug)]
pub struct Execution {
    run: TransformRun,
    planned: Vec<Planned>,
    current: usize,
    data: Object,
    responses: Vec<DocumentResponse>,
    awaiting: bool,
    done: bool,
}

impl Execution {
    /// `paginator` builds the paginator of each document of the transformed request.
    pub fn new<F>(run: TransformRun, paginator: F) -> Result<Self, SubgroundsError>
    where
        F: FnMut(&Document) -> Result<Paginator, SubgroundsError>,
    {
        Ok(Self {
            planned: plan(&run, paginator)?,
            run,
            current: 0,
            data: Object::new(),
            responses: Vec::new(),
            awaiting: false,
            done: false,
        })
    }

    /// Resume with the data of the last document handed out (`None` on the first
    /// call). Returns the next document to send, or the final response.
    ///
    /// Any error ends the execution; pages merged so far are discarded.
    pub fn resume(
        &mut self,
        page: Option<Object>,
    ) -> Result<Step<Document, DataResponse>, SubgroundsError> {
        let result = self.advance(page);
        if result.is_err() {
            self.done = true;
            self.data = Object::new();
            self.responses.clear();
        }
        result
    }

    fn advance(&mut self, page: Option<Object>) -> Result<Step<Document, DataResponse>, SubgroundsError> {
        if self.done {
            return Err(SubgroundsError::Completed);
        }
        match (self.awaiting, &page) {
            (true, None) => return Err(SubgroundsError::step("resumed without the data of the last page")),
            (false, Some(_)) => return Err(SubgroundsError::step("resumed with data no page asked for")),
            _ => {}
        }
        self.awaiting = false;

        let mut page = page;
        while let Some(planned) = self.planned.get_mut(self.current) {
            if let Some(data) = &page {
                self.data = json_ext::merge_objects(std::mem::take(&mut self.data), data.clone())?;
            }
            match planned.paginator.resume(page.as_ref())? {
                Step::Continue(document) => {
                    self.awaiting = true;
                    return Ok(Step::Continue(document));
                }
                Step::Done(()) => {
                    let response = planned.trim(std::mem::take(&mut self.data));
                    self.responses.push(response);
                    self.current += 1;
                    page = None;
                }
            }
        }

        self.done = true;
        let response = DataResponse::new(std::mem::take(&mut self.responses));
        Ok(Step::Done(self.run.transform_response(response)?))
    }
}

/// What a [`StreamingExecution`] hands out.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStep {
    /// Send this document and resume with its data.
    Fetch(Document),
    /// A page of the response, mapped through the transforms. Resume with `None`.
    Page(DocumentResponse),
    /// Every document has been paginated.
    Done,
}

/// Executes a request page by page.
///
/// Transforms must keep the number of documents of the request unchanged, so that
/// each page can be mapped back on its own.
#[derive(Debug)]
pub struct StreamingExecution {
    run: TransformRun,
    planned: Vec<Planned>,
    current: usize,
    pending: Option<Step<Document, ()>>,
    awaiting: bool,
    done: bool,
}

impl StreamingExecution {
    pub fn new<F>(run: TransformRun, paginator: F) -> Result<Self, SubgroundsError>
    where
        F: FnMut(&Document) -> Result<Paginator, SubgroundsError>,
    {
        Ok(Self {
            planned: plan(&run, paginator)?,
            run,
            current: 0,
            pending: None,
            awaiting: false,
            done: false,
        })
    }

    /// Resume with the data of the last fetched document, or `None` otherwise.
    pub fn resume(&mut self, page: Option<Object>) -> Result<PageStep, SubgroundsError> {
        let result = self.advance(page);
        if result.is_err() {
            self.done = true;
        }
        result
    }

    fn advance(&mut self, page: Option<Object>) -> Result<PageStep, SubgroundsError> {
        if self.done {
            return Err(SubgroundsError::Completed);
        }
        match (self.awaiting, page) {
            (true, None) => Err(SubgroundsError::step("resumed without the data of the last page")),
            (false, Some(_)) => Err(SubgroundsError::step("resumed with data no page asked for")),
            (true, Some(data)) => {
                self.awaiting = false;
                let Some(planned) = self.planned.get_mut(self.current) else {
                    crate::bail!("no document is being paginated");
                };
                self.pending = Some(planned.paginator.resume(Some(&data))?);
                let page = planned.trim(data);
                Ok(PageStep::Page(self.run.transform_page(self.current, page)?))
            }
            (false, None) => {
                while let Some(planned) = self.planned.get_mut(self.current) {
                    let step = match self.pending.take() {
                        Some(step) => step,
                        None => planned.paginator.resume(None)?,
                    };
                    match step {
                        Step::Continue(document) => {
                            self.awaiting = true;
                            return Ok(PageStep::Fetch(document));
                        }
                        Step::Done(()) => self.current += 1,
                    }
                }
                self.done = true;
                Ok(PageStep::Done)
            }
        }
    }
}
