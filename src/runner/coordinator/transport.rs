//! Transports: thin adapters that carry requests to a [`Coordinator`].
//!
//! ## Notes
//! - [`LocalTransport`] calls the coordinator directly (runtime-adapter shape).
//! - [`WorkerTransport`] owns the coordinator on a worker task fed by a request channel (pool-worker shape).
//! - [`Pool`] splits specifications per project and sends each group through any transport concurrently (pool shape).

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use super::reporter::{EventReporter, HostEvent};
use super::{Coordinator, CoordinatorError};
use crate::runner::checker::{CheckerCycle, CheckerError};
use crate::runner::tasks::TaskNode;

const REQUEST_CAPACITY: usize = 16;

/// One test file, optionally scoped to a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestSpec {
    pub project: Option<String>,
    pub file: PathBuf,
}

impl TestSpec {
    pub fn new(project: Option<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            project,
            file: file.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    Collect(Vec<TestSpec>),
    Run(Vec<TestSpec>),
    Stop,
}

#[derive(Debug, Clone)]
pub enum Response {
    Collected(Vec<TaskNode>),
    Finished(Vec<Arc<CheckerCycle>>),
    Stopped,
}

/// Group specifications by project, keeping file order within a project.
pub fn group_by_project(specs: Vec<TestSpec>) -> BTreeMap<Option<String>, Vec<PathBuf>> {
    let mut groups: BTreeMap<Option<String>, Vec<PathBuf>> = BTreeMap::new();
    for spec in specs {
        groups.entry(spec.project).or_default().push(spec.file);
    }
    groups
}

/// Carries requests to a coordinator and exposes its host events.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, CoordinatorError>> + Send;

    fn events(&self) -> broadcast::Receiver<HostEvent>;
}

// ============================================================================
// Local
// ============================================================================

/// Direct in-process calls.
#[derive(Clone)]
pub struct LocalTransport {
    coordinator: Coordinator,
    events: EventReporter,
}

impl LocalTransport {
    /// `events` must be the reporter the coordinator was built with.
    pub fn new(coordinator: Coordinator, events: EventReporter) -> Self {
        Self { coordinator, events }
    }
}

impl Transport for LocalTransport {
    async fn send(&self, request: Request) -> Result<Response, CoordinatorError> {
        self.coordinator.handle(request).await
    }

    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Worker
// ============================================================================

type Envelope = (Request, oneshot::Sender<Result<Response, CoordinatorError>>);

/// A worker task owning the coordinator.
///
/// Requests are handled concurrently so `Stop` can interrupt a pending `Run`; the coordinator serializes work per
/// project. Dropping the transport closes the channel and the worker stops the coordinator.
pub struct WorkerTransport {
    requests: mpsc::Sender<Envelope>,
    events: EventReporter,
    worker: JoinHandle<()>,
}

impl WorkerTransport {
    pub fn spawn(coordinator: Coordinator, events: EventReporter) -> Self {
        let (requests, mut rx) = mpsc::channel::<Envelope>(REQUEST_CAPACITY);
        let worker = tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let _ = reply.send(coordinator.handle(request).await);
                });
            }
            tracing::debug!("request channel closed, stopping worker");
            coordinator.stop().await;
        });
        Self {
            requests,
            events,
            worker,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

impl Transport for WorkerTransport {
    async fn send(&self, request: Request) -> Result<Response, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send((request, reply))
            .await
            .map_err(|_| CoordinatorError::TransportClosed)?;
        response.await.map_err(|_| CoordinatorError::TransportClosed)?
    }

    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Dispatches per-project groups through a transport concurrently.
pub struct Pool<T> {
    transport: Arc<T>,
}

impl<T: Transport + 'static> Pool<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.transport.events()
    }

    pub async fn collect(&self, specs: Vec<TestSpec>) -> Result<Vec<TaskNode>, CoordinatorError> {
        let mut files = Vec::new();
        for response in self.dispatch(specs, Request::Collect).await? {
            if let Response::Collected(collected) = response {
                files.extend(collected);
            }
        }
        Ok(files)
    }

    pub async fn run(&self, specs: Vec<TestSpec>) -> Result<Vec<Arc<CheckerCycle>>, CoordinatorError> {
        let mut cycles = Vec::new();
        for response in self.dispatch(specs, Request::Run).await? {
            if let Response::Finished(finished) = response {
                cycles.extend(finished);
            }
        }
        Ok(cycles)
    }

    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        self.transport.send(Request::Stop).await.map(|_| ())
    }

    /// Send one request per project group and return the responses in project order.
    async fn dispatch(
        &self,
        specs: Vec<TestSpec>,
        request: fn(Vec<TestSpec>) -> Request,
    ) -> Result<Vec<Response>, CoordinatorError> {
        let mut set = JoinSet::new();
        for (index, (project, files)) in group_by_project(specs).into_iter().enumerate() {
            let group = files
                .into_iter()
                .map(|file| TestSpec::new(project.clone(), file))
                .collect();
            let transport = Arc::clone(&self.transport);
            set.spawn(async move { (index, transport.send(request(group)).await) });
        }

        let mut responses = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            let (index, response) = joined.map_err(CheckerError::from)?;
            responses.push((index, response?));
        }
        responses.sort_by_key(|(index, _)| *index);
        Ok(responses.into_iter().map(|(_, response)| response).collect())
    }
}
