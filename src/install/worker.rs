//! The install worker: a task that performs writes one at a time and reports
//! back through messages.

use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::messages::{WorkerRequest, WorkerResponse, WriteRequest};
use super::pipeline::{ProgressSink, write_file_to};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// Responses the worker may queue before it waits for the caller to catch up.
const RESPONSE_CAPACITY: usize = 4;

/// Handle to a running install worker.
///
/// Dropping the handle closes the request channel and the worker exits after
/// finishing its current write.
pub struct InstallWorker {
    requests: mpsc::Sender<WorkerRequest>,
    responses: mpsc::Receiver<WorkerResponse>,
    task: JoinHandle<()>,
}

impl InstallWorker {
    /// Start a worker on the current tokio runtime.
    pub fn spawn(config: PipelineConfig) -> Self {
        let (requests, request_rx) = mpsc::channel(1);
        let (response_tx, responses) = mpsc::channel(RESPONSE_CAPACITY);
        let task = tokio::spawn(run(config, request_rx, response_tx));
        Self {
            requests,
            responses,
            task,
        }
    }

    /// Send a write request and wait for its terminal response, passing each
    /// progress value to `on_progress` on the way.
    pub async fn write<F>(&mut self, request: WriteRequest, mut on_progress: F) -> Result<()>
    where
        F: FnMut(u64),
    {
        let path = request.path.clone();
        self.requests
            .send(WorkerRequest::Write(request))
            .await
            .map_err(|_| Error::WorkerStopped)?;

        while let Some(response) = self.responses.recv().await {
            match response {
                WorkerResponse::Progress { path: p, value } if p == path => on_progress(value),
                WorkerResponse::Write { path: p, result } if p == path => return result,
                other => debug!("ignoring stale worker response {other:?}"),
            }
        }
        Err(Error::WorkerStopped)
    }

    /// Close the request channel and wait for the worker to exit.
    pub async fn shutdown(self) {
        let Self { requests, task, .. } = self;
        drop(requests);
        let _ = task.await;
    }
}

/// Forwards pipeline progress as [`WorkerResponse::Progress`] messages.
struct ProgressMessages {
    path: PathBuf,
    responses: mpsc::Sender<WorkerResponse>,
}

#[async_trait]
impl ProgressSink for ProgressMessages {
    async fn progress(&mut self, value: u64) {
        let message = WorkerResponse::Progress {
            path: self.path.clone(),
            value,
        };
        // a closed channel is noticed by the terminal send in `run`
        let _ = self.responses.send(message).await;
    }
}

async fn run(
    config: PipelineConfig,
    mut requests: mpsc::Receiver<WorkerRequest>,
    responses: mpsc::Sender<WorkerResponse>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Write(write) => {
                let mut progress = ProgressMessages {
                    path: write.path.clone(),
                    responses: responses.clone(),
                };
                let result = write_file_to(&write, &config, &mut progress).await.map(|_| ());

                let done = WorkerResponse::Write {
                    path: progress.path,
                    result,
                };
                if responses.send(done).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("install worker stopped");
}
