//! Request/response front door for the engine.
//!
//! Callers hold a cheap, cloneable `DispatcherHandle` and `call` it with a
//! `Request`. A background task receives each request with a oneshot reply
//! channel and runs it on the blocking pool, since storage is synchronous.
//! Dropping the `call` future is cancellation: the reply is discarded.
//! Operation failures come back as `Response::Failure`; only a dead
//! dispatcher is an `Err`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use hachimi_types::{ContentRecord, PartialContentRecord};

use crate::engine::{ObserveOutcome, ResonanceEngine};
use crate::error::EngineError;
use crate::log::LogEntry;

/// Default depth of the request queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Message types accepted by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Merge an observation; `None` is a skipped extraction
    Observe(Option<PartialContentRecord>),
    CheckExistence { id: String },
    Exempt { id: String },
    Resonance { count: usize },
    Click { id: String },
    Hover { id: String },
    /// Delete records last updated at or before `timestamp` (unix ms)
    DeleteBefore { timestamp: i64 },
    DeleteAll,
    AddLog(LogEntry),
    /// Replace the buffered logs, keeping the newest that fit
    SyncLogs(Vec<LogEntry>),
    GetLogs,
    ClearLogs,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Observe(_) => "observe",
            Request::CheckExistence { .. } => "check_existence",
            Request::Exempt { .. } => "exempt",
            Request::Resonance { .. } => "resonance",
            Request::Click { .. } => "click",
            Request::Hover { .. } => "hover",
            Request::DeleteBefore { .. } => "delete_before",
            Request::DeleteAll => "delete_all",
            Request::AddLog(_) => "add_log",
            Request::SyncLogs(_) => "sync_logs",
            Request::GetLogs => "get_logs",
            Request::ClearLogs => "clear_logs",
        }
    }
}

/// Replies, one shape per request family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Observed(ObserveOutcome),
    Exists { exists: bool },
    /// Exempt and feedback; `changed` is false when the record was missing
    Updated { changed: bool },
    Selection { records: Vec<ContentRecord> },
    Deleted { count: usize },
    Logs { entries: Vec<LogEntry> },
    Ack,
    Failure { error: String },
}

type Envelope = (Request, oneshot::Sender<Response>);

/// Spawns the dispatcher task.
pub struct Dispatcher;

impl Dispatcher {
    /// Start serving requests against `engine`. Must be called inside a
    /// tokio runtime. The task ends when every handle is dropped.
    pub fn spawn(engine: Arc<ResonanceEngine>) -> DispatcherHandle {
        Self::spawn_with_capacity(engine, DEFAULT_QUEUE_DEPTH)
    }

    pub fn spawn_with_capacity(engine: Arc<ResonanceEngine>, capacity: usize) -> DispatcherHandle {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(capacity.max(1));

        tokio::spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let name = request.name();
                    let response =
                        match tokio::task::spawn_blocking(move || handle(&engine, request)).await {
                            Ok(response) => response,
                            Err(e) => {
                                warn!(request = name, error = %e, "Request handler panicked");
                                Response::Failure {
                                    error: format!("{} aborted: {}", name, e),
                                }
                            }
                        };
                    if reply.send(response).is_err() {
                        debug!(request = name, "Caller stopped waiting");
                    }
                });
            }
            debug!("Dispatcher stopped");
        });

        DispatcherHandle { sender }
    }
}

/// Cloneable client side of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<Envelope>,
}

impl DispatcherHandle {
    /// Send a request and wait for its response.
    pub async fn call(&self, request: Request) -> Result<Response, EngineError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send((request, reply))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        response.await.map_err(|_| EngineError::ChannelClosed)
    }
}

fn failure(err: EngineError) -> Response {
    Response::Failure {
        error: err.to_string(),
    }
}

/// Run one request synchronously.
pub fn handle(engine: &ResonanceEngine, request: Request) -> Response {
    match request {
        Request::Observe(observation) => engine
            .observe(observation)
            .map_or_else(failure, Response::Observed),
        Request::CheckExistence { id } => engine
            .exists(&id)
            .map_or_else(failure, |exists| Response::Exists { exists }),
        Request::Exempt { id } => engine
            .exempt(&id)
            .map_or_else(failure, |changed| Response::Updated { changed }),
        Request::Resonance { count } => engine
            .resonance_selection(count)
            .map_or_else(failure, |records| Response::Selection { records }),
        Request::Click { id } => engine
            .report_click(&id)
            .map_or_else(failure, |changed| Response::Updated { changed }),
        Request::Hover { id } => engine
            .report_hover(&id)
            .map_or_else(failure, |changed| Response::Updated { changed }),
        Request::DeleteBefore { timestamp } => {
            match chrono::DateTime::from_timestamp_millis(timestamp) {
                Some(cutoff) => engine
                    .delete_before(cutoff)
                    .map_or_else(failure, |count| Response::Deleted { count }),
                None => failure(EngineError::InvalidInput(format!(
                    "timestamp out of range: {}",
                    timestamp
                ))),
            }
        }
        Request::DeleteAll => engine
            .delete_all()
            .map_or_else(failure, |count| Response::Deleted { count }),
        Request::AddLog(entry) => {
            engine.logs().push(entry);
            Response::Ack
        }
        Request::SyncLogs(entries) => {
            engine.logs().sync(entries);
            Response::Ack
        }
        Request::GetLogs => Response::Logs {
            entries: engine.logs().snapshot(),
        },
        Request::ClearLogs => {
            engine.logs().clear();
            Response::Ack
        }
    }
}
