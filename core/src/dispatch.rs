//! Remote dispatch: how the frame loop talks to the authority without blocking.
//!
//! RULE: The engine never leaves the frame thread.
//! Requests go out through `submit`; results come back through `poll`,
//! which the session drains once per frame. Nothing here ever waits.

use crate::{
    authority::{execute, Authority, RemoteReply, RemoteRequest},
    error::{RemoteError, RemoteResult},
    types::RequestId,
};
use std::{
    collections::VecDeque,
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

/// The result of one dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCompletion {
    pub request_id: RequestId,
    pub request: RemoteRequest,
    pub result: RemoteResult<RemoteReply>,
}

pub trait Dispatcher {
    /// Queue a request. Never blocks.
    fn submit(&mut self, request: RemoteRequest) -> RequestId;

    /// Every completion that has arrived since the last poll. Never blocks.
    fn poll(&mut self) -> Vec<RemoteCompletion>;
}

/// Runs requests on a dedicated worker thread that owns the authority.
/// Requests are executed one at a time, in submission order.
pub struct ThreadDispatcher {
    requests: Option<Sender<(RequestId, RemoteRequest)>>,
    completions: Receiver<RemoteCompletion>,
    worker: Option<JoinHandle<()>>,
    undeliverable: Vec<RemoteCompletion>,
    next_id: RequestId,
}

impl ThreadDispatcher {
    pub fn spawn(authority: Box<dyn Authority>) -> anyhow::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<(RequestId, RemoteRequest)>();
        let (completion_tx, completion_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("authority".into())
            .spawn(move || {
                for (request_id, request) in request_rx {
                    let result = execute(authority.as_ref(), &request);
                    let completion = RemoteCompletion { request_id, request, result };
                    if completion_tx.send(completion).is_err() {
                        break; // session gone
                    }
                }
                log::debug!("authority worker stopped");
            })?;

        Ok(Self {
            requests: Some(request_tx),
            completions: completion_rx,
            worker: Some(worker),
            undeliverable: Vec::new(),
            next_id: 1,
        })
    }
}

impl Dispatcher for ThreadDispatcher {
    fn submit(&mut self, request: RemoteRequest) -> RequestId {
        let request_id = self.next_id;
        self.next_id += 1;

        let sent = match &self.requests {
            Some(tx) => tx.send((request_id, request)).map_err(|e| e.0 .1),
            None => Err(request),
        };
        if let Err(request) = sent {
            log::warn!("authority worker unavailable, dropping {}", request.kind());
            self.undeliverable.push(RemoteCompletion {
                request_id,
                request,
                result: Err(RemoteError::TransientNetwork("worker unavailable".into())),
            });
        }
        request_id
    }

    fn poll(&mut self) -> Vec<RemoteCompletion> {
        let mut done: Vec<RemoteCompletion> = self.undeliverable.drain(..).collect();
        done.extend(self.completions.try_iter());
        done
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after in-flight work.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("authority worker panicked");
            }
        }
    }
}

/// Executes each request at submit time and hands the completion
/// out on the next poll. Deterministic; used offline and in tests.
pub struct InlineDispatcher {
    authority: Box<dyn Authority>,
    ready: VecDeque<RemoteCompletion>,
    next_id: RequestId,
}

impl InlineDispatcher {
    pub fn new(authority: Box<dyn Authority>) -> Self {
        Self {
            authority,
            ready: VecDeque::new(),
            next_id: 1,
        }
    }
}

impl Dispatcher for InlineDispatcher {
    fn submit(&mut self, request: RemoteRequest) -> RequestId {
        let request_id = self.next_id;
        self.next_id += 1;
        let result = execute(self.authority.as_ref(), &request);
        self.ready.push_back(RemoteCompletion { request_id, request, result });
        request_id
    }

    fn poll(&mut self) -> Vec<RemoteCompletion> {
        self.ready.drain(..).collect()
    }
}
