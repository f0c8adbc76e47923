//! Caller-facing handle to the worker thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use natter_shared::{Chat, Message, OutgoingMessage, ServerIdentity};
use natter_store::Database;

use crate::config::ClientConfig;
use crate::engine::Engine;
use crate::error::{ClientError, Result};
use crate::events::{Completion, CompletionSender};
use crate::state::ConnectionState;
use crate::work::{WorkQueue, WorkUnit};

const WORKER_THREAD_NAME: &str = "natter-worker";

/// Handle to a running client.
///
/// Every request method queues work and returns at once. Callbacks never run
/// on the worker thread: they are delivered by [`dispatch`](Self::dispatch)
/// or [`dispatch_timeout`](Self::dispatch_timeout) on whichever thread calls
/// them.
pub struct Client {
    queue: Arc<WorkQueue>,
    shutdown: Arc<AtomicBool>,
    completions: mpsc::Receiver<Completion>,
    state: watch::Receiver<ConnectionState>,
    worker: Option<JoinHandle<()>>,
}

impl Client {
    /// Open the cache and start the worker thread.
    ///
    /// Returns once the worker is running. Fails if the cache cannot be
    /// opened or the thread cannot be started.
    pub fn start(config: ClientConfig) -> Result<Self> {
        let queue = Arc::new(WorkQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (completion_tx, completions) = mpsc::channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let worker = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(WORKER_THREAD_NAME.into())
                .spawn(move || {
                    let cache = match &config.database_path {
                        Some(path) => Database::open_at(path),
                        None => Database::new(),
                    };
                    let cache = match cache {
                        Ok(cache) => cache,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.into()));
                            return;
                        }
                    };

                    let rt = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = ready_tx.send(Err(ClientError::WorkerStart(e.to_string())));
                            return;
                        }
                    };

                    let engine = Engine::new(
                        config,
                        queue,
                        shutdown,
                        CompletionSender::new(completion_tx),
                        state_tx,
                        cache,
                    );
                    let _ = ready_tx.send(Ok(()));
                    rt.block_on(engine.run());
                })
                .map_err(|e| ClientError::WorkerStart(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(ClientError::WorkerStart(
                    "worker exited during startup".into(),
                ));
            }
        }

        info!("client started");
        Ok(Self {
            queue,
            shutdown,
            completions,
            state,
            worker: Some(worker),
        })
    }

    /// Connect to `target` (`host` or `host:port`) as `name`.
    ///
    /// Any existing connection is dropped first. `on_done` receives
    /// `(true, Some(chats))` once the server has answered the handshake, or
    /// `(false, None)` if it could not be completed.
    pub fn connect(
        &self,
        target: impl Into<String>,
        name: impl Into<String>,
        on_done: impl FnOnce(bool, Option<Vec<Chat>>) + Send + 'static,
    ) {
        self.queue.enqueue(WorkUnit::Connect {
            target: target.into(),
            name: name.into(),
            on_done: Box::new(on_done),
        });
    }

    /// Ask the connected server for its chats.
    pub fn list_chats(&self, on_done: impl FnOnce(Vec<Chat>) + Send + 'static) {
        self.queue.enqueue(WorkUnit::ListChats {
            on_done: Box::new(on_done),
        });
    }

    /// Create a chat on the connected server.
    pub fn new_chat(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        on_done: impl FnOnce(bool) + Send + 'static,
    ) {
        self.queue.enqueue(WorkUnit::NewChat {
            name: name.into(),
            description: description.into(),
            on_done: Box::new(on_done),
        });
    }

    /// Subscribe to `chat`.
    ///
    /// `on_result` gets the messages already cached locally. The server is
    /// only asked for newer ones, each of which is cached and then passed to
    /// `on_message`.
    pub fn subscribe(
        &self,
        chat: Chat,
        on_result: impl FnOnce(bool, Vec<Message>) + Send + 'static,
        on_message: impl Fn(Message) + Send + Sync + 'static,
    ) {
        self.queue.enqueue(WorkUnit::Subscribe {
            chat,
            on_result: Box::new(on_result),
            on_message: Arc::new(on_message),
        });
    }

    /// Send a text message to the chat last subscribed to.
    pub fn send_message(
        &self,
        text: impl Into<String>,
        on_receipt: impl FnOnce(bool, Option<String>) + Send + 'static,
    ) {
        self.send(OutgoingMessage::text(text), on_receipt);
    }

    /// Send any message, attachments included.
    pub fn send(
        &self,
        message: OutgoingMessage,
        on_receipt: impl FnOnce(bool, Option<String>) + Send + 'static,
    ) {
        self.queue.enqueue(WorkUnit::SendMessage {
            message,
            on_receipt: Box::new(on_receipt),
        });
    }

    /// Chats cached for `server`, read without contacting any server.
    pub fn cached_chats(
        &self,
        server: ServerIdentity,
        on_done: impl FnOnce(Vec<Chat>) + Send + 'static,
    ) {
        self.queue.enqueue(WorkUnit::CachedChats {
            server,
            on_done: Box::new(on_done),
        });
    }

    /// Every server identity the cache has seen.
    pub fn known_servers(&self, on_done: impl FnOnce(Vec<ServerIdentity>) + Send + 'static) {
        self.queue.enqueue(WorkUnit::KnownServers {
            on_done: Box::new(on_done),
        });
    }

    /// Run every completion delivered so far. Never blocks.
    ///
    /// Returns how many callbacks ran.
    pub fn dispatch(&self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.run_completion(completion);
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for a completion, then run it and everything
    /// else already delivered.
    pub fn dispatch_timeout(&self, timeout: Duration) -> usize {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.run_completion(completion);
                1 + self.dispatch()
            }
            Err(_) => 0,
        }
    }

    fn run_completion(&self, completion: Completion) {
        debug!(kind = completion.kind(), "running completion");
        completion.run();
    }

    /// Current connection state as last published by the worker.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Completions not yet dispatched are dropped without running.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        debug!("stopping worker");
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.wake();

        if worker.join().is_err() {
            warn!("worker thread panicked");
        }

        let dropped = self.completions.try_iter().count();
        if dropped > 0 {
            debug!(dropped, "discarded undelivered completions");
        }
        info!("client stopped");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}
