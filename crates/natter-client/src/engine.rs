//! Worker loop that owns the connection and the local cache.
//!
//! The loop runs on a dedicated thread inside a current-thread tokio
//! runtime. Each turn it drains the work queue, dispatches at most one
//! buffered server frame, and otherwise sleeps until the queue is
//! notified, the socket becomes readable or a heartbeat is due.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use natter_shared::{
    Chat, ClientCommand, Message, OutgoingMessage, RequestId, ServerCommand, ServerIdentity,
};
use natter_store::Database;

use crate::config::ClientConfig;
use crate::connection::{resolve_target, Connection};
use crate::error::{ClientError, Result};
use crate::events::{
    CompletionSender, ConnectCallback, ListChatsCallback, MessageCallback, NewChatCallback,
    ReceiptCallback, ServersCallback, SubscribeCallback,
};
use crate::state::ConnectionState;
use crate::work::{WorkQueue, WorkUnit};

/// A request written to the server and waiting for its response.
enum Pending {
    Connect(ConnectCallback),
    ListChats(ListChatsCallback),
    NewChat(NewChatCallback),
    Subscribe {
        server: ServerIdentity,
        chat: String,
        stored: Vec<Message>,
        watermark: u64,
        on_result: SubscribeCallback,
        on_message: MessageCallback,
    },
    Receipt(ReceiptCallback),
}

impl Pending {
    fn kind(&self) -> &'static str {
        match self {
            Pending::Connect(_) => "connect",
            Pending::ListChats(_) => "list-chats",
            Pending::NewChat(_) => "new-chat",
            Pending::Subscribe { .. } => "subscribe",
            Pending::Receipt(_) => "receipt",
        }
    }

    /// Complete the request unsuccessfully.
    fn fail(self, reason: String, completions: &CompletionSender) {
        let kind = self.kind();
        match self {
            Pending::Connect(cb) => completions.post(kind, move || cb(false, None)),
            Pending::ListChats(cb) => completions.post(kind, move || cb(Vec::new())),
            Pending::NewChat(cb) => completions.post(kind, move || cb(false)),
            Pending::Subscribe { on_result, .. } => {
                completions.post(kind, move || on_result(false, Vec::new()))
            }
            Pending::Receipt(cb) => completions.post(kind, move || cb(false, Some(reason))),
        }
    }
}

/// An accepted subscription receiving pushed messages.
struct Subscription {
    server: ServerIdentity,
    chat: String,
    on_message: MessageCallback,
}

/// Cached chats are keyed by the server that hosts them.
type ChatKey = (ServerIdentity, String);

enum Wake {
    Work,
    Read(std::io::Result<usize>),
    Heartbeat,
}

pub(crate) struct Engine {
    config: ClientConfig,
    queue: Arc<WorkQueue>,
    shutdown: Arc<AtomicBool>,
    completions: CompletionSender,
    state: watch::Sender<ConnectionState>,
    cache: Database,
    conn: Option<Connection>,
    local_name: String,
    server: Option<ServerIdentity>,
    next_request: u64,
    pending: HashMap<RequestId, Pending>,
    subscriptions: HashMap<RequestId, Subscription>,
    /// Highest cached id per chat, shared by every subscription to it.
    watermarks: HashMap<ChatKey, u64>,
}

impl Engine {
    pub(crate) fn new(
        config: ClientConfig,
        queue: Arc<WorkQueue>,
        shutdown: Arc<AtomicBool>,
        completions: CompletionSender,
        state: watch::Sender<ConnectionState>,
        cache: Database,
    ) -> Self {
        Self {
            config,
            queue,
            shutdown,
            completions,
            state,
            cache,
            conn: None,
            local_name: String::new(),
            server: None,
            next_request: 1,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            watermarks: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!("worker loop started");

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset();

        let queue = self.queue.clone();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            for unit in queue.dequeue_all() {
                self.process(unit).await;
            }

            if self.dispatch_one_frame() {
                continue;
            }

            let wake = tokio::select! {
                biased;
                _ = queue.notified() => Wake::Work,
                read = read_some(self.conn.as_mut()) => Wake::Read(read),
                _ = heartbeat.tick() => Wake::Heartbeat,
            };

            match wake {
                Wake::Work => {}
                Wake::Read(Ok(0)) => {
                    if let Some(conn) = &self.conn {
                        if conn.buffered() > 0 {
                            warn!(bytes = conn.buffered(), "discarding truncated frame at EOF");
                        }
                    }
                    self.drop_connection("closed by server");
                }
                Wake::Read(Ok(n)) => trace!(bytes = n, "received"),
                Wake::Read(Err(e)) => {
                    warn!(error = %e, "read failed");
                    self.drop_connection("read error");
                }
                Wake::Heartbeat => {
                    if self.conn.is_some() {
                        if let Err(e) = self.send(&ClientCommand::Heartbeat).await {
                            debug!(error = %e, "heartbeat not sent");
                        }
                    }
                }
            }
        }

        info!(
            pending = self.pending.len(),
            subscriptions = self.subscriptions.len(),
            "worker loop shutting down"
        );
        self.conn = None;
        self.set_state(ConnectionState::Disconnected);
        if let Err(e) = self.cache.close() {
            error!(error = %e, "failed to close cache");
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "connection state");
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Write `cmd`; a failed write drops the connection.
    async fn send(&mut self, cmd: &ClientCommand) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;
        match conn.send(cmd).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(tag = cmd.tag(), error = %e, "write failed");
                self.drop_connection("write error");
                Err(e)
            }
        }
    }

    /// Send a request whose callback is already registered under `request`,
    /// failing the callback if the write does not happen.
    async fn send_request(&mut self, request: RequestId, cmd: ClientCommand) {
        if let Err(e) = self.send(&cmd).await {
            if let Some(pending) = self.pending.remove(&request) {
                pending.fail(e.to_string(), &self.completions);
            }
        }
    }

    /// Forget the current connection. A handshake still in flight is
    /// reported as a failed connect; other pending requests never complete.
    fn drop_connection(&mut self, reason: &str) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let connects: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| matches!(p, Pending::Connect(_)))
            .map(|(id, _)| *id)
            .collect();
        for id in connects {
            if let Some(pending) = self.pending.remove(&id) {
                pending.fail(reason.to_string(), &self.completions);
            }
        }

        if !self.pending.is_empty() {
            warn!(count = self.pending.len(), "abandoning pending requests");
        }
        self.pending.clear();
        self.subscriptions.clear();
        self.watermarks.clear();
        self.server = None;

        warn!(peer = %conn.peer(), reason, "connection lost");
        self.set_state(ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    async fn process(&mut self, unit: WorkUnit) {
        debug!(kind = unit.kind(), unit = ?unit, "processing work unit");
        match unit {
            WorkUnit::Connect {
                target,
                name,
                on_done,
            } => self.connect(target, name, on_done).await,
            WorkUnit::ListChats { on_done } => self.list_chats(on_done).await,
            WorkUnit::NewChat {
                name,
                description,
                on_done,
            } => self.new_chat(name, description, on_done).await,
            WorkUnit::Subscribe {
                chat,
                on_result,
                on_message,
            } => self.subscribe(chat, on_result, on_message).await,
            WorkUnit::SendMessage {
                message,
                on_receipt,
            } => self.send_message(message, on_receipt).await,
            WorkUnit::CachedChats { server, on_done } => self.cached_chats(server, on_done),
            WorkUnit::KnownServers { on_done } => self.known_servers(on_done),
        }
    }

    /// Chats in the cache for `server`, answered without the network.
    fn cached_chats(&self, server: ServerIdentity, on_done: ListChatsCallback) {
        let chats = self.cache.list_chats(&server).unwrap_or_else(|e| {
            error!(server = %server, error = %e, "failed to read cached chats");
            Vec::new()
        });
        self.completions.post("cached-chats", move || on_done(chats));
    }

    fn known_servers(&self, on_done: ServersCallback) {
        let servers = self.cache.list_servers().unwrap_or_else(|e| {
            error!(error = %e, "failed to read cached servers");
            Vec::new()
        });
        self.completions.post("known-servers", move || on_done(servers));
    }

    async fn connect(&mut self, target: String, name: String, on_done: ConnectCallback) {
        if self.conn.is_some() {
            info!("replacing existing connection");
            self.drop_connection("reconnecting");
        }

        let request = self.next_request_id();
        self.pending.insert(request, Pending::Connect(on_done));
        self.local_name = name;
        self.set_state(ConnectionState::Connecting);

        let addr = resolve_target(&target, self.config.port);
        let opened = Connection::open(
            &addr,
            self.config.connect_timeout,
            self.config.max_field_len,
        )
        .await;

        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                warn!(addr = %addr, error = %e, "connect failed");
                if let Some(pending) = self.pending.remove(&request) {
                    pending.fail(e.to_string(), &self.completions);
                }
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        };

        info!(peer = %conn.peer(), name = %self.local_name, "connected");
        self.conn = Some(conn);

        let introduce = ClientCommand::Introduce {
            request: self.next_request_id(),
            name: self.local_name.clone(),
        };
        if self.send(&introduce).await.is_err() {
            return;
        }
        self.set_state(ConnectionState::Introduced);

        self.send_request(request, ClientCommand::ListChats { request })
            .await;
        if self.conn.is_some() {
            self.set_state(ConnectionState::ListingChats);
        }
    }

    async fn list_chats(&mut self, on_done: ListChatsCallback) {
        let request = self.next_request_id();
        self.pending.insert(request, Pending::ListChats(on_done));
        self.send_request(request, ClientCommand::ListChats { request })
            .await;
    }

    async fn new_chat(&mut self, name: String, description: String, on_done: NewChatCallback) {
        let request = self.next_request_id();
        self.pending.insert(request, Pending::NewChat(on_done));
        let cmd = ClientCommand::NewChat {
            request,
            name,
            creator: self.local_name.clone(),
            description,
        };
        self.send_request(request, cmd).await;
    }

    async fn subscribe(
        &mut self,
        chat: Chat,
        on_result: SubscribeCallback,
        on_message: MessageCallback,
    ) {
        let Some(server) = self.server.clone().filter(|_| self.conn.is_some()) else {
            warn!(chat = %chat.name, "subscribe before handshake completed");
            self.completions
                .post("subscribe", move || on_result(false, Vec::new()));
            return;
        };

        let cached = self.cache.ensure_chat(&server, &chat).and_then(|_| {
            let stored = self.cache.stored_messages(&server, &chat.name)?;
            let watermark = self.cache.watermark(&server, &chat.name)?;
            Ok((stored, watermark))
        });
        let (stored, watermark) = match cached {
            Ok(found) => found,
            Err(e) => {
                error!(chat = %chat.name, error = %e, "cache lookup failed");
                self.completions
                    .post("subscribe", move || on_result(false, Vec::new()));
                return;
            }
        };

        debug!(
            chat = %chat.name,
            stored = stored.len(),
            since_id = watermark,
            "subscribing"
        );

        let request = self.next_request_id();
        self.pending.insert(
            request,
            Pending::Subscribe {
                server,
                chat: chat.name.clone(),
                stored,
                watermark,
                on_result,
                on_message,
            },
        );
        let cmd = ClientCommand::Subscribe {
            request,
            chat: chat.name,
            since_id: watermark,
        };
        self.send_request(request, cmd).await;
    }

    async fn send_message(&mut self, message: OutgoingMessage, on_receipt: ReceiptCallback) {
        let request = self.next_request_id();
        self.pending.insert(request, Pending::Receipt(on_receipt));
        self.send_request(request, ClientCommand::Message { request, message })
            .await;
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Decode and handle one buffered frame. Returns `true` if one was
    /// handled.
    fn dispatch_one_frame(&mut self) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };

        match conn.next_frame() {
            Ok(Some(cmd)) => {
                self.handle(cmd);
                true
            }
            Ok(None) => false,
            Err(frame) => {
                warn!(
                    error = %frame.error,
                    discarded = frame.discarded,
                    "protocol error, discarding buffered bytes"
                );
                false
            }
        }
    }

    fn handle(&mut self, cmd: ServerCommand) {
        trace!(tag = cmd.tag(), "frame received");
        match cmd {
            ServerCommand::ListChatsResult {
                request,
                server,
                chats,
            } => self.on_chat_list(request, server, chats),

            ServerCommand::NewChatResult { request, ok } => match self.take_pending(request) {
                Some(Pending::NewChat(cb)) => self.completions.post("new-chat", move || cb(ok)),
                other => self.unexpected(request, "new-chat", other),
            },

            ServerCommand::SubscribeResult {
                request,
                ok,
                messages,
            } => self.on_subscribe_result(request, ok, messages),

            ServerCommand::Message {
                subscription,
                message,
            } => match self.subscriptions.get(&subscription) {
                Some(sub) => {
                    let watermark = self
                        .watermarks
                        .entry((sub.server.clone(), sub.chat.clone()))
                        .or_insert(0);
                    ingest(&self.cache, &self.completions, sub, watermark, message);
                }
                None => warn!(
                    subscription = %subscription,
                    id = message.id,
                    "message for unknown subscription"
                ),
            },

            ServerCommand::MessageReceipt { request, ok, error } => {
                match self.take_pending(request) {
                    Some(Pending::Receipt(cb)) => {
                        if !ok {
                            debug!(request = %request, error = ?error, "message rejected");
                        }
                        self.completions.post("receipt", move || cb(ok, error));
                    }
                    other => self.unexpected(request, "receipt", other),
                }
            }

            ServerCommand::Heartbeat => trace!("heartbeat"),
        }
    }

    fn take_pending(&mut self, request: RequestId) -> Option<Pending> {
        self.pending.remove(&request)
    }

    /// A response arrived whose token is unknown or belongs to another kind
    /// of request. A mismatched entry is kept for its real response.
    fn unexpected(&mut self, request: RequestId, response: &'static str, found: Option<Pending>) {
        match found {
            Some(pending) => {
                warn!(
                    request = %request,
                    response,
                    expected = pending.kind(),
                    "response kind does not match request"
                );
                self.pending.insert(request, pending);
            }
            None => warn!(request = %request, response, "response for unknown request"),
        }
    }

    fn on_chat_list(&mut self, request: RequestId, server: ServerIdentity, chats: Vec<Chat>) {
        match self.take_pending(request) {
            Some(Pending::Connect(cb)) => {
                self.adopt_server(server, &chats);
                self.set_state(ConnectionState::Idle);
                self.completions
                    .post("connect", move || cb(true, Some(chats)));
            }
            Some(Pending::ListChats(cb)) => {
                self.adopt_server(server, &chats);
                self.completions.post("list-chats", move || cb(chats));
            }
            other => self.unexpected(request, "list-chats", other),
        }
    }

    /// Key the cache by `server` from now on and record the remote ids of
    /// chats that are already cached.
    fn adopt_server(&mut self, server: ServerIdentity, chats: &[Chat]) {
        if let Err(e) = self.cache.register_server(&server) {
            error!(server = %server, error = %e, "failed to record server");
        }
        for chat in chats {
            if self.cache.get_chat(&server, &chat.name).is_ok() {
                if let Err(e) = self.cache.ensure_chat(&server, chat) {
                    error!(chat = %chat.name, error = %e, "failed to update cached chat");
                }
            }
        }
        if self.server.as_ref() != Some(&server) {
            info!(server = %server, chats = chats.len(), "server identified");
        }
        self.server = Some(server);
    }

    fn on_subscribe_result(&mut self, request: RequestId, ok: bool, messages: Vec<Message>) {
        let pending = match self.take_pending(request) {
            Some(Pending::Subscribe {
                server,
                chat,
                stored,
                watermark,
                on_result,
                on_message,
            }) => (server, chat, stored, watermark, on_result, on_message),
            other => return self.unexpected(request, "subscribe", other),
        };
        let (server, chat, stored, watermark, on_result, on_message) = pending;

        if !ok {
            info!(chat = %chat, "subscribe refused");
            self.completions
                .post("subscribe", move || on_result(false, Vec::new()));
            return;
        }

        info!(
            chat = %chat,
            stored = stored.len(),
            received = messages.len(),
            "subscribed"
        );
        if self.current_state() == ConnectionState::Idle {
            self.set_state(ConnectionState::Subscribed);
        }
        self.completions
            .post("subscribe", move || on_result(true, stored));

        let replaced: Vec<RequestId> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.server == server && sub.chat == chat)
            .map(|(id, _)| *id)
            .collect();
        for id in replaced {
            debug!(chat = %chat, old = %id, new = %request, "replacing subscription");
            self.subscriptions.remove(&id);
        }

        // Another subscribe to this chat may have cached messages since this
        // one read the watermark.
        let shared = self
            .watermarks
            .entry((server.clone(), chat.clone()))
            .or_insert(0);
        *shared = (*shared).max(watermark);

        let sub = Subscription {
            server,
            chat,
            on_message,
        };
        for message in messages {
            ingest(&self.cache, &self.completions, &sub, shared, message);
        }
        self.subscriptions.insert(request, sub);
    }
}

/// Cache a message newer than the chat's watermark and hand it to the
/// caller. Ids at or below the watermark are duplicates.
fn ingest(
    cache: &Database,
    completions: &CompletionSender,
    sub: &Subscription,
    watermark: &mut u64,
    message: Message,
) {
    if message.id <= *watermark {
        debug!(chat = %sub.chat, id = message.id, "skipping already cached message");
        return;
    }

    if let Err(e) = cache.insert_message(&sub.server, &sub.chat, &message) {
        error!(chat = %sub.chat, id = message.id, error = %e, "failed to cache message");
        return;
    }
    *watermark = message.id;

    let on_message = sub.on_message.clone();
    completions.post("message", move || on_message(message));
}

async fn read_some(conn: Option<&mut Connection>) -> std::io::Result<usize> {
    match conn {
        Some(conn) => conn.read_more().await,
        None => std::future::pending().await,
    }
}
