//! Scripted in-process chat server and helpers shared by the integration
//! tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use natter_client::{Client, ClientConfig};
use natter_shared::constants::MAX_FIELD_LEN;
use natter_shared::{Chat, ClientCommand, Message, RequestId, ServerCommand, ServerIdentity};

/// Unknown server tag written by `garbage_after_introduce`.
pub const GARBAGE: u8 = 0xEE;

#[derive(Debug, Default, Clone)]
pub struct Behavior {
    /// Drop the connection as soon as `Introduce` arrives.
    pub close_after_introduce: bool,
    /// Write one undecodable byte after `Introduce`, then pause.
    pub garbage_after_introduce: bool,
    /// Refuse messages with exactly this text.
    pub reject_text: Option<String>,
    /// After `Introduce`, send a chat list under this identity with a token
    /// the client never issued.
    pub stray_identity: Option<String>,
}

struct ServerState {
    identity: ServerIdentity,
    chats: Vec<(Chat, Vec<Message>)>,
    received: Vec<ClientCommand>,
    behavior: Behavior,
}

impl ServerState {
    fn chat_mut(&mut self, name: &str) -> Option<&mut (Chat, Vec<Message>)> {
        self.chats.iter_mut().find(|(chat, _)| chat.name == name)
    }
}

#[derive(Default)]
struct Session {
    name: String,
    subscriptions: Vec<(RequestId, String)>,
}

enum Reply {
    Close,
    Frames {
        garbage: bool,
        frames: Vec<ServerCommand>,
    },
}

impl Reply {
    fn frames(frames: Vec<ServerCommand>) -> Self {
        Reply::Frames {
            garbage: false,
            frames,
        }
    }
}

pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn start(identity: &str) -> Self {
        Self::with_behavior(identity, Behavior::default())
    }

    pub fn with_behavior(identity: &str, behavior: Behavior) -> Self {
        let state = Arc::new(Mutex::new(ServerState {
            identity: ServerIdentity::new(identity),
            chats: Vec::new(),
            received: Vec::new(),
            behavior,
        }));

        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let shared = state.clone();
        std::thread::Builder::new()
            .name("fake-server".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async move {
                    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    addr_tx.send(listener.local_addr().unwrap()).unwrap();
                    while let Ok((stream, _)) = listener.accept().await {
                        tokio::spawn(serve(stream, shared.clone()));
                    }
                });
            })
            .unwrap();

        let addr = addr_rx.recv().unwrap();
        Self { addr, state }
    }

    pub fn target(&self) -> String {
        self.addr.to_string()
    }

    pub fn identity(&self) -> ServerIdentity {
        self.state.lock().unwrap().identity.clone()
    }

    /// Host a chat holding `count` text messages with ids `1..=count`.
    pub fn add_chat(&self, name: &str, count: u64) {
        let mut state = self.state.lock().unwrap();
        let id = state.chats.len() as u64 + 1;
        let mut chat = Chat::new(name, "host", format!("about {name}"));
        chat.id = Some(id);
        let messages = (1..=count)
            .map(|i| Message::text(i, "host", format!("{name} #{i}")))
            .collect();
        state.chats.push((chat, messages));
    }

    /// Append a message to `chat` without pushing it to anyone.
    pub fn post_offline(&self, chat: &str, text: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let (_, messages) = state.chat_mut(chat).unwrap();
        let id = messages.len() as u64 + 1;
        messages.push(Message::text(id, "host", text));
        id
    }

    pub fn received(&self) -> Vec<ClientCommand> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn messages(&self, chat: &str) -> Vec<Message> {
        let mut state = self.state.lock().unwrap();
        state
            .chat_mut(chat)
            .map(|(_, messages)| messages.clone())
            .unwrap_or_default()
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) {
    let mut buf = BytesMut::new();
    let mut session = Session::default();

    loop {
        let cmd = match ClientCommand::decode(&buf, MAX_FIELD_LEN) {
            Ok((cmd, used)) => {
                buf.advance(used);
                cmd
            }
            Err(e) if e.is_incomplete() => match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            },
            Err(_) => return,
        };

        let reply = respond(&state, &mut session, cmd);
        match reply {
            Reply::Close => return,
            Reply::Frames { garbage, frames } => {
                if garbage {
                    if stream.write_all(&[GARBAGE]).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                for frame in frames {
                    if stream.write_all(&frame.to_bytes().unwrap()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn respond(state: &Mutex<ServerState>, session: &mut Session, cmd: ClientCommand) -> Reply {
    let mut state = state.lock().unwrap();
    state.received.push(cmd.clone());

    match cmd {
        ClientCommand::Introduce { name, .. } => {
            session.name = name;
            if state.behavior.close_after_introduce {
                return Reply::Close;
            }
            let frames = state
                .behavior
                .stray_identity
                .iter()
                .map(|identity| ServerCommand::ListChatsResult {
                    request: RequestId(u64::MAX),
                    server: ServerIdentity::new(identity.as_str()),
                    chats: vec![Chat::new("decoy", "mallory", "")],
                })
                .collect();
            Reply::Frames {
                garbage: state.behavior.garbage_after_introduce,
                frames,
            }
        }

        ClientCommand::ListChats { request } => Reply::frames(vec![ServerCommand::ListChatsResult {
            request,
            server: state.identity.clone(),
            chats: state.chats.iter().map(|(chat, _)| chat.clone()).collect(),
        }]),

        ClientCommand::NewChat {
            request,
            name,
            creator,
            description,
        } => {
            let ok = state.chat_mut(&name).is_none();
            if ok {
                let mut chat = Chat::new(name, creator, description);
                chat.id = Some(state.chats.len() as u64 + 1);
                state.chats.push((chat, Vec::new()));
            }
            Reply::frames(vec![ServerCommand::NewChatResult { request, ok }])
        }

        ClientCommand::Subscribe {
            request,
            chat,
            since_id,
        } => {
            let messages = state.chat_mut(&chat).map(|(_, messages)| {
                messages
                    .iter()
                    .filter(|m| m.id > since_id)
                    .cloned()
                    .collect::<Vec<_>>()
            });
            let ok = messages.is_some();
            if ok {
                session.subscriptions.push((request, chat));
            }
            Reply::frames(vec![ServerCommand::SubscribeResult {
                request,
                ok,
                messages: messages.unwrap_or_default(),
            }])
        }

        ClientCommand::Message { request, message } => {
            let reject = |reason: &str| {
                Reply::frames(vec![ServerCommand::MessageReceipt {
                    request,
                    ok: false,
                    error: Some(reason.to_string()),
                }])
            };

            let Some((_, chat)) = session.subscriptions.last().cloned() else {
                return reject("not subscribed");
            };
            if state.behavior.reject_text.as_deref() == Some(message.text.as_str()) {
                return reject("rejected");
            }

            let sender = session.name.clone();
            let Some((_, messages)) = state.chat_mut(&chat) else {
                return reject("no such chat");
            };
            let stored = Message {
                kind: message.kind,
                id: messages.len() as u64 + 1,
                text: message.text,
                sender,
                raw: message.raw,
            };
            messages.push(stored.clone());

            let mut frames = vec![ServerCommand::MessageReceipt {
                request,
                ok: true,
                error: None,
            }];
            frames.extend(
                session
                    .subscriptions
                    .iter()
                    .filter(|(_, name)| *name == chat)
                    .map(|(subscription, _)| ServerCommand::Message {
                        subscription: *subscription,
                        message: stored.clone(),
                    }),
            );
            Reply::frames(frames)
        }

        ClientCommand::Heartbeat => Reply::frames(vec![ServerCommand::Heartbeat]),
    }
}

/// Client with its cache in `dir`.
pub fn start_client(dir: &tempfile::TempDir) -> Client {
    Client::start(config_in(dir)).unwrap()
}

pub fn config_in(dir: &tempfile::TempDir) -> ClientConfig {
    ClientConfig::default().with_database(dir.path().join("cache.db"))
}

/// Dispatch completions until `done` holds, for at most five seconds.
pub fn pump_until(client: &Client, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        client.dispatch_timeout(Duration::from_millis(50));
    }
    done()
}

/// Shared slot a callback records its arguments into.
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }

    pub fn first(&self) -> T {
        self.all().into_iter().next().unwrap()
    }
}

/// Connect as `name` and wait for the handshake to finish.
pub fn connect(client: &Client, server: &FakeServer, name: &str) -> Vec<Chat> {
    let done: Recorder<(bool, Option<Vec<Chat>>)> = Recorder::new();
    let d = done.clone();
    client.connect(server.target(), name, move |ok, chats| d.push((ok, chats)));
    assert!(pump_until(client, || done.len() == 1), "connect timed out");

    let (ok, chats) = done.first();
    assert!(ok, "connect failed");
    chats.unwrap()
}

/// Subscribe to `chat`, recording pushed messages into `pushed`, and return
/// the cached messages from the subscribe result.
pub fn subscribe(client: &Client, chat: Chat, pushed: &Recorder<Message>) -> Vec<Message> {
    let result: Recorder<(bool, Vec<Message>)> = Recorder::new();
    let r = result.clone();
    let p = pushed.clone();
    client.subscribe(
        chat,
        move |ok, stored| r.push((ok, stored)),
        move |message| p.push(message),
    );
    assert!(pump_until(client, || result.len() == 1), "subscribe timed out");

    let (ok, stored) = result.first();
    assert!(ok, "subscribe refused");
    stored
}
