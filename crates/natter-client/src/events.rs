//! Results handed from the worker thread back to the caller.
//!
//! The worker never runs caller callbacks itself. Every finished request is
//! wrapped in a [`Completion`] and posted on a channel; the caller's own
//! thread drains it through [`Client::dispatch`](crate::Client::dispatch).

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

use natter_shared::{Chat, Message, ServerIdentity};

/// `(success, chats)`; `chats` is `None` when the connect failed.
pub type ConnectCallback = Box<dyn FnOnce(bool, Option<Vec<Chat>>) + Send>;
pub type ListChatsCallback = Box<dyn FnOnce(Vec<Chat>) + Send>;
pub type NewChatCallback = Box<dyn FnOnce(bool) + Send>;
/// `(success, messages already cached before the subscribe)`.
pub type SubscribeCallback = Box<dyn FnOnce(bool, Vec<Message>) + Send>;
/// Invoked once per newly received message of a subscription.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
/// `(success, server error text)`.
pub type ReceiptCallback = Box<dyn FnOnce(bool, Option<String>) + Send>;
pub type ServersCallback = Box<dyn FnOnce(Vec<ServerIdentity>) + Send>;

/// A callback bound to its result, ready to run on the caller's thread.
pub struct Completion {
    kind: &'static str,
    run: Box<dyn FnOnce() + Send>,
}

impl Completion {
    pub(crate) fn new(kind: &'static str, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            run: Box::new(run),
        }
    }

    /// Which request kind this completes (`"connect"`, `"message"`, ...).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn run(self) {
        (self.run)();
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Worker-side handle of the completion channel.
#[derive(Clone)]
pub(crate) struct CompletionSender {
    tx: mpsc::Sender<Completion>,
}

impl CompletionSender {
    pub(crate) fn new(tx: mpsc::Sender<Completion>) -> Self {
        Self { tx }
    }

    pub(crate) fn post(&self, kind: &'static str, run: impl FnOnce() + Send + 'static) {
        if self.tx.send(Completion::new(kind, run)).is_err() {
            tracing::debug!(kind, "completion receiver gone, dropping result");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn posted_completion_runs_on_receiver_side() {
        let (tx, rx) = mpsc::channel();
        let sender = CompletionSender::new(tx);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        sender.post("new-chat", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.kind(), "new-chat");
        completion.run();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        CompletionSender::new(tx).post("connect", || panic!("must not run"));
    }
}
