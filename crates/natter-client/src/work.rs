//! Queue of caller requests waiting for the worker loop.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use natter_shared::{Chat, OutgoingMessage, ServerIdentity};

use crate::events::{
    ConnectCallback, ListChatsCallback, MessageCallback, NewChatCallback, ReceiptCallback,
    ServersCallback, SubscribeCallback,
};

/// One caller request. Built by the facade, consumed exactly once by the
/// worker loop.
pub enum WorkUnit {
    Connect {
        /// `host` or `host:port`.
        target: String,
        /// Local user name sent in `Introduce`.
        name: String,
        on_done: ConnectCallback,
    },
    ListChats {
        on_done: ListChatsCallback,
    },
    NewChat {
        name: String,
        description: String,
        on_done: NewChatCallback,
    },
    Subscribe {
        chat: Chat,
        on_result: SubscribeCallback,
        on_message: MessageCallback,
    },
    SendMessage {
        message: OutgoingMessage,
        on_receipt: ReceiptCallback,
    },
    /// Read from the cache only; works while disconnected.
    CachedChats {
        server: ServerIdentity,
        on_done: ListChatsCallback,
    },
    KnownServers {
        on_done: ServersCallback,
    },
}

impl WorkUnit {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkUnit::Connect { .. } => "connect",
            WorkUnit::ListChats { .. } => "list-chats",
            WorkUnit::NewChat { .. } => "new-chat",
            WorkUnit::Subscribe { .. } => "subscribe",
            WorkUnit::SendMessage { .. } => "send-message",
            WorkUnit::CachedChats { .. } => "cached-chats",
            WorkUnit::KnownServers { .. } => "known-servers",
        }
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Connect { target, name, .. } => f
                .debug_struct("Connect")
                .field("target", target)
                .field("name", name)
                .finish_non_exhaustive(),
            WorkUnit::ListChats { .. } => f.debug_struct("ListChats").finish_non_exhaustive(),
            WorkUnit::NewChat { name, .. } => f
                .debug_struct("NewChat")
                .field("name", name)
                .finish_non_exhaustive(),
            WorkUnit::Subscribe { chat, .. } => f
                .debug_struct("Subscribe")
                .field("chat", &chat.name)
                .finish_non_exhaustive(),
            WorkUnit::SendMessage { message, .. } => f
                .debug_struct("SendMessage")
                .field("kind", &message.kind)
                .field("text_len", &message.text.len())
                .finish_non_exhaustive(),
            WorkUnit::CachedChats { server, .. } => f
                .debug_struct("CachedChats")
                .field("server", server)
                .finish_non_exhaustive(),
            WorkUnit::KnownServers { .. } => f.debug_struct("KnownServers").finish_non_exhaustive(),
        }
    }
}

/// Unbounded FIFO shared between the caller and the worker.
///
/// Producers never wait on the consumer; the only blocking is the mutex.
#[derive(Default)]
pub struct WorkQueue {
    units: Mutex<VecDeque<WorkUnit>>,
    ready: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `unit` and wake the worker.
    pub fn enqueue(&self, unit: WorkUnit) {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(unit);
        self.ready.notify_one();
    }

    /// Take every queued unit, oldest first.
    pub fn dequeue_all(&self) -> Vec<WorkUnit> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Wake the worker without queueing anything (used for shutdown).
    pub fn wake(&self) {
        self.ready.notify_one();
    }

    /// Resolves after the next `enqueue` or `wake`, or immediately if one
    /// happened since the last wait.
    pub async fn notified(&self) {
        self.ready.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn new_chat(name: &str) -> WorkUnit {
        WorkUnit::NewChat {
            name: name.into(),
            description: String::new(),
            on_done: Box::new(|_| {}),
        }
    }

    fn names(units: Vec<WorkUnit>) -> Vec<String> {
        units
            .into_iter()
            .map(|unit| match unit {
                WorkUnit::NewChat { name, .. } => name,
                other => panic!("unexpected unit {other:?}"),
            })
            .collect()
    }

    #[test]
    fn unit_kinds_and_debug_skip_callbacks() {
        let unit = WorkUnit::SendMessage {
            message: OutgoingMessage::text("secret text"),
            on_receipt: Box::new(|_, _| {}),
        };
        assert_eq!(unit.kind(), "send-message");
        let shown = format!("{unit:?}");
        assert!(shown.contains("text_len: 11"));
        assert!(!shown.contains("secret"));

        let unit = WorkUnit::CachedChats {
            server: ServerIdentity::new("alpha"),
            on_done: Box::new(|_| {}),
        };
        assert_eq!(unit.kind(), "cached-chats");
        assert!(format!("{unit:?}").contains("alpha"));
        assert_eq!(new_chat("x").kind(), "new-chat");
    }

    #[test]
    fn dequeue_all_on_empty_queue() {
        let queue = WorkQueue::new();
        assert!(queue.dequeue_all().is_empty());
    }

    #[test]
    fn fifo_across_interleaved_drains() {
        let queue = WorkQueue::new();
        let mut seen = Vec::new();

        queue.enqueue(new_chat("a"));
        queue.enqueue(new_chat("b"));
        seen.extend(names(queue.dequeue_all()));
        seen.extend(names(queue.dequeue_all()));
        queue.enqueue(new_chat("c"));
        queue.enqueue(new_chat("d"));
        seen.extend(names(queue.dequeue_all()));
        queue.enqueue(new_chat("e"));
        seen.extend(names(queue.dequeue_all()));

        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
        assert!(queue.dequeue_all().is_empty());
    }

    #[test]
    fn fifo_with_concurrent_producer() {
        let queue = Arc::new(WorkQueue::new());
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    queue.enqueue(new_chat(&i.to_string()));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 500 {
            seen.extend(names(queue.dequeue_all()));
            std::thread::yield_now();
        }
        producer.join().unwrap();

        let expected: Vec<String> = (0..500).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn enqueue_before_wait_is_not_lost() {
        let queue = WorkQueue::new();
        queue.enqueue(new_chat("early"));

        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .expect("stored wakeup");
        assert_eq!(names(queue.dequeue_all()), vec!["early"]);
    }

    #[tokio::test]
    async fn wake_without_work() {
        let queue = WorkQueue::new();
        queue.wake();
        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .expect("wakeup");
        assert!(queue.dequeue_all().is_empty());
    }
}
