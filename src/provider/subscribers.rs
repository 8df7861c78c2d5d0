//! 事件订阅表
//!
//! 按事件名保存有序回调。状态变更时在锁内收集待通知的回调快照，
//! 释放锁后再依次调用，回调里可以安全地再次调用 provider。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// 监听器句柄，进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Provider 事件回调
pub type ProviderListener = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscription {
    event: String,
    id: ListenerId,
    listener: ProviderListener,
}

#[derive(Default)]
pub struct SubscriberSet {
    entries: Vec<Subscription>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: &str, listener: ProviderListener) -> ListenerId {
        let id = ListenerId::next();
        self.entries.push(Subscription {
            event: event.to_string(),
            id,
            listener,
        });
        id
    }

    /// 返回是否确实移除了监听器
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.id != id);
        self.entries.len() != before
    }

    /// 按注册顺序返回某事件的回调快照
    pub fn listeners_for(&self, event: &str) -> Vec<ProviderListener> {
        self.entries
            .iter()
            .filter(|s| s.event == event)
            .map(|s| s.listener.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|s| (&s.event, s.id)))
            .finish()
    }
}

/// 锁内收集、锁外投递的通知队列
#[derive(Default)]
pub struct PendingEvents {
    queue: Vec<(&'static str, ProviderListener, Value)>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscribers: &SubscriberSet, event: &'static str, payload: Value) {
        for listener in subscribers.listeners_for(event) {
            self.queue.push((event, listener, payload.clone()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 依次调用；单个回调 panic 不影响后续回调
    pub fn deliver(self) {
        for (event, listener, payload) in self.queue {
            if catch_unwind(AssertUnwindSafe(|| listener(&payload))).is_err() {
                tracing::warn!(event, "listener_panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_delivery_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = SubscriberSet::new();
        for tag in ["a", "b", "c"] {
            let log = log.clone();
            set.add(
                "chainChanged",
                Arc::new(move |v: &Value| log.lock().push(format!("{}:{}", tag, v))),
            );
        }
        set.add("connect", Arc::new(|_: &Value| panic!("wrong event")));

        let mut pending = PendingEvents::new();
        pending.push(&set, "chainChanged", Value::from("0x1"));
        pending.deliver();

        assert_eq!(
            *log.lock(),
            vec!["a:\"0x1\"", "b:\"0x1\"", "c:\"0x1\""]
        );
    }

    #[test]
    fn test_remove_listener() {
        let mut set = SubscriberSet::new();
        let id = set.add("connect", Arc::new(|_: &Value| {}));
        let other = set.add("connect", Arc::new(|_: &Value| {}));
        assert_ne!(id, other);
        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert_eq!(set.listeners_for("connect").len(), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let hits = Arc::new(Mutex::new(0));
        let mut set = SubscriberSet::new();
        set.add("disconnect", Arc::new(|_: &Value| panic!("boom")));
        let counter = hits.clone();
        set.add("disconnect", Arc::new(move |_: &Value| *counter.lock() += 1));

        let mut pending = PendingEvents::new();
        pending.push(&set, "disconnect", Value::Null);
        pending.deliver();
        assert_eq!(*hits.lock(), 1);
    }
}
