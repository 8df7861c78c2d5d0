//! 页面事件通道
//!
//! 按通道名分发事件，模拟页面上的 `addEventListener` / `dispatchEvent`。
//! 分发时先在锁内取监听器快照，释放锁后再调用，监听器可以嵌套分发。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::provider::subscribers::ListenerId;
use crate::service::discovery_broker::ProviderDetail;

// ============ 事件类型定义 ============

#[derive(Debug, Clone)]
pub enum EventDetail {
    None,
    Json(Value),
    /// 发现协议公告：描述符 + provider 句柄
    Announcement(ProviderDetail),
}

#[derive(Debug, Clone)]
pub struct PageEvent {
    pub channel: String,
    pub detail: EventDetail,
}

impl PageEvent {
    pub fn new(channel: impl Into<String>, detail: EventDetail) -> Self {
        Self {
            channel: channel.into(),
            detail,
        }
    }

    pub fn announcement(&self) -> Option<&ProviderDetail> {
        match &self.detail {
            EventDetail::Announcement(detail) => Some(detail),
            _ => None,
        }
    }
}

pub type EventListener = Arc<dyn Fn(&PageEvent) + Send + Sync>;

// ============ 通道总线 ============

struct ChannelListener {
    channel: String,
    id: ListenerId,
    listener: EventListener,
}

#[derive(Default)]
pub struct ChannelBus {
    listeners: Mutex<Vec<ChannelListener>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, channel: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push(ChannelListener {
            channel: channel.to_string(),
            id,
            listener,
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// 返回被调用的监听器数量
    pub fn dispatch(&self, event: &PageEvent) -> usize {
        let snapshot: Vec<EventListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.channel == event.channel)
            .map(|l| l.listener.clone())
            .collect();

        for listener in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(channel = %event.channel, "page_listener_panicked");
            }
        }
        snapshot.len()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.channel == channel)
            .count()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_channel() {
        let bus = ChannelBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        bus.add_listener(
            "a",
            Arc::new(move |e: &PageEvent| sink.lock().push(e.channel.clone())),
        );
        bus.add_listener("b", Arc::new(|_: &PageEvent| panic!("wrong channel")));

        assert_eq!(bus.dispatch(&PageEvent::new("a", EventDetail::None)), 1);
        assert_eq!(*hits.lock(), vec!["a".to_string()]);
        assert_eq!(bus.listener_count("b"), 1);
    }

    #[test]
    fn test_nested_dispatch_does_not_deadlock() {
        let bus = Arc::new(ChannelBus::new());
        let hits = Arc::new(Mutex::new(0));

        let counter = hits.clone();
        bus.add_listener("pong", Arc::new(move |_: &PageEvent| *counter.lock() += 1));
        let inner = bus.clone();
        bus.add_listener(
            "ping",
            Arc::new(move |_: &PageEvent| {
                inner.dispatch(&PageEvent::new("pong", EventDetail::None));
            }),
        );

        bus.dispatch(&PageEvent::new("ping", EventDetail::Json(Value::Null)));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_remove_listener() {
        let bus = ChannelBus::new();
        let id = bus.add_listener("a", Arc::new(|_: &PageEvent| {}));
        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        assert_eq!(bus.dispatch(&PageEvent::new("a", EventDetail::None)), 0);
    }
}
