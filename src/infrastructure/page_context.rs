//! 页面上下文
//!
//! 宿主页面的进程内模型：全局绑定表、按通道分发的事件目标和存活标记。
//! 导航会清空文档（全局与监听器），销毁后所有写操作返回 `ContextGone`。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::event_bus::{ChannelBus, EventListener, PageEvent};
use crate::error::{Result, WalletError};
use crate::provider::subscribers::ListenerId;
use crate::provider::ProviderHandle;
use crate::service::lifecycle_manager::WalletEntryPoint;

/// 全局槽位中的值
#[derive(Debug, Clone)]
pub enum GlobalBinding {
    Provider(ProviderHandle),
    EntryPoint(Arc<WalletEntryPoint>),
    /// 页面脚本自己设置的值
    Value(Value),
}

impl GlobalBinding {
    /// 同一实例（句柄按指针比较）
    pub fn same_as(&self, other: &GlobalBinding) -> bool {
        match (self, other) {
            (GlobalBinding::Provider(a), GlobalBinding::Provider(b)) => Arc::ptr_eq(a, b),
            (GlobalBinding::EntryPoint(a), GlobalBinding::EntryPoint(b)) => Arc::ptr_eq(a, b),
            (GlobalBinding::Value(a), GlobalBinding::Value(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_provider(&self) -> Option<&ProviderHandle> {
        match self {
            GlobalBinding::Provider(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_entry_point(&self) -> Option<&Arc<WalletEntryPoint>> {
        match self {
            GlobalBinding::EntryPoint(e) => Some(e),
            _ => None,
        }
    }
}

pub struct PageContext {
    id: Uuid,
    globals: Mutex<HashMap<String, GlobalBinding>>,
    events: ChannelBus,
    alive: AtomicBool,
    /// 每次导航加一
    generation: AtomicU64,
}

impl PageContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            globals: Mutex::new(HashMap::new()),
            events: ChannelBus::new(),
            alive: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(WalletError::ContextGone)
        }
    }

    // ============ 全局绑定 ============

    pub fn get_global(&self, name: &str) -> Option<GlobalBinding> {
        self.globals.lock().get(name).cloned()
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.lock().contains_key(name)
    }

    /// 无条件设置，返回被覆盖的旧值
    pub fn set_global(&self, name: &str, binding: GlobalBinding) -> Result<Option<GlobalBinding>> {
        self.ensure_alive()?;
        Ok(self.globals.lock().insert(name.to_string(), binding))
    }

    /// 槽位为空时设置，返回是否设置成功
    pub fn set_global_if_absent(&self, name: &str, binding: GlobalBinding) -> Result<bool> {
        self.ensure_alive()?;
        let mut globals = self.globals.lock();
        if globals.contains_key(name) {
            return Ok(false);
        }
        globals.insert(name.to_string(), binding);
        Ok(true)
    }

    /// 仅当当前值满足条件时移除
    pub fn remove_global_if(&self, name: &str, pred: impl FnOnce(&GlobalBinding) -> bool) -> bool {
        let mut globals = self.globals.lock();
        match globals.get(name) {
            Some(current) if pred(current) => {
                globals.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.globals.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // ============ 事件 ============

    pub fn add_event_listener(&self, channel: &str, listener: EventListener) -> Result<ListenerId> {
        self.ensure_alive()?;
        Ok(self.events.add_listener(channel, listener))
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.events.listener_count(channel)
    }

    pub fn dispatch_event(&self, event: &PageEvent) -> Result<usize> {
        self.ensure_alive()?;
        Ok(self.events.dispatch(event))
    }

    // ============ 生命周期 ============

    /// 导航：清空文档状态，上下文仍然存活
    pub fn navigate(&self) {
        self.globals.lock().clear();
        self.events.clear();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(page = %self.id, generation, "page_navigated");
    }

    pub fn destroy(&self) {
        self.alive.store(false, Ordering::Release);
        self.globals.lock().clear();
        self.events.clear();
        tracing::debug!(page = %self.id, "page_destroyed");
    }
}

impl std::fmt::Debug for PageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageContext")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::EventDetail;
    use serde_json::json;

    #[test]
    fn test_set_if_absent_respects_existing_value() {
        let page = PageContext::new();
        page.set_global("ethereum", GlobalBinding::Value(json!("other wallet")))
            .unwrap();
        assert!(!page
            .set_global_if_absent("ethereum", GlobalBinding::Value(json!("ours")))
            .unwrap());
        assert!(page
            .set_global_if_absent("solana", GlobalBinding::Value(json!("ours")))
            .unwrap());
        assert_eq!(page.global_names(), vec!["ethereum", "solana"]);
    }

    #[test]
    fn test_remove_global_if_only_matching_value() {
        let page = PageContext::new();
        let ours = GlobalBinding::Value(json!(1));
        page.set_global("x", GlobalBinding::Value(json!(2))).unwrap();
        assert!(!page.remove_global_if("x", |current| current.same_as(&ours)));
        assert!(page.has_global("x"));
        assert!(page.remove_global_if("x", |_| true));
        assert!(!page.has_global("x"));
    }

    #[test]
    fn test_navigate_and_destroy() {
        let page = PageContext::new();
        page.set_global("x", GlobalBinding::Value(json!(1))).unwrap();
        page.add_event_listener("c", Arc::new(|_: &PageEvent| {}))
            .unwrap();

        page.navigate();
        assert!(page.is_alive());
        assert_eq!(page.generation(), 1);
        assert!(page.global_names().is_empty());
        assert_eq!(page.listener_count("c"), 0);

        page.destroy();
        assert!(!page.is_alive());
        assert_eq!(
            page.set_global("x", GlobalBinding::Value(json!(1))).unwrap_err(),
            WalletError::ContextGone
        );
        assert!(page
            .dispatch_event(&PageEvent::new("c", EventDetail::None))
            .is_err());
    }
}
