//! 发现协议代理 (EIP-6963 风格)
//!
//! 两阶段：注册时立即在公告通道广播描述符；同时在请求通道上常驻监听，
//! 每收到一次请求就把所有已注册描述符各广播一次。公告携带 provider 句柄。

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BrandingConfig;
use crate::domain::chain_config::ChainFamily;
use crate::error::{Result, WalletError};
use crate::infrastructure::event_bus::{EventDetail, PageEvent};
use crate::infrastructure::page_context::PageContext;
use crate::provider::subscribers::ListenerId;
use crate::provider::ProviderHandle;

pub const ANNOUNCE_EVENT: &str = "eip6963:announceProvider";
pub const REQUEST_EVENT: &str = "eip6963:requestProvider";

/// 描述符中可序列化的部分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

impl ProviderInfo {
    /// 每个 provider 实例一个新的 v4 uuid
    pub fn new(branding: &BrandingConfig) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: branding.name.clone(),
            icon: branding.icon.clone(),
            rdns: branding.rdns.clone(),
        }
    }
}

/// 发现描述符
#[derive(Clone)]
pub struct ProviderDetail {
    pub info: ProviderInfo,
    pub family: ChainFamily,
    pub provider: ProviderHandle,
}

impl std::fmt::Debug for ProviderDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDetail")
            .field("info", &self.info)
            .field("family", &self.family)
            .finish()
    }
}

pub struct DiscoveryBroker {
    page: Weak<PageContext>,
    descriptors: Mutex<Vec<ProviderDetail>>,
    request_listener: Mutex<Option<ListenerId>>,
}

impl DiscoveryBroker {
    pub fn new(page: &Arc<PageContext>) -> Arc<Self> {
        Arc::new(Self {
            page: Arc::downgrade(page),
            descriptors: Mutex::new(Vec::new()),
            request_listener: Mutex::new(None),
        })
    }

    fn page(&self) -> Result<Arc<PageContext>> {
        self.page
            .upgrade()
            .filter(|p| p.is_alive())
            .ok_or(WalletError::ContextGone)
    }

    /// 注册并立即公告；同一 uuid 重复注册返回 false 且不再公告
    pub fn register(&self, detail: ProviderDetail) -> Result<bool> {
        {
            let mut descriptors = self.descriptors.lock();
            if descriptors.iter().any(|d| d.info.uuid == detail.info.uuid) {
                return Ok(false);
            }
            descriptors.push(detail.clone());
        }
        self.announce(&detail)?;
        Ok(true)
    }

    fn announce(&self, detail: &ProviderDetail) -> Result<()> {
        let page = self.page()?;
        let listeners = page.dispatch_event(&PageEvent::new(
            ANNOUNCE_EVENT,
            EventDetail::Announcement(detail.clone()),
        ))?;
        tracing::debug!(
            uuid = %detail.info.uuid,
            family = %detail.family,
            listeners,
            "provider_announced"
        );
        Ok(())
    }

    /// 安装常驻请求监听器
    ///
    /// 监听器只持有 broker 的弱引用，broker 释放后自动失效
    pub fn attach(self: &Arc<Self>) -> Result<ListenerId> {
        if let Some(id) = *self.request_listener.lock() {
            return Ok(id);
        }

        let page = self.page()?;
        let broker = Arc::downgrade(self);
        let id = page.add_event_listener(
            REQUEST_EVENT,
            Arc::new(move |_: &PageEvent| {
                if let Some(broker) = broker.upgrade() {
                    if let Err(e) = broker.announce_all() {
                        tracing::warn!(error = %e, "discovery_reannounce_failed");
                    }
                }
            }),
        )?;
        *self.request_listener.lock() = Some(id);
        Ok(id)
    }

    /// 移除请求监听器
    pub fn detach(&self) -> bool {
        let Some(id) = self.request_listener.lock().take() else {
            return false;
        };
        match self.page.upgrade() {
            Some(page) => page.remove_event_listener(id),
            None => false,
        }
    }

    /// 每个描述符公告一次，返回公告数量
    pub fn announce_all(&self) -> Result<usize> {
        let snapshot = self.descriptors();
        for detail in &snapshot {
            self.announce(detail)?;
        }
        Ok(snapshot.len())
    }

    pub fn descriptors(&self) -> Vec<ProviderDetail> {
        self.descriptors.lock().clone()
    }

    pub fn clear(&self) {
        self.descriptors.lock().clear();
    }
}

/// 页面脚本一侧的发现流程：监听公告、发出请求、收集结果
pub fn discover(page: &PageContext) -> Result<Vec<ProviderDetail>> {
    let found = Arc::new(Mutex::new(Vec::new()));
    let sink = found.clone();
    let id = page.add_event_listener(
        ANNOUNCE_EVENT,
        Arc::new(move |event: &PageEvent| {
            if let Some(detail) = event.announcement() {
                sink.lock().push(detail.clone());
            }
        }),
    )?;

    let dispatched = page.dispatch_event(&PageEvent::new(REQUEST_EVENT, EventDetail::None));
    page.remove_event_listener(id);
    dispatched?;

    let mut found = std::mem::take(&mut *found.lock());
    // 同一轮请求内每个实例至多一个描述符
    let mut seen = std::collections::HashSet::new();
    found.retain(|d| seen.insert(d.info.uuid.clone()));
    Ok(found)
}
