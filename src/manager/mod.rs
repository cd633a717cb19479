//! # 协议管理器
//!
//! 把注册表、结构缓存、后台特化、监听分发和通道拦截组合成一个服务，供上层注册监听器、
//! 注入通道和收发消息。
//!
//! 关闭顺序：关闭全部通道拦截器，清空监听器，取消排队中的特化，最后停止异步线程池。
//! 每一步都可重复执行。

mod builder;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info, warn};

pub use builder::ProtocolManagerBuilder;

use crate::accessor::{BackgroundCompiler, StructureCache};
use crate::channel::{
    ChannelId, ChannelInjector, ChannelState, HostChannel, InterceptorContext, PrimaryThread,
};
use crate::config::ProtocolConfig;
use crate::dispatch::{AsyncWorkerPool, ListenerDispatcher, ListenerId};
use crate::error::{PacketError, Result};
use crate::events::{MessageContainer, MessageListener, NetworkMarker};
use crate::metrics::ProtocolMetrics;
use crate::reflect::RecordRef;
use crate::registry::{Direction, MessageRegistry, MessageType, Phase};
use crate::report::ErrorReporter;

pub struct ProtocolManager {
    config: ProtocolConfig,
    registry: Arc<MessageRegistry>,
    structures: Arc<StructureCache>,
    dispatcher: Arc<ListenerDispatcher>,
    compiler: Option<Arc<BackgroundCompiler>>,
    pool: Option<Arc<AsyncWorkerPool>>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<ProtocolMetrics>,
    primary: Option<Arc<dyn PrimaryThread>>,
    injectors: DashMap<ChannelId, Arc<ChannelInjector>>,
    closed: AtomicBool,
}

impl ProtocolManager {
    pub fn builder() -> ProtocolManagerBuilder {
        ProtocolManagerBuilder::default()
    }

    /// 使用给定配置和默认协作方
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn structures(&self) -> &Arc<StructureCache> {
        &self.structures
    }

    pub fn dispatcher(&self) -> &Arc<ListenerDispatcher> {
        &self.dispatcher
    }

    pub fn compiler(&self) -> Option<&Arc<BackgroundCompiler>> {
        self.compiler.as_ref()
    }

    pub fn metrics(&self) -> &Arc<ProtocolMetrics> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(PacketError::Closed)
        } else {
            Ok(())
        }
    }

    // ---- 监听器 ----

    /// 方向不符的类型会被忽略并记录警告
    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) -> Result<ListenerId> {
        self.ensure_open()?;
        Ok(self.dispatcher.register(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.unregister(id)
    }

    /// 注销某个插件的全部监听器
    pub fn remove_listeners_of(&self, owner: &str) -> usize {
        let removed = self.dispatcher.unregister_owner(owner);
        if removed > 0 {
            debug!(owner = %owner, removed, "Listeners removed");
        }
        removed
    }

    pub fn has_listeners(&self, message_type: &MessageType) -> bool {
        self.dispatcher.has_listeners(message_type)
    }

    pub fn sending_types(&self) -> Vec<MessageType> {
        self.dispatcher.listener_types(Direction::Outbound)
    }

    pub fn receiving_types(&self) -> Vec<MessageType> {
        self.dispatcher.listener_types(Direction::Inbound)
    }

    // ---- 通道 ----

    fn context(&self) -> InterceptorContext {
        InterceptorContext {
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            structures: Arc::clone(&self.structures),
            reporter: Arc::clone(&self.reporter),
            metrics: Arc::clone(&self.metrics),
            primary: self.primary.clone(),
            pool: self.pool.clone(),
            processing_timeout: Duration::from_millis(self.config.dispatch.processing_timeout_ms),
            debug: self.config.interceptor.debug,
        }
    }

    /// 注入通道；同一通道重复注入返回已有的拦截器
    pub fn inject(&self, channel: Arc<dyn HostChannel>, phase: Phase) -> Result<Arc<ChannelInjector>> {
        self.ensure_open()?;
        // 首条消息到达前在调用线程上建好布局
        self.prewarm();
        let id: ChannelId = Arc::from(channel.id());
        let injector = {
            let mut entry = self
                .injectors
                .entry(Arc::clone(&id))
                .or_insert_with(|| ChannelInjector::new(Arc::clone(&channel), self.context(), phase));
            if entry.state() == ChannelState::Closed {
                // 同一标识上的新连接
                *entry = ChannelInjector::new(channel, self.context(), phase);
            }
            Arc::clone(entry.value())
        };

        if let Err(err) = injector.inject() {
            self.injectors
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &injector));
            return Err(err);
        }
        Ok(injector)
    }

    /// 关闭拦截器并恢复宿主句柄
    pub fn uninject(&self, channel_id: &str) -> bool {
        match self.injectors.remove(channel_id) {
            Some((_, injector)) => injector.close(),
            None => false,
        }
    }

    pub fn injector(&self, channel_id: &str) -> Option<Arc<ChannelInjector>> {
        self.injectors
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 当前处于注入状态的通道
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self
            .injectors
            .iter()
            .filter(|entry| entry.is_injected())
            .map(|entry| Arc::clone(entry.key()))
            .collect();
        ids.sort();
        ids
    }

    fn live_injector(&self, channel_id: &str) -> Result<Arc<ChannelInjector>> {
        self.injector(channel_id)
            .ok_or_else(|| PacketError::ChannelNotInjected(channel_id.to_string()))
    }

    pub fn set_phase(&self, channel_id: &str, phase: Phase) -> Result<()> {
        self.live_injector(channel_id)?.set_phase(phase);
        Ok(())
    }

    // ---- 收发 ----

    /// 向一个通道发送消息；`filtered = false` 时只有 MONITOR 监听器可见
    pub fn send_message(
        &self,
        channel_id: &str,
        container: MessageContainer,
        marker: Option<NetworkMarker>,
        filtered: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        self.live_injector(channel_id)?
            .send_message(container, marker, filtered)
    }

    /// 模拟从一个通道收到消息
    pub fn receive_message(
        &self,
        channel_id: &str,
        container: MessageContainer,
        marker: Option<NetworkMarker>,
        filtered: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        self.live_injector(channel_id)?
            .receive_message(container, marker, filtered)
    }

    /// 直接写出已编码的帧
    pub fn send_wire(&self, channel_id: &str, frame: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.live_injector(channel_id)?.send_wire(frame)
    }

    /// 发送到所有已注入的通道，返回成功的通道数
    pub fn broadcast(&self, container: &MessageContainer, filtered: bool) -> Result<usize> {
        self.ensure_open()?;
        let injectors: Vec<Arc<ChannelInjector>> = self
            .injectors
            .iter()
            .filter(|entry| entry.is_injected())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut sent = 0;
        for injector in injectors {
            match injector.send_message(container.clone(), None, filtered) {
                Ok(()) => sent += 1,
                Err(err) => warn!(channel = %injector.id(), error = %err, "Broadcast to channel failed"),
            }
        }
        Ok(sent)
    }

    // ---- 消息容器 ----

    /// 通过默认实例工厂新建一条消息；`force_defaults` 时把空引用字段填成默认值
    pub fn create_message(&self, message_type: &MessageType, force_defaults: bool) -> Result<MessageContainer> {
        let class = self
            .registry
            .class_of(message_type)
            .ok_or_else(|| PacketError::UnknownMessageType(message_type.to_string()))?;
        let record = self.structures.env().defaults.create(&class)?;
        let container = MessageContainer::new(
            message_type.clone(),
            record,
            &self.structures.modifier(&class),
        )?;
        if force_defaults {
            container.modifier().write_defaults()?;
        }
        Ok(container)
    }

    /// 包装宿主已有的消息实例
    pub fn container_for(&self, record: &RecordRef) -> Result<MessageContainer> {
        let message_type = self
            .registry
            .type_of_record(record)
            .ok_or_else(|| PacketError::UnknownMessageType(record.class().name().to_string()))?;
        MessageContainer::new(
            message_type,
            Arc::clone(record),
            &self.structures.modifier(record.class()),
        )
    }

    /// 为所有已注册类型预先构建结构布局
    pub fn prewarm(&self) -> usize {
        let types = self.registry.all_types();
        for message_type in &types {
            if let Some(class) = self.registry.class_of(message_type) {
                self.structures.prewarm(&class);
            }
        }
        types.len()
    }

    // ---- 关闭 ----

    /// 可重复调用
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let ids: Vec<ChannelId> = self.injectors.iter().map(|e| Arc::clone(e.key())).collect();
        let mut closed = 0;
        for id in ids {
            if let Some((_, injector)) = self.injectors.remove(&id) {
                if injector.close() {
                    closed += 1;
                }
            }
        }

        self.dispatcher.clear();

        if let Some(compiler) = &self.compiler {
            compiler.shutdown();
        }
        if let Some(pool) = &self.pool {
            pool.shutdown(Duration::from_millis(self.config.dispatch.shutdown_grace_ms));
        }
        info!(channels = closed, "Protocol manager shut down");
    }
}
