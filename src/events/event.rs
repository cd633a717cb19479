//! 消息事件

use std::sync::Arc;

use crate::accessor::WriteGuard;
use crate::error::{PacketError, Result};
use crate::registry::{Direction, MessageType};

use super::container::MessageContainer;
use super::delay::{ProcessingDelay, TransmissionSignal};
use super::marker::NetworkMarker;

/// 贯穿单个方向监听链的可变信封
///
/// 取消标记与"停止迭代"相互独立：取消只抑制后续投递，剩余监听器（包括 MONITOR）照常执行。
/// MONITOR 阶段事件只读，此时对容器字段、取消标记和容器本身的修改都会被拒绝。
#[derive(Debug)]
pub struct MessageEvent {
    container: MessageContainer,
    channel: Arc<str>,
    cancelled: bool,
    guard: WriteGuard,
    marker: Option<NetworkMarker>,
    filtered: bool,
    delay: Option<ProcessingDelay>,
}

impl MessageEvent {
    pub(crate) fn new(
        container: MessageContainer,
        channel: Arc<str>,
        marker: Option<NetworkMarker>,
        filtered: bool,
    ) -> Self {
        let guard = WriteGuard::new();
        Self {
            container: container.with_write_guard(guard.clone()),
            channel,
            cancelled: false,
            guard,
            marker,
            filtered,
            delay: None,
        }
    }

    pub fn container(&self) -> &MessageContainer {
        &self.container
    }

    pub fn message_type(&self) -> &MessageType {
        self.container.message_type()
    }

    pub fn direction(&self) -> Direction {
        self.container.message_type().direction()
    }

    pub fn channel_id(&self) -> &str {
        &self.channel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_cancelled(&mut self, cancelled: bool) -> Result<()> {
        self.ensure_writable("cancelled")?;
        self.cancelled = cancelled;
        Ok(())
    }

    /// 替换整条消息；方向必须一致
    pub fn set_container(&mut self, container: MessageContainer) -> Result<()> {
        self.ensure_writable("container")?;
        if container.message_type().direction() != self.direction() {
            return Err(PacketError::InvalidArgument(format!(
                "cannot replace {} message with {}",
                self.direction(),
                container.message_type()
            )));
        }
        self.container = container.with_write_guard(self.guard.clone());
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.guard.is_locked()
    }

    pub(crate) fn set_read_only(&self, read_only: bool) {
        self.guard.set_locked(read_only);
    }

    /// 是否经过监听器过滤；静默发送的消息只有 MONITOR 可见
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    pub fn network_marker(&self) -> Option<&NetworkMarker> {
        self.marker.as_ref()
    }

    /// 没有标记时按事件方向创建；只读阶段拒绝
    pub fn network_marker_mut(&mut self) -> Result<&mut NetworkMarker> {
        self.ensure_writable("network_marker")?;
        let direction = self.direction();
        Ok(self.marker.get_or_insert_with(|| NetworkMarker::new(direction)))
    }

    /// 推迟投递，直到返回的信号放行或等待超时
    ///
    /// 可多次调用，每个信号都放行后消息才进入投递队列；同一通道同方向的后续消息也随之等待。
    pub fn increment_processing_delay(&mut self) -> Result<TransmissionSignal> {
        self.ensure_writable("processing_delay")?;
        Ok(self.delay.get_or_insert_with(ProcessingDelay::new).increment())
    }

    pub fn processing_delay(&self) -> Option<&ProcessingDelay> {
        self.delay.as_ref()
    }

    pub(crate) fn take_marker(&mut self) -> Option<NetworkMarker> {
        self.marker.take()
    }

    fn ensure_writable(&self, what: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(PacketError::access_denied(
                format!("{}.{what}", self.message_type()),
                "event is read-only for monitor listeners",
            ));
        }
        Ok(())
    }
}
