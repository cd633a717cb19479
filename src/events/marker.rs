//! 网络标记
//!
//! 每条在途消息的关联数据：入站的原始字节、出站编码后的字节变换、
//! 投递完成后的回调以及随后要发送的消息。生命周期为一次发送/接收。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{PacketError, Result};
use crate::registry::Direction;

use super::container::MessageContainer;
use super::event::MessageEvent;
use super::whitelist::ListenerPriority;

type OutputFn = dyn Fn(&MessageEvent, Bytes) -> anyhow::Result<Bytes> + Send + Sync;
type PostFn = dyn Fn(&MessageEvent) -> anyhow::Result<()> + Send + Sync;

/// 改写已编码字节的处理器，按优先级升序执行
#[derive(Clone)]
pub struct OutputHandler {
    owner: String,
    priority: ListenerPriority,
    handler: Arc<OutputFn>,
}

impl OutputHandler {
    pub fn new<F>(owner: impl Into<String>, priority: ListenerPriority, handler: F) -> Self
    where
        F: Fn(&MessageEvent, Bytes) -> anyhow::Result<Bytes> + Send + Sync + 'static,
    {
        Self {
            owner: owner.into(),
            priority,
            handler: Arc::new(handler),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn priority(&self) -> ListenerPriority {
        self.priority
    }

    pub(crate) fn handle(&self, event: &MessageEvent, frame: Bytes) -> anyhow::Result<Bytes> {
        (self.handler)(event, frame)
    }
}

/// 消息投递之后执行的回调
#[derive(Clone)]
pub struct PostListener {
    owner: String,
    callback: Arc<PostFn>,
}

impl PostListener {
    pub fn new<F>(owner: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&MessageEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            owner: owner.into(),
            callback: Arc::new(callback),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn call(&self, event: &MessageEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }
}

/// 当前消息投递后在同一通道上发送的消息
#[derive(Clone, Debug)]
pub struct ScheduledMessage {
    container: MessageContainer,
    filtered: bool,
}

impl ScheduledMessage {
    /// 经过监听器
    pub fn filtered(container: MessageContainer) -> Self {
        Self {
            container,
            filtered: true,
        }
    }

    /// 只通知 MONITOR 监听器
    pub fn silent(container: MessageContainer) -> Self {
        Self {
            container,
            filtered: false,
        }
    }

    pub fn container(&self) -> &MessageContainer {
        &self.container
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }
}

#[derive(Clone)]
pub struct NetworkMarker {
    direction: Direction,
    input_buffer: Option<Bytes>,
    output_handlers: Vec<OutputHandler>,
    post_listeners: Vec<PostListener>,
    scheduled: Vec<ScheduledMessage>,
}

impl NetworkMarker {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            input_buffer: None,
            output_handlers: Vec::new(),
            post_listeners: Vec::new(),
            scheduled: Vec::new(),
        }
    }

    pub(crate) fn with_input_buffer(direction: Direction, frame: Bytes) -> Self {
        Self {
            input_buffer: Some(frame),
            ..Self::new(direction)
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 解码前的原始字节，仅在有监听器请求时保留
    pub fn input_buffer(&self) -> Option<&Bytes> {
        self.input_buffer.as_ref()
    }

    /// 只对出站消息有效
    pub fn add_output_handler(&mut self, handler: OutputHandler) -> Result<()> {
        if self.direction != Direction::Outbound {
            return Err(PacketError::InvalidArgument(
                "output handlers only apply to outbound messages".into(),
            ));
        }
        let pos = self
            .output_handlers
            .partition_point(|h| h.priority <= handler.priority);
        self.output_handlers.insert(pos, handler);
        Ok(())
    }

    pub fn remove_output_handlers(&mut self, owner: &str) -> usize {
        let before = self.output_handlers.len();
        self.output_handlers.retain(|h| h.owner != owner);
        before - self.output_handlers.len()
    }

    pub fn output_handlers(&self) -> &[OutputHandler] {
        &self.output_handlers
    }

    pub fn has_output_handlers(&self) -> bool {
        !self.output_handlers.is_empty()
    }

    pub fn add_post_listener(&mut self, listener: PostListener) {
        self.post_listeners.push(listener);
    }

    pub fn post_listeners(&self) -> &[PostListener] {
        &self.post_listeners
    }

    pub fn schedule(&mut self, message: ScheduledMessage) {
        self.scheduled.push(message);
    }

    pub fn scheduled(&self) -> &[ScheduledMessage] {
        &self.scheduled
    }

    pub(crate) fn take_scheduled(&mut self) -> Vec<ScheduledMessage> {
        std::mem::take(&mut self.scheduled)
    }

    /// 投递后是否还有工作
    pub(crate) fn has_post_work(&self) -> bool {
        !self.post_listeners.is_empty() || !self.scheduled.is_empty()
    }
}

impl fmt::Debug for NetworkMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMarker")
            .field("direction", &self.direction)
            .field("input_buffer", &self.input_buffer.as_ref().map(Bytes::len))
            .field("output_handlers", &self.output_handlers.len())
            .field("post_listeners", &self.post_listeners.len())
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_handlers_sorted_and_outbound_only() {
        let mut marker = NetworkMarker::new(Direction::Outbound);
        marker
            .add_output_handler(OutputHandler::new("b", ListenerPriority::High, |_, f| Ok(f)))
            .unwrap();
        marker
            .add_output_handler(OutputHandler::new("a", ListenerPriority::Low, |_, f| Ok(f)))
            .unwrap();
        let owners: Vec<&str> = marker.output_handlers().iter().map(|h| h.owner()).collect();
        assert_eq!(owners, vec!["a", "b"]);
        assert_eq!(marker.remove_output_handlers("a"), 1);

        let mut inbound = NetworkMarker::with_input_buffer(Direction::Inbound, Bytes::from_static(b"\x01"));
        assert_eq!(inbound.input_buffer().map(Bytes::len), Some(1));
        assert!(matches!(
            inbound.add_output_handler(OutputHandler::new("x", ListenerPriority::Normal, |_, f| Ok(f))),
            Err(PacketError::InvalidArgument(_))
        ));
    }
}
