//! 宿主通道接口
//!
//! 宿主把传输句柄放在可替换的 [`HandlerSlot`] 中，拦截器注入时换成自己的代理实现，
//! 关闭时换回原实现。编解码例程始终由宿主提供。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::reflect::{OpaqueRecord, RecordRef};
use crate::registry::Phase;

/// 通道标识
pub type ChannelId = Arc<str>;

/// 宿主自身的编解码例程
pub trait HostCodec: Send + Sync {
    fn decode(&self, phase: Phase, frame: &Bytes) -> anyhow::Result<RecordRef>;

    fn encode(&self, phase: Phase, message: &OpaqueRecord) -> anyhow::Result<Bytes>;
}

/// 出站传输句柄
pub trait OutboundHandler: Send + Sync {
    /// 写出一条消息，由宿主编码
    fn write(&self, message: RecordRef) -> anyhow::Result<()>;

    /// 写出已编码的帧
    fn write_frame(&self, frame: Bytes) -> anyhow::Result<()>;
}

/// 入站处理句柄
pub trait InboundHandler: Send + Sync {
    /// 传输层收到一帧，由宿主解码后交给 [`InboundHandler::on_message`]
    fn on_frame(&self, frame: Bytes) -> anyhow::Result<()>;

    /// 把已解码的消息交给宿主
    fn on_message(&self, message: RecordRef) -> anyhow::Result<()>;
}

/// 加锁保护、可整体替换的句柄引用
pub struct HandlerSlot<T: ?Sized> {
    current: RwLock<Arc<T>>,
}

impl<T: ?Sized> HandlerSlot<T> {
    pub fn new(handler: Arc<T>) -> Self {
        Self {
            current: RwLock::new(handler),
        }
    }

    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// 替换并返回旧句柄
    pub fn replace(&self, handler: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), handler)
    }

    /// 当前句柄仍为 `expected` 时才替换
    pub fn compare_and_replace(&self, expected: &Arc<T>, handler: Arc<T>) -> bool {
        let mut current = self.current.write();
        if Arc::ptr_eq(&*current, expected) {
            *current = handler;
            true
        } else {
            false
        }
    }
}

impl<T: ?Sized> fmt::Debug for HandlerSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot").finish_non_exhaustive()
    }
}

/// 一条宿主双工通道
pub trait HostChannel: Send + Sync {
    fn id(&self) -> &str;

    fn outbound(&self) -> &HandlerSlot<dyn OutboundHandler>;

    fn inbound(&self) -> &HandlerSlot<dyn InboundHandler>;

    /// 找不到宿主编解码例程时返回 None，拦截器会关闭该通道
    fn codec(&self) -> Option<Arc<dyn HostCodec>>;

    fn is_open(&self) -> bool;

    /// 断开这一条连接
    fn disconnect(&self, reason: &str);
}

/// 宿主主线程
pub trait PrimaryThread: Send + Sync {
    fn is_primary(&self) -> bool;

    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}
