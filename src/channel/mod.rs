//! # 通道拦截模块
//!
//! 宿主通道接口、每通道的拦截器以及按顺序投递的队列。

pub mod host;
pub mod injector;
mod ordering;

pub use host::{
    ChannelId, HandlerSlot, HostChannel, HostCodec, InboundHandler, OutboundHandler, PrimaryThread,
};
pub use injector::{ChannelInjector, ChannelState, InterceptorContext};
