//! # 事件模块
//!
//! 监听器看到的一切：消息容器、事件信封、网络标记、监听白名单与监听器接口。

pub mod container;
pub mod delay;
pub mod event;
pub mod listener;
pub mod marker;
pub mod whitelist;

pub use container::MessageContainer;
pub use delay::{ProcessingDelay, TransmissionSignal};
pub use event::MessageEvent;
pub use listener::{FnListener, FnListenerBuilder, ListenerError, ListenerResult, MessageListener};
pub use marker::{NetworkMarker, OutputHandler, PostListener, ScheduledMessage};
pub use whitelist::{
    ListenerOptions, ListenerPriority, ListeningWhitelist, ListeningWhitelistBuilder,
};
