//! Flare Packet Hook 公共库
//!
//! 对宿主通道上流动的结构化消息进行观察、修改、取消和重放：
//! - `reflect`：在布局未知的宿主类型上按约束发现成员
//! - `accessor`：按索引读写的结构视图及其后台特化
//! - `registry`：宿主类型与逻辑消息类型的双射
//! - `events` / `dispatch`：监听器、事件与按优先级分发
//! - `channel`：通道拦截器
//! - `manager`：组合以上组件的协议管理器

pub mod accessor;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod reflect;
pub mod registry;
pub mod report;
pub mod tracing;

pub use config::{
    DispatchConfig, InterceptorConfig, LoggingConfig, ProtocolConfig, SpecializerConfig,
    app_config, load_config,
};
pub use error::{PacketError, Result};
pub use events::{
    FnListener, ListenerError, ListenerOptions, ListenerPriority, ListenerResult,
    ListeningWhitelist, MessageContainer, MessageEvent, MessageListener, NetworkMarker,
    TransmissionSignal,
};
pub use manager::{ProtocolManager, ProtocolManagerBuilder};
pub use registry::{Direction, MessageRegistry, MessageType, Phase};
