//! Flare Packet Hook 错误模块
//!
//! - 统一定义成员发现、结构访问、消息注册、通道拦截与监听器分发的错误类型
//! - 宿主协作方（编解码、处理器、监听器实现）返回 `anyhow::Error`，在此处包装为带来源的变体

use thiserror::Error;

/// 核心错误类型
#[derive(Debug, Error)]
pub enum PacketError {
    /// 成员解析失败（不存在或存在歧义）
    #[error("no member matches {0}")]
    MatchNotFound(String),

    /// 宿主访问策略拒绝读写
    #[error("access denied to {member}: {reason}")]
    AccessDenied {
        member: String,
        reason: String,
        #[source]
        cause: Option<anyhow::Error>,
    },

    /// 索引越界
    #[error("field index {index} is out of bounds for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// 值类型与成员声明类型不兼容
    #[error("type mismatch on {member}: expected {expected}, found {found}")]
    TypeMismatch {
        member: String,
        expected: String,
        found: String,
    },

    /// 视图尚未绑定目标实例
    #[error("structure view of {0} has no target instance")]
    NoTarget(String),

    /// 监听器执行出错（已隔离）
    #[error("listener of {owner} failed in {method}")]
    ListenerFault {
        owner: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// 监听器报告不可恢复错误
    #[error("listener of {owner} raised a fatal error in {method}")]
    ListenerFatal {
        owner: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// 重复注入（幂等，无副作用）
    #[error("channel {0} is already injected")]
    InjectionConflict(String),

    /// 通道已关闭
    #[error("channel {0} is closed")]
    ChannelClosed(String),

    /// 通道未注入或不存在
    #[error("channel {0} is not injected")]
    ChannelNotInjected(String),

    /// 宿主解码/编码例程不可用
    #[error("host codec unavailable for channel {0}")]
    CodecUnavailable(String),

    /// 宿主编解码失败
    #[error("codec failure on channel {channel}")]
    Codec {
        channel: String,
        #[source]
        source: anyhow::Error,
    },

    /// 宿主处理器写入失败
    #[error("host handler failed on channel {channel}")]
    Transport {
        channel: String,
        #[source]
        source: anyhow::Error,
    },

    /// 注册表双射冲突
    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    /// 未知的消息类型
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// 宿主方法调用失败
    #[error("invocation of {member} failed")]
    Invocation {
        member: String,
        #[source]
        source: anyhow::Error,
    },

    /// 实例无法构造
    #[error("cannot construct instance of {0}")]
    Instantiation(String),

    /// 非法参数
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 后台线程无法启动
    #[error("failed to start worker thread {name}")]
    WorkerStart {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 服务已关闭
    #[error("protocol manager is closed")]
    Closed,

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// 指标注册失败
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
}

impl PacketError {
    pub fn access_denied(member: impl Into<String>, reason: impl Into<String>) -> Self {
        PacketError::AccessDenied {
            member: member.into(),
            reason: reason.into(),
            cause: None,
        }
    }

    pub fn access_denied_with(
        member: impl Into<String>,
        reason: impl Into<String>,
        cause: anyhow::Error,
    ) -> Self {
        PacketError::AccessDenied {
            member: member.into(),
            reason: reason.into(),
            cause: Some(cause),
        }
    }

    pub fn type_mismatch(
        member: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        PacketError::TypeMismatch {
            member: member.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// 是否为需要关闭通道的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PacketError::ListenerFatal { .. } | PacketError::CodecUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PacketError>;
