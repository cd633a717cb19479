//! 消息监听器接口

use std::fmt;
use std::sync::Arc;

use crate::error::PacketError;

use super::event::MessageEvent;
use super::whitelist::ListeningWhitelist;

/// 监听器返回的错误
///
/// `Fault` 被隔离并上报，同一事件的其它监听器继续执行；`Fatal` 立即终止本次分发，
/// 拦截器随后关闭受影响的通道。
#[derive(Debug)]
pub enum ListenerError {
    Fault(anyhow::Error),
    Fatal(anyhow::Error),
}

impl ListenerError {
    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        ListenerError::Fatal(error.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ListenerError::Fatal(_))
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Fault(err) => write!(f, "listener fault: {err}"),
            ListenerError::Fatal(err) => write!(f, "fatal listener error: {err}"),
        }
    }
}

impl From<anyhow::Error> for ListenerError {
    fn from(err: anyhow::Error) -> Self {
        ListenerError::Fault(err)
    }
}

impl From<PacketError> for ListenerError {
    fn from(err: PacketError) -> Self {
        if err.is_fatal() {
            ListenerError::Fatal(err.into())
        } else {
            ListenerError::Fault(err.into())
        }
    }
}

pub type ListenerResult = std::result::Result<(), ListenerError>;

/// 消息监听器
///
/// 发送方向的回调在发起写入的线程上执行，接收方向的回调在通道 I/O 线程上执行；
/// 白名单带有 `OFF_THREAD` 选项时可能在工作线程上执行。
pub trait MessageListener: Send + Sync {
    /// 所属插件/模块，用于故障上报和按所有者注销
    fn owner(&self) -> &str;

    fn sending_whitelist(&self) -> &ListeningWhitelist;

    fn receiving_whitelist(&self) -> &ListeningWhitelist;

    fn on_sending(&self, _event: &mut MessageEvent) -> ListenerResult {
        Ok(())
    }

    fn on_receiving(&self, _event: &mut MessageEvent) -> ListenerResult {
        Ok(())
    }
}

type Handler = Box<dyn Fn(&mut MessageEvent) -> ListenerResult + Send + Sync>;

/// 由闭包组成的监听器
pub struct FnListener {
    owner: String,
    sending: ListeningWhitelist,
    receiving: ListeningWhitelist,
    on_sending: Option<Handler>,
    on_receiving: Option<Handler>,
}

impl FnListener {
    pub fn builder(owner: impl Into<String>) -> FnListenerBuilder {
        FnListenerBuilder {
            listener: FnListener {
                owner: owner.into(),
                sending: ListeningWhitelist::empty(),
                receiving: ListeningWhitelist::empty(),
                on_sending: None,
                on_receiving: None,
            },
        }
    }
}

impl MessageListener for FnListener {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn sending_whitelist(&self) -> &ListeningWhitelist {
        &self.sending
    }

    fn receiving_whitelist(&self) -> &ListeningWhitelist {
        &self.receiving
    }

    fn on_sending(&self, event: &mut MessageEvent) -> ListenerResult {
        match &self.on_sending {
            Some(handler) => handler(event),
            None => Ok(()),
        }
    }

    fn on_receiving(&self, event: &mut MessageEvent) -> ListenerResult {
        match &self.on_receiving {
            Some(handler) => handler(event),
            None => Ok(()),
        }
    }
}

pub struct FnListenerBuilder {
    listener: FnListener,
}

impl FnListenerBuilder {
    pub fn sending<F>(mut self, whitelist: ListeningWhitelist, handler: F) -> Self
    where
        F: Fn(&mut MessageEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.listener.sending = whitelist;
        self.listener.on_sending = Some(Box::new(handler));
        self
    }

    pub fn receiving<F>(mut self, whitelist: ListeningWhitelist, handler: F) -> Self
    where
        F: Fn(&mut MessageEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.listener.receiving = whitelist;
        self.listener.on_receiving = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Arc<dyn MessageListener> {
        Arc::new(self.listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_error_classification() {
        let fault: ListenerError = PacketError::access_denied("Chat.message", "read-only").into();
        assert!(!fault.is_fatal());

        let fatal: ListenerError = PacketError::CodecUnavailable("c1".into()).into();
        assert!(fatal.is_fatal());

        let plain: ListenerError = anyhow::anyhow!("boom").into();
        assert!(matches!(plain, ListenerError::Fault(_)));
    }
}
