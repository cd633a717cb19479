//! 监听优先级、选项与类型白名单

use std::collections::HashSet;
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::registry::MessageType;

/// 监听优先级；同一事件按槽位升序调用，MONITOR 最后且只读
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Monitor,
}

impl ListenerPriority {
    pub fn slot(self) -> u8 {
        self as u8
    }

    pub fn is_monitor(self) -> bool {
        self == ListenerPriority::Monitor
    }
}

impl fmt::Display for ListenerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerPriority::Lowest => "LOWEST",
            ListenerPriority::Low => "LOW",
            ListenerPriority::Normal => "NORMAL",
            ListenerPriority::High => "HIGH",
            ListenerPriority::Highest => "HIGHEST",
            ListenerPriority::Monitor => "MONITOR",
        };
        f.write_str(name)
    }
}

/// 监听选项（位标志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ListenerOptions(u8);

impl ListenerOptions {
    pub const NONE: Self = Self(0);
    /// 需要入站消息解码前的原始字节
    pub const INTERCEPT_INPUT_BUFFER: Self = Self(0x01);
    /// 允许在工作线程上调用
    pub const OFF_THREAD: Self = Self(0x02);
    /// 必须在宿主主线程上调用
    pub const PRIMARY_THREAD: Self = Self(0x04);

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ListenerOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// 一个方向上的监听范围
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListeningWhitelist {
    priority: ListenerPriority,
    types: HashSet<MessageType>,
    options: ListenerOptions,
}

impl ListeningWhitelist {
    pub fn builder() -> ListeningWhitelistBuilder {
        ListeningWhitelistBuilder::default()
    }

    /// 不监听任何类型
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn priority(&self) -> ListenerPriority {
        self.priority
    }

    pub fn types(&self) -> &HashSet<MessageType> {
        &self.types
    }

    pub fn options(&self) -> ListenerOptions {
        self.options
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.types.contains(message_type)
    }
}

#[derive(Default)]
pub struct ListeningWhitelistBuilder {
    whitelist: ListeningWhitelist,
}

impl ListeningWhitelistBuilder {
    pub fn priority(mut self, priority: ListenerPriority) -> Self {
        self.whitelist.priority = priority;
        self
    }

    pub fn monitor(self) -> Self {
        self.priority(ListenerPriority::Monitor)
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.whitelist.types.insert(message_type);
        self
    }

    pub fn types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = MessageType>,
    {
        self.whitelist.types.extend(types);
        self
    }

    pub fn options(mut self, options: ListenerOptions) -> Self {
        self.whitelist.options = self.whitelist.options | options;
        self
    }

    pub fn build(self) -> ListeningWhitelist {
        self.whitelist
    }
}
