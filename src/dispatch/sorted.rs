//! 按消息类型分组、按优先级排序的监听器表
//!
//! 每个类型对应一个不可变切片；写入时复制并整体替换，分发方拿到的切片在整个事件期间不变。

use std::sync::Arc;

use dashmap::DashMap;

use crate::events::{ListenerOptions, ListenerPriority, MessageListener};
use crate::registry::MessageType;

/// 监听器注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl ListenerId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
pub struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) priority: ListenerPriority,
    pub(crate) options: ListenerOptions,
    pub(crate) listener: Arc<dyn MessageListener>,
}

impl ListenerEntry {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn priority(&self) -> ListenerPriority {
        self.priority
    }

    pub fn options(&self) -> ListenerOptions {
        self.options
    }

    pub fn owner(&self) -> &str {
        self.listener.owner()
    }

    pub fn is_async(&self) -> bool {
        self.options.contains(ListenerOptions::OFF_THREAD)
    }

    fn sort_key(&self) -> (u8, ListenerId) {
        (self.priority.slot(), self.id)
    }
}

pub type ListenerSnapshot = Arc<[ListenerEntry]>;

#[derive(Default)]
pub struct SortedListeners {
    map: DashMap<MessageType, ListenerSnapshot>,
}

impl SortedListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 (优先级槽位, 注册序号) 插入
    pub fn insert(&self, message_type: MessageType, entry: ListenerEntry) {
        let mut slot = self
            .map
            .entry(message_type)
            .or_insert_with(|| Arc::from(Vec::new()));
        let mut next: Vec<ListenerEntry> = slot.iter().cloned().collect();
        let key = entry.sort_key();
        let pos = next.partition_point(|e| e.sort_key() <= key);
        next.insert(pos, entry);
        *slot = Arc::from(next);
    }

    pub fn remove(&self, message_type: &MessageType, id: ListenerId) -> bool {
        let mut removed = false;
        let mut now_empty = false;
        if let Some(mut slot) = self.map.get_mut(message_type) {
            let next: Vec<ListenerEntry> = slot.iter().filter(|e| e.id != id).cloned().collect();
            removed = next.len() != slot.len();
            now_empty = next.is_empty();
            *slot = Arc::from(next);
        }
        if now_empty {
            self.map.remove_if(message_type, |_, slot| slot.is_empty());
        }
        removed
    }

    pub fn get(&self, message_type: &MessageType) -> Option<ListenerSnapshot> {
        self.map.get(message_type).map(|slot| Arc::clone(slot.value()))
    }

    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.map.contains_key(message_type)
    }

    /// 某类型是否有监听器带有给定选项
    pub fn any_with(&self, message_type: &MessageType, option: ListenerOptions) -> bool {
        self.map
            .get(message_type)
            .map(|slot| slot.iter().any(|e| e.options.contains(option)))
            .unwrap_or(false)
    }

    pub fn types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.map.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
