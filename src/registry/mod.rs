//! # 消息类型注册表
//!
//! 维护宿主记录类型与逻辑消息类型之间的双射，并按 (阶段, 方向) 划分子集。
//! 读方总是拿到一个完整的快照：写入在副本上完成后整体替换，读方不会看到半成品。

mod message_type;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

pub use message_type::{Direction, MessageType, Phase};

use crate::error::{PacketError, Result};
use crate::reflect::{ClassId, ClassRef, OpaqueRecord};

/// 重建注册表时的一条记录
#[derive(Clone)]
pub struct RegistryEntry {
    pub class: ClassRef,
    pub message_type: MessageType,
    pub id: Option<i32>,
}

impl RegistryEntry {
    pub fn new(class: &ClassRef, message_type: MessageType) -> Self {
        Self {
            class: Arc::clone(class),
            message_type,
            id: None,
        }
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Clone, Default)]
struct Register {
    by_class: HashMap<ClassId, MessageType>,
    classes: HashMap<MessageType, ClassRef>,
    by_id: HashMap<(Phase, Direction, i32), MessageType>,
    ids: HashMap<MessageType, i32>,
    by_name: HashMap<(Phase, Direction, Arc<str>), MessageType>,
    by_phase: HashMap<(Phase, Direction), Vec<MessageType>>,
}

impl Register {
    fn insert(&mut self, class: &ClassRef, message_type: MessageType, id: Option<i32>) -> Result<()> {
        if let Some(existing) = self.by_class.get(&class.id()) {
            if existing != &message_type {
                return Err(PacketError::RegistryConflict(format!(
                    "{} is already registered as {existing}",
                    class.name()
                )));
            }
        }
        if let Some(existing) = self.classes.get(&message_type) {
            if existing.id() != class.id() {
                return Err(PacketError::RegistryConflict(format!(
                    "{message_type} is already bound to {}",
                    existing.name()
                )));
            }
        }
        if let Some(id) = id {
            let slot = (message_type.phase(), message_type.direction(), id);
            match self.by_id.get(&slot) {
                Some(other) if other != &message_type => {
                    return Err(PacketError::RegistryConflict(format!(
                        "id {id:#04x} in {}/{} is already used by {other}",
                        message_type.phase(),
                        message_type.direction()
                    )));
                }
                _ => {}
            }
            if let Some(previous) = self.ids.get(&message_type) {
                if *previous != id {
                    return Err(PacketError::RegistryConflict(format!(
                        "{message_type} already has id {previous:#04x}"
                    )));
                }
            }
            self.by_id.insert(slot, message_type.clone());
            self.ids.insert(message_type.clone(), id);
        }

        if self.by_class.contains_key(&class.id()) {
            return Ok(());
        }
        self.by_class.insert(class.id(), message_type.clone());
        self.classes.insert(message_type.clone(), Arc::clone(class));
        self.by_name.insert(
            (
                message_type.phase(),
                message_type.direction(),
                Arc::from(message_type.name()),
            ),
            message_type.clone(),
        );
        self.by_phase
            .entry((message_type.phase(), message_type.direction()))
            .or_default()
            .push(message_type);
        Ok(())
    }
}

/// 消息类型注册表
#[derive(Default)]
pub struct MessageRegistry {
    current: RwLock<Arc<Register>>,
    writer: Mutex<()>,
    generation: AtomicU64,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Register> {
        Arc::clone(&self.current.read())
    }

    /// 在副本上修改后整体替换
    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Register) -> Result<()>,
    {
        let _writer = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        f(&mut next)?;
        *self.current.write() = Arc::new(next);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// 以类型简名作为消息名注册
    pub fn register(&self, class: &ClassRef, direction: Direction, phase: Phase) -> Result<MessageType> {
        self.register_as(class, MessageType::new(phase, direction, class.simple_name()))
    }

    pub fn register_as(&self, class: &ClassRef, message_type: MessageType) -> Result<MessageType> {
        self.update(|register| register.insert(class, message_type.clone(), None))?;
        debug!(class = %class.name(), message_type = %message_type, "Message type registered");
        Ok(message_type)
    }

    /// 同时登记线上编号
    pub fn register_with_id(
        &self,
        class: &ClassRef,
        message_type: MessageType,
        id: i32,
    ) -> Result<MessageType> {
        self.update(|register| register.insert(class, message_type.clone(), Some(id)))?;
        Ok(message_type)
    }

    /// 用全新的条目集合替换注册表；任何冲突都会保留旧表
    pub fn rebuild<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = RegistryEntry>,
    {
        let mut next = Register::default();
        for entry in entries {
            next.insert(&entry.class, entry.message_type, entry.id)?;
        }
        let count = next.by_class.len();

        let _writer = self.writer.lock();
        *self.current.write() = Arc::new(next);
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(types = count, "Message registry rebuilt");
        Ok(())
    }

    /// 每次修改递增
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn type_of(&self, class: &ClassRef) -> Option<MessageType> {
        self.snapshot().by_class.get(&class.id()).cloned()
    }

    pub fn type_of_record(&self, record: &OpaqueRecord) -> Option<MessageType> {
        self.type_of(record.class())
    }

    pub fn class_of(&self, message_type: &MessageType) -> Option<ClassRef> {
        self.snapshot().classes.get(message_type).cloned()
    }

    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.snapshot().classes.contains_key(message_type)
    }

    /// 类型已注册且属于给定阶段
    pub fn is_legal(&self, message_type: &MessageType, phase: Phase) -> bool {
        message_type.phase() == phase && self.contains(message_type)
    }

    /// 某阶段某方向的全部类型，按注册顺序
    pub fn types_in(&self, phase: Phase, direction: Direction) -> Vec<MessageType> {
        self.snapshot()
            .by_phase
            .get(&(phase, direction))
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_name(&self, phase: Phase, direction: Direction, name: &str) -> Option<MessageType> {
        self.snapshot()
            .by_name
            .get(&(phase, direction, Arc::from(name)))
            .cloned()
    }

    pub fn by_id(&self, phase: Phase, direction: Direction, id: i32) -> Option<MessageType> {
        self.snapshot().by_id.get(&(phase, direction, id)).cloned()
    }

    pub fn id_of(&self, message_type: &MessageType) -> Option<i32> {
        self.snapshot().ids.get(message_type).copied()
    }

    pub fn all_types(&self) -> Vec<MessageType> {
        let snapshot = self.snapshot();
        let mut types: Vec<MessageType> = snapshot.classes.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.snapshot().by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
