//! 结构布局缓存
//!
//! 每个记录类型只构建一次布局；并发构建时 insert-if-absent，读路径不阻塞。

use std::sync::Arc;

use dashmap::DashMap;

use super::structure::{StructureEnv, StructureLayout, StructureModifier};
use crate::error::Result;
use crate::reflect::{ClassId, ClassRef, RecordRef, Value};

pub struct StructureCache {
    layouts: DashMap<ClassId, Arc<StructureLayout>>,
    env: Arc<StructureEnv>,
}

impl Default for StructureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureCache {
    pub fn new() -> Self {
        Self::with_env(StructureEnv::default())
    }

    pub fn with_env(env: StructureEnv) -> Self {
        Self {
            layouts: DashMap::new(),
            env: Arc::new(env),
        }
    }

    pub fn env(&self) -> &StructureEnv {
        &self.env
    }

    /// 取得（必要时构建）类型的根布局，首次构建时请求特化
    pub fn layout(&self, class: &ClassRef) -> Arc<StructureLayout> {
        if let Some(layout) = self.layouts.get(&class.id()) {
            return Arc::clone(layout.value());
        }
        let layout = self
            .layouts
            .entry(class.id())
            .or_insert_with(|| StructureLayout::root(class, Arc::clone(&self.env)))
            .clone();
        layout.request_compile();
        layout
    }

    /// 未绑定实例的根视图
    pub fn modifier(&self, class: &ClassRef) -> StructureModifier<Value> {
        StructureModifier::new(self.layout(class))
    }

    /// 绑定到记录实例的根视图
    pub fn modifier_for(&self, record: &RecordRef) -> Result<StructureModifier<Value>> {
        self.modifier(record.class()).with_target(record)
    }

    /// 预先构建布局，避免在 I/O 线程上首次构建
    pub fn prewarm(&self, class: &ClassRef) {
        self.layout(class);
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn clear(&self) {
        self.layouts.clear();
    }
}
