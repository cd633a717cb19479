//! 消息容器：宿主记录实例加上其结构视图

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::accessor::{SharedConverter, StructureModifier, WriteGuard, native};
use crate::error::Result;
use crate::reflect::{ClassRef, RecordRef, Value, builtin};
use crate::registry::MessageType;

#[derive(Clone)]
pub struct MessageContainer {
    message_type: MessageType,
    handle: RecordRef,
    structure: StructureModifier<Value>,
}

impl MessageContainer {
    /// `structure` 为该记录类型的根视图，未绑定时在此绑定
    pub fn new(
        message_type: MessageType,
        handle: RecordRef,
        structure: &StructureModifier<Value>,
    ) -> Result<Self> {
        let structure = structure.with_target(&handle)?;
        Ok(Self {
            message_type,
            handle,
            structure,
        })
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn handle(&self) -> &RecordRef {
        &self.handle
    }

    /// 全部成员的原生视图
    pub fn modifier(&self) -> &StructureModifier<Value> {
        &self.structure
    }

    pub(crate) fn with_write_guard(mut self, guard: WriteGuard) -> Self {
        self.structure = self.structure.with_write_guard(guard);
        self
    }

    /// 按字段类型过滤并经转换器读写的视图
    pub fn specific<T: 'static>(
        &self,
        field_type: &ClassRef,
        converter: SharedConverter<T>,
    ) -> StructureModifier<T> {
        self.structure.with_type(field_type, converter)
    }

    pub fn booleans(&self) -> StructureModifier<bool> {
        self.specific(&builtin::BOOLEAN, native())
    }

    pub fn bytes(&self) -> StructureModifier<i8> {
        self.specific(&builtin::BYTE, native())
    }

    pub fn shorts(&self) -> StructureModifier<i16> {
        self.specific(&builtin::SHORT, native())
    }

    pub fn integers(&self) -> StructureModifier<i32> {
        self.specific(&builtin::INT, native())
    }

    pub fn longs(&self) -> StructureModifier<i64> {
        self.specific(&builtin::LONG, native())
    }

    pub fn floats(&self) -> StructureModifier<f32> {
        self.specific(&builtin::FLOAT, native())
    }

    pub fn doubles(&self) -> StructureModifier<f64> {
        self.specific(&builtin::DOUBLE, native())
    }

    pub fn strings(&self) -> StructureModifier<Option<String>> {
        self.specific(&builtin::STRING, native())
    }

    pub fn byte_arrays(&self) -> StructureModifier<Option<Bytes>> {
        self.specific(&builtin::BYTES, native())
    }

    pub fn lists(&self) -> StructureModifier<Option<Vec<Value>>> {
        self.specific(&builtin::LIST, native())
    }

    /// 类型派生自 `ty` 的嵌套记录字段
    pub fn records(&self, ty: &ClassRef) -> StructureModifier<Option<RecordRef>> {
        self.specific(ty, native())
    }

    /// 字段值复制到新实例，嵌套记录共享
    pub fn shallow_clone(&self) -> Result<Self> {
        self.with_handle(self.handle.shallow_copy())
    }

    /// 递归复制嵌套记录
    pub fn deep_clone(&self) -> Result<Self> {
        self.with_handle(self.handle.deep_copy())
    }

    fn with_handle(&self, handle: RecordRef) -> Result<Self> {
        let structure = self.structure.without_write_guard().with_target(&handle)?;
        Ok(Self {
            message_type: self.message_type.clone(),
            handle,
            structure,
        })
    }

    pub fn same_handle(&self, other: &MessageContainer) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for MessageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContainer")
            .field("type", &self.message_type)
            .field("handle", &self.handle)
            .finish()
    }
}
