//! 结构特化
//!
//! 把成员表编译为按索引分发的槽位操作表：可直接访问的公开字段预先解析好槽位，
//! 读写时不再查找；需要越权访问的成员委托回反射路径。

use std::fmt;

use super::field::FieldAccessor;
use super::structure::{LayoutKey, StructureLayout};
use crate::error::{PacketError, Result};
use crate::reflect::{FieldRef, Member, OpaqueRecord, Value};

enum SlotOp {
    Direct { slot: usize, field: FieldRef },
    Delegate(FieldAccessor),
}

/// 特化后的结构访问实现
pub struct CompiledStructure {
    key: LayoutKey,
    ops: Vec<SlotOp>,
}

impl CompiledStructure {
    pub fn key(&self) -> LayoutKey {
        self.key
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// 直接分发的成员数
    pub fn direct_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, SlotOp::Direct { .. }))
            .count()
    }

    pub(crate) fn read(&self, index: usize, target: &OpaqueRecord) -> Result<Value> {
        match self.op(index)? {
            SlotOp::Direct { slot, field } => target
                .load_slot(*slot)
                .ok_or_else(|| PacketError::access_denied(field.identity(), "slot not present")),
            SlotOp::Delegate(accessor) => accessor.get(target),
        }
    }

    pub(crate) fn write(&self, index: usize, target: &OpaqueRecord, value: Value) -> Result<()> {
        match self.op(index)? {
            SlotOp::Direct { slot, field } => {
                if !value.conforms_to(field.field_type()) {
                    return Err(PacketError::type_mismatch(
                        field.identity(),
                        field.field_type().name(),
                        value.type_name(),
                    ));
                }
                if target.store_slot(*slot, value) {
                    Ok(())
                } else {
                    Err(PacketError::access_denied(field.identity(), "slot not present"))
                }
            }
            SlotOp::Delegate(accessor) => accessor.set(target, value),
        }
    }

    fn op(&self, index: usize) -> Result<&SlotOp> {
        self.ops.get(index).ok_or(PacketError::IndexOutOfRange {
            index,
            len: self.ops.len(),
        })
    }
}

impl fmt::Debug for CompiledStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledStructure")
            .field("key", &self.key)
            .field("len", &self.ops.len())
            .field("direct", &self.direct_count())
            .finish()
    }
}

/// 特化策略
pub trait Specializer: Send + Sync {
    /// 不值得特化时返回 `Ok(None)`
    fn specialize(&self, layout: &StructureLayout) -> Result<Option<CompiledStructure>>;
}

/// 槽位表特化
#[derive(Debug, Default, Clone, Copy)]
pub struct SlotTableSpecializer;

impl Specializer for SlotTableSpecializer {
    fn specialize(&self, layout: &StructureLayout) -> Result<Option<CompiledStructure>> {
        // 没有任何成员可直接访问时保留通用实现
        if !layout.fields().iter().any(|field| field.is_accessible()) {
            return Ok(None);
        }

        let mut ops = Vec::with_capacity(layout.len());
        for (index, field) in layout.fields().iter().enumerate() {
            let accessor = layout.accessor(index).ok_or(PacketError::IndexOutOfRange {
                index,
                len: layout.len(),
            })?;
            if field.is_accessible() {
                let slot = layout.record_class().resolve_slot(field).ok_or_else(|| {
                    PacketError::InvalidArgument(format!(
                        "{} has no slot in {}",
                        field.identity(),
                        layout.record_class().name()
                    ))
                })?;
                ops.push(SlotOp::Direct {
                    slot,
                    field: field.clone(),
                });
            } else {
                ops.push(SlotOp::Delegate(accessor.clone()));
            }
        }

        Ok(Some(CompiledStructure {
            key: layout.key(),
            ops,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::accessor::structure::{StructureEnv, StructureModifier};
    use crate::reflect::{ClassBuilder, ClassRef, Modifiers, builtin::*};

    fn mixed_class() -> ClassRef {
        ClassBuilder::new("Mixed")
            .field("a", &INT, Modifiers::PUBLIC)
            .field("b", &STRING, Modifiers::PRIVATE)
            .field("c", &LONG, Modifiers::PUBLIC)
            .build()
    }

    #[test]
    fn test_specialized_matches_generic() {
        let class = mixed_class();
        let layout = StructureLayout::root(&class, Arc::new(StructureEnv::default()));
        let compiled = SlotTableSpecializer.specialize(&layout).unwrap().unwrap();
        assert_eq!(compiled.direct_count(), 2);

        let record = OpaqueRecord::new(&class);
        let generic = StructureModifier::new(Arc::clone(&layout))
            .with_target(&record)
            .unwrap();
        generic.write(0, Value::Int(3)).unwrap();
        generic.write(1, Value::from("x")).unwrap();
        generic.write(2, Value::Long(9)).unwrap();

        for index in 0..layout.len() {
            assert_eq!(compiled.read(index, &record).unwrap(), generic.read(index).unwrap());
        }
        assert!(compiled.write(0, &record, Value::from("bad")).is_err());
    }

    #[test]
    fn test_skips_when_nothing_accessible() {
        let class = ClassBuilder::new("Hidden")
            .field("a", &INT, Modifiers::PRIVATE)
            .build();
        let layout = StructureLayout::root(&class, Arc::new(StructureEnv::default()));
        assert!(SlotTableSpecializer.specialize(&layout).unwrap().is_none());
    }
}
