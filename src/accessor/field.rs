//! 反射式字段访问器
//!
//! 每次读写都经过访问策略检查，并在目标实例的类型上重新解析字段槽位。
//! 这是通用（慢速）路径，特化结构中不可直接发射的成员也委托到这里。

use std::fmt;
use std::sync::Arc;

use super::policy::{AccessKind, AccessPolicy};
use crate::error::{PacketError, Result};
use crate::reflect::{FieldRef, Member, OpaqueRecord, Value};

#[derive(Clone)]
pub struct FieldAccessor {
    field: FieldRef,
    policy: Arc<dyn AccessPolicy>,
}

impl FieldAccessor {
    pub fn new(field: FieldRef, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { field, policy }
    }

    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    fn check(&self, kind: AccessKind) -> Result<()> {
        if self.field.is_accessible() {
            return Ok(());
        }
        self.policy.check(&self.field, kind).map_err(|cause| {
            PacketError::access_denied_with(self.field.identity(), "blocked by host policy", cause)
        })
    }

    fn slot_in(&self, target: &OpaqueRecord) -> Result<usize> {
        target.class().resolve_slot(&self.field).ok_or_else(|| {
            PacketError::type_mismatch(
                self.field.identity(),
                self.field.declaring_name(),
                target.class().name(),
            )
        })
    }

    pub fn get(&self, target: &OpaqueRecord) -> Result<Value> {
        self.check(AccessKind::Read)?;
        let slot = self.slot_in(target)?;
        target
            .load_slot(slot)
            .ok_or_else(|| PacketError::access_denied(self.field.identity(), "slot not present"))
    }

    pub fn set(&self, target: &OpaqueRecord, value: Value) -> Result<()> {
        self.check(AccessKind::Write)?;
        if !value.conforms_to(self.field.field_type()) {
            return Err(PacketError::type_mismatch(
                self.field.identity(),
                self.field.field_type().name(),
                value.type_name(),
            ));
        }
        let slot = self.slot_in(target)?;
        if target.store_slot(slot, value) {
            Ok(())
        } else {
            Err(PacketError::access_denied(self.field.identity(), "slot not present"))
        }
    }
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldAccessor({:?})", self.field)
    }
}
