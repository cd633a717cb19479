//! 宿主访问策略

use crate::reflect::{FieldInfo, Member};

/// 访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// 决定非公开成员能否越权访问；拒绝时返回原因
pub trait AccessPolicy: Send + Sync {
    fn check(&self, field: &FieldInfo, kind: AccessKind) -> anyhow::Result<()>;
}

/// 允许所有访问
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissivePolicy;

impl AccessPolicy for PermissivePolicy {
    fn check(&self, _field: &FieldInfo, _kind: AccessKind) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 只允许访问公开成员
#[derive(Debug, Default, Clone, Copy)]
pub struct PublicOnlyPolicy;

impl AccessPolicy for PublicOnlyPolicy {
    fn check(&self, field: &FieldInfo, kind: AccessKind) -> anyhow::Result<()> {
        if field.is_accessible() {
            Ok(())
        } else {
            anyhow::bail!("{kind:?} of non-public member {} is not permitted", field.identity())
        }
    }
}
