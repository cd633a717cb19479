//! 默认实例
//!
//! 核心只通过外部提供的工厂构造宿主对象。[`DefaultInstances`] 依次尝试：
//! 注册的工厂、宿主无参构造器、参数最少且参数可默认构造的构造器，最后（若允许）
//! 分配字段全为零值的空白记录。

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::types::{ClassRef, builtin};
use super::value::{OpaqueRecord, RecordRef, Value};
use crate::error::{PacketError, Result};

/// 构造器参数递归默认化的最大深度
const MAX_CONSTRUCTION_DEPTH: usize = 8;

/// 宿主实例工厂
pub trait InstanceFactory: Send + Sync {
    /// 无法构造时返回 `Ok(None)`，交给下一个工厂
    fn create(&self, class: &ClassRef) -> anyhow::Result<Option<RecordRef>>;
}

/// 调用宿主的无参构造器
pub struct ConstructorFactory;

impl InstanceFactory for ConstructorFactory {
    fn create(&self, class: &ClassRef) -> anyhow::Result<Option<RecordRef>> {
        let Some(ctor) = class
            .declared_constructors()
            .iter()
            .find(|ctor| ctor.parameters().is_empty())
        else {
            return Ok(None);
        };
        match ctor.new_instance(&[]) {
            Ok(record) => Ok(Some(record)),
            // 未提供调用入口的构造器视为不可用
            Err(PacketError::AccessDenied { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// 分配零值空白记录
pub struct BlankRecordFactory;

impl InstanceFactory for BlankRecordFactory {
    fn create(&self, class: &ClassRef) -> anyhow::Result<Option<RecordRef>> {
        if class.is_primitive() || class.is_interface() {
            return Ok(None);
        }
        Ok(Some(OpaqueRecord::new(class)))
    }
}

/// 默认值提供者
#[derive(Clone)]
pub struct DefaultInstances {
    factories: Vec<Arc<dyn InstanceFactory>>,
    blank_fallback: bool,
}

impl Default for DefaultInstances {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultInstances {
    pub fn new() -> Self {
        Self {
            factories: vec![Arc::new(ConstructorFactory)],
            blank_fallback: true,
        }
    }

    /// 在现有工厂之前插入一个工厂
    pub fn with_factory(mut self, factory: Arc<dyn InstanceFactory>) -> Self {
        self.factories.insert(0, factory);
        self
    }

    /// 关闭空白记录兜底
    pub fn without_blank_fallback(mut self) -> Self {
        self.blank_fallback = false;
        self
    }

    /// 字段类型的默认值；无法构造时返回 None
    pub fn default_value(&self, ty: &ClassRef) -> Option<Value> {
        self.default_value_at(ty, 0)
    }

    fn default_value_at(&self, ty: &ClassRef, depth: usize) -> Option<Value> {
        if ty.is_primitive() {
            return Value::zero_for(ty);
        }
        if ty.id() == builtin::STRING.id() {
            return Some(Value::Str(String::new()));
        }
        if ty.id() == builtin::BYTES.id() {
            return Some(Value::Bytes(Bytes::new()));
        }
        if ty.id() == builtin::OBJECT.id() {
            return None;
        }
        if ty.is_assignable_from(&builtin::ARRAY_LIST) {
            return Some(Value::List(Vec::new()));
        }
        self.create_at(ty, depth).ok().map(Value::Record)
    }

    /// 构造一个新实例
    pub fn create(&self, class: &ClassRef) -> Result<RecordRef> {
        self.create_at(class, 0)
    }

    fn create_at(&self, class: &ClassRef, depth: usize) -> Result<RecordRef> {
        for factory in &self.factories {
            match factory.create(class) {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => {}
                Err(err) => {
                    debug!(class = %class.name(), error = %err, "Instance factory failed");
                }
            }
        }

        if depth < MAX_CONSTRUCTION_DEPTH {
            if let Some(record) = self.construct_with_defaults(class, depth) {
                return Ok(record);
            }
        }

        if self.blank_fallback {
            if let Ok(Some(record)) = BlankRecordFactory.create(class) {
                return Ok(record);
            }
        }
        Err(PacketError::Instantiation(class.name().to_string()))
    }

    /// 选参数最少的构造器，逐个参数取默认值后调用
    fn construct_with_defaults(&self, class: &ClassRef, depth: usize) -> Option<RecordRef> {
        let mut constructors: Vec<_> = class
            .declared_constructors()
            .iter()
            .filter(|ctor| !ctor.parameters().is_empty())
            .collect();
        constructors.sort_by_key(|ctor| ctor.parameters().len());

        for ctor in constructors {
            let args: Option<Vec<Value>> = ctor
                .parameters()
                .iter()
                .map(|param| self.argument_for(param, depth + 1))
                .collect();
            let Some(args) = args else { continue };
            if let Ok(record) = ctor.new_instance(&args) {
                return Some(record);
            }
        }
        None
    }

    fn argument_for(&self, param: &ClassRef, depth: usize) -> Option<Value> {
        if param.id() == builtin::OBJECT.id() {
            return Some(Value::Null);
        }
        self.default_value_at(param, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{ClassBuilder, ConstructorSpec, Modifiers, builtin::*};
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let defaults = DefaultInstances::new();
        assert_eq!(defaults.default_value(&INT), Some(Value::Int(0)));
        assert_eq!(defaults.default_value(&STRING), Some(Value::Str(String::new())));
        assert_eq!(defaults.default_value(&LIST), Some(Value::List(Vec::new())));
        assert_eq!(defaults.default_value(&OBJECT), None);
    }

    #[test]
    fn test_constructor_with_default_arguments() {
        // 宿主构造出的实例类型由调用入口决定
        let layout = ClassBuilder::new("ChunkData")
            .field("x", &INT, Modifiers::PRIVATE)
            .build();
        let produced = Arc::clone(&layout);
        let chunk = ClassBuilder::new("Chunk")
            .constructor(ConstructorSpec::new(&[&*INT, &*STRING]).invoker(move |args| {
                assert_eq!(args, &[Value::Int(0), Value::Str(String::new())]);
                Ok(OpaqueRecord::new(&produced))
            }))
            .build();

        let record = DefaultInstances::new()
            .without_blank_fallback()
            .create(&chunk)
            .unwrap();
        assert_eq!(record.class().id(), layout.id());
    }

    #[test]
    fn test_blank_fallback_and_failure() {
        let empty = ClassBuilder::new("Empty").build();
        assert!(DefaultInstances::new().create(&empty).is_ok());
        assert!(matches!(
            DefaultInstances::new().without_blank_fallback().create(&empty),
            Err(PacketError::Instantiation(_))
        ));
    }
}
