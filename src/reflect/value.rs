//! 动态值与不透明记录实例

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use super::types::{ClassInfo, ClassRef, PrimitiveKind, TypeKind, builtin};
use crate::error::{PacketError, Result};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

pub type RecordRef = Arc<OpaqueRecord>;

/// 宿主记录字段中可出现的值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Record(RecordRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Byte(_) => "byte".to_string(),
            Value::Short(_) => "short".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::Char(_) => "char".to_string(),
            Value::Str(_) => "String".to_string(),
            Value::Bytes(_) => "byte[]".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Record(record) => record.class().name().to_string(),
        }
    }

    /// 值能否存入声明类型为 `ty` 的字段
    pub fn conforms_to(&self, ty: &ClassInfo) -> bool {
        match (self, ty.kind()) {
            (Value::Null, TypeKind::Reference) => true,
            (Value::Null, TypeKind::Primitive(_)) => false,
            (Value::Bool(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Boolean,
            (Value::Byte(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Byte,
            (Value::Short(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Short,
            (Value::Int(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Int,
            (Value::Long(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Long,
            (Value::Float(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Float,
            (Value::Double(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Double,
            (Value::Char(_), TypeKind::Primitive(kind)) => kind == PrimitiveKind::Char,
            (Value::Str(_), TypeKind::Reference) => ty.is_assignable_from(&builtin::STRING),
            (Value::Bytes(_), TypeKind::Reference) => ty.is_assignable_from(&builtin::BYTES),
            (Value::List(_), TypeKind::Reference) => ty.is_assignable_from(&builtin::ARRAY_LIST),
            (Value::Record(record), TypeKind::Reference) => ty.is_assignable_from(record.class()),
            _ => false,
        }
    }

    /// 基本类型的零值
    pub fn zero_for(ty: &ClassInfo) -> Option<Value> {
        let value = match ty.primitive_kind()? {
            PrimitiveKind::Boolean => Value::Bool(false),
            PrimitiveKind::Byte => Value::Byte(0),
            PrimitiveKind::Short => Value::Short(0),
            PrimitiveKind::Int => Value::Int(0),
            PrimitiveKind::Long => Value::Long(0),
            PrimitiveKind::Float => Value::Float(0.0),
            PrimitiveKind::Double => Value::Double(0.0),
            PrimitiveKind::Char => Value::Char('\0'),
            PrimitiveKind::Void => return None,
        };
        Some(value)
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    fn deep_copy(&self, visited: &mut HashMap<u64, RecordRef>) -> Value {
        match self {
            Value::Record(record) => Value::Record(record.deep_copy_with(visited)),
            Value::List(items) => Value::List(items.iter().map(|v| v.deep_copy(visited)).collect()),
            other => other.clone(),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    String => Str,
    Bytes => Bytes,
    Vec<Value> => List,
    RecordRef => Record,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

/// 字段布局由宿主控制的记录实例
pub struct OpaqueRecord {
    id: u64,
    class: ClassRef,
    slots: RwLock<Vec<Value>>,
}

impl OpaqueRecord {
    /// 分配一个字段均为零值/空值的实例
    pub fn new(class: &ClassRef) -> RecordRef {
        let mut slots = vec![Value::Null; class.instance_slot_count()];
        for field in class.instance_fields() {
            if let (Some(slot), Some(zero)) = (field.slot(), Value::zero_for(field.field_type())) {
                slots[slot] = zero;
            }
        }
        Self::with_slots(class, slots)
    }

    fn with_slots(class: &ClassRef, slots: Vec<Value>) -> RecordRef {
        Arc::new(Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            class: Arc::clone(class),
            slots: RwLock::new(slots),
        })
    }

    /// 进程内唯一的实例身份
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// 宿主侧按名称读取字段
    pub fn get(&self, name: &str) -> Option<Value> {
        let slot = self.class.find_field(name)?.slot()?;
        self.load_slot(slot)
    }

    /// 宿主侧按名称写入字段
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self
            .class
            .find_field(name)
            .ok_or_else(|| PacketError::MatchNotFound(format!("field {name} in {}", self.class)))?;
        let slot = field
            .slot()
            .ok_or_else(|| PacketError::InvalidArgument(format!("{name} is static")))?;
        let value = value.into();
        if !value.conforms_to(field.field_type()) {
            return Err(PacketError::type_mismatch(
                format!("{}.{name}", self.class.name()),
                field.field_type().name(),
                value.type_name(),
            ));
        }
        self.store_slot(slot, value);
        Ok(())
    }

    pub(crate) fn load_slot(&self, slot: usize) -> Option<Value> {
        self.slots.read().get(slot).cloned()
    }

    pub(crate) fn store_slot(&self, slot: usize, value: Value) -> bool {
        match self.slots.write().get_mut(slot) {
            Some(target) => {
                *target = value;
                true
            }
            None => false,
        }
    }

    /// 复制字段值到新实例，嵌套记录共享
    pub fn shallow_copy(&self) -> RecordRef {
        Self::with_slots(&self.class, self.slots.read().clone())
    }

    /// 递归复制嵌套记录与列表，保留引用环
    pub fn deep_copy(&self) -> RecordRef {
        let mut visited = HashMap::new();
        self.deep_copy_with(&mut visited)
    }

    fn deep_copy_with(&self, visited: &mut HashMap<u64, RecordRef>) -> RecordRef {
        if let Some(copy) = visited.get(&self.id) {
            return Arc::clone(copy);
        }
        let copy = Self::with_slots(&self.class, vec![Value::Null; self.class.instance_slot_count()]);
        visited.insert(self.id, Arc::clone(&copy));

        let source = self.slots.read().clone();
        for (slot, value) in source.iter().enumerate() {
            copy.store_slot(slot, value.deep_copy(visited));
        }
        copy
    }
}

impl PartialEq for OpaqueRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for OpaqueRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class.name(), self.id)
    }
}
