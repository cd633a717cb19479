//! 等价转换器
//!
//! 在记录的原生表示（[`Value`]）与更友好的包装类型之间双向转换。

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{PacketError, Result};
use crate::reflect::{RecordRef, Value};

/// 双向转换器
pub trait EquivalentConverter<T>: Send + Sync {
    /// 包装类型 -> 原生值
    fn to_generic(&self, specific: T) -> Result<Value>;
    /// 原生值 -> 包装类型
    fn to_specific(&self, generic: Value) -> Result<T>;
    /// 诊断用的包装类型名称
    fn specific_type(&self) -> &str;
}

pub type SharedConverter<T> = Arc<dyn EquivalentConverter<T>>;

/// 恒等转换
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueConverter;

impl EquivalentConverter<Value> for ValueConverter {
    fn to_generic(&self, specific: Value) -> Result<Value> {
        Ok(specific)
    }

    fn to_specific(&self, generic: Value) -> Result<Value> {
        Ok(generic)
    }

    fn specific_type(&self) -> &str {
        "Value"
    }
}

/// 可直接与 [`Value`] 互转的 Rust 类型
pub trait NativeValue: Sized + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn from_value(value: Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

macro_rules! native_value {
    ($($ty:ty => $variant:ident, $name:literal);* $(;)?) => {
        $(
            impl NativeValue for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

native_value! {
    bool => Bool, "bool";
    i8 => Byte, "i8";
    i16 => Short, "i16";
    i32 => Int, "i32";
    i64 => Long, "i64";
    f32 => Float, "f32";
    f64 => Double, "f64";
    char => Char, "char";
    String => Str, "String";
    Bytes => Bytes, "Bytes";
    Vec<Value> => List, "Vec<Value>";
    RecordRef => Record, "RecordRef";
}

/// 空引用映射为 None
impl<T: NativeValue> NativeValue for Option<T> {
    const TYPE_NAME: &'static str = "Option";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn into_value(self) -> Value {
        self.map(T::into_value).unwrap_or(Value::Null)
    }
}

/// 基于 [`NativeValue`] 的转换器
pub struct NativeConverter<T>(PhantomData<fn() -> T>);

impl<T> Default for NativeConverter<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: NativeValue> EquivalentConverter<T> for NativeConverter<T> {
    fn to_generic(&self, specific: T) -> Result<Value> {
        Ok(specific.into_value())
    }

    fn to_specific(&self, generic: Value) -> Result<T> {
        let found = generic.type_name();
        T::from_value(generic).ok_or_else(|| {
            PacketError::type_mismatch("converter", T::TYPE_NAME, found)
        })
    }

    fn specific_type(&self) -> &str {
        T::TYPE_NAME
    }
}

pub fn native<T: NativeValue>() -> SharedConverter<T> {
    Arc::new(NativeConverter::<T>::default())
}

type ToGeneric<T> = Box<dyn Fn(T) -> anyhow::Result<Value> + Send + Sync>;
type ToSpecific<T> = Box<dyn Fn(Value) -> anyhow::Result<T> + Send + Sync>;

/// 由一对闭包构成的转换器
pub struct FnConverter<T> {
    name: String,
    to_generic: ToGeneric<T>,
    to_specific: ToSpecific<T>,
}

impl<T> EquivalentConverter<T> for FnConverter<T> {
    fn to_generic(&self, specific: T) -> Result<Value> {
        (self.to_generic)(specific).map_err(|source| PacketError::Invocation {
            member: format!("converter {}", self.name),
            source,
        })
    }

    fn to_specific(&self, generic: Value) -> Result<T> {
        (self.to_specific)(generic).map_err(|source| PacketError::Invocation {
            member: format!("converter {}", self.name),
            source,
        })
    }

    fn specific_type(&self) -> &str {
        &self.name
    }
}

/// 由闭包构造转换器
pub fn converter<T, G, S>(name: impl Into<String>, to_generic: G, to_specific: S) -> SharedConverter<T>
where
    T: 'static,
    G: Fn(T) -> anyhow::Result<Value> + Send + Sync + 'static,
    S: Fn(Value) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Arc::new(FnConverter {
        name: name.into(),
        to_generic: Box::new(to_generic),
        to_specific: Box::new(to_specific),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: i64,
    }

    #[test]
    fn test_native_conversion() {
        let ints = native::<i32>();
        assert_eq!(ints.to_specific(Value::Int(3)).unwrap(), 3);
        assert!(ints.to_specific(Value::from("3")).is_err());

        let names = native::<Option<String>>();
        assert_eq!(names.to_specific(Value::Null).unwrap(), None);
        assert_eq!(names.to_generic(Some("a".into())).unwrap(), Value::from("a"));
    }

    #[test]
    fn test_closure_converter() {
        let packed = converter(
            "Position",
            |p: Position| Ok(Value::Long(p.x)),
            |v| match v {
                Value::Long(x) => Ok(Position { x }),
                other => anyhow::bail!("not a packed position: {}", other.type_name()),
            },
        );
        let generic = packed.to_generic(Position { x: 9 }).unwrap();
        assert_eq!(packed.to_specific(generic).unwrap(), Position { x: 9 });
        assert!(matches!(
            packed.to_specific(Value::Int(1)),
            Err(PacketError::Invocation { .. })
        ));
    }
}
