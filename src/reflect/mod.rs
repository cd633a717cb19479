//! # 成员发现模块
//!
//! - `types`：宿主类型描述符（字段、方法、构造器）
//! - `value`：动态值与不透明记录
//! - `matcher` / `contract`：带轮次的成员匹配器与契约
//! - `fuzzy`：按契约解析成员
//! - `instances`：默认实例与宿主实例工厂

pub mod contract;
pub mod fuzzy;
pub mod instances;
pub mod matcher;
pub mod types;
pub mod value;

pub use contract::{
    ClassContract, ClassContractBuilder, FieldContract, FieldContractBuilder, MethodContract,
    MethodContractBuilder, process_contracts,
};
pub use fuzzy::FuzzyReflection;
pub use instances::{BlankRecordFactory, ConstructorFactory, DefaultInstances, InstanceFactory};
pub use matcher::{ClassMatcher, Matcher, SharedMatcher, combine_rounds};
pub use types::{
    ClassBuilder, ClassId, ClassInfo, ClassRef, ConstructorInfo, ConstructorRef, ConstructorSpec,
    FieldInfo, FieldRef, Member, MethodInfo, MethodRef, MethodSpec, Modifiers, PrimitiveKind,
    TypeKind, builtin,
};
pub use value::{OpaqueRecord, RecordRef, Value};
