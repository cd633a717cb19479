//! 宿主对象模型：类型描述符与成员元数据
//!
//! 宿主通过 [`ClassBuilder`] 声明其记录类型的布局（字段、方法、构造器）。
//! 描述符一经构建不可变；同一宿主版本快照内，类型以 [`ClassId`] 作为身份。

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;

use super::value::{RecordRef, Value};
use crate::error::{PacketError, Result};

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// 类型身份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

impl ClassId {
    fn next() -> Self {
        Self(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// 成员修饰符（位标志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(u16);

impl Modifiers {
    pub const NONE: Self = Self(0x0000);
    pub const PUBLIC: Self = Self(0x0001);
    pub const PRIVATE: Self = Self(0x0002);
    pub const PROTECTED: Self = Self(0x0004);
    pub const STATIC: Self = Self(0x0008);
    pub const FINAL: Self = Self(0x0010);
    pub const SYNCHRONIZED: Self = Self(0x0020);
    pub const VOLATILE: Self = Self(0x0040);
    pub const TRANSIENT: Self = Self(0x0080);
    pub const INTERFACE: Self = Self(0x0200);
    pub const ABSTRACT: Self = Self(0x0400);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// 基本类型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Void,
}

/// 类型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Reference,
}

pub type ClassRef = Arc<ClassInfo>;
pub type FieldRef = Arc<FieldInfo>;
pub type MethodRef = Arc<MethodInfo>;
pub type ConstructorRef = Arc<ConstructorInfo>;

/// 宿主方法调用入口（目标实例，参数）
pub type MethodInvoker =
    Arc<dyn Fn(Option<&RecordRef>, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// 宿主构造器调用入口
pub type ConstructorInvoker = Arc<dyn Fn(&[Value]) -> anyhow::Result<RecordRef> + Send + Sync>;

/// 字段、方法、构造器的公共视图
pub trait Member {
    fn name(&self) -> &str;
    fn modifiers(&self) -> Modifiers;
    fn declaring_class(&self) -> Option<ClassRef>;
    fn declaring_name(&self) -> &str;

    /// 诊断用的成员身份，如 `Player.health`
    fn identity(&self) -> String {
        format!("{}.{}", self.declaring_name(), self.name())
    }
}

/// 类型描述符
pub struct ClassInfo {
    id: ClassId,
    name: String,
    kind: TypeKind,
    modifiers: Modifiers,
    superclass: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    fields: Vec<FieldRef>,
    methods: Vec<MethodRef>,
    constructors: Vec<ConstructorRef>,
    slot_count: usize,
}

impl ClassInfo {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit(['.', '$']).next().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive(_))
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self.kind {
            TypeKind::Primitive(kind) => Some(kind),
            TypeKind::Reference => None,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers.contains(Modifiers::INTERFACE)
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn superclass(&self) -> Option<&ClassRef> {
        self.superclass.as_ref()
    }

    pub fn interfaces(&self) -> &[ClassRef] {
        &self.interfaces
    }

    pub fn declared_fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn declared_methods(&self) -> &[MethodRef] {
        &self.methods
    }

    pub fn declared_constructors(&self) -> &[ConstructorRef] {
        &self.constructors
    }

    /// 实例槽位总数（含父类）
    pub fn instance_slot_count(&self) -> usize {
        self.slot_count
    }

    /// 父类链长度，根类型为 0
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.superclass.as_ref();
        while let Some(parent) = current {
            depth += 1;
            current = parent.superclass.as_ref();
        }
        depth
    }

    /// 自身及所有父类，子类在前
    pub fn hierarchy(&self) -> Vec<&ClassInfo> {
        let mut chain = vec![self];
        let mut current = self.superclass.as_deref();
        while let Some(parent) = current {
            chain.push(parent);
            current = parent.superclass.as_deref();
        }
        chain
    }

    /// `other` 的实例能否赋值给本类型
    pub fn is_assignable_from(&self, other: &ClassInfo) -> bool {
        if self.id == other.id {
            return true;
        }
        if self.is_primitive() || other.is_primitive() {
            return false;
        }
        if self.id == OBJECT.id {
            return true;
        }
        if let Some(parent) = other.superclass.as_deref() {
            if self.is_assignable_from(parent) {
                return true;
            }
        }
        other
            .interfaces
            .iter()
            .any(|iface| self.is_assignable_from(iface))
    }

    /// 按名称在继承链上查找实例或静态字段
    pub fn find_field(&self, name: &str) -> Option<FieldRef> {
        self.hierarchy()
            .into_iter()
            .flat_map(|class| class.fields.iter())
            .find(|field| field.name == name)
            .cloned()
    }

    /// 继承链上的全部实例字段，子类在前、各类内部按声明顺序
    pub fn instance_fields(&self) -> Vec<FieldRef> {
        self.hierarchy()
            .into_iter()
            .flat_map(|class| class.fields.iter())
            .filter(|field| field.slot.is_some())
            .cloned()
            .collect()
    }

    /// 解析字段在本类型实例中的槽位
    pub(crate) fn resolve_slot(&self, field: &FieldInfo) -> Option<usize> {
        let slot = field.slot?;
        self.hierarchy()
            .into_iter()
            .find(|class| class.id == field.declaring_id)
            .and_then(|class| class.fields.iter().find(|f| f.name == field.name))
            .and_then(|found| found.slot)
            .filter(|resolved| *resolved == slot)
    }
}

impl PartialEq for ClassInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClassInfo {}

impl Hash for ClassInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("id", &self.id.0)
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl fmt::Display for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 字段元数据
pub struct FieldInfo {
    name: String,
    field_type: ClassRef,
    modifiers: Modifiers,
    declaring: Weak<ClassInfo>,
    declaring_id: ClassId,
    declaring_name: String,
    slot: Option<usize>,
}

impl FieldInfo {
    pub fn field_type(&self) -> &ClassRef {
        &self.field_type
    }

    /// 实例槽位；静态字段为 None
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains(Modifiers::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.modifiers.contains(Modifiers::FINAL)
    }

    pub fn declaring_id(&self) -> ClassId {
        self.declaring_id
    }

    /// 无需越权即可访问
    pub fn is_accessible(&self) -> bool {
        self.modifiers.contains(Modifiers::PUBLIC)
            && self
                .declaring
                .upgrade()
                .map(|class| class.modifiers.contains(Modifiers::PUBLIC))
                .unwrap_or(false)
    }
}

impl Member for FieldInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    fn declaring_class(&self) -> Option<ClassRef> {
        self.declaring.upgrade()
    }

    fn declaring_name(&self) -> &str {
        &self.declaring_name
    }
}

impl fmt::Debug for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}",
            self.field_type.name, self.declaring_name, self.name
        )
    }
}

/// 方法元数据
pub struct MethodInfo {
    name: String,
    return_type: ClassRef,
    parameters: Vec<ClassRef>,
    exceptions: Vec<ClassRef>,
    modifiers: Modifiers,
    declaring: Weak<ClassInfo>,
    declaring_name: String,
    invoker: Option<MethodInvoker>,
}

impl MethodInfo {
    pub fn return_type(&self) -> &ClassRef {
        &self.return_type
    }

    pub fn parameters(&self) -> &[ClassRef] {
        &self.parameters
    }

    pub fn exceptions(&self) -> &[ClassRef] {
        &self.exceptions
    }

    pub fn invoke(&self, target: Option<&RecordRef>, args: &[Value]) -> Result<Value> {
        let invoker = self.invoker.as_ref().ok_or_else(|| {
            PacketError::access_denied(self.identity(), "host supplied no invoker")
        })?;
        invoker(target, args).map_err(|source| PacketError::Invocation {
            member: self.identity(),
            source,
        })
    }
}

impl Member for MethodInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    fn declaring_class(&self) -> Option<ClassRef> {
        self.declaring.upgrade()
    }

    fn declaring_name(&self) -> &str {
        &self.declaring_name
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.parameters.iter().map(|p| p.name()).collect();
        write!(
            f,
            "{} {}.{}({})",
            self.return_type.name,
            self.declaring_name,
            self.name,
            params.join(", ")
        )
    }
}

/// 构造器元数据
pub struct ConstructorInfo {
    parameters: Vec<ClassRef>,
    exceptions: Vec<ClassRef>,
    modifiers: Modifiers,
    declaring: Weak<ClassInfo>,
    declaring_name: String,
    invoker: Option<ConstructorInvoker>,
}

impl ConstructorInfo {
    pub fn parameters(&self) -> &[ClassRef] {
        &self.parameters
    }

    pub fn exceptions(&self) -> &[ClassRef] {
        &self.exceptions
    }

    pub fn new_instance(&self, args: &[Value]) -> Result<RecordRef> {
        let invoker = self.invoker.as_ref().ok_or_else(|| {
            PacketError::access_denied(self.identity(), "host supplied no constructor")
        })?;
        invoker(args).map_err(|source| PacketError::Invocation {
            member: self.identity(),
            source,
        })
    }
}

impl Member for ConstructorInfo {
    fn name(&self) -> &str {
        "<init>"
    }

    fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    fn declaring_class(&self) -> Option<ClassRef> {
        self.declaring.upgrade()
    }

    fn declaring_name(&self) -> &str {
        &self.declaring_name
    }
}

impl fmt::Debug for ConstructorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.parameters.iter().map(|p| p.name()).collect();
        write!(f, "{}({})", self.declaring_name, params.join(", "))
    }
}

/// 方法声明
pub struct MethodSpec {
    name: String,
    return_type: ClassRef,
    parameters: Vec<ClassRef>,
    exceptions: Vec<ClassRef>,
    modifiers: Modifiers,
    invoker: Option<MethodInvoker>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, return_type: &ClassRef) -> Self {
        Self {
            name: name.into(),
            return_type: Arc::clone(return_type),
            parameters: Vec::new(),
            exceptions: Vec::new(),
            modifiers: Modifiers::PUBLIC,
            invoker: None,
        }
    }

    pub fn params(mut self, params: &[&ClassRef]) -> Self {
        self.parameters = params.iter().map(|p| Arc::clone(p)).collect();
        self
    }

    pub fn throws(mut self, exception: &ClassRef) -> Self {
        self.exceptions.push(Arc::clone(exception));
        self
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn invoker<F>(mut self, invoker: F) -> Self
    where
        F: Fn(Option<&RecordRef>, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.invoker = Some(Arc::new(invoker));
        self
    }
}

/// 构造器声明
pub struct ConstructorSpec {
    parameters: Vec<ClassRef>,
    exceptions: Vec<ClassRef>,
    modifiers: Modifiers,
    invoker: Option<ConstructorInvoker>,
}

impl ConstructorSpec {
    pub fn new(params: &[&ClassRef]) -> Self {
        Self {
            parameters: params.iter().map(|p| Arc::clone(p)).collect(),
            exceptions: Vec::new(),
            modifiers: Modifiers::PUBLIC,
            invoker: None,
        }
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn throws(mut self, exception: &ClassRef) -> Self {
        self.exceptions.push(Arc::clone(exception));
        self
    }

    pub fn invoker<F>(mut self, invoker: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<RecordRef> + Send + Sync + 'static,
    {
        self.invoker = Some(Arc::new(invoker));
        self
    }
}

struct FieldSpec {
    name: String,
    field_type: ClassRef,
    modifiers: Modifiers,
}

/// 类型描述符构建器
pub struct ClassBuilder {
    name: String,
    kind: TypeKind,
    modifiers: Modifiers,
    superclass: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    constructors: Vec<ConstructorSpec>,
}

impl ClassBuilder {
    /// 普通引用类型，默认继承根类型
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Reference,
            modifiers: Modifiers::PUBLIC,
            superclass: Some(Arc::clone(&OBJECT)),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self {
            modifiers: Modifiers::PUBLIC | Modifiers::INTERFACE | Modifiers::ABSTRACT,
            superclass: None,
            ..Self::new(name)
        }
    }

    fn root(name: &str) -> Self {
        Self {
            superclass: None,
            ..Self::bare(name, TypeKind::Reference)
        }
    }

    fn primitive(name: &str, kind: PrimitiveKind) -> Self {
        Self::bare(name, TypeKind::Primitive(kind))
    }

    fn bare(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            modifiers: Modifiers::PUBLIC | Modifiers::FINAL,
            superclass: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
        }
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn extends(mut self, superclass: &ClassRef) -> Self {
        self.superclass = Some(Arc::clone(superclass));
        self
    }

    pub fn implements(mut self, interface: &ClassRef) -> Self {
        self.interfaces.push(Arc::clone(interface));
        self
    }

    pub fn field(mut self, name: impl Into<String>, field_type: &ClassRef, modifiers: Modifiers) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type: Arc::clone(field_type),
            modifiers,
        });
        self
    }

    pub fn method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    pub fn constructor(mut self, spec: ConstructorSpec) -> Self {
        self.constructors.push(spec);
        self
    }

    pub fn build(self) -> ClassRef {
        let id = ClassId::next();
        let name = self.name;
        let mut next_slot = self
            .superclass
            .as_ref()
            .map(|parent| parent.slot_count)
            .unwrap_or(0);

        Arc::new_cyclic(|declaring: &Weak<ClassInfo>| {
            let fields = self
                .fields
                .into_iter()
                .map(|spec| {
                    let slot = if spec.modifiers.contains(Modifiers::STATIC) {
                        None
                    } else {
                        next_slot += 1;
                        Some(next_slot - 1)
                    };
                    Arc::new(FieldInfo {
                        name: spec.name,
                        field_type: spec.field_type,
                        modifiers: spec.modifiers,
                        declaring: declaring.clone(),
                        declaring_id: id,
                        declaring_name: name.clone(),
                        slot,
                    })
                })
                .collect();

            let methods = self
                .methods
                .into_iter()
                .map(|spec| {
                    Arc::new(MethodInfo {
                        name: spec.name,
                        return_type: spec.return_type,
                        parameters: spec.parameters,
                        exceptions: spec.exceptions,
                        modifiers: spec.modifiers,
                        declaring: declaring.clone(),
                        declaring_name: name.clone(),
                        invoker: spec.invoker,
                    })
                })
                .collect();

            let constructors = self
                .constructors
                .into_iter()
                .map(|spec| {
                    Arc::new(ConstructorInfo {
                        parameters: spec.parameters,
                        exceptions: spec.exceptions,
                        modifiers: spec.modifiers,
                        declaring: declaring.clone(),
                        declaring_name: name.clone(),
                        invoker: spec.invoker,
                    })
                })
                .collect();

            ClassInfo {
                id,
                name: name.clone(),
                kind: self.kind,
                modifiers: self.modifiers,
                superclass: self.superclass,
                interfaces: self.interfaces,
                fields,
                methods,
                constructors,
                slot_count: next_slot,
            }
        })
    }
}

/// 内置类型描述符
pub mod builtin {
    use super::*;

    pub static OBJECT: Lazy<ClassRef> = Lazy::new(|| {
        ClassBuilder::root("Object")
            .modifiers(Modifiers::PUBLIC)
            .build()
    });
    pub static VOID: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("void", PrimitiveKind::Void).build());
    pub static BOOLEAN: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("boolean", PrimitiveKind::Boolean).build());
    pub static BYTE: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("byte", PrimitiveKind::Byte).build());
    pub static SHORT: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("short", PrimitiveKind::Short).build());
    pub static INT: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("int", PrimitiveKind::Int).build());
    pub static LONG: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("long", PrimitiveKind::Long).build());
    pub static FLOAT: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("float", PrimitiveKind::Float).build());
    pub static DOUBLE: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("double", PrimitiveKind::Double).build());
    pub static CHAR: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::primitive("char", PrimitiveKind::Char).build());
    pub static STRING: Lazy<ClassRef> = Lazy::new(|| {
        ClassBuilder::new("String")
            .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
            .build()
    });
    pub static BYTES: Lazy<ClassRef> = Lazy::new(|| {
        ClassBuilder::new("byte[]")
            .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
            .build()
    });
    pub static LIST: Lazy<ClassRef> = Lazy::new(|| ClassBuilder::interface("List").build());
    pub static ARRAY_LIST: Lazy<ClassRef> =
        Lazy::new(|| ClassBuilder::new("ArrayList").implements(&LIST).build());
}

pub use builtin::OBJECT;

#[cfg(test)]
mod tests {
    use super::builtin::*;
    use super::*;

    fn entity() -> (ClassRef, ClassRef) {
        let base = ClassBuilder::new("Entity")
            .field("id", &INT, Modifiers::PRIVATE)
            .field("COUNTER", &INT, Modifiers::PRIVATE | Modifiers::STATIC)
            .field("name", &STRING, Modifiers::PUBLIC)
            .build();
        let living = ClassBuilder::new("LivingEntity")
            .extends(&base)
            .field("health", &FLOAT, Modifiers::PRIVATE)
            .build();
        (base, living)
    }

    #[test]
    fn test_slot_layout_puts_superclass_first() {
        let (base, living) = entity();
        assert_eq!(base.instance_slot_count(), 2);
        assert_eq!(living.instance_slot_count(), 3);

        let health = living.find_field("health").unwrap();
        assert_eq!(health.slot(), Some(2));
        assert!(base.find_field("COUNTER").unwrap().slot().is_none());

        // 子类字段在前，父类字段在后
        let names: Vec<String> = living
            .instance_fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["health", "id", "name"]);
    }

    #[test]
    fn test_assignability_and_depth() {
        let (base, living) = entity();
        assert!(base.is_assignable_from(&living));
        assert!(!living.is_assignable_from(&base));
        assert!(OBJECT.is_assignable_from(&living));
        assert!(!OBJECT.is_assignable_from(&INT));
        assert!(LIST.is_assignable_from(&ARRAY_LIST));
        assert_eq!(OBJECT.depth(), 0);
        assert_eq!(base.depth(), 1);
        assert_eq!(living.depth(), 2);
    }

    #[test]
    fn test_member_declaring_class() {
        let (base, living) = entity();
        let id = living.find_field("id").unwrap();
        assert_eq!(id.declaring_class().unwrap().id(), base.id());
        assert_eq!(id.identity(), "Entity.id");
        assert_eq!(living.resolve_slot(&id), Some(0));
        assert!(!id.is_accessible());
        assert!(base.find_field("name").unwrap().is_accessible());
    }
}
