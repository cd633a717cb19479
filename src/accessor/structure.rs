//! 结构视图
//!
//! [`StructureLayout`] 是某个记录类型（可选再按字段类型过滤）的成员表，按类型构建一次后缓存；
//! [`StructureModifier`] 是绑定到具体实例的轻量视图，按索引读写。
//!
//! 索引稳定性：同一类型的视图重复绑定到不同实例时，索引 i 始终指向同一成员；
//! 按字段类型派生的子视图总是从根布局过滤得到，保持根布局中的相对顺序。
//! 特化实现安装后，读写会切换到按槽位直接分发的快速路径，结果与通用路径一致。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use super::background::BackgroundCompiler;
use super::compiler::CompiledStructure;
use super::converter::{SharedConverter, ValueConverter};
use super::field::FieldAccessor;
use super::policy::{AccessPolicy, PermissivePolicy};
use crate::error::{PacketError, Result};
use crate::reflect::{ClassId, ClassRef, DefaultInstances, FieldRef, Member, RecordRef, Value};

/// 布局身份：(记录类型, 字段类型)
pub type LayoutKey = (ClassId, Option<ClassId>);

/// 布局共享的协作方
#[derive(Clone)]
pub struct StructureEnv {
    pub policy: Arc<dyn AccessPolicy>,
    pub defaults: Arc<DefaultInstances>,
    pub compiler: Option<Arc<BackgroundCompiler>>,
}

impl Default for StructureEnv {
    fn default() -> Self {
        Self {
            policy: Arc::new(PermissivePolicy),
            defaults: Arc::new(DefaultInstances::new()),
            compiler: None,
        }
    }
}

/// 写保护开关，与消息事件的只读标记共享
#[derive(Debug, Clone, Default)]
pub struct WriteGuard(Arc<AtomicBool>);

impl WriteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) {
        self.0.store(locked, Ordering::Release);
    }
}

/// 某记录类型的成员表
pub struct StructureLayout {
    key: LayoutKey,
    record_class: ClassRef,
    field_type: Option<ClassRef>,
    fields: Vec<FieldRef>,
    accessors: Vec<FieldAccessor>,
    /// 每个成员在根布局中的索引
    root_indices: Vec<usize>,
    subtypes: DashMap<ClassId, Arc<StructureLayout>>,
    compiled: OnceCell<Arc<CompiledStructure>>,
    compile_requested: AtomicBool,
    env: Arc<StructureEnv>,
}

impl StructureLayout {
    /// 枚举类型及父类的全部实例字段（子类在前）
    pub(crate) fn root(class: &ClassRef, env: Arc<StructureEnv>) -> Arc<Self> {
        let fields = class.instance_fields();
        let root_indices = (0..fields.len()).collect();
        Arc::new(Self::with_fields(class, None, fields, root_indices, env))
    }

    fn with_fields(
        class: &ClassRef,
        field_type: Option<&ClassRef>,
        fields: Vec<FieldRef>,
        root_indices: Vec<usize>,
        env: Arc<StructureEnv>,
    ) -> Self {
        let accessors = fields
            .iter()
            .map(|field| FieldAccessor::new(Arc::clone(field), Arc::clone(&env.policy)))
            .collect();
        Self {
            key: (class.id(), field_type.map(|ty| ty.id())),
            record_class: Arc::clone(class),
            field_type: field_type.cloned(),
            fields,
            accessors,
            root_indices,
            subtypes: DashMap::new(),
            compiled: OnceCell::new(),
            compile_requested: AtomicBool::new(false),
            env,
        }
    }

    /// 只包含类型兼容成员的子布局（在根布局上调用）
    pub(crate) fn subtype(&self, field_type: &ClassRef) -> Arc<StructureLayout> {
        let layout = self
            .subtypes
            .entry(field_type.id())
            .or_insert_with(|| {
                let (root_indices, fields): (Vec<usize>, Vec<FieldRef>) = self
                    .fields
                    .iter()
                    .enumerate()
                    .filter(|(_, field)| field_type.is_assignable_from(field.field_type()))
                    .map(|(i, field)| (self.root_indices[i], Arc::clone(field)))
                    .unzip();
                Arc::new(Self::with_fields(
                    &self.record_class,
                    Some(field_type),
                    fields,
                    root_indices,
                    Arc::clone(&self.env),
                ))
            })
            .clone();
        layout.request_compile();
        layout
    }

    /// 交给后台编译器特化，每个布局只请求一次
    pub(crate) fn request_compile(self: &Arc<Self>) {
        let Some(compiler) = &self.env.compiler else {
            return;
        };
        if self.compiled.get().is_some() || self.compile_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        compiler.schedule(Arc::clone(self), None);
    }

    /// 安装特化实现；已安装时保持原值
    pub(crate) fn install(&self, compiled: Arc<CompiledStructure>) -> bool {
        self.compiled.set(compiled).is_ok()
    }

    pub fn key(&self) -> LayoutKey {
        self.key
    }

    pub fn record_class(&self) -> &ClassRef {
        &self.record_class
    }

    pub fn field_type(&self) -> Option<&ClassRef> {
        self.field_type.as_ref()
    }

    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn accessor(&self, index: usize) -> Option<&FieldAccessor> {
        self.accessors.get(index)
    }

    pub fn compiled(&self) -> Option<&Arc<CompiledStructure>> {
        self.compiled.get()
    }
}

impl fmt::Debug for StructureLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureLayout")
            .field("class", &self.record_class.name())
            .field("field_type", &self.field_type.as_ref().map(|ty| ty.name().to_string()))
            .field("fields", &self.fields.len())
            .field("specialized", &self.compiled.get().is_some())
            .finish()
    }
}

/// 绑定到实例的结构视图
pub struct StructureModifier<T> {
    root: Arc<StructureLayout>,
    layout: Arc<StructureLayout>,
    converter: SharedConverter<T>,
    target: Option<RecordRef>,
    /// 以根布局索引记录的只读标记
    read_only: Arc<Vec<bool>>,
    guard: Option<WriteGuard>,
}

impl<T> Clone for StructureModifier<T> {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
            layout: Arc::clone(&self.layout),
            converter: Arc::clone(&self.converter),
            target: self.target.clone(),
            read_only: Arc::clone(&self.read_only),
            guard: self.guard.clone(),
        }
    }
}

impl StructureModifier<Value> {
    /// 根视图；final 字段默认只读
    pub(crate) fn new(root: Arc<StructureLayout>) -> Self {
        let read_only = root.fields.iter().map(|field| field.is_final()).collect();
        Self {
            layout: Arc::clone(&root),
            root,
            converter: Arc::new(ValueConverter),
            target: None,
            read_only: Arc::new(read_only),
            guard: None,
        }
    }
}

impl<T: 'static> StructureModifier<T> {
    /// 绑定到新实例，不重建成员表
    pub fn with_target(&self, target: &RecordRef) -> Result<Self> {
        if !self.layout.record_class.is_assignable_from(target.class()) {
            return Err(PacketError::type_mismatch(
                "structure target",
                self.layout.record_class.name(),
                target.class().name(),
            ));
        }
        Ok(Self {
            target: Some(Arc::clone(target)),
            ..self.clone()
        })
    }

    /// 只包含可赋值给 `field_type` 的成员，并通过转换器读写
    pub fn with_type<U: 'static>(
        &self,
        field_type: &ClassRef,
        converter: SharedConverter<U>,
    ) -> StructureModifier<U> {
        StructureModifier {
            root: Arc::clone(&self.root),
            layout: self.root.subtype(field_type),
            converter,
            target: self.target.clone(),
            read_only: Arc::clone(&self.read_only),
            guard: self.guard.clone(),
        }
    }

    /// 按字段类型过滤，保持原生值
    pub fn with_field_type(&self, field_type: &ClassRef) -> StructureModifier<Value> {
        self.with_type(field_type, Arc::new(ValueConverter))
    }

    /// 同一成员表换一个转换器
    pub fn with_converter<U: 'static>(&self, converter: SharedConverter<U>) -> StructureModifier<U> {
        StructureModifier {
            root: Arc::clone(&self.root),
            layout: Arc::clone(&self.layout),
            converter,
            target: self.target.clone(),
            read_only: Arc::clone(&self.read_only),
            guard: self.guard.clone(),
        }
    }

    pub fn with_write_guard(&self, guard: WriteGuard) -> Self {
        Self {
            guard: Some(guard),
            ..self.clone()
        }
    }

    /// 脱离原事件的视图，用于复制出的新实例
    pub(crate) fn without_write_guard(&self) -> Self {
        Self {
            guard: None,
            ..self.clone()
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.layout.fields.len() {
            Ok(())
        } else {
            Err(PacketError::IndexOutOfRange {
                index,
                len: self.layout.fields.len(),
            })
        }
    }

    fn bound_target(&self) -> Result<&RecordRef> {
        self.target
            .as_ref()
            .ok_or_else(|| PacketError::NoTarget(self.layout.record_class.name().to_string()))
    }

    fn read_raw(&self, index: usize) -> Result<Value> {
        let target = self.bound_target()?;
        match self.layout.compiled.get() {
            Some(compiled) => compiled.read(index, target),
            None => self.layout.accessors[index].get(target),
        }
    }

    fn write_raw(&self, index: usize, value: Value) -> Result<()> {
        let target = self.bound_target()?;
        match self.layout.compiled.get() {
            Some(compiled) => compiled.write(index, target, value),
            None => self.layout.accessors[index].set(target, value),
        }
    }

    fn check_guard(&self, index: usize) -> Result<()> {
        match &self.guard {
            Some(guard) if guard.is_locked() => Err(PacketError::access_denied(
                self.layout.fields[index].identity(),
                "message is read-only for monitor listeners",
            )),
            _ => Ok(()),
        }
    }

    pub fn read(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let value = self.read_raw(index)?;
        self.converter.to_specific(value)
    }

    /// 越界时返回 None
    pub fn read_safely(&self, index: usize) -> Result<Option<T>> {
        if index >= self.layout.fields.len() {
            return Ok(None);
        }
        self.read(index).map(Some)
    }

    pub fn write(&self, index: usize, value: T) -> Result<&Self> {
        self.check_index(index)?;
        self.check_guard(index)?;
        if self.is_read_only(index) {
            return Err(PacketError::access_denied(
                self.layout.fields[index].identity(),
                "field is read-only",
            ));
        }
        let generic = self.converter.to_generic(value)?;
        self.write_raw(index, generic)?;
        Ok(self)
    }

    /// 越界时忽略
    pub fn write_safely(&self, index: usize, value: T) -> Result<&Self> {
        if index < self.layout.fields.len() {
            self.write(index, value)?;
        }
        Ok(self)
    }

    pub fn modify<F>(&self, index: usize, f: F) -> Result<&Self>
    where
        F: FnOnce(T) -> T,
    {
        let current = self.read(index)?;
        self.write(index, f(current))
    }

    pub fn values(&self) -> Result<Vec<T>> {
        (0..self.layout.fields.len()).map(|i| self.read(i)).collect()
    }

    /// 把空引用字段写成类型默认值；不受只读标记限制
    pub fn write_defaults(&self) -> Result<&Self> {
        for (index, field) in self.layout.fields.iter().enumerate() {
            if !self.read_raw(index)?.is_null() {
                continue;
            }
            if let Some(value) = self.layout.env.defaults.default_value(field.field_type()) {
                self.check_guard(index)?;
                self.write_raw(index, value)?;
            }
        }
        Ok(self)
    }

    pub fn size(&self) -> usize {
        self.layout.fields.len()
    }

    pub fn fields(&self) -> &[FieldRef] {
        &self.layout.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldRef> {
        self.layout.fields.get(index)
    }

    pub fn is_read_only(&self, index: usize) -> bool {
        self.layout
            .root_indices
            .get(index)
            .and_then(|root| self.read_only.get(*root))
            .copied()
            .unwrap_or(false)
    }

    /// 修改只读标记，只影响本视图及之后由它派生的视图
    pub fn set_read_only(&mut self, index: usize, read_only: bool) -> Result<()> {
        self.check_index(index)?;
        let root = self.layout.root_indices[index];
        Arc::make_mut(&mut self.read_only)[root] = read_only;
        Ok(())
    }

    pub fn target(&self) -> Option<&RecordRef> {
        self.target.as_ref()
    }

    pub fn record_class(&self) -> &ClassRef {
        &self.layout.record_class
    }

    pub fn field_type(&self) -> Option<&ClassRef> {
        self.layout.field_type.as_ref()
    }

    pub fn layout(&self) -> &Arc<StructureLayout> {
        &self.layout
    }

    pub fn converter(&self) -> &SharedConverter<T> {
        &self.converter
    }

    pub fn is_specialized(&self) -> bool {
        self.layout.compiled.get().is_some()
    }

    pub fn specialized(&self) -> Option<Arc<CompiledStructure>> {
        self.layout.compiled.get().cloned()
    }
}

impl<T> fmt::Debug for StructureModifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureModifier")
            .field("layout", &self.layout)
            .field("target", &self.target)
            .field("converter", &self.converter.specific_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::converter::native;
    use crate::reflect::{ClassBuilder, Modifiers, OpaqueRecord, builtin::*};

    fn chat_class() -> ClassRef {
        let base = ClassBuilder::new("Packet")
            .field("sequence", &INT, Modifiers::PRIVATE)
            .build();
        ClassBuilder::new("ChatPacket")
            .extends(&base)
            .field("message", &STRING, Modifiers::PRIVATE)
            .field("sender", &STRING, Modifiers::PRIVATE)
            .field("position", &BYTE, Modifiers::PRIVATE)
            .field("id", &INT, Modifiers::PRIVATE | Modifiers::FINAL)
            .field("MAX", &INT, Modifiers::PUBLIC | Modifiers::STATIC)
            .build()
    }

    fn root_modifier(class: &ClassRef) -> StructureModifier<Value> {
        StructureModifier::new(StructureLayout::root(class, Arc::new(StructureEnv::default())))
    }

    #[test]
    fn test_indices_stable_across_targets() {
        let class = chat_class();
        let modifier = root_modifier(&class);
        // 4 个自有实例字段 + 1 个继承字段，静态字段不计入
        assert_eq!(modifier.size(), 5);

        let first = OpaqueRecord::new(&class);
        let second = OpaqueRecord::new(&class);
        first.set("message", "hi").unwrap();
        second.set("message", "yo").unwrap();

        let a = modifier.with_target(&first).unwrap();
        let b = modifier.with_target(&second).unwrap();
        assert_eq!(a.field(0).unwrap().name(), b.field(0).unwrap().name());
        assert_eq!(a.read(0).unwrap(), Value::from("hi"));
        assert_eq!(b.read(0).unwrap(), Value::from("yo"));
    }

    #[test]
    fn test_with_type_preserves_relative_order() {
        let class = chat_class();
        let record = OpaqueRecord::new(&class);
        record.set("message", "hello").unwrap();
        record.set("sender", "alice").unwrap();

        let modifier = root_modifier(&class).with_target(&record).unwrap();
        let strings = modifier.with_type(&STRING, native::<Option<String>>());
        let names: Vec<&str> = strings.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["message", "sender"]);
        assert_eq!(strings.read(1).unwrap(), Some("alice".to_string()));

        // 同一父视图再次派生得到相同的布局
        let again = modifier.with_type(&STRING, native::<Option<String>>());
        assert!(Arc::ptr_eq(strings.layout(), again.layout()));

        let ints = modifier.with_type(&INT, native::<i32>());
        let names: Vec<&str> = ints.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["id", "sequence"]);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let class = chat_class();
        let record = OpaqueRecord::new(&class);
        let ints = root_modifier(&class)
            .with_target(&record)
            .unwrap()
            .with_type(&INT, native::<i32>());

        ints.write(1, 77).unwrap();
        assert_eq!(ints.read(1).unwrap(), 77);
        ints.modify(1, |v| v + 1).unwrap();
        assert_eq!(record.get("sequence"), Some(Value::Int(78)));
    }

    #[test]
    fn test_read_only_and_unlock() {
        let class = chat_class();
        let record = OpaqueRecord::new(&class);
        let mut ints = root_modifier(&class)
            .with_target(&record)
            .unwrap()
            .with_type(&INT, native::<i32>());

        assert!(ints.is_read_only(0));
        assert!(matches!(ints.write(0, 1), Err(PacketError::AccessDenied { .. })));
        ints.set_read_only(0, false).unwrap();
        ints.write(0, 1).unwrap();
        assert_eq!(record.get("id"), Some(Value::Int(1)));
    }

    #[test]
    fn test_write_guard_blocks_writes_but_not_reads() {
        let class = chat_class();
        let record = OpaqueRecord::new(&class);
        let guard = WriteGuard::new();
        let modifier = root_modifier(&class)
            .with_target(&record)
            .unwrap()
            .with_write_guard(guard.clone());

        guard.set_locked(true);
        assert!(modifier.read(0).is_ok());
        assert!(matches!(
            modifier.write(0, Value::from("x")),
            Err(PacketError::AccessDenied { .. })
        ));
        guard.set_locked(false);
        assert!(modifier.write(0, Value::from("x")).is_ok());
    }

    #[test]
    fn test_rebinding_keeps_write_guard() {
        let class = chat_class();
        let guard = WriteGuard::new();
        let modifier = root_modifier(&class)
            .with_target(&OpaqueRecord::new(&class))
            .unwrap()
            .with_write_guard(guard.clone());
        guard.set_locked(true);

        let other = OpaqueRecord::new(&class);
        let rebound = modifier.with_target(&other).unwrap();
        assert!(matches!(
            rebound.write(0, Value::from("x")),
            Err(PacketError::AccessDenied { .. })
        ));
        assert_ne!(other.get("message"), Some(Value::from("x")));

        rebound.without_write_guard().write(0, Value::from("x")).unwrap();
        assert_eq!(other.get("message"), Some(Value::from("x")));
    }

    #[test]
    fn test_errors_for_index_and_target() {
        let class = chat_class();
        let modifier = root_modifier(&class);
        assert!(matches!(modifier.read(0), Err(PacketError::NoTarget(_))));

        let bound = modifier.with_target(&OpaqueRecord::new(&class)).unwrap();
        assert!(matches!(
            bound.read(9),
            Err(PacketError::IndexOutOfRange { index: 9, len: 5 })
        ));
        assert_eq!(bound.read_safely(9).unwrap(), None);
        assert!(bound.write_safely(9, Value::Null).is_ok());

        let unrelated = ClassBuilder::new("Unrelated").build();
        assert!(modifier.with_target(&OpaqueRecord::new(&unrelated)).is_err());
    }

    #[test]
    fn test_write_defaults_fills_null_references() {
        let class = chat_class();
        let record = OpaqueRecord::new(&class);
        let modifier = root_modifier(&class).with_target(&record).unwrap();
        modifier.write(1, Value::from("bob")).unwrap();

        modifier.write_defaults().unwrap();
        assert_eq!(record.get("message"), Some(Value::from("")));
        assert_eq!(record.get("sender"), Some(Value::from("bob")));
        assert!(modifier.values().unwrap().iter().all(|v| !v.is_null()));
    }
}
