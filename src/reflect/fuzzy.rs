//! 模糊反射
//!
//! 在一个类型（及其父类）上按契约查找成员。需要唯一结果的查询在零个或多个匹配时
//! 返回 [`PacketError::MatchNotFound`]；调用方可以依次尝试别名契约以应对上游重命名。

use std::sync::Arc;

use super::contract::{ClassContract, FieldContract, MethodContract};
use super::matcher::full_match_regex;
use super::types::{ClassInfo, ClassRef, ConstructorRef, FieldRef, Member, MethodRef, Modifiers};
use super::value::{RecordRef, Value};
use crate::error::{PacketError, Result};

/// 类型上的模糊成员查找器
#[derive(Clone)]
pub struct FuzzyReflection {
    source: ClassRef,
    force_access: bool,
}

impl FuzzyReflection {
    /// 只枚举公开成员
    pub fn of(source: &ClassRef) -> Self {
        Self::with_access(source, false)
    }

    /// `force_access` 为 true 时包含非公开成员
    pub fn with_access(source: &ClassRef, force_access: bool) -> Self {
        Self {
            source: Arc::clone(source),
            force_access,
        }
    }

    pub fn source(&self) -> &ClassRef {
        &self.source
    }

    pub fn is_force_access(&self) -> bool {
        self.force_access
    }

    fn visible(&self, modifiers: Modifiers) -> bool {
        self.force_access || modifiers.contains(Modifiers::PUBLIC)
    }

    /// 本类型及父类的字段，子类在前
    pub fn fields(&self) -> Vec<FieldRef> {
        self.source
            .hierarchy()
            .into_iter()
            .flat_map(|class| class.declared_fields().iter())
            .filter(|field| self.visible(field.modifiers()))
            .cloned()
            .collect()
    }

    pub fn methods(&self) -> Vec<MethodRef> {
        self.source
            .hierarchy()
            .into_iter()
            .flat_map(|class| class.declared_methods().iter())
            .filter(|method| self.visible(method.modifiers()))
            .cloned()
            .collect()
    }

    pub fn constructors(&self) -> Vec<ConstructorRef> {
        self.source
            .declared_constructors()
            .iter()
            .filter(|ctor| self.visible(ctor.modifiers()))
            .cloned()
            .collect()
    }

    fn not_found(&self, what: impl std::fmt::Display) -> PacketError {
        PacketError::MatchNotFound(format!("{what} in {}", self.source.name()))
    }

    // ---- 字段 ----

    /// 第一个满足契约的字段
    pub fn field(&self, contract: &FieldContract) -> Result<FieldRef> {
        self.fields()
            .into_iter()
            .find(|field| contract.is_match(field))
            .ok_or_else(|| self.not_found(contract))
    }

    /// 恰好一个字段满足契约
    pub fn unique_field(&self, contract: &FieldContract) -> Result<FieldRef> {
        let mut matched = self.fields_matching(contract);
        match matched.len() {
            1 => Ok(matched.remove(0)),
            0 => Err(self.not_found(contract)),
            n => Err(self.not_found(format!("{contract} (ambiguous, {n} candidates)"))),
        }
    }

    pub fn fields_matching(&self, contract: &FieldContract) -> Vec<FieldRef> {
        self.fields()
            .into_iter()
            .filter(|field| contract.is_match(field))
            .collect()
    }

    /// 按顺序尝试别名契约，返回第一个唯一解析成功的字段
    pub fn field_with_aliases(&self, contracts: &[FieldContract]) -> Result<FieldRef> {
        for contract in contracts {
            if let Ok(field) = self.unique_field(contract) {
                return Ok(field);
            }
        }
        let tried: Vec<String> = contracts.iter().map(|c| c.to_string()).collect();
        Err(self.not_found(format!("any of [{}]", tried.join("; "))))
    }

    /// 名称完整匹配正则的第一个字段
    pub fn field_by_name(&self, pattern: &str) -> Result<FieldRef> {
        let regex = full_match_regex(pattern)?;
        self.fields()
            .into_iter()
            .find(|field| regex.is_match(field.name()))
            .ok_or_else(|| self.not_found(format!("field named {pattern}")))
    }

    /// 第一个类型派生自 `ty` 的字段
    pub fn field_by_type(&self, ty: &ClassInfo) -> Result<FieldRef> {
        self.fields()
            .into_iter()
            .find(|field| ty.is_assignable_from(field.field_type()))
            .ok_or_else(|| self.not_found(format!("field of type {}", ty.name())))
    }

    pub fn fields_by_type(&self, ty: &ClassInfo) -> Vec<FieldRef> {
        self.fields()
            .into_iter()
            .filter(|field| ty.is_assignable_from(field.field_type()))
            .collect()
    }

    // ---- 方法 ----

    pub fn method(&self, contract: &MethodContract) -> Result<MethodRef> {
        self.methods()
            .into_iter()
            .find(|method| contract.matches_method(method))
            .ok_or_else(|| self.not_found(contract))
    }

    pub fn unique_method(&self, contract: &MethodContract) -> Result<MethodRef> {
        let mut matched = self.methods_matching(contract);
        match matched.len() {
            1 => Ok(matched.remove(0)),
            0 => Err(self.not_found(contract)),
            n => Err(self.not_found(format!("{contract} (ambiguous, {n} candidates)"))),
        }
    }

    pub fn methods_matching(&self, contract: &MethodContract) -> Vec<MethodRef> {
        self.methods()
            .into_iter()
            .filter(|method| contract.matches_method(method))
            .collect()
    }

    pub fn method_with_aliases(&self, contracts: &[MethodContract]) -> Result<MethodRef> {
        for contract in contracts {
            if let Ok(method) = self.unique_method(contract) {
                return Ok(method);
            }
        }
        let tried: Vec<String> = contracts.iter().map(|c| c.to_string()).collect();
        Err(self.not_found(format!("any of [{}]", tried.join("; "))))
    }

    pub fn method_by_name(&self, pattern: &str) -> Result<MethodRef> {
        let regex = full_match_regex(pattern)?;
        self.methods()
            .into_iter()
            .find(|method| regex.is_match(method.name()))
            .ok_or_else(|| self.not_found(format!("method named {pattern}")))
    }

    /// 名称与参数列表均完全一致的方法
    pub fn method_by_parameters(&self, name: &str, parameters: &[&ClassRef]) -> Result<MethodRef> {
        self.methods()
            .into_iter()
            .find(|method| {
                method.name() == name
                    && method.parameters().len() == parameters.len()
                    && method
                        .parameters()
                        .iter()
                        .zip(parameters)
                        .all(|(actual, expected)| actual.id() == expected.id())
            })
            .ok_or_else(|| self.not_found(format!("method {name} with {} parameters", parameters.len())))
    }

    /// 解析唯一方法并调用
    pub fn invoke(
        &self,
        contract: &MethodContract,
        target: Option<&RecordRef>,
        args: &[Value],
    ) -> Result<Value> {
        self.unique_method(contract)?.invoke(target, args)
    }

    // ---- 构造器 ----

    pub fn constructor(&self, contract: &MethodContract) -> Result<ConstructorRef> {
        self.constructors()
            .into_iter()
            .find(|ctor| contract.matches_constructor(ctor))
            .ok_or_else(|| self.not_found(contract))
    }

    pub fn constructors_matching(&self, contract: &MethodContract) -> Vec<ConstructorRef> {
        self.constructors()
            .into_iter()
            .filter(|ctor| contract.matches_constructor(ctor))
            .collect()
    }

    /// 源类型是否满足类契约
    pub fn matches(&self, contract: &ClassContract) -> bool {
        contract.is_match(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{ClassBuilder, MethodSpec, builtin::*};
    use super::*;

    fn player() -> (ClassRef, ClassRef) {
        let base = ClassBuilder::new("Base").build();
        let player = ClassBuilder::new("Player")
            .extends(&base)
            .field("health", &FLOAT, Modifiers::PRIVATE)
            .field("food", &INT, Modifiers::PRIVATE)
            .field("level", &INT, Modifiers::PRIVATE)
            .field("name", &STRING, Modifiers::PUBLIC)
            .method(MethodSpec::new("getX", &INT).invoker(|_, _| Ok(Value::Int(42))))
            .method(MethodSpec::new("getX", &STRING))
            .method(MethodSpec::new("other", &INT))
            .build();
        (base, player)
    }

    #[test]
    fn test_public_only_without_force_access() {
        let (_, class) = player();
        assert_eq!(FuzzyReflection::of(&class).fields().len(), 1);
        assert_eq!(FuzzyReflection::with_access(&class, true).fields().len(), 4);
    }

    #[test]
    fn test_get_x_scenario_resolves_uniquely() {
        let (base, class) = player();
        let fuzzy = FuzzyReflection::with_access(&class, true);
        let contract = MethodContract::builder()
            .declaring_class_derived_of(&base)
            .name_regex("get.*")
            .return_type_exact(&INT)
            .parameter_count(0)
            .build()
            .unwrap();

        let method = fuzzy.unique_method(&contract).unwrap();
        assert_eq!(method.name(), "getX");
        assert_eq!(method.return_type().id(), INT.id());
        assert_eq!(fuzzy.invoke(&contract, None, &[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_ambiguous_unique_lookup_fails() {
        let (_, class) = player();
        let fuzzy = FuzzyReflection::with_access(&class, true);
        let ints = FieldContract::builder().type_exact(&INT).build().unwrap();

        assert_eq!(fuzzy.fields_matching(&ints).len(), 2);
        assert!(matches!(
            fuzzy.unique_field(&ints),
            Err(PacketError::MatchNotFound(_))
        ));
        // 非唯一查询返回第一个
        assert_eq!(fuzzy.field(&ints).unwrap().name(), "food");
    }

    #[test]
    fn test_alias_retry() {
        let (_, class) = player();
        let fuzzy = FuzzyReflection::with_access(&class, true);
        let renamed = FieldContract::builder().name_exact("hp").build().unwrap();
        let original = FieldContract::builder().name_exact("health").build().unwrap();

        assert!(fuzzy.unique_field(&renamed).is_err());
        let field = fuzzy.field_with_aliases(&[renamed, original]).unwrap();
        assert_eq!(field.name(), "health");
    }

    #[test]
    fn test_lookup_by_name_and_type() {
        let (_, class) = player();
        let fuzzy = FuzzyReflection::with_access(&class, true);
        assert_eq!(fuzzy.field_by_name("lev.*").unwrap().name(), "level");
        assert_eq!(fuzzy.field_by_type(&STRING).unwrap().name(), "name");
        assert!(fuzzy.field_by_type(&LONG).is_err());
        assert!(fuzzy.method_by_parameters("other", &[]).is_ok());
    }
}
