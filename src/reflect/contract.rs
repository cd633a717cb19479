//! 模糊成员契约
//!
//! 契约在构建后不可变。字段契约、方法契约与类契约都实现 [`Matcher`]，
//! 类契约对候选成员做贪心二分配对：每个候选成员按轮次顺序尝试尚未满足的子契约，
//! 首个匹配者占用该槽位，全部子契约都被配对时才算满足。

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::matcher::{ClassMatcher, Matcher, SharedMatcher, combine_rounds, full_match_regex};
use super::types::{ClassInfo, ClassRef, ConstructorInfo, FieldInfo, Member, MethodInfo, Modifiers};
use crate::error::Result;

/// 成员公共约束：修饰符、名称、声明类型
#[derive(Clone, Default)]
struct MemberConstraints {
    required: Modifiers,
    banned: Modifiers,
    name: Option<Regex>,
    declaring: Option<SharedMatcher<ClassInfo>>,
}

impl MemberConstraints {
    fn matches(&self, member: &dyn Member) -> bool {
        let modifiers = member.modifiers();
        if !modifiers.contains(self.required) || modifiers.intersects(self.banned) {
            return false;
        }
        if let Some(name) = &self.name {
            if !name.is_match(member.name()) {
                return false;
            }
        }
        match &self.declaring {
            Some(matcher) => member
                .declaring_class()
                .map(|class| matcher.is_match(&class))
                .unwrap_or(false),
            None => true,
        }
    }

    fn round(&self) -> i32 {
        self.declaring.as_ref().map(|m| m.round()).unwrap_or(0)
    }

    fn describe(&self, parts: &mut Vec<String>) {
        if !self.required.is_empty() {
            parts.push(format!("required={:#x}", self.required.bits()));
        }
        if !self.banned.is_empty() {
            parts.push(format!("banned={:#x}", self.banned.bits()));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name={}", name.as_str()));
        }
        if self.declaring.is_some() {
            parts.push("declaring=<matcher>".to_string());
        }
    }
}

/// 成员约束的构建部分，由各契约构建器共享
#[derive(Default)]
struct MemberBuilder {
    constraints: MemberConstraints,
    name_pattern: Option<String>,
}

impl MemberBuilder {
    fn finish(mut self) -> Result<MemberConstraints> {
        if let Some(pattern) = self.name_pattern.take() {
            self.constraints.name = Some(full_match_regex(&pattern)?);
        }
        Ok(self.constraints)
    }
}

macro_rules! member_builder_methods {
    () => {
        /// 名称完整匹配正则
        pub fn name_regex(mut self, pattern: &str) -> Self {
            self.member.name_pattern = Some(pattern.to_string());
            self
        }

        pub fn name_exact(mut self, name: &str) -> Self {
            self.member.name_pattern = Some(regex::escape(name));
            self
        }

        pub fn required_modifier(mut self, modifiers: Modifiers) -> Self {
            self.member.constraints.required = self.member.constraints.required | modifiers;
            self
        }

        pub fn banned_modifier(mut self, modifiers: Modifiers) -> Self {
            self.member.constraints.banned = self.member.constraints.banned | modifiers;
            self
        }

        pub fn declaring_class(mut self, matcher: SharedMatcher<ClassInfo>) -> Self {
            self.member.constraints.declaring = Some(matcher);
            self
        }

        pub fn declaring_class_exact(self, class: &ClassRef) -> Self {
            self.declaring_class(ClassMatcher::exact(class))
        }

        /// 声明类型可以赋值为给定类型
        pub fn declaring_class_derived_of(self, class: &ClassRef) -> Self {
            self.declaring_class(ClassMatcher::derived_of(class))
        }

        pub fn declaring_class_super_of(self, class: &ClassRef) -> Self {
            self.declaring_class(ClassMatcher::super_of(class))
        }
    };
}

/// 字段契约
#[derive(Clone)]
pub struct FieldContract {
    member: MemberConstraints,
    field_type: Option<SharedMatcher<ClassInfo>>,
    round: i32,
    description: Arc<str>,
}

impl FieldContract {
    pub fn builder() -> FieldContractBuilder {
        FieldContractBuilder::default()
    }

    pub fn is_match(&self, field: &FieldInfo) -> bool {
        self.member.matches(field)
            && self
                .field_type
                .as_ref()
                .map(|m| m.is_match(field.field_type()))
                .unwrap_or(true)
    }

    pub fn round(&self) -> i32 {
        self.round
    }
}

impl Matcher<FieldInfo> for FieldContract {
    fn is_match(&self, value: &FieldInfo) -> bool {
        FieldContract::is_match(self, value)
    }

    fn round(&self) -> i32 {
        self.round
    }
}

impl fmt::Display for FieldContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for FieldContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Default)]
pub struct FieldContractBuilder {
    member: MemberBuilder,
    field_type: Option<SharedMatcher<ClassInfo>>,
    type_description: Option<String>,
}

impl FieldContractBuilder {
    member_builder_methods!();

    pub fn type_matches(mut self, matcher: SharedMatcher<ClassInfo>) -> Self {
        self.field_type = Some(matcher);
        self.type_description = Some("<matcher>".to_string());
        self
    }

    pub fn type_exact(mut self, class: &ClassRef) -> Self {
        self.field_type = Some(ClassMatcher::exact(class));
        self.type_description = Some(format!("exact {}", class.name()));
        self
    }

    /// 字段类型可以接收给定类型的实例
    pub fn type_super_of(mut self, class: &ClassRef) -> Self {
        self.field_type = Some(ClassMatcher::super_of(class));
        self.type_description = Some(format!("super of {}", class.name()));
        self
    }

    pub fn type_derived_of(mut self, class: &ClassRef) -> Self {
        self.field_type = Some(ClassMatcher::derived_of(class));
        self.type_description = Some(format!("derived of {}", class.name()));
        self
    }

    pub fn build(self) -> Result<FieldContract> {
        let member = self.member.finish()?;
        let type_round = self.field_type.as_ref().map(|m| m.round()).unwrap_or(0);
        let round = combine_rounds(member.round(), type_round);

        let mut parts = Vec::new();
        member.describe(&mut parts);
        if let Some(ty) = self.type_description {
            parts.push(format!("type={ty}"));
        }

        Ok(FieldContract {
            member,
            field_type: self.field_type,
            round,
            description: format!("field {{{}}}", parts.join(", ")).into(),
        })
    }
}

/// 参数（或异常）匹配器，可固定到具体位置
#[derive(Clone)]
struct ParameterMatcher {
    matcher: SharedMatcher<ClassInfo>,
    index: Option<usize>,
}

/// 方法/构造器契约
#[derive(Clone)]
pub struct MethodContract {
    member: MemberConstraints,
    return_type: Option<SharedMatcher<ClassInfo>>,
    parameters: Vec<ParameterMatcher>,
    exceptions: Vec<ParameterMatcher>,
    parameter_count: Option<usize>,
    round: i32,
    description: Arc<str>,
}

impl MethodContract {
    pub fn builder() -> MethodContractBuilder {
        MethodContractBuilder::default()
    }

    pub fn matches_method(&self, method: &MethodInfo) -> bool {
        self.member.matches(method)
            && self.matches_signature(
                Some(method.return_type()),
                method.parameters(),
                method.exceptions(),
            )
    }

    /// 构造器的返回类型视为其声明类型
    pub fn matches_constructor(&self, constructor: &ConstructorInfo) -> bool {
        let declaring = constructor.declaring_class();
        self.member.matches(constructor)
            && self.matches_signature(
                declaring.as_deref(),
                constructor.parameters(),
                constructor.exceptions(),
            )
    }

    pub fn round(&self) -> i32 {
        self.round
    }

    fn matches_signature(
        &self,
        return_type: Option<&ClassInfo>,
        parameters: &[ClassRef],
        exceptions: &[ClassRef],
    ) -> bool {
        if let Some(expected) = self.parameter_count {
            if expected != parameters.len() {
                return false;
            }
        }
        if let Some(matcher) = &self.return_type {
            match return_type {
                Some(actual) if matcher.is_match(actual) => {}
                _ => return false,
            }
        }
        assign_greedy(&self.parameters, parameters) && assign_greedy(&self.exceptions, exceptions)
    }
}

/// 贪心配对：固定位置的匹配器先占位，其余按轮次取第一个未占用的候选
fn assign_greedy(matchers: &[ParameterMatcher], candidates: &[ClassRef]) -> bool {
    let mut used = vec![false; candidates.len()];
    for pm in matchers {
        match pm.index {
            Some(index) => {
                let fits = index < candidates.len()
                    && !used[index]
                    && pm.matcher.is_match(&candidates[index]);
                if !fits {
                    return false;
                }
                used[index] = true;
            }
            None => {
                let slot = candidates
                    .iter()
                    .enumerate()
                    .position(|(i, candidate)| !used[i] && pm.matcher.is_match(candidate));
                match slot {
                    Some(i) => used[i] = true,
                    None => return false,
                }
            }
        }
    }
    true
}

impl Matcher<MethodInfo> for MethodContract {
    fn is_match(&self, value: &MethodInfo) -> bool {
        self.matches_method(value)
    }

    fn round(&self) -> i32 {
        self.round
    }
}

impl Matcher<ConstructorInfo> for MethodContract {
    fn is_match(&self, value: &ConstructorInfo) -> bool {
        self.matches_constructor(value)
    }

    fn round(&self) -> i32 {
        self.round
    }
}

impl fmt::Display for MethodContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for MethodContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Default)]
pub struct MethodContractBuilder {
    member: MemberBuilder,
    return_type: Option<SharedMatcher<ClassInfo>>,
    parameters: Vec<ParameterMatcher>,
    exceptions: Vec<ParameterMatcher>,
    parameter_count: Option<usize>,
    notes: Vec<String>,
}

impl MethodContractBuilder {
    member_builder_methods!();

    pub fn return_type(mut self, matcher: SharedMatcher<ClassInfo>) -> Self {
        self.return_type = Some(matcher);
        self.notes.push("return=<matcher>".to_string());
        self
    }

    pub fn return_type_exact(mut self, class: &ClassRef) -> Self {
        self.return_type = Some(ClassMatcher::exact(class));
        self.notes.push(format!("return={}", class.name()));
        self
    }

    pub fn return_type_void(self) -> Self {
        self.return_type_exact(&super::types::builtin::VOID)
    }

    pub fn return_derived_of(mut self, class: &ClassRef) -> Self {
        self.return_type = Some(ClassMatcher::derived_of(class));
        self.notes.push(format!("return<:{}", class.name()));
        self
    }

    pub fn parameter_count(mut self, count: usize) -> Self {
        self.parameter_count = Some(count);
        self.notes.push(format!("params#={count}"));
        self
    }

    pub fn parameter(mut self, matcher: SharedMatcher<ClassInfo>) -> Self {
        self.parameters.push(ParameterMatcher { matcher, index: None });
        self
    }

    pub fn parameter_at(mut self, index: usize, matcher: SharedMatcher<ClassInfo>) -> Self {
        self.parameters.push(ParameterMatcher {
            matcher,
            index: Some(index),
        });
        self
    }

    pub fn parameter_exact(self, class: &ClassRef) -> Self {
        self.parameter(ClassMatcher::exact(class))
    }

    pub fn parameter_exact_at(self, index: usize, class: &ClassRef) -> Self {
        self.parameter_at(index, ClassMatcher::exact(class))
    }

    pub fn parameter_super_of(self, class: &ClassRef) -> Self {
        self.parameter(ClassMatcher::super_of(class))
    }

    pub fn parameter_derived_of(self, class: &ClassRef) -> Self {
        self.parameter(ClassMatcher::derived_of(class))
    }

    /// 参数列表逐位完全一致
    pub fn parameter_exact_array(mut self, classes: &[&ClassRef]) -> Self {
        for (index, class) in classes.iter().enumerate() {
            self = self.parameter_exact_at(index, class);
        }
        self.parameter_count(classes.len())
    }

    pub fn exception_exact(mut self, class: &ClassRef) -> Self {
        self.exceptions.push(ParameterMatcher {
            matcher: ClassMatcher::exact(class),
            index: None,
        });
        self
    }

    pub fn exception_derived_of(mut self, class: &ClassRef) -> Self {
        self.exceptions.push(ParameterMatcher {
            matcher: ClassMatcher::derived_of(class),
            index: None,
        });
        self
    }

    pub fn build(mut self) -> Result<MethodContract> {
        let member = self.member.finish()?;

        sort_parameters(&mut self.parameters);
        sort_parameters(&mut self.exceptions);

        let mut round = member.round();
        if let Some(matcher) = &self.return_type {
            round = combine_rounds(round, matcher.round());
        }
        for pm in self.parameters.iter().chain(self.exceptions.iter()) {
            round = combine_rounds(round, pm.matcher.round());
        }

        let mut parts = Vec::new();
        member.describe(&mut parts);
        parts.extend(self.notes);
        if !self.parameters.is_empty() {
            parts.push(format!("param matchers={}", self.parameters.len()));
        }

        Ok(MethodContract {
            member,
            return_type: self.return_type,
            parameters: self.parameters,
            exceptions: self.exceptions,
            parameter_count: self.parameter_count,
            round,
            description: format!("method {{{}}}", parts.join(", ")).into(),
        })
    }
}

fn sort_parameters(matchers: &mut [ParameterMatcher]) {
    matchers.sort_by_key(|pm| (pm.index.is_none(), pm.matcher.round()));
}

/// 类契约：对字段、方法、构造器、父类、接口同时约束
#[derive(Clone, Default)]
pub struct ClassContract {
    fields: Vec<FieldContract>,
    methods: Vec<MethodContract>,
    constructors: Vec<MethodContract>,
    base_classes: Vec<SharedMatcher<ClassInfo>>,
    interfaces: Vec<SharedMatcher<ClassInfo>>,
    round: i32,
}

impl ClassContract {
    pub fn builder() -> ClassContractBuilder {
        ClassContractBuilder::default()
    }

    pub fn round(&self) -> i32 {
        self.round
    }

    pub fn is_match(&self, value: &ClassInfo) -> bool {
        if !self.base_classes.is_empty() {
            let base_ok = value
                .superclass()
                .map(|parent| self.base_classes.iter().any(|m| m.is_match(parent)))
                .unwrap_or(false);
            if !base_ok {
                return false;
            }
        }

        let fields: Vec<Arc<FieldInfo>> = value
            .hierarchy()
            .into_iter()
            .flat_map(|class| class.declared_fields().iter().cloned())
            .collect();
        let methods: Vec<Arc<MethodInfo>> = value
            .hierarchy()
            .into_iter()
            .flat_map(|class| class.declared_methods().iter().cloned())
            .collect();

        process_contracts(&fields, &self.fields, |m, f| m.is_match(f))
            && process_contracts(&methods, &self.methods, |m, f| m.matches_method(f))
            && process_contracts(value.declared_constructors(), &self.constructors, |m, c| {
                m.matches_constructor(c)
            })
            && process_contracts(value.interfaces(), &self.interfaces, |m, i| m.is_match(i))
    }
}

impl Matcher<ClassInfo> for ClassContract {
    fn is_match(&self, value: &ClassInfo) -> bool {
        ClassContract::is_match(self, value)
    }

    fn round(&self) -> i32 {
        self.round
    }
}

/// 贪心二分配对；所有匹配器都被占用时返回 true
pub fn process_contracts<T, M, F>(candidates: &[Arc<T>], matchers: &[M], is_match: F) -> bool
where
    T: ?Sized,
    F: Fn(&M, &T) -> bool,
{
    if matchers.is_empty() {
        return true;
    }
    let mut accepted = vec![false; matchers.len()];
    let mut count = 0;

    for candidate in candidates {
        for (i, matcher) in matchers.iter().enumerate() {
            if !accepted[i] && is_match(matcher, &**candidate) {
                accepted[i] = true;
                count += 1;
                break;
            }
        }
        if count == matchers.len() {
            return true;
        }
    }
    count == matchers.len()
}

#[derive(Default)]
pub struct ClassContractBuilder {
    contract: ClassContract,
}

impl ClassContractBuilder {
    pub fn field(mut self, contract: FieldContract) -> Self {
        self.contract.fields.push(contract);
        self
    }

    pub fn method(mut self, contract: MethodContract) -> Self {
        self.contract.methods.push(contract);
        self
    }

    pub fn constructor(mut self, contract: MethodContract) -> Self {
        self.contract.constructors.push(contract);
        self
    }

    pub fn base_class(mut self, matcher: SharedMatcher<ClassInfo>) -> Self {
        self.contract.base_classes.push(matcher);
        self
    }

    pub fn interface(mut self, matcher: SharedMatcher<ClassInfo>) -> Self {
        self.contract.interfaces.push(matcher);
        self
    }

    pub fn build(mut self) -> ClassContract {
        let c = &mut self.contract;
        c.fields.sort_by_key(|m| m.round());
        c.methods.sort_by_key(|m| m.round());
        c.constructors.sort_by_key(|m| m.round());
        c.base_classes.sort_by_key(|m| m.round());
        c.interfaces.sort_by_key(|m| m.round());

        let mut round = 0;
        for r in c.fields.iter().map(|m| m.round()) {
            round = combine_rounds(round, r);
        }
        for r in c
            .methods
            .iter()
            .chain(c.constructors.iter())
            .map(|m| m.round())
        {
            round = combine_rounds(round, r);
        }
        for r in c.base_classes.iter().chain(c.interfaces.iter()).map(|m| m.round()) {
            round = combine_rounds(round, r);
        }
        c.round = round;
        self.contract
    }
}
