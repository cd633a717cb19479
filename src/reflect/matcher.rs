//! 成员匹配器
//!
//! 匹配器是只依赖静态元数据的纯谓词，并带有一个"轮次"用于最优匹配排序：
//! 期望类型越具体，轮次越小、越先被尝试。组合匹配器取各部分中最大的非零轮次。

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::types::{ClassInfo, ClassRef};
use crate::error::{PacketError, Result};

/// 匹配谓词
pub trait Matcher<T: ?Sized>: Send + Sync {
    fn is_match(&self, value: &T) -> bool;

    /// 匹配轮次，0 表示未指定
    fn round(&self) -> i32 {
        0
    }
}

pub type SharedMatcher<T> = Arc<dyn Matcher<T>>;

/// 合并两个轮次：取最大的非零值
pub fn combine_rounds(a: i32, b: i32) -> i32 {
    if a == 0 {
        b
    } else if b == 0 {
        a
    } else {
        a.max(b)
    }
}

struct And<T: ?Sized> {
    left: SharedMatcher<T>,
    right: SharedMatcher<T>,
}

impl<T: ?Sized> Matcher<T> for And<T> {
    fn is_match(&self, value: &T) -> bool {
        self.left.is_match(value) && self.right.is_match(value)
    }

    fn round(&self) -> i32 {
        combine_rounds(self.left.round(), self.right.round())
    }
}

struct Or<T: ?Sized> {
    left: SharedMatcher<T>,
    right: SharedMatcher<T>,
}

impl<T: ?Sized> Matcher<T> for Or<T> {
    fn is_match(&self, value: &T) -> bool {
        self.left.is_match(value) || self.right.is_match(value)
    }

    fn round(&self) -> i32 {
        combine_rounds(self.left.round(), self.right.round())
    }
}

struct Not<T: ?Sized> {
    inner: SharedMatcher<T>,
}

impl<T: ?Sized> Matcher<T> for Not<T> {
    fn is_match(&self, value: &T) -> bool {
        !self.inner.is_match(value)
    }

    fn round(&self) -> i32 {
        -2
    }
}

struct FnMatcher<F> {
    predicate: F,
    round: i32,
}

impl<T: ?Sized, F> Matcher<T> for FnMatcher<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn is_match(&self, value: &T) -> bool {
        (self.predicate)(value)
    }

    fn round(&self) -> i32 {
        self.round
    }
}

pub fn and<T: ?Sized + 'static>(left: SharedMatcher<T>, right: SharedMatcher<T>) -> SharedMatcher<T> {
    Arc::new(And { left, right })
}

pub fn or<T: ?Sized + 'static>(left: SharedMatcher<T>, right: SharedMatcher<T>) -> SharedMatcher<T> {
    Arc::new(Or { left, right })
}

pub fn not<T: ?Sized + 'static>(inner: SharedMatcher<T>) -> SharedMatcher<T> {
    Arc::new(Not { inner })
}

/// 由闭包构造匹配器
pub fn from_fn<T, F>(round: i32, predicate: F) -> SharedMatcher<T>
where
    T: ?Sized + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    Arc::new(FnMatcher { predicate, round })
}

/// 类型匹配方式
#[derive(Clone)]
pub enum ClassMatcher {
    /// 与给定类型完全相同
    Exact(ClassRef),
    /// 输入类型是给定类型的父类型（可接收给定类型的实例）
    SuperOf(ClassRef),
    /// 输入类型派生自给定类型
    DerivedOf(ClassRef),
    /// 类型全名匹配正则
    NameRegex(Regex),
    /// 与集合中任一类型完全相同
    AnyOf(Vec<ClassRef>),
    /// 任意类型
    Any,
}

impl ClassMatcher {
    pub fn exact(class: &ClassRef) -> SharedMatcher<ClassInfo> {
        Arc::new(ClassMatcher::Exact(Arc::clone(class)))
    }

    pub fn super_of(class: &ClassRef) -> SharedMatcher<ClassInfo> {
        Arc::new(ClassMatcher::SuperOf(Arc::clone(class)))
    }

    pub fn derived_of(class: &ClassRef) -> SharedMatcher<ClassInfo> {
        Arc::new(ClassMatcher::DerivedOf(Arc::clone(class)))
    }

    pub fn name_regex(pattern: &str) -> Result<SharedMatcher<ClassInfo>> {
        Ok(Arc::new(ClassMatcher::NameRegex(full_match_regex(pattern)?)))
    }

    pub fn any_of(classes: &[&ClassRef]) -> SharedMatcher<ClassInfo> {
        Arc::new(ClassMatcher::AnyOf(
            classes.iter().map(|class| Arc::clone(class)).collect(),
        ))
    }

    pub fn any() -> SharedMatcher<ClassInfo> {
        Arc::new(ClassMatcher::Any)
    }
}

impl Matcher<ClassInfo> for ClassMatcher {
    fn is_match(&self, value: &ClassInfo) -> bool {
        match self {
            ClassMatcher::Exact(expected) => expected.id() == value.id(),
            ClassMatcher::SuperOf(expected) => value.is_assignable_from(expected),
            ClassMatcher::DerivedOf(expected) => expected.is_assignable_from(value),
            ClassMatcher::NameRegex(regex) => regex.is_match(value.name()),
            ClassMatcher::AnyOf(classes) => classes.iter().any(|c| c.id() == value.id()),
            ClassMatcher::Any => true,
        }
    }

    fn round(&self) -> i32 {
        match self {
            ClassMatcher::Exact(class)
            | ClassMatcher::SuperOf(class)
            | ClassMatcher::DerivedOf(class) => class_round(class),
            ClassMatcher::AnyOf(classes) => classes
                .iter()
                .map(|class| class_round(class))
                .min()
                .unwrap_or(0),
            ClassMatcher::NameRegex(_) | ClassMatcher::Any => 0,
        }
    }
}

/// 类型自身也计入层级，根类型与原始类型为 -1，始终早于无约束匹配
fn class_round(class: &ClassInfo) -> i32 {
    -((class.depth() + 1) as i32)
}

impl fmt::Debug for ClassMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassMatcher::Exact(class) => write!(f, "exact {}", class.name()),
            ClassMatcher::SuperOf(class) => write!(f, "super of {}", class.name()),
            ClassMatcher::DerivedOf(class) => write!(f, "derived of {}", class.name()),
            ClassMatcher::NameRegex(regex) => write!(f, "name {}", regex.as_str()),
            ClassMatcher::AnyOf(classes) => {
                let names: Vec<&str> = classes.iter().map(|c| c.name()).collect();
                write!(f, "any of [{}]", names.join(", "))
            }
            ClassMatcher::Any => f.write_str("any"),
        }
    }
}

/// 编译为整串匹配的正则
pub(crate) fn full_match_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|err| PacketError::InvalidArgument(format!("bad pattern {pattern}: {err}")))
}
