//! # 结构访问模块
//!
//! 把一组发现到的成员变成稳定、按索引、带类型的视图，并可由后台编译器特化为快速路径。

pub mod background;
pub mod cache;
pub mod compiler;
pub mod converter;
pub mod field;
pub mod policy;
pub mod structure;

pub use background::{BackgroundCompiler, BackgroundCompilerBuilder, CompileCallback};
pub use cache::StructureCache;
pub use compiler::{CompiledStructure, SlotTableSpecializer, Specializer};
pub use converter::{
    EquivalentConverter, FnConverter, NativeConverter, NativeValue, SharedConverter,
    ValueConverter, converter, native,
};
pub use field::FieldAccessor;
pub use policy::{AccessKind, AccessPolicy, PermissivePolicy, PublicOnlyPolicy};
pub use structure::{LayoutKey, StructureEnv, StructureLayout, StructureModifier, WriteGuard};
