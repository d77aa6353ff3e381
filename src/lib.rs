//! Compiler-idiom filters for JVM bytecode coverage.
//!
//! A decoder drives [`MethodBuilder`] to produce a [`Method`], the caller
//! describes the enclosing class with a [`FilterContext`], and
//! [`FilterRegistry::filter_method`] reports which instructions were
//! synthesized by a compiler and which branches are the same source branch.

pub mod builder;
pub mod cfg;
pub mod context;
pub(crate) mod descriptor;
pub mod filters;
pub mod ir;
pub mod matcher;
pub mod opcodes;
pub mod output;
pub mod registry;
pub mod smap;

pub use builder::MethodBuilder;
pub use cfg::{BlockBoundary, BoundaryKind, block_boundaries};
pub use context::{FieldInfo, FilterContext};
pub use filters::{Filter, FilterMetadata, builtin_filters};
pub use ir::{Constant, Handle, Insn, LabelId, Method, MethodAccess};
pub use matcher::{Cursor, Matcher};
pub use output::{FilterOutput, IgnoredRange, InstructionBranch, MergedPair, MethodReport};
pub use registry::{
    ClassReport, ClassUnit, ConfigError, ExtensionCatalog, ExtensionFilter, FilterConfig,
    FilterRegistry, MethodResult,
};
pub use smap::{KotlinSmap, Mapping, SmapError};
