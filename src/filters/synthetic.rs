use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method, is_kotlin_class, is_scala_class};
use crate::ir::{Method, MethodAccess};
use crate::output::FilterOutput;

/// Filter that ignores compiler-generated synthetic methods.
///
/// Lambda bodies and Scala anonymous functions hold user code. In Kotlin
/// classes only `access$` accessors are ignored, since Kotlin also marks
/// default-argument and suspend-implementation methods synthetic.
pub struct SyntheticFilter;

impl Filter for SyntheticFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "SYNTHETIC",
            name: "Synthetic methods",
            description: "Compiler-generated synthetic methods other than lambda bodies",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !method.is_synthetic() || method.name.starts_with("lambda$") {
            return Ok(());
        }
        if is_scala_class(context) && method.name.starts_with("$anonfun$") {
            return Ok(());
        }
        if is_kotlin_class(context) && !method.name.starts_with("access$") {
            return Ok(());
        }
        ignore_method(method, output);
        Ok(())
    }
}

/// Filter that ignores bridge methods.
pub struct BridgeFilter;

impl Filter for BridgeFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "BRIDGE",
            name: "Bridge methods",
            description: "Bridge methods generated for covariant overrides and erasure",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if method.access.contains(MethodAccess::BRIDGE) {
            ignore_method(method, output);
        }
        Ok(())
    }
}
