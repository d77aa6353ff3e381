use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method, is_kotlin_class};
use crate::ir::Method;
use crate::output::FilterOutput;

fn is_enum(context: &FilterContext) -> bool {
    context.super_class_name() == Some("java/lang/Enum")
}

/// Filter for the `values()` and `valueOf(String)` methods of enums.
pub struct EnumFilter;

impl Filter for EnumFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "ENUM",
            name: "Enum accessors",
            description: "Compiler-generated values() and valueOf(String) of enum types",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_enum(context) {
            return Ok(());
        }
        let class_name = context.class_name();
        let generated = match method.name.as_str() {
            "values" => method.desc == format!("()[L{class_name};"),
            "valueOf" => method.desc == format!("(Ljava/lang/String;)L{class_name};"),
            _ => false,
        };
        if generated {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for `getEntries()` that the Kotlin compiler adds to enum classes.
pub struct KotlinEnumFilter;

impl Filter for KotlinEnumFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_ENUM",
            name: "Kotlin enum entries",
            description: "Generated getEntries() of Kotlin enum classes",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if is_kotlin_class(context)
            && is_enum(context)
            && method.name == "getEntries"
            && method.desc == "()Lkotlin/enums/EnumEntries;"
        {
            ignore_method(method, output);
        }
        Ok(())
    }
}
