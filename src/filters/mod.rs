use anyhow::Result;

use crate::context::FilterContext;
use crate::ir::Method;
use crate::output::FilterOutput;

pub(crate) mod annotations;
pub(crate) mod aspectj;
pub(crate) mod assertions;
pub(crate) mod constructors;
pub(crate) mod enums;
pub(crate) mod finally;
pub(crate) mod kotlin_compose;
pub(crate) mod kotlin_coroutine;
pub(crate) mod kotlin_default_arguments;
pub(crate) mod kotlin_for_loop;
pub(crate) mod kotlin_generated;
pub(crate) mod kotlin_inline;
pub(crate) mod kotlin_operators;
pub(crate) mod kotlin_serializable;
pub(crate) mod kotlin_when;
pub(crate) mod records;
pub(crate) mod scala;
pub(crate) mod string_switch;
pub(crate) mod switches;
pub(crate) mod synchronized;
pub(crate) mod synthetic;
pub(crate) mod try_with_resources;

#[cfg(test)]
pub(crate) mod testing;

pub use annotations::{AnnotationGeneratedFilter, GroovyGeneratedFilter, LombokGeneratedFilter};
pub use aspectj::{AspectJAdvisedFilter, AspectjFilter};
pub use assertions::AssertFilter;
pub use constructors::{EnumEmptyConstructorFilter, PrivateEmptyNoArgConstructorFilter};
pub use enums::{EnumFilter, KotlinEnumFilter};
pub use finally::FinallyFilter;
pub use kotlin_compose::KotlinComposeFilter;
pub use kotlin_coroutine::KotlinCoroutineFilter;
pub use kotlin_default_arguments::KotlinDefaultArgumentsFilter;
pub use kotlin_for_loop::KotlinForLoopFilter;
pub use kotlin_generated::{
    KotlinDefaultMethodsFilter, KotlinGeneratedFilter, KotlinInlineClassFilter,
    KotlinJvmOverloadsFilter,
};
pub use kotlin_inline::KotlinInlineFilter;
pub use kotlin_operators::{
    KotlinLateinitFilter, KotlinNotNullOperatorFilter, KotlinSafeCallOperatorFilter,
    KotlinUnsafeCastOperatorFilter,
};
pub use kotlin_serializable::KotlinSerializableFilter;
pub use kotlin_when::{KotlinWhenFilter, KotlinWhenStringFilter};
pub use records::{RecordPatternFilter, RecordsFilter};
pub use scala::ScalaCaseClassGeneratedMethodsFilter;
pub use string_switch::{StringSwitchEcjFilter, StringSwitchJavacFilter};
pub use switches::ExhaustiveSwitchFilter;
pub use synchronized::SynchronizedFilter;
pub use synthetic::{BridgeFilter, SyntheticFilter};
pub use try_with_resources::{
    TryWithResourcesEcjFilter, TryWithResourcesJavac11Filter, TryWithResourcesJavacFilter,
};

/// Descriptor of the annotation every Kotlin class carries.
pub(crate) const KOTLIN_METADATA_DESC: &str = "Lkotlin/Metadata;";

/// Metadata describing a filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Recognizes one compiler idiom in a method body and reports it.
///
/// Implementations keep no state between calls except through the context's
/// scratch map, and must leave `output` untouched unless the idiom fully matches.
pub trait Filter: Send + Sync {
    fn metadata(&self) -> FilterMetadata;
    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()>;
}

/// Ignores every entry of the method.
pub(crate) fn ignore_method(method: &Method, output: &mut dyn FilterOutput) {
    if !method.is_empty() {
        output.ignore(0, method.len() - 1);
    }
}

pub(crate) fn is_kotlin_class(context: &FilterContext) -> bool {
    context.has_class_annotation(KOTLIN_METADATA_DESC)
}

pub(crate) fn is_scala_class(context: &FilterContext) -> bool {
    context.has_class_attribute("ScalaSig") || context.has_class_attribute("Scala")
}

/// All built-in filters in pipeline order.
pub fn builtin_filters() -> Vec<Box<dyn Filter>> {
    vec![
        Box::new(EnumFilter),
        Box::new(SyntheticFilter),
        Box::new(BridgeFilter),
        Box::new(SynchronizedFilter),
        Box::new(TryWithResourcesJavac11Filter),
        Box::new(TryWithResourcesJavacFilter),
        Box::new(TryWithResourcesEcjFilter),
        Box::new(FinallyFilter),
        Box::new(PrivateEmptyNoArgConstructorFilter),
        Box::new(AssertFilter),
        Box::new(StringSwitchJavacFilter),
        Box::new(StringSwitchEcjFilter),
        Box::new(EnumEmptyConstructorFilter),
        Box::new(AnnotationGeneratedFilter),
        Box::new(LombokGeneratedFilter),
        Box::new(GroovyGeneratedFilter),
        Box::new(KotlinGeneratedFilter),
        Box::new(KotlinLateinitFilter),
        Box::new(KotlinWhenFilter),
        Box::new(KotlinWhenStringFilter),
        Box::new(KotlinUnsafeCastOperatorFilter),
        Box::new(KotlinNotNullOperatorFilter),
        Box::new(KotlinDefaultArgumentsFilter),
        Box::new(KotlinInlineClassFilter),
        Box::new(KotlinInlineFilter),
        Box::new(KotlinCoroutineFilter),
        Box::new(KotlinDefaultMethodsFilter),
        Box::new(KotlinEnumFilter),
        Box::new(KotlinSafeCallOperatorFilter),
        Box::new(KotlinComposeFilter),
        Box::new(KotlinForLoopFilter),
        Box::new(KotlinJvmOverloadsFilter),
        Box::new(KotlinSerializableFilter),
        Box::new(RecordsFilter),
        Box::new(RecordPatternFilter),
        Box::new(ExhaustiveSwitchFilter),
        Box::new(AspectjFilter),
        Box::new(AspectJAdvisedFilter),
        Box::new(ScalaCaseClassGeneratedMethodsFilter),
    ]
}
