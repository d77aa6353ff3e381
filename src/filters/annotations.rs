use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method};
use crate::ir::Method;
use crate::output::FilterOutput;

/// Annotation descriptors that code generators put on generated members.
const GENERATED_ANNOTATIONS: &[&str] = &[
    "Ljavax/annotation/Generated;",
    "Ljavax/annotation/processing/Generated;",
    "Ljakarta/annotation/Generated;",
    "Lorg/immutables/value/Generated;",
    "Lio/micronaut/core/annotation/Generated;",
    "Lorg/apache/avro/specific/AvroGenerated;",
    "Ldagger/internal/DaggerGenerated;",
];

const LOMBOK_GENERATED: &str = "Llombok/Generated;";
const GROOVY_GENERATED: &str = "Lgroovy/transform/Generated;";

fn annotated(method: &Method, context: &FilterContext, descriptors: &[&str]) -> bool {
    descriptors
        .iter()
        .any(|desc| method.has_annotation(desc) || context.has_class_annotation(desc))
}

/// Filter for members annotated with a well-known `@Generated` annotation.
pub struct AnnotationGeneratedFilter;

impl Filter for AnnotationGeneratedFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "ANNOTATION_GENERATED",
            name: "Generated annotation",
            description: "Methods or classes marked @Generated by a code generator",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if annotated(method, context, GENERATED_ANNOTATIONS) {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for methods generated by Lombok with `lombok.addLombokGeneratedAnnotation`.
pub struct LombokGeneratedFilter;

impl Filter for LombokGeneratedFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "LOMBOK_GENERATED",
            name: "Lombok generated",
            description: "Methods annotated with @lombok.Generated",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if annotated(method, context, &[LOMBOK_GENERATED]) {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for methods generated by Groovy AST transformations.
pub struct GroovyGeneratedFilter;

impl Filter for GroovyGeneratedFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "GROOVY_GENERATED",
            name: "Groovy generated",
            description: "Methods annotated with @groovy.transform.Generated",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if annotated(method, context, &[GROOVY_GENERATED]) {
            ignore_method(method, output);
        }
        Ok(())
    }
}
