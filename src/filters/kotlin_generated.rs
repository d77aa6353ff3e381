use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method, is_kotlin_class};
use crate::ir::{Insn, Method};
use crate::opcodes::*;
use crate::output::FilterOutput;

const JVM_INLINE_DESC: &str = "Lkotlin/jvm/JvmInline;";
const JVM_OVERLOADS_DESC: &str = "Lkotlin/jvm/JvmOverloads;";
const DEFAULT_CONSTRUCTOR_MARKER: &str = "Lkotlin/jvm/internal/DefaultConstructorMarker;";

/// Filter for Kotlin methods without any line number in classes compiled
/// with debug information: the compiler generated them (`equals`,
/// `hashCode`, `toString` and `componentN` of data classes and the like).
pub struct KotlinGeneratedFilter;

impl Filter for KotlinGeneratedFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_GENERATED",
            name: "Kotlin generated methods",
            description: "Kotlin methods that carry no source line",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if context.source_file_name().is_none() || !is_kotlin_class(context) {
            return Ok(());
        }
        if !method.has_line_numbers() {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for the boxed instance methods of Kotlin inline value classes,
/// which only delegate to the static `-impl` functions.
pub struct KotlinInlineClassFilter;

impl Filter for KotlinInlineClassFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_INLINE_CLASS",
            name: "Kotlin inline classes",
            description: "Instance wrappers generated for Kotlin inline value classes",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_kotlin_class(context) || !context.has_class_annotation(JVM_INLINE_DESC) {
            return Ok(());
        }
        if !method.is_static() {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for the forwarders Kotlin generates into classes implementing an
/// interface with default methods compiled to `DefaultImpls`.
pub struct KotlinDefaultMethodsFilter;

impl Filter for KotlinDefaultMethodsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_DEFAULT_METHODS",
            name: "Kotlin interface default methods",
            description: "Forwarders to Kotlin interface DefaultImpls",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_kotlin_class(context) {
            return Ok(());
        }
        let Some(invoke) = forwarded_call(method) else {
            return Ok(());
        };
        let forwards = matches!(
            method.insn(invoke),
            Some(Insn::Method { opcode: INVOKESTATIC, owner, .. }) if owner.ends_with("$DefaultImpls")
        );
        let loads_this = matches!(
            method.first_opcode().and_then(|pos| method.insn(pos)),
            Some(Insn::Var { opcode: ALOAD, var: 0 })
        );
        if forwards && loads_this {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for the overloads `@JvmOverloads` generates, which only call the
/// full signature through its default-argument variant.
pub struct KotlinJvmOverloadsFilter;

impl Filter for KotlinJvmOverloadsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_JVM_OVERLOADS",
            name: "Kotlin @JvmOverloads",
            description: "Overloads generated for @JvmOverloads",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_kotlin_class(context) || !method.has_annotation(JVM_OVERLOADS_DESC) {
            return Ok(());
        }
        let Some(invoke) = forwarded_call(method) else {
            return Ok(());
        };
        if method.instructions[..invoke]
            .iter()
            .any(|insn| matches!(insn, Insn::LineNumber { .. }))
        {
            return Ok(());
        }
        let generated = match method.insn(invoke) {
            Some(Insn::Method {
                opcode: INVOKESPECIAL,
                name,
                desc,
                ..
            }) => name == "<init>" && desc.ends_with(&format!("{DEFAULT_CONSTRUCTOR_MARKER})V")),
            Some(Insn::Method {
                opcode: INVOKESTATIC,
                name,
                ..
            }) => *name == format!("{}$default", method.name),
            _ => false,
        };
        if generated {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Position of the single call in a body of the form
/// `<loads and constants>; INVOKE...; <return>`.
fn forwarded_call(method: &Method) -> Option<usize> {
    let mut pos = method.first_opcode()?;
    while method.opcode_at(pos).is_some_and(|opcode| is_load(opcode) || is_constant(opcode)) {
        pos = method.next_opcode(pos)?;
    }
    if !matches!(method.insn(pos), Some(Insn::Method { .. })) {
        return None;
    }
    let ret = method.next_opcode(pos)?;
    let returns = method.opcode_at(ret).is_some_and(is_return);
    (returns && method.next_opcode(ret).is_none()).then_some(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::filters::testing::{
        assert_method_ignored, assert_no_output, java_context, kotlin_context, run,
    };
    use crate::ir::MethodAccess;

    fn constant_method() -> MethodBuilder {
        let mut b = MethodBuilder::new("hashCode", "()I");
        b.visit_insn(ICONST_0);
        b.visit_insn(IRETURN);
        b
    }

    #[test]
    fn kotlin_method_without_lines_is_generated() {
        let method = constant_method().build().expect("build method");
        let report = run(&KotlinGeneratedFilter, &method, &kotlin_context());
        assert_method_ignored(&report, &method);
    }

    #[test]
    fn kotlin_method_with_lines_is_kept() {
        let mut b = MethodBuilder::new("hashCode", "()I").with_annotation("Lother/Annotation;", false);
        let line = b.new_label();
        b.visit_label(line);
        b.visit_line_number(12, line);
        b.visit_insn(ICONST_0);
        b.visit_insn(IRETURN);
        let method = b.build().expect("build method");

        assert_no_output(&run(&KotlinGeneratedFilter, &method, &kotlin_context()));
    }

    #[test]
    fn non_kotlin_or_no_debug_is_kept() {
        let method = constant_method().build().expect("build method");
        assert_no_output(&run(&KotlinGeneratedFilter, &method, &java_context()));

        let no_debug = FilterContext::new("Foo").with_class_annotation(crate::filters::KOTLIN_METADATA_DESC);
        assert_no_output(&run(&KotlinGeneratedFilter, &method, &no_debug));
    }

    #[test]
    fn inline_class_instance_methods_are_ignored() {
        let context = kotlin_context().with_class_annotation(JVM_INLINE_DESC);
        let mut b = MethodBuilder::new("toString", "()Ljava/lang/String;");
        b.visit_var_insn(ALOAD, 0);
        b.visit_field_insn(GETFIELD, "Foo", "value", "I");
        b.visit_method_insn(INVOKESTATIC, "Foo", "toString-impl", "(I)Ljava/lang/String;", false);
        b.visit_insn(ARETURN);
        let method = b.build().expect("build method");
        assert_method_ignored(&run(&KotlinInlineClassFilter, &method, &context), &method);

        let mut b = MethodBuilder::new("toString-impl", "(I)Ljava/lang/String;")
            .with_access(MethodAccess::PUBLIC | MethodAccess::STATIC);
        b.visit_insn(ACONST_NULL);
        b.visit_insn(ARETURN);
        let impl_method = b.build().expect("build method");
        assert_no_output(&run(&KotlinInlineClassFilter, &impl_method, &context));
        assert_no_output(&run(&KotlinInlineClassFilter, &method, &kotlin_context()));
    }

    #[test]
    fn default_impls_forwarder_is_ignored() {
        let mut b = MethodBuilder::new("greet", "(Ljava/lang/String;)V");
        b.visit_var_insn(ALOAD, 0);
        b.visit_var_insn(ALOAD, 1);
        b.visit_method_insn(
            INVOKESTATIC,
            "Greeter$DefaultImpls",
            "greet",
            "(LGreeter;Ljava/lang/String;)V",
            false,
        );
        b.visit_insn(RETURN);
        let method = b.build().expect("build method");

        assert_method_ignored(&run(&KotlinDefaultMethodsFilter, &method, &kotlin_context()), &method);
        assert_no_output(&run(&KotlinDefaultMethodsFilter, &method, &java_context()));
    }

    #[test]
    fn call_to_other_static_is_not_a_forwarder() {
        let mut b = MethodBuilder::new("greet", "()V");
        b.visit_var_insn(ALOAD, 0);
        b.visit_method_insn(INVOKESTATIC, "Util", "greet", "(LFoo;)V", false);
        b.visit_insn(RETURN);
        let method = b.build().expect("build method");

        assert_no_output(&run(&KotlinDefaultMethodsFilter, &method, &kotlin_context()));
    }

    fn overload(name: &str, line_first: bool, invoke: (u8, &str, &str)) -> Method {
        let mut b = MethodBuilder::new(name, "()V")
            .with_access(MethodAccess::PUBLIC)
            .with_annotation(JVM_OVERLOADS_DESC, false);
        if line_first {
            let line = b.new_label();
            b.visit_label(line);
            b.visit_line_number(3, line);
        }
        b.visit_var_insn(ALOAD, 0);
        b.visit_insn(ACONST_NULL);
        b.visit_insn(ICONST_1);
        b.visit_insn(ACONST_NULL);
        let (opcode, callee, desc) = invoke;
        b.visit_method_insn(opcode, "Example", callee, desc, false);
        let line = b.new_label();
        b.visit_label(line);
        b.visit_line_number(5, line);
        b.visit_insn(RETURN);
        b.build().expect("build method")
    }

    #[test]
    fn jvm_overloads_constructor_is_ignored() {
        let method = overload(
            "<init>",
            false,
            (
                INVOKESPECIAL,
                "<init>",
                "(Ljava/lang/String;ILkotlin/jvm/internal/DefaultConstructorMarker;)V",
            ),
        );
        assert_method_ignored(&run(&KotlinJvmOverloadsFilter, &method, &kotlin_context()), &method);
    }

    #[test]
    fn jvm_overloads_function_is_ignored() {
        let method = overload(
            "example",
            false,
            (
                INVOKESTATIC,
                "example$default",
                "(LExample;Ljava/lang/String;ILjava/lang/Object;)V",
            ),
        );
        assert_method_ignored(&run(&KotlinJvmOverloadsFilter, &method, &kotlin_context()), &method);
    }

    #[test]
    fn hand_written_call_to_default_variant_is_kept() {
        let method = overload(
            "call",
            true,
            (
                INVOKESTATIC,
                "example$default",
                "(LExample;Ljava/lang/String;ILjava/lang/Object;)V",
            ),
        );
        assert_no_output(&run(&KotlinJvmOverloadsFilter, &method, &kotlin_context()));

        let method = overload(
            "call",
            false,
            (
                INVOKESTATIC,
                "example$default",
                "(LExample;Ljava/lang/String;ILjava/lang/Object;)V",
            ),
        );
        assert_no_output(&run(&KotlinJvmOverloadsFilter, &method, &kotlin_context()));
    }
}
