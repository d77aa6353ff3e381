use crate::builder::MethodBuilder;
use crate::context::FilterContext;
use crate::filters::{Filter, KOTLIN_METADATA_DESC};
use crate::ir::{Constant, Method, MethodAccess};
use crate::opcodes::*;
use crate::output::{IgnoredRange, MethodReport};

pub(crate) fn run(filter: &dyn Filter, method: &Method, context: &FilterContext) -> MethodReport {
    let mut report = MethodReport::default();
    filter
        .filter(method, context, &mut report)
        .expect("filter run");
    report
}

pub(crate) fn java_context() -> FilterContext {
    FilterContext::new("Foo")
        .with_super_class("java/lang/Object")
        .with_source_file_name("Foo.java")
}

pub(crate) fn kotlin_context() -> FilterContext {
    FilterContext::new("Foo")
        .with_super_class("java/lang/Object")
        .with_class_annotation(KOTLIN_METADATA_DESC)
        .with_source_file_name("Foo.kt")
}

pub(crate) fn ranges(report: &MethodReport) -> Vec<(usize, usize)> {
    report
        .ignored
        .iter()
        .map(|IgnoredRange { from, to }| (*from, *to))
        .collect()
}

pub(crate) fn assert_method_ignored(report: &MethodReport, method: &Method) {
    assert_eq!(vec![(0, method.len() - 1)], ranges(report));
    assert!(report.merged.is_empty());
    assert!(report.replacements.is_empty());
}

pub(crate) fn assert_no_output(report: &MethodReport) {
    assert!(report.is_empty(), "unexpected output: {report:?}");
}

/// A method together with the class it is filtered in.
pub(crate) struct Sample {
    pub(crate) name: &'static str,
    pub(crate) method: Method,
    pub(crate) context: FilterContext,
}

fn line(b: &mut MethodBuilder, line: u32) {
    let label = b.new_label();
    b.visit_label(label);
    b.visit_line_number(line, label);
}

fn string_equals(b: &mut MethodBuilder, slot: u16, value: &str) {
    b.visit_var_insn(ALOAD, slot);
    b.visit_ldc_insn(Constant::String(value.to_string()));
    b.visit_method_insn(INVOKEVIRTUAL, "java/lang/String", "equals", "(Ljava/lang/Object;)Z", false);
}

fn throw_new(b: &mut MethodBuilder, exception: &str) {
    b.visit_type_insn(NEW, exception);
    b.visit_insn(DUP);
    b.visit_method_insn(INVOKESPECIAL, exception, "<init>", "()V", false);
    b.visit_insn(ATHROW);
}

/// Compiler output that several built-in filters recognize, including every
/// idiom whose filter rewrites branches.
pub(crate) fn samples() -> Vec<Sample> {
    vec![
        Sample {
            name: "enum values",
            method: enum_values(),
            context: FilterContext::new("Color").with_super_class("java/lang/Enum"),
        },
        Sample {
            name: "exhaustive enum switch",
            method: exhaustive_switch(),
            context: java_context(),
        },
        Sample {
            name: "ecj string switch",
            method: ecj_string_switch(),
            context: java_context(),
        },
        Sample {
            name: "kotlin when on strings",
            method: kotlin_when_string(),
            context: kotlin_context(),
        },
        Sample {
            name: "kotlin when without else",
            method: kotlin_when_switch(),
            context: kotlin_context(),
        },
        Sample {
            name: "kotlin safe call chain",
            method: kotlin_safe_call(),
            context: kotlin_context(),
        },
        Sample {
            name: "kotlin not-null assertion",
            method: kotlin_not_null(),
            context: kotlin_context(),
        },
    ]
}

fn enum_values() -> Method {
    let mut b = MethodBuilder::new("values", "()[LColor;")
        .with_access(MethodAccess::PUBLIC | MethodAccess::STATIC);
    b.visit_field_insn(GETSTATIC, "Color", "$VALUES", "[LColor;");
    b.visit_method_insn(INVOKEVIRTUAL, "[LColor;", "clone", "()Ljava/lang/Object;", false);
    b.visit_type_insn(CHECKCAST, "[LColor;");
    b.visit_insn(ARETURN);
    b.build().expect("build method")
}

fn exhaustive_switch() -> Method {
    let mut b = MethodBuilder::new("name", "(LE;)I");
    line(&mut b, 1);
    b.visit_field_insn(GETSTATIC, "Foo$1", "$SwitchMap$E", "[I");
    b.visit_var_insn(ALOAD, 1);
    b.visit_method_insn(INVOKEVIRTUAL, "E", "ordinal", "()I", false);
    b.visit_insn(IALOAD);
    let (c1, c2, c3, default) = (b.new_label(), b.new_label(), b.new_label(), b.new_label());
    b.visit_lookup_switch_insn(default, vec![1, 2, 3], vec![c1, c2, c3]);
    for (case, value) in [(c1, ICONST_1), (c2, ICONST_2), (c3, ICONST_3)] {
        b.visit_label(case);
        b.visit_insn(value);
        b.visit_insn(IRETURN);
    }
    b.visit_label(default);
    throw_new(&mut b, "java/lang/IncompatibleClassChangeError");
    b.build().expect("build method")
}

fn ecj_string_switch() -> Method {
    let mut b = MethodBuilder::new("name", "(Ljava/lang/String;)V");
    b.visit_var_insn(ALOAD, 1);
    b.visit_insn(DUP);
    b.visit_var_insn(ASTORE, 2);
    b.visit_method_insn(INVOKEVIRTUAL, "java/lang/String", "hashCode", "()I", false);
    let (h1, h2, dflt) = (b.new_label(), b.new_label(), b.new_label());
    let (case1, case2, case3) = (b.new_label(), b.new_label(), b.new_label());
    b.visit_lookup_switch_insn(dflt, vec![97, 98], vec![h1, h2]);
    b.visit_label(h1);
    string_equals(&mut b, 2, "a");
    b.visit_jump_insn(IFNE, case1);
    string_equals(&mut b, 2, "\u{0}a");
    b.visit_jump_insn(IFNE, case2);
    b.visit_jump_insn(GOTO, dflt);
    b.visit_label(h2);
    string_equals(&mut b, 2, "b");
    b.visit_jump_insn(IFNE, case3);
    b.visit_label(dflt);
    b.visit_insn(RETURN);
    b.visit_label(case1);
    b.visit_insn(NOP);
    b.visit_label(case2);
    b.visit_insn(NOP);
    b.visit_label(case3);
    b.visit_insn(RETURN);
    b.build().expect("build method")
}

fn kotlin_when_string() -> Method {
    let mut b = MethodBuilder::new("name", "()V");
    let (h1, same_hash, h2) = (b.new_label(), b.new_label(), b.new_label());
    let (case1, case2, case3, default) = (b.new_label(), b.new_label(), b.new_label(), b.new_label());
    line(&mut b, 1);
    b.visit_ldc_insn(Constant::String(String::new()));
    b.visit_var_insn(ASTORE, 1);
    b.visit_var_insn(ALOAD, 1);
    b.visit_var_insn(ASTORE, 2);
    b.visit_var_insn(ALOAD, 2);
    b.visit_method_insn(INVOKEVIRTUAL, "java/lang/String", "hashCode", "()I", false);
    b.visit_table_switch_insn(97, 98, default, vec![h1, h2]);
    for (label, value, next, case) in [
        (h1, "a", same_hash, case1),
        (same_hash, "\u{0}a", default, case2),
        (h2, "b", default, case3),
    ] {
        b.visit_label(label);
        string_equals(&mut b, 2, value);
        b.visit_jump_insn(IFEQ, next);
        b.visit_jump_insn(GOTO, case);
    }
    for label in [case1, case2, case3, default] {
        b.visit_label(label);
        b.visit_insn(RETURN);
    }
    b.build().expect("build method")
}

fn kotlin_when_switch() -> Method {
    let mut b = MethodBuilder::new("name", "(I)V");
    let (case1, default, after) = (b.new_label(), b.new_label(), b.new_label());
    line(&mut b, 1);
    b.visit_var_insn(ILOAD, 1);
    b.visit_table_switch_insn(0, 0, default, vec![case1]);
    b.visit_label(case1);
    b.visit_insn(ICONST_1);
    b.visit_jump_insn(GOTO, after);
    b.visit_label(default);
    throw_new(&mut b, "kotlin/NoWhenBranchMatchedException");
    b.visit_label(after);
    b.visit_insn(RETURN);
    b.build().expect("build method")
}

fn kotlin_safe_call() -> Method {
    let mut b = MethodBuilder::new("example", "(LA;)Ljava/lang/String;");
    let (null_path, done) = (b.new_label(), b.new_label());
    line(&mut b, 1);
    b.visit_var_insn(ALOAD, 1);
    b.visit_insn(DUP);
    b.visit_jump_insn(IFNULL, null_path);
    b.visit_method_insn(INVOKEVIRTUAL, "A", "getB", "()LB;", false);
    b.visit_insn(DUP);
    b.visit_jump_insn(IFNULL, null_path);
    b.visit_method_insn(INVOKEVIRTUAL, "B", "getC", "()Ljava/lang/String;", false);
    b.visit_jump_insn(GOTO, done);
    b.visit_label(null_path);
    b.visit_insn(POP);
    b.visit_insn(ACONST_NULL);
    b.visit_label(done);
    b.visit_insn(ARETURN);
    b.build().expect("build method")
}

fn kotlin_not_null() -> Method {
    let mut b = MethodBuilder::new("example", "(Ljava/lang/Object;)Ljava/lang/Object;");
    let ok = b.new_label();
    line(&mut b, 1);
    b.visit_var_insn(ALOAD, 1);
    b.visit_insn(DUP);
    b.visit_jump_insn(IFNONNULL, ok);
    b.visit_method_insn(INVOKESTATIC, "kotlin/jvm/internal/Intrinsics", "throwNpe", "()V", false);
    b.visit_label(ok);
    b.visit_insn(ARETURN);
    b.build().expect("build method")
}
