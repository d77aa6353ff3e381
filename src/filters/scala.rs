use anyhow::Result;

use crate::context::FilterContext;
use crate::descriptor::return_type;
use crate::filters::{Filter, FilterMetadata, ignore_method, is_scala_class};
use crate::ir::{Method, MethodAccess};
use crate::matcher::{ANY, Matcher};
use crate::opcodes::*;
use crate::output::FilterOutput;

const SCALA_RUNTIME: &str = "scala/runtime/ScalaRunTime$";

/// Filter for the members scalac generates for case classes and their
/// companion objects.
pub struct ScalaCaseClassGeneratedMethodsFilter;

impl Filter for ScalaCaseClassGeneratedMethodsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "SCALA_CASE_CLASS",
            name: "Scala case classes",
            description: "Members generated for Scala case classes and companion objects",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_scala_class(context) {
            return Ok(());
        }
        let class_name = context.class_name();
        let generated = if context.interfaces().contains("scala/Product") {
            is_case_class_member(class_name, method)
        } else if let Some(case_class) = class_name.strip_suffix('$') {
            is_companion_member(class_name, case_class, method)
        } else {
            false
        };
        if generated {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Members of case class `Abc`, compiled to class `Abc`.
fn is_case_class_member(class_name: &str, method: &Method) -> bool {
    let companion = format!("{class_name}$");
    let name = method.name.as_str();
    let desc = method.desc.as_str();
    match (name, desc) {
        ("equals", "(Ljava/lang/Object;)Z") => {
            let mut m = Matcher::new(method);
            m.expect_first_is_aload0()
                .expect_opcode(ALOAD)
                .expect_opcode(IF_ACMPEQ)
                .expect_opcode(ALOAD)
                .expect_opcode(ASTORE)
                .expect_opcode(ALOAD)
                .expect_opcode(INSTANCEOF);
            m.is_active()
        }
        ("hashCode", "()I") => {
            delegates_to_runtime(method, "_hashCode", "(Lscala/Product;)I", IRETURN) || {
                let mut m = Matcher::new(method);
                m.first_is(LDC)
                    .expect_opcode(ISTORE)
                    .expect_opcode(ILOAD)
                    .expect_opcode(ALOAD);
                m.is_active()
            }
        }
        ("toString", "()Ljava/lang/String;") => delegates_to_runtime(
            method,
            "_toString",
            "(Lscala/Product;)Ljava/lang/String;",
            ARETURN,
        ),
        ("productIterator", "()Lscala/collection/Iterator;") => delegates_to_runtime(
            method,
            "typedProductIterator",
            "(Lscala/Product;)Lscala/collection/Iterator;",
            ARETURN,
        ),
        ("productElement", "(I)Ljava/lang/Object;") => {
            let mut m = Matcher::new(method);
            m.first_is(ILOAD)
                .expect_opcode(ISTORE)
                .expect_opcode(ILOAD)
                .expect_switch();
            m.is_active()
        }
        ("productArity", "()I") => true,
        ("productPrefix", "()Ljava/lang/String;") => returns_constant(method),
        ("curried" | "tupled", "()Lscala/Function1;") => {
            let mut m = Matcher::new(method);
            m.first_is(GETSTATIC)
                .expect_invoke(INVOKEVIRTUAL, &companion, name, desc)
                .expect_opcode(ARETURN);
            m.is_active()
        }
        ("copy", _) => {
            let mut m = Matcher::new(method);
            m.first_is(NEW).expect_opcode(DUP);
            m.is_active()
        }
        ("unapply", _) if desc == format!("(L{class_name};)Lscala/Option;") => {
            let mut m = Matcher::new(method);
            m.first_is(GETSTATIC)
                .expect_opcode(ALOAD)
                .expect_invoke(INVOKEVIRTUAL, &companion, "unapply", desc)
                .expect_opcode(ARETURN);
            m.is_active()
        }
        ("apply", _) if returns(desc, class_name) => {
            forwards_to(method, GETSTATIC, INVOKEVIRTUAL, &companion, "apply", desc)
        }
        _ => {
            is_default_value(name)
                || name.starts_with("copy$default$")
                || (method.access.contains(MethodAccess::PUBLIC)
                    && method.is_static()
                    && static_forwarder(method, &companion))
        }
    }
}

/// Members of the companion object of case class `Abc`, compiled to class `Abc$`.
fn is_companion_member(class_name: &str, case_class: &str, method: &Method) -> bool {
    let name = method.name.as_str();
    let desc = method.desc.as_str();
    match (name, desc) {
        ("apply", _) if returns(desc, case_class) => {
            let Some(params) = desc.find(')').map(|end| &desc[..=end]) else {
                return false;
            };
            let constructor = format!("{params}V");
            let mut m = Matcher::new(method);
            m.first_is(NEW).expect_opcode(DUP);
            m.is_active()
                && forwards_to(method, NEW, INVOKESPECIAL, case_class, "<init>", &constructor)
        }
        ("apply", _) if desc.ends_with("Ljava/lang/Object;") => {
            let mut m = Matcher::new(method);
            m.expect_first_is_aload0();
            m.is_active() && forwards_to(method, ALOAD, INVOKEVIRTUAL, class_name, "apply", ANY)
        }
        ("unapply", _) if desc.ends_with("Lscala/Option;") => {
            let mut m = Matcher::new(method);
            m.first_is(ALOAD)
                .expect_opcode(IFNONNULL)
                .expect_opcode(GETSTATIC)
                .expect_opcode(GOTO)
                .expect_opcode(NEW)
                .expect_opcode(DUP)
                .expect_opcode(NEW)
                .expect_opcode(DUP);
            m.is_active()
        }
        ("readResolve", "()Ljava/lang/Object;") => {
            if !method.access.contains(MethodAccess::PRIVATE) {
                return false;
            }
            let mut m = Matcher::new(method);
            m.first_is(GETSTATIC).expect_opcode(ARETURN);
            m.is_active()
        }
        ("toString", "()Ljava/lang/String;") => returns_constant(method),
        _ => is_default_value(name),
    }
}

fn returns(desc: &str, class_name: &str) -> bool {
    return_type(desc) == Some(format!("L{class_name};").as_str())
}

/// Default argument getters scalac 2.11 emits.
fn is_default_value(name: &str) -> bool {
    name.starts_with("$lessinit$greater$default") || name.starts_with("apply$default$")
}

/// `GETSTATIC ScalaRunTime$.MODULE$; ALOAD 0; INVOKEVIRTUAL ScalaRunTime$.<name>; <ret>`
fn delegates_to_runtime(method: &Method, name: &str, desc: &str, ret: u8) -> bool {
    let mut m = Matcher::new(method);
    m.first_is(GETSTATIC)
        .expect_opcode(ALOAD)
        .expect_invoke(INVOKEVIRTUAL, SCALA_RUNTIME, name, desc)
        .expect_opcode(ret);
    m.is_active()
}

fn returns_constant(method: &Method) -> bool {
    let mut m = Matcher::new(method);
    m.first_is(LDC).expect_opcode(ARETURN);
    m.is_active()
}

/// True when the method starts with `first`, and the first `invoke`
/// instruction after it calls `owner.name` and is followed by `ARETURN`.
fn forwards_to(
    method: &Method,
    first: u8,
    invoke: u8,
    owner: &str,
    name: &str,
    desc: &str,
) -> bool {
    let Some(start) = method.first_opcode() else {
        return false;
    };
    if method.opcode_at(start) != Some(first) {
        return false;
    }
    let Some(call) = first_after(method, start, invoke) else {
        return false;
    };
    let mut m = Matcher::at(method, call);
    m.expect_invoke(invoke, owner, name, desc).expect_opcode(ARETURN);
    m.is_active()
}

/// Static method of the case class that forwards to the same method on the
/// companion object.
fn static_forwarder(method: &Method, companion: &str) -> bool {
    let Some(start) = method.first_opcode() else {
        return false;
    };
    if method.opcode_at(start) != Some(GETSTATIC) {
        return false;
    }
    let Some(call) = first_after(method, start, INVOKEVIRTUAL) else {
        return false;
    };
    let mut m = Matcher::at(method, call);
    m.expect_invoke(INVOKEVIRTUAL, companion, &method.name, &method.desc)
        .expect(|insn| insn.opcode().is_some_and(is_return));
    m.is_active()
}

fn first_after(method: &Method, start: usize, opcode: u8) -> Option<usize> {
    (start + 1..method.len()).find(|&pos| method.opcode_at(pos) == Some(opcode))
}
