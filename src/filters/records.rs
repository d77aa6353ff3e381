use std::collections::BTreeSet;

use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method};
use crate::ir::{Insn, Method};
use crate::matcher::{ANY, Matcher};
use crate::opcodes::*;
use crate::output::FilterOutput;

const RECORD: &str = "java/lang/Record";
const OBJECT_METHODS: &str = "java/lang/runtime/ObjectMethods";
const MATCH_EXCEPTION: &str = "java/lang/MatchException";
const THROWABLE: &str = "java/lang/Throwable";

/// Filter for the members javac generates for records: `toString`,
/// `hashCode` and `equals` bootstrapped through `ObjectMethods`, and
/// accessors that only return their component field.
pub struct RecordsFilter;

impl Filter for RecordsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "RECORDS",
            name: "Records",
            description: "Generated object methods and component accessors of records",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if context.super_class_name() != Some(RECORD) {
            return Ok(());
        }
        if is_object_method(method) || is_component_accessor(method, context) {
            ignore_method(method, output);
        }
        Ok(())
    }
}

fn is_object_method(method: &Method) -> bool {
    let mut m = Matcher::new(method);
    match (method.name.as_str(), method.desc.as_str()) {
        ("toString", "()Ljava/lang/String;") => {
            m.expect_first_is_aload0();
            expect_bootstrap(&mut m);
            m.expect_opcode(ARETURN);
        }
        ("hashCode", "()I") => {
            m.expect_first_is_aload0();
            expect_bootstrap(&mut m);
            m.expect_opcode(IRETURN);
        }
        ("equals", "(Ljava/lang/Object;)Z") => {
            m.expect_first_is_aload0().expect_var_slot(ALOAD, 1);
            expect_bootstrap(&mut m);
            m.expect_opcode(IRETURN);
        }
        _ => return false,
    }
    m.is_active()
}

fn expect_bootstrap(m: &mut Matcher<'_>) {
    m.expect(|insn| {
        matches!(
            insn,
            Insn::InvokeDynamic { bootstrap, .. }
                if bootstrap.owner == OBJECT_METHODS && bootstrap.name == "bootstrap"
        )
    });
}

/// `ALOAD 0; GETFIELD this.<name>; xRETURN` where `<name>` is a field of
/// the record with the accessor's return type.
fn is_component_accessor(method: &Method, context: &FilterContext) -> bool {
    if method.is_static() {
        return false;
    }
    let Some(field) = context
        .fields()
        .iter()
        .find(|field| field.name == method.name && method.desc == format!("(){}", field.desc))
    else {
        return false;
    };
    let mut m = Matcher::new(method);
    m.expect_first_is_aload0()
        .expect_field(GETFIELD, context.class_name(), &field.name, &field.desc)
        .expect(|insn| insn.opcode().is_some_and(is_return));
    let Some(ret) = m.matched() else {
        return false;
    };
    method.next_opcode(ret).is_none()
}

/// Filter for the `MatchException` handler javac adds around record
/// patterns, reached only when an accessor throws during deconstruction.
pub struct RecordPatternFilter;

impl Filter for RecordPatternFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "RECORD_PATTERN",
            name: "Record patterns",
            description: "MatchException handlers of record deconstruction patterns",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        let handlers: BTreeSet<usize> = method
            .try_catch_blocks
            .iter()
            .filter(|block| block.exception_type.as_deref() == Some(THROWABLE))
            .filter_map(|block| method.resolve(block.handler))
            .collect();
        for handler in handlers {
            let mut m = Matcher::at(method, handler);
            m.expect_var(ASTORE, "cause")
                .expect_type(NEW, MATCH_EXCEPTION)
                .expect_opcode(DUP)
                .expect_var(ALOAD, "cause")
                .expect_invoke(INVOKEVIRTUAL, THROWABLE, "toString", "()Ljava/lang/String;")
                .expect_var(ALOAD, "cause")
                .expect_invoke(INVOKESPECIAL, MATCH_EXCEPTION, "<init>", ANY)
                .expect_opcode(ATHROW);
            if let Some(athrow) = m.matched() {
                output.ignore(handler, athrow);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::filters::testing::{assert_method_ignored, assert_no_output, ranges, run};
    use crate::ir::{Constant, Handle, MethodAccess};

    fn record() -> FilterContext {
        FilterContext::new("Point")
            .with_super_class(RECORD)
            .with_field("x", "I")
            .with_source_file_name("Point.java")
    }

    fn object_method(name: &str, desc: &str, ret: u8, bootstrap_owner: &str) -> Method {
        let mut b = MethodBuilder::new(name, desc).with_access(MethodAccess::PUBLIC);
        b.visit_var_insn(ALOAD, 0);
        if name == "equals" {
            b.visit_var_insn(ALOAD, 1);
        }
        b.visit_invoke_dynamic_insn(
            name,
            &format!("(LPoint;{}", &desc[1..]),
            Handle {
                tag: 6,
                owner: bootstrap_owner.to_string(),
                name: "bootstrap".to_string(),
                desc: "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/TypeDescriptor;Ljava/lang/Class;Ljava/lang/String;[Ljava/lang/invoke/MethodHandle;)Ljava/lang/Object;".to_string(),
                interface: false,
            },
            vec![Constant::Type("Point".to_string()), Constant::String("x".to_string())],
        );
        b.visit_insn(ret);
        b.build().expect("build method")
    }

    #[test]
    fn object_methods_are_ignored() {
        for (name, desc, ret) in [
            ("toString", "()Ljava/lang/String;", ARETURN),
            ("hashCode", "()I", IRETURN),
            ("equals", "(Ljava/lang/Object;)Z", IRETURN),
        ] {
            let method = object_method(name, desc, ret, OBJECT_METHODS);
            assert_method_ignored(&run(&RecordsFilter, &method, &record()), &method);
        }
    }

    #[test]
    fn other_bootstrap_is_kept() {
        let method = object_method("hashCode", "()I", IRETURN, "example/Bootstraps");
        assert_no_output(&run(&RecordsFilter, &method, &record()));
    }

    #[test]
    fn requires_record() {
        let method = object_method("hashCode", "()I", IRETURN, OBJECT_METHODS);
        let context = FilterContext::new("Point").with_super_class("java/lang/Object");
        assert_no_output(&run(&RecordsFilter, &method, &context));
    }

    fn accessor(body: impl FnOnce(&mut MethodBuilder)) -> Method {
        let mut b = MethodBuilder::new("x", "()I").with_access(MethodAccess::PUBLIC);
        b.visit_var_insn(ALOAD, 0);
        b.visit_field_insn(GETFIELD, "Point", "x", "I");
        body(&mut b);
        b.build().expect("build method")
    }

    #[test]
    fn trivial_accessor_is_ignored() {
        let method = accessor(|b| b.visit_insn(IRETURN));
        assert_method_ignored(&run(&RecordsFilter, &method, &record()), &method);
    }

    #[test]
    fn custom_accessor_is_kept() {
        let method = accessor(|b| {
            b.visit_insn(ICONST_1);
            b.visit_insn(IADD);
            b.visit_insn(IRETURN);
        });
        assert_no_output(&run(&RecordsFilter, &method, &record()));
    }

    /// `if (o instanceof Point(int x)) { ... }`
    fn deconstruction(message_call: &str) -> (Method, (usize, usize)) {
        let mut b = MethodBuilder::new("example", "(Ljava/lang/Object;)V")
            .with_access(MethodAccess::PUBLIC | MethodAccess::STATIC);
        let (start, end) = (b.new_label(), b.new_label());
        let (handler, exit) = (b.new_label(), b.new_label());
        b.visit_try_catch_block(start, end, handler, Some(THROWABLE));
        b.visit_var_insn(ALOAD, 0);
        b.visit_type_insn(CHECKCAST, "Point");
        b.visit_label(start);
        b.visit_method_insn(INVOKEVIRTUAL, "Point", "x", "()I", false);
        b.visit_label(end);
        b.visit_var_insn(ISTORE, 1);
        b.visit_jump_insn(GOTO, exit);

        let handler_pos = b.position();
        b.visit_label(handler);
        b.visit_var_insn(ASTORE, 2);
        b.visit_type_insn(NEW, MATCH_EXCEPTION);
        b.visit_insn(DUP);
        b.visit_var_insn(ALOAD, 2);
        let desc = "()Ljava/lang/String;";
        b.visit_method_insn(INVOKEVIRTUAL, THROWABLE, message_call, desc, false);
        b.visit_var_insn(ALOAD, 2);
        b.visit_method_insn(
            INVOKESPECIAL,
            MATCH_EXCEPTION,
            "<init>",
            "(Ljava/lang/String;Ljava/lang/Throwable;)V",
            false,
        );
        let athrow = b.position();
        b.visit_insn(ATHROW);

        b.visit_label(exit);
        b.visit_insn(RETURN);
        (b.build().expect("build method"), (handler_pos, athrow))
    }

    #[test]
    fn match_exception_handler_is_ignored() {
        let (method, range) = deconstruction("toString");
        let report = run(&RecordPatternFilter, &method, &record());
        assert_eq!(vec![range], ranges(&report));
    }

    #[test]
    fn other_handler_is_kept() {
        let (method, _) = deconstruction("getMessage");
        assert_no_output(&run(&RecordPatternFilter, &method, &record()));
    }
}
