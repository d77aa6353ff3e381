use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::{Constant, Insn, Method};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::FilterOutput;

const ASSERTIONS_DISABLED: &str = "$assertionsDisabled";

/// Filter for the `$assertionsDisabled` plumbing of `assert` statements.
///
/// Ignores the field initialization in `<clinit>` and the `GETSTATIC; IFNE`
/// guard before each assertion, leaving the asserted condition counted.
pub struct AssertFilter;

impl Filter for AssertFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "ASSERT",
            name: "Assert statements",
            description: "Synthetic $assertionsDisabled initialization and checks",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        let class_name = context.class_name();
        for (pos, insn) in method.instructions.iter().enumerate() {
            if insn.is_pseudo() {
                continue;
            }
            if method.name == "<clinit>" {
                if let Some(end) = match_initialization(method, class_name, pos) {
                    output.ignore(pos, end);
                }
            }
            if let Some(end) = match_check(method, class_name, pos) {
                output.ignore(pos, end);
            }
        }
        Ok(())
    }
}

fn match_initialization(method: &Method, class_name: &str, start: usize) -> Option<usize> {
    let mut m = Matcher::at(method, start);
    m.expect(|insn| matches!(insn, Insn::Ldc(Constant::Type(name)) if name == class_name))
        .expect_invoke(INVOKEVIRTUAL, "java/lang/Class", "desiredAssertionStatus", "()Z")
        .expect_opcode(IFNE)
        .expect_opcode(ICONST_1)
        .expect_opcode(GOTO)
        .expect_opcode(ICONST_0)
        .expect_field(PUTSTATIC, class_name, ASSERTIONS_DISABLED, "Z");
    m.matched()
}

fn match_check(method: &Method, class_name: &str, start: usize) -> Option<usize> {
    let mut m = Matcher::at(method, start);
    m.expect_field(GETSTATIC, class_name, ASSERTIONS_DISABLED, "Z")
        .expect_opcode(IFNE);
    m.matched()
}
