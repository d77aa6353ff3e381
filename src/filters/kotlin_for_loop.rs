use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, is_kotlin_class};
use crate::ir::{Insn, Method};
use crate::opcodes::*;
use crate::output::FilterOutput;

/// Filter for the range checks Kotlin emits around `for` loops over
/// `until` and `downTo` progressions.
///
/// The loop is compiled as an entry check that skips the body when the range
/// is empty, and a back edge comparing the counter with the bound. Both
/// comparisons are ignored.
pub struct KotlinForLoopFilter;

impl Filter for KotlinForLoopFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_FOR_LOOP",
            name: "Kotlin for loops",
            description: "Range checks of Kotlin for loops over progressions",
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
        for (entry, insn) in method.instructions.iter().enumerate() {
            let Insn::Jump { opcode: IF_ICMPGE | IF_ICMPGT, label: exit } = insn else {
                continue;
            };
            let Some(Insn::Label(body)) = method.insn(entry + 1) else {
                continue;
            };
            let Some(exit_pos) = method.resolve(*exit) else {
                continue;
            };
            let Some(back_edge) = method.previous_opcode(exit_pos) else {
                continue;
            };
            if back_edge <= entry {
                continue;
            }
            let loops_back = matches!(
                method.insn(back_edge),
                Some(Insn::Jump { opcode: IF_ICMPLT | IF_ICMPLE | IF_ICMPNE, label }) if label == body
            );
            let increments = method.instructions[entry + 1..back_edge]
                .iter()
                .any(|insn| matches!(insn, Insn::Iinc { .. }));
            if loops_back && increments {
                output.ignore(entry, entry);
                output.ignore(back_edge, back_edge);
            }
        }
        Ok(())
    }
}
