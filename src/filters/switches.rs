use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::{Insn, LabelId, Method};
use crate::matcher::{ANY, Matcher};
use crate::opcodes::*;
use crate::output::{FilterOutput, Replacements};

/// Filter for the default arm javac adds to switches that cover every
/// enum constant or sealed subtype.
///
/// The arm only throws `IncompatibleClassChangeError` (or `MatchException`
/// from Java 21 on). It is ignored and the switch's default branch is left
/// out of the replacement groups.
pub struct ExhaustiveSwitchFilter;

impl Filter for ExhaustiveSwitchFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "EXHAUSTIVE_SWITCH",
            name: "Exhaustive switch",
            description: "Synthetic default arms of exhaustive switches",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for (pos, insn) in method.instructions.iter().enumerate() {
            let Some((default, labels)) = insn.switch_labels() else {
                continue;
            };
            if labels.contains(&default) || !reached_only_by(method, default, pos) {
                continue;
            }
            let Some(default_pos) = method.resolve(default) else {
                continue;
            };
            let Some(end) = match_throw(method, default_pos) else {
                continue;
            };
            if let Some(line) = own_line(method, default_pos) {
                if method.line_at(pos) != Some(line) {
                    continue;
                }
            }
            output.ignore(default_pos, end);
            output.replace_branches(pos, Replacements::ignore_default_branch(method, pos));
        }
        Ok(())
    }
}

fn match_throw(method: &Method, start: usize) -> Option<usize> {
    let mut icce = Matcher::at(method, start);
    icce.expect_type(NEW, "java/lang/IncompatibleClassChangeError")
        .expect_opcode(DUP)
        .expect_invoke(INVOKESPECIAL, "java/lang/IncompatibleClassChangeError", "<init>", "()V")
        .expect_opcode(ATHROW);
    if let Some(end) = icce.matched() {
        return Some(end);
    }

    let mut match_exception = Matcher::at(method, start);
    match_exception
        .expect_type(NEW, "java/lang/MatchException")
        .expect_opcode(DUP)
        .expect_opcode(ACONST_NULL)
        .expect_opcode(ACONST_NULL)
        .expect_invoke(INVOKESPECIAL, "java/lang/MatchException", "<init>", ANY)
        .expect_opcode(ATHROW);
    match_exception.matched()
}

/// Line entry placed between the label at `start` and its first instruction.
fn own_line(method: &Method, start: usize) -> Option<u32> {
    method.instructions[start..]
        .iter()
        .take_while(|insn| insn.is_pseudo())
        .find_map(|insn| match insn {
            Insn::LineNumber { line, .. } => Some(*line),
            _ => None,
        })
}

/// True when `label` is entered only as the default target of the switch at
/// `switch`: no other jump or switch targets it and the preceding
/// instruction does not fall through into it.
pub(crate) fn reached_only_by(method: &Method, label: LabelId, switch: usize) -> bool {
    let referenced_elsewhere = method.instructions.iter().enumerate().any(|(pos, insn)| {
        if pos == switch {
            return false;
        }
        if insn.jump_label() == Some(label) {
            return true;
        }
        insn.switch_labels()
            .is_some_and(|(default, labels)| default == label || labels.contains(&label))
    });
    if referenced_elsewhere {
        return false;
    }
    let Some(pos) = method.resolve(label) else {
        return false;
    };
    match method.previous_opcode(pos).and_then(|prev| method.opcode_at(prev)) {
        Some(opcode) => ends_flow(opcode),
        None => false,
    }
}
