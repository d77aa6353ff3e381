use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::{Insn, LabelId, Method};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::{FilterOutput, Replacements};

const STRING: &str = "java/lang/String";
const EQUALS_DESC: &str = "(Ljava/lang/Object;)Z";

/// Filter for javac's lowering of `switch` on strings.
///
/// javac switches on `hashCode()` to pick an ordinal, then switches again on
/// the ordinal. The hash switch and its `equals` chains are ignored so only
/// the ordinal switch carries branches.
pub struct StringSwitchJavacFilter;

/// Filter for ecj's lowering of `switch` on strings.
///
/// ecj jumps from the `equals` chains straight into the case bodies, so the
/// hash switch's branches are replaced by the comparisons that reach each case.
pub struct StringSwitchEcjFilter;

impl Filter for StringSwitchJavacFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "STRING_SWITCH_JAVAC",
            name: "String switch (javac)",
            description: "hashCode dispatch and equals chains of javac string switches",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for (pos, insn) in method.instructions.iter().enumerate() {
            if insn.opcode() != Some(ICONST_M1) {
                continue;
            }
            let mut m = Matcher::at(method, pos);
            m.expect_opcode(ICONST_M1)
                .expect_var(ISTORE, "c")
                .expect_var(ALOAD, "s")
                .expect_invoke(INVOKEVIRTUAL, STRING, "hashCode", "()I")
                .expect_switch();
            let Some(switch) = m.matched() else {
                continue;
            };
            let Some((default, buckets)) = hash_buckets(method, switch) else {
                continue;
            };
            if let Some(end) = match_javac_comparisons(&mut m, default, buckets) {
                output.ignore(switch, end);
            }
        }
        Ok(())
    }
}

fn match_javac_comparisons(m: &mut Matcher<'_>, default: LabelId, buckets: usize) -> Option<usize> {
    let method = m.method();
    for _ in 0..buckets {
        loop {
            m.expect_var(ALOAD, "s")
                .expect_opcode(LDC)
                .expect_invoke(INVOKEVIRTUAL, STRING, "equals", EQUALS_DESC)
                // to the next comparison or the ordinal switch
                .expect_opcode(IFEQ)
                // ordinal
                .advance()
                .expect_var(ISTORE, "c");
            let store = m.matched()?;
            match method.insn(store + 1) {
                Some(Insn::Jump { opcode: GOTO, .. }) => {
                    m.expect_opcode(GOTO);
                    break;
                }
                Some(Insn::Label(label)) if *label == default => break,
                _ => {}
            }
        }
    }
    m.matched()
}

impl Filter for StringSwitchEcjFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "STRING_SWITCH_ECJ",
            name: "String switch (ecj)",
            description: "hashCode dispatch and equals chains of ecj string switches",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for (pos, insn) in method.instructions.iter().enumerate() {
            if insn.opcode() != Some(ASTORE) {
                continue;
            }
            let mut m = Matcher::at(method, pos);
            m.expect_var(ASTORE, "s")
                .expect_invoke(INVOKEVIRTUAL, STRING, "hashCode", "()I")
                .expect_switch();
            let Some(switch) = m.matched() else {
                continue;
            };
            let Some((default, buckets)) = hash_buckets(method, switch) else {
                continue;
            };
            let Some(default_target) = method.target(default) else {
                continue;
            };

            let mut replacements = Replacements::new();
            replacements.add(default_target, switch, 0);
            if let Some(end) =
                match_ecj_comparisons(&mut m, default, default_target, buckets, &mut replacements)
            {
                output.ignore(switch + 1, end);
                output.replace_branches(switch, replacements.into_groups());
            }
        }
        Ok(())
    }
}

fn match_ecj_comparisons(
    m: &mut Matcher<'_>,
    default: LabelId,
    default_target: usize,
    buckets: usize,
    replacements: &mut Replacements,
) -> Option<usize> {
    let method = m.method();
    for _ in 0..buckets {
        loop {
            m.expect_var(ALOAD, "s")
                .expect_opcode(LDC)
                .expect_invoke(INVOKEVIRTUAL, STRING, "equals", EQUALS_DESC)
                // to the case body
                .expect_opcode(IFNE);
            let jump = m.matched()?;
            let case = m.matched_insn().and_then(Insn::jump_label)?;
            replacements.add(method.target(case)?, jump, 1);
            match method.insn(jump + 1) {
                Some(Insn::Jump { opcode: GOTO, .. }) => {
                    m.expect_opcode(GOTO);
                    replacements.add(default_target, m.matched()?, 1);
                    break;
                }
                Some(Insn::Label(label)) if *label == default => {
                    replacements.add(default_target, jump, 0);
                    break;
                }
                _ => {}
            }
        }
    }
    m.matched()
}

/// Default label and number of distinct non-default targets of the switch at `pos`.
pub(crate) fn hash_buckets(method: &Method, pos: usize) -> Option<(LabelId, usize)> {
    let (default, labels) = method.insn(pos)?.switch_labels()?;
    let mut distinct: Vec<LabelId> = Vec::new();
    for label in labels {
        if *label != default && !distinct.contains(label) {
            distinct.push(*label);
        }
    }
    (!distinct.is_empty()).then_some((default, distinct.len()))
}
