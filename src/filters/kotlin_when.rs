use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::string_switch::hash_buckets;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::{Insn, Method};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::{FilterOutput, Replacements};

const NO_WHEN_BRANCH_MATCHED: &str = "kotlin/NoWhenBranchMatchedException";

/// Filter for the implicit `else` Kotlin adds to exhaustive `when`
/// expressions, which only throws `NoWhenBranchMatchedException`.
pub struct KotlinWhenFilter;

/// Filter for Kotlin's lowering of `when` on strings into a `hashCode`
/// switch followed by `equals` chains.
pub struct KotlinWhenStringFilter;

impl Filter for KotlinWhenFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_WHEN",
            name: "Kotlin when",
            description: "Implicit else branches of exhaustive when expressions",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for (pos, insn) in method.instructions.iter().enumerate() {
            let Insn::Label(label) = insn else {
                continue;
            };
            let mut m = Matcher::at(method, pos);
            m.expect_type(NEW, NO_WHEN_BRANCH_MATCHED)
                .expect_opcode(DUP)
                .expect_invoke(INVOKESPECIAL, NO_WHEN_BRANCH_MATCHED, "<init>", "()V")
                .expect_opcode(ATHROW);
            let Some(end) = m.matched() else {
                continue;
            };

            for source in (0..pos).rev() {
                let Some(candidate) = method.insn(source) else {
                    continue;
                };
                // exhaustive `when` reaches the arm only through IFEQ
                if candidate.opcode() == Some(IFEQ) && candidate.jump_label() == Some(*label) {
                    output.ignore(source, source);
                    output.ignore(pos, end);
                    break;
                }
                if candidate.switch_labels().is_some_and(|(default, _)| default == *label) {
                    output.replace_branches(source, Replacements::ignore_default_branch(method, source));
                    output.ignore(pos, end);
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Filter for KotlinWhenStringFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_WHEN_STRING",
            name: "Kotlin when on strings",
            description: "hashCode dispatch and equals chains of Kotlin when on strings",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for (pos, insn) in method.instructions.iter().enumerate() {
            if insn.opcode() != Some(ALOAD) {
                continue;
            }
            let mut m = Matcher::at(method, pos);
            m.expect_var(ALOAD, "s")
                .expect_invoke(INVOKEVIRTUAL, "java/lang/String", "hashCode", "()I")
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
            let mut complete = true;
            'buckets: for _ in 0..buckets {
                loop {
                    m.expect_var(ALOAD, "s")
                        .expect_opcode(LDC)
                        .expect_invoke(INVOKEVIRTUAL, "java/lang/String", "equals", "(Ljava/lang/Object;)Z")
                        // to the next comparison or the default case
                        .expect_opcode(IFEQ);
                    let jump = m.matched();
                    let next_comparison = m.matched_insn().and_then(Insn::jump_label);
                    // to the case body
                    m.expect_opcode(GOTO);
                    let goto = m.matched();
                    let (Some(jump), Some(next_comparison), Some(goto)) = (jump, next_comparison, goto)
                    else {
                        complete = false;
                        break 'buckets;
                    };
                    let Some(case) = m
                        .matched_insn()
                        .and_then(Insn::jump_label)
                        .and_then(|label| method.target(label))
                    else {
                        complete = false;
                        break 'buckets;
                    };
                    replacements.add(case, goto, 1);
                    if next_comparison == default {
                        replacements.add(default_target, jump, 1);
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            if let Some(end) = m.matched() {
                output.ignore(switch + 1, end);
                output.replace_branches(switch, replacements.into_groups());
            }
        }
        Ok(())
    }
}
