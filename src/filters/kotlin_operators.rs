use std::collections::BTreeMap;

use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, is_kotlin_class};
use crate::ir::{Insn, LabelId, Method};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::{FilterOutput, Replacements};

const INTRINSICS: &str = "kotlin/jvm/internal/Intrinsics";

/// Filter for the uninitialized check in reads of `lateinit` properties.
pub struct KotlinLateinitFilter;

/// Filter for the null check of the `!!` operator.
pub struct KotlinNotNullOperatorFilter;

/// Filter for the null check of an unsafe `as` cast to a non-null type.
pub struct KotlinUnsafeCastOperatorFilter;

/// Filter for chains of `?.` safe calls sharing one null target.
///
/// Every `IFNULL` of a chain gets the same two groups: the value reached the
/// end of the chain, or some link was null.
pub struct KotlinSafeCallOperatorFilter;

impl Filter for KotlinLateinitFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_LATEINIT",
            name: "Kotlin lateinit",
            description: "Uninitialized-property checks of lateinit reads",
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
        for pos in jumps(method, IFNONNULL) {
            let mut m = Matcher::after(method, pos);
            m.expect_opcode(LDC).expect_invoke(
                INVOKESTATIC,
                INTRINSICS,
                "throwUninitializedPropertyAccessException",
                "(Ljava/lang/String;)V",
            );
            if let Some(end) = m.matched() {
                output.ignore(pos, end);
            }
        }
        Ok(())
    }
}

impl Filter for KotlinNotNullOperatorFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_NOT_NULL_OPERATOR",
            name: "Kotlin !! operator",
            description: "Null checks generated for the not-null assertion operator",
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
        for pos in jumps(method, IFNONNULL) {
            // throwNpe before Kotlin 1.4, throwJavaNpe since
            for thrower in ["throwNpe", "throwJavaNpe"] {
                let mut m = Matcher::after(method, pos);
                m.expect_invoke(INVOKESTATIC, INTRINSICS, thrower, "()V");
                if let Some(end) = m.matched() {
                    output.ignore(pos, end);
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Filter for KotlinUnsafeCastOperatorFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_UNSAFE_CAST_OPERATOR",
            name: "Kotlin unsafe cast",
            description: "Null checks generated for unsafe casts to non-null types",
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
        for pos in jumps(method, IFNONNULL) {
            // TypeCastException before Kotlin 1.4, NullPointerException since
            for exception in ["kotlin/TypeCastException", "java/lang/NullPointerException"] {
                let mut m = Matcher::after(method, pos);
                m.expect_type(NEW, exception)
                    .expect_opcode(DUP)
                    .expect(|insn| {
                        insn.string_constant()
                            .is_some_and(|message| message.starts_with("null cannot be cast to non-null type"))
                    })
                    .expect_invoke(INVOKESPECIAL, exception, "<init>", "(Ljava/lang/String;)V")
                    .expect_opcode(ATHROW);
                if let Some(end) = m.matched() {
                    output.ignore(pos, end);
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Filter for KotlinSafeCallOperatorFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_SAFE_CALL_OPERATOR",
            name: "Kotlin ?. operator",
            description: "Branches of safe-call chains",
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
        for chain in safe_call_chains(method) {
            let Some(&last) = chain.last() else {
                continue;
            };
            let Some(null_target) = method
                .insn(last)
                .and_then(Insn::jump_label)
                .and_then(|label| method.target(label))
            else {
                continue;
            };
            let mut replacements = Replacements::new();
            replacements.add(last, last, 0);
            replacements.add(null_target, null_target, 0);
            let groups = replacements.into_groups();
            for jump in chain {
                output.replace_branches(jump, groups.clone());
            }
        }
        Ok(())
    }
}

/// `IFNULL` jumps grouped by shared target, keeping only chains of at least
/// two jumps whose null target produces `null` in either compiled form.
fn safe_call_chains(method: &Method) -> Vec<Vec<usize>> {
    let mut chains: BTreeMap<LabelId, Vec<usize>> = BTreeMap::new();
    for pos in jumps(method, IFNULL) {
        if let Some(label) = method.insn(pos).and_then(Insn::jump_label) {
            chains.entry(label).or_default().push(pos);
        }
    }
    chains
        .into_iter()
        .filter(|(label, chain)| chain.len() > 1 && is_safe_call_chain(method, *label, chain))
        .map(|(_, chain)| chain)
        .collect()
}

fn is_safe_call_chain(method: &Method, label: LabelId, chain: &[usize]) -> bool {
    let Some(label_pos) = method.resolve(label) else {
        return false;
    };
    if chain.iter().any(|&jump| jump > label_pos) {
        return false;
    }
    let before_label = method.previous_opcode(label_pos).and_then(|pos| method.opcode_at(pos));
    if before_label != Some(GOTO) {
        return false;
    }
    let preceding = |jump: usize| method.previous_opcode(jump).and_then(|pos| method.opcode_at(pos));

    let mut optimized = Matcher::at(method, label_pos);
    optimized.expect_opcode(POP).expect_opcode(ACONST_NULL);
    if optimized.is_active() {
        return chain.iter().all(|&jump| preceding(jump) == Some(DUP));
    }
    let mut unoptimized = Matcher::at(method, label_pos);
    unoptimized.expect_opcode(ACONST_NULL);
    unoptimized.is_active() && chain.iter().all(|&jump| preceding(jump) == Some(ALOAD))
}

fn jumps(method: &Method, opcode: u8) -> Vec<usize> {
    method
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| matches!(insn, Insn::Jump { opcode: actual, .. } if *actual == opcode))
        .map(|(pos, _)| pos)
        .collect()
}
