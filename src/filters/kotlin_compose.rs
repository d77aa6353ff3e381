use std::collections::{HashSet, VecDeque};

use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, is_kotlin_class};
use crate::ir::{Insn, Method};
use crate::opcodes::*;
use crate::output::FilterOutput;

const COMPOSABLE_DESC: &str = "Landroidx/compose/runtime/Composable;";
const COMPOSE_RUNTIME: &str = "androidx/compose/runtime/";
const SCOPE_UPDATE_SCOPE: &str = "androidx/compose/runtime/ScopeUpdateScope";
const INTRINSICS: &str = "kotlin/jvm/internal/Intrinsics";

/// Filter for the bookkeeping the Compose compiler plugin weaves into
/// `@Composable` functions (restart groups, change tracking, skipping).
///
/// Every labeled group that only talks to the Compose runtime is ignored,
/// together with the groups reachable through its jumps.
pub struct KotlinComposeFilter;

impl Filter for KotlinComposeFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_COMPOSE",
            name: "Jetpack Compose",
            description: "Compose runtime bookkeeping inside @Composable functions",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_kotlin_class(context) || !method.has_invisible_annotation(COMPOSABLE_DESC) {
            return Ok(());
        }
        let mut groups = Groups {
            method,
            output,
            ignored: HashSet::new(),
        };
        for (pos, insn) in method.instructions.iter().enumerate() {
            if insn.opcode() == Some(INVOKEINTERFACE) && is_compose_runtime(insn) {
                groups.ignore_from_invocation(pos);
            }
        }
        Ok(())
    }
}

/// A labeled group is the run of entries between two labels.
struct Groups<'a> {
    method: &'a Method,
    output: &'a mut dyn FilterOutput,
    /// Positions of the labels opening ignored groups.
    ignored: HashSet<usize>,
}

impl Groups<'_> {
    fn ignore_from_invocation(&mut self, invoke: usize) {
        let mut jumps = VecDeque::new();
        let mut queued = HashSet::new();
        self.ignore_group(invoke, &mut jumps, &mut queued);
        while let Some(jump) = jumps.pop_front() {
            let Some(label_pos) = self
                .method
                .insn(jump)
                .and_then(Insn::jump_label)
                .and_then(|label| self.method.resolve(label))
            else {
                continue;
            };
            if self.ignored.contains(&label_pos) || label_pos + 1 >= self.method.len() {
                continue;
            }
            self.ignore_group(label_pos + 1, &mut jumps, &mut queued);
        }
    }

    /// Ignores the group around `start` when it makes no call of its own,
    /// then the group holding the jump that enters it.
    fn ignore_group(
        &mut self,
        start: usize,
        jumps: &mut VecDeque<usize>,
        queued: &mut HashSet<usize>,
    ) {
        let method = self.method;
        let mut members = Vec::new();

        let mut label = None;
        for pos in (0..start).rev() {
            if matches!(method.insn(pos), Some(Insn::Label(_))) {
                label = Some(pos);
                break;
            }
            members.push(pos);
        }
        if label.is_some_and(|label| self.ignored.contains(&label)) {
            return;
        }

        let mut last = start;
        for pos in start + 1..method.len() {
            if matches!(method.insn(pos), Some(Insn::Label(_))) {
                break;
            }
            members.push(pos);
            last = pos;
        }
        members.push(start);

        for &pos in &members {
            if method.insn(pos).and_then(Insn::jump_label).is_some() && queued.insert(pos) {
                jumps.push_back(pos);
            }
        }
        if calls_user_code(method, &members) {
            return;
        }

        match label {
            Some(label) => {
                self.output.ignore(label, last);
                self.ignored.insert(label);
                if let Some(entry) = jump_into(method, label) {
                    self.ignore_group(entry, jumps, queued);
                }
            }
            None => self.output.ignore(0, last),
        }
    }
}

/// True when the group calls anything besides the Compose runtime and the
/// Kotlin intrinsics, unless it updates the restart scope.
fn calls_user_code(method: &Method, members: &[usize]) -> bool {
    let mut user_code = false;
    for insn in members.iter().filter_map(|&pos| method.insn(pos)) {
        let Insn::Method { owner, .. } = insn else {
            continue;
        };
        if owner == SCOPE_UPDATE_SCOPE {
            return false;
        }
        user_code |= !is_compose_runtime(insn) && owner != INTRINSICS;
    }
    user_code
}

fn is_compose_runtime(insn: &Insn) -> bool {
    matches!(insn, Insn::Method { owner, .. } if owner.starts_with(COMPOSE_RUNTIME))
}

/// Closest jump before `label_pos` targeting that label.
fn jump_into(method: &Method, label_pos: usize) -> Option<usize> {
    let Some(Insn::Label(label)) = method.insn(label_pos) else {
        return None;
    };
    (0..label_pos)
        .rev()
        .find(|&pos| method.insn(pos).and_then(Insn::jump_label) == Some(*label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::filters::testing::{assert_no_output, java_context, kotlin_context, ranges, run};
    use crate::ir::Constant;

    const COMPOSER: &str = "androidx/compose/runtime/Composer";

    /// `@Composable fun Example() { user() }`
    fn composable(annotated: bool) -> (Method, Vec<(usize, usize)>) {
        let mut b = MethodBuilder::new("Example", "(Landroidx/compose/runtime/Composer;I)V");
        if annotated {
            b.visit_annotation(COMPOSABLE_DESC, false);
        }
        let (start, user, end, skip, exit) =
            (b.new_label(), b.new_label(), b.new_label(), b.new_label(), b.new_label());
        let mut expected = Vec::new();

        let start_pos = b.position();
        b.visit_label(start);
        b.visit_var_insn(ALOAD, 0);
        b.visit_ldc_insn(Constant::Int(1_234));
        b.visit_method_insn(
            INVOKEINTERFACE,
            COMPOSER,
            "startRestartGroup",
            "(I)Landroidx/compose/runtime/Composer;",
            true,
        );
        let store = b.position();
        b.visit_var_insn(ASTORE, 0);
        expected.push((start_pos, store));

        b.visit_label(user);
        b.visit_method_insn(INVOKESTATIC, "ExampleKt", "user", "()V", false);

        let end_pos = b.position();
        b.visit_label(end);
        b.visit_var_insn(ALOAD, 0);
        b.visit_method_insn(
            INVOKEINTERFACE,
            COMPOSER,
            "endRestartGroup",
            "()Landroidx/compose/runtime/ScopeUpdateScope;",
            true,
        );
        b.visit_insn(DUP);
        b.visit_jump_insn(IFNULL, skip);
        b.visit_type_insn(NEW, "ExampleKt$Example$1");
        b.visit_insn(DUP);
        b.visit_var_insn(ILOAD, 1);
        b.visit_method_insn(INVOKESPECIAL, "ExampleKt$Example$1", "<init>", "(I)V", false);
        b.visit_type_insn(CHECKCAST, "kotlin/jvm/functions/Function2");
        b.visit_method_insn(
            INVOKEINTERFACE,
            SCOPE_UPDATE_SCOPE,
            "updateScope",
            "(Lkotlin/jvm/functions/Function2;)V",
            true,
        );
        let update = b.position();
        b.visit_jump_insn(GOTO, exit);
        expected.push((end_pos, update));

        let skip_pos = b.position();
        b.visit_label(skip);
        let pop = b.position();
        b.visit_insn(POP);
        expected.push((skip_pos, pop));

        // reached only from the restart group
        let exit_pos = b.position();
        b.visit_label(exit);
        b.visit_insn(RETURN);
        expected.push((exit_pos, exit_pos + 1));
        (b.build().expect("build method"), expected)
    }

    #[test]
    fn runtime_groups_are_ignored() {
        let (method, expected) = composable(true);
        let report = run(&KotlinComposeFilter, &method, &kotlin_context());
        assert_eq!(expected, ranges(&report));
    }

    #[test]
    fn requires_composable_kotlin_function() {
        let (method, _) = composable(false);
        assert_no_output(&run(&KotlinComposeFilter, &method, &kotlin_context()));

        let (method, _) = composable(true);
        assert_no_output(&run(&KotlinComposeFilter, &method, &java_context()));
    }

    #[test]
    fn group_calling_user_code_is_kept() {
        let mut b = MethodBuilder::new("Example", "(Landroidx/compose/runtime/Composer;I)V");
        b.visit_annotation(COMPOSABLE_DESC, false);
        let start = b.new_label();
        b.visit_label(start);
        b.visit_var_insn(ALOAD, 0);
        b.visit_method_insn(INVOKEINTERFACE, COMPOSER, "getSkipping", "()Z", true);
        b.visit_insn(POP);
        b.visit_method_insn(INVOKESTATIC, "ExampleKt", "user", "()V", false);
        b.visit_insn(RETURN);
        let method = b.build().expect("build method");

        assert_no_output(&run(&KotlinComposeFilter, &method, &kotlin_context()));
    }
}
