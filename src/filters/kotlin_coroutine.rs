use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, is_kotlin_class};
use crate::ir::{Insn, Method};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::FilterOutput;

const RESULT_FAILURE: &str = "kotlin/Result$Failure";
const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
const RESUME_BEFORE_INVOKE: &str = "call to 'resume' before 'invoke' with coroutine";

/// Filter for the state machine Kotlin compiles `suspend` lambdas and
/// functions into.
///
/// `invokeSuspend` dispatches on the label field, rethrows failures of the
/// previous step and returns early when a call suspends. None of that is
/// written by the user.
pub struct KotlinCoroutineFilter;

impl Filter for KotlinCoroutineFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_COROUTINE",
            name: "Kotlin coroutines",
            description: "State machine dispatch and suspension checks of invokeSuspend",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !is_kotlin_class(context) || method.name != "invokeSuspend" {
            return Ok(());
        }

        let mut m = Matcher::new(method);
        m.expect_invoke(
            INVOKESTATIC,
            "kotlin/coroutines/intrinsics/IntrinsicsKt",
            "getCOROUTINE_SUSPENDED",
            "()Ljava/lang/Object;",
        )
        .expect_var(ASTORE, "suspended")
        .expect_var(ALOAD, "this")
        .expect_opcode(GETFIELD)
        .expect_opcode(TABLESWITCH);
        let Some(switch) = m.matched() else {
            return Ok(());
        };
        let Some(Insn::TableSwitch { default, labels, .. }) = method.insn(switch) else {
            return Ok(());
        };
        let base = m.clone();
        expect_rethrow_failure(&mut m);
        let Some(end) = m.matched() else {
            return Ok(());
        };

        let mut ranges = vec![(switch, end)];
        for pos in 0..method.len() {
            let mut resume = base.clone();
            resume
                .move_after(pos)
                .expect_var(ALOAD, "suspended")
                .expect_opcode(IF_ACMPNE)
                .expect_var(ALOAD, "suspended")
                .expect_opcode(ARETURN);
            expect_rethrow_failure(&mut resume);
            resume.expect_opcode(ALOAD);
            if let Some(end) = resume.matched() {
                ranges.push((pos, end));
            }
        }
        if ranges.len() != labels.len() {
            return Ok(());
        }

        let Some(default_pos) = method.resolve(*default) else {
            return Ok(());
        };
        let mut unreachable = Matcher::at(method, default_pos);
        unreachable
            .expect_type(NEW, ILLEGAL_STATE)
            .expect_opcode(DUP)
            .expect_ldc_string(RESUME_BEFORE_INVOKE)
            .expect_invoke(INVOKESPECIAL, ILLEGAL_STATE, "<init>", "(Ljava/lang/String;)V")
            .expect_opcode(ATHROW);
        let Some(athrow) = unreachable.matched() else {
            return Ok(());
        };

        output.ignore(default_pos, athrow);
        for (from, to) in ranges {
            output.ignore(from, to);
        }
        Ok(())
    }
}

/// `ALOAD result; DUP; INSTANCEOF Result$Failure; IFEQ; CHECKCAST; GETFIELD; ATHROW; POP`
fn expect_rethrow_failure(m: &mut Matcher<'_>) {
    m.expect_opcode(ALOAD)
        .expect_opcode(DUP)
        .expect_type(INSTANCEOF, RESULT_FAILURE)
        .expect_opcode(IFEQ)
        .expect_type(CHECKCAST, RESULT_FAILURE)
        .expect_opcode(GETFIELD)
        .expect_opcode(ATHROW)
        .expect_opcode(POP);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::filters::testing::{assert_no_output, java_context, kotlin_context, ranges, run};
    use crate::ir::{Constant, LabelId};

    fn rethrow_failure(b: &mut MethodBuilder) -> usize {
        let ok = b.new_label();
        b.visit_var_insn(ALOAD, 1);
        b.visit_insn(DUP);
        b.visit_type_insn(INSTANCEOF, RESULT_FAILURE);
        b.visit_jump_insn(IFEQ, ok);
        b.visit_type_insn(CHECKCAST, RESULT_FAILURE);
        b.visit_field_insn(GETFIELD, RESULT_FAILURE, "exception", "Ljava/lang/Throwable;");
        b.visit_insn(ATHROW);
        b.visit_label(ok);
        let pop = b.position();
        b.visit_insn(POP);
        pop
    }

    /// `suspend { delay(); nop() }` compiled into its lambda class.
    fn invoke_suspend(message: &str) -> (Method, Vec<(usize, usize)>) {
        let mut b = MethodBuilder::new("invokeSuspend", "(Ljava/lang/Object;)Ljava/lang/Object;");
        let (state0, state1, default) = (b.new_label(), b.new_label(), b.new_label());
        let resumed = b.new_label();
        let mut expected = Vec::new();

        b.visit_method_insn(
            INVOKESTATIC,
            "kotlin/coroutines/intrinsics/IntrinsicsKt",
            "getCOROUTINE_SUSPENDED",
            "()Ljava/lang/Object;",
            false,
        );
        b.visit_var_insn(ASTORE, 2);
        b.visit_var_insn(ALOAD, 0);
        b.visit_field_insn(GETFIELD, "Example$1", "label", "I");
        let switch = b.position();
        b.visit_table_switch_insn(0, 1, default, vec![state0, state1]);

        b.visit_label(state0);
        let pop = rethrow_failure(&mut b);
        expected.push((switch, pop));
        b.visit_var_insn(ALOAD, 0);
        b.visit_insn(ICONST_1);
        b.visit_field_insn(PUTFIELD, "Example$1", "label", "I");
        let call = b.position();
        b.visit_method_insn(INVOKESTATIC, "ExampleKt", "delay", "(Lkotlin/coroutines/Continuation;)Ljava/lang/Object;", false);
        b.visit_insn(DUP);
        b.visit_var_insn(ALOAD, 2);
        b.visit_jump_insn(IF_ACMPNE, resumed);
        b.visit_var_insn(ALOAD, 2);
        b.visit_insn(ARETURN);

        b.visit_label(state1);
        rethrow_failure(&mut b);
        let load = b.position();
        b.visit_var_insn(ALOAD, 1);
        expected.push((call + 1, load));

        b.visit_label(resumed);
        b.visit_insn(POP);
        b.visit_method_insn(INVOKESTATIC, "ExampleKt", "nop", "()V", false);
        b.visit_field_insn(GETSTATIC, "kotlin/Unit", "INSTANCE", "Lkotlin/Unit;");
        b.visit_insn(ARETURN);

        let default_pos = b.position();
        b.visit_label(default);
        b.visit_type_insn(NEW, ILLEGAL_STATE);
        b.visit_insn(DUP);
        b.visit_ldc_insn(Constant::String(message.to_string()));
        b.visit_method_insn(INVOKESPECIAL, ILLEGAL_STATE, "<init>", "(Ljava/lang/String;)V", false);
        let athrow = b.position();
        b.visit_insn(ATHROW);
        expected.insert(0, (default_pos, athrow));

        (b.build().expect("build method"), expected)
    }

    #[test]
    fn state_machine_is_ignored() {
        let (method, expected) = invoke_suspend(RESUME_BEFORE_INVOKE);
        let report = run(&KotlinCoroutineFilter, &method, &kotlin_context());
        assert_eq!(expected, ranges(&report));
    }

    #[test]
    fn other_default_message_is_kept() {
        let (method, _) = invoke_suspend("unexpected state");
        assert_no_output(&run(&KotlinCoroutineFilter, &method, &kotlin_context()));
    }

    #[test]
    fn java_class_is_kept() {
        let (method, _) = invoke_suspend(RESUME_BEFORE_INVOKE);
        assert_no_output(&run(&KotlinCoroutineFilter, &method, &java_context()));
    }

    #[test]
    fn missing_suspension_point_is_kept() {
        let mut b = MethodBuilder::new("invokeSuspend", "(Ljava/lang/Object;)Ljava/lang/Object;");
        let (state0, state1, default): (LabelId, LabelId, LabelId) =
            (b.new_label(), b.new_label(), b.new_label());
        b.visit_method_insn(
            INVOKESTATIC,
            "kotlin/coroutines/intrinsics/IntrinsicsKt",
            "getCOROUTINE_SUSPENDED",
            "()Ljava/lang/Object;",
            false,
        );
        b.visit_var_insn(ASTORE, 2);
        b.visit_var_insn(ALOAD, 0);
        b.visit_field_insn(GETFIELD, "Example$1", "label", "I");
        b.visit_table_switch_insn(0, 1, default, vec![state0, state1]);
        b.visit_label(state0);
        rethrow_failure(&mut b);
        b.visit_label(state1);
        b.visit_insn(ACONST_NULL);
        b.visit_insn(ARETURN);
        b.visit_label(default);
        b.visit_insn(ACONST_NULL);
        b.visit_insn(ARETURN);
        let method = b.build().expect("build method");

        assert_no_output(&run(&KotlinCoroutineFilter, &method, &kotlin_context()));
    }
}
