use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::Method;
use crate::matcher::{ANY, Matcher};
use crate::opcodes::*;
use crate::output::FilterOutput;

const THROWABLE: &str = "java/lang/Throwable";
const CLOSE_RESOURCE_DESC: &str = "(Ljava/lang/Throwable;Ljava/lang/AutoCloseable;)V";

/// Filter for the resource closing code javac 7 to 10 generates for
/// try-with-resources.
pub struct TryWithResourcesJavacFilter;

/// Filter for the resource closing code javac 11 and later generates for
/// try-with-resources.
pub struct TryWithResourcesJavac11Filter;

/// Filter for the resource closing code ecj generates for try-with-resources.
pub struct TryWithResourcesEcjFilter;

/// Shapes of the close sequence across javac versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JavacPattern {
    /// javac 9+: `$closeResource(primaryExc, r)` without a null check.
    Optimal,
    /// javac 7/8: null check and inlined suppression logic.
    Full,
    /// javac 7/8 for resources known to be non-null.
    OmittedNullCheck,
    /// javac 9+: null check followed by `$closeResource(primaryExc, r)`.
    CloseResourceMethod,
}

const JAVAC_PATTERNS: [JavacPattern; 4] = [
    JavacPattern::Optimal,
    JavacPattern::Full,
    JavacPattern::OmittedNullCheck,
    JavacPattern::CloseResourceMethod,
];

impl Filter for TryWithResourcesJavacFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "TRY_WITH_RESOURCES_JAVAC",
            name: "Try-with-resources (javac)",
            description: "Resource closing and suppression code generated by javac before 11",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for block in &method.try_catch_blocks {
            if block.exception_type.as_deref() != Some(THROWABLE) {
                continue;
            }
            let Some(handler) = method.resolve(block.handler) else {
                continue;
            };
            for pattern in JAVAC_PATTERNS {
                if match_javac(method, handler, pattern, output) {
                    break;
                }
            }
        }
        Ok(())
    }
}

fn match_javac(
    method: &Method,
    handler: usize,
    pattern: JavacPattern,
    output: &mut dyn FilterOutput,
) -> bool {
    let mut m = Matcher::at(method, handler);
    // catch (Throwable t) { primaryExc = t; throw t; }
    m.expect_var(ASTORE, "t1")
        .expect_var(ALOAD, "t1")
        .expect_var(ASTORE, "primaryExc")
        .expect_var(ALOAD, "t1")
        .expect_opcode(ATHROW);
    // catch (any t) { close; throw t; }
    m.expect_var(ASTORE, "t2");
    javac_close(&mut m, pattern, "e");
    m.expect_var(ALOAD, "t2").expect_opcode(ATHROW);
    let Some(end) = m.matched() else {
        return false;
    };

    let Some((start, found)) = search_backward(&m, handler, |m| javac_close(m, pattern, "n")) else {
        return false;
    };
    let Some(close_end) = found.matched() else {
        return false;
    };
    let last = trailing_goto(method, close_end).unwrap_or(close_end);

    output.ignore(start, last);
    output.ignore(handler, end);
    true
}

fn javac_close(m: &mut Matcher<'_>, pattern: JavacPattern, ctx: &str) -> bool {
    if matches!(pattern, JavacPattern::Full | JavacPattern::CloseResourceMethod) {
        // if (r != null)
        m.expect_var(ALOAD, "r").expect_opcode(IFNULL);
    }
    match pattern {
        JavacPattern::Optimal | JavacPattern::CloseResourceMethod => {
            m.expect_var(ALOAD, "primaryExc")
                .expect_var(ALOAD, "r")
                .expect_invoke(INVOKESTATIC, ANY, "$closeResource", CLOSE_RESOURCE_DESC);
        }
        JavacPattern::Full | JavacPattern::OmittedNullCheck => {
            let suppressed = format!("{ctx}t");
            m.expect_var(ALOAD, "primaryExc").expect_opcode(IFNULL);
            close(m, "r");
            m.expect_opcode(GOTO)
                .expect_var(ASTORE, &suppressed)
                .expect_var(ALOAD, "primaryExc")
                .expect_var(ALOAD, &suppressed);
            add_suppressed(m);
            m.expect_opcode(GOTO);
            close(m, "r");
        }
    }
    m.is_active()
}

impl Filter for TryWithResourcesJavac11Filter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "TRY_WITH_RESOURCES_JAVAC11",
            name: "Try-with-resources (javac 11+)",
            description: "Resource closing and suppression code generated by javac 11 and later",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for block in &method.try_catch_blocks {
            if block.exception_type.as_deref() != Some(THROWABLE) {
                continue;
            }
            let Some(handler) = method.resolve(block.handler) else {
                continue;
            };
            match_javac11(method, handler, true, output);
            match_javac11(method, handler, false, output);
        }
        Ok(())
    }
}

fn match_javac11(method: &Method, handler: usize, with_null_check: bool, output: &mut dyn FilterOutput) {
    let mut m = Matcher::at(method, handler);
    m.expect_var(ASTORE, "primaryExc");
    javac11_close(&mut m, with_null_check);
    m.expect_opcode(GOTO)
        .expect_var(ASTORE, "t")
        .expect_var(ALOAD, "primaryExc")
        .expect_var(ALOAD, "t");
    m.expect_invoke(INVOKEVIRTUAL, THROWABLE, "addSuppressed", "(Ljava/lang/Throwable;)V");
    m.expect_var(ALOAD, "primaryExc").expect_opcode(ATHROW);
    let Some(end) = m.matched() else {
        return;
    };

    let Some((start, found)) = search_backward(&m, handler, |m| javac11_close(m, with_null_check)) else {
        return;
    };
    let Some(close_end) = found.matched() else {
        return;
    };
    let last = trailing_goto(method, close_end).unwrap_or(close_end);

    output.ignore(start, last);
    output.ignore(handler, end);
}

fn javac11_close(m: &mut Matcher<'_>, with_null_check: bool) -> bool {
    if with_null_check {
        m.expect_var(ALOAD, "r").expect_opcode(IFNULL);
    }
    close(m, "r");
    m.is_active()
}

impl Filter for TryWithResourcesEcjFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "TRY_WITH_RESOURCES_ECJ",
            name: "Try-with-resources (ecj)",
            description: "Resource closing and suppression code generated by the Eclipse compiler",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for block in &method.try_catch_blocks {
            if block.exception_type.is_some() {
                continue;
            }
            let Some(handler) = method.resolve(block.handler) else {
                continue;
            };
            if !match_ecj(method, handler, output) {
                match_ecj_no_flow_out(method, handler, output);
            }
        }
        Ok(())
    }
}

/// Resources closed in a chain that continues after the statement.
fn match_ecj(method: &Method, handler: usize, output: &mut dyn FilterOutput) -> bool {
    let mut m = Matcher::at(method, handler);
    m.expect_var(ASTORE, "primaryExc");
    if !ecj_close_and_throw(&mut m, "r0") {
        return false;
    }

    let mut resources = 1;
    loop {
        let name = format!("r{resources}");
        let mut attempt = m.clone();
        if !ecj_close(&mut attempt, &name) {
            break;
        }
        attempt.expect_jump(GOTO, &format!("{name}.end"));
        if !ecj_suppress(&mut attempt, &name) || !ecj_close_and_throw(&mut attempt, &name) {
            return false;
        }
        m = attempt;
        resources += 1;
    }

    if !ecj_suppress(&mut m, "last") {
        return false;
    }
    m.expect_var(ALOAD, "primaryExc").expect_opcode(ATHROW);
    let Some(end) = m.matched() else {
        return false;
    };

    let Some((start, mut found)) = search_backward(&m, handler, |m| ecj_close(m, "r0")) else {
        return false;
    };
    found.expect_opcode(GOTO);
    let Some(goto) = found.matched() else {
        return false;
    };

    output.ignore(start, goto);
    output.ignore(handler + 1, end);
    true
}

/// Resources closed in a chain ending in a return or throw.
fn match_ecj_no_flow_out(method: &Method, handler: usize, output: &mut dyn FilterOutput) -> bool {
    let mut m = Matcher::at(method, handler);
    m.expect_var(ASTORE, "primaryExc");
    if m.is_failed() {
        return false;
    }

    let mut resources = 0;
    loop {
        let name = format!("r{resources}");
        let mut attempt = m.clone();
        if !ecj_close_and_throw(&mut attempt, &name) || !ecj_suppress(&mut attempt, &name) {
            break;
        }
        m = attempt;
        resources += 1;
    }

    m.expect_var(ALOAD, "primaryExc").expect_opcode(ATHROW);
    let Some(end) = m.matched() else {
        return false;
    };

    let Some((start, mut found)) = search_backward(&m, handler, |m| ecj_close(m, "r0")) else {
        return false;
    };
    for index in 1..resources {
        if !ecj_close(&mut found, &format!("r{index}")) {
            return false;
        }
    }
    let Some(last) = found.matched() else {
        return false;
    };

    output.ignore(start, last);
    output.ignore(handler, end);
    true
}

fn ecj_close(m: &mut Matcher<'_>, name: &str) -> bool {
    m.expect_var(ALOAD, name).expect_jump(IFNULL, &format!("{name}.end"));
    close(m, name);
    m.is_active()
}

fn ecj_close_and_throw(m: &mut Matcher<'_>, name: &str) -> bool {
    m.expect_var(ALOAD, name).expect_jump(IFNULL, name);
    close(m, name);
    m.expect_label(name)
        .expect_var(ALOAD, "primaryExc")
        .expect_opcode(ATHROW);
    m.is_active()
}

fn ecj_suppress(m: &mut Matcher<'_>, name: &str) -> bool {
    let suppressed = format!("{name}.t");
    let suppress_start = format!("{name}.suppressStart");
    let suppress_end = format!("{name}.suppressEnd");
    m.expect_var(ASTORE, &suppressed)
        .expect_var(ALOAD, "primaryExc")
        .expect_jump(IFNONNULL, &suppress_start)
        .expect_var(ALOAD, &suppressed)
        .expect_var(ASTORE, "primaryExc")
        .expect_jump(GOTO, &suppress_end)
        .expect_label(&suppress_start)
        .expect_var(ALOAD, "primaryExc")
        .expect_var(ALOAD, &suppressed)
        .expect_jump(IF_ACMPEQ, &suppress_end)
        .expect_var(ALOAD, "primaryExc")
        .expect_var(ALOAD, &suppressed);
    add_suppressed(m);
    m.expect_label(&suppress_end);
    m.is_active()
}

/// `r.close()` through an interface or virtual call on a consistent owner.
fn close(m: &mut Matcher<'_>, name: &str) {
    m.expect_var(ALOAD, name)
        .expect_invoke_bound(&[INVOKEINTERFACE, INVOKEVIRTUAL], name, "close", "()V");
}

fn add_suppressed(m: &mut Matcher<'_>) {
    m.expect_invoke(INVOKEVIRTUAL, THROWABLE, "addSuppressed", ANY);
}

/// Walks start positions from `from` down to the method entry and returns
/// the first one where `attempt` matches, together with the matcher state
/// after the match. Each attempt starts from the bindings in `base`.
fn search_backward<'m>(
    base: &Matcher<'m>,
    from: usize,
    mut attempt: impl FnMut(&mut Matcher<'m>) -> bool,
) -> Option<(usize, Matcher<'m>)> {
    (0..=from).rev().find_map(|pos| {
        let mut m = base.clone();
        m.move_to(pos);
        attempt(&mut m).then_some((pos, m))
    })
}

fn trailing_goto(method: &Method, pos: usize) -> Option<usize> {
    method
        .next_opcode(pos)
        .filter(|next| method.opcode_at(*next) == Some(GOTO))
}
