use std::collections::HashSet;

use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::{Insn, Method, TryCatchBlock};
use crate::opcodes::*;
use crate::output::FilterOutput;

/// Filter for the copies of a `finally` body that compilers inline on every
/// exit path.
///
/// Each copy on a normal path is merged with the copy in the catch-any
/// handler, and the handler's store/reload/rethrow plumbing is ignored.
pub struct FinallyFilter;

impl Filter for FinallyFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "FINALLY",
            name: "Finally blocks",
            description: "Duplicated finally bodies on normal and exceptional paths",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for (index, block) in method.try_catch_blocks.iter().enumerate() {
            if block.exception_type.is_none() {
                filter_finally(method, index, block, output);
            }
        }
        Ok(())
    }
}

/// Copy of the handler's finally body found at `n`, ready to report.
struct Duplicate {
    store: usize,
    pairs: Vec<(usize, usize)>,
    reload: usize,
    rethrow: usize,
    trailing_goto: Option<usize>,
}

fn filter_finally(
    method: &Method,
    finally_index: usize,
    finally: &TryCatchBlock,
    output: &mut dyn FilterOutput,
) {
    let Some(e) = method
        .resolve(finally.handler)
        .and_then(|handler| method.next_opcode(handler))
    else {
        return;
    };
    let size = handler_size(method, e);
    if size == 0 {
        return;
    }

    let mut inside = HashSet::new();
    for block in &method.try_catch_blocks {
        if block.handler == finally.handler {
            if let (Some(start), Some(end)) = (method.resolve(block.start), method.resolve(block.end)) {
                inside.extend(start..end);
            }
        }
    }

    for (index, block) in method.try_catch_blocks.iter().enumerate() {
        if block.handler == finally.handler {
            let (Some(start), Some(end)) = (method.resolve(block.start), method.resolve(block.end))
            else {
                continue;
            };
            let mut continues = false;
            for pos in start..end {
                let insn = &method.instructions[pos];
                let Some(opcode) = insn.opcode() else {
                    continue;
                };
                if let Insn::Jump { label, .. } = insn {
                    if let Some(target) = method.resolve(*label).and_then(|l| method.next_opcode(l)) {
                        if !inside.contains(&target) {
                            report(method, size, e, target, output);
                        }
                    }
                    continues = opcode != GOTO;
                } else {
                    continues = !is_exit(opcode);
                }
            }
            if let Some(after) = method.next_opcode(end) {
                if continues && !inside.contains(&after) {
                    report(method, size, e, after, output);
                }
            }
        }

        if index != finally_index && block.start == finally.start && block.end == finally.end {
            // javac's empty catch: the copy follows the handler's ASTORE
            let copy = method
                .resolve(block.handler)
                .and_then(|handler| method.next_opcode(handler))
                .and_then(|store| method.next_opcode(store));
            if let Some(copy) = copy {
                if !inside.contains(&copy) {
                    report(method, size, e, copy, output);
                }
            }
        }
    }
}

fn report(method: &Method, size: usize, e: usize, n: usize, output: &mut dyn FilterOutput) {
    let Some(duplicate) = duplicate(method, size, e, n) else {
        return;
    };
    output.ignore(duplicate.store, duplicate.store);
    for (handler_copy, copy) in duplicate.pairs {
        output.merge(handler_copy, copy);
    }
    output.ignore(duplicate.reload, duplicate.rethrow);
    if let Some(goto) = duplicate.trailing_goto {
        output.ignore(goto, goto);
    }
}

/// Compares the `size` instructions after the handler's `ASTORE` at `e` with
/// the ones starting at `n`.
fn duplicate(method: &Method, size: usize, e: usize, n: usize) -> Option<Duplicate> {
    let mut pairs = Vec::with_capacity(size);
    let mut handler_copy = method.next_opcode(e)?;
    let mut copy = Some(n);
    for _ in 0..size {
        let current = copy?;
        if method.opcode_at(handler_copy) != method.opcode_at(current) {
            return None;
        }
        pairs.push((handler_copy, current));
        handler_copy = method.next_opcode(handler_copy)?;
        copy = method.next_opcode(current);
    }
    let reload = handler_copy;
    let rethrow = method.next_opcode(reload)?;
    let trailing_goto = copy.filter(|&pos| method.opcode_at(pos) == Some(GOTO));
    Some(Duplicate {
        store: e,
        pairs,
        reload,
        rethrow,
        trailing_goto,
    })
}

/// Number of instructions between the handler's `ASTORE t` and `ALOAD t; ATHROW`,
/// or 0 when the handler does not end by rethrowing.
fn handler_size(method: &Method, e: usize) -> usize {
    let Some(Insn::Var {
        opcode: ASTORE,
        var,
    }) = method.insn(e)
    else {
        return 0;
    };
    let mut size = 0;
    let mut pos = e;
    loop {
        let Some(next) = method.next_opcode(pos) else {
            return 0;
        };
        pos = next;
        if matches!(method.insn(pos), Some(Insn::Var { opcode: ALOAD, var: v }) if v == var) {
            break;
        }
        size += 1;
    }
    match method.next_opcode(pos) {
        Some(rethrow) if method.opcode_at(rethrow) == Some(ATHROW) => size,
        _ => 0,
    }
}
