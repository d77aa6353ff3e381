use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata};
use crate::ir::Method;
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::FilterOutput;

/// Filter for the exception handler that releases the monitor of a
/// `synchronized` block before rethrowing.
pub struct SynchronizedFilter;

impl Filter for SynchronizedFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "SYNCHRONIZED",
            name: "Synchronized blocks",
            description: "Monitor-exit handlers generated for synchronized blocks",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for block in &method.try_catch_blocks {
            if block.exception_type.is_some() || block.start == block.handler {
                continue;
            }
            let Some(handler) = method.resolve(block.handler) else {
                continue;
            };
            if let Some(end) = match_ecj(method, handler).or_else(|| match_javac(method, handler)) {
                output.ignore(handler, end);
            }
        }
        Ok(())
    }
}

fn match_javac(method: &Method, handler: usize) -> Option<usize> {
    let mut m = Matcher::at(method, handler);
    m.expect_var(ASTORE, "t")
        .expect_opcode(ALOAD)
        .expect_opcode(MONITOREXIT)
        .expect_var(ALOAD, "t")
        .expect_opcode(ATHROW);
    m.matched()
}

fn match_ecj(method: &Method, handler: usize) -> Option<usize> {
    let mut m = Matcher::at(method, handler);
    m.expect_opcode(ALOAD)
        .expect_opcode(MONITOREXIT)
        .expect_opcode(ATHROW);
    m.matched()
}
