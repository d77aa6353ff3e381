use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method};
use crate::ir::{Insn, Method};
use crate::opcodes::*;
use crate::output::FilterOutput;

const AJ_SYNTHETIC: &str = "org.aspectj.weaver.AjSynthetic";
const METHOD_DECLARATION_LINE: &str = "org.aspectj.weaver.MethodDeclarationLineNumber";
const WEAVER_ATTRIBUTES: [&str; 2] = [
    "org.aspectj.weaver.WeaverState",
    "org.aspectj.weaver.WeaverVersion",
];
const FACTORY: &str = "org/aspectj/runtime/reflect/Factory";
const AROUND_CLOSURE: &str = "org/aspectj/runtime/internal/AroundClosure";

/// Filter for members the AspectJ weaver adds to a class, and for the
/// static initializer plumbing that sets up join points.
pub struct AspectjFilter;

impl Filter for AspectjFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "ASPECTJ",
            name: "AspectJ synthetic members",
            description: "Methods marked AjSynthetic and ajc$preClinit/ajc$postClinit plumbing",
        }
    }

    fn filter(
        &self,
        method: &Method,
        _context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if method.attribute(AJ_SYNTHETIC).is_some() {
            ignore_method(method, output);
            return Ok(());
        }
        if method.name == "<clinit>" {
            filter_static_initializer(method, output);
        }
        Ok(())
    }
}

fn filter_static_initializer(method: &Method, output: &mut dyn FilterOutput) {
    let Some(last) = method.len().checked_sub(1) else {
        return;
    };
    let mut ranges = Vec::new();
    let mut pre_clinit = None;
    for (pos, insn) in method.instructions.iter().enumerate() {
        let Insn::Method { opcode: INVOKESTATIC, name, .. } = insn else {
            continue;
        };
        let whole_method = match name.as_str() {
            "ajc$preClinit" => {
                pre_clinit = Some(pos);
                ranges.push((0, pos));
                method.next_opcode(pos).and_then(|next| method.opcode_at(next)) == Some(RETURN)
            }
            "ajc$postClinit" => {
                ranges.push((pos, last));
                method.previous_opcode(pos).is_none()
                    || pre_clinit.and_then(|pre| method.next_opcode(pre)) == Some(pos)
            }
            _ => false,
        };
        if whole_method {
            ignore_method(method, output);
            return;
        }
    }
    for (from, to) in ranges {
        output.ignore(from, to);
    }
}

/// Filter for the join point and closure plumbing the AspectJ weaver weaves
/// into advised methods.
pub struct AspectJAdvisedFilter;

impl Filter for AspectJAdvisedFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "ASPECTJ_ADVISED",
            name: "AspectJ advised methods",
            description: "Join point creation, around closures and after-throwing handlers",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !WEAVER_ATTRIBUTES.iter().any(|name| context.has_class_attribute(name)) {
            return Ok(());
        }
        ignore_init_code(method, output);

        for (pos, insn) in method.instructions.iter().enumerate() {
            match insn {
                Insn::Field { name, .. } if name.starts_with("ajp$") => {
                    let make_jp = next_invoke(method, pos)
                        .filter(|&next| method.insn(next).is_some_and(|insn| is_make_jp(insn)));
                    output.ignore(pos, make_jp.unwrap_or(pos));
                }
                Insn::Method { owner, name, .. } => {
                    let plumbing = is_make_jp(insn)
                        || (owner.contains("$AjcClosure") && name == "<init>")
                        || (owner == AROUND_CLOSURE && name == "linkClosureAndJoinPoint");
                    if plumbing {
                        output.ignore(pos, pos);
                    }
                }
                _ => {}
            }
        }

        for block in &method.try_catch_blocks {
            if block.exception_type.is_none() {
                continue;
            }
            let Some(handler) = method.resolve(block.handler) else {
                continue;
            };
            if let Some(athrow) = after_throwing_advice(method, handler) {
                output.ignore(handler, athrow);
            }
        }
        Ok(())
    }
}

/// Ignores the code the weaver places before the advised method's own
/// declaration line.
fn ignore_init_code(method: &Method, output: &mut dyn FilterOutput) {
    let Some(declared) = declaration_line(method) else {
        return;
    };
    let first_line_after = method.instructions.iter().position(
        |insn| matches!(insn, Insn::LineNumber { line, .. } if *line >= declared),
    );
    match first_line_after {
        None => ignore_method(method, output),
        Some(pos) if pos > 1 => output.ignore(0, pos - 1),
        Some(_) => {}
    }
}

fn declaration_line(method: &Method) -> Option<u32> {
    let content = &method.attribute(METHOD_DECLARATION_LINE)?.content;
    let bytes: [u8; 4] = content.get(..4)?.try_into().ok()?;
    let line = i32::from_be_bytes(bytes);
    u32::try_from(line).ok().filter(|&line| line > 0)
}

/// Handler that calls `Aspect.aspectOf()`, runs advice on that aspect and
/// rethrows.
fn after_throwing_advice(method: &Method, handler: usize) -> Option<usize> {
    let aspect_of = next_invoke(method, handler)?;
    let Some(Insn::Method {
        opcode: INVOKESTATIC,
        owner: aspect,
        name,
        ..
    }) = method.insn(aspect_of)
    else {
        return None;
    };
    if name != "aspectOf" {
        return None;
    }
    let advice = next_invoke(method, aspect_of)?;
    if !matches!(method.insn(advice), Some(Insn::Method { owner, .. }) if owner == aspect) {
        return None;
    }
    (advice + 1..method.len()).find(|&pos| method.opcode_at(pos) == Some(ATHROW))
}

/// First method invocation strictly after `pos`.
fn next_invoke(method: &Method, pos: usize) -> Option<usize> {
    (pos + 1..method.len()).find(|&next| matches!(method.insn(next), Some(Insn::Method { .. })))
}

fn is_make_jp(insn: &Insn) -> bool {
    matches!(insn, Insn::Method { owner, name, .. } if owner == FACTORY && name == "makeJP")
}
