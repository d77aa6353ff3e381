use anyhow::Result;

use crate::context::FilterContext;
use crate::descriptor::{argument_types, type_size};
use crate::filters::{Filter, FilterMetadata, is_kotlin_class};
use crate::ir::{Insn, Method};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::FilterOutput;

const DEFAULT_CONSTRUCTOR_MARKER: &str = "Lkotlin/jvm/internal/DefaultConstructorMarker;";
const UNSUPPORTED_OPERATION: &str = "java/lang/UnsupportedOperationException";
const SUPER_CALL_MESSAGE: &str = "Super calls with default arguments not supported in this target";

/// Filter for the synthetic `$default` methods and constructors Kotlin
/// generates for parameters with default values.
///
/// Each parameter is guarded by `ILOAD mask; <bit>; IAND; IFEQ`; those
/// guards and the rejection of super calls are ignored, the default value
/// expressions stay.
pub struct KotlinDefaultArgumentsFilter;

impl Filter for KotlinDefaultArgumentsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_DEFAULT_ARGUMENTS",
            name: "Kotlin default arguments",
            description: "Bit mask checks of Kotlin $default methods and constructors",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !method.is_synthetic() || !is_kotlin_class(context) {
            return Ok(());
        }
        let constructor = if is_default_arguments_method(method) {
            false
        } else if is_default_arguments_constructor(method) {
            true
        } else {
            return Ok(());
        };
        let Some(mask) = mask_var(&method.desc, constructor) else {
            return Ok(());
        };

        let mut ranges = Vec::new();
        let mut m = Matcher::new(method);
        // the trailing marker argument is null unless called through super
        m.expect_opcode(ALOAD)
            .expect_opcode(IFNULL)
            .expect_type(NEW, UNSUPPORTED_OPERATION)
            .expect_opcode(DUP)
            .expect(|insn| {
                insn.string_constant()
                    .is_some_and(|message| message.starts_with(SUPER_CALL_MESSAGE))
            })
            .expect_invoke(INVOKESPECIAL, UNSUPPORTED_OPERATION, "<init>", "(Ljava/lang/String;)V")
            .expect_opcode(ATHROW);
        let mut pos = match m.matched() {
            Some(athrow) => {
                ranges.push((0, athrow));
                athrow + 1
            }
            None => 0,
        };

        while let Some(load) = method.skip_non_opcodes(pos) {
            if !matches!(method.insn(load), Some(Insn::Var { opcode: ILOAD, var }) if *var == mask) {
                break;
            }
            let mut m = Matcher::after(method, load);
            // bit of the parameter
            m.advance().expect_opcode(IAND).expect_opcode(IFEQ);
            let Some(jump) = m.matched() else {
                return Ok(());
            };
            let Some(next) = m
                .matched_insn()
                .and_then(Insn::jump_label)
                .and_then(|label| method.resolve(label))
            else {
                return Ok(());
            };
            ranges.push((jump, jump));
            pos = next;
        }

        for (from, to) in ranges {
            output.ignore(from, to);
        }
        Ok(())
    }
}

fn is_default_arguments_method(method: &Method) -> bool {
    method.name.ends_with("$default")
}

fn is_default_arguments_constructor(method: &Method) -> bool {
    if method.name != "<init>" {
        return false;
    }
    match argument_types(&method.desc) {
        Some(args) => args.len() >= 2 && args.last() == Some(&DEFAULT_CONSTRUCTOR_MARKER),
        None => false,
    }
}

/// Slot of the bit mask: it follows every real argument and precedes the
/// trailing marker pair.
fn mask_var(desc: &str, constructor: bool) -> Option<u16> {
    let args = argument_types(desc)?;
    let real = args.len().checked_sub(2)?;
    let slots: u16 = args[..real].iter().map(|ty| type_size(ty)).sum();
    Some(slots + u16::from(constructor))
}
