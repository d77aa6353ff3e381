use anyhow::{Context as _, Result};

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, is_kotlin_class};
use crate::ir::{Insn, Method};
use crate::output::FilterOutput;
use crate::smap::KotlinSmap;

const FIRST_GENERATED_LINE: &str = "kotlin-inline.first-generated-line";

/// Filter for code Kotlin copies into a method from inline functions.
///
/// Inlined bodies get line numbers past the end of the source file; the
/// `SourceDebugExtension` says where those start. Everything attributed to
/// such a line is ignored.
pub struct KotlinInlineFilter;

impl Filter for KotlinInlineFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_INLINE",
            name: "Kotlin inline functions",
            description: "Code inlined from Kotlin inline functions",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        let Some(smap) = context.source_debug_extension() else {
            return Ok(());
        };
        if !is_kotlin_class(context) {
            return Ok(());
        }
        let source_file_name = context.source_file_name().unwrap_or_default();
        let first_generated = context
            .scratch()
            .get_or_try_insert_with(FIRST_GENERATED_LINE, || {
                KotlinSmap::parse(source_file_name, smap)
                    .map(|smap| first_generated_line(source_file_name, &smap))
            })
            .with_context(|| format!("failed to parse SMAP of {}", context.class_name()))?;
        let Some(first_generated) = first_generated else {
            return Ok(());
        };

        let mut line = 0;
        let mut run: Option<(usize, usize)> = None;
        for (pos, insn) in method.instructions.iter().enumerate() {
            if let Insn::LineNumber { line: current, .. } = insn {
                line = *current;
            }
            if line < first_generated {
                if let Some((from, to)) = run.take() {
                    output.ignore(from, to);
                }
                continue;
            }
            run = match run {
                Some((from, _)) => Some((from, pos)),
                None => Some((pos, pos)),
            };
        }
        if let Some((from, to)) = run {
            output.ignore(from, to);
        }
        Ok(())
    }
}

/// Smallest output line that does not map a line of the class's own source
/// file onto itself.
fn first_generated_line(source_file_name: &str, smap: &KotlinSmap) -> Option<u32> {
    smap.mappings()
        .iter()
        .filter(|mapping| {
            mapping.input_file_name != source_file_name
                || mapping.input_start_line != mapping.output_start_line
        })
        .map(|mapping| mapping.output_start_line)
        .min()
}
