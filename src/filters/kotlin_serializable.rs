use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method, is_kotlin_class};
use crate::ir::Method;
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::FilterOutput;

const SERIALIZATION_CONSTRUCTOR_MARKER: &str =
    "Lkotlinx/serialization/internal/SerializationConstructorMarker;)V";
const KSERIALIZER: &str = "kotlinx/serialization/KSerializer";
const COMPANION_INIT_LINE: &str = "kotlin-serializable.companion-init-line";

/// Filter for the members the `kotlinx.serialization` compiler plugin adds
/// to `@Serializable` classes and their companions.
pub struct KotlinSerializableFilter;

impl Filter for KotlinSerializableFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "KOTLIN_SERIALIZABLE",
            name: "Kotlin serialization",
            description: "Members generated by the kotlinx.serialization plugin",
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
        if is_write_self(method) || is_deserialization_constructor(method) {
            ignore_method(method, output);
            return Ok(());
        }

        let Some(serializable) = context.class_name().strip_suffix("$Companion") else {
            return Ok(());
        };
        if method.name == "<init>" && method.desc == "()V" {
            // the companion constructor precedes its methods in class file order
            let line = method.first_opcode().and_then(|pos| method.line_at(pos));
            context
                .scratch()
                .update(COMPANION_INIT_LINE, |slot: &mut Option<u32>| *slot = line);
            return Ok(());
        }
        if method.name != "serializer" || method.desc != format!("()L{KSERIALIZER};") {
            return Ok(());
        }

        let mut m = Matcher::new(method);
        m.expect_field(GETSTATIC, &format!("{serializable}$$serializer"), "INSTANCE", "*")
            .expect_type(CHECKCAST, KSERIALIZER)
            .expect_opcode(ARETURN);
        let Some(ret) = m.matched() else {
            return Ok(());
        };
        if method.next_opcode(ret).is_some() {
            return Ok(());
        }
        let init_line = context.scratch().get::<Option<u32>>(COMPANION_INIT_LINE).flatten();
        let line = method.first_opcode().and_then(|pos| method.line_at(pos));
        if init_line.is_none() || init_line == line {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// `write$Self` serializes the properties of a class into an encoder.
fn is_write_self(method: &Method) -> bool {
    method.is_synthetic()
        && method.is_static()
        && method.name.starts_with("write$Self")
        && (method.desc.contains("Lkotlinx/serialization/encoding/CompositeEncoder;")
            || method.desc.contains("Lkotlinx/serialization/descriptors/SerialDescriptor;"))
}

fn is_deserialization_constructor(method: &Method) -> bool {
    method.is_synthetic()
        && method.name == "<init>"
        && method.desc.ends_with(SERIALIZATION_CONSTRUCTOR_MARKER)
}
