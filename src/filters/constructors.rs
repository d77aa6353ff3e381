use anyhow::Result;

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, ignore_method};
use crate::ir::{Method, MethodAccess};
use crate::matcher::Matcher;
use crate::opcodes::*;
use crate::output::FilterOutput;

/// Filter for private no-argument constructors that only call `super()`.
pub struct PrivateEmptyNoArgConstructorFilter;

impl Filter for PrivateEmptyNoArgConstructorFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "PRIVATE_EMPTY_NO_ARG_CONSTRUCTOR",
            name: "Private empty constructor",
            description: "Private no-argument constructors whose body only calls super()",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if !method.access.contains(MethodAccess::PRIVATE)
            || method.name != "<init>"
            || method.desc != "()V"
        {
            return Ok(());
        }
        let Some(super_class) = context.super_class_name() else {
            return Ok(());
        };
        let mut m = Matcher::new(method);
        m.expect_first_is_aload0()
            .expect_invoke(INVOKESPECIAL, super_class, "<init>", "()V")
            .expect_opcode(RETURN);
        if m.is_active() {
            ignore_method(method, output);
        }
        Ok(())
    }
}

/// Filter for the `private <init>(String, int)` constructor of enums that
/// declare no constructor themselves.
pub struct EnumEmptyConstructorFilter;

impl Filter for EnumEmptyConstructorFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "ENUM_EMPTY_CONSTRUCTOR",
            name: "Enum empty constructor",
            description: "Implicit enum constructors that only delegate to java.lang.Enum",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        if context.super_class_name() != Some("java/lang/Enum")
            || !method.access.contains(MethodAccess::PRIVATE)
            || method.name != "<init>"
            || method.desc != "(Ljava/lang/String;I)V"
        {
            return Ok(());
        }
        let mut m = Matcher::new(method);
        m.expect_first_is_aload0()
            .expect_var_slot(ALOAD, 1)
            .expect_var_slot(ILOAD, 2)
            .expect_invoke(INVOKESPECIAL, "java/lang/Enum", "<init>", "(Ljava/lang/String;I)V")
            .expect_opcode(RETURN);
        if m.is_active() {
            ignore_method(method, output);
        }
        Ok(())
    }
}
