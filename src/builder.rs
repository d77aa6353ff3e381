use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::ir::{
    Attribute, Constant, Handle, Insn, LabelId, LocalVariable, Method, MethodAccess, TryCatchBlock,
};

/// Visitor target that assembles a [`Method`] from a decoder's traversal.
#[derive(Debug)]
pub struct MethodBuilder {
    name: String,
    desc: String,
    access: MethodAccess,
    instructions: Vec<Insn>,
    try_catch_blocks: Vec<TryCatchBlock>,
    local_variables: Vec<LocalVariable>,
    visible_annotations: Vec<String>,
    invisible_annotations: Vec<String>,
    attributes: Vec<Attribute>,
    next_label: u32,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            access: MethodAccess::empty(),
            instructions: Vec::new(),
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            attributes: Vec::new(),
            next_label: 0,
        }
    }

    pub fn with_access(mut self, access: MethodAccess) -> Self {
        self.access = access;
        self
    }

    pub fn with_annotation(mut self, desc: &str, visible: bool) -> Self {
        self.visit_annotation(desc, visible);
        self
    }

    pub fn with_attribute(mut self, name: &str, content: Vec<u8>) -> Self {
        self.visit_attribute(name, content);
        self
    }

    /// Position the next visited entry will occupy.
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn visit_annotation(&mut self, desc: &str, visible: bool) {
        if visible {
            self.visible_annotations.push(desc.to_string());
        } else {
            self.invisible_annotations.push(desc.to_string());
        }
    }

    pub fn visit_attribute(&mut self, name: &str, content: Vec<u8>) {
        self.attributes.push(Attribute {
            name: name.to_string(),
            content,
        });
    }

    pub fn visit_label(&mut self, label: LabelId) {
        self.instructions.push(Insn::Label(label));
    }

    pub fn visit_line_number(&mut self, line: u32, start: LabelId) {
        self.instructions.push(Insn::LineNumber { line, start });
    }

    pub fn visit_frame(&mut self) {
        self.instructions.push(Insn::Frame);
    }

    pub fn visit_insn(&mut self, opcode: u8) {
        self.instructions.push(Insn::Simple(opcode));
    }

    pub fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
        self.instructions.push(Insn::Int { opcode, operand });
    }

    pub fn visit_var_insn(&mut self, opcode: u8, var: u16) {
        self.instructions.push(Insn::Var { opcode, var });
    }

    pub fn visit_type_insn(&mut self, opcode: u8, desc: &str) {
        self.instructions.push(Insn::Type {
            opcode,
            desc: desc.to_string(),
        });
    }

    pub fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, desc: &str) {
        self.instructions.push(Insn::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        });
    }

    pub fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) {
        self.instructions.push(Insn::Method {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            interface,
        });
    }

    pub fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        desc: &str,
        bootstrap: Handle,
        arguments: Vec<Constant>,
    ) {
        self.instructions.push(Insn::InvokeDynamic {
            name: name.to_string(),
            desc: desc.to_string(),
            bootstrap,
            arguments,
        });
    }

    pub fn visit_jump_insn(&mut self, opcode: u8, label: LabelId) {
        self.instructions.push(Insn::Jump { opcode, label });
    }

    pub fn visit_ldc_insn(&mut self, constant: Constant) {
        self.instructions.push(Insn::Ldc(constant));
    }

    pub fn visit_iinc_insn(&mut self, var: u16, increment: i32) {
        self.instructions.push(Insn::Iinc { var, increment });
    }

    pub fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: LabelId,
        labels: Vec<LabelId>,
    ) {
        self.instructions.push(Insn::TableSwitch {
            min,
            max,
            default,
            labels,
        });
    }

    pub fn visit_lookup_switch_insn(&mut self, default: LabelId, keys: Vec<i32>, labels: Vec<LabelId>) {
        self.instructions.push(Insn::LookupSwitch {
            default,
            keys,
            labels,
        });
    }

    pub fn visit_multi_anew_array_insn(&mut self, desc: &str, dimensions: u8) {
        self.instructions.push(Insn::MultiANewArray {
            desc: desc.to_string(),
            dimensions,
        });
    }

    pub fn visit_try_catch_block(
        &mut self,
        start: LabelId,
        end: LabelId,
        handler: LabelId,
        exception_type: Option<&str>,
    ) {
        self.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            exception_type: exception_type.map(str::to_string),
        });
    }

    pub fn visit_local_variable(
        &mut self,
        name: &str,
        desc: &str,
        start: LabelId,
        end: LabelId,
        index: u16,
    ) {
        self.local_variables.push(LocalVariable {
            name: name.to_string(),
            desc: desc.to_string(),
            start,
            end,
            index,
        });
    }

    /// Finishes the traversal, checking that every referenced label was placed exactly once.
    pub fn build(self) -> Result<Method> {
        let mut labels = HashMap::new();
        for (pos, insn) in self.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                if labels.insert(*label, pos).is_some() {
                    bail!("label {} placed twice in {}{}", label.0, self.name, self.desc);
                }
            }
        }
        let mut referenced = Vec::new();
        for insn in &self.instructions {
            match insn {
                Insn::Jump { label, .. } => referenced.push(*label),
                Insn::LineNumber { start, .. } => referenced.push(*start),
                Insn::TableSwitch {
                    default, labels, ..
                }
                | Insn::LookupSwitch {
                    default, labels, ..
                } => {
                    referenced.push(*default);
                    referenced.extend(labels.iter().copied());
                }
                _ => {}
            }
        }
        for block in &self.try_catch_blocks {
            referenced.extend([block.start, block.end, block.handler]);
        }
        for variable in &self.local_variables {
            referenced.extend([variable.start, variable.end]);
        }
        if let Some(missing) = referenced.iter().find(|label| !labels.contains_key(label)) {
            bail!(
                "label {} referenced but never placed in {}{}",
                missing.0,
                self.name,
                self.desc
            );
        }
        Ok(Method {
            name: self.name,
            desc: self.desc,
            access: self.access,
            instructions: self.instructions,
            try_catch_blocks: self.try_catch_blocks,
            local_variables: self.local_variables,
            visible_annotations: self.visible_annotations,
            invisible_annotations: self.invisible_annotations,
            attributes: self.attributes,
            labels,
        })
    }
}
