use std::collections::HashMap;

use bitflags::bitflags;
use serde::Serialize;

use crate::opcodes;

/// Branch target placeholder referenced by jumps, switches and try/catch regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelId(pub u32);

/// Constant pushed by an `LDC` instruction or passed as a bootstrap argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Class literal, as an internal name or array descriptor.
    Type(String),
}

/// Method handle used as an `INVOKEDYNAMIC` bootstrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handle {
    pub tag: u8,
    pub owner: String,
    pub name: String,
    pub desc: String,
    pub interface: bool,
}

/// One entry of a method's instruction list.
///
/// `Label`, `LineNumber` and `Frame` are pseudo entries that carry no opcode.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Label(LabelId),
    LineNumber {
        line: u32,
        start: LabelId,
    },
    Frame,
    /// Zero-operand instruction.
    Simple(u8),
    /// `BIPUSH`, `SIPUSH` and `NEWARRAY`.
    Int {
        opcode: u8,
        operand: i32,
    },
    Var {
        opcode: u8,
        var: u16,
    },
    /// `NEW`, `ANEWARRAY`, `CHECKCAST` and `INSTANCEOF`.
    Type {
        opcode: u8,
        desc: String,
    },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
        interface: bool,
    },
    InvokeDynamic {
        name: String,
        desc: String,
        bootstrap: Handle,
        arguments: Vec<Constant>,
    },
    Jump {
        opcode: u8,
        label: LabelId,
    },
    Ldc(Constant),
    Iinc {
        var: u16,
        increment: i32,
    },
    TableSwitch {
        min: i32,
        max: i32,
        default: LabelId,
        labels: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        keys: Vec<i32>,
        labels: Vec<LabelId>,
    },
    MultiANewArray {
        desc: String,
        dimensions: u8,
    },
}

impl Insn {
    /// Opcode of a real instruction, `None` for pseudo entries.
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Insn::Label(_) | Insn::LineNumber { .. } | Insn::Frame => None,
            Insn::Simple(opcode)
            | Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. }
            | Insn::Jump { opcode, .. } => Some(*opcode),
            Insn::InvokeDynamic { .. } => Some(opcodes::INVOKEDYNAMIC),
            Insn::Ldc(_) => Some(opcodes::LDC),
            Insn::Iinc { .. } => Some(opcodes::IINC),
            Insn::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            Insn::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
            Insn::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.opcode().is_none()
    }

    pub fn var(&self) -> Option<u16> {
        match self {
            Insn::Var { var, .. } | Insn::Iinc { var, .. } => Some(*var),
            _ => None,
        }
    }

    pub fn jump_label(&self) -> Option<LabelId> {
        match self {
            Insn::Jump { label, .. } => Some(*label),
            _ => None,
        }
    }

    /// Default label and case labels of a switch, in declaration order.
    pub fn switch_labels(&self) -> Option<(LabelId, &[LabelId])> {
        match self {
            Insn::TableSwitch {
                default, labels, ..
            }
            | Insn::LookupSwitch {
                default, labels, ..
            } => Some((*default, labels.as_slice())),
            _ => None,
        }
    }

    pub fn is_invoke(&self, owner: &str, name: &str, desc: &str) -> bool {
        matches!(
            self,
            Insn::Method { owner: o, name: n, desc: d, .. } if o == owner && n == name && d == desc
        )
    }

    pub fn string_constant(&self) -> Option<&str> {
        match self {
            Insn::Ldc(Constant::String(value)) => Some(value),
            _ => None,
        }
    }
}

bitflags! {
    /// Method access flags as stored in the class file.
    pub struct MethodAccess: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

/// Exception handler region of the `Code` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// Internal name of the caught type, `None` for catch-any.
    pub exception_type: Option<String>,
}

/// Entry of the local variable table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub desc: String,
    pub start: LabelId,
    pub end: LabelId,
    pub index: u16,
}

/// Non-standard attribute kept as raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub content: Vec<u8>,
}

/// Decoded method body. Positions are indices into the instruction list.
#[derive(Clone, Debug)]
pub struct Method {
    pub(crate) name: String,
    pub(crate) desc: String,
    pub(crate) access: MethodAccess,
    pub(crate) instructions: Vec<Insn>,
    pub(crate) try_catch_blocks: Vec<TryCatchBlock>,
    pub(crate) local_variables: Vec<LocalVariable>,
    pub(crate) visible_annotations: Vec<String>,
    pub(crate) invisible_annotations: Vec<String>,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) labels: HashMap<LabelId, usize>,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn access(&self) -> MethodAccess {
        self.access
    }

    pub fn instructions(&self) -> &[Insn] {
        &self.instructions
    }

    pub fn try_catch_blocks(&self) -> &[TryCatchBlock] {
        &self.try_catch_blocks
    }

    pub fn local_variables(&self) -> &[LocalVariable] {
        &self.local_variables
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn insn(&self, pos: usize) -> Option<&Insn> {
        self.instructions.get(pos)
    }

    pub fn opcode_at(&self, pos: usize) -> Option<u8> {
        self.insn(pos).and_then(Insn::opcode)
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    pub fn is_synthetic(&self) -> bool {
        self.access.contains(MethodAccess::SYNTHETIC)
    }

    pub fn has_annotation(&self, desc: &str) -> bool {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
            .any(|annotation| annotation == desc)
    }

    pub fn has_invisible_annotation(&self, desc: &str) -> bool {
        self.invisible_annotations.iter().any(|annotation| annotation == desc)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    /// Position of the label entry itself.
    pub fn resolve(&self, label: LabelId) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Position of the first real instruction executed when jumping to `label`.
    pub fn target(&self, label: LabelId) -> Option<usize> {
        self.resolve(label).and_then(|pos| self.skip_non_opcodes(pos))
    }

    /// First real instruction at or after `pos`.
    pub fn skip_non_opcodes(&self, pos: usize) -> Option<usize> {
        (pos..self.len()).find(|&index| self.opcode_at(index).is_some())
    }

    /// First real instruction strictly after `pos`.
    pub fn next_opcode(&self, pos: usize) -> Option<usize> {
        self.skip_non_opcodes(pos + 1)
    }

    /// Last real instruction strictly before `pos`.
    pub fn previous_opcode(&self, pos: usize) -> Option<usize> {
        (0..pos.min(self.len()))
            .rev()
            .find(|&index| self.opcode_at(index).is_some())
    }

    pub fn first_opcode(&self) -> Option<usize> {
        self.skip_non_opcodes(0)
    }

    pub fn last_opcode(&self) -> Option<usize> {
        self.previous_opcode(self.len())
    }

    pub fn has_line_numbers(&self) -> bool {
        self.instructions
            .iter()
            .any(|insn| matches!(insn, Insn::LineNumber { .. }))
    }

    /// Source line in effect at `pos`, from the closest preceding line entry.
    pub fn line_at(&self, pos: usize) -> Option<u32> {
        self.instructions[..(pos + 1).min(self.len())]
            .iter()
            .rev()
            .find_map(|insn| match insn {
                Insn::LineNumber { line, .. } => Some(*line),
                _ => None,
            })
    }

    /// Outgoing branches of the instruction at `pos` as `(branch index, target position)`.
    ///
    /// A jump's taken edge is branch 1 and a conditional jump's fall-through edge is
    /// branch 0. Switches number the default target 0 and each further distinct
    /// target from 1 in label order. Other instructions that continue have branch 0.
    pub fn branches(&self, pos: usize) -> Vec<(u32, usize)> {
        let Some(insn) = self.insn(pos) else {
            return Vec::new();
        };
        let Some(opcode) = insn.opcode() else {
            return Vec::new();
        };
        let mut branches = Vec::new();
        if let Some(label) = insn.jump_label() {
            if opcodes::is_conditional_jump(opcode) && pos + 1 < self.len() {
                branches.push((0, pos + 1));
            }
            if let Some(target) = self.resolve(label) {
                branches.push((1, target));
            }
            return branches;
        }
        if let Some((default, labels)) = insn.switch_labels() {
            let mut seen = vec![default];
            if let Some(target) = self.resolve(default) {
                branches.push((0, target));
            }
            for label in labels {
                if seen.contains(label) {
                    continue;
                }
                seen.push(*label);
                if let Some(target) = self.resolve(*label) {
                    branches.push((branches.len() as u32, target));
                }
            }
            return branches;
        }
        if !opcodes::ends_flow(opcode) && pos + 1 < self.len() {
            branches.push((0, pos + 1));
        }
        branches
    }
}
