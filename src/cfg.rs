use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::ir::{Insn, LabelId, Method};
use crate::opcodes;

/// Why a straight-line run of instructions ends at a boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum BoundaryKind {
    /// Right before a jump or switch.
    BeforeJump,
    /// Right before a return or `athrow`.
    BeforeExit,
    /// At a label reached both by fall-through and by at least one other edge.
    AtJoin,
}

/// End of a straight-line run, at `position` in the instruction list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct BlockBoundary {
    pub position: usize,
    pub kind: BoundaryKind,
}

#[derive(Clone, Copy, Debug, Default)]
struct LabelFlow {
    target: bool,
    successor: bool,
    multi_target: bool,
}

impl LabelFlow {
    fn set_target(&mut self) {
        if self.target || self.successor {
            self.multi_target = true;
        } else {
            self.target = true;
        }
    }

    fn set_successor(&mut self) {
        self.successor = true;
        if self.target {
            self.multi_target = true;
        }
    }
}

/// Computes the boundaries that split a method into straight-line blocks.
pub fn block_boundaries(method: &Method) -> Vec<BlockBoundary> {
    let flows = label_flows(method);
    let mut boundaries = BTreeSet::new();
    for (pos, insn) in method.instructions().iter().enumerate() {
        match insn {
            Insn::Label(label) => {
                if flows
                    .get(label)
                    .is_some_and(|flow| flow.successor && flow.multi_target)
                {
                    boundaries.insert(BlockBoundary {
                        position: pos,
                        kind: BoundaryKind::AtJoin,
                    });
                }
            }
            _ => {
                let Some(opcode) = insn.opcode() else {
                    continue;
                };
                let kind = if insn.jump_label().is_some() || opcodes::is_switch(opcode) {
                    BoundaryKind::BeforeJump
                } else if opcodes::is_exit(opcode) {
                    BoundaryKind::BeforeExit
                } else {
                    continue;
                };
                boundaries.insert(BlockBoundary {
                    position: pos,
                    kind,
                });
            }
        }
    }
    boundaries.into_iter().collect()
}

fn label_flows(method: &Method) -> HashMap<LabelId, LabelFlow> {
    let mut flows: HashMap<LabelId, LabelFlow> = HashMap::new();
    for block in method.try_catch_blocks() {
        flows.entry(block.start).or_default().set_target();
        flows.entry(block.handler).or_default().set_target();
    }
    let mut successor = true;
    let mut first = true;
    for insn in method.instructions() {
        match insn {
            Insn::Label(label) => {
                let flow = flows.entry(*label).or_default();
                if first {
                    flow.set_target();
                }
                if successor {
                    flow.set_successor();
                }
            }
            Insn::LineNumber { .. } | Insn::Frame => {}
            _ => {
                first = false;
                if let Some(label) = insn.jump_label() {
                    flows.entry(label).or_default().set_target();
                }
                if let Some((default, labels)) = insn.switch_labels() {
                    let mut seen = vec![default];
                    flows.entry(default).or_default().set_target();
                    for label in labels {
                        if !seen.contains(label) {
                            seen.push(*label);
                            flows.entry(*label).or_default().set_target();
                        }
                    }
                }
                successor = insn
                    .opcode()
                    .is_some_and(|opcode| !opcodes::ends_flow(opcode));
            }
        }
    }
    flows
}
