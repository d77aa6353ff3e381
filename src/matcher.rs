use std::collections::HashMap;

use crate::ir::{Insn, LabelId, Method};
use crate::opcodes;

/// Wildcard accepted by the reference-matching primitives.
pub const ANY: &str = "*";

/// Walking position inside one method.
///
/// `Active` holds the position of the next entry to examine. Once `Failed`,
/// every primitive leaves the cursor failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cursor {
    Active(usize),
    Failed,
}

#[derive(Clone, Debug, Default)]
struct Bindings {
    vars: HashMap<String, u16>,
    labels: HashMap<String, LabelId>,
    owners: HashMap<String, String>,
}

/// Chainable shape matcher over a method's instruction list.
///
/// Each `expect_*` call skips pseudo entries, tests the next real instruction
/// and either consumes it or fails the cursor.
#[derive(Clone, Debug)]
pub struct Matcher<'m> {
    method: &'m Method,
    cursor: Cursor,
    matched: Option<usize>,
    bindings: Bindings,
}

impl<'m> Matcher<'m> {
    pub fn new(method: &'m Method) -> Self {
        Self::at(method, 0)
    }

    /// Matcher whose next examined entry is `pos`.
    pub fn at(method: &'m Method, pos: usize) -> Self {
        Self {
            method,
            cursor: Cursor::Active(pos),
            matched: None,
            bindings: Bindings::default(),
        }
    }

    /// Matcher positioned as if the instruction at `pos` had just been matched.
    pub fn after(method: &'m Method, pos: usize) -> Self {
        let mut matcher = Self::at(method, pos + 1);
        matcher.matched = Some(pos);
        matcher
    }

    pub fn method(&self) -> &'m Method {
        self.method
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn is_active(&self) -> bool {
        matches!(self.cursor, Cursor::Active(_))
    }

    pub fn is_failed(&self) -> bool {
        !self.is_active()
    }

    /// Position of the most recently matched instruction while the cursor is active.
    pub fn matched(&self) -> Option<usize> {
        match self.cursor {
            Cursor::Active(_) => self.matched,
            Cursor::Failed => None,
        }
    }

    pub fn matched_insn(&self) -> Option<&'m Insn> {
        self.matched().and_then(|pos| self.method.insn(pos))
    }

    pub fn fail(&mut self) -> &mut Self {
        self.cursor = Cursor::Failed;
        self.matched = None;
        self
    }

    /// Restarts at `pos`, keeping bindings.
    pub fn move_to(&mut self, pos: usize) -> &mut Self {
        self.cursor = Cursor::Active(pos);
        self.matched = None;
        self
    }

    /// Restarts right after `pos`, keeping bindings.
    pub fn move_after(&mut self, pos: usize) -> &mut Self {
        self.cursor = Cursor::Active(pos + 1);
        self.matched = Some(pos);
        self
    }

    pub fn clear_bindings(&mut self) {
        self.bindings = Bindings::default();
    }

    pub fn var(&self, binding: &str) -> Option<u16> {
        self.bindings.vars.get(binding).copied()
    }

    pub fn label(&self, binding: &str) -> Option<LabelId> {
        self.bindings.labels.get(binding).copied()
    }

    pub fn skip_non_opcode(&mut self) -> &mut Self {
        if let Cursor::Active(pos) = self.cursor {
            let next = self.method.skip_non_opcodes(pos).unwrap_or(self.method.len());
            self.cursor = Cursor::Active(next);
        }
        self
    }

    /// Opcode of the next real instruction without consuming it.
    pub fn peek_opcode(&mut self) -> Option<u8> {
        self.skip_non_opcode();
        match self.cursor {
            Cursor::Active(pos) => self.method.opcode_at(pos),
            Cursor::Failed => None,
        }
    }

    fn step(&mut self, accept: impl FnOnce(&'m Insn, &mut Bindings) -> bool) -> &mut Self {
        self.skip_non_opcode();
        let Cursor::Active(pos) = self.cursor else {
            return self;
        };
        match self.method.insn(pos) {
            Some(insn) if accept(insn, &mut self.bindings) => {
                self.matched = Some(pos);
                self.cursor = Cursor::Active(pos + 1);
            }
            _ => {
                self.fail();
            }
        }
        self
    }

    /// Consumes the next real instruction whatever it is.
    pub fn advance(&mut self) -> &mut Self {
        self.step(|_, _| true)
    }

    pub fn expect(&mut self, predicate: impl FnOnce(&'m Insn) -> bool) -> &mut Self {
        self.step(|insn, _| predicate(insn))
    }

    pub fn expect_opcode(&mut self, opcode: u8) -> &mut Self {
        self.step(|insn, _| insn.opcode() == Some(opcode))
    }

    pub fn expect_switch(&mut self) -> &mut Self {
        self.step(|insn, _| insn.opcode().is_some_and(opcodes::is_switch))
    }

    /// Matches a local variable access and binds `binding` to its slot, or
    /// checks the slot against an earlier binding.
    pub fn expect_var(&mut self, opcode: u8, binding: &str) -> &mut Self {
        self.step(|insn, bindings| {
            let Insn::Var { opcode: actual, var } = insn else {
                return false;
            };
            if *actual != opcode {
                return false;
            }
            match bindings.vars.get(binding) {
                Some(bound) => bound == var,
                None => {
                    bindings.vars.insert(binding.to_string(), *var);
                    true
                }
            }
        })
    }

    pub fn expect_var_slot(&mut self, opcode: u8, slot: u16) -> &mut Self {
        self.step(|insn, _| matches!(insn, Insn::Var { opcode: o, var } if *o == opcode && *var == slot))
    }

    pub fn expect_field(&mut self, opcode: u8, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.step(|insn, _| match insn {
            Insn::Field {
                opcode: o,
                owner: actual_owner,
                name: actual_name,
                desc: actual_desc,
            } => {
                *o == opcode
                    && wildcard(owner, actual_owner)
                    && wildcard(name, actual_name)
                    && wildcard(desc, actual_desc)
            }
            _ => false,
        })
    }

    pub fn expect_invoke(&mut self, opcode: u8, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.step(|insn, _| match insn {
            Insn::Method {
                opcode: o,
                owner: actual_owner,
                name: actual_name,
                desc: actual_desc,
                ..
            } => {
                *o == opcode
                    && wildcard(owner, actual_owner)
                    && wildcard(name, actual_name)
                    && wildcard(desc, actual_desc)
            }
            _ => false,
        })
    }

    /// Matches an invocation using one of `opcodes` and binds the owner to
    /// `owner_binding`, or checks it against an earlier binding.
    pub fn expect_invoke_bound(
        &mut self,
        opcodes: &[u8],
        owner_binding: &str,
        name: &str,
        desc: &str,
    ) -> &mut Self {
        self.step(|insn, bindings| {
            let Insn::Method {
                opcode,
                owner,
                name: actual_name,
                desc: actual_desc,
                ..
            } = insn
            else {
                return false;
            };
            if !opcodes.contains(opcode) || !wildcard(name, actual_name) || !wildcard(desc, actual_desc) {
                return false;
            }
            match bindings.owners.get(owner_binding) {
                Some(bound) => bound == owner,
                None => {
                    bindings.owners.insert(owner_binding.to_string(), owner.clone());
                    true
                }
            }
        })
    }

    pub fn expect_type(&mut self, opcode: u8, desc: &str) -> &mut Self {
        self.step(|insn, _| {
            matches!(insn, Insn::Type { opcode: o, desc: actual } if *o == opcode && wildcard(desc, actual))
        })
    }

    pub fn expect_ldc_string(&mut self, value: &str) -> &mut Self {
        self.step(|insn, _| insn.string_constant().is_some_and(|actual| wildcard(value, actual)))
    }

    /// Matches a jump and binds `binding` to its target label, or checks it
    /// against an earlier binding.
    pub fn expect_jump(&mut self, opcode: u8, binding: &str) -> &mut Self {
        self.step(|insn, bindings| {
            let Insn::Jump { opcode: actual, label } = insn else {
                return false;
            };
            if *actual != opcode {
                return false;
            }
            match bindings.labels.get(binding) {
                Some(bound) => bound == label,
                None => {
                    bindings.labels.insert(binding.to_string(), *label);
                    true
                }
            }
        })
    }

    /// Requires the very next entry, without skipping, to be the label bound to `binding`.
    pub fn expect_label(&mut self, binding: &str) -> &mut Self {
        let Cursor::Active(pos) = self.cursor else {
            return self;
        };
        let expected = self.bindings.labels.get(binding).copied();
        match (self.method.insn(pos), expected) {
            (Some(Insn::Label(label)), Some(expected)) if *label == expected => {
                self.cursor = Cursor::Active(pos + 1);
            }
            _ => {
                self.fail();
            }
        }
        self
    }

    /// Restarts at the method entry and requires `ALOAD 0` as the first instruction.
    pub fn expect_first_is_aload0(&mut self) -> &mut Self {
        self.move_to(0);
        self.expect_var_slot(opcodes::ALOAD, 0)
    }

    /// Restarts at the method entry and requires `opcode` as the first instruction.
    pub fn first_is(&mut self, opcode: u8) -> &mut Self {
        self.move_to(0);
        self.expect_opcode(opcode)
    }
}

fn wildcard(expected: &str, actual: &str) -> bool {
    expected == ANY || expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::ir::MethodAccess;
    use crate::opcodes::*;
    use proptest::prelude::*;

    fn sample_method() -> Method {
        let mut builder = MethodBuilder::new("m", "(Ljava/lang/Object;)V");
        let label = builder.new_label();
        builder.visit_label(label);
        builder.visit_line_number(1, label);
        builder.visit_var_insn(ALOAD, 0);
        builder.visit_var_insn(ASTORE, 2);
        builder.visit_var_insn(ALOAD, 2);
        builder.visit_field_insn(GETFIELD, "Foo", "bar", "I");
        builder.visit_method_insn(INVOKEVIRTUAL, "Foo", "baz", "()V", false);
        builder.visit_type_insn(CHECKCAST, "java/lang/String");
        builder.visit_jump_insn(GOTO, label);
        builder.build().expect("build method")
    }

    #[test]
    fn chained_expectations_consume_in_order() {
        let method = sample_method();
        let mut m = Matcher::new(&method);
        m.expect_opcode(ALOAD)
            .expect_var(ASTORE, "t")
            .expect_var(ALOAD, "t")
            .expect_field(GETFIELD, ANY, "bar", ANY)
            .expect_invoke(INVOKEVIRTUAL, "Foo", "baz", "()V")
            .expect_type(CHECKCAST, "java/lang/String");

        assert!(m.is_active());
        assert_eq!(Some(7), m.matched());
        assert_eq!(Some(2), m.var("t"));
    }

    #[test]
    fn var_binding_rejects_other_slot() {
        let method = sample_method();
        let mut m = Matcher::new(&method);
        m.expect_var(ALOAD, "t").expect_var(ASTORE, "t");

        assert!(m.is_failed());
        assert_eq!(None, m.matched());
    }

    #[test]
    fn skip_non_opcode_stops_on_real_instruction() {
        let method = sample_method();
        let mut m = Matcher::new(&method);
        m.skip_non_opcode();
        assert_eq!(Cursor::Active(2), m.cursor());
        m.skip_non_opcode();
        assert_eq!(Cursor::Active(2), m.cursor());
    }

    #[test]
    fn jump_binding_and_label_check() {
        let mut builder = MethodBuilder::new("m", "()V");
        let label = builder.new_label();
        builder.visit_jump_insn(GOTO, label);
        builder.visit_label(label);
        builder.visit_insn(RETURN);
        let method = builder.build().expect("build method");

        let mut m = Matcher::new(&method);
        m.expect_jump(GOTO, "l").expect_label("l").expect_opcode(RETURN);
        assert!(m.is_active());

        let mut m = Matcher::new(&method);
        m.expect_opcode(GOTO).expect_label("l");
        assert!(m.is_failed());
    }

    #[test]
    fn bound_owner_must_stay_consistent() {
        let mut builder = MethodBuilder::new("m", "()V");
        builder.visit_method_insn(INVOKEINTERFACE, "Resource", "close", "()V", true);
        builder.visit_method_insn(INVOKEVIRTUAL, "Other", "close", "()V", false);
        let method = builder.build().expect("build method");

        let mut m = Matcher::new(&method);
        m.expect_invoke_bound(&[INVOKEINTERFACE, INVOKEVIRTUAL], "r", "close", "()V");
        assert!(m.is_active());
        m.expect_invoke_bound(&[INVOKEINTERFACE, INVOKEVIRTUAL], "r", "close", "()V");
        assert!(m.is_failed());
    }

    #[test]
    fn first_is_aload0_requires_slot_zero() {
        let method = sample_method();
        assert!(Matcher::new(&method).expect_first_is_aload0().is_active());

        let mut builder = MethodBuilder::new("m", "()V").with_access(MethodAccess::STATIC);
        builder.visit_var_insn(ALOAD, 1);
        builder.visit_insn(ARETURN);
        let other = builder.build().expect("build method");
        assert!(Matcher::new(&other).expect_first_is_aload0().is_failed());
    }

    #[test]
    fn expect_past_end_fails() {
        let method = sample_method();
        let mut m = Matcher::after(&method, 8);
        m.expect_opcode(RETURN);
        assert!(m.is_failed());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Skip,
        Advance,
        Opcode(u8),
        Var(u8),
        Switch,
        Field,
        Invoke,
        Type,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Skip),
            Just(Op::Advance),
            any::<u8>().prop_map(Op::Opcode),
            any::<u8>().prop_map(Op::Var),
            Just(Op::Switch),
            Just(Op::Field),
            Just(Op::Invoke),
            Just(Op::Type),
        ]
    }

    proptest! {
        #[test]
        fn failed_cursor_stays_failed(ops in proptest::collection::vec(op_strategy(), 0..32)) {
            let method = sample_method();
            let mut m = Matcher::new(&method);
            m.fail();
            for op in ops {
                match op {
                    Op::Skip => m.skip_non_opcode(),
                    Op::Advance => m.advance(),
                    Op::Opcode(code) => m.expect_opcode(code),
                    Op::Var(code) => m.expect_var(code, "v"),
                    Op::Switch => m.expect_switch(),
                    Op::Field => m.expect_field(GETFIELD, ANY, ANY, ANY),
                    Op::Invoke => m.expect_invoke(INVOKEVIRTUAL, ANY, ANY, ANY),
                    Op::Type => m.expect_type(CHECKCAST, ANY),
                };
                prop_assert_eq!(Cursor::Failed, m.cursor());
                prop_assert_eq!(None, m.matched());
            }
        }
    }
}
