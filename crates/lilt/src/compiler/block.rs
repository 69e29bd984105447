//! The compiler's intermediate representation.
//!
//! A [`CompiledBlock`] is a vector of instructions whose branches point at
//! symbolic labels rather than numeric offsets, so blocks can be built out
//! of order, combined, and edited before addresses exist. Each block tracks
//! its net stack delta and peak stack depth as instructions are emitted;
//! combining blocks combines both. An error flag propagates up through
//! combination so the compiler can abort emission cleanly.
//!
//! Finishing a block assigns addresses (pseudo-ops and removed instructions
//! are skipped), resolves every branch to a signed relative offset, and
//! emits the final flat segment.

use crate::bytecode::{pack_pair, Instr, Opcode};

/// A symbolic branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// The operand of an IR instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrOperand {
    None,
    /// An immediate or table index.
    Int(i64),
    /// A packed `(hi, lo)` pair.
    Pair(i32, i32),
    /// A branch to a label.
    Target(LabelId),
    /// A label definition (only on `Label` pseudo-ops).
    LabelDef(LabelId),
}

/// One IR instruction.
#[derive(Debug, Clone, Copy)]
pub struct IrInstr {
    pub op: Opcode,
    pub operand: IrOperand,
    /// Source-location table index.
    pub loc: u32,
}

/// A block of instructions under construction.
#[derive(Debug, Default)]
pub struct CompiledBlock {
    pub instrs: Vec<IrInstr>,
    /// Net stack delta across the block.
    pub final_delta: i32,
    /// Peak cumulative delta.
    pub max_depth: i32,
    /// Set when compilation of this block failed.
    pub error: bool,
}

impl CompiledBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn error_block() -> Self {
        Self {
            error: true,
            ..Self::default()
        }
    }

    /// Emits one instruction whose stack effect is fixed by its opcode.
    pub fn emit(&mut self, op: Opcode, operand: IrOperand, loc: u32) -> usize {
        let effect = op.stack_effect().unwrap_or_else(|| operand_effect(op, &operand));
        self.emit_with_effect(op, operand, loc, effect)
    }

    /// Emits one instruction with an explicit stack effect (for the opcodes
    /// whose effect depends on context the operand does not capture).
    pub fn emit_with_effect(&mut self, op: Opcode, operand: IrOperand, loc: u32, effect: i32) -> usize {
        let index = self.instrs.len();
        self.instrs.push(IrInstr { op, operand, loc });
        self.apply_effect(effect);
        index
    }

    fn apply_effect(&mut self, effect: i32) {
        self.final_delta += effect;
        if self.final_delta > self.max_depth {
            self.max_depth = self.final_delta;
        }
    }

    /// Defines `label` at the current end of the block.
    pub fn attach_label(&mut self, label: LabelId, loc: u32) -> usize {
        self.emit(Opcode::Label, IrOperand::LabelDef(label), loc)
    }

    /// Rebases the running delta across a branch merge: when two emitted
    /// paths are alternatives, the caller removes one path's contribution so
    /// the block's delta stays the sum along any single path.
    pub fn adjust_delta(&mut self, delta: i32) {
        self.final_delta += delta;
    }

    /// Splices `child` onto the end of this block, combining stack
    /// accounting and propagating the error bit.
    pub fn append_child(&mut self, child: Self) {
        self.max_depth = self.max_depth.max(self.final_delta + child.max_depth);
        self.final_delta += child.final_delta;
        self.error |= child.error;
        self.instrs.extend(child.instrs);
    }

    /// Replaces the instruction at `index` with a removal marker; finishing
    /// drops it. Stack accounting is rolled back so the block's totals stay
    /// the sum of its live instructions.
    pub fn remove_instruction(&mut self, index: usize) {
        let instr = &mut self.instrs[index];
        let effect = instr
            .op
            .stack_effect()
            .unwrap_or_else(|| operand_effect(instr.op, &instr.operand));
        instr.op = Opcode::Nop;
        instr.operand = IrOperand::None;
        self.final_delta -= effect;
    }

    /// Assigns addresses, resolves branch targets to signed relative
    /// offsets, and emits the flat segment. Pseudo-ops and removal markers
    /// are dropped. Returns the segment and the resolved address of every
    /// label, so the caller can translate recorded labels (till branch
    /// targets) into addresses.
    ///
    /// A branch's resolved operand is `target.address - branch.address`;
    /// the VM applies it before advancing the instruction pointer.
    pub fn finish(&self) -> (Vec<Instr>, ahash::AHashMap<u32, u32>) {
        // First pass: the address each instruction would occupy (dropped
        // instructions share the address of the next live one), plus where
        // every label lands.
        let mut addresses = Vec::with_capacity(self.instrs.len());
        let mut labels: ahash::AHashMap<u32, u32> = ahash::AHashMap::new();
        let mut address: u32 = 0;
        for instr in &self.instrs {
            addresses.push(address);
            if instr.op == Opcode::Label
                && let IrOperand::LabelDef(label) = instr.operand
            {
                labels.insert(label.0, address);
            }
            if !dropped(instr) {
                address += 1;
            }
        }

        // Second pass: emit live instructions with resolved operands.
        let mut segment = Vec::with_capacity(address as usize);
        for (index, instr) in self.instrs.iter().enumerate() {
            if dropped(instr) {
                continue;
            }
            let own_address = addresses[index];
            let operand = match instr.operand {
                IrOperand::None => 0,
                IrOperand::Int(v) => v,
                IrOperand::Pair(hi, lo) => pack_pair(hi, lo),
                IrOperand::Target(label) => {
                    let target = labels
                        .get(&label.0)
                        .copied()
                        .expect("every branch target label is defined in its block");
                    i64::from(target) - i64::from(own_address)
                }
                IrOperand::LabelDef(_) => unreachable!("label pseudo-ops are dropped"),
            };
            segment.push(Instr {
                op: instr.op,
                operand,
                loc: instr.loc,
            });
        }
        (segment, labels)
    }
}

fn dropped(instr: &IrInstr) -> bool {
    instr.op.is_pseudo() || instr.op == Opcode::Nop
}

/// Stack effect of operand-dependent opcodes.
pub(crate) fn operand_effect(op: Opcode, operand: &IrOperand) -> i32 {
    let n = match operand {
        IrOperand::Int(v) => *v as i32,
        IrOperand::Pair(hi, _) => *hi,
        _ => 0,
    };
    match op {
        Opcode::Dup => 1,
        Opcode::Pop => -n,
        Opcode::Rep => -n,
        // Variadic call: pops the function and n args, pushes the result.
        Opcode::Call | Opcode::TCall => -n,
        // Variadic method call: pops the target and n args, pushes the result.
        Opcode::Met | Opcode::TMet => -n,
        // Pops n (name, value) pairs and the base, pushes the object.
        Opcode::NewObj => -2 * n,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate_and_peak() {
        let mut block = CompiledBlock::new();
        block.emit(Opcode::Ld64, IrOperand::Int(1), 0);
        block.emit(Opcode::Ld64, IrOperand::Int(2), 0);
        block.emit(Opcode::Add, IrOperand::None, 0);
        assert_eq!(block.final_delta, 1);
        assert_eq!(block.max_depth, 2);
    }

    #[test]
    fn append_child_combines_accounting() {
        let mut a = CompiledBlock::new();
        a.emit(Opcode::Ld64, IrOperand::Int(1), 0);

        let mut b = CompiledBlock::new();
        b.emit(Opcode::Ld64, IrOperand::Int(2), 0);
        b.emit(Opcode::Ld64, IrOperand::Int(3), 0);
        b.emit(Opcode::Add, IrOperand::None, 0);
        b.emit(Opcode::Add, IrOperand::None, 0);

        a.append_child(b);
        // Peak is 1 (from a) + 2 (b's own peak) = 3; net is 1.
        assert_eq!(a.max_depth, 3);
        assert_eq!(a.final_delta, 1);
    }

    #[test]
    fn error_bit_propagates_through_append() {
        let mut a = CompiledBlock::new();
        a.append_child(CompiledBlock::error_block());
        assert!(a.error);
    }

    #[test]
    fn branches_resolve_to_relative_offsets() {
        let mut block = CompiledBlock::new();
        let end = LabelId(0);
        block.emit(Opcode::LdBool, IrOperand::Int(1), 0);
        block.emit(Opcode::Bf, IrOperand::Target(end), 0);
        block.emit(Opcode::Ld64, IrOperand::Int(42), 0);
        block.attach_label(end, 0);
        block.emit(Opcode::Ret, IrOperand::None, 0);

        let (segment, labels) = block.finish();
        // The label pseudo-op is dropped; four live instructions remain.
        assert_eq!(segment.len(), 4);
        assert_eq!(labels.get(&0).copied(), Some(3));
        // Bf sits at address 1 and targets address 3.
        assert_eq!(segment[1].op, Opcode::Bf);
        assert_eq!(segment[1].operand, 2);
    }

    #[test]
    fn removed_instructions_vanish_and_rollback_deltas() {
        let mut block = CompiledBlock::new();
        let load = block.emit(Opcode::LdNull, IrOperand::None, 0);
        block.emit(Opcode::Ret, IrOperand::None, 0);
        assert_eq!(block.final_delta, 1);
        block.remove_instruction(load);
        assert_eq!(block.final_delta, 0);
        let (segment, _) = block.finish();
        assert_eq!(segment.len(), 1);
        assert_eq!(segment[0].op, Opcode::Ret);
    }

    #[test]
    fn pair_operands_pack() {
        let mut block = CompiledBlock::new();
        block.emit(Opcode::LdLoc, IrOperand::Pair(2, 5), 0);
        let (segment, _) = block.finish();
        let instr = segment[0];
        assert_eq!(instr.operand_pair(), (2, 5));
    }
}
