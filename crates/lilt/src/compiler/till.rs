//! Till-form compilation.
//!
//! `[$till [flag1 … flagK] body [[flag when]…]]` compiles to a loop whose
//! only exits are the flags: mentioning a flag escapes to its when-clause.
//! A flag referenced in the same function compiles to a plain jump; a flag
//! referenced from a nested function needs the real escape continuation,
//! which `NewTill` materialises into an invisible local at loop entry and
//! `EndTill` kills on every exit path.
//!
//! After body and whens are compiled, the form is demoted when no flag was
//! touched from a nested function: the continuation-management instructions
//! are removed, leaving a loop that runs as cheaply as `while`. Otherwise
//! the continuation's branch-target table is populated from the when-clause
//! labels.

use crate::{
    bytecode::Opcode,
    compiler::{
        block::{CompiledBlock, IrOperand},
        CompileFlags, Compiler, TillBuilder, TillRef,
    },
    intern::SymbolId,
    types::list,
    value::Value,
};

impl Compiler<'_> {
    /// Compiles `[$till …]`; see the module docs for the shape.
    pub(crate) fn compile_till(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        // Validation: a flag list, a body, and an optional when list.
        if args.len() < 2 || args.len() > 3 {
            self.add_error("Cannot compile [$till]: Expression is not well-formed.");
            return CompiledBlock::error_block();
        }
        let Some(flag_items) = list::items(args[0], &self.ctx.heap) else {
            self.add_error("Cannot compile [$till]: List of terminating flags is an invalid form.");
            return CompiledBlock::error_block();
        };
        if flag_items.is_empty() {
            self.add_error("Cannot compile [$till]: List of terminating flags must not be empty.");
            return CompiledBlock::error_block();
        }
        let mut flag_symbols = Vec::with_capacity(flag_items.len());
        for item in &flag_items {
            match *item {
                Value::Symbol(symbol) => flag_symbols.push(symbol),
                _ => {
                    self.add_error("Cannot compile [$till]: List of flags must contain only symbols.");
                    return CompiledBlock::error_block();
                }
            }
        }
        let body = args[1];
        let whens = self.collect_whens(args.get(2).copied(), &flag_symbols);

        // Setup: a scope for the flags, an invisible local for the
        // continuation, and a label per distinct exit.
        self.begin_scope();
        let till_slot = self.till_local_slot();
        let till_index = self.tills.len() as u32;

        let null_label = self.new_label();
        let exit_label = self.new_label();
        let loop_label = self.new_label();
        let when_labels: Vec<_> = flag_symbols
            .iter()
            .map(|symbol| {
                if whens.iter().any(|(flag, _)| flag == symbol) {
                    self.new_label()
                } else {
                    null_label
                }
            })
            .collect();

        let function = *self.function_stack_top();
        self.tills.push(TillBuilder {
            function,
            when_labels: when_labels.clone(),
            accessed_from_child: vec![false; flag_symbols.len()],
            real_continuation_needed: false,
            branch_targets: Vec::new(),
        });
        for (index, symbol) in flag_symbols.iter().enumerate() {
            self.declare_till_flag(
                *symbol,
                TillRef {
                    till_index,
                    flag_index: index as u32,
                    when_label: when_labels[index],
                    till_slot,
                },
            );
        }

        // Core loop. The continuation-management instructions record their
        // indices so demotion can remove them.
        let mut block = CompiledBlock::new();
        let mut removable = Vec::new();
        let loc = self.current_loc;
        removable.push(block.emit(Opcode::NewTill, IrOperand::Int(i64::from(till_index)), loc));
        removable.push(block.emit(Opcode::StpLoc0, IrOperand::Int(i64::from(till_slot)), loc));
        block.attach_label(loop_label, loc);
        let body_block = self.compile_expr(body, CompileFlags::no_result());
        block.append_child(body_block);
        block.emit(Opcode::Jmp, IrOperand::Target(loop_label), self.current_loc);

        // When clauses: each lands on its flag's label, kills the
        // continuation, evaluates, and jumps out.
        let clause_flags = CompileFlags {
            no_result: flags.no_result,
            ..CompileFlags::default()
        };
        let mut bound_flags: Vec<SymbolId> = Vec::new();
        for (flag, when_body) in &whens {
            if bound_flags.contains(flag) {
                self.add_error("Cannot compile [$till]: Duplicate [when] clause.");
                continue;
            }
            bound_flags.push(*flag);
            let index = flag_symbols.iter().position(|s| s == flag).expect("validated above");
            let base_delta = block.final_delta;
            block.attach_label(when_labels[index], self.current_loc);
            removable.push(block.emit(Opcode::LdLoc0, IrOperand::Int(i64::from(till_slot)), self.current_loc));
            removable.push(block.emit(Opcode::EndTill, IrOperand::None, self.current_loc));
            let clause = self.compile_expr(*when_body, clause_flags);
            block.append_child(clause);
            block.emit(Opcode::Jmp, IrOperand::Target(exit_label), self.current_loc);
            // Exit paths are alternatives.
            block.adjust_delta(base_delta - block.final_delta);
        }

        // The shared null case, for flags with no when-clause.
        if whens.len() < flag_symbols.len() {
            let base_delta = block.final_delta;
            block.attach_label(null_label, self.current_loc);
            removable.push(block.emit(Opcode::LdLoc0, IrOperand::Int(i64::from(till_slot)), self.current_loc));
            removable.push(block.emit(Opcode::EndTill, IrOperand::None, self.current_loc));
            if !flags.no_result {
                block.emit(Opcode::LdNull, IrOperand::None, self.current_loc);
            }
            block.adjust_delta(base_delta - block.final_delta);
        }
        block.attach_label(exit_label, self.current_loc);
        if !flags.no_result {
            block.adjust_delta(1);
        }

        // Decide whether the real continuation is needed, then either
        // populate its branch targets (resolved to addresses when the
        // function finishes) or strip the management instructions.
        self.end_scope();
        let builder = &mut self.tills[till_index as usize];
        let real = builder.accessed_from_child.iter().any(|&b| b);
        builder.real_continuation_needed = real;
        if !real {
            for index in removable {
                block.remove_instruction(index);
            }
        }
        block
    }

    /// Collects `[[flag when]…]` pairs, dropping malformed or unknown ones
    /// with a diagnostic.
    fn collect_whens(&mut self, whens: Option<Value>, flags: &[SymbolId]) -> Vec<(SymbolId, Value)> {
        let Some(whens) = whens else { return Vec::new() };
        let Some(items) = list::items(whens, &self.ctx.heap) else {
            self.add_error("Cannot compile [$till]: List of [when] clauses is an invalid form.");
            return Vec::new();
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let parts = list::items(item, &self.ctx.heap).unwrap_or_default();
            match parts.as_slice() {
                [Value::Symbol(flag), body] => {
                    if flags.contains(flag) {
                        out.push((*flag, *body));
                    } else {
                        self.add_error("Cannot compile [$till]: [when] names an unknown flag.");
                    }
                }
                _ => self.add_error("Cannot compile [$till]: Each [when] must be a [flag body] pair."),
            }
        }
        out
    }

    /// Emits the escape for a till-flag reference.
    ///
    /// In the owning function the escape is a plain jump to the flag's
    /// when-clause. From a nested function it loads the continuation from
    /// the captured environment and invokes it, which marks the till as
    /// needing its real continuation.
    pub(crate) fn compile_till_escape(&mut self, block: &mut CompiledBlock, depth: u32, till: TillRef) {
        let loc = self.current_loc;
        if depth == 0 {
            block.emit(Opcode::Jmp, IrOperand::Target(till.when_label), loc);
        } else {
            self.tills[till.till_index as usize].accessed_from_child[till.flag_index as usize] = true;
            super::emit_till_continuation_load(block, depth, till.till_slot, loc);
            block.emit(Opcode::TillEsc, IrOperand::Int(i64::from(till.flag_index)), loc);
        }
        // An escape never returns; account for the value the surrounding
        // expression context expects.
        block.adjust_delta(1);
    }
}
