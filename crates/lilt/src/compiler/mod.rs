//! The compiler: expression trees to bytecode programs.
//!
//! Compilation walks the homoiconic tree, dispatching on the special-form
//! head symbols and falling through to call compilation for ordinary lists.
//! Each function compiles into its own [`CompiledBlock`], which finishes
//! into a flat segment with resolved branches; the program collects the
//! static tables: deduplicated strings, literal objects, user functions,
//! till continuations, and source locations.
//!
//! Scope resolution happens here, independently of the parser's scopes: the
//! compiler walks its own scope chain, counting function boundaries to pick
//! the depth-indexed load/store opcodes, and falling back to the module's
//! global namespace for unresolved names.

pub mod block;
mod till;

use std::sync::Arc;

use crate::{
    bytecode::{disassemble, Instr, Opcode},
    compiler::block::{CompiledBlock, IrOperand, LabelId},
    diagnostics::{Diagnostic, Position},
    dict::Dict,
    heap::{HeapData, HeapId},
    intern::{KnownSymbol, SymbolId},
    modules::ModuleId,
    runtime::RuntimeContext,
    types::list,
    value::Value,
};

/// One entry in the program's source-location table.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub filename: Arc<str>,
    pub line: u32,
    pub column: u32,
    /// The name assigned near this location (function names for traces);
    /// the sentinel when none.
    pub assigned_name: SymbolId,
}

/// The compiled, closure-independent description of one function.
#[derive(Debug)]
pub struct UserFunctionInfo {
    /// Display name, when one was assigned.
    pub name: SymbolId,
    pub arg_names: Vec<SymbolId>,
    pub num_args: u16,
    /// When set, extra arguments collect into a list bound to the last
    /// parameter.
    pub rest_param: bool,
    /// `(arg index, literal)` default values for trailing parameters.
    pub defaults: Vec<(u16, Value)>,
    /// Argument plus local slot count.
    pub num_vars: u16,
    /// Peak working-stack height, computed at compile time.
    pub temp_size: u16,
    /// Local names by slot (args first), for diagnostics.
    pub local_names: Vec<SymbolId>,
    pub segment: Vec<Instr>,
}

/// One till continuation's static description.
#[derive(Debug)]
pub struct TillInfo {
    /// The owning function's table index.
    pub function: u32,
    /// Resolved branch-target addresses, one per flag.
    pub branch_targets: Vec<u32>,
    /// False when every escape was demoted to a local jump.
    pub real_continuation_needed: bool,
}

/// A compiled program: the static tables the VM executes against.
#[derive(Debug)]
pub struct Program {
    pub module_id: ModuleId,
    /// Deduplicated string literals.
    pub strings: Vec<Box<str>>,
    /// The boxed string values backing `LdStr`, one per string.
    pub string_values: Vec<HeapId>,
    /// Literal objects (`LdObj`): quoted lists and other boxed literals.
    pub objects: Vec<Value>,
    /// Function table; index 0 is the top level.
    pub functions: Vec<UserFunctionInfo>,
    pub tills: Vec<TillInfo>,
    pub locations: Vec<SourceLocation>,
}

impl Program {
    /// Renders one function's segment for tests and the CLI.
    #[must_use]
    pub fn disassemble(&self, function: u32) -> String {
        disassemble(&self.functions[function as usize].segment)
    }

    /// Renders every function.
    #[must_use]
    pub fn disassemble_all(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (index, function) in self.functions.iter().enumerate() {
            let _ = writeln!(out, "; function {index}");
            out.push_str(&disassemble(&function.segment));
        }
        out
    }

    /// Counts occurrences of an opcode across every segment.
    #[must_use]
    pub fn count_opcode(&self, op: Opcode) -> usize {
        self.functions
            .iter()
            .map(|f| f.segment.iter().filter(|i| i.op == op).count())
            .sum()
    }
}

/// Flags threaded through expression compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileFlags {
    /// The caller discards the value; the expression must net zero stack.
    pub no_result: bool,
    /// The consumer only tests truthiness.
    pub bool_context: bool,
    /// The expression sits in tail position of a function.
    pub tail: bool,
}

impl CompileFlags {
    fn value(self) -> Self {
        Self {
            no_result: false,
            bool_context: false,
            tail: false,
        }
    }

    fn no_result() -> Self {
        Self {
            no_result: true,
            ..Self::default()
        }
    }
}

/// How a symbol resolved.
enum Resolution {
    Arg { depth: u32, slot: u16 },
    Local { depth: u32, slot: u16 },
    Till { depth: u32, till: TillRef },
    Global,
}

/// A till flag's compile-time attachment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TillRef {
    pub till_index: u32,
    pub flag_index: u32,
    pub when_label: LabelId,
    pub till_slot: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompileDeclKind {
    Arg,
    Local,
    TillFlag,
}

#[derive(Debug, Clone, Copy)]
struct CompiledDecl {
    kind: CompileDeclKind,
    slot: u16,
    till: Option<TillRef>,
}

/// One compiler scope level.
struct CompileScope {
    /// Index into the function stack of the owning function.
    function_depth: usize,
    decls: Dict<SymbolId, CompiledDecl>,
}

/// One function being compiled.
struct FunctionState {
    name: SymbolId,
    arg_names: Vec<SymbolId>,
    rest_param: bool,
    defaults: Vec<(u16, Value)>,
    local_names: Vec<SymbolId>,
    segment: Vec<Instr>,
    temp_size: u16,
}

impl FunctionState {
    fn num_args(&self) -> u16 {
        self.arg_names.len() as u16
    }

    fn add_local(&mut self, name: SymbolId) -> u16 {
        let slot = self.num_args() + self.local_names.len() as u16;
        self.local_names.push(name);
        slot
    }
}

/// Per-till bookkeeping while compiling.
pub(crate) struct TillBuilder {
    pub function: u32,
    pub when_labels: Vec<LabelId>,
    /// Set when a flag was referenced from a nested function.
    pub accessed_from_child: Vec<bool>,
    pub real_continuation_needed: bool,
    pub branch_targets: Vec<u32>,
}

/// The compiler state over one module.
pub struct Compiler<'ctx> {
    pub(crate) ctx: &'ctx mut RuntimeContext,
    module_id: ModuleId,
    filename: Arc<str>,
    functions: Vec<FunctionState>,
    /// In-progress function indices, innermost last.
    function_stack: Vec<u32>,
    scopes: Vec<CompileScope>,
    pub(crate) tills: Vec<TillBuilder>,
    strings: Vec<Box<str>>,
    string_values: Vec<HeapId>,
    string_index: Dict<String, u32>,
    objects: Vec<Value>,
    locations: Vec<SourceLocation>,
    pub(crate) current_loc: u32,
    next_label: u32,
    diagnostics: Vec<Diagnostic>,
}

/// Compiles a parsed program body into a runnable [`Program`].
pub fn compile_global(
    ctx: &mut RuntimeContext,
    module_id: ModuleId,
    filename: Arc<str>,
    expr: Value,
) -> Result<Arc<Program>, Vec<Diagnostic>> {
    let mut compiler = Compiler {
        ctx,
        module_id,
        filename: filename.clone(),
        functions: Vec::new(),
        function_stack: Vec::new(),
        scopes: Vec::new(),
        tills: Vec::new(),
        strings: Vec::new(),
        string_values: Vec::new(),
        string_index: Dict::new(),
        objects: Vec::new(),
        locations: vec![SourceLocation {
            filename,
            line: 0,
            column: 0,
            assigned_name: SymbolId::NONE,
        }],
        current_loc: 0,
        next_label: 0,
        diagnostics: Vec::new(),
    };

    // The synthetic top-level function takes no arguments.
    let top = compiler.begin_function(SymbolId::NONE, Vec::new(), false, Vec::new());
    let mut block = compiler.compile_expr(expr, CompileFlags::default());
    block.emit(Opcode::Ret, IrOperand::None, compiler.current_loc);
    compiler.finish_function(top, block);

    if compiler.diagnostics.iter().any(|d| d.severity >= crate::diagnostics::Severity::Error) {
        return Err(compiler.diagnostics);
    }

    let functions = compiler
        .functions
        .into_iter()
        .map(|f| UserFunctionInfo {
            name: f.name,
            num_args: f.arg_names.len() as u16,
            rest_param: f.rest_param,
            defaults: f.defaults,
            num_vars: f.arg_names.len() as u16 + f.local_names.len() as u16,
            temp_size: f.temp_size,
            local_names: f.local_names,
            arg_names: f.arg_names,
            segment: f.segment,
        })
        .collect();
    let tills = compiler
        .tills
        .into_iter()
        .map(|t| TillInfo {
            function: t.function,
            branch_targets: t.branch_targets,
            real_continuation_needed: t.real_continuation_needed,
        })
        .collect();

    Ok(Arc::new(Program {
        module_id,
        strings: compiler.strings,
        string_values: compiler.string_values,
        objects: compiler.objects,
        functions,
        tills,
        locations: compiler.locations,
    }))
}

impl Compiler<'_> {
    // ------------------------------------------------------------------
    // Function and scope plumbing.

    fn begin_function(
        &mut self,
        name: SymbolId,
        arg_names: Vec<SymbolId>,
        rest_param: bool,
        defaults: Vec<(u16, Value)>,
    ) -> u32 {
        let index = self.functions.len() as u32;
        let mut scope = CompileScope {
            function_depth: self.function_stack.len(),
            decls: Dict::new(),
        };
        for (slot, arg) in arg_names.iter().enumerate() {
            scope.decls.set(
                *arg,
                CompiledDecl {
                    kind: CompileDeclKind::Arg,
                    slot: slot as u16,
                    till: None,
                },
            );
        }
        self.functions.push(FunctionState {
            name,
            arg_names,
            rest_param,
            defaults,
            local_names: Vec::new(),
            segment: Vec::new(),
            temp_size: 0,
        });
        self.function_stack.push(index);
        self.scopes.push(scope);
        index
    }

    fn finish_function(&mut self, index: u32, block: CompiledBlock) {
        self.scopes.pop();
        self.function_stack.pop();
        let (segment, labels) = block.finish();
        // Resolve this function's till branch targets from its labels.
        for till in self.tills.iter_mut().filter(|t| t.function == index) {
            till.branch_targets = till
                .when_labels
                .iter()
                .map(|label| labels.get(&label.0).copied().unwrap_or(0))
                .collect();
        }
        let state = &mut self.functions[index as usize];
        state.temp_size = block.max_depth.max(0) as u16;
        state.segment = segment;
    }

    fn current_function(&mut self) -> &mut FunctionState {
        let index = *self.function_stack.last().expect("a function is always in progress");
        &mut self.functions[index as usize]
    }

    pub(crate) fn begin_scope(&mut self) {
        self.scopes.push(CompileScope {
            function_depth: self.function_stack.len() - 1,
            decls: Dict::new(),
        });
    }

    pub(crate) fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Allocates a local slot in the current function and declares it in
    /// the current scope.
    pub(crate) fn declare_local(&mut self, name: SymbolId) -> u16 {
        let slot = self.current_function().add_local(name);
        let scope = self.scopes.last_mut().expect("a scope is always open");
        scope.decls.set(
            name,
            CompiledDecl {
                kind: CompileDeclKind::Local,
                slot,
                till: None,
            },
        );
        slot
    }

    /// Declares a till flag bound to a continuation slot.
    pub(crate) fn declare_till_flag(&mut self, name: SymbolId, till: TillRef) {
        let scope = self.scopes.last_mut().expect("a scope is always open");
        scope.decls.set(
            name,
            CompiledDecl {
                kind: CompileDeclKind::TillFlag,
                slot: till.till_slot,
                till: Some(till),
            },
        );
    }

    fn resolve(&self, symbol: SymbolId) -> Resolution {
        let current_depth = self.function_stack.len() - 1;
        for scope in self.scopes.iter().rev() {
            if let Some(decl) = scope.decls.try_get(&symbol) {
                let depth = (current_depth - scope.function_depth) as u32;
                return match decl.kind {
                    CompileDeclKind::Arg => Resolution::Arg { depth, slot: decl.slot },
                    CompileDeclKind::Local => Resolution::Local { depth, slot: decl.slot },
                    CompileDeclKind::TillFlag => Resolution::Till {
                        depth,
                        till: decl.till.expect("till flags carry their attachment"),
                    },
                };
            }
        }
        Resolution::Global
    }

    /// Allocates the invisible local that holds a till continuation.
    pub(crate) fn till_local_slot(&mut self) -> u16 {
        self.current_function().add_local(SymbolId::NONE)
    }

    /// The index of the function currently being compiled.
    pub(crate) fn function_stack_top(&self) -> &u32 {
        self.function_stack.last().expect("a function is always in progress")
    }

    pub(crate) fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub(crate) fn add_error(&mut self, message: impl Into<String>) {
        let loc = &self.locations[self.current_loc as usize];
        let position = Position::new(loc.filename.clone(), loc.line, loc.column);
        self.diagnostics.push(Diagnostic::error(position, message));
    }

    /// Updates the current source location from an attributed expression.
    pub(crate) fn set_source_location(&mut self, expr: Value) {
        if let Some(pos) = list::source_location(expr, &self.ctx.heap) {
            let loc = SourceLocation {
                filename: pos.filename,
                line: pos.line,
                column: pos.column,
                assigned_name: SymbolId::NONE,
            };
            self.locations.push(loc);
            self.current_loc = (self.locations.len() - 1) as u32;
        }
    }

    // ------------------------------------------------------------------
    // Tables.

    fn intern_string(&mut self, text: &str) -> u32 {
        if let Some(&index) = self.string_index.try_get(&text.to_owned()) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(text.into());
        let id = self.ctx.heap.alloc_str(text);
        self.string_values.push(id);
        self.string_index.append(text.to_owned(), index);
        index
    }

    fn intern_object(&mut self, value: Value) -> u32 {
        let index = self.objects.len() as u32;
        self.objects.push(value);
        index
    }

    // ------------------------------------------------------------------
    // Expression compilation.

    /// Compiles one expression into a block honoring `flags`: net zero
    /// stack when `no_result`, exactly one pushed value otherwise.
    pub(crate) fn compile_expr(&mut self, expr: Value, flags: CompileFlags) -> CompiledBlock {
        match expr {
            Value::Symbol(symbol) => self.compile_symbol_load(symbol, flags),
            Value::Ref(id) => {
                let is_cons = matches!(self.ctx.heap.get(id), HeapData::Cons(_));
                if is_cons {
                    self.compile_list(expr, flags)
                } else {
                    self.compile_literal(expr, flags)
                }
            }
            _ => self.compile_literal(expr, flags),
        }
    }

    fn compile_literal(&mut self, value: Value, flags: CompileFlags) -> CompiledBlock {
        let mut block = CompiledBlock::new();
        if flags.no_result {
            return block;
        }
        let loc = self.current_loc;
        match value {
            Value::Null => {
                block.emit(Opcode::LdNull, IrOperand::None, loc);
            }
            Value::Bool(b) => {
                block.emit(Opcode::LdBool, IrOperand::Int(i64::from(b)), loc);
            }
            Value::Byte(v) => {
                block.emit(Opcode::Ld8, IrOperand::Int(i64::from(v)), loc);
            }
            Value::Int16(v) => {
                block.emit(Opcode::Ld16, IrOperand::Int(i64::from(v)), loc);
            }
            Value::Int32(v) => {
                block.emit(Opcode::Ld32, IrOperand::Int(i64::from(v)), loc);
            }
            Value::Int64(v) => {
                block.emit(Opcode::Ld64, IrOperand::Int(v), loc);
            }
            Value::Real32(v) => {
                block.emit(Opcode::LdR32, IrOperand::Int(i64::from(v.to_bits())), loc);
            }
            Value::Real64(v) => {
                block.emit(Opcode::LdR64, IrOperand::Int(v.to_bits() as i64), loc);
            }
            Value::Float32(v) => {
                block.emit(Opcode::LdF32, IrOperand::Int(i64::from(v.to_bits())), loc);
            }
            Value::Float64(v) => {
                block.emit(Opcode::LdF64, IrOperand::Int(v.to_bits() as i64), loc);
            }
            Value::Char(c) => {
                block.emit(Opcode::LdCh, IrOperand::Int(i64::from(c)), loc);
            }
            Value::Uni(c) => {
                block.emit(Opcode::LdUni, IrOperand::Int(i64::from(c as u32)), loc);
            }
            Value::Symbol(symbol) => {
                block.emit(Opcode::LdSym, IrOperand::Int(i64::from(symbol.index())), loc);
            }
            Value::Ref(id) => {
                let text = match self.ctx.heap.get(id) {
                    HeapData::Str(s) => Some(s.to_string()),
                    _ => None,
                };
                match text {
                    Some(text) => {
                        let index = self.intern_string(&text);
                        block.emit(Opcode::LdStr, IrOperand::Int(i64::from(index)), loc);
                    }
                    None => {
                        let index = self.intern_object(value);
                        block.emit(Opcode::LdObj, IrOperand::Int(i64::from(index)), loc);
                    }
                }
            }
        }
        block
    }

    fn compile_symbol_load(&mut self, symbol: SymbolId, flags: CompileFlags) -> CompiledBlock {
        let mut block = CompiledBlock::new();
        let loc = self.current_loc;
        match self.resolve(symbol) {
            Resolution::Arg { depth, slot } => {
                if flags.no_result {
                    return block;
                }
                emit_var_access(&mut block, VarAccess::Load, VarKind::Arg, depth, slot, loc);
            }
            Resolution::Local { depth, slot } => {
                if flags.no_result {
                    return block;
                }
                emit_var_access(&mut block, VarAccess::Load, VarKind::Local, depth, slot, loc);
            }
            Resolution::Global => {
                if flags.no_result {
                    return block;
                }
                block.emit(Opcode::LdX, IrOperand::Int(i64::from(symbol.index())), loc);
            }
            Resolution::Till { depth, till } => {
                // Mentioning a till flag escapes the till. A same-function
                // escape is a plain jump; a nested one invokes the real
                // continuation and marks it needed.
                self.compile_till_escape(&mut block, depth, till);
            }
        }
        block
    }

    /// Emits a store to `symbol` from the value on the stack top.
    /// `keep_value` selects the store-and-keep form.
    fn compile_symbol_store(&mut self, block: &mut CompiledBlock, symbol: SymbolId, keep_value: bool) {
        let loc = self.current_loc;
        match self.resolve(symbol) {
            Resolution::Arg { depth, slot } => {
                let access = if keep_value { VarAccess::Store } else { VarAccess::StorePop };
                emit_var_access(block, access, VarKind::Arg, depth, slot, loc);
            }
            Resolution::Local { depth, slot } => {
                let access = if keep_value { VarAccess::Store } else { VarAccess::StorePop };
                emit_var_access(block, access, VarKind::Local, depth, slot, loc);
            }
            Resolution::Global | Resolution::Till { .. } => {
                let op = if keep_value { Opcode::StX } else { Opcode::StpX };
                block.emit(op, IrOperand::Int(i64::from(symbol.index())), loc);
            }
        }
    }

    fn compile_list(&mut self, expr: Value, flags: CompileFlags) -> CompiledBlock {
        self.set_source_location(expr);
        let Some(items) = list::items(expr, &self.ctx.heap) else {
            self.add_error("Cannot compile an improper or cyclic list");
            return CompiledBlock::error_block();
        };
        if items.is_empty() {
            // The empty call form evaluates to null.
            return self.compile_literal(Value::Null, flags);
        }

        if let Value::Symbol(head) = items[0] {
            if head == KnownSymbol::Set.id() {
                return self.compile_set(&items[1..], flags);
            } else if head == KnownSymbol::If.id() {
                return self.compile_if(&items[1..], flags);
            } else if head == KnownSymbol::While.id() {
                return self.compile_while(&items[1..], flags);
            } else if head == KnownSymbol::Till.id() {
                return self.compile_till(&items[1..], flags);
            } else if head == KnownSymbol::Fn.id() {
                return self.compile_fn(&items[1..], flags);
            } else if head == KnownSymbol::Quote.id() {
                return self.compile_quote(&items[1..], flags);
            } else if head == KnownSymbol::Progn.id() {
                return self.compile_progn(&items[1..], flags);
            } else if head == KnownSymbol::Scope.id() {
                return self.compile_scope(&items[1..], flags);
            } else if head == KnownSymbol::Return.id() {
                return self.compile_return(&items[1..]);
            } else if head == KnownSymbol::Catch.id() {
                return self.compile_catch(&items[1..], flags);
            } else if head == KnownSymbol::NotForm.id() {
                return self.compile_not(&items[1..], flags);
            } else if head == KnownSymbol::OrForm.id() {
                return self.compile_or_and(&items[1..], flags, true);
            } else if head == KnownSymbol::AndForm.id() {
                return self.compile_or_and(&items[1..], flags, false);
            } else if head == KnownSymbol::NewForm.id() {
                return self.compile_new(&items[1..], flags);
            } else if head == KnownSymbol::IsForm.id() {
                return self.compile_is(&items[1..], flags);
            } else if head == KnownSymbol::TypeOfForm.id() {
                return self.compile_typeof(&items[1..], flags);
            } else if head == KnownSymbol::Dot.id() {
                return self.compile_dot(&items[1..], flags);
            } else if head == KnownSymbol::Index.id() {
                return self.compile_index(&items[1..], flags);
            } else if head == KnownSymbol::Include.id() {
                return self.compile_include(&items[1..], flags);
            }
        }
        self.compile_call(&items, flags)
    }

    // `[$set target value]`
    fn compile_set(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [target, value] = args else {
            self.add_error("Cannot compile [$set]: expected a target and a value");
            return CompiledBlock::error_block();
        };
        let mut block = CompiledBlock::new();
        match *target {
            Value::Symbol(symbol) => {
                let value_block = self.compile_expr(*value, CompileFlags::default().value());
                block.append_child(value_block);
                self.compile_symbol_store(&mut block, symbol, !flags.no_result);
            }
            Value::Ref(_) => {
                let head = list::car(*target, &self.ctx.heap);
                let parts = list::items(*target, &self.ctx.heap).unwrap_or_default();
                match head {
                    Value::Symbol(s) if s == KnownSymbol::Dot.id() && parts.len() == 3 => {
                        let Value::Symbol(prop) = parts[2] else {
                            self.add_error("Cannot compile [$set]: property name must be a symbol");
                            return CompiledBlock::error_block();
                        };
                        let obj_block = self.compile_expr(parts[1], CompileFlags::default().value());
                        block.append_child(obj_block);
                        let value_block = self.compile_expr(*value, CompileFlags::default().value());
                        block.append_child(value_block);
                        let op = if flags.no_result { Opcode::StpProp } else { Opcode::StProp };
                        block.emit(op, IrOperand::Int(i64::from(prop.index())), self.current_loc);
                    }
                    Value::Symbol(s) if s == KnownSymbol::Index.id() && parts.len() == 3 => {
                        let obj_block = self.compile_expr(parts[1], CompileFlags::default().value());
                        block.append_child(obj_block);
                        let key_block = self.compile_expr(parts[2], CompileFlags::default().value());
                        block.append_child(key_block);
                        let value_block = self.compile_expr(*value, CompileFlags::default().value());
                        block.append_child(value_block);
                        let op = if flags.no_result { Opcode::StpMember } else { Opcode::StMember };
                        block.emit(op, IrOperand::None, self.current_loc);
                    }
                    _ => {
                        self.add_error("Cannot compile [$set]: illegal assignment target");
                        return CompiledBlock::error_block();
                    }
                }
            }
            _ => {
                self.add_error("Cannot compile [$set]: illegal assignment target");
                return CompiledBlock::error_block();
            }
        }
        block
    }

    // `[$if cond then else]`
    fn compile_if(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        if args.len() < 2 || args.len() > 3 {
            self.add_error("Cannot compile [$if]: expected a condition and one or two branches");
            return CompiledBlock::error_block();
        }
        let (inverted, cond) = self.strip_nots(args[0]);
        let then_expr = args[1];
        let else_expr = args.get(2).copied().unwrap_or(Value::Null);

        let mut block = self.compile_expr(
            cond,
            CompileFlags {
                bool_context: true,
                ..CompileFlags::default()
            },
        );
        let else_label = self.new_label();
        let end_label = self.new_label();
        let branch = if inverted { Opcode::Bt } else { Opcode::Bf };
        block.emit(branch, IrOperand::Target(else_label), self.current_loc);

        let then_block = self.compile_expr(then_expr, flags);
        let then_delta = then_block.final_delta;
        block.append_child(then_block);
        block.emit(Opcode::Jmp, IrOperand::Target(end_label), self.current_loc);
        block.attach_label(else_label, self.current_loc);

        // The branches are alternatives; rebase before the else side.
        block.adjust_delta(-then_delta);
        let else_block = self.compile_expr(else_expr, flags);
        block.append_child(else_block);
        block.attach_label(end_label, self.current_loc);
        block
    }

    // `[$while cond body]`
    fn compile_while(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [cond, body] = args else {
            self.add_error("Cannot compile [$while]: expected a condition and a body");
            return CompiledBlock::error_block();
        };
        let (inverted, cond) = self.strip_nots(*cond);
        let loop_label = self.new_label();
        let test_label = self.new_label();

        let mut block = CompiledBlock::new();
        block.emit(Opcode::Jmp, IrOperand::Target(test_label), self.current_loc);
        block.attach_label(loop_label, self.current_loc);
        let body_block = self.compile_expr(*body, CompileFlags::no_result());
        block.append_child(body_block);
        block.attach_label(test_label, self.current_loc);
        let cond_block = self.compile_expr(
            cond,
            CompileFlags {
                bool_context: true,
                ..CompileFlags::default()
            },
        );
        block.append_child(cond_block);
        let branch = if inverted { Opcode::Bf } else { Opcode::Bt };
        block.emit(branch, IrOperand::Target(loop_label), self.current_loc);
        if !flags.no_result {
            block.emit(Opcode::LdNull, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$fn [params] body]`
    fn compile_fn(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [params, body] = args else {
            self.add_error("Cannot compile [$fn]: expected a parameter list and a body");
            return CompiledBlock::error_block();
        };
        let Some(param_items) = list::items(*params, &self.ctx.heap) else {
            self.add_error("Cannot compile [$fn]: parameter list is not well-formed");
            return CompiledBlock::error_block();
        };

        let mut arg_names = Vec::with_capacity(param_items.len());
        let mut defaults = Vec::new();
        let mut rest_param = false;
        for (position, param) in param_items.iter().enumerate() {
            match *param {
                Value::Symbol(name) => arg_names.push(name),
                Value::Ref(_) => {
                    let parts = list::items(*param, &self.ctx.heap).unwrap_or_default();
                    match parts.as_slice() {
                        // `[name]` — the rest parameter; must come last.
                        [Value::Symbol(name)] => {
                            if position + 1 != param_items.len() {
                                self.add_error("Cannot compile [$fn]: the rest parameter must come last");
                            }
                            rest_param = true;
                            arg_names.push(*name);
                        }
                        // `[name default]` — a defaulted parameter.
                        [Value::Symbol(name), default] => {
                            if matches!(default, Value::Ref(_)) {
                                self.add_error("Cannot compile [$fn]: default values must be literals");
                            }
                            defaults.push((position as u16, *default));
                            arg_names.push(*name);
                        }
                        _ => {
                            self.add_error("Cannot compile [$fn]: malformed parameter");
                        }
                    }
                }
                _ => self.add_error("Cannot compile [$fn]: parameters must be symbols"),
            }
        }

        let index = self.begin_function(SymbolId::NONE, arg_names, rest_param, defaults);
        let mut body_block = self.compile_expr(
            *body,
            CompileFlags {
                tail: true,
                ..CompileFlags::default()
            },
        );
        body_block.emit(Opcode::Ret, IrOperand::None, self.current_loc);
        self.finish_function(index, body_block);

        let mut block = CompiledBlock::new();
        if !flags.no_result {
            block.emit(Opcode::NewFn, IrOperand::Int(i64::from(index)), self.current_loc);
        }
        block
    }

    // `[$quote x]`
    fn compile_quote(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [quoted] = args else {
            self.add_error("Cannot compile [$quote]: expected exactly one argument");
            return CompiledBlock::error_block();
        };
        let mut block = CompiledBlock::new();
        if flags.no_result {
            return block;
        }
        match *quoted {
            Value::Symbol(symbol) => {
                block.emit(
                    Opcode::LdSym,
                    IrOperand::Int(i64::from(symbol.index())),
                    self.current_loc,
                );
                block
            }
            Value::Ref(_) => {
                let index = self.intern_object(*quoted);
                block.emit(Opcode::LdObj, IrOperand::Int(i64::from(index)), self.current_loc);
                block
            }
            literal => self.compile_literal(literal, flags),
        }
    }

    // `[$progn stmts…]`
    fn compile_progn(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let mut block = CompiledBlock::new();
        if args.is_empty() {
            if !flags.no_result {
                block.emit(Opcode::LdNull, IrOperand::None, self.current_loc);
            }
            return block;
        }
        for stmt in &args[..args.len() - 1] {
            let child = self.compile_expr(*stmt, CompileFlags::no_result());
            block.append_child(child);
        }
        let last = self.compile_expr(args[args.len() - 1], flags);
        block.append_child(last);
        block
    }

    // `[$scope [locals…] stmts…]`
    fn compile_scope(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let Some((locals, body)) = args.split_first() else {
            self.add_error("Cannot compile [$scope]: expected a local list");
            return CompiledBlock::error_block();
        };
        let Some(local_items) = list::items(*locals, &self.ctx.heap) else {
            self.add_error("Cannot compile [$scope]: local list is not well-formed");
            return CompiledBlock::error_block();
        };
        self.begin_scope();
        for local in &local_items {
            match *local {
                Value::Symbol(name) => {
                    let _ = self.declare_local(name);
                }
                _ => self.add_error("Cannot compile [$scope]: locals must be symbols"),
            }
        }
        let block = self.compile_progn(body, flags);
        self.end_scope();
        block
    }

    // `[$return value]`
    fn compile_return(&mut self, args: &[Value]) -> CompiledBlock {
        let value = args.first().copied().unwrap_or(Value::Null);
        let mut block = self.compile_expr(value, CompileFlags::default().value());
        block.emit(Opcode::Ret, IrOperand::None, self.current_loc);
        // Nothing after a return runs; rebase so surrounding accounting
        // stays path-accurate.
        block.adjust_delta(-1);
        block
    }

    // `[$catch body handler]`
    fn compile_catch(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [body, handler] = args else {
            self.add_error("Cannot compile [$catch]: expected a body and a handler");
            return CompiledBlock::error_block();
        };
        let catch_label = self.new_label();
        let end_label = self.new_label();
        // The thrown value parks in an invisible local while the handler
        // function is pushed.
        let exc_slot = self.current_function().add_local(SymbolId::NONE);

        let mut block = CompiledBlock::new();
        block.emit(Opcode::Try, IrOperand::Target(catch_label), self.current_loc);
        // The body must return through EndTry, so tail calls stay ordinary
        // calls inside a try scope.
        let body_flags = CompileFlags {
            no_result: flags.no_result,
            ..CompileFlags::default()
        };
        let body_block = self.compile_expr(*body, body_flags);
        let body_delta = body_block.final_delta;
        block.append_child(body_block);
        block.emit(Opcode::EndTry, IrOperand::None, self.current_loc);
        block.emit(Opcode::Jmp, IrOperand::Target(end_label), self.current_loc);

        block.attach_label(catch_label, self.current_loc);
        block.adjust_delta(-body_delta);
        // The VM pushes the thrown value at the handler address.
        block.adjust_delta(1);
        emit_var_access(
            &mut block,
            VarAccess::StorePop,
            VarKind::Local,
            0,
            exc_slot,
            self.current_loc,
        );
        let handler_block = self.compile_expr(*handler, CompileFlags::default().value());
        block.append_child(handler_block);
        emit_var_access(&mut block, VarAccess::Load, VarKind::Local, 0, exc_slot, self.current_loc);
        block.emit(Opcode::Call1, IrOperand::None, self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block.attach_label(end_label, self.current_loc);
        block
    }

    // `[$not x]`
    fn compile_not(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [inner] = args else {
            self.add_error("Cannot compile [$not]: expected exactly one argument");
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_expr(
            *inner,
            CompileFlags {
                bool_context: true,
                no_result: flags.no_result,
                ..CompileFlags::default()
            },
        );
        if !flags.no_result {
            block.emit(Opcode::Not, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$or a b …]` / `[$and a b …]` — short-circuit, value-preserving.
    fn compile_or_and(&mut self, args: &[Value], flags: CompileFlags, is_or: bool) -> CompiledBlock {
        if args.is_empty() {
            return self.compile_literal(Value::Bool(!is_or), flags);
        }
        let end_label = self.new_label();
        let mut block = CompiledBlock::new();
        let branch = if is_or { Opcode::Bt } else { Opcode::Bf };
        for arg in &args[..args.len() - 1] {
            let child = self.compile_expr(*arg, CompileFlags::default().value());
            block.append_child(child);
            block.emit(Opcode::Dup1, IrOperand::None, self.current_loc);
            block.emit(branch, IrOperand::Target(end_label), self.current_loc);
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        let last = self.compile_expr(args[args.len() - 1], CompileFlags::default().value());
        block.append_child(last);
        block.attach_label(end_label, self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$new base [[name value]…]]`
    fn compile_new(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [base, members] = args else {
            self.add_error("Cannot compile [$new]: expected a base and a member list");
            return CompiledBlock::error_block();
        };
        let Some(member_items) = list::items(*members, &self.ctx.heap) else {
            self.add_error("Cannot compile [$new]: member list is not well-formed");
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_expr(*base, CompileFlags::default().value());
        let mut count = 0_i64;
        for member in &member_items {
            let parts = list::items(*member, &self.ctx.heap).unwrap_or_default();
            let [Value::Symbol(name), value] = parts.as_slice() else {
                self.add_error("Cannot compile [$new]: members must be [name value] pairs");
                continue;
            };
            block.emit(Opcode::LdSym, IrOperand::Int(i64::from(name.index())), self.current_loc);
            let value_block = self.compile_expr(*value, CompileFlags::default().value());
            block.append_child(value_block);
            count += 1;
        }
        block.emit(Opcode::NewObj, IrOperand::Int(count), self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$is a b]`
    fn compile_is(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [a, b] = args else {
            self.add_error("Cannot compile [$is]: expected two arguments");
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_expr(*a, CompileFlags::default().value());
        let b_block = self.compile_expr(*b, CompileFlags::default().value());
        block.append_child(b_block);
        block.emit(Opcode::Is, IrOperand::None, self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$typeof x]`
    fn compile_typeof(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [inner] = args else {
            self.add_error("Cannot compile [$typeof]: expected exactly one argument");
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_expr(*inner, CompileFlags::default().value());
        block.emit(Opcode::TypeOf, IrOperand::None, self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$dot obj name]` in expression position.
    fn compile_dot(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [obj, name] = args else {
            self.add_error("Cannot compile [$dot]: expected an object and a name");
            return CompiledBlock::error_block();
        };
        let Value::Symbol(name) = *name else {
            self.add_error("Cannot compile [$dot]: the property name must be a symbol");
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_expr(*obj, CompileFlags::default().value());
        block.emit(Opcode::LdProp, IrOperand::Int(i64::from(name.index())), self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$index obj key]`
    fn compile_index(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [obj, key] = args else {
            self.add_error("Cannot compile [$index]: expected an object and a key");
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_expr(*obj, CompileFlags::default().value());
        let key_block = self.compile_expr(*key, CompileFlags::default().value());
        block.append_child(key_block);
        block.emit(Opcode::LdMember, IrOperand::None, self.current_loc);
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
        }
        block
    }

    // `[$include module-id old new]` — binds a loaded module's export into
    // the current namespace. The module already ran when the include was
    // parsed, so its value is a compile-time constant.
    fn compile_include(&mut self, args: &[Value], flags: CompileFlags) -> CompiledBlock {
        let [Value::Int64(module_id), Value::Symbol(old), Value::Symbol(new)] = args else {
            self.add_error("Cannot compile [$include]: malformed include binding");
            return CompiledBlock::error_block();
        };
        let module_id = *module_id as ModuleId;
        let Some(value) = self.ctx.modules.globals(module_id).try_get(old).copied() else {
            let name = self.ctx.symbols.name(*old).to_owned();
            self.add_error(format!("Included module does not define \"{name}\""));
            return CompiledBlock::error_block();
        };
        let mut block = self.compile_literal(value, CompileFlags::default().value());
        let op = if flags.no_result { Opcode::StpX } else { Opcode::StX };
        block.emit(op, IrOperand::Int(i64::from(new.index())), self.current_loc);
        block
    }

    // Ordinary call: `[f args…]`, with the method shape `[[$dot recv op] …]`
    // special-cased onto the operator opcodes.
    fn compile_call(&mut self, items: &[Value], flags: CompileFlags) -> CompiledBlock {
        let head = items[0];
        let args = &items[1..];

        // Method-call shape?
        if let Some((receiver, method)) = self.dot_shape(head) {
            if let Some(op) = operator_opcode(method, args.len()) {
                let mut block = self.compile_expr(receiver, CompileFlags::default().value());
                for arg in args {
                    let arg_block = self.compile_expr(*arg, CompileFlags::default().value());
                    block.append_child(arg_block);
                }
                block.emit(op, IrOperand::None, self.current_loc);
                if flags.no_result {
                    block.emit(Opcode::Pop1, IrOperand::None, self.current_loc);
                }
                return block;
            }
            // General method call: the receiver is the first argument.
            let mut block = self.compile_expr(receiver, CompileFlags::default().value());
            for arg in args {
                let arg_block = self.compile_expr(*arg, CompileFlags::default().value());
                block.append_child(arg_block);
            }
            let n = args.len();
            let loc = self.current_loc;
            if n <= 7 {
                let base = if flags.tail { Opcode::TMet0 } else { Opcode::Met0 };
                let op = Opcode::from_repr(base as u8 + n as u8).expect("arity row is contiguous");
                block.emit(op, IrOperand::Int(i64::from(method.index())), loc);
            } else {
                let op = if flags.tail { Opcode::TMet } else { Opcode::Met };
                block.emit(op, IrOperand::Pair(n as i32, method.index() as i32), loc);
            }
            if flags.no_result {
                block.emit(Opcode::Pop1, IrOperand::None, loc);
            }
            return block;
        }

        // Plain call.
        let mut block = self.compile_expr(head, CompileFlags::default().value());
        for arg in args {
            let arg_block = self.compile_expr(*arg, CompileFlags::default().value());
            block.append_child(arg_block);
        }
        let n = args.len();
        let loc = self.current_loc;
        if n <= 7 {
            let base = if flags.tail { Opcode::TCall0 } else { Opcode::Call0 };
            let op = Opcode::from_repr(base as u8 + n as u8).expect("arity row is contiguous");
            block.emit(op, IrOperand::None, loc);
        } else {
            let op = if flags.tail { Opcode::TCall } else { Opcode::Call };
            block.emit(op, IrOperand::Int(n as i64), loc);
        }
        if flags.no_result {
            block.emit(Opcode::Pop1, IrOperand::None, loc);
        }
        block
    }

    /// Splits `[$dot receiver name]` into its parts.
    fn dot_shape(&self, expr: Value) -> Option<(Value, SymbolId)> {
        let items = list::items(expr, &self.ctx.heap)?;
        if items.len() == 3
            && let Value::Symbol(head) = items[0]
            && head == KnownSymbol::Dot.id()
            && let Value::Symbol(name) = items[2]
        {
            Some((items[1], name))
        } else {
            None
        }
    }

    /// Peels `[$not …]` layers, returning whether the sense inverted.
    pub(crate) fn strip_nots(&mut self, expr: Value) -> (bool, Value) {
        let mut inverted = false;
        let mut current = expr;
        loop {
            let Some(items) = list::items(current, &self.ctx.heap) else {
                return (inverted, current);
            };
            if items.len() == 2
                && let Value::Symbol(head) = items[0]
                && head == KnownSymbol::NotForm.id()
            {
                inverted = !inverted;
                current = items[1];
            } else {
                return (inverted, current);
            }
        }
    }
}

/// Which access shape a variable opcode takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarAccess {
    Load,
    Store,
    StorePop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Arg,
    Local,
}

/// Emits a depth-indexed variable access, using the `0..7` shorthand rows
/// when the depth allows and the generic packed form otherwise.
fn emit_var_access(
    block: &mut CompiledBlock,
    access: VarAccess,
    kind: VarKind,
    depth: u32,
    slot: u16,
    loc: u32,
) {
    if depth <= 7 {
        let base = match (access, kind) {
            (VarAccess::Load, VarKind::Arg) => Opcode::LdArg0,
            (VarAccess::Load, VarKind::Local) => Opcode::LdLoc0,
            (VarAccess::Store, VarKind::Arg) => Opcode::StArg0,
            (VarAccess::Store, VarKind::Local) => Opcode::StLoc0,
            (VarAccess::StorePop, VarKind::Arg) => Opcode::StpArg0,
            (VarAccess::StorePop, VarKind::Local) => Opcode::StpLoc0,
        };
        let op = Opcode::from_repr(base as u8 + depth as u8).expect("shorthand rows are contiguous");
        block.emit(op, IrOperand::Int(i64::from(slot)), loc);
    } else {
        let op = match (access, kind) {
            (VarAccess::Load, VarKind::Arg) => Opcode::LdArg,
            (VarAccess::Load, VarKind::Local) => Opcode::LdLoc,
            (VarAccess::Store, VarKind::Arg) => Opcode::StArg,
            (VarAccess::Store, VarKind::Local) => Opcode::StLoc,
            (VarAccess::StorePop, VarKind::Arg) => Opcode::StpArg,
            (VarAccess::StorePop, VarKind::Local) => Opcode::StpLoc,
        };
        block.emit(op, IrOperand::Pair(depth as i32, i32::from(slot)), loc);
    }
}

/// Emits the load of a till continuation from `depth` environments up.
pub(crate) fn emit_till_continuation_load(block: &mut CompiledBlock, depth: u32, slot: u16, loc: u32) {
    emit_var_access(block, VarAccess::Load, VarKind::Local, depth, slot, loc);
}

/// The dedicated opcode for a well-known operator at a given arity.
fn operator_opcode(method: SymbolId, arity: usize) -> Option<Opcode> {
    use KnownSymbol as K;
    let binary = |op| if arity == 1 { Some(op) } else { None };
    let unary = |op| if arity == 0 { Some(op) } else { None };
    if method == K::Plus.id() {
        binary(Opcode::Add)
    } else if method == K::Minus.id() {
        if arity == 1 {
            Some(Opcode::Sub)
        } else if arity == 0 {
            Some(Opcode::Neg)
        } else {
            None
        }
    } else if method == K::Star.id() {
        binary(Opcode::Mul)
    } else if method == K::Slash.id() {
        binary(Opcode::Div)
    } else if method == K::Mod.id() {
        binary(Opcode::Mod)
    } else if method == K::Rem.id() {
        binary(Opcode::Rem)
    } else if method == K::RangeTo.id() {
        binary(Opcode::RangeTo)
    } else if method == K::Eq.id() {
        binary(Opcode::Eq)
    } else if method == K::Ne.id() {
        binary(Opcode::Ne)
    } else if method == K::Lt.id() {
        binary(Opcode::Lt)
    } else if method == K::Gt.id() {
        binary(Opcode::Gt)
    } else if method == K::Le.id() {
        binary(Opcode::Le)
    } else if method == K::Ge.id() {
        binary(Opcode::Ge)
    } else if method == K::SuperEq.id() {
        binary(Opcode::SuperEq)
    } else if method == K::SuperNe.id() {
        binary(Opcode::SuperNe)
    } else if method == K::Cmp.id() {
        binary(Opcode::Cmp)
    } else if method == K::Compare.id() {
        binary(Opcode::Compare)
    } else if method == K::Each.id() {
        binary(Opcode::Each)
    } else if method == K::Map.id() {
        binary(Opcode::Map)
    } else if method == K::Where.id() {
        binary(Opcode::Where)
    } else if method == K::Count.id() {
        if arity == 1 {
            Some(Opcode::Count)
        } else {
            unary(Opcode::UCount)
        }
    } else if method == K::Any.id() {
        if arity == 1 {
            Some(Opcode::Any)
        } else {
            unary(Opcode::UAny)
        }
    } else if method == K::Join.id() {
        if arity == 1 {
            Some(Opcode::Join)
        } else {
            unary(Opcode::UJoin)
        }
    } else if method == K::Bool.id() {
        unary(Opcode::Bool)
    } else if method == K::Int.id() {
        unary(Opcode::Int)
    } else if method == K::StringOp.id() {
        unary(Opcode::Str)
    } else if method == K::HashOp.id() {
        unary(Opcode::Hash)
    } else {
        None
    }
}
