//! The bytecode virtual machine.
//!
//! A stack machine over `(opcode, operand)` instructions. Values live on one
//! operand stack; activations live on a frame stack, each frame owning its
//! instruction pointer and pointing at the closure (environment) holding its
//! argument and local slots. Calls push frames, tail calls replace them,
//! `Try` records a handler, and till escapes unwind the frame stack to the
//! continuation's still-live activation.
//!
//! State-machine externals are the only suspension mechanism: they push a
//! two-instruction frame (`StateMachStart`/`StateMachBody`) and are
//! re-entered once per requested call, so iteration never consumes native
//! stack.

pub mod error;
pub mod ops;

use std::sync::Arc;

pub use error::{ErrorKind, EvalError, TraceEntry};
use smallvec::SmallVec;

use crate::{
    bytecode::{Instr, Opcode},
    compiler::{Program, SourceLocation, UserFunctionInfo},
    function::FunctionValue,
    heap::{Closure, HeapData, HeapId, TillContinuation},
    intern::{KnownSymbol, SymbolId},
    registry::{ArgVec, NativeBody, SmStep},
    runtime::RuntimeContext,
    tracer::VmTracer,
    types::{list, object::UserObject, pair::PairCell, range::RangeValue},
    value::{Kind, Value},
    vm::ops::ArithOp,
};

/// One activation record.
struct Frame {
    program: Arc<Program>,
    function: u32,
    ip: usize,
    closure: HeapId,
    stack_base: usize,
    activation: u64,
    /// Present on state-machine frames.
    sm: Option<SmFrame>,
}

struct SmFrame {
    external: u32,
    state: Option<Box<dyn std::any::Any>>,
}

/// One installed `Try` scope.
struct Handler {
    frame_index: usize,
    address: usize,
    stack_depth: usize,
}

enum Step {
    Continue,
    Finished(Value),
}

/// The virtual machine over one runtime context.
pub struct Vm<'ctx, 'tr> {
    ctx: &'ctx mut RuntimeContext,
    tracer: &'tr mut dyn VmTracer,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
    next_activation: u64,
    sm_program: Arc<Program>,
}

impl<'ctx, 'tr> Vm<'ctx, 'tr> {
    pub fn new(ctx: &'ctx mut RuntimeContext, tracer: &'tr mut dyn VmTracer) -> Self {
        let sm_program = Arc::new(Program {
            module_id: u32::MAX,
            strings: Vec::new(),
            string_values: Vec::new(),
            objects: Vec::new(),
            functions: vec![UserFunctionInfo {
                name: SymbolId::NONE,
                arg_names: Vec::new(),
                num_args: 0,
                rest_param: false,
                defaults: Vec::new(),
                num_vars: 0,
                temp_size: 4,
                local_names: Vec::new(),
                segment: vec![
                    Instr {
                        op: Opcode::StateMachStart,
                        operand: 0,
                        loc: 0,
                    },
                    Instr {
                        op: Opcode::StateMachBody,
                        operand: 0,
                        loc: 0,
                    },
                ],
            }],
            tills: Vec::new(),
            locations: vec![SourceLocation {
                filename: "<state-machine>".into(),
                line: 0,
                column: 0,
                assigned_name: SymbolId::NONE,
            }],
        });
        Self {
            ctx,
            tracer,
            stack: Vec::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            next_activation: 1,
            sm_program,
        }
    }

    /// Runs a program's top level to completion.
    pub fn run(&mut self, program: Arc<Program>) -> Result<Value, EvalError> {
        let closure = self.alloc_closure(&program, 0, ArgVec::new())?;
        let activation = self.bump_activation();
        self.frames.push(Frame {
            program,
            function: 0,
            ip: 0,
            closure,
            stack_base: 0,
            activation,
            sm: None,
        });
        loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Finished(value)) => return Ok(value),
                Err(error) => self.throw(error)?,
            }
        }
    }

    fn bump_activation(&mut self) -> u64 {
        let id = self.next_activation;
        self.next_activation += 1;
        id
    }

    // ------------------------------------------------------------------
    // Stack helpers.

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler-verified stack depth")
    }

    fn pop_args(&mut self, count: usize) -> ArgVec {
        let start = self.stack.len() - count;
        self.stack.drain(start..).collect()
    }

    // ------------------------------------------------------------------
    // The dispatch loop body: one instruction.

    #[expect(clippy::too_many_lines, reason = "the dispatch match is one conceptual unit")]
    fn step(&mut self) -> Result<Step, EvalError> {
        let frame_index = self.frames.len() - 1;
        let (program, function, ip) = {
            let frame = &self.frames[frame_index];
            (frame.program.clone(), frame.function, frame.ip)
        };
        let segment = &program.functions[function as usize].segment;
        if ip >= segment.len() {
            // Falling off the end returns null; every compiled function
            // ends in Ret, so only synthetic segments reach here.
            let value = Value::Null;
            return self.do_return(value);
        }
        let instr = segment[ip];
        self.frames[frame_index].ip = ip + 1;
        self.tracer.on_instruction(ip, instr.op);

        match instr.op {
            Opcode::Nop | Opcode::Brk => {}

            Opcode::Dup1 => {
                let top = *self.stack.last().expect("stack non-empty");
                self.push(top);
            }
            Opcode::Dup2 => {
                let value = self.stack[self.stack.len() - 2];
                self.push(value);
            }
            Opcode::Dup => {
                let n = instr.operand as usize;
                let value = self.stack[self.stack.len() - 1 - n];
                self.push(value);
            }
            Opcode::Pop1 => {
                let _ = self.pop();
            }
            Opcode::Pop2 => {
                let _ = self.pop();
                let _ = self.pop();
            }
            Opcode::Pop => {
                let n = instr.operand as usize;
                self.stack.truncate(self.stack.len() - n);
            }
            Opcode::Rep1 => {
                let top = self.pop();
                let _ = self.pop();
                self.push(top);
            }
            Opcode::Rep2 => {
                let top = self.pop();
                let _ = self.pop();
                let _ = self.pop();
                self.push(top);
            }
            Opcode::Rep => {
                let n = instr.operand as usize;
                let top = self.pop();
                self.stack.truncate(self.stack.len() - n);
                self.push(top);
            }

            // Literal loads.
            Opcode::LdNull => self.push(Value::Null),
            Opcode::LdBool => self.push(Value::Bool(instr.operand != 0)),
            Opcode::LdStr => {
                let value = Value::Ref(program.string_values[instr.operand as usize]);
                self.push(value);
            }
            Opcode::LdSym => self.push(Value::Symbol(SymbolId::from_index(instr.operand as u32))),
            Opcode::LdObj => self.push(program.objects[instr.operand as usize]),
            Opcode::LdClos => {
                let closure = self.frames[frame_index].closure;
                self.push(Value::Ref(closure));
            }
            Opcode::LdCh => self.push(Value::Char(instr.operand as u8)),
            Opcode::LdUni => {
                let c = char::from_u32(instr.operand as u32).unwrap_or('\u{FFFD}');
                self.push(Value::Uni(c));
            }
            Opcode::Ld8 => self.push(Value::Byte(instr.operand as u8)),
            Opcode::Ld16 => self.push(Value::Int16(instr.operand as i16)),
            Opcode::Ld32 => self.push(Value::Int32(instr.operand as i32)),
            Opcode::Ld64 => self.push(Value::Int64(instr.operand)),
            Opcode::LdR32 => self.push(Value::Real32(f32::from_bits(instr.operand as u32))),
            Opcode::LdR64 => self.push(Value::Real64(f64::from_bits(instr.operand as u64))),
            Opcode::LdR128 => {
                let value = f64::from_bits(instr.operand as u64);
                let id = self.ctx.heap.alloc(HeapData::Real128(value));
                self.push(Value::Ref(id));
            }
            Opcode::LdF32 => self.push(Value::Float32(f32::from_bits(instr.operand as u32))),
            Opcode::LdF64 => self.push(Value::Float64(f64::from_bits(instr.operand as u64))),

            // Generic variable I/O.
            Opcode::LdLoc | Opcode::LdArg => {
                let (depth, slot) = instr.operand_pair();
                let value = self.read_var(frame_index, depth as u32, slot as u16)?;
                self.push(value);
            }
            Opcode::StLoc | Opcode::StArg => {
                let (depth, slot) = instr.operand_pair();
                let value = *self.stack.last().expect("stack non-empty");
                self.write_var(frame_index, depth as u32, slot as u16, value)?;
            }
            Opcode::StpLoc | Opcode::StpArg => {
                let (depth, slot) = instr.operand_pair();
                let value = self.pop();
                self.write_var(frame_index, depth as u32, slot as u16, value)?;
            }
            Opcode::LdX => {
                let symbol = SymbolId::from_index(instr.operand as u32);
                let module = program.module_id;
                let existing = self.ctx.modules.globals(module).try_get(&symbol).copied();
                match existing {
                    Some(value) => self.push(value),
                    None => {
                        let name = self.ctx.symbols.name(symbol).to_owned();
                        return Err(EvalError::eval(format!("\"{name}\" is not defined")));
                    }
                }
            }
            Opcode::StX => {
                let symbol = SymbolId::from_index(instr.operand as u32);
                let value = *self.stack.last().expect("stack non-empty");
                self.ctx.modules.globals_mut(program.module_id).set(symbol, value);
            }
            Opcode::StpX => {
                let symbol = SymbolId::from_index(instr.operand as u32);
                let value = self.pop();
                self.ctx.modules.globals_mut(program.module_id).set(symbol, value);
            }

            // Depth-shorthand rows.
            op if (Opcode::LdArg0 as u8..=Opcode::LdArg7 as u8).contains(&(op as u8)) => {
                let depth = op as u8 - Opcode::LdArg0 as u8;
                let value = self.read_var(frame_index, u32::from(depth), instr.operand as u16)?;
                self.push(value);
            }
            op if (Opcode::LdLoc0 as u8..=Opcode::LdLoc7 as u8).contains(&(op as u8)) => {
                let depth = op as u8 - Opcode::LdLoc0 as u8;
                let value = self.read_var(frame_index, u32::from(depth), instr.operand as u16)?;
                self.push(value);
            }
            op if (Opcode::StArg0 as u8..=Opcode::StLoc7 as u8).contains(&(op as u8)) => {
                let base = if op as u8 >= Opcode::StLoc0 as u8 {
                    Opcode::StLoc0
                } else {
                    Opcode::StArg0
                };
                let depth = op as u8 - base as u8;
                let value = *self.stack.last().expect("stack non-empty");
                self.write_var(frame_index, u32::from(depth), instr.operand as u16, value)?;
            }
            op if (Opcode::StpArg0 as u8..=Opcode::StpLoc7 as u8).contains(&(op as u8)) => {
                let base = if op as u8 >= Opcode::StpLoc0 as u8 {
                    Opcode::StpLoc0
                } else {
                    Opcode::StpArg0
                };
                let depth = op as u8 - base as u8;
                let value = self.pop();
                self.write_var(frame_index, u32::from(depth), instr.operand as u16, value)?;
            }

            // Property access.
            Opcode::LdProp => {
                let symbol = SymbolId::from_index(instr.operand as u32);
                let obj = self.pop();
                let value = self.ctx.get_property(obj, symbol).unwrap_or(Value::Null);
                self.push(value);
            }
            Opcode::StProp | Opcode::StpProp => {
                let symbol = SymbolId::from_index(instr.operand as u32);
                let value = self.pop();
                let obj = self.pop();
                self.store_property(obj, symbol, value)?;
                if instr.op == Opcode::StProp {
                    self.push(value);
                }
            }
            Opcode::LdMember => {
                let key = self.pop();
                let obj = self.pop();
                let value = self.member_get(obj, key)?;
                self.push(value);
            }
            Opcode::StMember | Opcode::StpMember => {
                let value = self.pop();
                let key = self.pop();
                let obj = self.pop();
                let Value::Symbol(symbol) = key else {
                    return Err(EvalError::property("set-member requires a symbol key"));
                };
                self.store_property(obj, symbol, value)?;
                if instr.op == Opcode::StMember {
                    self.push(value);
                }
            }

            // Structural primitives.
            Opcode::Cons => {
                let d = self.pop();
                let a = self.pop();
                let cell = list::cons(&mut self.ctx.heap, a, d);
                self.push(cell);
            }
            Opcode::Car | Opcode::LdA => {
                let value = self.pop();
                let a = list::car(value, &self.ctx.heap);
                self.push(a);
            }
            Opcode::Cdr | Opcode::LdD => {
                let value = self.pop();
                let d = list::cdr(value, &self.ctx.heap);
                self.push(d);
            }
            Opcode::NewPair => {
                let right = self.pop();
                let left = self.pop();
                let id = self.ctx.heap.alloc(HeapData::Pair(PairCell {
                    left,
                    right,
                    loc: None,
                }));
                self.push(Value::Ref(id));
            }
            Opcode::Left | Opcode::LdLeft => {
                let value = self.pop();
                let out = self.pair_field(value, true);
                self.push(out);
            }
            Opcode::Right | Opcode::LdRight => {
                let value = self.pop();
                let out = self.pair_field(value, false);
                self.push(out);
            }
            Opcode::NewFn => {
                let frame = &self.frames[frame_index];
                let id = self.ctx.heap.alloc(HeapData::Function(FunctionValue::User {
                    function: instr.operand as u32,
                    program: frame.program.clone(),
                    closure: Some(frame.closure),
                }));
                self.push(Value::Ref(id));
            }
            Opcode::NewObj => {
                let n = instr.operand as usize;
                let mut members = Vec::with_capacity(n);
                for _ in 0..n {
                    let value = self.pop();
                    let name = self.pop();
                    members.push((name, value));
                }
                let base = self.pop();
                let base = if base.is_null() {
                    Value::Ref(self.ctx.bases.object)
                } else {
                    base
                };
                let mut object = UserObject::new(base);
                for (name, value) in members.into_iter().rev() {
                    let Value::Symbol(symbol) = name else {
                        return Err(EvalError::property("object member names must be symbols"));
                    };
                    let _ = object.set_property(symbol, value);
                }
                let id = self.ctx.heap.alloc(HeapData::Object(object));
                self.push(Value::Ref(id));
            }
            Opcode::SuperEq => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(ops::identical(a, b)));
            }
            Opcode::SuperNe => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(!ops::identical(a, b)));
            }
            Opcode::Not => {
                let value = self.pop();
                let b = value.to_bool(&self.ctx.heap);
                self.push(Value::Bool(!b));
            }
            Opcode::Is => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(self.ctx.value_is(a, b)));
            }
            Opcode::TypeOf => {
                let value = self.pop();
                let symbol = value.kind(&self.ctx.heap).type_symbol();
                self.push(Value::Symbol(symbol));
            }

            // Calls.
            op if (Opcode::Call0 as u8..=Opcode::Call7 as u8).contains(&(op as u8)) => {
                let argc = (op as u8 - Opcode::Call0 as u8) as usize;
                self.op_call(argc, false)?;
            }
            op if (Opcode::Met0 as u8..=Opcode::Met7 as u8).contains(&(op as u8)) => {
                let argc = (op as u8 - Opcode::Met0 as u8) as usize;
                let symbol = SymbolId::from_index(instr.operand as u32);
                self.op_met(argc, symbol, false)?;
            }
            op if (Opcode::TCall0 as u8..=Opcode::TCall7 as u8).contains(&(op as u8)) => {
                let argc = (op as u8 - Opcode::TCall0 as u8) as usize;
                self.op_call(argc, true)?;
            }
            op if (Opcode::TMet0 as u8..=Opcode::TMet7 as u8).contains(&(op as u8)) => {
                let argc = (op as u8 - Opcode::TMet0 as u8) as usize;
                let symbol = SymbolId::from_index(instr.operand as u32);
                self.op_met(argc, symbol, true)?;
            }
            Opcode::Call | Opcode::TCall => {
                let argc = instr.operand as usize;
                self.op_call(argc, instr.op == Opcode::TCall)?;
            }
            Opcode::Met | Opcode::TMet => {
                let (argc, symbol) = instr.operand_pair();
                self.op_met(
                    argc as usize,
                    SymbolId::from_index(symbol as u32),
                    instr.op == Opcode::TMet,
                )?;
            }

            // Branches and control.
            Opcode::Jmp => {
                self.jump(frame_index, ip, instr.operand);
            }
            Opcode::Bt => {
                let value = self.pop();
                if value.to_bool(&self.ctx.heap) {
                    self.jump(frame_index, ip, instr.operand);
                }
            }
            Opcode::Bf => {
                let value = self.pop();
                if !value.to_bool(&self.ctx.heap) {
                    self.jump(frame_index, ip, instr.operand);
                }
            }
            Opcode::NewTill => {
                let activation = self.frames[frame_index].activation;
                let stack_floor = self.stack.len();
                let id = self.ctx.heap.alloc(HeapData::Till(TillContinuation {
                    till_index: instr.operand as u32,
                    activation,
                    stack_floor,
                    alive: true,
                }));
                self.push(Value::Ref(id));
            }
            Opcode::EndTill => {
                let value = self.pop();
                if let Value::Ref(id) = value
                    && let HeapData::Till(till) = self.ctx.heap.get_mut(id)
                {
                    till.alive = false;
                }
            }
            Opcode::TillEsc => {
                let value = self.pop();
                self.op_till_escape(value, instr.operand as u32)?;
            }
            Opcode::Try => {
                let address = (ip as i64 + instr.operand) as usize;
                self.handlers.push(Handler {
                    frame_index,
                    address,
                    stack_depth: self.stack.len(),
                });
            }
            Opcode::EndTry => {
                let _ = self.handlers.pop();
            }
            Opcode::Ret => {
                let value = self.pop();
                return self.do_return(value);
            }

            // Well-known binary operators.
            Opcode::Add => return self.op_arith(ArithOp::Add, KnownSymbol::Plus),
            Opcode::Sub => return self.op_arith(ArithOp::Sub, KnownSymbol::Minus),
            Opcode::Mul => return self.op_arith(ArithOp::Mul, KnownSymbol::Star),
            Opcode::Div => return self.op_arith(ArithOp::Div, KnownSymbol::Slash),
            Opcode::Mod => return self.op_arith(ArithOp::Mod, KnownSymbol::Mod),
            Opcode::Rem => return self.op_arith(ArithOp::Rem, KnownSymbol::Rem),
            Opcode::RangeTo => {
                let b = self.pop();
                let a = self.pop();
                let range = self.make_range(a, b)?;
                self.push(range);
            }
            Opcode::Eq => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a.compare_equal(b, &self.ctx.heap)));
            }
            Opcode::Ne => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(!a.compare_equal(b, &self.ctx.heap)));
            }
            Opcode::Lt => return self.op_compare(instr.op),
            Opcode::Gt => return self.op_compare(instr.op),
            Opcode::Le => return self.op_compare(instr.op),
            Opcode::Ge => return self.op_compare(instr.op),
            Opcode::Cmp | Opcode::Compare => {
                let b = self.pop();
                let a = self.pop();
                match ops::compare_values(&self.ctx.heap, a, b) {
                    Some(ordering) => self.push(Value::Int64(ordering as i64)),
                    None => return Err(EvalError::native("These values cannot be compared")),
                }
            }

            // Collection operators: dispatch to the receiver's methods.
            Opcode::Each => return self.op_collection(KnownSymbol::Each),
            Opcode::Map => return self.op_collection(KnownSymbol::Map),
            Opcode::Where => return self.op_collection(KnownSymbol::Where),
            Opcode::Count => return self.op_collection(KnownSymbol::Count),
            Opcode::Any => return self.op_collection(KnownSymbol::Any),
            Opcode::Join => return self.op_collection(KnownSymbol::Join),

            Opcode::UCount | Opcode::LdCount | Opcode::LdLength => {
                let value = self.pop();
                let count = self.count_of(value);
                match count {
                    Some(n) => self.push(Value::Int64(n as i64)),
                    None => self.push(Value::Null),
                }
            }
            Opcode::UAny => {
                let value = self.pop();
                let any = self.count_of(value).is_some_and(|n| n > 0);
                self.push(Value::Bool(any));
            }
            Opcode::UJoin => {
                let value = self.pop();
                let joined = self.join_list(value)?;
                self.push(joined);
            }
            Opcode::Neg => {
                let value = self.pop();
                let negated = self.negate(value)?;
                self.push(negated);
            }
            Opcode::Bool => {
                let value = self.pop();
                let b = value.to_bool(&self.ctx.heap);
                self.push(Value::Bool(b));
            }
            Opcode::Int => {
                let value = self.pop();
                match ops::to_int(&self.ctx.heap, value) {
                    Some(v) => self.push(Value::Int64(v)),
                    None => return Err(EvalError::native("This value cannot be converted to an integer")),
                }
            }
            Opcode::Str => {
                let value = self.pop();
                let rendered = value.stringify(&self.ctx.heap, &self.ctx.symbols);
                let id = self.ctx.heap.alloc_str(rendered);
                self.push(Value::Ref(id));
            }
            Opcode::Hash => {
                let value = self.pop();
                let hash = value.hash_value(&self.ctx.heap);
                self.push(Value::Int64(i64::from(hash)));
            }

            // Unary predicates.
            Opcode::NullQ => self.predicate(|kind| kind == Kind::Null),
            Opcode::ListQ => self.predicate(|kind| matches!(kind, Kind::List | Kind::Null)),
            Opcode::PairQ => self.predicate(|kind| kind == Kind::Pair),
            Opcode::FnQ => self.predicate(|kind| kind == Kind::Function),
            Opcode::BoolQ => self.predicate(|kind| kind == Kind::Bool),
            Opcode::IntQ => self.predicate(|kind| matches!(kind, Kind::Byte | Kind::Int16 | Kind::Int32 | Kind::Int64)),
            Opcode::StrQ => self.predicate(|kind| kind == Kind::String),
            Opcode::SymbolQ => self.predicate(|kind| kind == Kind::Symbol),

            Opcode::LdStart | Opcode::LdEnd => {
                let which = if instr.op == Opcode::LdStart {
                    KnownSymbol::Start
                } else {
                    KnownSymbol::End
                };
                let value = self.pop();
                let field = value.get_own_property(which.id(), &self.ctx.heap).unwrap_or(Value::Null);
                self.push(field);
            }

            // State-machine re-entry.
            Opcode::StateMachStart => {
                // The initial "previous result" for the first body entry.
                self.push(Value::Null);
            }
            Opcode::StateMachBody => {
                return self.op_state_machine_body(frame_index, ip);
            }

            Opcode::Pseudo | Opcode::EndBlock | Opcode::Label | Opcode::Block => {
                return Err(EvalError::eval("pseudo-op reached the interpreter"));
            }

            other => {
                return Err(EvalError::eval(format!("unimplemented opcode {other:?}")));
            }
        }
        Ok(Step::Continue)
    }

    fn jump(&mut self, frame_index: usize, ip: usize, offset: i64) {
        self.frames[frame_index].ip = (ip as i64 + offset) as usize;
    }

    // ------------------------------------------------------------------
    // Variables.

    fn closure_at_depth(&self, frame_index: usize, depth: u32) -> Result<HeapId, EvalError> {
        let mut id = self.frames[frame_index].closure;
        for _ in 0..depth {
            let HeapData::Closure(closure) = self.ctx.heap.get(id) else {
                return Err(EvalError::eval("variable scope walk left the closure chain"));
            };
            id = closure
                .parent
                .ok_or_else(|| EvalError::eval("variable scope depth exceeds the closure chain"))?;
        }
        Ok(id)
    }

    fn read_var(&mut self, frame_index: usize, depth: u32, slot: u16) -> Result<Value, EvalError> {
        let id = self.closure_at_depth(frame_index, depth)?;
        let HeapData::Closure(closure) = self.ctx.heap.get(id) else {
            return Err(EvalError::eval("variable scope walk left the closure chain"));
        };
        Ok(closure.vars[slot as usize])
    }

    fn write_var(&mut self, frame_index: usize, depth: u32, slot: u16, value: Value) -> Result<(), EvalError> {
        let id = self.closure_at_depth(frame_index, depth)?;
        let HeapData::Closure(closure) = self.ctx.heap.get_mut(id) else {
            return Err(EvalError::eval("variable scope walk left the closure chain"));
        };
        closure.vars[slot as usize] = value;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Properties and members.

    fn store_property(&mut self, obj: Value, name: SymbolId, value: Value) -> Result<(), EvalError> {
        let Value::Ref(id) = obj else {
            return Err(EvalError::property("only objects accept property writes"));
        };
        let HeapData::Object(object) = self.ctx.heap.get_mut(id) else {
            return Err(EvalError::property("only objects accept property writes"));
        };
        object.set_property(name, value).map_err(|_| {
            EvalError::security("this object does not permit that property to change")
        })
    }

    fn member_get(&mut self, obj: Value, key: Value) -> Result<Value, EvalError> {
        match obj.kind(&self.ctx.heap) {
            Kind::List => {
                let Some(index) = key.as_int() else {
                    return Err(EvalError::property("list indices must be integers"));
                };
                let items = list::items(obj, &self.ctx.heap)
                    .ok_or_else(|| EvalError::eval("cannot index an improper list"))?;
                items
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| EvalError::property(format!("list index {index} is out of range")))
            }
            Kind::String => {
                let Some(index) = key.as_int() else {
                    return Err(EvalError::property("string indices must be integers"));
                };
                let Value::Ref(id) = obj else { unreachable!("kind said string") };
                let ch = self.ctx.heap.str(id).chars().nth(index as usize);
                match ch {
                    Some(c) if c.is_ascii() => Ok(Value::Char(c as u8)),
                    Some(c) => Ok(Value::Uni(c)),
                    None => Err(EvalError::property(format!("string index {index} is out of range"))),
                }
            }
            Kind::Range => {
                let Some(index) = key.as_int() else {
                    return Err(EvalError::property("range indices must be integers"));
                };
                let Value::Ref(id) = obj else { unreachable!("kind said range") };
                let HeapData::Range(range) = self.ctx.heap.get(id) else {
                    unreachable!("kind said range")
                };
                range
                    .element(index as usize)
                    .ok_or_else(|| EvalError::property(format!("range index {index} is out of range")))
            }
            _ => match key {
                Value::Symbol(symbol) => Ok(self.ctx.get_property(obj, symbol).unwrap_or(Value::Null)),
                _ => Err(EvalError::property("get-member requires a symbol key here")),
            },
        }
    }

    fn pair_field(&self, value: Value, left: bool) -> Value {
        if let Value::Ref(id) = value
            && let HeapData::Pair(pair) = self.ctx.heap.get(id)
        {
            if left { pair.left } else { pair.right }
        } else {
            Value::Null
        }
    }

    fn predicate(&mut self, test: impl Fn(Kind) -> bool) {
        let value = self.pop();
        let kind = value.kind(&self.ctx.heap);
        self.push(Value::Bool(test(kind)));
    }

    // ------------------------------------------------------------------
    // Operators.

    fn op_arith(&mut self, op: ArithOp, method: KnownSymbol) -> Result<Step, EvalError> {
        let b = self.pop();
        let a = self.pop();
        if let Some(result) = ops::binary_arith(&mut self.ctx.heap, op, a, b)? {
            self.push(result);
            return Ok(Step::Continue);
        }
        self.dispatch_method(a, method.id(), smallvec_from(&[a, b]))?;
        Ok(Step::Continue)
    }

    fn op_compare(&mut self, op: Opcode) -> Result<Step, EvalError> {
        let b = self.pop();
        let a = self.pop();
        let Some(ordering) = ops::compare_values(&self.ctx.heap, a, b) else {
            return Err(EvalError::native("These values cannot be ordered"));
        };
        let result = match op {
            Opcode::Lt => ordering.is_lt(),
            Opcode::Gt => ordering.is_gt(),
            Opcode::Le => ordering.is_le(),
            _ => ordering.is_ge(),
        };
        self.push(Value::Bool(result));
        Ok(Step::Continue)
    }

    /// Binary collection operators dispatch as a method on the receiver.
    fn op_collection(&mut self, method: KnownSymbol) -> Result<Step, EvalError> {
        let f = self.pop();
        let receiver = self.pop();
        self.dispatch_method(receiver, method.id(), smallvec_from(&[receiver, f]))?;
        Ok(Step::Continue)
    }

    /// Looks `method` up through the receiver's prototype chain and calls
    /// it with the prepared argument window (receiver first).
    fn dispatch_method(&mut self, receiver: Value, method: SymbolId, args: ArgVec) -> Result<(), EvalError> {
        let Some(found) = self.ctx.get_property(receiver, method) else {
            let name = self.ctx.symbols.name(method).to_owned();
            let rendered = receiver.stringify(&self.ctx.heap, &self.ctx.symbols);
            return Err(EvalError::native(format!(
                "There is no method named \"{name}\" on {rendered}"
            )));
        };
        self.call_value(found, args, false)
    }

    fn count_of(&self, value: Value) -> Option<usize> {
        match value.kind(&self.ctx.heap) {
            Kind::Null => Some(0),
            Kind::List => list::safe_length(value, &self.ctx.heap),
            Kind::String => {
                let Value::Ref(id) = value else { return None };
                Some(self.ctx.heap.str(id).chars().count())
            }
            Kind::ByteArray => {
                let Value::Ref(id) = value else { return None };
                match self.ctx.heap.get(id) {
                    HeapData::ByteArray(bytes) => Some(bytes.len()),
                    _ => None,
                }
            }
            Kind::Range => {
                let Value::Ref(id) = value else { return None };
                match self.ctx.heap.get(id) {
                    HeapData::Range(range) => Some(range.len()),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn join_list(&mut self, value: Value) -> Result<Value, EvalError> {
        let items = list::items(value, &self.ctx.heap)
            .ok_or_else(|| EvalError::native("join requires a well-formed list"))?;
        let mut out = String::new();
        for item in items {
            out.push_str(&item.stringify(&self.ctx.heap, &self.ctx.symbols));
        }
        let id = self.ctx.heap.alloc_str(out);
        Ok(Value::Ref(id))
    }

    fn negate(&mut self, value: Value) -> Result<Value, EvalError> {
        Ok(match value {
            Value::Byte(v) => Value::Byte(v.wrapping_neg()),
            Value::Int16(v) => Value::Int16(v.wrapping_neg()),
            Value::Int32(v) => Value::Int32(v.wrapping_neg()),
            Value::Int64(v) => Value::Int64(v.wrapping_neg()),
            Value::Real32(v) => Value::Real32(-v),
            Value::Real64(v) => Value::Real64(-v),
            Value::Float32(v) => Value::Float32(-v),
            Value::Float64(v) => Value::Float64(-v),
            _ => return Err(EvalError::native("This value cannot be negated")),
        })
    }

    fn make_range(&mut self, a: Value, b: Value) -> Result<Value, EvalError> {
        let range = if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            let kind = a.kind(&self.ctx.heap);
            RangeValue::int(kind, x, y, None)
        } else if let (Some(x), Some(y)) = (a.as_float(&self.ctx.heap), b.as_float(&self.ctx.heap)) {
            let kind = a.kind(&self.ctx.heap);
            RangeValue::float(kind, x, y, None)
        } else {
            return Err(EvalError::native("range-to requires numeric endpoints"));
        };
        let range = range.map_err(|_| EvalError::native("range stepping must not be zero"))?;
        let id = self.ctx.heap.alloc(HeapData::Range(range));
        Ok(Value::Ref(id))
    }

    // ------------------------------------------------------------------
    // Calls.

    fn op_call(&mut self, argc: usize, tail: bool) -> Result<(), EvalError> {
        let args = self.pop_args(argc);
        let callee = self.pop();
        self.call_value(callee, args, tail)
    }

    fn op_met(&mut self, argc: usize, method: SymbolId, tail: bool) -> Result<(), EvalError> {
        let mut args = self.pop_args(argc);
        let target = self.pop();
        args.insert(0, target);
        let Some(found) = self.ctx.get_property(target, method) else {
            let name = self.ctx.symbols.name(method).to_owned();
            let rendered = target.stringify(&self.ctx.heap, &self.ctx.symbols);
            return Err(EvalError::native(format!(
                "There is no method named \"{name}\" on {rendered}"
            )));
        };
        self.call_value(found, args, tail)
    }

    /// Dispatches a call through a callable value.
    pub(crate) fn call_value(&mut self, callee: Value, args: ArgVec, tail: bool) -> Result<(), EvalError> {
        let Value::Ref(id) = callee else {
            return Err(EvalError::native("This value is not callable"));
        };
        enum Target {
            User {
                function: u32,
                program: Arc<Program>,
                closure: Option<HeapId>,
            },
            External(u32),
        }
        let target = match self.ctx.heap.get(id) {
            HeapData::Function(FunctionValue::User {
                function,
                program,
                closure,
            }) => Target::User {
                function: *function,
                program: program.clone(),
                closure: *closure,
            },
            HeapData::Function(FunctionValue::External(ext)) => Target::External(*ext),
            _ => return Err(EvalError::native("This value is not callable")),
        };
        match target {
            Target::User {
                function,
                program,
                closure,
            } => self.push_user_frame(function, program, closure, args, tail),
            Target::External(ext) => self.call_external(ext, args),
        }
    }

    fn push_user_frame(
        &mut self,
        function: u32,
        program: Arc<Program>,
        parent: Option<HeapId>,
        args: ArgVec,
        tail: bool,
    ) -> Result<(), EvalError> {
        if self.frames.len() >= self.ctx.limits.max_call_depth {
            return Err(EvalError::eval("call depth limit exceeded"));
        }
        let closure = self.alloc_closure_with_parent(&program, function, args, parent)?;
        let stack_base = if tail {
            // A tail call replaces the current frame, keeping its base so
            // the result returns one level up.
            let frame = self.frames.pop().expect("tail call inside a frame");
            self.stack.truncate(frame.stack_base);
            frame.stack_base
        } else {
            self.stack.len()
        };
        let activation = self.bump_activation();
        self.frames.push(Frame {
            program,
            function,
            ip: 0,
            closure,
            stack_base,
            activation,
            sm: None,
        });
        self.tracer.on_call(self.frames.len());
        Ok(())
    }

    fn alloc_closure(&mut self, program: &Arc<Program>, function: u32, args: ArgVec) -> Result<HeapId, EvalError> {
        self.alloc_closure_with_parent(program, function, args, None)
    }

    fn alloc_closure_with_parent(
        &mut self,
        program: &Arc<Program>,
        function: u32,
        mut args: ArgVec,
        parent: Option<HeapId>,
    ) -> Result<HeapId, EvalError> {
        let info = &program.functions[function as usize];
        let num_params = info.num_args as usize;

        if info.rest_param {
            let fixed = num_params - 1;
            if args.len() < fixed {
                return Err(EvalError::native(format!(
                    "This function requires at least {fixed} arguments, but was called with {}",
                    args.len()
                )));
            }
            let rest: Vec<Value> = args.drain(fixed..).collect();
            let rest_list = list::from_values(&mut self.ctx.heap, &rest);
            args.push(rest_list);
        } else {
            if args.len() > num_params {
                return Err(EvalError::native(format!(
                    "This function allows at most {num_params} arguments, but was called with {}",
                    args.len()
                )));
            }
            while args.len() < num_params {
                let position = args.len() as u16;
                match info.defaults.iter().find(|(index, _)| *index == position) {
                    Some((_, default)) => args.push(*default),
                    None => {
                        return Err(EvalError::native(format!(
                            "This function requires {num_params} arguments, but was called with {}",
                            args.len()
                        )));
                    }
                }
            }
        }

        let mut vars = Vec::with_capacity(info.num_vars as usize);
        vars.extend(args);
        vars.resize(info.num_vars as usize, Value::Null);
        Ok(self.ctx.heap.alloc(HeapData::Closure(Closure {
            function,
            program: program.clone(),
            parent,
            vars,
        })))
    }

    fn call_external(&mut self, external: u32, args: ArgVec) -> Result<(), EvalError> {
        enum Body {
            Simple(crate::registry::NativeFn, bool),
            Sm(crate::registry::SmStartFn),
        }
        let body = {
            let function = self.ctx.registry.get(external);
            match &function.body {
                NativeBody::Simple(f) => Body::Simple(*f, true),
                NativeBody::Raw(f) => Body::Simple(*f, false),
                NativeBody::StateMachine { start, .. } => Body::Sm(*start),
            }
        };
        match body {
            Body::Simple(f, checked) => {
                if checked {
                    self.ctx.registry.get(external).check_args(&args, self.ctx)?;
                }
                let result = f(self.ctx, &args)?;
                self.push(result);
                Ok(())
            }
            Body::Sm(start) => {
                self.ctx.registry.get(external).check_args(&args, self.ctx)?;
                let state = start(self.ctx, &args)?;
                let closure = self.ctx.heap.alloc(HeapData::Closure(Closure {
                    function: 0,
                    program: self.sm_program.clone(),
                    parent: None,
                    vars: Vec::new(),
                }));
                let activation = self.bump_activation();
                self.frames.push(Frame {
                    program: self.sm_program.clone(),
                    function: 0,
                    ip: 0,
                    closure,
                    stack_base: self.stack.len(),
                    activation,
                    sm: Some(SmFrame {
                        external,
                        state: Some(state),
                    }),
                });
                self.tracer.on_call(self.frames.len());
                Ok(())
            }
        }
    }

    /// One `StateMachBody` iteration: feed the previous result to the step
    /// body, then either run the requested call or finish.
    fn op_state_machine_body(&mut self, frame_index: usize, ip: usize) -> Result<Step, EvalError> {
        let previous = self.pop();
        let (external, mut state) = {
            let sm = self.frames[frame_index].sm.as_mut().expect("sm frame has sm data");
            (sm.external, sm.state.take().expect("sm state present"))
        };
        let body = {
            let NativeBody::StateMachine { body, .. } = &self.ctx.registry.get(external).body else {
                return Err(EvalError::eval("state-machine frame without a state-machine body"));
            };
            *body
        };
        let step = body(self.ctx, state.as_mut(), previous);
        if let Some(sm) = self.frames[frame_index].sm.as_mut() {
            sm.state = Some(state);
        }
        match step? {
            SmStep::Done(value) => self.do_return(value),
            SmStep::Call(f, call_args) => {
                // Re-enter this instruction when the call returns.
                self.frames[frame_index].ip = ip;
                self.call_value(f, call_args, false)?;
                Ok(Step::Continue)
            }
        }
    }

    // ------------------------------------------------------------------
    // Returns, escapes, and exceptions.

    fn do_return(&mut self, value: Value) -> Result<Step, EvalError> {
        let frame = self.frames.pop().expect("return inside a frame");
        self.stack.truncate(frame.stack_base);
        while self
            .handlers
            .last()
            .is_some_and(|h| h.frame_index >= self.frames.len())
        {
            let _ = self.handlers.pop();
        }
        self.tracer.on_return(self.frames.len());
        if self.frames.is_empty() {
            Ok(Step::Finished(value))
        } else {
            self.push(value);
            Ok(Step::Continue)
        }
    }

    fn op_till_escape(&mut self, value: Value, flag_index: u32) -> Result<(), EvalError> {
        let Value::Ref(id) = value else {
            return Err(EvalError::eval("till escape requires a till continuation"));
        };
        let (till_index, activation, stack_floor, alive) = {
            let HeapData::Till(till) = self.ctx.heap.get(id) else {
                return Err(EvalError::eval("till escape requires a till continuation"));
            };
            (till.till_index, till.activation, till.stack_floor, till.alive)
        };
        if !alive {
            return Err(EvalError::eval("this till continuation's dynamic extent has ended"));
        }
        let Some(target_index) = self.frames.iter().rposition(|f| f.activation == activation) else {
            return Err(EvalError::eval("this till continuation's dynamic extent has ended"));
        };
        // Unwind to the owning activation, restore the operand stack to the
        // till's entry height, and branch to the when-clause.
        let target_address = {
            let frame = &self.frames[target_index];
            let till_info = &frame.program.tills[till_index as usize];
            till_info.branch_targets[flag_index as usize] as usize
        };
        self.frames.truncate(target_index + 1);
        self.stack.truncate(stack_floor);
        while self
            .handlers
            .last()
            .is_some_and(|h| h.frame_index >= self.frames.len())
        {
            let _ = self.handlers.pop();
        }
        self.frames[target_index].ip = target_address;
        Ok(())
    }

    /// Unwinds to the nearest `Try` handler, or propagates with a trace.
    fn throw(&mut self, mut error: EvalError) -> Result<(), EvalError> {
        self.tracer.on_throw(&error.message);
        // Discard handlers whose frames are already gone.
        while self
            .handlers
            .last()
            .is_some_and(|h| h.frame_index >= self.frames.len())
        {
            let _ = self.handlers.pop();
        }
        match self.handlers.pop() {
            Some(handler) => {
                self.frames.truncate(handler.frame_index + 1);
                self.stack.truncate(handler.stack_depth);
                let payload = match error.payload() {
                    Some(value) => value,
                    None => {
                        let rendered = error.to_string();
                        Value::Ref(self.ctx.heap.alloc_str(rendered))
                    }
                };
                self.push(payload);
                self.frames[handler.frame_index].ip = handler.address;
                Ok(())
            }
            None => {
                error.trace = self.capture_trace();
                self.frames.clear();
                self.stack.clear();
                Err(error)
            }
        }
    }

    /// Builds the most-recent-call-first trace from the live frames.
    fn capture_trace(&self) -> Vec<TraceEntry> {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let info = &frame.program.functions[frame.function as usize];
            let loc_index = frame
                .ip
                .checked_sub(1)
                .and_then(|ip| info.segment.get(ip))
                .map_or(0, |instr| instr.loc as usize);
            let location = &frame.program.locations[loc_index.min(frame.program.locations.len() - 1)];
            trace.push(TraceEntry {
                filename: location.filename.clone(),
                line: location.line,
                column: location.column,
                function: info.name,
            });
        }
        trace
    }
}

fn smallvec_from(values: &[Value]) -> ArgVec {
    SmallVec::from_slice(values)
}
