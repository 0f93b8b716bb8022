//! Translates one post-closure-conversion [`Function`](wisp_compiler::ast::Function)
//! into Cranelift IR calling the runtime ABI.
//!
//! Every wisp value is treated as an opaque 64-bit pointer (`types::I64`);
//! there is no separate reference type here because nothing in this
//! crate ever scans the stack itself -- the root-stack convention
//! (`push_root_frame`/`pop_root_frame`) is what a future collector would
//! walk, and it is entirely runtime-side.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Signature, StackSlotData, StackSlotKind};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};
use indexmap::IndexMap;
use wisp_compiler::ast::{BinaryOp, Expr, Function, UnaryOp};
use wisp_compiler::closure_convert::ScopeRecord;
use wisp_compiler::diagnostics::{Diagnostics, Span};
use wisp_core::{Interner, Symbol};

use crate::error::Error;

const VALUE: cranelift_codegen::ir::Type = types::I64;

/// FuncIds for every `wisp-runtime` primitive, declared once per module
/// and imported into each function that needs them.
pub struct RuntimeImports {
    pub new_int64: FuncId,
    pub binary_int64: FuncId,
    pub as_bool: FuncId,
    pub new_fptr: FuncId,
    pub boxed: FuncId,
    pub unbox: FuncId,
    pub set_box: FuncId,
    pub closure: FuncId,
    pub getfield: FuncId,
    pub get_callable: FuncId,
    pub typeof_raw: FuncId,
    pub error: FuncId,
    pub push_root_frame: FuncId,
    pub pop_root_frame: FuncId,
}

/// Name/address pairs `driver` registers against the `JITBuilder` before
/// the module is built, one per `declare_runtime_imports` import below.
pub fn runtime_symbol_table() -> Vec<(&'static str, *const u8)> {
    vec![
        ("wisp_rt_new_int64", wisp_runtime::new_int64 as *const u8),
        ("wisp_rt_binary_int64", wisp_runtime::binary_int64 as *const u8),
        ("wisp_rt_as_bool", wisp_runtime::as_bool as *const u8),
        ("wisp_rt_new_fptr", wisp_runtime::new_fptr as *const u8),
        ("wisp_rt_boxed", wisp_runtime::boxed as *const u8),
        ("wisp_rt_unbox", wisp_runtime::unbox as *const u8),
        ("wisp_rt_set_box", wisp_runtime::set_box as *const u8),
        ("wisp_rt_closure", wisp_runtime::closure as *const u8),
        ("wisp_rt_getfield", wisp_runtime::getfield as *const u8),
        ("wisp_rt_get_callable", wisp_runtime::get_callable as *const u8),
        ("wisp_rt_typeof_raw", wisp_runtime::typeof_raw as *const u8),
        ("wisp_rt_error", wisp_runtime::error as *const u8),
        ("wisp_rt_push_root_frame", wisp_runtime::push_root_frame as *const u8),
        ("wisp_rt_pop_root_frame", wisp_runtime::pop_root_frame as *const u8),
    ]
}

macro_rules! declare_runtime_fn {
    ($module:expr, $name:expr, [$($param:expr),*], [$($ret:expr),*]) => {{
        let mut sig = $module.make_signature();
        $(sig.params.push(AbiParam::new($param));)*
        $(sig.returns.push(AbiParam::new($ret));)*
        $module.declare_function($name, Linkage::Import, &sig)?
    }};
}

pub fn declare_runtime_imports(module: &mut JITModule) -> Result<RuntimeImports, Error> {
    Ok(RuntimeImports {
        new_int64: declare_runtime_fn!(module, "wisp_rt_new_int64", [types::I64], [VALUE]),
        binary_int64: declare_runtime_fn!(module, "wisp_rt_binary_int64", [types::I32, VALUE, VALUE], [VALUE]),
        as_bool: declare_runtime_fn!(module, "wisp_rt_as_bool", [VALUE], [types::I32]),
        new_fptr: declare_runtime_fn!(module, "wisp_rt_new_fptr", [VALUE, types::I64], [VALUE]),
        boxed: declare_runtime_fn!(module, "wisp_rt_boxed", [VALUE], [VALUE]),
        unbox: declare_runtime_fn!(module, "wisp_rt_unbox", [VALUE], [VALUE]),
        set_box: declare_runtime_fn!(module, "wisp_rt_set_box", [VALUE, VALUE], [VALUE]),
        closure: declare_runtime_fn!(module, "wisp_rt_closure", [VALUE, types::I64, VALUE], [VALUE]),
        getfield: declare_runtime_fn!(module, "wisp_rt_getfield", [VALUE, types::I32], [VALUE]),
        get_callable: declare_runtime_fn!(module, "wisp_rt_get_callable", [VALUE], [VALUE]),
        typeof_raw: declare_runtime_fn!(module, "wisp_rt_typeof_raw", [VALUE], [types::I32]),
        error: declare_runtime_fn!(module, "wisp_rt_error", [], []),
        push_root_frame: declare_runtime_fn!(module, "wisp_rt_push_root_frame", [types::I64], [VALUE]),
        pop_root_frame: declare_runtime_fn!(module, "wisp_rt_pop_root_frame", [], []),
    })
}

const KIND_CLOSURE: i32 = 3;

/// A top-level function known to the driver at codegen time: its FuncId
/// and its declared arity (the arity `symbol-hint` direct-call dispatch
/// checks against).
#[derive(Clone, Copy)]
pub struct KnownFunction {
    pub func_id: FuncId,
    pub arity: usize,
}

/// Compiles one post-closure-conversion function. `diagnostics` receives
/// any semantic-at-compile-time error (unbound name, wrong argument count
/// to a direct call) found while building its body, at a single `form_span`
/// standing in for the whole top-level form being compiled (the AST carries
/// no finer-grained source positions past parsing). Returns `Ok(None)` in
/// that case -- the function is never declared or defined in `module`, so
/// nothing partially built survives -- and `Err` only for a genuine
/// Cranelift/module failure, which is not one of the recoverable kinds.
pub fn compile_function(
    module: &mut JITModule,
    imports: &RuntimeImports,
    func: &Function,
    scope: &ScopeRecord,
    prototypes: &IndexMap<Symbol, KnownFunction>,
    interner: &Interner,
    diagnostics: &mut Diagnostics,
    form_span: Span,
) -> Result<Option<FuncId>, Error> {
    let arity = func.prototype.formals.len();
    let mut sig = Signature::new(CallConv::SystemV);
    for _ in 0..arity {
        sig.params.push(AbiParam::new(VALUE));
    }
    sig.returns.push(AbiParam::new(VALUE));

    let mut ctx = module.make_context();
    ctx.func.signature = sig.clone();
    let mut builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let push_ref = module.declare_func_in_func(imports.push_root_frame, builder.func);
    let n_const = builder.ins().iconst(types::I64, arity as i64);
    let call = builder.ins().call(push_ref, &[n_const]);
    let frame_base = builder.inst_results(call)[0];

    let mut fc = FnCodegen {
        builder,
        module: &mut *module,
        imports,
        vars: IndexMap::new(),
        next_var: arity,
        prototypes,
        interner,
        diagnostics,
        form_span,
    };

    // A formal that a nested closure captures must be boxed before
    // anything reads it, mirroring what closure conversion assumed when
    // it rewrote every escaping `Var` access into `Unbox(Var(n))`.
    for (i, formal) in func.prototype.formals.iter().enumerate() {
        let var = Variable::new(i);
        fc.builder.declare_var(var, VALUE);
        let mut arg_val = fc.builder.block_params(entry)[i];
        if scope.escaping.contains(formal) {
            arg_val = fc.call_runtime(fc.imports.boxed, &[arg_val]);
        }
        fc.builder.def_var(var, arg_val);
        fc.vars.insert(*formal, var);

        let slot_addr = fc.builder.ins().iadd_imm(frame_base, (i * 8) as i64);
        fc.builder.ins().store(MemFlags::new(), arg_val, slot_addr, 0);
    }

    let mut result = fc.const_nil();
    for expr in &func.body {
        result = match fc.build_expr(expr) {
            Ok(v) => v,
            Err(Error::Semantic) => return Ok(None),
            Err(e) => return Err(e),
        };
    }

    let pop_ref = fc.module.declare_func_in_func(imports.pop_root_frame, fc.builder.func);
    fc.builder.ins().call(pop_ref, &[]);
    fc.builder.ins().return_(&[result]);
    fc.builder.finalize();

    let name = interner.resolve(func.prototype.name);
    let func_id = module.declare_function(name, Linkage::Export, &sig)?;
    module.define_function(func_id, &mut ctx)?;
    module.clear_context(&mut ctx);

    Ok(Some(func_id))
}

type ClifValue = cranelift_codegen::ir::Value;

struct FnCodegen<'a, 'f> {
    builder: FunctionBuilder<'f>,
    module: &'a mut JITModule,
    imports: &'a RuntimeImports,
    vars: IndexMap<Symbol, Variable>,
    next_var: usize,
    prototypes: &'a IndexMap<Symbol, KnownFunction>,
    interner: &'a Interner,
    diagnostics: &'a mut Diagnostics,
    form_span: Span,
}

impl<'a, 'f> FnCodegen<'a, 'f> {
    fn const_nil(&mut self) -> ClifValue {
        self.builder.ins().iconst(VALUE, 0)
    }

    fn fresh_var(&mut self) -> Variable {
        let var = Variable::new(self.next_var);
        self.next_var += 1;
        self.builder.declare_var(var, VALUE);
        var
    }

    fn call_runtime(&mut self, func_id: FuncId, args: &[ClifValue]) -> ClifValue {
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        let call = self.builder.ins().call(func_ref, args);
        let results = self.builder.inst_results(call);
        results.first().copied().unwrap_or_else(|| self.builder.ins().iconst(VALUE, 0))
    }

    fn build_expr(&mut self, expr: &Expr) -> Result<ClifValue, Error> {
        Ok(match expr {
            Expr::Int(n) => {
                let raw = self.builder.ins().iconst(types::I64, *n);
                self.call_runtime(self.imports.new_int64, &[raw])
            }
            Expr::Nil => self.const_nil(),
            Expr::Var(sym) => self.build_var(*sym)?,
            Expr::VarDef(sym, init) => {
                let value = self.build_expr(init)?;
                let var = self.fresh_var();
                self.builder.def_var(var, value);
                self.vars.insert(*sym, var);
                value
            }
            Expr::VarSet(sym, value_expr) => {
                let value = self.build_expr(value_expr)?;
                let Some(&var) = self.vars.get(sym) else {
                    let name = self.interner.resolve(*sym).to_string();
                    self.diagnostics
                        .error(format!("unbound name `{name}` referenced at compile time"), self.form_span)
                        .emit();
                    return Err(Error::Semantic);
                };
                self.builder.def_var(var, value);
                value
            }
            Expr::GetField(index, target) => {
                let target_val = self.build_expr(target)?;
                let idx = self.builder.ins().iconst(types::I32, *index as i64);
                self.call_runtime(self.imports.getfield, &[target_val, idx])
            }
            Expr::Unary(op, operand) => self.build_unary(*op, operand)?,
            Expr::Binary(op, lhs, rhs) => self.build_binary(*op, lhs, rhs)?,
            Expr::If(p, t, e) => self.build_if(p, t, e)?,
            Expr::Begin(xs) => {
                let mut v = self.const_nil();
                for x in xs {
                    v = self.build_expr(x)?;
                }
                v
            }
            Expr::Call { callee, args, symbol_hint } => self.build_call(callee, args, *symbol_hint)?,
            Expr::Closure { flat_name, captures } => self.build_closure(*flat_name, captures)?,
            Expr::Function(_) => {
                unreachable!("closure conversion flattens every nested Function before codegen")
            }
        })
    }

    fn build_var(&mut self, sym: Symbol) -> Result<ClifValue, Error> {
        if let Some(&var) = self.vars.get(&sym) {
            return Ok(self.builder.use_var(var));
        }
        let name = self.interner.resolve(sym);
        if name == "nil" {
            return Ok(self.const_nil());
        }
        if let Some(known) = self.prototypes.get(&sym).copied() {
            let func_ref = self.module.declare_func_in_func(known.func_id, self.builder.func);
            let code_ptr = self.builder.ins().func_addr(VALUE, func_ref);
            let arity = self.builder.ins().iconst(types::I64, known.arity as i64);
            return Ok(self.call_runtime(self.imports.new_fptr, &[code_ptr, arity]));
        }
        let name = name.to_string();
        self.diagnostics
            .error(format!("unbound name `{name}` referenced at compile time"), self.form_span)
            .emit();
        Err(Error::Semantic)
    }

    fn build_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<ClifValue, Error> {
        let v = self.build_expr(operand)?;
        Ok(match op {
            UnaryOp::Box => self.call_runtime(self.imports.boxed, &[v]),
            UnaryOp::Unbox => self.call_runtime(self.imports.unbox, &[v]),
            UnaryOp::Not => {
                let op_tag = self.builder.ins().iconst(types::I32, wisp_runtime::BinOp::Not as i64);
                let nil = self.const_nil();
                self.call_runtime(self.imports.binary_int64, &[op_tag, v, nil])
            }
        })
    }

    fn build_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<ClifValue, Error> {
        if op == BinaryOp::SetBox {
            let target = self.build_expr(lhs)?;
            let value = self.build_expr(rhs)?;
            return Ok(self.call_runtime(self.imports.set_box, &[target, value]));
        }
        let l = self.build_expr(lhs)?;
        let r = self.build_expr(rhs)?;
        let tag = match op {
            BinaryOp::Add => wisp_runtime::BinOp::Add,
            BinaryOp::Sub => wisp_runtime::BinOp::Sub,
            BinaryOp::Mul => wisp_runtime::BinOp::Mul,
            BinaryOp::Div => wisp_runtime::BinOp::Div,
            BinaryOp::Gt => wisp_runtime::BinOp::Gt,
            BinaryOp::Lt => wisp_runtime::BinOp::Lt,
            BinaryOp::Eq => wisp_runtime::BinOp::Eq,
            BinaryOp::And => wisp_runtime::BinOp::And,
            BinaryOp::Or => wisp_runtime::BinOp::Or,
            BinaryOp::SetBox => unreachable!("handled above"),
        };
        let op_tag = self.builder.ins().iconst(types::I32, tag as i64);
        Ok(self.call_runtime(self.imports.binary_int64, &[op_tag, l, r]))
    }

    fn build_if(&mut self, pred: &Expr, then_e: &Expr, else_e: &Expr) -> Result<ClifValue, Error> {
        let pred_val = self.build_expr(pred)?;
        let truthy = self.call_runtime(self.imports.as_bool, &[pred_val]);
        let zero = self.builder.ins().iconst(types::I32, 0);
        let cond = self.builder.ins().icmp(IntCC::NotEqual, truthy, zero);

        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, VALUE);

        self.builder.ins().brif(cond, then_block, &[], else_block, &[]);

        self.builder.switch_to_block(then_block);
        self.builder.seal_block(then_block);
        let then_val = self.build_expr(then_e)?;
        self.builder.ins().jump(merge_block, &[then_val]);

        self.builder.switch_to_block(else_block);
        self.builder.seal_block(else_block);
        let else_val = self.build_expr(else_e)?;
        self.builder.ins().jump(merge_block, &[else_val]);

        self.builder.switch_to_block(merge_block);
        self.builder.seal_block(merge_block);
        Ok(self.builder.block_params(merge_block)[0])
    }

    /// Direct dispatch when `symbol_hint` names a known global of the
    /// right arity; otherwise dynamic dispatch through `get_callable` +
    /// `typeof`, branching between a FunctionRef (called as-is) and a
    /// Closure (callee prepended), merged with a block-param phi.
    fn build_call(&mut self, callee: &Expr, args: &[Expr], symbol_hint: Option<Symbol>) -> Result<ClifValue, Error> {
        if let Some(sym) = symbol_hint {
            if let Some(known) = self.prototypes.get(&sym).copied() {
                if known.arity != args.len() {
                    let name = self.interner.resolve(sym);
                    self.diagnostics
                        .error(
                            format!(
                                "wrong argument count to a direct call to `{name}`: expected {}, got {}",
                                known.arity,
                                args.len()
                            ),
                            self.form_span,
                        )
                        .emit();
                    return Err(Error::Semantic);
                }
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.build_expr(a)?);
                }
                let func_ref = self.module.declare_func_in_func(known.func_id, self.builder.func);
                let call = self.builder.ins().call(func_ref, &arg_vals);
                return Ok(self.builder.inst_results(call)[0]);
            }
        }

        let callee_val = self.build_expr(callee)?;
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in args {
            arg_vals.push(self.build_expr(a)?);
        }

        let code_ptr = self.call_runtime(self.imports.get_callable, &[callee_val]);
        let kind = self.call_runtime(self.imports.typeof_raw, &[callee_val]);
        let closure_tag = self.builder.ins().iconst(types::I32, KIND_CLOSURE as i64);
        let is_closure = self.builder.ins().icmp(IntCC::Equal, kind, closure_tag);

        let closure_block = self.builder.create_block();
        let plain_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, VALUE);

        self.builder.ins().brif(is_closure, closure_block, &[], plain_block, &[]);

        let mut sig_plain = Signature::new(CallConv::SystemV);
        for _ in 0..arg_vals.len() {
            sig_plain.params.push(AbiParam::new(VALUE));
        }
        sig_plain.returns.push(AbiParam::new(VALUE));
        let sig_plain_ref = self.builder.import_signature(sig_plain);

        let mut sig_closure = Signature::new(CallConv::SystemV);
        for _ in 0..(arg_vals.len() + 1) {
            sig_closure.params.push(AbiParam::new(VALUE));
        }
        sig_closure.returns.push(AbiParam::new(VALUE));
        let sig_closure_ref = self.builder.import_signature(sig_closure);

        self.builder.switch_to_block(plain_block);
        self.builder.seal_block(plain_block);
        let call = self.builder.ins().call_indirect(sig_plain_ref, code_ptr, &arg_vals);
        let plain_result = self.builder.inst_results(call)[0];
        self.builder.ins().jump(merge_block, &[plain_result]);

        self.builder.switch_to_block(closure_block);
        self.builder.seal_block(closure_block);
        let mut closure_args = Vec::with_capacity(arg_vals.len() + 1);
        closure_args.push(callee_val);
        closure_args.extend_from_slice(&arg_vals);
        let call = self.builder.ins().call_indirect(sig_closure_ref, code_ptr, &closure_args);
        let closure_result = self.builder.inst_results(call)[0];
        self.builder.ins().jump(merge_block, &[closure_result]);

        self.builder.switch_to_block(merge_block);
        self.builder.seal_block(merge_block);
        Ok(self.builder.block_params(merge_block)[0])
    }

    fn build_closure(&mut self, flat_name: Symbol, captures: &[Expr]) -> Result<ClifValue, Error> {
        let Some(known) = self.prototypes.get(&flat_name).copied() else {
            let name = self.interner.resolve(flat_name).to_string();
            self.diagnostics
                .error(format!("unknown function referenced: `{name}`"), self.form_span)
                .emit();
            return Err(Error::Semantic);
        };
        let func_ref = self.module.declare_func_in_func(known.func_id, self.builder.func);
        let code_ptr = self.builder.ins().func_addr(VALUE, func_ref);

        let n = captures.len();
        let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            (n.max(1) * 8) as u32,
            3,
        ));
        for (i, cap) in captures.iter().enumerate() {
            let val = self.build_expr(cap)?;
            self.builder.ins().stack_store(val, slot, (i * 8) as i32);
        }
        let members_ptr = self.builder.ins().stack_addr(VALUE, slot, 0);
        let n_const = self.builder.ins().iconst(types::I64, n as i64);
        Ok(self.call_runtime(self.imports.closure, &[code_ptr, n_const, members_ptr]))
    }
}
