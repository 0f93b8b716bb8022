//! Owns everything the pipeline needs between top-level forms: the
//! prototype table, the buffered-but-uncompiled function list, and the
//! JIT module. Strictly single-threaded and strictly sequential -- see
//! the concurrency section of the design for why none of this needs a
//! lock.

use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::Module;
use indexmap::{IndexMap, IndexSet};
use std::mem;
use wisp_compiler::ast::{Expr, Function, Prototype};
use wisp_compiler::closure_convert::{self, ScopeRecord};
use wisp_compiler::diagnostics::Span;
use wisp_compiler::lexer::TokenStream;
use wisp_compiler::{parse_top_level_form, Diagnostics};
use wisp_core::{Interner, Symbol};

use crate::codegen::{self, KnownFunction, RuntimeImports};
use crate::error::Error;

/// Three built-ins the generator links in directly; known globals for
/// the purposes of closure conversion.
const BUILTINS: &[&str] = &["abs", "square", "average"];

pub struct Driver {
    interner: Interner,
    module: JITModule,
    imports: RuntimeImports,
    /// Known globals: registered top-level functions plus the built-ins.
    globals: IndexSet<Symbol>,
    prototypes: IndexMap<Symbol, KnownFunction>,
    /// One group per buffered top-level `define`, each tagged with the
    /// source span of that top-level form. A semantic-at-compile-time
    /// error discovered while compiling any function in a group drops the
    /// whole group, per spec: "the driver drops the buffered form."
    buffered: Vec<(Span, Vec<(Function, ScopeRecord)>)>,
    /// Each top-level non-definition expression gets its own generated
    /// name (the module cannot redefine a function it already compiled
    /// under the same name, so a literal "__anon_expr" would only work
    /// for the first one).
    anon_counter: u64,
}

impl Driver {
    pub fn new() -> Result<Self, Error> {
        let mut builder =
            JITBuilder::new(cranelift_module::default_libcall_names()).map_err(|e| Error::Jit(e.to_string()))?;
        for (name, addr) in codegen::runtime_symbol_table() {
            builder.symbol(name, addr);
        }
        let mut module = JITModule::new(builder);
        let imports = codegen::declare_runtime_imports(&mut module)?;

        let mut driver = Driver {
            interner: Interner::new(),
            module,
            imports,
            globals: IndexSet::new(),
            prototypes: IndexMap::new(),
            buffered: Vec::new(),
            anon_counter: 0,
        };
        driver.define_builtins()?;
        Ok(driver)
    }

    fn define_builtins(&mut self) -> Result<(), Error> {
        // (define (abs x) (if (< x 0) (- x) x))
        // (define (square x) (* x x))
        // (define (average x y) (/ (+ x y) 2))
        let x = self.interner.intern("x");
        let y = self.interner.intern("y");
        let abs = self.interner.intern("abs");
        let square = self.interner.intern("square");
        let average = self.interner.intern("average");

        let abs_fn = Function {
            prototype: Prototype { name: abs, formals: vec![x] },
            body: vec![Expr::If(
                Box::new(Expr::Binary(
                    wisp_compiler::ast::BinaryOp::Lt,
                    Box::new(Expr::Var(x)),
                    Box::new(Expr::Int(0)),
                )),
                Box::new(Expr::Binary(
                    wisp_compiler::ast::BinaryOp::Sub,
                    Box::new(Expr::Int(0)),
                    Box::new(Expr::Var(x)),
                )),
                Box::new(Expr::Var(x)),
            )],
        };
        let square_fn = Function {
            prototype: Prototype { name: square, formals: vec![x] },
            body: vec![Expr::Binary(
                wisp_compiler::ast::BinaryOp::Mul,
                Box::new(Expr::Var(x)),
                Box::new(Expr::Var(x)),
            )],
        };
        let average_fn = Function {
            prototype: Prototype { name: average, formals: vec![x, y] },
            body: vec![Expr::Binary(
                wisp_compiler::ast::BinaryOp::Div,
                Box::new(Expr::Binary(
                    wisp_compiler::ast::BinaryOp::Add,
                    Box::new(Expr::Var(x)),
                    Box::new(Expr::Var(y)),
                )),
                Box::new(Expr::Int(2)),
            )],
        };

        for name in BUILTINS {
            self.globals.insert(self.interner.intern(name));
        }
        // None of the built-ins close over anything, so an empty scope
        // (no escaping formals) is exactly right for each of them.
        for f in [abs_fn, square_fn, average_fn] {
            let mut diagnostics = Diagnostics::new();
            let registered = self.compile_and_register(&f, &ScopeRecord::default(), &mut diagnostics, Span::point(0))?;
            assert!(registered, "built-in functions must compile without semantic errors: {diagnostics:?}");
        }
        Ok(())
    }

    /// Compiles `f` and, on success, registers it as a known global so later
    /// direct calls can target it. Returns `Ok(false)` rather than an `Err`
    /// when codegen hit a semantic-at-compile-time condition -- the caller
    /// decides what to do with the rest of `f`'s group, per spec.
    fn compile_and_register(
        &mut self,
        f: &Function,
        scope: &ScopeRecord,
        diagnostics: &mut Diagnostics,
        form_span: Span,
    ) -> Result<bool, Error> {
        let func_id = codegen::compile_function(
            &mut self.module,
            &self.imports,
            f,
            scope,
            &self.prototypes,
            &self.interner,
            diagnostics,
            form_span,
        )?;
        match func_id {
            Some(func_id) => {
                self.prototypes.insert(
                    f.prototype.name,
                    KnownFunction { func_id, arity: f.prototype.formals.len() },
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Compiles every function in one buffered group. On the first semantic
    /// failure, un-registers whatever prefix of the group already made it
    /// into `prototypes` and reports the group's diagnostics: the whole
    /// group -- the buffered top-level form it came from -- is dropped
    /// together, per spec.
    fn compile_group(&mut self, group: &[(Function, ScopeRecord)], form_span: Span, source: &str) -> Result<bool, Error> {
        let mut diagnostics = Diagnostics::new();
        let mut ok = true;
        for (f, scope) in group {
            if !self.compile_and_register(f, scope, &mut diagnostics, form_span)? {
                ok = false;
                break;
            }
        }
        if !ok {
            for (f, _) in group {
                self.prototypes.shift_remove(&f.prototype.name);
            }
        }
        self.report(&diagnostics, source);
        Ok(ok)
    }

    /// Drain every buffered group into the module. Called just before the
    /// first non-function top-level expression is compiled.
    fn flush_buffered(&mut self, source: &str) -> Result<(), Error> {
        let buffered = mem::take(&mut self.buffered);
        for (form_span, group) in &buffered {
            self.compile_group(group, *form_span, source)?;
        }
        self.module.finalize_definitions().map_err(Error::Module)?;
        Ok(())
    }

    /// Parse and handle one top-level form from `tokens`. Returns `Ok(Some(n))`
    /// when the form was a non-function expression whose evaluated Int64
    /// result is `n`; `Ok(None)` for a function definition (buffered, not
    /// yet run) or a form that produced no printable result.
    pub fn handle_top_level(&mut self, tokens: &mut TokenStream<'_>, source: &str) -> Result<Option<i64>, Error> {
        let form_span = Span::point(tokens.peek().offset);
        let (expr, diags) = parse_top_level_form(tokens, &mut self.interner);
        self.report(&diags, source);
        let Some(expr) = expr else {
            return Ok(None);
        };

        match expr {
            Expr::Function(f) => {
                self.globals.insert(f.prototype.name);
                let flattened = closure_convert::convert(*f, &self.globals, &mut self.interner);
                self.buffered.push((form_span, flattened));
                Ok(None)
            }
            other => {
                self.flush_buffered(source)?;
                let id = self.anon_counter;
                self.anon_counter += 1;
                let anon_name = self.interner.intern(&format!("__anon_expr#{id}"));
                let anon = Function {
                    prototype: Prototype { name: anon_name, formals: vec![] },
                    body: vec![other],
                };
                let flattened = closure_convert::convert(anon, &self.globals, &mut self.interner);
                if !self.compile_group(&flattened, form_span, source)? {
                    return Ok(None);
                }
                self.module.finalize_definitions().map_err(Error::Module)?;

                let known = self.prototypes[&anon_name];
                let code = self.module.get_finalized_function(known.func_id);
                let thunk: extern "C" fn() -> wisp_runtime::Value = unsafe { mem::transmute(code) };
                let result = thunk();
                if result.is_null() {
                    return Ok(None);
                }
                if unsafe { wisp_runtime::typeof_tag(result) } == wisp_runtime::Kind::Int64 {
                    let n = unsafe { wisp_runtime::int64_bits(result) };
                    println!("Evaluated to {n}");
                    Ok(Some(n))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn report(&self, diags: &Diagnostics, source: &str) {
        if !diags.is_empty() {
            eprint!("{}", diags.printer(source));
        }
    }
}
