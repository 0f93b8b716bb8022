use super::scope::ScopeRecord;
use crate::ast::{BinaryOp, Expr, Function, UnaryOp};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use wisp_core::{Interner, Symbol};

static FLAT_NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

fn gensym_flat(base: &str) -> String {
    let id = FLAT_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{base}#{id}")
}

/// Convert one top-level function (and every function nested inside it)
/// into a flat list of top-level functions with closures and boxes
/// rewritten in. `globals` is the set of already-registered top-level
/// function names plus the built-ins (`abs`, `square`, `average`); it is
/// not mutated here -- newly flattened functions are returned, and it is
/// the driver's job to register them before the next top-level form is
/// converted.
///
/// Each function comes back paired with its final [`ScopeRecord`] so the
/// code generator can tell which formals escape (and so must be boxed at
/// entry before anything reads them through a captured closure).
pub fn convert(
    root: Function,
    globals: &IndexSet<Symbol>,
    interner: &mut Interner,
) -> Vec<(Function, ScopeRecord)> {
    let obj_sym = interner.intern("_obj");

    // Phase A: BFS-flatten nested Function definitions to top level.
    let mut functions: IndexMap<Symbol, Function> = IndexMap::new();
    let mut children: IndexMap<Symbol, Vec<Symbol>> = IndexMap::new();
    let mut worklist: VecDeque<Function> = VecDeque::new();
    worklist.push_back(root);

    while let Some(mut f) = worklist.pop_front() {
        let name = f.prototype.name;
        let mut own_children = Vec::new();
        flatten_nested_functions(&mut f.body, obj_sym, interner, &mut own_children, &mut worklist);
        children.insert(name, own_children);
        functions.insert(name, f);
    }

    // Phase B: per-function Defined/Used/InnerFunctions.
    let mut scopes: IndexMap<Symbol, ScopeRecord> = IndexMap::new();
    for (name, f) in &functions {
        let mut scope = ScopeRecord::default();
        scope.defined.insert(*name);
        for formal in &f.prototype.formals {
            scope.defined.insert(*formal);
        }
        for expr in &f.body {
            collect_defined(expr, &mut scope.defined);
        }
        for expr in &f.body {
            collect_used(expr, &mut scope.used);
        }
        if let Some(kids) = children.get(name) {
            for kid in kids {
                scope.inner_functions.insert(*kid);
            }
        }
        scopes.insert(*name, scope);
    }

    // Phase C: post-order escape/enclose solve.
    let root_name = *functions.keys().next().expect("at least the root function");
    scope_dfs(root_name, &children, &mut scopes, globals);

    // Phase D: rewrite every function's body in place.
    let names: Vec<Symbol> = functions.keys().copied().collect();
    for name in &names {
        let scope = scopes.get(name).expect("scope computed in phase C").clone();
        let f = functions.get_mut(name).expect("function collected in phase A");
        for expr in f.body.iter_mut() {
            let taken = std::mem::replace(expr, Expr::Nil);
            *expr = rewrite(taken, &scope, &scopes, obj_sym);
        }
    }

    // Phase A's worklist visits a function before the inner functions it
    // contains (parent-before-child, a topological order over the nesting
    // tree). Codegen needs the opposite: a `Closure` node references its
    // target's `FuncId` by looking it up in the table of already-compiled
    // functions, so every function must be compiled after all of its own
    // nested functions, not before. Reversing a topological order over a
    // tree always yields a valid reverse order, so this is exactly the
    // compile order the driver needs.
    let mut result: Vec<(Function, ScopeRecord)> = functions
        .into_iter()
        .map(|(name, f)| {
            let scope = scopes.remove(&name).expect("scope computed in phase C");
            (f, scope)
        })
        .collect();
    result.reverse();
    result
}

/// Flattens every `Function` slot in `body` to top level, recursing into
/// `Begin` since it splices into the enclosing scope rather than opening
/// a new one. Each flattened function is pushed onto `worklist` for its
/// own pass through this same phase.
fn flatten_nested_functions(
    body: &mut [Expr],
    obj_sym: Symbol,
    interner: &mut Interner,
    own_children: &mut Vec<Symbol>,
    worklist: &mut VecDeque<Function>,
) {
    for slot in body.iter_mut() {
        match slot {
            Expr::Function(_) => {
                let taken = std::mem::replace(slot, Expr::Nil);
                let Expr::Function(mut inner) = taken else {
                    unreachable!()
                };
                let original_name = inner.prototype.name;
                let base = interner.resolve(original_name).to_string();
                let flat_name = interner.intern(&gensym_flat(&base));
                inner.prototype.name = flat_name;
                inner.prototype.formals.insert(0, obj_sym);
                *slot = Expr::VarDef(
                    original_name,
                    Box::new(Expr::Closure {
                        flat_name,
                        captures: Vec::new(),
                    }),
                );
                own_children.push(flat_name);
                worklist.push_back(*inner);
            }
            Expr::Begin(xs) => {
                flatten_nested_functions(xs, obj_sym, interner, own_children, worklist);
            }
            _ => {}
        }
    }
}

/// Names a top-level body expression binds, looking through `Begin` the
/// same way [`flatten_nested_functions`] does. A plain `def_name()` call
/// only sees a direct `VarDef`/`Function` slot, which misses defines
/// written inside a `begin`.
fn collect_defined(expr: &Expr, defined: &mut IndexSet<Symbol>) {
    match expr {
        Expr::VarDef(n, _) => {
            defined.insert(*n);
        }
        Expr::Function(f) => {
            defined.insert(f.prototype.name);
        }
        Expr::Begin(xs) => xs.iter().for_each(|x| collect_defined(x, defined)),
        _ => {}
    }
}

fn scope_dfs(
    name: Symbol,
    children: &IndexMap<Symbol, Vec<Symbol>>,
    scopes: &mut IndexMap<Symbol, ScopeRecord>,
    globals: &IndexSet<Symbol>,
) {
    if let Some(kids) = children.get(&name).cloned() {
        for child in kids {
            scope_dfs(child, children, scopes, globals);
            let child_enclosed = scopes[&child].enclosed.clone();
            let scope = scopes.get_mut(&name).expect("scope record exists for every discovered function");
            for c in child_enclosed {
                scope.escaping.insert(c);
            }
        }
    }

    let scope = scopes.get_mut(&name).expect("scope record exists for every discovered function");
    let escaping: Vec<Symbol> = scope.escaping.iter().copied().collect();
    for esc in escaping {
        scope.used.insert(esc);
    }

    let mut enclosed = Vec::new();
    for n in scope.used.iter().copied() {
        if !globals.contains(&n) && !scope.defined.contains(&n) {
            enclosed.push(n);
        }
    }
    scope.enclosed = enclosed;
}

/// Recursively collects every name read or written inside `expr`. Runs
/// only over already-flattened bodies, so no `Function` node is ever
/// encountered here.
fn collect_used(expr: &Expr, used: &mut IndexSet<Symbol>) {
    match expr {
        Expr::Int(_) | Expr::Nil => {}
        Expr::Var(n) => {
            used.insert(*n);
        }
        Expr::VarDef(_, init) => collect_used(init, used),
        Expr::VarSet(n, value) => {
            used.insert(*n);
            collect_used(value, used);
        }
        Expr::GetField(_, target) => collect_used(target, used),
        Expr::Unary(_, operand) => collect_used(operand, used),
        Expr::Binary(_, lhs, rhs) => {
            collect_used(lhs, used);
            collect_used(rhs, used);
        }
        Expr::If(p, t, e) => {
            collect_used(p, used);
            collect_used(t, used);
            collect_used(e, used);
        }
        Expr::Begin(xs) => xs.iter().for_each(|x| collect_used(x, used)),
        Expr::Call { callee, args, .. } => {
            collect_used(callee, used);
            args.iter().for_each(|a| collect_used(a, used));
        }
        Expr::Closure { captures, .. } => captures.iter().for_each(|c| collect_used(c, used)),
        Expr::Function(_) => unreachable!("Phase A flattens every nested Function before this runs"),
    }
}

fn rewrite(expr: Expr, scope: &ScopeRecord, scopes: &IndexMap<Symbol, ScopeRecord>, obj_sym: Symbol) -> Expr {
    match expr {
        Expr::Int(_) | Expr::Nil => expr,

        Expr::Var(n) => {
            if scope.escaping.contains(&n) {
                Expr::Unary(UnaryOp::Unbox, Box::new(Expr::Var(n)))
            } else if let Some(pos) = scope.enclosed.iter().position(|x| *x == n) {
                Expr::Unary(
                    UnaryOp::Unbox,
                    Box::new(Expr::GetField(pos + 1, Box::new(Expr::Var(obj_sym)))),
                )
            } else {
                Expr::Var(n)
            }
        }

        Expr::VarSet(n, value) => {
            let value = rewrite(*value, scope, scopes, obj_sym);
            if scope.escaping.contains(&n) {
                Expr::Binary(BinaryOp::SetBox, Box::new(Expr::Var(n)), Box::new(value))
            } else if let Some(pos) = scope.enclosed.iter().position(|x| *x == n) {
                Expr::Binary(
                    BinaryOp::SetBox,
                    Box::new(Expr::GetField(pos + 1, Box::new(Expr::Var(obj_sym)))),
                    Box::new(value),
                )
            } else {
                Expr::VarSet(n, Box::new(value))
            }
        }

        Expr::VarDef(n, init) => {
            let init = rewrite(*init, scope, scopes, obj_sym);
            if scope.escaping.contains(&n) {
                Expr::VarDef(n, Box::new(Expr::Unary(UnaryOp::Box, Box::new(init))))
            } else {
                Expr::VarDef(n, Box::new(init))
            }
        }

        Expr::GetField(i, target) => Expr::GetField(i, Box::new(rewrite(*target, scope, scopes, obj_sym))),

        Expr::Unary(op, operand) => Expr::Unary(op, Box::new(rewrite(*operand, scope, scopes, obj_sym))),

        Expr::Binary(op, lhs, rhs) => Expr::Binary(
            op,
            Box::new(rewrite(*lhs, scope, scopes, obj_sym)),
            Box::new(rewrite(*rhs, scope, scopes, obj_sym)),
        ),

        Expr::If(p, t, e) => Expr::If(
            Box::new(rewrite(*p, scope, scopes, obj_sym)),
            Box::new(rewrite(*t, scope, scopes, obj_sym)),
            Box::new(rewrite(*e, scope, scopes, obj_sym)),
        ),

        Expr::Begin(xs) => Expr::Begin(
            xs.into_iter()
                .map(|x| rewrite(x, scope, scopes, obj_sym))
                .collect(),
        ),

        Expr::Call {
            callee,
            args,
            symbol_hint,
        } => Expr::Call {
            callee: Box::new(rewrite(*callee, scope, scopes, obj_sym)),
            args: args
                .into_iter()
                .map(|a| rewrite(a, scope, scopes, obj_sym))
                .collect(),
            symbol_hint,
        },

        Expr::Closure { flat_name, .. } => {
            let target_enclosed = scopes
                .get(&flat_name)
                .map(|s| s.enclosed.clone())
                .unwrap_or_default();
            let fields = target_enclosed
                .into_iter()
                .map(|c| {
                    if let Some(pos) = scope.enclosed.iter().position(|x| *x == c) {
                        Expr::GetField(pos + 1, Box::new(Expr::Var(obj_sym)))
                    } else {
                        Expr::Var(c)
                    }
                })
                .collect();
            Expr::Closure { flat_name, captures: fields }
        }

        Expr::Function(_) => unreachable!("Phase A flattens every nested Function before this runs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenStream;
    use crate::parser::parse_top_level;

    fn convert_source(src: &str) -> (Vec<Function>, Interner) {
        let mut interner = Interner::new();
        let mut globals = IndexSet::new();
        for name in ["abs", "square", "average"] {
            globals.insert(interner.intern(name));
        }
        let mut ts = TokenStream::new(src);
        let (expr, diags) = parse_top_level(&mut ts, &mut interner);
        assert!(diags.is_empty(), "{diags:?}");
        let Expr::Function(root) = expr.unwrap() else {
            panic!("expected a function definition");
        };
        let fns = convert(*root, &globals, &mut interner)
            .into_iter()
            .map(|(f, _scope)| f)
            .collect();
        (fns, interner)
    }

    fn find<'a>(fns: &'a [Function], interner: &Interner, name: &str) -> &'a Function {
        fns.iter()
            .find(|f| interner.resolve(f.prototype.name) == name || interner.resolve(f.prototype.name).starts_with(&format!("{name}#")))
            .unwrap_or_else(|| panic!("no function named like {name}"))
    }

    fn no_nested_functions(f: &Function) -> bool {
        fn check(e: &Expr) -> bool {
            match e {
                Expr::Function(_) => false,
                Expr::VarDef(_, i) => check(i),
                Expr::VarSet(_, v) => check(v),
                Expr::GetField(_, t) => check(t),
                Expr::Unary(_, o) => check(o),
                Expr::Binary(_, l, r) => check(l) && check(r),
                Expr::If(p, t, e) => check(p) && check(t) && check(e),
                Expr::Begin(xs) => xs.iter().all(check),
                Expr::Call { callee, args, .. } => check(callee) && args.iter().all(check),
                Expr::Closure { captures, .. } => captures.iter().all(check),
                Expr::Int(_) | Expr::Nil | Expr::Var(_) => true,
            }
        }
        f.body.iter().all(check)
    }

    #[test]
    fn flatness_no_nested_function_survives() {
        let (fns, _interner) = convert_source(
            "(define (make-adder n) (define (add k) (+ n k)) add)",
        );
        for f in &fns {
            assert!(no_nested_functions(f));
        }
    }

    #[test]
    fn make_adder_n_is_enclosed_by_add_and_escaping_in_parent() {
        let (fns, interner) = convert_source(
            "(define (make-adder n) (define (add k) (+ n k)) add)",
        );
        let make_adder = find(&fns, &interner, "make-adder");
        let add = find(&fns, &interner, "add");
        assert_eq!(add.prototype.formals.len(), 2, "add gains the _obj formal");
        assert_eq!(interner.resolve(add.prototype.formals[0]), "_obj");

        // add's body must read n through unbox(getfield(1, _obj)), never a bare Var.
        fn uses_bare_var(e: &Expr, name: &str, interner: &Interner) -> bool {
            match e {
                Expr::Var(n) => interner.resolve(*n) == name,
                Expr::VarDef(_, i) => uses_bare_var(i, name, interner),
                Expr::VarSet(_, v) => uses_bare_var(v, name, interner),
                Expr::GetField(_, t) => uses_bare_var(t, name, interner),
                Expr::Unary(_, o) => uses_bare_var(o, name, interner),
                Expr::Binary(_, l, r) => uses_bare_var(l, name, interner) || uses_bare_var(r, name, interner),
                Expr::If(p, t, el) => {
                    uses_bare_var(p, name, interner) || uses_bare_var(t, name, interner) || uses_bare_var(el, name, interner)
                }
                Expr::Begin(xs) => xs.iter().any(|x| uses_bare_var(x, name, interner)),
                Expr::Call { callee, args, .. } => {
                    uses_bare_var(callee, name, interner) || args.iter().any(|a| uses_bare_var(a, name, interner))
                }
                Expr::Closure { captures, .. } => captures.iter().any(|c| uses_bare_var(c, name, interner)),
                Expr::Function(_) | Expr::Int(_) | Expr::Nil => false,
            }
        }
        assert!(!add.body.iter().any(|e| uses_bare_var(e, "n", &interner)));
        let _ = make_adder;
    }

    #[test]
    fn closure_capture_list_matches_target_enclosed_len() {
        let (fns, interner) = convert_source(
            "(define (make-adder n) (define (add k) (+ n k)) add)",
        );
        let make_adder = find(&fns, &interner, "make-adder");
        let closure_node = make_adder.body.iter().find_map(|e| match e {
            Expr::VarDef(_, init) => match &**init {
                Expr::Closure { captures, .. } => Some(captures.len()),
                _ => None,
            },
            _ => None,
        });
        assert_eq!(closure_node, Some(1), "add encloses exactly `n`");
    }

    #[test]
    fn global_exclusion_known_globals_never_enclosed() {
        let (fns, interner) = convert_source("(define (f x) (square x))");
        let f = find(&fns, &interner, "f");
        assert_eq!(f.prototype.formals.len(), 1, "no _obj: f has no captures");
    }

    #[test]
    fn self_name_exclusion() {
        let (fns, interner) = convert_source(
            "(define (countdown n) (if (= n 0) 0 (countdown (- n 1))))",
        );
        let f = find(&fns, &interner, "countdown");
        assert_eq!(f.prototype.formals.len(), 1, "no self-capture means no _obj prepended");
    }

    #[test]
    fn counter_boxes_the_shared_mutable_n() {
        let (fns, interner) = convert_source(
            "(define (counter) (define n 0) (define (tick) (set! n (+ n 1)) n) tick)",
        );
        let counter = find(&fns, &interner, "counter");
        let boxes_n = counter.body.iter().any(|e| match e {
            Expr::VarDef(name, init) => {
                interner.resolve(*name) == "n" && matches!(&**init, Expr::Unary(UnaryOp::Box, _))
            }
            _ => false,
        });
        assert!(boxes_n, "n escapes into tick so its definition must be boxed");

        let tick = find(&fns, &interner, "tick");
        let sets_via_setbox = tick.body.iter().any(|e| matches!(e, Expr::Binary(BinaryOp::SetBox, _, _)));
        assert!(sets_via_setbox, "set! on an escaping var becomes setbox");
    }
}
