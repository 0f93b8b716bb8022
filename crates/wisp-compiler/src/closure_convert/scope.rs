use indexmap::IndexSet;
use wisp_core::Symbol;

/// Per-function analysis result. `enclosed` is the only ordered field: its
/// order is the field layout of every closure record built for this
/// function.
#[derive(Debug, Default, Clone)]
pub struct ScopeRecord {
    pub defined: IndexSet<Symbol>,
    pub used: IndexSet<Symbol>,
    pub inner_functions: IndexSet<Symbol>,
    pub escaping: IndexSet<Symbol>,
    pub enclosed: Vec<Symbol>,
}
