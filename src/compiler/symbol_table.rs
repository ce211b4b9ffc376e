// Kettle Symbol Table
// Resolves identifiers to global, local, free, builtin and self-reference slots

use crate::ast::Mutability;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Where a symbol's value lives at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Builtin,
    /// The enclosing function's own name, used for recursion
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    pub mutability: Mutability,
    /// Parameter count, when the binding is known to hold a function literal
    pub arity: Option<usize>,
}

impl Symbol {
    fn new(name: &str, scope: SymbolScope, index: usize, mutability: Mutability) -> Self {
        Self {
            name: name.to_string(),
            scope,
            index,
            mutability,
            arity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("'{0}' is already declared in this scope")]
    Redeclared(String),
    #[error("Cannot resolve name '{0}'")]
    Unresolved(String),
}

/// One lexical scope. Entering a function body moves the current table into
/// the new table's `outer`; leaving moves it back out.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    store: FxHashMap<String, Symbol>,
    num_definitions: usize,
    free_symbols: Vec<Symbol>,
    outer: Option<Box<SymbolTable>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root table holding the builtins at their table indices
    pub fn with_builtins<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut table = Self::default();
        for (index, name) in names.into_iter().enumerate() {
            let symbol = Symbol::new(name, SymbolScope::Builtin, index, Mutability::Let);
            table.store.insert(name.to_string(), symbol);
        }
        table
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    /// Detach and return the enclosing table
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    /// Unwind to the outermost table
    pub fn into_root(mut self) -> SymbolTable {
        while let Some(outer) = self.outer.take() {
            self = *outer;
        }
        self
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Number of slots allocated by `define` in this table
    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// Outer symbols captured by this scope, in capture order
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    fn check_redeclaration(&self, name: &str) -> Result<(), SymbolError> {
        match self.store.get(name) {
            Some(existing) if existing.scope != SymbolScope::Function => {
                Err(SymbolError::Redeclared(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn define(&mut self, name: &str, mutability: Mutability) -> Result<Symbol, SymbolError> {
        self.check_redeclaration(name)?;

        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol::new(name, scope, self.num_definitions, mutability);
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        Ok(symbol)
    }

    /// Register a builtin in the root table
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Result<Symbol, SymbolError> {
        if let Some(outer) = self.outer.as_mut() {
            return outer.define_builtin(index, name);
        }

        self.check_redeclaration(name)?;
        let symbol = Symbol::new(name, SymbolScope::Builtin, index, Mutability::Let);
        self.store.insert(name.to_string(), symbol.clone());
        Ok(symbol)
    }

    pub fn define_free(&mut self, original: Symbol) -> Symbol {
        let mut symbol = Symbol::new(
            &original.name,
            SymbolScope::Free,
            self.free_symbols.len(),
            original.mutability,
        );
        symbol.arity = original.arity;

        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Bind the function's own name so its body can call itself
    pub fn define_function_name(&mut self, name: &str, arity: usize) -> Symbol {
        let mut symbol = Symbol::new(name, SymbolScope::Function, 0, Mutability::Let);
        symbol.arity = Some(arity);
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Remember the parameter count of a binding defined in this table
    pub fn record_arity(&mut self, name: &str, arity: usize) {
        if let Some(symbol) = self.store.get_mut(name) {
            symbol.arity = Some(arity);
        }
    }

    pub fn resolve(&mut self, name: &str) -> Result<Symbol, SymbolError> {
        if let Some(symbol) = self.store.get(name) {
            return Ok(symbol.clone());
        }

        let Some(outer) = self.outer.as_mut() else {
            return Err(SymbolError::Unresolved(name.to_string()));
        };

        let symbol = outer.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Ok(symbol),
            _ => Ok(self.define_free(symbol)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, scope: SymbolScope, index: usize) -> Symbol {
        Symbol::new(name, scope, index, Mutability::Let)
    }

    #[test]
    fn test_define() {
        let mut global = SymbolTable::new();
        assert_eq!(global.define("a", Mutability::Let).unwrap(), sym("a", SymbolScope::Global, 0));
        assert_eq!(global.define("b", Mutability::Let).unwrap(), sym("b", SymbolScope::Global, 1));

        let mut first_local = SymbolTable::new_enclosed(global);
        assert_eq!(first_local.define("c", Mutability::Let).unwrap(), sym("c", SymbolScope::Local, 0));
        assert_eq!(first_local.define("d", Mutability::Let).unwrap(), sym("d", SymbolScope::Local, 1));

        let mut second_local = SymbolTable::new_enclosed(first_local);
        assert_eq!(second_local.define("e", Mutability::Let).unwrap(), sym("e", SymbolScope::Local, 0));
        assert_eq!(second_local.define("f", Mutability::Let).unwrap(), sym("f", SymbolScope::Local, 1));
    }

    #[test]
    fn test_resolve_local() {
        let mut global = SymbolTable::new();
        global.define("a", Mutability::Let).unwrap();
        global.define("b", Mutability::Let).unwrap();

        let mut local = SymbolTable::new_enclosed(global);
        local.define("c", Mutability::Let).unwrap();
        local.define("d", Mutability::Let).unwrap();

        assert_eq!(local.resolve("a").unwrap(), sym("a", SymbolScope::Global, 0));
        assert_eq!(local.resolve("b").unwrap(), sym("b", SymbolScope::Global, 1));
        assert_eq!(local.resolve("c").unwrap(), sym("c", SymbolScope::Local, 0));
        assert_eq!(local.resolve("d").unwrap(), sym("d", SymbolScope::Local, 1));
        assert!(local.free_symbols().is_empty());
    }

    #[test]
    fn test_resolve_free() {
        let mut global = SymbolTable::new();
        global.define("a", Mutability::Let).unwrap();
        global.define("b", Mutability::Let).unwrap();

        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define("c", Mutability::Let).unwrap();
        first_local.define("d", Mutability::Let).unwrap();

        let mut second_local = SymbolTable::new_enclosed(first_local);
        second_local.define("e", Mutability::Let).unwrap();
        second_local.define("f", Mutability::Let).unwrap();

        let expected = [
            sym("a", SymbolScope::Global, 0),
            sym("b", SymbolScope::Global, 1),
            sym("c", SymbolScope::Free, 0),
            sym("d", SymbolScope::Free, 1),
            sym("e", SymbolScope::Local, 0),
            sym("f", SymbolScope::Local, 1),
        ];
        for symbol in &expected {
            assert_eq!(&second_local.resolve(&symbol.name).unwrap(), symbol);
        }

        assert_eq!(
            second_local.free_symbols(),
            &[sym("c", SymbolScope::Local, 0), sym("d", SymbolScope::Local, 1)]
        );
    }

    #[test]
    fn test_resolve_nested_free_captures_through_each_level() {
        let mut global = SymbolTable::new();
        global.define("g", Mutability::Let).unwrap();

        let mut outer = SymbolTable::new_enclosed(global);
        outer.define("x", Mutability::Var).unwrap();

        let middle = SymbolTable::new_enclosed(outer);
        let mut inner = SymbolTable::new_enclosed(middle);

        let resolved = inner.resolve("x").unwrap();
        assert_eq!(resolved.scope, SymbolScope::Free);
        assert_eq!(resolved.index, 0);
        assert_eq!(resolved.mutability, Mutability::Var);
        assert_eq!(inner.free_symbols()[0].scope, SymbolScope::Free);

        let middle = inner.into_outer().unwrap();
        assert_eq!(middle.free_symbols(), &[Symbol::new("x", SymbolScope::Local, 0, Mutability::Var)]);
    }

    #[test]
    fn test_unresolvable() {
        let mut local = SymbolTable::new_enclosed(SymbolTable::new());
        assert_eq!(
            local.resolve("missing"),
            Err(SymbolError::Unresolved("missing".to_string()))
        );
    }

    #[test]
    fn test_redeclaration() {
        let mut global = SymbolTable::new();
        global.define("x", Mutability::Let).unwrap();
        assert_eq!(
            global.define("x", Mutability::Var),
            Err(SymbolError::Redeclared("x".to_string()))
        );

        global.define_builtin(0, "len").unwrap();
        assert!(global.define("len", Mutability::Let).is_err());
    }

    #[test]
    fn test_function_name_is_shadowed_not_rejected() {
        let mut local = SymbolTable::new_enclosed(SymbolTable::new());
        assert_eq!(local.define_function_name("a", 1).scope, SymbolScope::Function);

        let shadow = local.define("a", Mutability::Let).unwrap();
        assert_eq!(shadow, sym("a", SymbolScope::Local, 0));
        assert_eq!(local.resolve("a").unwrap(), shadow);
    }

    #[test]
    fn test_define_builtin_goes_to_root() {
        let global = SymbolTable::new();
        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define_builtin(2, "first").unwrap();
        let mut second_local = SymbolTable::new_enclosed(first_local);

        let resolved = second_local.resolve("first").unwrap();
        assert_eq!(resolved, sym("first", SymbolScope::Builtin, 2));
        assert!(second_local.free_symbols().is_empty());

        let root = second_local.into_outer().and_then(SymbolTable::into_outer).unwrap();
        assert!(root.is_global());
        assert!(root.store.contains_key("first"));
    }

    #[test]
    fn test_root_table_with_builtins() {
        let mut table = SymbolTable::with_builtins(["len", "puts"]);
        assert!(table.is_global());
        assert_eq!(table.resolve("puts").unwrap(), sym("puts", SymbolScope::Builtin, 1));
        assert_eq!(table.num_definitions(), 0);

        // Builtins occupy no global slots
        let first = table.define("x", Mutability::Var).unwrap();
        assert_eq!(first.index, 0);
        assert!(table.define("len", Mutability::Let).is_err());
    }

    #[test]
    fn test_free_symbol_keeps_arity() {
        let mut outer = SymbolTable::new_enclosed(SymbolTable::new());
        outer.define("add", Mutability::Let).unwrap();
        outer.record_arity("add", 2);

        let mut inner = SymbolTable::new_enclosed(outer);
        assert_eq!(inner.resolve("add").unwrap().arity, Some(2));
    }
}
