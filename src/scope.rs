use std::collections::HashSet;

/// Lexical level of the global scope.
pub const GLOBAL_LEVEL: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub level: u32,
    /// Stack slot inside the owning frame (global frame for level 0).
    pub slot: u32,
    pub initialized: bool,
}

impl Symbol {
    pub fn is_global(&self) -> bool {
        self.level == GLOBAL_LEVEL
    }
}

/// Name already declared at the same level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duplicate;

/// Two parallel registries, constants and variables, ordered by
/// declaration. Entries of deeper levels always sit behind shallower ones,
/// so closing a level only pops from the back.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    constants: Vec<Symbol>,
    variables: Vec<Symbol>,
    /// `(level, name)` of every live symbol.
    declared: HashSet<(u32, String)>,
    global_slots: u32,
    frame_slots: u32,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts slot numbering of a new function frame at zero.
    pub fn begin_frame(&mut self) {
        self.frame_slots = 0;
    }

    pub fn declare(
        &mut self,
        name: &str,
        kind: SymbolKind,
        level: u32,
        initialized: bool,
    ) -> Result<u32, Duplicate> {
        if !self.declared.insert((level, name.to_string())) {
            return Err(Duplicate);
        }
        let counter = if level == GLOBAL_LEVEL {
            &mut self.global_slots
        } else {
            &mut self.frame_slots
        };
        let slot = *counter;
        *counter += 1;
        let symbol = Symbol {
            name: name.to_string(),
            kind,
            level,
            slot,
            initialized: initialized || kind == SymbolKind::Const,
        };
        match kind {
            SymbolKind::Const => self.constants.push(symbol),
            SymbolKind::Var => self.variables.push(symbol),
        }
        Ok(slot)
    }

    /// Nearest visible symbol of either kind.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.constants
            .iter()
            .chain(self.variables.iter())
            .filter(|s| s.name == name)
            .max_by_key(|s| s.level)
    }

    /// The nearest symbol, provided it is a constant.
    pub fn lookup_constant(&self, name: &str) -> Option<&Symbol> {
        self.lookup(name).filter(|s| s.kind == SymbolKind::Const)
    }

    /// The nearest symbol, provided it is a variable.
    pub fn lookup_variable(&self, name: &str) -> Option<&Symbol> {
        self.lookup(name).filter(|s| s.kind == SymbolKind::Var)
    }

    pub fn lookup_at_level(&self, name: &str, level: u32) -> Option<&Symbol> {
        if !self.declared.contains(&(level, name.to_string())) {
            return None;
        }
        self.constants
            .iter()
            .chain(self.variables.iter())
            .find(|s| s.level == level && s.name == name)
    }

    /// Records a write to the nearest variable with this name.
    pub fn mark_initialized(&mut self, name: &str) {
        let Some(level) = self.lookup_variable(name).map(|s| s.level) else {
            return;
        };
        if let Some(sym) = self
            .variables
            .iter_mut()
            .rev()
            .find(|s| s.level == level && s.name == name)
        {
            sym.initialized = true;
        }
    }

    /// Drops every symbol declared at `level` or deeper and releases their
    /// frame slots. Returns how many slots were released.
    pub fn close_level(&mut self, level: u32) -> u32 {
        let released = pop_from(&mut self.constants, &mut self.declared, level)
            + pop_from(&mut self.variables, &mut self.declared, level);
        if level == GLOBAL_LEVEL {
            self.global_slots -= released;
        } else {
            self.frame_slots -= released;
        }
        released
    }

    pub fn global_slot_count(&self) -> u32 {
        self.global_slots
    }
}

fn pop_from(registry: &mut Vec<Symbol>, declared: &mut HashSet<(u32, String)>, level: u32) -> u32 {
    let mut released = 0;
    while registry.last().is_some_and(|s| s.level >= level) {
        if let Some(sym) = registry.pop() {
            declared.remove(&(sym.level, sym.name));
            released += 1;
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_level_redeclaration_is_rejected_across_kinds() {
        let mut s = ScopeRegistry::new();
        s.declare("a", SymbolKind::Const, 0, true).expect("declare");
        assert_eq!(s.declare("a", SymbolKind::Var, 0, false), Err(Duplicate));
        assert_eq!(s.declare("a", SymbolKind::Var, 1, false), Ok(0));
        assert_eq!(s.declare("a", SymbolKind::Const, 1, true), Err(Duplicate));
    }

    #[test]
    fn nearest_level_wins_and_close_restores_outer() {
        let mut s = ScopeRegistry::new();
        s.declare("x", SymbolKind::Var, 0, true).expect("global");
        s.begin_frame();
        s.declare("x", SymbolKind::Const, 2, true).expect("inner");
        assert_eq!(s.lookup("x").map(|x| x.level), Some(2));
        assert!(s.lookup_variable("x").is_none());
        assert!(s.lookup_constant("x").is_some());

        assert_eq!(s.close_level(2), 1);
        assert!(s.lookup_at_level("x", 2).is_none());
        s.declare("x", SymbolKind::Var, 2, false).expect("redeclare after close");
        assert_eq!(s.close_level(2), 1);
        let x = s.lookup("x").expect("outer visible");
        assert_eq!(x.level, 0);
        assert_eq!(x.kind, SymbolKind::Var);
    }

    #[test]
    fn slots_are_per_frame_and_rewind_on_close() {
        let mut s = ScopeRegistry::new();
        assert_eq!(s.declare("g", SymbolKind::Var, 0, true), Ok(0));
        s.begin_frame();
        assert_eq!(s.declare("p", SymbolKind::Var, 1, true), Ok(0));
        assert_eq!(s.declare("c", SymbolKind::Const, 2, true), Ok(1));
        assert_eq!(s.declare("v", SymbolKind::Var, 2, false), Ok(2));
        assert_eq!(s.declare("w", SymbolKind::Var, 3, false), Ok(3));
        assert_eq!(s.close_level(3), 1);
        assert_eq!(s.declare("w", SymbolKind::Var, 3, false), Ok(3));
        assert_eq!(s.close_level(1), 4);
        assert_eq!(s.global_slot_count(), 1);
        s.begin_frame();
        assert_eq!(s.declare("q", SymbolKind::Var, 1, true), Ok(0));
    }

    #[test]
    fn close_level_without_entries_is_noop() {
        let mut s = ScopeRegistry::new();
        s.declare("g", SymbolKind::Var, 0, true).expect("declare");
        assert_eq!(s.close_level(4), 0);
        assert!(s.lookup("g").is_some());
    }

    #[test]
    fn mark_initialized_targets_nearest_variable() {
        let mut s = ScopeRegistry::new();
        s.begin_frame();
        s.declare("x", SymbolKind::Var, 2, false).expect("outer");
        s.declare("x", SymbolKind::Var, 3, false).expect("inner");
        s.mark_initialized("x");
        assert!(s.lookup("x").map(|x| x.initialized).unwrap_or(false));
        s.close_level(3);
        assert!(!s.lookup("x").map(|x| x.initialized).unwrap_or(true));
    }
}
