use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    Void,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilingFunction {
    pub name: String,
    pub param_count: u16,
    pub return_kind: ReturnKind,
    /// Position in the function table; the operand of `call`.
    pub index: u16,
    /// Index of the function's first instruction in the instruction list.
    pub entry: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareError {
    Duplicate,
    /// Function indices are u16; the table holds at most 65536 entries.
    TableFull,
}

/// Flat, append-only table of every function seen so far.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<CompilingFunction>,
    by_name: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        &mut self,
        name: &str,
        param_count: u16,
        return_kind: ReturnKind,
        entry: usize,
    ) -> Result<u16, DeclareError> {
        if self.by_name.contains_key(name) {
            return Err(DeclareError::Duplicate);
        }
        let index =
            u16::try_from(self.functions.len()).map_err(|_| DeclareError::TableFull)?;
        self.by_name.insert(name.to_string(), self.functions.len());
        self.functions.push(CompilingFunction {
            name: name.to_string(),
            param_count,
            return_kind,
            index,
            entry,
        });
        Ok(index)
    }

    pub fn lookup(&self, name: &str) -> Option<&CompilingFunction> {
        self.by_name.get(name).and_then(|&i| self.functions.get(i))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn into_vec(self) -> Vec<CompilingFunction> {
        self.functions
    }
}
