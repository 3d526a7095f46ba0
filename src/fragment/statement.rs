use std::sync::OnceLock;

use super::Fragment;
use crate::compiler::Compiler;
use crate::error::SqlFxError;
use crate::types::Value;

/// SQL text and its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A fragment plus its memoized compiled form.
///
/// The first successful compile is cached; executing the same statement again, on any
/// connection, reuses it. Failed compiles are not cached.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    fragment: Fragment,
    compiled: OnceLock<Compiled>,
}

impl Statement {
    #[must_use]
    pub fn new(fragment: Fragment) -> Self {
        Self {
            fragment,
            compiled: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    /// Compile with `compiler`, or return the cached output.
    ///
    /// # Errors
    /// Returns `SqlFxError::CompileError` when the fragment violates a helper contract.
    pub fn compile(&self, compiler: &Compiler) -> Result<&Compiled, SqlFxError> {
        if let Some(compiled) = self.compiled.get() {
            return Ok(compiled);
        }
        let compiled = compiler.compile(&self.fragment)?;
        Ok(self.compiled.get_or_init(|| compiled))
    }

    /// Whether a compiled form is already cached.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }
}

impl From<Fragment> for Statement {
    fn from(fragment: Fragment) -> Self {
        Statement::new(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql;

    #[test]
    fn compiles_once_and_reuses_the_result() {
        let statement = Statement::new(sql!("SELECT * FROM t WHERE id = {}", 5));
        assert!(!statement.is_compiled());

        let first = statement.compile(&Compiler::postgres()).unwrap();
        let second = statement.compile(&Compiler::postgres()).unwrap();

        assert!(std::ptr::eq(first, second));
        assert_eq!(first.sql, "SELECT * FROM t WHERE id = $1");
        assert_eq!(first.params, vec![Value::Int(5)]);
    }

    #[test]
    fn a_different_compiler_does_not_recompile() {
        let statement = Statement::new(sql!("SELECT {}", 1));
        let pg = statement.compile(&Compiler::postgres()).unwrap().clone();
        let again = statement.compile(&Compiler::mysql()).unwrap();
        assert_eq!(&pg, again);
    }
}
