//! Per-compilation context: fresh-name counters, symbol aliases and the
//! translated-code cache.

use indexmap::IndexMap;
use std::rc::Rc;

use tracing::debug;

use crate::cfa;
use crate::error::Result;
use crate::ir::Code;
use crate::lang::function::{FunctionId, FunctionWrapper};
use crate::translate::translate;

/// Mutable translation context.
///
/// Nothing in here is global: two independently created environments never
/// observe each other's names or cached code.
#[derive(Debug, Default)]
pub struct Env {
    counters: IndexMap<String, usize>,
    aliases: IndexMap<String, String>,
    cache: IndexMap<(FunctionId, bool), Rc<Code>>,
}

/// A new, empty environment.
pub fn fresh_env() -> Env {
    Env::default()
}

impl Env {
    /// `fresh_name("iter")` yields `$iter0`, `$iter1`, ...
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("${}{}", prefix, n);
        *n += 1;
        name
    }

    /// Make global `name` resolve as `target` during translation.
    pub fn alias(&mut self, name: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(name.into(), target.into());
    }

    /// Follow alias links until a name without one is reached.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        let mut cur = name;
        let mut hops = 0;
        while let Some(next) = self.aliases.get(cur) {
            cur = next.as_str();
            hops += 1;
            // cycle
            if hops > self.aliases.len() {
                break;
            }
        }
        cur
    }

    /// Translated code for `func`, in SSA form if `ssa` is set.
    ///
    /// Translates (and converts) on first request; later requests for the
    /// same function and form share the cached result.
    pub fn code_for(&mut self, func: &FunctionWrapper, ssa: bool) -> Result<Rc<Code>> {
        let key = (func.id(), ssa);
        if let Some(code) = self.cache.get(&key) {
            return Ok(code.clone());
        }

        let mut code = translate(func, self)?;
        if ssa {
            cfa::run(&mut code)?;
        }
        debug!(function = func.name(), ssa, blocks = code.blocks.len(), "code cached");

        let code = Rc::new(code);
        self.cache.insert(key, code.clone());
        Ok(code)
    }

    pub fn is_cached(&self, id: FunctionId) -> bool {
        self.cache.keys().any(|(f, _)| *f == id)
    }

    /// Drop both cached forms of one function.
    pub fn invalidate(&mut self, id: FunctionId) {
        self.cache.retain(|(f, _), _| *f != id);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
