// A compiled unit is not one function but every function reachable from the entry point
// through calls, plus the module globals they touch. Program discovers that set by
// building the entry function and following the callee references of its reachable call
// instructions, building each newly named listing function once. Recursion needs no special
// handling: a function that is already part of the program is simply not built again.
//
// ModuleTypes is the type state the functions share: one signature per function (parameter
// types and result type) and one type per global. Inference runs over every function of
// the program in turn. Each pass first pulls the shared types into the function's own
// values and then lets the opcode handlers join types; call sites join their argument types
// into the callee's parameters and read its result. At the end of the pass the function's
// types are pushed back out. The program is typed once a full round over all functions
// changes neither a function nor the shared table.

//! Call-graph discovery and module-wide type state.

use super::infer::{self, DirtySet};
use super::{builder, Callee, Function};
use crate::bytecode::{Listing, Scalar};
use crate::core::{CompilationSession, CompileError, CompileResult, Type};
use hashbrown::{HashMap, HashSet};

/// Parameter and result types of one function, as seen by its callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub result: Type,
}

/// Types shared between the functions of a program.
#[derive(Debug, Default)]
pub struct ModuleTypes<'arena> {
    sigs: HashMap<&'arena str, Signature>,
    globals: HashMap<&'arena str, Type>,
    changed: bool,
}

impl<'arena> ModuleTypes<'arena> {
    /// Register `name` with untyped parameters, unless it is already known.
    pub fn declare_function(&mut self, name: &'arena str, arity: usize) {
        self.sigs.entry(name).or_insert_with(|| Signature {
            params: vec![Type::Unknown; arity],
            result: Type::Unknown,
        });
    }

    pub fn declare_global(&mut self, name: &'arena str, ty: Type) {
        self.globals.insert(name, ty);
    }

    pub fn signature(&self, name: &str) -> CompileResult<&Signature> {
        self.sigs
            .get(name)
            .ok_or_else(|| CompileError::UnknownFunction {
                name: name.to_string(),
            })
    }

    /// Current type of a global; `Unknown` until something stores to it.
    pub fn global(&self, name: &str) -> Type {
        self.globals.get(name).copied().unwrap_or_default()
    }

    /// Whether a join raised a shared type since the last call.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn raise(slot: &mut Type, ty: Type, changed: &mut bool) -> CompileResult<Type> {
        let joined = slot.unify(ty)?;
        if joined != *slot {
            *slot = joined;
            *changed = true;
        }
        Ok(joined)
    }

    /// Join `ty` into parameter `index` of `name`.
    pub fn join_param(&mut self, name: &str, index: usize, ty: Type) -> CompileResult<Type> {
        let sig = self.sigs.get_mut(name).ok_or_else(|| CompileError::UnknownFunction {
            name: name.to_string(),
        })?;
        let slot = sig.params.get_mut(index).ok_or_else(|| {
            CompileError::backend(format!("{name} has no parameter {index}"))
        })?;
        Self::raise(slot, ty, &mut self.changed)
    }

    pub fn join_result(&mut self, name: &str, ty: Type) -> CompileResult<Type> {
        let sig = self.sigs.get_mut(name).ok_or_else(|| CompileError::UnknownFunction {
            name: name.to_string(),
        })?;
        Self::raise(&mut sig.result, ty, &mut self.changed)
    }

    pub fn join_global(&mut self, name: &'arena str, ty: Type) -> CompileResult<Type> {
        let slot = self.globals.entry(name).or_default();
        Self::raise(slot, ty, &mut self.changed)
    }
}

/// The entry function, every function it can call, and the module globals.
pub struct Program<'arena> {
    /// Entry function first, callees in discovery order.
    pub functions: Vec<Function<'arena>>,
    pub types: ModuleTypes<'arena>,
    /// Declared initial values of module globals.
    pub initial: HashMap<&'arena str, Scalar>,
}

impl<'arena> Program<'arena> {
    /// Build the IR of `entry` called with `args` and of every listing
    /// function reachable from it.
    pub fn build(
        listing: &Listing,
        entry: &str,
        args: &[Scalar],
        session: &CompilationSession<'arena>,
    ) -> CompileResult<Self> {
        let code = listing
            .function(entry)
            .ok_or_else(|| CompileError::UnknownFunction {
                name: entry.to_string(),
            })?;
        let mut main = builder::build(code, listing, session)?;
        main.bind_args(args)?;

        let mut seen: HashSet<&'arena str> = HashSet::new();
        seen.insert(main.name);
        let mut functions = vec![main];
        let mut index = 0;
        while index < functions.len() {
            for name in functions[index].called_functions() {
                if !seen.insert(name) {
                    continue;
                }
                let code = listing
                    .function(name)
                    .ok_or_else(|| CompileError::UnknownFunction {
                        name: name.to_string(),
                    })?;
                log::debug!("{} calls {name}", functions[index].name);
                functions.push(builder::build(code, listing, session)?);
            }
            index += 1;
        }

        let mut types = ModuleTypes::default();
        for func in &functions {
            types.declare_function(func.name, func.params.len());
        }
        let mut initial = HashMap::new();
        for (name, value) in &listing.globals {
            let name = session.intern_str(name);
            types.declare_global(name, value.ty());
            initial.insert(name, *value);
        }

        Ok(Program {
            functions,
            types,
            initial,
        })
    }

    pub fn entry(&self) -> &Function<'arena> {
        &self.functions[0]
    }

    /// Run inference rounds over every function until nothing changes.
    /// Returns the number of rounds.
    pub fn infer_to_fixpoint(&mut self, session: &CompilationSession<'_>) -> CompileResult<usize> {
        let mut rounds = 0;
        loop {
            let mut dirty = DirtySet::default();
            for func in &mut self.functions {
                let pass = infer::run_pass(func, &mut self.types)?;
                dirty.retyped.extend(pass.retyped);
                dirty.casts.extend(pass.casts);
            }
            rounds += 1;
            session.record_retype_pass();
            let shared = self.types.take_changed();
            log::debug!(
                "inference round {}: {} types changed, {} casts, shared table {}",
                rounds,
                dirty.retyped.len(),
                dirty.casts.len(),
                if shared { "changed" } else { "stable" }
            );
            if dirty.is_empty() && !shared {
                return Ok(rounds);
            }
        }
    }

    /// Check that every function came out fully typed.
    pub fn check_resolved(&mut self) -> CompileResult<()> {
        for func in &mut self.functions {
            infer::check_resolved(func)?;
        }
        Ok(())
    }

    /// Globals read or written by any function, with their final types.
    pub fn globals(&self) -> Vec<(&'arena str, Type)> {
        let mut names: Vec<&'arena str> = self
            .functions
            .iter()
            .flat_map(|func| func.global_vars())
            .map(|(name, _)| name)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .map(|name| (name, self.types.global(name)))
            .collect()
    }
}

impl<'arena> Function<'arena> {
    /// Listing functions named by reachable calls, in instruction order.
    pub fn called_functions(&self) -> Vec<&'arena str> {
        let mut names = Vec::new();
        for id in self.order() {
            let instr = self.instr(id);
            if !instr.reachable {
                continue;
            }
            if let Some(Callee::Function(name)) = instr.callee.and_then(|c| self.as_callee(c)) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}
