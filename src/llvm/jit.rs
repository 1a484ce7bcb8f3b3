//! MCJIT execution of a compiled module through its entry stub.

use super::runtime::{self, FAULT_HELPER, POWI_HELPER};
use crate::bytecode::{Scalar, Value};
use crate::core::{Elem, RuntimeError, Type};
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{CodeModel, InitializationConfig, RelocMode, Target, TargetMachine};
use inkwell::OptimizationLevel;

fn optimization_level(level: u8) -> OptimizationLevel {
    match level {
        0 => OptimizationLevel::None,
        1 => OptimizationLevel::Less,
        2 => OptimizationLevel::Default,
        _ => OptimizationLevel::Aggressive,
    }
}

/// Run the new pass manager's `default<On>` pipeline over `module`.
pub fn optimize(module: &Module<'_>, level: u8) -> Result<(), RuntimeError> {
    let level = level.min(3);
    let triple = TargetMachine::get_default_triple();
    let target =
        Target::from_triple(&triple).map_err(|e| RuntimeError::Optimization(e.to_string()))?;
    let machine = target
        .create_target_machine(
            &triple,
            &TargetMachine::get_host_cpu_name().to_string(),
            &TargetMachine::get_host_cpu_features().to_string(),
            optimization_level(level),
            RelocMode::Default,
            CodeModel::JITDefault,
        )
        .ok_or_else(|| RuntimeError::Optimization("no target machine for the host".into()))?;
    module
        .run_passes(&format!("default<O{level}>"), &machine, PassBuilderOptions::create())
        .map_err(|e| RuntimeError::Optimization(e.to_string()))?;
    log::debug!("ran default<O{level}> on {}", module.get_name().to_string_lossy());
    Ok(())
}

/// A module handed to the JIT, callable through its stub.
pub struct JitModule<'ctx> {
    engine: ExecutionEngine<'ctx>,
    module: Module<'ctx>,
    stub: String,
    return_type: Type,
}

impl<'ctx> JitModule<'ctx> {
    pub fn new(
        module: Module<'ctx>,
        stub: String,
        return_type: Type,
        opt_level: u8,
    ) -> Result<Self, RuntimeError> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(RuntimeError::TargetInit)?;
        if opt_level > 0 {
            optimize(&module, opt_level)?;
        }
        let engine = module
            .create_jit_execution_engine(optimization_level(opt_level))
            .map_err(|e| RuntimeError::EngineCreation(e.to_string()))?;
        if let Some(helper) = module.get_function(POWI_HELPER) {
            engine.add_global_mapping(&helper, runtime::powidf2 as usize);
        }
        if let Some(helper) = module.get_function(FAULT_HELPER) {
            engine.add_global_mapping(&helper, runtime::record_fault as usize);
        }
        Ok(Self {
            engine,
            module,
            stub,
            return_type,
        })
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    /// Call the stub and box its result, or report the fault the compiled
    /// code raised.
    pub fn run(&self) -> Result<Value, RuntimeError> {
        log::debug!("calling {}", self.stub);
        runtime::clear_fault();
        let lookup = |e: inkwell::execution_engine::FunctionLookupError| {
            RuntimeError::SymbolLookup {
                name: self.stub.clone(),
                reason: format!("{e:?}"),
            }
        };
        // SAFETY: the stub takes no arguments and was emitted with exactly
        // the return type matched here. An array stub returns either null
        // (after a fault) or a live allocation of `len` elements.
        let value = unsafe {
            match self.return_type {
                Type::Int => {
                    let f = self
                        .engine
                        .get_function::<unsafe extern "C" fn() -> i64>(&self.stub)
                        .map_err(lookup)?;
                    Value::from(Scalar::Int(f.call()))
                }
                Type::Float => {
                    let f = self
                        .engine
                        .get_function::<unsafe extern "C" fn() -> f64>(&self.stub)
                        .map_err(lookup)?;
                    Value::from(Scalar::Float(f.call()))
                }
                Type::Bool => {
                    let f = self
                        .engine
                        .get_function::<unsafe extern "C" fn() -> u8>(&self.stub)
                        .map_err(lookup)?;
                    Value::from(Scalar::Bool(f.call() != 0))
                }
                Type::Array(elem, len) => {
                    // Elements are 8 bytes wide for both element kinds.
                    let f = self
                        .engine
                        .get_function::<unsafe extern "C" fn() -> *const u64>(&self.stub)
                        .map_err(lookup)?;
                    let data = f.call();
                    if let Some(fault) = runtime::take_fault() {
                        return Err(fault.into_error());
                    }
                    let words = if data.is_null() {
                        Vec::new()
                    } else {
                        std::slice::from_raw_parts(data, len as usize).to_vec()
                    };
                    match elem {
                        Elem::Int => Value::IntArray(words.into_iter().map(|w| w as i64).collect()),
                        Elem::Float => {
                            Value::FloatArray(words.into_iter().map(f64::from_bits).collect())
                        }
                    }
                }
                Type::Range => {
                    return Err(RuntimeError::SymbolLookup {
                        name: self.stub.clone(),
                        reason: "ranges cannot cross the host boundary".into(),
                    })
                }
                Type::Void | Type::Unknown => {
                    let f = self
                        .engine
                        .get_function::<unsafe extern "C" fn()>(&self.stub)
                        .map_err(lookup)?;
                    f.call();
                    Value::from(Scalar::None)
                }
            }
        };
        match runtime::take_fault() {
            Some(fault) => Err(fault.into_error()),
            None => Ok(value),
        }
    }
}
