//! A live guest instance and the host side of its calling convention.
//!
//! Each instance owns its own [`Store`], so dropping a [`LoadedModule`] frees
//! the guest's linear memory, tables and globals. The store grants no host
//! imports: guests cannot call back into the host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use wasmtime::{
    Engine, Extern, Instance, Memory, Module, Store, StoreLimits, StoreLimitsBuilder, Trap,
    TypedFunc,
};
use xval_core::{ErrorInfo, ValidatorError};

use crate::abi::{
    verify_abi_compat, EntryParams, EntryResult, PackedRegion, ABI_VERSION_EXPORT, ALLOC_EXPORT,
    MEMORY_EXPORT,
};
use crate::registry::ModuleInfo;
use crate::sandbox::{BudgetEvent, BudgetGuard, ExecutionBudget};

pub(crate) struct HostState {
    limits: StoreLimits,
}

/// Result of one guest call.
#[derive(Debug)]
pub(crate) struct Invocation {
    /// Bytes of the returned region, `None` when the guest returned `0`.
    pub output: Option<Vec<u8>>,
    pub fuel_used: u64,
}

pub(crate) struct LoadedModule {
    store: Store<HostState>,
    instance: Instance,
    info: ModuleInfo,
    released: Arc<AtomicU64>,
}

fn infrastructure(code: &str, message: impl Into<String>) -> ValidatorError {
    ValidatorError::Infrastructure(ErrorInfo::new(code, message))
}

fn classify_call_error(
    export: &str,
    err: wasmtime::Error,
    guard: &mut BudgetGuard,
) -> ValidatorError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        guard.observe(BudgetEvent::FuelExhausted);
        if let Err(exceeded) = guard.ensure_within() {
            return exceeded.with_context("export", export);
        }
    }
    ValidatorError::Infrastructure(
        ErrorInfo::new(
            "invoke.trap",
            format!("error calling exported function {export}: {err:#}"),
        )
        .with_context("export", export),
    )
}

impl LoadedModule {
    pub(crate) fn instantiate(
        engine: &Engine,
        module: &Module,
        budget: ExecutionBudget,
        info: ModuleInfo,
        released: Arc<AtomicU64>,
    ) -> Result<Self, ValidatorError> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(usize::try_from(budget.max_memory_bytes).unwrap_or(usize::MAX))
            .instances(1)
            .build();
        let mut store = Store::new(engine, HostState { limits });
        store.limiter(|state| &mut state.limits);
        // Start functions run during instantiation and are metered too.
        store
            .set_fuel(budget.fuel)
            .map_err(|err| infrastructure("store.fuel", err.to_string()))?;
        let instance = Instance::new(&mut store, module, &[]).map_err(|err| {
            ValidatorError::Instantiation(
                ErrorInfo::new(
                    "module.instantiate",
                    format!("error creating module instance: {err:#}"),
                )
                .with_context("module", info.identifier.clone()),
            )
        })?;
        Ok(Self {
            store,
            instance,
            info,
            released,
        })
    }

    pub(crate) fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn entry_point(
        &mut self,
        export: &str,
    ) -> Result<TypedFunc<EntryParams, EntryResult>, ValidatorError> {
        let func = match self.instance.get_export(&mut self.store, export) {
            Some(Extern::Func(func)) => func,
            Some(_) => {
                return Err(infrastructure(
                    "abi.export_not_function",
                    format!("export {export} is not a function"),
                )
                .with_context("export", export))
            }
            None => {
                return Err(ValidatorError::ExportNotFound(
                    ErrorInfo::new(
                        "export.missing",
                        format!("module does not export function {export}"),
                    )
                    .with_context("export", export)
                    .with_context("module", self.info.identifier.clone()),
                ))
            }
        };
        func.typed::<EntryParams, EntryResult>(&self.store)
            .map_err(|err| {
                infrastructure(
                    "abi.signature_mismatch",
                    format!("export {export} must have signature (i32, i32) -> i64: {err}"),
                )
                .with_context("export", export)
            })
    }

    fn memory(&mut self) -> Result<Memory, ValidatorError> {
        self.instance
            .get_memory(&mut self.store, MEMORY_EXPORT)
            .ok_or_else(|| {
                infrastructure("abi.missing_memory", "module does not export its linear memory")
                    .with_context("module", self.info.identifier.clone())
            })
    }

    fn alloc(&mut self) -> Result<TypedFunc<i32, i32>, ValidatorError> {
        self.instance
            .get_typed_func::<i32, i32>(&mut self.store, ALLOC_EXPORT)
            .map_err(|err| {
                infrastructure(
                    "abi.missing_alloc",
                    format!("module must export {ALLOC_EXPORT}(i32) -> i32: {err}"),
                )
                .with_context("module", self.info.identifier.clone())
            })
    }

    fn refuel(&mut self, budget: ExecutionBudget) -> Result<(), ValidatorError> {
        self.store
            .set_fuel(budget.fuel)
            .map_err(|err| infrastructure("store.fuel", err.to_string()))
    }

    /// Copies `input` into guest memory, calls `export` and copies the returned region out.
    pub(crate) fn invoke(
        &mut self,
        export: &str,
        input: &[u8],
        budget: ExecutionBudget,
    ) -> Result<Invocation, ValidatorError> {
        let entry = self.entry_point(export)?;
        let memory = self.memory()?;
        let alloc = self.alloc()?;
        let len = i32::try_from(input.len()).map_err(|_| {
            infrastructure(
                "marshal.input_too_large",
                format!("payload of {} bytes does not fit guest memory", input.len()),
            )
        })?;

        let mut guard = BudgetGuard::new(budget);
        self.refuel(budget)?;
        let ptr = alloc
            .call(&mut self.store, len)
            .map_err(|err| classify_call_error(ALLOC_EXPORT, err, &mut guard))?;
        memory
            .write(&mut self.store, ptr as u32 as usize, input)
            .map_err(|err| {
                infrastructure("marshal.write", format!("guest buffer rejected input: {err}"))
                    .with_context("ptr", ptr.to_string())
            })?;

        let raw = entry
            .call(&mut self.store, (ptr, len))
            .map_err(|err| classify_call_error(export, err, &mut guard))?;
        let fuel_used = budget.fuel.saturating_sub(self.store.get_fuel().unwrap_or(0));

        let Some(region) = PackedRegion::from_raw(raw) else {
            return Ok(Invocation {
                output: None,
                fuel_used,
            });
        };
        guard.observe(BudgetEvent::OutputBytes(u64::from(region.len)));
        guard
            .ensure_within()
            .map_err(|err| err.with_context("export", export))?;
        let bytes = memory
            .data(&self.store)
            .get(region.range())
            .ok_or_else(|| {
                infrastructure(
                    "marshal.out_of_bounds",
                    "returned region lies outside guest memory",
                )
                .with_context("export", export)
                .with_context("ptr", region.ptr.to_string())
                .with_context("len", region.len.to_string())
            })?
            .to_vec();
        Ok(Invocation {
            output: Some(bytes),
            fuel_used,
        })
    }

    /// Confirms `export` can be called through the calling convention without running it.
    pub(crate) fn check_entry_point(
        &mut self,
        export: &str,
        budget: ExecutionBudget,
    ) -> Result<(), ValidatorError> {
        self.entry_point(export)?;
        self.memory()?;
        self.alloc()?;
        if self
            .instance
            .get_export(&mut self.store, ABI_VERSION_EXPORT)
            .is_some()
        {
            let version = self
                .instance
                .get_typed_func::<(), i32>(&mut self.store, ABI_VERSION_EXPORT)
                .map_err(|err| {
                    infrastructure(
                        "abi.signature_mismatch",
                        format!("{ABI_VERSION_EXPORT} must have signature () -> i32: {err}"),
                    )
                })?;
            let mut guard = BudgetGuard::new(budget);
            self.refuel(budget)?;
            let guest_version = version
                .call(&mut self.store, ())
                .map_err(|err| classify_call_error(ABI_VERSION_EXPORT, err, &mut guard))?;
            verify_abi_compat(guest_version)?;
        }
        Ok(())
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            module = %self.info.identifier,
            generation = self.info.generation,
            "released module instance"
        );
    }
}
