use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use wasmtime::{Config, Engine, Module};
use xval_core::{ErrorInfo, ValidatorError};

use crate::config::HostConfig;
use crate::hash::compute_module_digest;
use crate::instance::{Invocation, LoadedModule};
use crate::loader::{read_module_bytes, resolve_module_path};
use crate::sandbox::ExecutionBudget;

/// Description of a registered module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Identifier the module was registered under.
    pub identifier: String,
    /// Hex SHA-256 of the module bytes.
    pub digest: String,
    /// Monotonic registration counter; a replaced module gets a higher value.
    pub generation: u64,
    /// Names of every export, functions or not.
    pub exports: Vec<String>,
}

/// Instance accounting since the registry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Instances created and not yet released.
    pub live: u64,
    /// Instances dropped by replacement, unregistration or shutdown.
    pub released: u64,
}

type Slot = Arc<Mutex<Option<LoadedModule>>>;

fn poisoned(what: &str) -> ValidatorError {
    ValidatorError::Infrastructure(ErrorInfo::new(
        "registry.lock_poisoned",
        format!("{what} lock poisoned by a panicking caller"),
    ))
}

fn lock_slot<'a>(
    slot: &'a Slot,
    identifier: &str,
) -> Result<MutexGuard<'a, Option<LoadedModule>>, ValidatorError> {
    slot.lock()
        .map_err(|_| poisoned("module").with_context("module", identifier))
}

/// Compiled and instantiated guest modules keyed by identifier.
///
/// Each identifier owns a slot guarded by its own mutex. Registration and
/// invocation on one identifier are serialized through that mutex, while
/// different identifiers proceed independently. The map lock is held only to
/// look up or insert slots.
pub struct ModuleRegistry {
    engine: Engine,
    module_root: Option<PathBuf>,
    budget: ExecutionBudget,
    slots: RwLock<HashMap<String, Slot>>,
    generation: AtomicU64,
    created: AtomicU64,
    released: Arc<AtomicU64>,
}

impl ModuleRegistry {
    /// Creates an empty registry with a fuel-metering engine configured from `config`.
    pub fn new(config: &HostConfig) -> Result<Self, ValidatorError> {
        config.validate()?;
        let mut engine_config = Config::new();
        engine_config.consume_fuel(true);
        let engine = Engine::new(&engine_config).map_err(|err| {
            ValidatorError::Infrastructure(ErrorInfo::new("engine.init", err.to_string()))
        })?;
        Ok(Self {
            engine,
            module_root: config.module_root.clone(),
            budget: config.budget,
            slots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            created: AtomicU64::new(0),
            released: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Budget applied to every instance and call.
    pub fn budget(&self) -> ExecutionBudget {
        self.budget
    }

    /// Reads the module named by `identifier` from disk and registers it.
    pub fn register_module(&self, identifier: &str) -> Result<ModuleInfo, ValidatorError> {
        let path = resolve_module_path(self.module_root.as_deref(), identifier);
        let bytes =
            read_module_bytes(&path).map_err(|err| err.with_context("module", identifier))?;
        self.register_module_bytes(identifier, &bytes)
    }

    /// Compiles and instantiates `bytes` under `identifier`.
    ///
    /// A previous instance under the same identifier is released once the new
    /// one is live. On failure the previous instance stays registered, and an
    /// identifier that never held an instance leaves no trace.
    pub fn register_module_bytes(
        &self,
        identifier: &str,
        bytes: &[u8],
    ) -> Result<ModuleInfo, ValidatorError> {
        loop {
            let slot = self.slot_or_insert(identifier)?;
            let mut guard = lock_slot(&slot, identifier)?;
            // Unregister, shutdown or a failed first registration may have
            // detached the slot while this caller waited for it.
            if !self.is_mapped(identifier, &slot)? {
                continue;
            }

            let loaded = match self.load(identifier, bytes) {
                Ok(loaded) => loaded,
                Err(err) => {
                    if guard.is_none() {
                        self.detach(identifier, &slot)?;
                    }
                    return Err(err);
                }
            };
            let info = loaded.info().clone();
            let previous = guard.replace(loaded);
            drop(guard);

            match previous {
                Some(previous) => tracing::info!(
                    module = identifier,
                    digest = %info.digest,
                    generation = info.generation,
                    replaced_generation = previous.info().generation,
                    "replaced module instance"
                ),
                None => tracing::info!(
                    module = identifier,
                    digest = %info.digest,
                    generation = info.generation,
                    "registered module instance"
                ),
            }
            return Ok(info);
        }
    }

    fn load(&self, identifier: &str, bytes: &[u8]) -> Result<LoadedModule, ValidatorError> {
        let module = Module::from_binary(&self.engine, bytes).map_err(|err| {
            ValidatorError::Compile(
                ErrorInfo::new("module.compile", format!("error creating module: {err:#}"))
                    .with_context("module", identifier),
            )
        })?;
        let info = ModuleInfo {
            identifier: identifier.to_string(),
            digest: compute_module_digest(bytes),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            exports: module.exports().map(|export| export.name().to_string()).collect(),
        };
        let loaded = LoadedModule::instantiate(
            &self.engine,
            &module,
            self.budget,
            info,
            Arc::clone(&self.released),
        )?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(loaded)
    }

    /// Releases the instance registered under `identifier`. Returns whether one existed.
    pub fn unregister(&self, identifier: &str) -> Result<bool, ValidatorError> {
        let slot = self
            .slots
            .write()
            .map_err(|_| poisoned("registry"))?
            .remove(identifier);
        let Some(slot) = slot else {
            return Ok(false);
        };
        let taken = lock_slot(&slot, identifier)?.take();
        let existed = taken.is_some();
        drop(taken);
        if existed {
            tracing::info!(module = identifier, "unregistered module instance");
        }
        Ok(existed)
    }

    /// Releases every registered instance. The registry stays usable.
    pub fn shutdown(&self) -> Result<usize, ValidatorError> {
        let drained: Vec<(String, Slot)> = self
            .slots
            .write()
            .map_err(|_| poisoned("registry"))?
            .drain()
            .collect();
        let mut count = 0;
        for (identifier, slot) in drained {
            if lock_slot(&slot, &identifier)?.take().is_some() {
                count += 1;
            }
        }
        tracing::info!(released = count, "module registry shut down");
        Ok(count)
    }

    /// Whether a live instance is registered under `identifier`.
    ///
    /// A slot poisoned by a panicking caller counts as absent, since
    /// dispatch to it fails as well.
    pub fn contains(&self, identifier: &str) -> bool {
        let Some(slot) = self.slot(identifier).ok().flatten() else {
            return false;
        };
        let live = lock_slot(&slot, identifier).map(|guard| guard.is_some());
        live.unwrap_or(false)
    }

    /// Registered modules, sorted by identifier.
    pub fn modules(&self) -> Result<Vec<ModuleInfo>, ValidatorError> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .map_err(|_| poisoned("registry"))?
            .iter()
            .map(|(identifier, slot)| (identifier.clone(), Arc::clone(slot)))
            .collect();
        let mut modules = Vec::with_capacity(slots.len());
        for (identifier, slot) in slots {
            if let Some(loaded) = lock_slot(&slot, &identifier)?.as_ref() {
                modules.push(loaded.info().clone());
            }
        }
        modules.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(modules)
    }

    /// Current instance accounting.
    pub fn stats(&self) -> RegistryStats {
        let created = self.created.load(Ordering::SeqCst);
        let released = self.released.load(Ordering::SeqCst);
        RegistryStats {
            live: created.saturating_sub(released),
            released,
        }
    }

    pub(crate) fn invoke(
        &self,
        identifier: &str,
        export: &str,
        input: &[u8],
    ) -> Result<Invocation, ValidatorError> {
        let budget = self.budget;
        self.with_module(identifier, |loaded| loaded.invoke(export, input, budget))
    }

    pub(crate) fn check_entry_point(
        &self,
        identifier: &str,
        export: &str,
    ) -> Result<(), ValidatorError> {
        let budget = self.budget;
        self.with_module(identifier, |loaded| loaded.check_entry_point(export, budget))
    }

    fn with_module<R>(
        &self,
        identifier: &str,
        f: impl FnOnce(&mut LoadedModule) -> Result<R, ValidatorError>,
    ) -> Result<R, ValidatorError> {
        let not_registered = || {
            ValidatorError::ModuleNotRegistered(
                ErrorInfo::new(
                    "module.not_registered",
                    format!("no module registered as {identifier}"),
                )
                .with_context("module", identifier)
                .with_hint("register the module before attaching it to a schema"),
            )
        };
        let slot = self.slot(identifier)?.ok_or_else(not_registered)?;
        let mut guard = lock_slot(&slot, identifier)?;
        let loaded = guard.as_mut().ok_or_else(not_registered)?;
        f(loaded)
    }

    fn slot(&self, identifier: &str) -> Result<Option<Slot>, ValidatorError> {
        Ok(self
            .slots
            .read()
            .map_err(|_| poisoned("registry"))?
            .get(identifier)
            .cloned())
    }

    fn slot_or_insert(&self, identifier: &str) -> Result<Slot, ValidatorError> {
        if let Some(slot) = self.slot(identifier)? {
            return Ok(slot);
        }
        let mut slots = self.slots.write().map_err(|_| poisoned("registry"))?;
        Ok(Arc::clone(slots.entry(identifier.to_string()).or_default()))
    }

    fn is_mapped(&self, identifier: &str, slot: &Slot) -> Result<bool, ValidatorError> {
        Ok(self
            .slots
            .read()
            .map_err(|_| poisoned("registry"))?
            .get(identifier)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, slot)))
    }

    /// Drops `slot` from the map unless another slot already replaced it.
    ///
    /// Called with the slot mutex held; the map lock is never held while
    /// waiting on a slot, so this ordering cannot deadlock.
    fn detach(&self, identifier: &str, slot: &Slot) -> Result<(), ValidatorError> {
        let mut slots = self.slots.write().map_err(|_| poisoned("registry"))?;
        if slots
            .get(identifier)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, slot))
        {
            slots.remove(identifier);
        }
        Ok(())
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("module_root", &self.module_root)
            .field("budget", &self.budget)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
