mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;
use xval_core::{ErrorKind, FieldPath, FormatValidator, ValidationOutcome};
use xval_wasm::{compute_module_digest, HostConfig, ModuleRegistry, RegistryStats, WasmValidator};

use common::{
    registry_with, small_budget, wasm, HANGING_START_WAT, LIMITS_V2_WAT, LIMITS_WAT, UNITS_WAT,
};

fn path() -> FieldPath {
    FieldPath::new(["spec", "replicas"])
}

#[test]
fn registers_from_module_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("limits"), wasm(LIMITS_WAT)).expect("write module");
    let config = HostConfig {
        module_root: Some(dir.path().to_path_buf()),
        budget: small_budget(),
        ..HostConfig::default()
    };
    let registry = ModuleRegistry::new(&config).expect("engine");
    let info = registry.register_module("limits").expect("register");
    assert_eq!(info.identifier, "limits");
    assert_eq!(info.digest, compute_module_digest(&wasm(LIMITS_WAT)));
    assert!(info.exports.iter().any(|name| name == "checkMax"));
    assert!(registry.contains("limits"));
}

#[test]
fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HostConfig {
        module_root: Some(dir.path().to_path_buf()),
        ..HostConfig::default()
    };
    let registry = ModuleRegistry::new(&config).expect("engine");
    let err = registry.register_module("absent").expect_err("no file");
    assert_eq!(err.kind(), ErrorKind::Load);
    assert_eq!(err.info().context["module"], "absent");
    assert!(!registry.contains("absent"));
}

#[test]
fn garbage_bytes_fail_to_compile() {
    let registry = registry_with(small_budget());
    let err = registry
        .register_module_bytes("junk", b"definitely not wasm")
        .expect_err("compile");
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(!registry.contains("junk"));
    assert_eq!(registry.stats(), RegistryStats { live: 0, released: 0 });
}

#[test]
fn text_format_is_not_a_compiled_unit() {
    let registry = registry_with(small_budget());
    let err = registry
        .register_module_bytes("text", LIMITS_WAT.as_bytes())
        .expect_err("text format");
    assert_eq!(err.kind(), ErrorKind::Compile);
}

#[test]
fn hanging_start_function_fails_instantiation() {
    let registry = registry_with(small_budget());
    let err = registry
        .register_module_bytes("hang", &wasm(HANGING_START_WAT))
        .expect_err("start traps");
    assert_eq!(err.kind(), ErrorKind::Instantiation);
    assert!(!registry.contains("hang"));
}

#[test]
fn reregistering_replaces_and_releases_once() {
    let registry = registry_with(small_budget());
    let first = registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("v1");
    let validator = WasmValidator::new(Arc::clone(&registry));
    assert!(validator
        .validate(&path(), "limits:checkMax", &json!({}), &json!(5))
        .is_valid());

    let second = registry
        .register_module_bytes("limits", &wasm(LIMITS_V2_WAT))
        .expect("v2");
    assert!(second.generation > first.generation);
    assert_ne!(second.digest, first.digest);
    assert_eq!(registry.stats(), RegistryStats { live: 1, released: 1 });

    let outcome = validator.validate(&path(), "limits:checkMax", &json!({}), &json!(5));
    assert_eq!(outcome, ValidationOutcome::invalid("always rejects"));
    assert_eq!(registry.stats(), RegistryStats { live: 1, released: 1 });
}

#[test]
fn failed_replacement_keeps_previous_instance() {
    let registry = registry_with(small_budget());
    registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("v1");
    registry
        .register_module_bytes("limits", b"\0asm broken")
        .expect_err("compile");
    let validator = WasmValidator::new(Arc::clone(&registry));
    assert!(validator
        .validate(&path(), "limits:checkMax", &json!({}), &json!(5))
        .is_valid());
    assert_eq!(registry.stats(), RegistryStats { live: 1, released: 0 });
}

#[test]
fn unregister_releases_the_instance() {
    let registry = registry_with(small_budget());
    registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("register");
    assert!(registry.unregister("limits").expect("unregister"));
    assert!(!registry.unregister("limits").expect("second unregister"));
    assert_eq!(registry.stats(), RegistryStats { live: 0, released: 1 });

    let validator = WasmValidator::new(Arc::clone(&registry));
    let outcome = validator.validate(&path(), "limits:checkMax", &json!({}), &json!(5));
    assert_eq!(
        outcome.error().map(|err| err.kind()),
        Some(ErrorKind::ModuleNotRegistered)
    );
}

#[test]
fn shutdown_releases_everything() {
    let registry = registry_with(small_budget());
    registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("limits");
    registry
        .register_module_bytes("units", &wasm(UNITS_WAT))
        .expect("units");
    let listed: Vec<String> = registry
        .modules()
        .expect("list")
        .into_iter()
        .map(|info| info.identifier)
        .collect();
    assert_eq!(listed, ["limits", "units"]);

    assert_eq!(registry.shutdown().expect("shutdown"), 2);
    assert_eq!(registry.stats(), RegistryStats { live: 0, released: 2 });
    assert!(registry.modules().expect("list").is_empty());

    // Still usable afterwards.
    registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("re-register");
    assert_eq!(registry.stats(), RegistryStats { live: 1, released: 2 });
}

#[test]
fn concurrent_calls_on_one_instance_are_serialized() {
    let registry = registry_with(small_budget());
    registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("register");
    let validator = Arc::new(WasmValidator::new(registry));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let validator = Arc::clone(&validator);
            thread::spawn(move || {
                for round in 0..25 {
                    let value = if (worker + round) % 2 == 0 { 7 } else { 700 };
                    let outcome =
                        validator.validate(&path(), "limits:checkMax", &json!({}), &json!(value));
                    if value > 100 {
                        assert_eq!(outcome.rejection(), Some("exceeds max of 100"));
                    } else {
                        assert!(outcome.is_valid(), "{outcome:?}");
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }
}

#[test]
fn concurrent_registrations_of_distinct_identifiers() {
    let registry = registry_with(small_budget());
    let bytes = Arc::new(wasm(LIMITS_WAT));
    let handles: Vec<_> = (0..6)
        .map(|idx| {
            let registry = Arc::clone(&registry);
            let bytes = Arc::clone(&bytes);
            thread::spawn(move || {
                registry
                    .register_module_bytes(&format!("limits-{idx}"), &bytes)
                    .expect("register")
            })
        })
        .collect();
    let mut generations: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked").generation)
        .collect();
    generations.sort_unstable();
    generations.dedup();
    assert_eq!(generations.len(), 6);
    assert_eq!(registry.stats(), RegistryStats { live: 6, released: 0 });
}

#[test]
fn racing_unregister_never_loses_a_registration() {
    let registry = registry_with(small_budget());
    let bytes = wasm(LIMITS_WAT);
    for round in 0..200 {
        let barrier = Barrier::new(2);
        let (registered, removed) = thread::scope(|scope| {
            let remover = scope.spawn(|| {
                barrier.wait();
                registry.unregister("limits").expect("unregister")
            });
            barrier.wait();
            let registered = registry.register_module_bytes("limits", &bytes);
            (registered, remover.join().expect("remover panicked"))
        });
        registered.expect("register");
        // Either the removal ran first and the registration survives, or it
        // ran second and released exactly that registration.
        assert_eq!(registry.contains("limits"), !removed, "round {round}");
        registry.unregister("limits").expect("reset");
    }
    let stats = registry.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.released, 200);
}
