mod common;

use serde_json::json;
use xval_core::{ErrorKind, FieldPath, FormatValidator, ValidationOutcome};
use xval_wasm::{ExecutionBudget, WasmValidator};

use common::{registry_with, small_budget, wasm, GROW_WAT, WASM_PAGE_BYTES, WIDE_MEMORY_WAT};

fn four_pages() -> ExecutionBudget {
    ExecutionBudget {
        max_memory_bytes: 4 * WASM_PAGE_BYTES,
        ..small_budget()
    }
}

#[test]
fn initial_memory_above_the_cap_fails_instantiation() {
    let registry = registry_with(four_pages());
    let err = registry
        .register_module_bytes("wide", &wasm(WIDE_MEMORY_WAT))
        .expect_err("eight pages over a four page cap");
    assert_eq!(err.kind(), ErrorKind::Instantiation);
    assert_eq!(err.info().context["module"], "wide");
    assert!(!registry.contains("wide"));

    let roomy = registry_with(small_budget());
    roomy
        .register_module_bytes("wide", &wasm(WIDE_MEMORY_WAT))
        .expect("default cap fits eight pages");
}

#[test]
fn growth_past_the_cap_is_refused() {
    let registry = registry_with(four_pages());
    registry
        .register_module_bytes("grow", &wasm(GROW_WAT))
        .expect("register");
    let validator = WasmValidator::new(registry);
    let path = FieldPath::new(["spec", "buffer"]);

    // 1 + 2 pages stays within the cap.
    assert!(validator
        .validate(&path, "grow:growBy", &json!({}), &json!(2))
        .is_valid());
    // 3 + 8 pages does not.
    let outcome = validator.validate(&path, "grow:growBy", &json!({}), &json!(8));
    assert_eq!(outcome, ValidationOutcome::invalid("grow denied"));
    // Exactly reaching the cap is allowed.
    assert!(validator
        .validate(&path, "grow:growBy", &json!({}), &json!(1))
        .is_valid());
    let outcome = validator.validate(&path, "grow:growBy", &json!({}), &json!(1));
    assert_eq!(outcome.rejection(), Some("grow denied"));
}
