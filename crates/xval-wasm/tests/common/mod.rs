#![allow(dead_code)]

use std::sync::Arc;

use xval_wasm::{ExecutionBudget, HostConfig, ModuleRegistry, WasmValidator};

/// `checkMax` rejects integers above 100. `spin`, `boom`, `wrongShape` and
/// `outOfBounds` misbehave on purpose. `echo` returns its input as the failure.
pub const LIMITS_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global (export "counter") i32 (i32.const 0))
  (data (i32.const 16) "exceeds max of 100")
  (func (export "alloc") (param i32) (result i32)
    i32.const 1024)
  (func (export "abi_version") (result i32)
    i32.const 1)
  (func (export "checkMax") (param $ptr i32) (param $len i32) (result i64)
    (local $i i32) (local $acc i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
        (local.set $acc
          (i32.add
            (i32.mul (local.get $acc) (i32.const 10))
            (i32.sub
              (i32.load8_u (i32.add (local.get $ptr) (local.get $i)))
              (i32.const 48))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (if (result i64) (i32.gt_s (local.get $acc) (i32.const 100))
      (then (i64.const 77309411344))
      (else (i64.const 0))))
  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $len)) (i64.const 32))
      (i64.extend_i32_u (local.get $ptr))))
  (func (export "spin") (param i32 i32) (result i64)
    (loop $forever (br $forever))
    i64.const 0)
  (func (export "boom") (param i32 i32) (result i64)
    unreachable)
  (func (export "wrongShape") (param i32) (result i32)
    i32.const 0)
  (func (export "outOfBounds") (param i32 i32) (result i64)
    i64.const 68719607808))
"#;

/// Replacement for [`LIMITS_WAT`] whose `checkMax` rejects everything.
pub const LIMITS_V2_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 16) "always rejects")
  (func (export "alloc") (param i32) (result i32)
    i32.const 1024)
  (func (export "checkMax") (param i32 i32) (result i64)
    i64.const 60129542160))
"#;

/// Converters answering with fixed replies.
pub const UNITS_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 64) "{\"converted\":{\"replicas\":3}}")
  (data (i32.const 128) "{\"rejected\":\"no path to v3\"}")
  (func (export "alloc") (param i32) (result i32)
    i32.const 1024)
  (func (export "toV2") (param i32 i32) (result i64)
    i64.const 120259084352)
  (func (export "toV3") (param i32 i32) (result i64)
    i64.const 120259084416)
  (func (export "silent") (param i32 i32) (result i64)
    i64.const 0)
  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $len)) (i64.const 32))
      (i64.extend_i32_u (local.get $ptr)))))
"#;

/// Declares a future ABI.
pub const FUTURE_ABI_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "alloc") (param i32) (result i32)
    i32.const 1024)
  (func (export "abi_version") (result i32)
    i32.const 2)
  (func (export "check") (param i32 i32) (result i64)
    i64.const 0))
"#;

/// Exports a validator but no memory to exchange payloads through.
pub const NO_MEMORY_WAT: &str = r#"
(module
  (func (export "alloc") (param i32) (result i32)
    i32.const 0)
  (func (export "check") (param i32 i32) (result i64)
    i64.const 0))
"#;

/// Never finishes its start function.
pub const HANGING_START_WAT: &str = r#"
(module
  (func $init
    (loop $forever (br $forever)))
  (start $init))
"#;

/// `growBy` grows memory by the page count given as a single JSON digit and
/// rejects when the grow is refused.
pub const GROW_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 16) "grow denied")
  (func (export "alloc") (param i32) (result i32)
    i32.const 1024)
  (func (export "growBy") (param $ptr i32) (param $len i32) (result i64)
    (if (result i64)
      (i32.eq
        (memory.grow (i32.sub (i32.load8_u (local.get $ptr)) (i32.const 48)))
        (i32.const -1))
      (then (i64.const 47244640272))
      (else (i64.const 0)))))
"#;

/// Declares eight pages of initial memory.
pub const WIDE_MEMORY_WAT: &str = r#"
(module
  (memory (export "memory") 8)
  (func (export "alloc") (param i32) (result i32)
    i32.const 1024)
  (func (export "check") (param i32 i32) (result i64)
    i64.const 0))
"#;

pub const WASM_PAGE_BYTES: u64 = 64 * 1024;

pub fn wasm(wat_source: &str) -> Vec<u8> {
    wat::parse_str(wat_source).expect("fixture must assemble")
}

pub fn small_budget() -> ExecutionBudget {
    ExecutionBudget {
        fuel: 100_000,
        ..ExecutionBudget::default()
    }
}

pub fn registry_with(budget: ExecutionBudget) -> Arc<ModuleRegistry> {
    let config = HostConfig {
        budget,
        ..HostConfig::default()
    };
    Arc::new(ModuleRegistry::new(&config).expect("engine"))
}

/// Validator with `limits` and `units` registered from memory.
pub fn validator() -> WasmValidator {
    let registry = registry_with(small_budget());
    registry
        .register_module_bytes("limits", &wasm(LIMITS_WAT))
        .expect("register limits");
    registry
        .register_module_bytes("units", &wasm(UNITS_WAT))
        .expect("register units");
    WasmValidator::new(registry)
}
