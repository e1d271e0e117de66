use serde::{Deserialize, Serialize};
use xval_core::{ErrorInfo, ValidatorError};

/// Bounds applied to every guest invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionBudget {
    /// Fuel granted to a single call; roughly one unit per executed instruction.
    pub fuel: u64,
    /// Ceiling on a module's linear memory.
    pub max_memory_bytes: u64,
    /// Ceiling on the payload a guest may hand back.
    pub max_output_bytes: u64,
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self {
            fuel: 10_000_000,
            max_memory_bytes: 64 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ExecutionBudget {
    /// Rejects zero limits, which would fail every call.
    pub fn validate(&self) -> Result<(), ValidatorError> {
        for (field, value) in [
            ("fuel", self.fuel),
            ("max_memory_bytes", self.max_memory_bytes),
            ("max_output_bytes", self.max_output_bytes),
        ] {
            if value == 0 {
                return Err(ValidatorError::Serde(
                    ErrorInfo::new("config.budget_zero", format!("budget {field} must be positive"))
                        .with_context("field", field),
                ));
            }
        }
        Ok(())
    }
}

/// Resource usage observed during one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetEvent {
    /// The guest trapped on running out of fuel.
    FuelExhausted,
    /// Length of the region the guest returned.
    OutputBytes(u64),
}

/// Verdict of a [`BudgetGuard`] on the latest event.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    /// Still within every limit.
    Continue,
    /// `resource` went past `limit`.
    Exceeded {
        /// `fuel` or `output`.
        resource: &'static str,
        /// Configured limit.
        limit: u64,
        /// Observed usage.
        observed: u64,
    },
}

/// Tracks one invocation against its [`ExecutionBudget`].
#[derive(Debug)]
pub struct BudgetGuard {
    budget: ExecutionBudget,
    last_decision: BudgetDecision,
}

impl BudgetGuard {
    /// Starts tracking a fresh invocation.
    pub fn new(budget: ExecutionBudget) -> Self {
        Self {
            budget,
            last_decision: BudgetDecision::Continue,
        }
    }

    /// Records `event` and returns the resulting decision.
    pub fn observe(&mut self, event: BudgetEvent) -> BudgetDecision {
        let decision = match event {
            BudgetEvent::FuelExhausted => BudgetDecision::Exceeded {
                resource: "fuel",
                limit: self.budget.fuel,
                observed: self.budget.fuel,
            },
            BudgetEvent::OutputBytes(value) if value > self.budget.max_output_bytes => {
                BudgetDecision::Exceeded {
                    resource: "output",
                    limit: self.budget.max_output_bytes,
                    observed: value,
                }
            }
            _ => BudgetDecision::Continue,
        };
        self.last_decision = decision.clone();
        decision
    }

    /// Decision of the most recent [`observe`](Self::observe).
    pub fn last_decision(&self) -> &BudgetDecision {
        &self.last_decision
    }

    /// Fails with an `Infrastructure` error once any limit was exceeded.
    pub fn ensure_within(&self) -> Result<(), ValidatorError> {
        match &self.last_decision {
            BudgetDecision::Continue => Ok(()),
            BudgetDecision::Exceeded {
                resource,
                limit,
                observed,
            } => Err(ValidatorError::Infrastructure(
                ErrorInfo::new(
                    "budget.exceeded",
                    format!("guest exceeded {resource} limit {limit} with observed {observed}"),
                )
                .with_context("resource", *resource)
                .with_context("limit", limit.to_string()),
            )),
        }
    }
}
