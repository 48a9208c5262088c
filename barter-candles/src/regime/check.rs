use super::{Direction, EvaluationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use smol_str::SmolStr;

/// Name recorded for the regime decision in a [`CompositeResult`].
pub const REGIME_CHECK: &str = "regime";

/// Everything an additional [`SignalCheck`] may inspect.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub symbol: &'a str,
    pub now: DateTime<Utc>,
    pub direction: Direction,
    /// Regime decision already rendered for this signal.
    pub regime: &'a EvaluationResult,
}

/// Pass/fail verdict of a single check, with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub reason: String,
}

impl CheckOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Independently named predicate a signal must satisfy in addition to the regime filter.
pub trait SignalCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, context: &CheckContext<'_>) -> CheckOutcome;

    /// Run the check and label the outcome with its name.
    fn evaluate(&self, context: &CheckContext<'_>) -> CheckResult {
        let CheckOutcome { passed, reason } = self.check(context);
        CheckResult {
            name: SmolStr::new(self.name()),
            passed,
            reason,
        }
    }
}

/// [`SignalCheck`] backed by a closure.
pub struct FnCheck<F> {
    name: SmolStr,
    check: F,
}

impl<F> FnCheck<F>
where
    F: Fn(&CheckContext<'_>) -> CheckOutcome + Send + Sync,
{
    pub fn new(name: impl Into<SmolStr>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> std::fmt::Debug for FnCheck<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCheck").field("name", &self.name).finish()
    }
}

impl<F> SignalCheck for FnCheck<F>
where
    F: Fn(&CheckContext<'_>) -> CheckOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, context: &CheckContext<'_>) -> CheckOutcome {
        (self.check)(context)
    }
}

/// [`SignalCheck`] over a boolean the caller has already computed, eg/ volume confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagCheck {
    name: SmolStr,
    passed: bool,
}

impl FlagCheck {
    pub fn new(name: impl Into<SmolStr>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

impl SignalCheck for FlagCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _: &CheckContext<'_>) -> CheckOutcome {
        if self.passed {
            CheckOutcome::pass(format!("{} confirmed", self.name))
        } else {
            CheckOutcome::fail(format!("{} not confirmed", self.name))
        }
    }
}

/// Named outcome of one check, as recorded in a [`CompositeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: SmolStr,
    pub passed: bool,
    pub reason: String,
}

impl From<&EvaluationResult> for CheckResult {
    fn from(regime: &EvaluationResult) -> Self {
        Self {
            name: SmolStr::new_static(REGIME_CHECK),
            passed: regime.passes,
            reason: regime.reason.clone(),
        }
    }
}

/// Regime decision composed with every additional check, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeResult {
    pub passes: bool,
    pub regime: EvaluationResult,
    /// Every check outcome, regime first.
    pub checks: Vec<CheckResult>,
}

impl CompositeResult {
    pub fn new(regime: EvaluationResult, checks: Vec<CheckResult>) -> Self {
        Self {
            passes: checks.iter().all(|check| check.passed),
            regime,
            checks,
        }
    }

    /// Names of the checks that rejected the signal, in evaluation order.
    pub fn rejected_by(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.name.as_str())
            .collect()
    }
}
