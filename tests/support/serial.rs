//! Runs provisioning scenarios one at a time.
//!
//! Scenarios capture logs through a scoped subscriber; serialising them keeps
//! captured output attributable to a single scenario.

use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rstest::fixture;

static PROVISIONING_SCENARIOS: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug)]
#[must_use = "Hold this guard until the scenario finishes"]
pub struct ScenarioSerialGuard {
    _guard: MutexGuard<'static, ()>,
}

#[fixture]
pub fn serial_guard() -> ScenarioSerialGuard {
    let guard = PROVISIONING_SCENARIOS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    ScenarioSerialGuard { _guard: guard }
}
