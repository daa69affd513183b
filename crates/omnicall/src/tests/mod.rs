//! Test suites for the orchestration engine.

mod behaviour;
pub(crate) mod support;
