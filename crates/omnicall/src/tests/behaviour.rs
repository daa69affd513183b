//! Behaviour-driven tests for multi-aggregate orchestration.

use std::str::FromStr;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;

use crate::errors::OrchestrationError;
use crate::failure::{ErrorKind, SkipReason};
use crate::negotiate::NegotiationMode;
use crate::operation::Operation;
use crate::probe::GET_VERSION_METHOD;
use crate::reconcile::OutcomeClass;

use super::support::{TestWorld, UNSCRIPTED_ERROR, am_url};

type StepResult = Result<(), String>;

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

fn parse_operation(name: &str) -> Result<Operation, String> {
    Operation::from_str(name).map_err(|error| error.to_string())
}

// ---------------------------------------------------------------------------
// Given
// ---------------------------------------------------------------------------

#[given("aggregate {name} speaks AM API version {version}")]
fn given_aggregate(world: &mut TestWorld, name: String, version: u32) {
    world.add_aggregate(&name, version);
}

#[given("aggregate {name} runs AM API version {version} with version {alternate} at an alternate URL")]
fn given_aggregate_with_alternate(world: &mut TestWorld, name: String, version: u32, alternate: u32) {
    world.add_aggregate_with_alternate(&name, version, alternate);
}

#[given("aggregate {name} is unreachable")]
fn given_unreachable(world: &mut TestWorld, name: String) {
    world.add_unreachable_aggregate(&name, UNSCRIPTED_ERROR);
}

#[given("the request names slivers {first} and {second}")]
fn given_slivers(world: &mut TestWorld, first: String, second: String) {
    world.slivers = vec![first, second];
}

#[given("aggregate {name} reports sliver {urn} without error for {method}")]
fn given_sliver_report(world: &mut TestWorld, name: String, urn: String, method: String) {
    world.script_reply(
        &name,
        &method,
        json!({"geni_slivers": [{"geni_sliver_urn": urn, "geni_error": ""}]}),
    );
}

#[given("the version cache file is truncated")]
fn given_truncated_cache(world: &mut TestWorld) {
    world.corrupt_cache("{\"https://alpha.example.net/am\": {\"timestamp\": \"2026-");
}

#[given("AM API version {version} was requested explicitly")]
fn given_explicit_version(world: &mut TestWorld, version: u32) {
    world.explicit_version = Some(version);
}

#[given("developer mode is enabled")]
fn given_developer_mode(world: &mut TestWorld) {
    world.mode = NegotiationMode::Relaxed;
}

// ---------------------------------------------------------------------------
// When
// ---------------------------------------------------------------------------

#[when("{operation} runs on slice {slice} at AM API version {version}")]
fn when_runs_on_slice(
    world: &mut TestWorld,
    operation: String,
    slice: String,
    version: u32,
) -> StepResult {
    let operation = parse_operation(&operation)?;
    world.run(operation, Some(&slice), version);
    Ok(())
}

#[when("{operation} runs without a slice at AM API version {version}")]
fn when_runs_without_slice(world: &mut TestWorld, operation: String, version: u32) -> StepResult {
    let operation = parse_operation(&operation)?;
    world.run(operation, None, version);
    Ok(())
}

// ---------------------------------------------------------------------------
// Then
// ---------------------------------------------------------------------------

#[then("{succeeded} of {total} aggregates succeed")]
fn then_success_count(world: &mut TestWorld, succeeded: usize, total: usize) -> StepResult {
    let outcome = world.outcome()?;
    if outcome.success_count != succeeded || outcome.total_endpoints != total {
        return Err(format!(
            "expected {succeeded} of {total} successes:\n{}",
            outcome.summary()
        ));
    }
    Ok(())
}

#[then("aggregate {name} is skipped for a version mismatch")]
fn then_version_mismatch(world: &mut TestWorld, name: String) -> StepResult {
    let result = world.endpoint(&name)?;
    match result.result.error_kind() {
        Some(ErrorKind::VersionMismatch) => Ok(()),
        other => Err(format!("expected a version mismatch for {name}, got {other:?}")),
    }
}

#[then("aggregate {name} is reported unreachable")]
fn then_unreachable(world: &mut TestWorld, name: String) -> StepResult {
    let result = world.endpoint(&name)?;
    match result.result.error_kind() {
        Some(ErrorKind::TransportError) => Ok(()),
        other => Err(format!("expected a transport error for {name}, got {other:?}")),
    }
}

#[then("aggregate {name} was sent {method}")]
fn then_method_sent(world: &mut TestWorld, name: String, method: String) -> StepResult {
    match world.transport.count(&am_url(&name), &method) {
        1 => Ok(()),
        count => Err(format!("expected one {method} call to {name}, saw {count}")),
    }
}

#[then("aggregate {name} partially succeeds")]
fn then_partial(world: &mut TestWorld, name: String) -> StepResult {
    let result = world.endpoint(&name)?;
    if result.class != OutcomeClass::PartialSuccess {
        return Err(format!("expected partial success, got {:?}", result.class));
    }
    Ok(())
}

#[then("sliver {urn} is reported missing")]
fn then_sliver_missing(world: &mut TestWorld, urn: String) -> StepResult {
    let outcome = world.outcome()?;
    if outcome.missing_resources != vec![urn.clone()] {
        return Err(format!(
            "expected only {urn} missing, got {:?}",
            outcome.missing_resources
        ));
    }
    Ok(())
}

#[then("no sliver is reported failed")]
fn then_no_sliver_failed(world: &mut TestWorld) -> StepResult {
    let outcome = world.outcome()?;
    if !outcome.failed_resources.is_empty() {
        return Err(format!(
            "unexpected failed slivers: {:?}",
            outcome.failed_resources
        ));
    }
    Ok(())
}

#[then("aggregate {name} was probed live once")]
fn then_probed_once(world: &mut TestWorld, name: String) -> StepResult {
    let result = world.endpoint(&name)?;
    if result.result.from_cache {
        return Err(format!("{name} was answered from the cache"));
    }
    match world.transport.count(&am_url(&name), GET_VERSION_METHOD) {
        1 => Ok(()),
        count => Err(format!("expected one probe of {name}, saw {count}")),
    }
}

#[then("the version cache records aggregate {name}")]
fn then_cache_records(world: &mut TestWorld, name: String) -> StepResult {
    let contents = world.cache_contents();
    let parsed: serde_json::Value =
        serde_json::from_str(&contents).map_err(|error| format!("cache is not JSON: {error}"))?;
    let entry = parsed
        .get(am_url(&name))
        .ok_or_else(|| format!("no cache entry for {name} in {contents}"))?;
    match entry.pointer("/version/geni_api") {
        Some(_) => Ok(()),
        None => Err(format!("cache entry for {name} lacks capabilities: {entry}")),
    }
}

#[then("the invocation asks for AM API version {version}")]
fn then_invocation_version(world: &mut TestWorld, version: u32) -> StepResult {
    let outcome = world.outcome()?;
    if outcome.api_version != version {
        return Err(format!(
            "expected AM API version {version}, got {}",
            outcome.api_version
        ));
    }
    Ok(())
}

#[then("the summary explains the switch from AM API version {from} to {to}")]
fn then_switch_explained(world: &mut TestWorld, from: u32, to: u32) -> StepResult {
    let summary = world.outcome()?.summary();
    let expected = format!("Switching from AM API version {from} to {to}");
    if !summary.contains(&expected) {
        return Err(format!("summary lacks '{expected}':\n{summary}"));
    }
    Ok(())
}

#[then("the summary warns that AM API version {version} was requested explicitly")]
fn then_explicit_warning(world: &mut TestWorld, version: u32) -> StepResult {
    let summary = world.outcome()?.summary();
    let expected = format!("WARNING: you explicitly requested AM API version {version}");
    if !summary.starts_with(&expected) {
        return Err(format!("summary does not open with '{expected}':\n{summary}"));
    }
    Ok(())
}

#[then("the operation fails because {name} cannot speak AM API version {version}")]
fn then_lone_mismatch(world: &mut TestWorld, name: String, version: u32) -> StepResult {
    match world.error()? {
        OrchestrationError::EndpointSkipped {
            endpoint,
            reason: SkipReason::VersionMismatch { desired, .. },
        } if *desired == version && endpoint.contains(&name) => Ok(()),
        other => Err(format!("unexpected error: {other}")),
    }
}

#[then("aggregate {name} is called at its version {version} URL")]
fn then_redirected(world: &mut TestWorld, name: String, version: u32) -> StepResult {
    let alternate = format!("{}/v{version}", am_url(&name));
    let result = world.endpoint(&name)?;
    let called = result.called.as_ref().map(|endpoint| endpoint.url());
    if !result.redirected || called != Some(alternate.as_str()) {
        return Err(format!("expected a redirect to {alternate}, called {called:?}"));
    }
    if world.transport.count(&am_url(&name), "Describe") != 0 {
        return Err(format!("{name} was also called at its primary URL"));
    }
    Ok(())
}

#[then("aggregate {name} is called at AM API version {version}")]
fn then_called_at(world: &mut TestWorld, name: String, version: u32) -> StepResult {
    let result = world.endpoint(&name)?;
    if result.version() != Some(version) {
        return Err(format!(
            "expected {name} at version {version}, got {:?}",
            result.version()
        ));
    }
    if result.warnings.is_empty() {
        return Err(format!("expected a mismatch warning for {name}"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario registration
// ---------------------------------------------------------------------------

#[scenario(path = "tests/features/orchestration.feature")]
fn orchestration_behaviour(world: TestWorld) {
    let _ = world;
}
