//! Integration tests for chart-variable bindings across the three scopes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hibench_core::{
    AlarmLinker, Chart, ChartVariable, ChartVariableOptions, CoreError, Host, RegistryOptions, Scope, Value,
    ValueCell, VariableType,
};
use hibench_domain::DuplicateLookup;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct RecordingLinker {
    calls: AtomicUsize,
    resolved: Mutex<Vec<Option<f64>>>,
}

impl AlarmLinker for RecordingLinker {
    fn link_matching(&self, chart: &Chart) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = chart.id().unwrap();
        let resolved = chart
            .find_variable(&format!("{id}.used"))
            .unwrap()
            .and_then(|variable| variable.value().unwrap().as_number());
        self.resolved.lock().unwrap().push(resolved);
    }
}

fn setup() -> (Arc<Host>, Arc<Chart>) {
    let host = Host::new("web01", RegistryOptions::default());
    let chart = Chart::new(&host, "mem", "x", "y").unwrap();
    (host, chart)
}

fn lookups(chart: &Chart, id: &str, name: &str, variable: &str) -> usize {
    let view = chart.read_lock().unwrap();
    let full_id = format!("{id}.{variable}");
    let full_name = format!("{name}.{variable}");

    [
        view.chart_variables().find(variable),
        view.family_variables().find(&full_id),
        view.family_variables().find(&full_name),
        view.host_variables().find(&full_id),
        view.host_variables().find(&full_name),
    ]
    .into_iter()
    .filter(|found| found.as_ref().unwrap().is_some())
    .count()
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn create_resolves_five_keys() {
    let (_host, chart) = setup();
    let collected = Arc::new(ValueCell::collected(2048));
    let used = ChartVariable::create(&chart, "used", Arc::clone(&collected), ChartVariableOptions::empty()).unwrap();

    assert_eq!(lookups(&chart, "x", "y", "used"), 5);
    assert_eq!(chart.binding_count().unwrap(), 1);
    assert_eq!(used.variable_type(), VariableType::Collected);

    // every registration reads the collector's cell
    assert!(collected.store_integer(4096));
    let view = chart.read_lock().unwrap();
    let from_host = view.host_variables().find("y.used").unwrap().unwrap();
    assert_eq!(from_host.value().unwrap(), Value::Collected(4096));
    assert_eq!(from_host.scope(), Scope::Host);
}

#[test]
fn scoped_lookup_prefers_the_most_specific_table() {
    let (host, chart) = setup();
    let sibling = Chart::new(&host, "mem", "x2", "y2").unwrap();

    ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(1.0)), ChartVariableOptions::empty()).unwrap();
    ChartVariable::create(&sibling, "used", Arc::new(ValueCell::number(2.0)), ChartVariableOptions::empty()).unwrap();

    let local = chart.find_variable("used").unwrap().unwrap();
    assert_eq!(local.scope(), Scope::Local);
    assert_eq!(local.value().unwrap(), Value::Number(1.0));

    // the sibling's value is reachable through the shared family table
    let through_family = chart.find_variable("x2.used").unwrap().unwrap();
    assert_eq!(through_family.scope(), Scope::Family);
    assert_eq!(through_family.value().unwrap(), Value::Number(2.0));

    let other_family = Chart::new(&host, "cpu", "cpu0", "cpu0").unwrap();
    let through_host = other_family.find_variable("y.used").unwrap().unwrap();
    assert_eq!(through_host.scope(), Scope::Host);

    assert!(chart.find_variable("missing").unwrap().is_none());
}

// ============================================================================
// Rename
// ============================================================================

#[test]
fn rename_moves_keys_and_keeps_binding_count() {
    let (_host, chart) = setup();
    ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(3.0)), ChartVariableOptions::empty()).unwrap();

    chart.rename("x2", "y2").unwrap();

    assert_eq!(chart.id().unwrap(), "x2");
    assert_eq!(chart.name().unwrap(), "y2");
    assert_eq!(chart.binding_count().unwrap(), 1);
    assert_eq!(lookups(&chart, "x2", "y2", "used"), 5);

    let view = chart.read_lock().unwrap();
    for stale in ["x.used", "y.used"] {
        assert!(view.family_variables().find(stale).unwrap().is_none());
        assert!(view.host_variables().find(stale).unwrap().is_none());
    }
    assert_eq!(view.family_variables().len().unwrap(), 2);
    assert_eq!(view.host_variables().len().unwrap(), 2);
}

#[test]
fn rename_notifies_linker_after_unlocking() {
    let linker = Arc::new(RecordingLinker::default());
    let host = Host::with_linker("web01", RegistryOptions::default(), linker.clone());
    let chart = Chart::new(&host, "mem", "x", "y").unwrap();
    ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(7.0)), ChartVariableOptions::empty()).unwrap();

    chart.rename("x2", "y2").unwrap();
    chart.rename_all().unwrap();

    assert_eq!(linker.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*linker.resolved.lock().unwrap(), vec![Some(7.0), Some(7.0)]);
}

#[test]
fn snapshot_reports_keys_after_rename() {
    let (_host, chart) = setup();
    ChartVariable::create(&chart, "used", Arc::new(ValueCell::time(1_700_000_000)), ChartVariableOptions::empty())
        .unwrap();
    let custom = chart.create_custom_variable("Threshold").unwrap();
    custom.set_custom_value(80.0).unwrap();
    chart.rename("x2", "y2").unwrap();

    let snapshot = chart.variables_snapshot().unwrap();
    assert_eq!(snapshot.len(), 2);

    assert_eq!(snapshot[0].variable, "threshold");
    assert_eq!(snapshot[0].full_id, "x2.threshold");
    assert_eq!(snapshot[0].value, Value::Number(80.0));
    assert!(snapshot[0].custom);

    assert_eq!(snapshot[1].full_name, "y2.used");
    assert_eq!(snapshot[1].variable_type, VariableType::Time);
    assert!(!snapshot[1].custom);
}

// ============================================================================
// Custom variables
// ============================================================================

#[test]
fn custom_variable_names_are_normalized() {
    let (_host, chart) = setup();

    let first = chart.create_custom_variable("Memory Free").unwrap();
    let second = chart.create_custom_variable("memory_free").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.variable(), "memory_free");
    assert!(first.is_custom());
    assert!(first.value().unwrap().as_number().unwrap().is_nan());
    assert_eq!(chart.binding_count().unwrap(), 1);
    assert_eq!(lookups(&chart, "x", "y", "memory_free"), 5);
}

#[test]
fn custom_variable_cannot_shadow_collected_one() {
    let (_host, chart) = setup();
    ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(1.0)), ChartVariableOptions::empty()).unwrap();

    let err = chart.create_custom_variable("USED").unwrap_err();
    assert!(matches!(err, CoreError::NameConflict { ref name, .. } if name == "used"));
    assert_eq!(chart.binding_count().unwrap(), 1);
}

#[test]
fn set_only_clears_exposed_flag_on_change() {
    let (_host, chart) = setup();
    let custom = chart.create_custom_variable("limit").unwrap();

    custom.set_custom_value(10.0).unwrap();
    chart.mark_exposed_upstream();

    custom.set_custom_value(10.0).unwrap();
    assert!(chart.is_exposed_upstream());

    custom.set_custom_value(12.5).unwrap();
    assert!(!chart.is_exposed_upstream());
    assert_eq!(custom.value().unwrap(), Value::Number(12.5));
}

#[test]
fn undefined_to_undefined_is_not_a_change() {
    let (_host, chart) = setup();
    let custom = chart.create_custom_variable("limit").unwrap();
    chart.mark_exposed_upstream();

    custom.set_custom_value(f64::NAN).unwrap();
    assert!(chart.is_exposed_upstream());
}

#[test]
fn set_on_freed_custom_variable_is_refused() {
    let (_host, chart) = setup();
    let custom = chart.create_custom_variable("limit").unwrap();
    custom.free().unwrap();

    assert!(matches!(custom.set_custom_value(1.0), Err(CoreError::BindingNotFound { .. })));
}

// ============================================================================
// Free and teardown
// ============================================================================

#[test]
fn free_removes_every_registration() {
    let (host, chart) = setup();
    let used =
        ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(1.0)), ChartVariableOptions::empty()).unwrap();
    let free =
        ChartVariable::create(&chart, "free", Arc::new(ValueCell::number(2.0)), ChartVariableOptions::empty()).unwrap();

    used.free().unwrap();

    assert_eq!(lookups(&chart, "x", "y", "used"), 0);
    assert_eq!(lookups(&chart, "x", "y", "free"), 5);
    assert_eq!(chart.binding_count().unwrap(), 1);
    assert_eq!(host.variables().names().unwrap(), vec!["x.free", "y.free"]);

    free.free().unwrap();
    assert!(chart.variables().is_empty().unwrap());
    assert!(chart.family().variables().is_empty().unwrap());
    assert!(host.variables().is_empty().unwrap());
}

#[test]
fn freeing_twice_is_a_reported_consistency_error() {
    let (_host, chart) = setup();
    let used =
        ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(1.0)), ChartVariableOptions::empty()).unwrap();

    used.free().unwrap();
    let err = used.free().unwrap_err();
    assert!(matches!(err, CoreError::BindingNotFound { .. }));
}

#[test]
fn dropping_chart_cleans_shared_tables() {
    let (host, chart) = setup();
    let sibling = Chart::new(&host, "mem", "z", "z").unwrap();
    ChartVariable::create(&sibling, "used", Arc::new(ValueCell::number(1.0)), ChartVariableOptions::empty()).unwrap();
    let custom = chart.create_custom_variable("limit").unwrap();
    ChartVariable::create(&chart, "used", Arc::new(ValueCell::number(2.0)), ChartVariableOptions::empty()).unwrap();

    drop(chart);

    assert!(custom.is_freed());
    assert_eq!(host.variables().names().unwrap(), vec!["z.used", "z.used"]);
    assert_eq!(sibling.family().variables().len().unwrap(), 2);
}

// ============================================================================
// Duplicate names
// ============================================================================

#[test]
fn duplicate_lookup_follows_configuration() {
    for (lookup, expected) in [(DuplicateLookup::MostRecent, 2.0), (DuplicateLookup::FirstRegistered, 1.0)] {
        let host = Host::new("web01", RegistryOptions { duplicate_lookup: lookup, ..RegistryOptions::default() });
        let older = Chart::new(&host, "disk", "sda", "disk.root").unwrap();
        let newer = Chart::new(&host, "disk", "sda", "disk.root").unwrap();

        ChartVariable::create(&older, "util", Arc::new(ValueCell::number(1.0)), ChartVariableOptions::empty()).unwrap();
        ChartVariable::create(&newer, "util", Arc::new(ValueCell::number(2.0)), ChartVariableOptions::empty()).unwrap();

        assert_eq!(host.variables().find_all("sda.util").unwrap().len(), 2);
        assert_eq!(host.variables().find_all("disk.root.util").unwrap().len(), 2);
        let found = host.variables().find("sda.util").unwrap().unwrap();
        assert_eq!(found.value().unwrap(), Value::Number(expected));
    }
}
