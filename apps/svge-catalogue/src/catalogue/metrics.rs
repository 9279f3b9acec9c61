use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{Mutex, OnceLock},
};

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    authorization_denials: Mutex<HashMap<&'static str, u64>>,
    reorders: Mutex<HashMap<(&'static str, &'static str), u64>>,
    invariant_violations: Mutex<HashMap<&'static str, u64>>,
}

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn record_authorization_denial(reason: &'static str) {
    if let Ok(mut guard) = metrics_state().authorization_denials.lock() {
        *guard.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn record_reorder(scope: &'static str, operation: &'static str) {
    if let Ok(mut guard) = metrics_state().reorders.lock() {
        *guard.entry((scope, operation)).or_insert(0) += 1;
    }
}

pub(crate) fn record_invariant_violation(kind: &'static str) {
    if let Ok(mut guard) = metrics_state().invariant_violations.lock() {
        *guard.entry(kind).or_insert(0) += 1;
    }
}

/// Renders the process-local counters in Prometheus text format.
#[must_use]
pub fn render_metrics() -> String {
    let denials = metrics_state()
        .authorization_denials
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let reorders = metrics_state()
        .reorders
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let violations = metrics_state()
        .invariant_violations
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str(
        "# HELP svge_authorization_denials_total Count of denied catalogue mutations by reason\n",
    );
    output.push_str("# TYPE svge_authorization_denials_total counter\n");
    let mut denial_entries: Vec<_> = denials.into_iter().collect();
    denial_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in denial_entries {
        let _ = writeln!(
            output,
            "svge_authorization_denials_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str("# HELP svge_reorders_total Count of committed reorders by scope and operation\n");
    output.push_str("# TYPE svge_reorders_total counter\n");
    let mut reorder_entries: Vec<_> = reorders.into_iter().collect();
    reorder_entries.sort_by_key(|((scope, operation), _)| (*scope, *operation));
    for ((scope, operation), value) in reorder_entries {
        let _ = writeln!(
            output,
            "svge_reorders_total{{scope=\"{scope}\",operation=\"{operation}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP svge_ordering_invariant_violations_total Count of rejected ordering inputs by kind\n",
    );
    output.push_str("# TYPE svge_ordering_invariant_violations_total counter\n");
    let mut violation_entries: Vec<_> = violations.into_iter().collect();
    violation_entries.sort_by_key(|(kind, _)| *kind);
    for (kind, value) in violation_entries {
        let _ = writeln!(
            output,
            "svge_ordering_invariant_violations_total{{kind=\"{kind}\"}} {value}"
        );
    }

    output
}
