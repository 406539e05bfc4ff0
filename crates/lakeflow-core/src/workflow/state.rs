use crate::query::Row;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Start,
    EnsureDatabase,
    LookupTables,
    FirstRunDecision,
    Bootstrap,
    ClassifyAndLoad,
    RefreshView,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed)
    }

    /// The edges of the state machine. `Failed` is reachable from every
    /// non-terminal state.
    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Start, EnsureDatabase)
                | (EnsureDatabase, LookupTables)
                | (LookupTables, FirstRunDecision)
                | (FirstRunDecision, Bootstrap)
                | (FirstRunDecision, ClassifyAndLoad)
                | (Bootstrap, Done)
                | (ClassifyAndLoad, RefreshView)
                | (ClassifyAndLoad, Done)
                | (RefreshView, Done)
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Start => "start",
            WorkflowState::EnsureDatabase => "ensure-database",
            WorkflowState::LookupTables => "lookup-tables",
            WorkflowState::FirstRunDecision => "first-run-decision",
            WorkflowState::Bootstrap => "bootstrap",
            WorkflowState::ClassifyAndLoad => "classify-and-load",
            WorkflowState::RefreshView => "refresh-view",
            WorkflowState::Done => "done",
            WorkflowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which branch the first-run decision took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPath {
    Bootstrap,
    Incremental,
}

/// An empty catalog means nothing was set up yet. Any listed table, related
/// or not, selects the incremental path.
pub fn first_run_decision(lookup_rows: &[Row]) -> (WorkflowState, RunPath) {
    if lookup_rows.is_empty() {
        (WorkflowState::Bootstrap, RunPath::Bootstrap)
    } else {
        (WorkflowState::ClassifyAndLoad, RunPath::Incremental)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowState::*;

    #[test]
    fn decision_is_bootstrap_iff_lookup_is_empty() {
        assert_eq!(first_run_decision(&[]).0, Bootstrap);
        for n in 1..5 {
            let rows: Vec<Row> = (0..n).map(|i| Row::text(&[&format!("t{i}")])).collect();
            assert_eq!(first_run_decision(&rows), (ClassifyAndLoad, RunPath::Incremental));
        }
        // Unrelated tables still mean the catalog is not empty.
        assert_eq!(
            first_run_decision(&[Row::text(&["unrelated_table"])]).0,
            ClassifyAndLoad
        );
    }

    #[test]
    fn transitions_follow_the_graph() {
        assert!(Start.can_transition_to(EnsureDatabase));
        assert!(FirstRunDecision.can_transition_to(Bootstrap));
        assert!(FirstRunDecision.can_transition_to(ClassifyAndLoad));
        assert!(!Bootstrap.can_transition_to(ClassifyAndLoad));
        assert!(!ClassifyAndLoad.can_transition_to(Bootstrap));
        assert!(!Start.can_transition_to(Bootstrap));
        for s in [Start, EnsureDatabase, LookupTables, FirstRunDecision, Bootstrap, ClassifyAndLoad, RefreshView] {
            assert!(s.can_transition_to(Failed), "{s}");
        }
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Done));
    }
}
