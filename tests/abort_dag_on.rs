// tests/abort_dag_on.rs
//
// ABORT-DAG-ON stops the whole workflow when a node exits with the
// configured value, optionally pinning the workflow exit status.

mod common;
use common::init_tracing;

use dagrun::types::WorkflowExit;
use dagrun_test_utils::harness::Harness;

#[test]
fn matching_exit_aborts_the_workflow() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        abort_dag_on = { value = 3 }
        [node.B]
        submit = "b.sub"
        parents = ["A"]
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();

    h.terminate("A", 3);
    assert_eq!(h.drain(), Some(WorkflowExit::Abort(3)));
}

#[test]
fn pinned_status_overrides_the_exit_code() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        abort_dag_on = { value = 3, status = 99 }
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();

    h.terminate("A", 3);
    assert_eq!(h.drain(), Some(WorkflowExit::Abort(99)));
}

#[test]
fn abort_on_a_successful_exit_value() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        abort_dag_on = { value = 0 }
        [node.B]
        submit = "b.sub"
        parents = ["A"]
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();

    // The node itself completes fine; the workflow still aborts.
    h.terminate("A", 0);
    assert_eq!(h.drain(), Some(WorkflowExit::Abort(0)));
    assert_eq!(h.dag.nodes_done, 1);
}

#[test]
fn non_matching_exit_does_not_abort() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        abort_dag_on = { value = 3 }
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();

    h.terminate("A", 0);
    assert_eq!(h.drain(), None);
    assert!(h.dag.succeeded());
}
