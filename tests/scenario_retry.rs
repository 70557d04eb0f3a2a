// tests/scenario_retry.rs
//
// Retry accounting: a flaky node is resubmitted up to its retry budget,
// and UNLESS-EXIT turns a matching failure into a permanent one.

mod common;
use common::init_tracing;

use dagrun::dag::NodeStatus;
use dagrun_test_utils::harness::Harness;

const FLAKY: &str = r#"
    [node.A]
    submit = "a.sub"
    retry = 2
"#;

#[test]
fn node_is_retried_until_it_succeeds() {
    init_tracing();
    let mut h = Harness::new(FLAKY);
    h.bootstrap();

    // Two failures, each consuming one retry.
    for attempt in 0..2 {
        assert_eq!(h.submit(), 1);
        h.deliver_submits();
        h.drain();
        h.terminate("A", 1);
        assert!(h.drain().is_none());
        assert_eq!(h.status("A"), NodeStatus::Ready);
        assert_eq!(h.node("A").retries, attempt + 1);
    }

    // Third attempt succeeds.
    assert_eq!(h.submit(), 1);
    h.deliver_submits();
    h.drain();
    h.terminate("A", 0);
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Done);
    assert_eq!(h.node("A").retries, 2);
    assert_eq!(h.queue.submissions.len(), 3);
    assert!(h.dag.succeeded());
}

#[test]
fn retries_exhausted_is_a_permanent_failure() {
    init_tracing();
    let mut h = Harness::new(FLAKY);
    h.bootstrap();

    for _ in 0..3 {
        h.submit();
        h.deliver_submits();
        h.drain();
        h.terminate("A", 1);
        h.drain();
    }

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.node("A").retval, Some(1));
    assert_eq!(h.dag.nodes_failed, 1);
    assert!(h.dag.all_nodes_resolved());
    assert!(!h.dag.succeeded());
}

#[test]
fn unless_exit_short_circuits_remaining_retries() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        retry = 3
        unless_exit = 42
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();

    h.terminate("A", 42);
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.node("A").retries, 0);
    assert_eq!(h.queue.submissions.len(), 1);
    assert_eq!(h.dag.nodes_failed, 1);
}

#[test]
fn retry_runs_the_pre_script_again() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        retry = 1
        pre = { cmd = "setup.sh" }
    "#,
    );
    h.bootstrap();
    assert_eq!(h.status("A"), NodeStatus::PreRun);
    assert_eq!(h.launcher.launched_for("A").len(), 1);

    h.pre_exit("A", dagrun::events::ExitOutcome::Code(0));
    h.submit();
    h.deliver_submits();
    h.drain();
    h.terminate("A", 1);
    h.drain();

    // Back through PRERUN on the retry.
    assert_eq!(h.status("A"), NodeStatus::PreRun);
    assert_eq!(h.launcher.launched_for("A").len(), 2);
    assert_eq!(h.node("A").retries, 1);
}
