// tests/submit_failures.rs
//
// Failed submissions back off and retry; exhausting the attempts is a
// permanent node failure that also poisons the node's own retries.

mod common;
use common::init_tracing;

use dagrun::dag::node::RET_SUBMIT_FAILED;
use dagrun::dag::NodeStatus;
use dagrun::events::ExitOutcome;
use dagrun_test_utils::harness::Harness;

const PAIR: &str = r#"
    [node.A]
    submit = "a.sub"
    retry = 5
    [node.B]
    submit = "b.sub"
    parents = ["A"]
"#;

#[test]
fn failed_submission_backs_off_and_recovers() {
    init_tracing();
    let mut h = Harness::new(PAIR);
    h.bootstrap();
    h.queue.fail_next = 1;

    assert_eq!(h.submit(), 0);
    assert_eq!(h.node("A").submit_tries, 1);
    assert_eq!(h.status("A"), NodeStatus::Ready);
    assert!(h.dag.next_submit_time.is_some());

    // Backoff still in effect: the cycle is a no-op.
    assert_eq!(h.submit(), 0);

    // Once the backoff expires the node goes out normally.
    h.dag.next_submit_time = None;
    assert_eq!(h.submit(), 1);
    assert_eq!(h.node("A").submit_tries, 0);
}

#[test]
fn backoff_doubles_between_attempts() {
    init_tracing();
    let mut h = Harness::new(PAIR);
    h.bootstrap();
    h.queue.fail_next = 2;

    h.submit();
    let first_delay = h.dag.submit_delay;
    h.dag.next_submit_time = None;
    h.submit();
    assert_eq!(h.dag.submit_delay, first_delay * 2);
}

#[test]
fn exhausted_attempts_fail_the_node_permanently() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [options]
        max_submit_attempts = 2

        [node.A]
        submit = "a.sub"
        retry = 5
        [node.B]
        submit = "b.sub"
        parents = ["A"]
    "#,
    );
    h.bootstrap();
    h.queue.fail_next = 2;

    h.submit();
    h.dag.next_submit_time = None;
    h.submit();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.node("A").retval, Some(RET_SUBMIT_FAILED));
    // No retries for a node the queue will not accept.
    assert_eq!(h.node("A").retries, h.node("A").retry_max);
    assert_eq!(h.status("B"), NodeStatus::Futile);
    assert!(h.dag.all_nodes_resolved());
}

const EXHAUSTED_WITH_POST: &str = r#"
    [options]
    max_submit_attempts = 1

    [node.A]
    submit = "a.sub"
    post = { cmd = "check.sh" }
    [node.B]
    submit = "b.sub"
    parents = ["A"]
"#;

#[test]
fn exhausted_attempts_still_run_the_post_script() {
    init_tracing();
    let mut h = Harness::new(EXHAUSTED_WITH_POST);
    h.bootstrap();
    h.queue.fail_next = 1;
    h.submit();

    // Exhaustion is a terminal job failure: the node enters POSTRUN and
    // the POST sees the synthetic submit-failure code as the job result.
    assert_eq!(h.status("A"), NodeStatus::PostRun);
    let launched = h.launcher.launched_for("A");
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].job_return, Some(RET_SUBMIT_FAILED));

    // The POST can still rescue the node.
    h.post_exit("A", ExitOutcome::Code(0));
    h.drain();
    assert_eq!(h.status("A"), NodeStatus::Done);
    assert_eq!(h.status("B"), NodeStatus::Ready);
}

#[test]
fn post_failure_after_exhausted_attempts_is_permanent() {
    init_tracing();
    let mut h = Harness::new(EXHAUSTED_WITH_POST);
    h.bootstrap();
    h.queue.fail_next = 1;
    h.submit();

    h.post_exit("A", ExitOutcome::Code(1));
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.status("B"), NodeStatus::Futile);
    assert!(h.dag.all_nodes_resolved());
}
