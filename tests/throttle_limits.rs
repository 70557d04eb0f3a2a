// tests/throttle_limits.rs
//
// Submission gates: category throttles, the global job cap, and the idle
// proc cap, with their deferral counters.

mod common;
use common::init_tracing;

use dagrun::dag::NodeStatus;
use dagrun_test_utils::harness::Harness;

#[test]
fn category_throttle_admits_one_at_a_time() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [category.limited]
        max_jobs = 1

        [node.A]
        submit = "a.sub"
        category = "limited"
        [node.B]
        submit = "b.sub"
        category = "limited"
        [node.C]
        submit = "c.sub"
        category = "limited"
    "#,
    );
    h.bootstrap();

    assert_eq!(h.submit(), 1);
    assert_eq!(h.dag.deferrals_category, 2);
    h.deliver_submits();
    h.drain();

    // Still at capacity, nothing else goes out.
    assert_eq!(h.submit(), 0);

    let (first, _) = h.queue.submissions[0].clone();
    h.terminate(&first, 0);
    h.drain();

    // The freed slot reaches a throttled node.
    assert_eq!(h.submit(), 1);
    assert_eq!(h.queue.submissions.len(), 2);
}

#[test]
fn global_job_cap_limits_concurrency() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [options]
        max_jobs = 1

        [node.A]
        submit = "a.sub"
        [node.B]
        submit = "b.sub"
    "#,
    );
    h.bootstrap();

    assert_eq!(h.submit(), 1);
    assert_eq!(h.dag.deferrals_max_jobs, 1);
    h.deliver_submits();
    h.drain();
    assert_eq!(h.submit(), 0);

    let (first, _) = h.queue.submissions[0].clone();
    h.terminate(&first, 0);
    h.drain();
    assert_eq!(h.submit(), 1);
}

#[test]
fn idle_cap_waits_for_jobs_to_start_running() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [options]
        max_idle = 1
        max_submits_per_interval = 1

        [node.A]
        submit = "a.sub"
        [node.B]
        submit = "b.sub"
        [node.C]
        submit = "c.sub"
    "#,
    );
    h.bootstrap();

    assert_eq!(h.submit(), 1);
    h.deliver_submits();
    h.drain();
    assert_eq!(h.dag.idle_procs, 1);

    // The queued proc is still idle, so the next cycle defers everything.
    assert_eq!(h.submit(), 0);
    assert_eq!(h.dag.deferrals_max_idle, 2);

    let (first, _) = h.queue.submissions[0].clone();
    h.execute(&first);
    h.drain();
    assert_eq!(h.dag.idle_procs, 0);
    assert_eq!(h.submit(), 1);
}

#[test]
fn per_interval_cap_bounds_one_cycle() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [options]
        max_submits_per_interval = 2

        [node.A]
        submit = "a.sub"
        [node.B]
        submit = "b.sub"
        [node.C]
        submit = "c.sub"
    "#,
    );
    h.bootstrap();

    assert_eq!(h.submit(), 2);
    assert_eq!(h.submit(), 1);
}

#[test]
fn priorities_decide_submission_order() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [options]
        max_submits_per_interval = 1

        [node.low]
        submit = "low.sub"
        priority = 1
        [node.high]
        submit = "high.sub"
        priority = 10
    "#,
    );
    h.bootstrap();

    h.submit();
    assert_eq!(h.queue.submissions[0].0, "high");
    assert_eq!(h.status("high"), NodeStatus::Submitted);
    assert_eq!(h.status("low"), NodeStatus::Ready);
}

#[test]
fn noop_nodes_complete_without_the_queue() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        noop = true
        [node.B]
        submit = "b.sub"
        parents = ["A"]
        noop = true
    "#,
    );
    h.bootstrap();

    // Synthetic events carry no-op nodes through the normal path.
    assert!(h.cycle().is_none());
    assert_eq!(h.status("A"), NodeStatus::Done);
    assert!(h.cycle().is_none());
    assert_eq!(h.status("B"), NodeStatus::Done);
    assert!(h.queue.submissions.is_empty());
    assert!(h.dag.succeeded());
}
