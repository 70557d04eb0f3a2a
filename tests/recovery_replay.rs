// tests/recovery_replay.rs
//
// Recovery replays the event log through the same dispatch path as live
// processing, so a restarted engine lands in the same state.

mod common;
use common::init_tracing;

use dagrun::dag::NodeStatus;
use dagrun::events::ExitOutcome;
use dagrun_test_utils::builders::chain_toml;
use dagrun_test_utils::harness::Harness;

const CHAIN_WITH_RETRY: &str = r#"
    [node.N0]
    submit = "n0.sub"
    [node.N1]
    submit = "n1.sub"
    parents = ["N0"]
    retry = 2
    [node.N2]
    submit = "n2.sub"
    parents = ["N1"]
"#;

/// Drive a live run to a mid-workflow state: N0 done, N1 on its second
/// attempt and still in the queue, N2 untouched.
fn live_mid_state() -> Harness {
    let mut h = Harness::new(CHAIN_WITH_RETRY);
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();
    h.terminate("N0", 0);
    h.drain();
    h.submit();
    h.deliver_submits();
    h.drain();
    h.terminate("N1", 1);
    h.drain();
    h.submit();
    h.deliver_submits();
    h.drain();
    h
}

#[test]
fn replay_reaches_the_same_state_as_the_live_run() {
    init_tracing();
    let live = live_mid_state();
    assert_eq!(live.status("N1"), NodeStatus::Submitted);
    assert_eq!(live.node("N1").retries, 1);

    let mut replayed = Harness::new(CHAIN_WITH_RETRY);
    replayed.log.events = live.log.events.clone();
    // The second N1 attempt is still queued, so the post-replay queue check
    // must find it.
    let cluster = live.job("N1").cluster;
    replayed.queue.queued = vec![(cluster, 1)];
    assert!(replayed.recover().is_none());

    for name in ["N0", "N1", "N2"] {
        assert_eq!(replayed.status(name), live.status(name), "status of {name}");
    }
    assert_eq!(replayed.node("N1").retries, 1);
    assert_eq!(replayed.job("N1"), live.job("N1"));
    assert_eq!(replayed.dag.nodes_done, live.dag.nodes_done);
    assert_eq!(replayed.dag.submitted_count, live.dag.submitted_count);
    // Replay reconstructs bookkeeping without touching the queue.
    assert!(replayed.queue.submissions.is_empty());
}

#[test]
fn recovery_resumes_where_the_live_run_stopped() {
    init_tracing();
    let live = live_mid_state();

    let mut replayed = Harness::new(CHAIN_WITH_RETRY);
    replayed.log.events = live.log.events.clone();
    replayed.queue.queued = vec![(live.job("N1").cluster, 1)];
    replayed.recover();

    // The queued attempt finishes after the restart.
    replayed.terminate("N1", 0);
    replayed.drain();
    assert_eq!(replayed.status("N1"), NodeStatus::Done);
    assert_eq!(replayed.status("N2"), NodeStatus::Ready);

    assert_eq!(replayed.cycle(), None);
    replayed.terminate("N2", 0);
    replayed.drain();
    assert!(replayed.dag.succeeded());
}

#[test]
fn premarked_done_nodes_skip_straight_to_done() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        done = true
        [node.B]
        submit = "b.sub"
        parents = ["A"]
    "#,
    );
    h.bootstrap();

    assert_eq!(h.status("A"), NodeStatus::Done);
    assert_eq!(h.status("B"), NodeStatus::Ready);
    assert_eq!(h.dag.nodes_done, 1);
    assert!(h.queue.submissions.is_empty());
}

#[test]
fn post_script_result_survives_replay() {
    init_tracing();
    let toml = r#"
        [node.A]
        submit = "a.sub"
        post = { cmd = "check.sh" }
    "#;
    let mut live = Harness::new(toml);
    live.bootstrap();
    live.submit();
    live.deliver_submits();
    live.drain();
    live.terminate("A", 1);
    live.drain();
    live.post_exit("A", ExitOutcome::Code(0));
    live.drain();
    assert_eq!(live.status("A"), NodeStatus::Done);

    let mut replayed = Harness::new(toml);
    replayed.log.events = live.log.events.clone();
    replayed.recover();
    assert_eq!(replayed.status("A"), NodeStatus::Done);
    // Nothing left in the queue, nothing relaunched.
    assert!(replayed.launcher.launched.is_empty());
}

#[test]
fn interrupted_post_script_is_relaunched() {
    init_tracing();
    let toml = r#"
        [node.A]
        submit = "a.sub"
        post = { cmd = "check.sh" }
    "#;
    let mut live = Harness::new(toml);
    live.bootstrap();
    live.submit();
    live.deliver_submits();
    live.drain();
    live.terminate("A", 0);
    live.drain();
    assert_eq!(live.status("A"), NodeStatus::PostRun);
    // Crash here: the POST result never made it into the log.

    let mut replayed = Harness::new(toml);
    replayed.log.events = live.log.events.clone();
    replayed.recover();

    assert_eq!(replayed.status("A"), NodeStatus::PostRun);
    assert_eq!(replayed.launcher.launched_for("A").len(), 1);
}

#[test]
fn pre_skip_survives_replay() {
    init_tracing();
    let toml = r#"
        [node.A]
        submit = "a.sub"
        pre = { cmd = "guard.sh" }
        pre_skip = 5
        [node.B]
        submit = "b.sub"
        parents = ["A"]
    "#;
    let mut live = Harness::new(toml);
    live.bootstrap();
    live.pre_exit("A", ExitOutcome::Code(5));
    live.drain();
    assert_eq!(live.status("A"), NodeStatus::Done);

    let mut replayed = Harness::new(toml);
    replayed.log.events = live.log.events.clone();
    replayed.recover();

    assert_eq!(replayed.status("A"), NodeStatus::Done);
    assert_eq!(replayed.status("B"), NodeStatus::Ready);
    // The PRE script is not run again for the skipped node.
    assert!(replayed.launcher.launched.is_empty());
}

#[test]
fn replay_of_a_finished_chain_is_fully_done() {
    init_tracing();
    let toml = chain_toml(3);
    let mut live = Harness::new(&toml);
    live.bootstrap();
    for name in ["N0", "N1", "N2"] {
        live.submit();
        live.deliver_submits();
        live.drain();
        live.terminate(name, 0);
        live.drain();
    }
    assert!(live.dag.succeeded());

    let mut replayed = Harness::new(&toml);
    replayed.log.events = live.log.events.clone();
    replayed.recover();
    assert!(replayed.dag.succeeded());
    assert_eq!(replayed.dag.nodes_done, 3);
}
