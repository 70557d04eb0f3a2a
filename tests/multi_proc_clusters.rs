// tests/multi_proc_clusters.rs
//
// Clusters with more than one proc, including factory clusters that only
// finish on ClusterRemoved.

mod common;
use common::init_tracing;

use dagrun::dag::node::RET_JOB_ABORTED;
use dagrun::dag::NodeStatus;
use dagrun::events::{EventDetail, ExitOutcome, JobEvent, JobId};
use dagrun_test_utils::harness::Harness;

const SINGLE: &str = r#"
    [node.A]
    submit = "a.sub"
    [node.B]
    submit = "b.sub"
    parents = ["A"]
"#;

fn submitted() -> Harness {
    let mut h = Harness::new(SINGLE);
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();
    h
}

#[test]
fn node_finishes_only_when_every_proc_has() {
    init_tracing();
    let mut h = submitted();
    let cluster = h.job("A").cluster;

    // A second proc of the same cluster appears.
    h.log.push(JobEvent::new(
        JobId::new(cluster, 1, 0),
        EventDetail::Submitted { node: "A".into() },
    ));
    h.drain();
    assert_eq!(h.node("A").queued_procs, 2);
    assert_eq!(h.node("A").submitted_procs, 2);

    h.log.push(JobEvent::new(
        JobId::new(cluster, 0, 0),
        EventDetail::Terminated { exit: ExitOutcome::Code(0) },
    ));
    h.drain();
    assert_eq!(h.status("A"), NodeStatus::Submitted);
    assert_eq!(h.status("B"), NodeStatus::NotReady);

    h.log.push(JobEvent::new(
        JobId::new(cluster, 1, 0),
        EventDetail::Terminated { exit: ExitOutcome::Code(0) },
    ));
    h.drain();
    assert_eq!(h.status("A"), NodeStatus::Done);
    assert_eq!(h.status("B"), NodeStatus::Ready);
    assert_eq!(h.dag.procs_completed, 2);
}

#[test]
fn one_failed_proc_fails_the_node_and_removes_siblings() {
    init_tracing();
    let mut h = submitted();
    let cluster = h.job("A").cluster;

    h.log.push(JobEvent::new(
        JobId::new(cluster, 1, 0),
        EventDetail::Submitted { node: "A".into() },
    ));
    h.drain();

    h.log.push(JobEvent::new(
        JobId::new(cluster, 0, 0),
        EventDetail::Terminated { exit: ExitOutcome::Code(1) },
    ));
    h.drain();

    // The failing proc triggers removal of the rest of the cluster.
    assert_eq!(h.queue.removed.len(), 1);
    assert_eq!(h.queue.removed[0].0, cluster);

    h.log.push(JobEvent::new(
        JobId::new(cluster, 1, 0),
        EventDetail::Aborted { reason: "sibling proc failed".into() },
    ));
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.node("A").retval, Some(1));
    assert_eq!(h.status("B"), NodeStatus::Futile);
}

#[test]
fn an_aborted_proc_removes_its_queued_siblings() {
    init_tracing();
    let mut h = submitted();
    let cluster = h.job("A").cluster;

    h.log.push(JobEvent::new(
        JobId::new(cluster, 1, 0),
        EventDetail::Submitted { node: "A".into() },
    ));
    h.drain();

    h.log.push(JobEvent::new(
        JobId::new(cluster, 0, 0),
        EventDetail::Aborted { reason: "removed by operator".into() },
    ));
    h.drain();

    // The abort triggers removal of the still-queued sibling.
    assert_eq!(h.queue.removed.len(), 1);
    assert_eq!(h.queue.removed[0].0, cluster);
    assert_eq!(h.node("A").queued_procs, 1);

    h.log.push(JobEvent::new(
        JobId::new(cluster, 1, 0),
        EventDetail::Aborted { reason: "sibling proc aborted".into() },
    ));
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.node("A").retval, Some(RET_JOB_ABORTED));
    assert_eq!(h.status("B"), NodeStatus::Futile);
    // The last proc out does not ask for another removal.
    assert_eq!(h.queue.removed.len(), 1);
}

#[test]
fn factory_cluster_waits_for_cluster_removed() {
    init_tracing();
    let mut h = Harness::new(SINGLE);
    h.bootstrap();
    h.submit();
    let cluster = h.queue.cluster_for("A").unwrap();

    // A late-materializing cluster announces itself first.
    h.log.push(JobEvent::new(
        JobId::new(cluster, 0, 0),
        EventDetail::ClusterSubmitted { node: "A".into() },
    ));
    h.drain();
    assert!(h.node("A").is_factory);

    h.log.push(JobEvent::new(
        JobId::new(cluster, 0, 0),
        EventDetail::Terminated { exit: ExitOutcome::Code(0) },
    ));
    h.drain();
    // More procs may still materialize.
    assert_eq!(h.status("A"), NodeStatus::Submitted);

    h.log.push(JobEvent::new(JobId::new(cluster, 0, 0), EventDetail::ClusterRemoved));
    h.drain();
    assert_eq!(h.status("A"), NodeStatus::Done);
    assert_eq!(h.status("B"), NodeStatus::Ready);
}

#[test]
fn signal_death_is_a_negative_return() {
    init_tracing();
    let mut h = submitted();

    h.push_event("A", EventDetail::Terminated { exit: ExitOutcome::Signal(9) });
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.node("A").retval, Some(-9));
}
