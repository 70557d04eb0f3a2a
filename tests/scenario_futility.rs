// tests/scenario_futility.rs
//
// A permanent failure poisons every descendant, and only descendants.

mod common;
use common::init_tracing;

use dagrun::dag::NodeStatus;
use dagrun_test_utils::harness::Harness;

#[test]
fn failure_marks_all_descendants_futile() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        [node.B]
        submit = "b.sub"
        parents = ["A"]
        [node.C]
        submit = "c.sub"
        parents = ["A"]
        [node.D]
        submit = "d.sub"
        parents = ["B", "C"]
        [node.X]
        submit = "x.sub"
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();

    h.terminate("A", 1);
    h.drain();

    assert_eq!(h.status("A"), NodeStatus::Error);
    assert_eq!(h.status("B"), NodeStatus::Futile);
    assert_eq!(h.status("C"), NodeStatus::Futile);
    assert_eq!(h.status("D"), NodeStatus::Futile);
    assert_eq!(h.dag.nodes_failed, 1);
    assert_eq!(h.dag.nodes_futile, 3);

    // The unrelated root is untouched and still finishes.
    assert_eq!(h.status("X"), NodeStatus::Submitted);
    h.terminate("X", 0);
    h.drain();
    assert_eq!(h.status("X"), NodeStatus::Done);

    assert!(h.dag.all_nodes_resolved());
    assert!(!h.dag.succeeded());
}

#[test]
fn futile_nodes_never_reach_the_queue() {
    init_tracing();
    let mut h = Harness::new(
        r#"
        [node.A]
        submit = "a.sub"
        [node.B]
        submit = "b.sub"
        parents = ["A"]
    "#,
    );
    h.bootstrap();
    h.submit();
    h.deliver_submits();
    h.drain();
    h.terminate("A", 1);
    h.drain();

    assert_eq!(h.submit(), 0);
    assert_eq!(h.queue.submissions.len(), 1);
}
