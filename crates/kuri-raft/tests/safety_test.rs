//! Raft safety properties under divergence and partitions:
//! election safety, leader append-only, log matching, leader completeness,
//! and state-machine safety (apply-once, in order).

mod common;

use bytes::Bytes;
use common::{commands_equal, Cluster};
use kuri_raft::{LogIndex, Role, Term};

/// Two concurrent candidates cannot both win the same term.
#[test]
fn election_safety_under_split_vote() {
    let mut cluster = Cluster::new(5);

    // Two nodes time out before anyone else hears a thing.
    cluster.tick(0, 300);
    cluster.tick(1, 300);
    assert_eq!(cluster.node(0).role(), Role::Candidate);
    assert_eq!(cluster.node(1).role(), Role::Candidate);

    // Delivery order decides the race; the invariant checker in the harness
    // verifies no term ever has two leaders.
    cluster.deliver_all();
    cluster.run(10, 50);

    assert_eq!(cluster.leaders().len(), 1);
}

/// A divergent uncommitted suffix is truncated in favor of the new leader's
/// log, and the dethroned leader never applies its lost entry.
#[test]
fn log_matching_after_divergence() {
    let mut cluster = Cluster::new(3);
    cluster.elect(0);

    // Leader 0 strands an entry nobody else sees.
    cluster.isolate(0);
    cluster.node_mut(0).propose(Bytes::from_static(b"lost")).unwrap();
    assert_eq!(cluster.node(0).log().last_index(), LogIndex(1));
    assert_eq!(cluster.node(0).commit_index(), LogIndex::ZERO);

    // The healthy majority moves on with a new leader and a new entry.
    cluster.tick(1, 300);
    cluster.deliver_all();
    assert_eq!(cluster.node(1).role(), Role::Leader);
    cluster.node_mut(1).propose(Bytes::from_static(b"kept")).unwrap();
    cluster.deliver_all();
    assert_eq!(cluster.node(1).commit_index(), LogIndex(1));

    // Healing replays the winner's history over the loser's.
    cluster.reconnect(0);
    cluster.run(4, 50);

    assert_eq!(cluster.node(0).role(), Role::Follower);
    for id in 0..3 {
        assert_eq!(cluster.node(id).log().last_index(), LogIndex(1));
        assert_eq!(cluster.node(id).log().term_at(LogIndex(1)), cluster.node(1).current_term());
        assert_eq!(cluster.applied(id), vec![Bytes::from_static(b"kept")]);
    }
}

/// An entry committed in term T survives into every later term's leader.
#[test]
fn leader_completeness_across_elections() {
    let mut cluster = Cluster::new(3);
    cluster.elect(0);
    cluster.node_mut(0).propose(Bytes::from_static(b"durable")).unwrap();
    cluster.run(2, 50);
    assert_eq!(cluster.node(0).commit_index(), LogIndex(1));

    // Force a change of leadership.
    cluster.isolate(0);
    cluster.tick(1, 300);
    cluster.deliver_all();
    assert_eq!(cluster.node(1).role(), Role::Leader);

    // The committed entry is in the new leader's log with its original term.
    assert_eq!(cluster.node(1).log().term_at(LogIndex(1)), Term(1));
    assert_eq!(
        cluster.node(1).log().get(LogIndex(1)).unwrap().payload,
        Bytes::from_static(b"durable")
    );

    // And stays committed as the cluster keeps going.
    cluster.node_mut(1).propose(Bytes::from_static(b"later")).unwrap();
    cluster.run(2, 50);
    assert!(cluster.node(1).commit_index() >= LogIndex(2));
    cluster.reconnect(0);
    cluster.run(3, 50);
    assert!(commands_equal(&cluster, &[0, 1, 2]));
}

/// A candidate with a stale log cannot take leadership from a majority that
/// holds committed entries.
#[test]
fn stale_candidate_cannot_win() {
    let mut cluster = Cluster::new(3);
    cluster.elect(0);

    // Commit an entry while node 2 is cut off.
    cluster.isolate(2);
    cluster.node_mut(0).propose(Bytes::from_static(b"cmd")).unwrap();
    cluster.run(2, 50);
    assert_eq!(cluster.node(0).commit_index(), LogIndex(1));

    // The stale node comes back loud, with a higher term but a shorter log.
    cluster.reconnect(2);
    cluster.tick(2, 300);
    cluster.deliver_all();

    // Its candidacy fails: nobody with the committed entry grants it.
    assert_eq!(cluster.node(2).role(), Role::Candidate);
    assert!(cluster.leaders().is_empty()); // old leader stepped down on the higher term

    // A node holding the entry retakes the lead and node 2 is brought up to
    // date instead.
    cluster.tick(0, 300);
    cluster.deliver_all();
    cluster.run(2, 50);
    let leaders = cluster.leaders();
    assert_eq!(leaders, vec![0]);
    assert_eq!(
        cluster.node(2).log().get(LogIndex(1)).unwrap().payload,
        Bytes::from_static(b"cmd")
    );
}

/// Apply order equals index order, exactly once, on every replica.
#[test]
fn state_machine_safety_apply_once_in_order() {
    let mut cluster = Cluster::new(3);
    cluster.elect(0);

    let expected: Vec<Bytes> = (0..10u32)
        .map(|i| Bytes::from(format!("op{i}")))
        .collect();
    for cmd in &expected {
        cluster.node_mut(0).propose(cmd.clone()).unwrap();
        cluster.deliver_all();
    }
    cluster.run(2, 50);

    for id in 0..3 {
        assert_eq!(cluster.applied(id), expected, "node {id} misapplied");
    }
}

/// Replays and duplicate frames do not double-apply.
#[test]
fn duplicate_delivery_is_harmless() {
    let mut cluster = Cluster::new(3);
    cluster.elect(0);
    cluster.node_mut(0).propose(Bytes::from_static(b"once")).unwrap();

    // Copy every frame in flight, deliver, then replay the copies.
    let replay: Vec<_> = cluster.queue.lock().unwrap().iter().cloned().collect();
    cluster.deliver_all();
    cluster.queue.lock().unwrap().extend(replay);
    cluster.deliver_all();
    cluster.run(2, 50);

    for id in 0..3 {
        assert_eq!(cluster.applied(id), vec![Bytes::from_static(b"once")]);
    }
}
