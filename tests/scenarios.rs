//! Admission scenarios with jobs held in flight by gates.

mod common;

use common::{gated_host, message, open_message};
use std::sync::Arc;
use vardispatch::{AccessSet, LockingDiscipline, Scheduler, SchedulerConfig, VarTable};

fn config(discipline: LockingDiscipline, workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        discipline,
        workers,
        thread_name_prefix: "scenario".into(),
        ..SchedulerConfig::default()
    }
}

#[test]
fn rw_disjoint_messages_run_together_and_conflict_waits() {
    let (host, observer) = gated_host();
    let mut scheduler = Scheduler::new(
        Arc::new(host),
        Vec::new(),
        VarTable::flat(4),
        config(LockingDiscipline::RWLocking, 2),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (a, gate_a) = message(4, "A", &[0], &[]);
    let (b, gate_b) = message(4, "B", &[], &[1]);
    scheduler.schedule(a).unwrap();
    scheduler.schedule(b).unwrap();
    let mut started = vec![observer.expect_started(), observer.expect_started()];
    started.sort();
    assert_eq!(started, vec!["A", "B"]);

    // Free B's worker so C is blocked by A's read, not by capacity.
    gate_b.open();
    let (c, gate_c) = message(4, "C", &[], &[0]);
    scheduler.schedule(c).unwrap();
    observer.assert_nothing_starts();

    gate_a.open();
    assert_eq!(observer.expect_started(), "C");
    gate_c.open();

    let stats = scheduler.submitter();
    let merged = scheduler.stop(true).unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged.last(), Some(&"C"));
    assert!(stats.stats().conflict_requeues > 0);
}

#[test]
fn rw_readers_exclude_each_other() {
    let (host, observer) = gated_host();
    let mut scheduler = Scheduler::new(
        Arc::new(host),
        Vec::new(),
        VarTable::flat(4),
        config(LockingDiscipline::RWLocking, 2),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (first, gate_first) = message(4, "first", &[2], &[]);
    let (second, gate_second) = message(4, "second", &[2], &[]);
    scheduler.schedule(first).unwrap();
    assert_eq!(observer.expect_started(), "first");
    scheduler.schedule(second).unwrap();
    observer.assert_nothing_starts();

    gate_first.open();
    assert_eq!(observer.expect_started(), "second");
    gate_second.open();
    scheduler.stop(true).unwrap();
}

#[test]
fn w_readers_share_and_writer_waits_for_all_readers() {
    let (host, observer) = gated_host();
    let mut scheduler = Scheduler::new(
        Arc::new(host),
        Vec::new(),
        VarTable::flat(4),
        config(LockingDiscipline::WLocking, 3),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (d1, gate_d1) = message(4, "D1", &[0], &[]);
    let (d2, gate_d2) = message(4, "D2", &[0], &[]);
    scheduler.schedule(d1).unwrap();
    scheduler.schedule(d2).unwrap();
    let mut started = vec![observer.expect_started(), observer.expect_started()];
    started.sort();
    assert_eq!(started, vec!["D1", "D2"]);

    let (e, gate_e) = message(4, "E", &[], &[0]);
    scheduler.schedule(e).unwrap();
    observer.assert_nothing_starts();

    gate_d1.open();
    observer.assert_nothing_starts();
    gate_d2.open();
    assert_eq!(observer.expect_started(), "E");
    gate_e.open();

    let merged = scheduler.stop(true).unwrap();
    assert_eq!(merged.last(), Some(&"E"));
}

#[test]
fn w_reader_waits_for_reserved_writer() {
    let (host, observer) = gated_host();
    let mut scheduler = Scheduler::new(
        Arc::new(host),
        Vec::new(),
        VarTable::flat(2),
        config(LockingDiscipline::WLocking, 2),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (writer, gate_writer) = message(2, "writer", &[], &[1]);
    scheduler.schedule(writer).unwrap();
    assert_eq!(observer.expect_started(), "writer");

    scheduler.schedule(open_message(2, "reader", &[1], &[])).unwrap();
    observer.assert_nothing_starts();
    gate_writer.open();
    assert_eq!(observer.expect_started(), "reader");
    assert_eq!(scheduler.stop(true).unwrap(), vec!["writer", "reader"]);
}

#[test]
fn empty_access_set_is_admitted_next_to_anything() {
    for discipline in LockingDiscipline::ALL {
        let (host, observer) = gated_host();
        let mut scheduler = Scheduler::new(
            Arc::new(host),
            Vec::new(),
            VarTable::flat(2),
            config(discipline, 2),
        )
        .unwrap();
        scheduler.start().unwrap();

        let (hog, gate_hog) = message(2, "hog", &[0, 1], &[0, 1]);
        scheduler.schedule(hog).unwrap();
        assert_eq!(observer.expect_started(), "hog");
        scheduler.schedule(open_message(2, "noop", &[], &[])).unwrap();
        assert_eq!(observer.expect_started(), "noop");
        gate_hog.open();
        scheduler.stop(true).unwrap();
    }
}

#[test]
fn independent_message_overtakes_blocked_ones() {
    let (host, observer) = gated_host();
    let mut scheduler = Scheduler::new(
        Arc::new(host),
        Vec::new(),
        VarTable::flat(2),
        config(LockingDiscipline::RWLocking, 2),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (holder, gate_holder) = message(2, "holder", &[], &[0]);
    scheduler.schedule(holder).unwrap();
    assert_eq!(observer.expect_started(), "holder");

    let blocked: Vec<_> = (0..5)
        .map(|_| open_message(2, "blocked", &[0], &[]))
        .collect();
    for message in blocked {
        scheduler.schedule(message).unwrap();
    }
    scheduler.schedule(open_message(2, "free", &[1], &[])).unwrap();
    assert_eq!(observer.expect_started(), "free");

    gate_holder.open();
    for _ in 0..5 {
        assert_eq!(observer.expect_started(), "blocked");
    }
    assert_eq!(scheduler.stop(true).unwrap().len(), 7);
}

#[test]
fn hierarchy_blocks_parent_and_child_but_not_siblings() {
    let vars = VarTable::new(["player", "player.pos", "player.hp", "world"]).unwrap();
    let pos = vars.access_set(&[], &["player.pos"]).unwrap();
    let hp = vars.access_set(&[], &["player.hp"]).unwrap();
    // Raw declaration on the parent index; the scheduler expands it.
    let player_raw = AccessSet::from_indices(4, &[0], &[]).unwrap();

    let (host, observer) = gated_host();
    let mut scheduler = Scheduler::new(
        Arc::new(host),
        Vec::new(),
        vars,
        config(LockingDiscipline::RWLocking, 3),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (mut moving, gate_moving) = message(4, "move", &[], &[]);
    moving.access = pos;
    scheduler.schedule(moving).unwrap();
    assert_eq!(observer.expect_started(), "move");

    let mut heal = open_message(4, "heal", &[], &[]);
    heal.access = hp;
    scheduler.schedule(heal).unwrap();
    assert_eq!(observer.expect_started(), "heal");

    let mut inspect = open_message(4, "inspect", &[], &[]);
    inspect.access = player_raw;
    scheduler.schedule(inspect).unwrap();
    observer.assert_nothing_starts();

    gate_moving.open();
    assert_eq!(observer.expect_started(), "inspect");
    scheduler.stop(true).unwrap();
}
