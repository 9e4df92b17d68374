/*!
 * Lifecycle Tests
 * create, bind, start, wait, unbind and destroy
 */

#[path = "support/mod.rs"]
mod support;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vic_runtime::{BackingHandle, BackingKind, Vic, VicError};

#[test]
fn test_create_with_flags_prefers_thread() {
    let (rt, _dir) = support::runtime();
    assert_eq!(rt.create_with_flags(0x01).kind(), BackingKind::Thread);
    assert_eq!(rt.create_with_flags(0x02).kind(), BackingKind::Process);
    assert_eq!(rt.create_with_flags(0x03).kind(), BackingKind::Thread);
    assert_eq!(rt.live_contexts(), 3);
}

#[test]
fn test_bind_rules() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    assert!(!vic.is_bound());

    let flow = rt.bind_flow(&vic, |_| {}, None).unwrap();
    assert!(vic.is_bound());
    assert!(matches!(
        rt.bind_flow(&vic, |_| {}, None).unwrap_err(),
        VicError::AlreadyBound(id) if id == vic.id()
    ));

    assert!(matches!(
        rt.destroy(vic.clone()).unwrap_err(),
        VicError::FlowAttached(_)
    ));

    rt.unbind_flow(flow);
    assert!(!vic.is_bound());
    rt.destroy(vic.clone()).unwrap();
    // Second destroy of the same context is a no-op
    rt.destroy(vic).unwrap();
    assert_eq!(rt.live_contexts(), 0);
}

#[test]
fn test_unbind_runs_finished_callback() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let seen = Arc::new(AtomicU64::new(0));
    let recorder = seen.clone();

    let flow = rt
        .bind_flow(
            &vic,
            |_| {},
            Some(Box::new(move |vic: &Vic| {
                recorder.store(vic.id(), Ordering::SeqCst);
            })),
        )
        .unwrap();
    rt.start(&flow).unwrap();
    rt.wait(&flow).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    rt.unbind_flow(flow);
    assert_eq!(seen.load(Ordering::SeqCst), vic.id());
    rt.destroy(vic).unwrap();
}

#[test]
fn test_registry_tracks_executing_routine() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let (go_tx, go_rx) = flume::bounded::<()>(0);

    let flow = rt
        .bind_flow(
            &vic,
            move |_| {
                let _ = go_rx.recv();
            },
            None,
        )
        .unwrap();

    let idle = rt.registry_entry(&vic).unwrap();
    assert!(!idle.executing);

    rt.start(&flow).unwrap();
    assert!(support::eventually(Duration::from_secs(5), || {
        rt.registry_entry(&vic).map_or(false, |e| e.executing)
    }));
    let running = rt.registry_entry(&vic).unwrap();
    assert!(running.tid > 0);
    assert!(running.thread.is_some());
    assert!(matches!(vic.handle(), BackingHandle::Thread(Some(_))));
    assert!(matches!(
        rt.start(&flow).unwrap_err(),
        VicError::AlreadyStarted(_)
    ));

    go_tx.send(()).unwrap();
    rt.wait(&flow).unwrap();
    assert!(!rt.registry_entry(&vic).unwrap().executing);

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
fn test_wait_reports_routine_panic() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let flow = rt
        .bind_flow(&vic, |_| panic!("routine failure"), None)
        .unwrap();

    rt.start(&flow).unwrap();
    let err = rt.wait(&flow).unwrap_err();
    assert!(matches!(err, VicError::RoutinePanicked(id) if id == vic.id()));
    assert!(!rt.registry_entry(&vic).unwrap().executing);

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
fn test_engine_follows_live_contexts() {
    let (rt, _dir) = support::runtime();
    assert!(!rt.engine_running());

    let vic = rt.create(BackingKind::Thread).unwrap();
    assert!(rt.engine_running());
    assert!(rt.control_address().exists());

    rt.destroy(vic).unwrap();
    assert!(!rt.engine_running());
    assert!(!rt.control_address().exists());

    let again = rt.create(BackingKind::Process).unwrap();
    assert!(rt.engine_running());
    rt.destroy(again).unwrap();
}

#[test]
fn test_flow_lock_hook_excludes_senders() {
    let (rt, _dir) = support::runtime();
    let a = rt.create(BackingKind::Thread).unwrap();
    let b = rt.create(BackingKind::Thread).unwrap();
    rt.link(&a, &b, "held").unwrap();
    let fa = rt.bind_flow(&a, |_| {}, None).unwrap();
    let fb = rt.bind_flow(&b, |_| {}, None).unwrap();

    let guard = fa.lock();
    let sender = {
        let fa = fa.clone();
        std::thread::spawn(move || fa.send_str("held", "late").unwrap())
    };
    std::thread::sleep(Duration::from_millis(100));
    assert!(!sender.is_finished());
    drop(guard);

    sender.join().unwrap();
    assert_eq!(fb.recv_string("held").unwrap(), "late");

    rt.unbind_flow(fa);
    rt.unbind_flow(fb);
    rt.destroy(a).unwrap();
    rt.destroy(b).unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    Create(bool),
    Destroy(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Create),
        (0usize..8).prop_map(Op::Destroy),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_destroy_is_idempotent(ops in proptest::collection::vec(op(), 1..24)) {
        let (rt, _dir) = support::runtime();
        let mut created: Vec<Vic> = Vec::new();
        let mut destroyed = std::collections::BTreeSet::new();

        for op in ops {
            match op {
                Op::Create(thread) => {
                    let kind = if thread { BackingKind::Thread } else { BackingKind::Process };
                    created.push(rt.create(kind).unwrap());
                }
                Op::Destroy(i) if !created.is_empty() => {
                    let vic = created[i % created.len()].clone();
                    destroyed.insert(vic.id());
                    prop_assert!(rt.destroy(vic).is_ok());
                }
                Op::Destroy(_) => {}
            }
            prop_assert_eq!(rt.live_contexts(), created.len() - destroyed.len());
            prop_assert_eq!(rt.engine_running(), rt.live_contexts() > 0);
        }

        for vic in created {
            prop_assert!(rt.destroy(vic).is_ok());
        }
        prop_assert_eq!(rt.live_contexts(), 0);
        prop_assert!(!rt.engine_running());
    }
}
