/*!
 * Cross-process link tests
 */

use crate::support;
use pretty_assertions::assert_eq;
use serial_test::serial;
use vic_runtime::{platform, BackingHandle, BackingKind, ChannelKind};

#[test]
#[serial]
fn test_process_a_thread_b_over_y() {
    let (rt, dir) = support::runtime();
    let a = rt.create(BackingKind::Process).unwrap();
    let b = rt.create(BackingKind::Thread).unwrap();
    rt.link(&a, &b, "y").unwrap();
    assert_eq!(b.links()[0].kind, ChannelKind::LocalIpc);

    let (seen_tx, seen_rx) = flume::unbounded::<String>();
    let fa = rt
        .bind_flow(
            &a,
            |flow| {
                flow.send_str("y", &platform::current_pid().to_string()).unwrap();
                assert_eq!(flow.recv_string("y").unwrap(), "ack");
            },
            None,
        )
        .unwrap();
    let fb = rt
        .bind_flow(
            &b,
            move |flow| {
                seen_tx.send(flow.recv_string("y").unwrap()).unwrap();
                flow.send_str("y", "ack").unwrap();
            },
            None,
        )
        .unwrap();

    rt.start(&fb).unwrap();
    rt.start(&fa).unwrap();
    let child_pid = match a.handle() {
        BackingHandle::Process(Some(pid)) => pid,
        other => panic!("unexpected handle {:?}", other),
    };

    rt.wait(&fa).unwrap();
    rt.wait(&fb).unwrap();
    let reported: i32 = seen_rx.try_recv().unwrap().parse().unwrap();
    assert_ne!(reported, platform::current_pid());
    assert_eq!(reported, child_pid);

    rt.unbind_flow(fa);
    rt.unbind_flow(fb);
    rt.destroy(a).unwrap();
    rt.destroy(b).unwrap();
    // The bind side owned the socket file
    assert!(!dir.path().join("y").exists());
}

#[test]
#[serial]
fn test_two_process_contexts_exchange() {
    let (rt, _dir) = support::runtime();
    let a = rt.create(BackingKind::Process).unwrap();
    let b = rt.create(BackingKind::Process).unwrap();
    rt.link(&a, &b, "pp").unwrap();

    let fa = rt
        .bind_flow(
            &a,
            |flow| {
                for i in 0..3u8 {
                    flow.send("pp", &[i]).unwrap();
                }
                assert_eq!(flow.recv_string("pp").unwrap(), "3");
            },
            None,
        )
        .unwrap();
    let fb = rt
        .bind_flow(
            &b,
            |flow| {
                let mut total = 0u32;
                for _ in 0..3 {
                    total += flow.recv("pp").unwrap()[0] as u32;
                }
                flow.send_str("pp", &total.to_string()).unwrap();
            },
            None,
        )
        .unwrap();

    rt.start(&fb).unwrap();
    rt.start(&fa).unwrap();
    rt.wait(&fa).unwrap();
    rt.wait(&fb).unwrap();

    rt.unbind_flow(fa);
    rt.unbind_flow(fb);
    rt.destroy(a).unwrap();
    rt.destroy(b).unwrap();
}
