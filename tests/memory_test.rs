/*!
 * Handle Heap Tests
 */

#[path = "support/mod.rs"]
mod support;

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use vic_runtime::{BackingKind, MemoryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Token {
    kind: String,
    line: u32,
}

#[test]
fn test_array_reads_and_writes() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let flow = rt.bind_flow(&vic, |_| {}, None).unwrap();
    let heap = rt.heap();

    let handle = heap.allocate_array(&flow, 4, 2).unwrap();
    assert_eq!(heap.len_of(handle), Some(4));
    assert_eq!(heap.read_range(&flow, handle, 0, 4).unwrap(), vec![0u8; 8]);

    heap.write_at(&flow, handle, 1, &[1, 2]).unwrap();
    heap.write_range(&flow, handle, 2, 4, &[3, 4, 5, 6]).unwrap();
    assert_eq!(heap.read_at(&flow, handle, 1).unwrap(), vec![1, 2]);
    assert_eq!(
        heap.read_range(&flow, handle, 1, 4).unwrap(),
        vec![1, 2, 3, 4, 5, 6]
    );

    heap.write(&flow, handle, &[9, 9]).unwrap();
    assert_eq!(heap.read(&flow, handle).unwrap(), vec![9, 9]);
    assert_eq!(heap.stats().blocks, 1);
    assert_eq!(heap.stats().bytes, 8);

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
fn test_bounds_and_sizes_checked() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let flow = rt.bind_flow(&vic, |_| {}, None).unwrap();
    let heap = rt.heap();

    let handle = heap.allocate_array(&flow, 2, 4).unwrap();
    assert_eq!(
        heap.read_at(&flow, handle, 2).unwrap_err(),
        MemoryError::OutOfBounds { index: 2, len: 2 }
    );
    assert_eq!(
        heap.write_at(&flow, handle, 0, &[1, 2]).unwrap_err(),
        MemoryError::SizeMismatch {
            expected: 4,
            actual: 2
        }
    );
    assert!(matches!(
        heap.read_range(&flow, handle, 1, 3).unwrap_err(),
        MemoryError::InvalidRange { .. }
    ));
    assert_eq!(
        heap.allocate_array(&flow, 0, 4).unwrap_err(),
        MemoryError::ZeroSize
    );

    assert_eq!(
        heap.read_at(&flow, handle, usize::MAX).unwrap_err(),
        MemoryError::OutOfBounds {
            index: usize::MAX,
            len: 2
        }
    );
    assert!(matches!(
        heap.write_at(&flow, handle, usize::MAX, &[0; 4]).unwrap_err(),
        MemoryError::OutOfBounds { .. }
    ));
    assert!(matches!(
        heap.allocate_array(&flow, usize::MAX / 2, 4).unwrap_err(),
        MemoryError::TooLarge { elem_size: 4, .. }
    ));
    let before = heap.stats().blocks;
    assert!(heap.allocate_array(&flow, usize::MAX, usize::MAX).is_err());
    assert_eq!(heap.stats().blocks, before);

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
fn test_deallocate_invalidates_handle() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let flow = rt.bind_flow(&vic, |_| {}, None).unwrap();
    let heap = rt.heap();

    let first = heap.allocate(&flow, 8).unwrap();
    let second = heap.allocate(&flow, 8).unwrap();
    assert_ne!(first, second);
    assert_eq!(first.tid, second.tid);

    assert!(heap.deallocate(&flow, first));
    assert!(!heap.deallocate(&flow, first));
    assert!(!heap.contains(first));
    assert_eq!(
        heap.read(&flow, first).unwrap_err(),
        MemoryError::InvalidHandle(first)
    );
    assert!(heap.contains(second));

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
fn test_typed_values() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let flow = rt.bind_flow(&vic, |_| {}, None).unwrap();
    let heap = rt.heap();

    let token = Token {
        kind: "ident".into(),
        line: 3,
    };
    let handle = heap.store(&flow, &token).unwrap();
    assert_eq!(heap.load::<Token>(&flow, handle).unwrap(), token);

    let longer = Token {
        kind: "string_literal".into(),
        line: 12,
    };
    heap.replace(&flow, handle, &longer).unwrap();
    assert_eq!(heap.load::<Token>(&flow, handle).unwrap(), longer);

    let array = heap.allocate_array(&flow, 3, 4).unwrap();
    assert!(matches!(
        heap.replace(&flow, array, &1u32).unwrap_err(),
        MemoryError::SizeMismatch { .. }
    ));

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
fn test_heap_shared_with_running_routine() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Thread).unwrap();
    let (handle_tx, handle_rx) = flume::bounded(1);

    let flow = rt
        .bind_flow(
            &vic,
            move |flow| {
                let heap = flow.runtime().heap();
                let handle = heap.store(flow, &42u64).unwrap();
                handle_tx.send(handle).unwrap();
            },
            None,
        )
        .unwrap();
    rt.start(&flow).unwrap();
    rt.wait(&flow).unwrap();

    let handle = handle_rx.recv().unwrap();
    assert_eq!(rt.heap().load::<u64>(&flow, handle).unwrap(), 42);
    assert_eq!(handle.tid, rt.registry_entry(&vic).unwrap().tid);

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}
