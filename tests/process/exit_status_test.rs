/*!
 * Child exit status tests
 */

use crate::support;
use serial_test::serial;
use vic_runtime::{BackingKind, VicError};

#[test]
#[serial]
fn test_child_panic_surfaces_as_exit_code() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Process).unwrap();
    let flow = rt
        .bind_flow(&vic, |_| panic!("child routine failure"), None)
        .unwrap();

    rt.start(&flow).unwrap();
    let err = rt.wait(&flow).unwrap_err();
    assert!(matches!(err, VicError::ChildFailed { code: 101, .. }));

    // The child was reaped; a second wait has nothing left to do
    rt.wait(&flow).unwrap();

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}

#[test]
#[serial]
fn test_child_success_and_parent_registry() {
    let (rt, _dir) = support::runtime();
    let vic = rt.create(BackingKind::Process).unwrap();
    let flow = rt.bind_flow(&vic, |_| {}, None).unwrap();

    rt.start(&flow).unwrap();
    rt.wait(&flow).unwrap();
    // The routine ran in the child; the parent's view never saw it execute
    assert!(!rt.registry_entry(&vic).unwrap().executing);
    assert!(matches!(rt.start(&flow).unwrap_err(), VicError::AlreadyStarted(_)));

    rt.unbind_flow(flow);
    rt.destroy(vic).unwrap();
}
