//! Clock synchronization integration tests.
//!
//! Master/slave sequencing and bounded sync waits on simulated MCC 172
//! boards, plus external-clock loss on an MCC 118.

mod common;

use common::{board, stack, wait_until};
use daqhat::{ReadRequest, SyncCoordinator, Wait};
use daqhat_common::prelude::*;
use std::time::Duration;

const LONG: Duration = Duration::from_secs(10);

fn tuning() -> ScanTuning {
    ScanTuning {
        sync_timeout_ms: 300,
        sync_poll_us: 500,
        trigger_poll_us: 500,
    }
}

#[test]
fn test_group_scans_at_the_shared_rate() {
    let (_dir, system) = stack(vec![
        board(0, BoardModel::Mcc172, Vec::new()),
        board(1, BoardModel::Mcc172, Vec::new()),
    ]);
    let master = system.registry.open(0).unwrap();
    let slave = system.registry.open(1).unwrap();

    let sync = SyncCoordinator::new(tuning());
    let rate = sync.configure_group(&master, &[&*slave], 10_000.0).unwrap();
    assert_eq!(rate, 51_200.0 / 5.0);

    // The requested scan rate is ignored on a shared clock.
    assert_eq!(
        slave.start_scan(0b01, 100, 999.0, ScanOptions::empty()).unwrap(),
        rate
    );
    assert_eq!(
        master.start_scan(0b11, 100, 999.0, ScanOptions::empty()).unwrap(),
        rate
    );

    for hat in [&master, &slave] {
        let read = hat.read(ReadRequest::Rows(100), Wait::For(LONG)).unwrap();
        assert_eq!(read.rows, 100, "board {}", hat.address());
        assert!(read.fault.is_none());
        hat.stop().unwrap();
        hat.cleanup().unwrap();
    }
}

#[test]
fn test_slave_without_master_reports_sync_timeout() {
    let (_dir, system) = stack(vec![board(2, BoardModel::Mcc172, Vec::new())]);
    let slave = system.registry.open(2).unwrap();
    slave.configure_clock(SourceRole::Slave, 10_240.0).unwrap();

    slave.start_scan(0b1, 10, 10_240.0, ScanOptions::empty()).unwrap();
    assert!(wait_until(LONG, || !slave.status().unwrap().status.running()));

    let report = slave.status().unwrap();
    assert_eq!(report.rows_acquired, 0);
    let fault = report.fault.expect("sync fault");
    assert!(matches!(fault, DaqError::SyncTimeout { address: 2, .. }));
    assert_eq!(fault.code(), -8);

    slave.cleanup().unwrap();
}

#[test]
fn test_stop_during_sync_wait_is_not_a_fault() {
    let (_dir, system) = stack(vec![board(0, BoardModel::Mcc172, Vec::new())]);
    let slave = system.registry.open(0).unwrap();
    slave.configure_clock(SourceRole::Slave, 51_200.0).unwrap();

    slave.start_scan(0b1, 10, 51_200.0, ScanOptions::empty()).unwrap();
    slave.stop().unwrap();

    let report = slave.status().unwrap();
    assert!(!report.status.running());
    assert!(report.fault.is_none());
    slave.cleanup().unwrap();
}

#[test]
fn test_external_clock_loss_times_out() {
    let (_dir, system) = stack(vec![board(0, BoardModel::Mcc118, Vec::new())]);
    let hat = system.registry.open(0).unwrap();

    system.backplane.set_external_clock(false);
    hat.start_scan(0b1, 10, 1000.0, ScanOptions::EXT_CLOCK).unwrap();
    assert!(wait_until(LONG, || !hat.status().unwrap().status.running()));
    assert!(matches!(
        hat.status().unwrap().fault,
        Some(DaqError::SyncTimeout { address: 0, .. })
    ));
    hat.cleanup().unwrap();

    system.backplane.set_external_clock(true);
    hat.start_scan(0b1, 10, 1000.0, ScanOptions::EXT_CLOCK).unwrap();
    let read = hat.read(ReadRequest::Rows(10), Wait::For(LONG)).unwrap();
    assert_eq!(read.rows, 10);
    assert!(read.fault.is_none());
    hat.stop().unwrap();
    hat.cleanup().unwrap();
}

#[test]
fn test_reconfigured_slave_loses_lock() {
    let (_dir, system) = stack(vec![
        board(0, BoardModel::Mcc172, Vec::new()),
        board(1, BoardModel::Mcc172, Vec::new()),
    ]);
    let master = system.registry.open(0).unwrap();
    let slave = system.registry.open(1).unwrap();
    let sync = SyncCoordinator::new(tuning());

    sync.configure_group(&master, &[&*slave], 51_200.0).unwrap();
    assert!(sync.read_sync_status(&slave).unwrap());

    // Touching a slave after the master desynchronizes it.
    sync.configure_clock(&slave, SourceRole::Slave, 51_200.0)
        .unwrap();
    assert!(!sync.read_sync_status(&slave).unwrap());

    // Re-running the master restores the group.
    sync.configure_clock(&master, SourceRole::Master, 51_200.0)
        .unwrap();
    sync.wait_locked(&slave, Duration::from_secs(1)).unwrap();
}

#[test]
fn test_shared_roles_rejected_without_clock_sync() {
    let (_dir, system) = stack(vec![board(0, BoardModel::Mcc128, Vec::new())]);
    let hat = system.registry.open(0).unwrap();

    assert!(matches!(
        hat.configure_clock(SourceRole::Master, 1000.0),
        Err(DaqError::BadParameter(_))
    ));
    assert_eq!(hat.clock_role(), SourceRole::Local);
    assert!(hat.read_sync_status().unwrap());
}
