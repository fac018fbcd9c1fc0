use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;

use mock::{MockCatalog, MockHtc};
use transport::{HtcTag, TransportError};
use wmi::{LogClass, WmiConfig, WmiError, WmiSoc};

use crate::support::Fixture;

#[test]
fn send_then_complete_leaves_pending_unchanged() {
    let fx = Fixture::new();
    let handle = fx.handle(0);

    handle.send_command(0x42, &[1, 2, 3, 4]).expect("send");
    assert_eq!(handle.pending_cmds(), 1);
    assert_eq!(fx.htc.sent_ids(), vec![0x42]);
    assert_eq!(fx.htc.sent()[0].payload, vec![1, 2, 3, 4]);
    assert_eq!(fx.htc.sent()[0].endpoint, handle.endpoint());

    assert_eq!(fx.htc.complete_all(), 1);
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.buf_stats().outstanding, 0);

    let stats = handle.stats();
    assert_eq!(stats.cmds_sent, 1);
    assert_eq!(stats.cmds_completed, 1);
    assert_eq!(handle.log().len(LogClass::Command), 1);
    assert_eq!(handle.log().len(LogClass::CommandTxComplete), 1);
}

#[test]
fn command_log_captures_payload_after_header() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    handle.send_command(0x42, &[1, 2, 3, 4]).expect("send");

    let records = handle.log().read(LogClass::Command, 10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 0x42);
    let mut expected = vec![0u8; 16];
    expected[..4].copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(records[0].data, expected);
}

#[test]
fn suspended_send_is_refused_and_buffer_freed() {
    let fx = Fixture::with_config(WmiConfig::default().with_resume_cmds([0x99]), 1);
    let handle = fx.handle(0);
    handle.set_suspended(true);

    let buf = handle.alloc(8).expect("alloc");
    assert_eq!(handle.buf_stats().outstanding, 1);
    assert!(matches!(
        handle.send(buf, 8, 0x42),
        Err(WmiError::Busy { id: 0x42 })
    ));
    assert_eq!(handle.buf_stats().outstanding, 0);
    assert!(fx.htc.sent().is_empty());
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.log().len(LogClass::Command), 0);

    handle.send_command(0x99, &[0; 4]).expect("resume command");
    assert_eq!(fx.htc.sent_ids(), vec![0x99]);
}

#[test]
fn runtime_pm_bypasses_suspend_and_tags_packets() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.catalog.set_tx_tag(HtcTag(7));

    handle.set_suspended(true);
    handle.set_runtime_pm_in_progress(true);
    handle.send_command(0x42, &[]).expect("send during runtime pm");

    handle.set_runtime_pm_in_progress(false);
    handle.set_suspended(false);
    handle.send_command(0x43, &[]).expect("send after resume");

    let sent = fx.htc.sent();
    assert_eq!(sent[0].tag, HtcTag(7));
    assert_eq!(sent[1].tag, HtcTag::NONE);
}

#[test]
fn largest_payload_fits_and_one_more_byte_does_not() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    let max = handle.max_payload_len();

    handle.send_command(0x42, &vec![0xAB; max]).expect("max payload");
    let err = handle
        .send_command(0x42, &vec![0xAB; max + 1])
        .expect_err("oversized payload");
    assert!(matches!(err, WmiError::NoResource { .. }));
    assert_eq!(fx.htc.sent().len(), 1);
    assert_eq!(fx.htc.sent()[0].payload.len(), max);
    assert_eq!(handle.pending_cmds(), 1);
}

#[test]
fn unaligned_transport_limit_still_fits_advertised_payload() {
    let htc = MockHtc::with_max_msg_len(511);
    let soc = WmiSoc::builder(htc.clone(), MockCatalog::new())
        .attach()
        .expect("attach");
    let handle = soc.handle(0).expect("handle");
    assert_eq!(handle.max_msg_len(), 511);
    let max = handle.max_payload_len();

    handle
        .send_command(0x42, &vec![0; max])
        .expect("advertised payload fits");
    assert!(matches!(
        handle.send_command(0x42, &vec![0; max + 1]),
        Err(WmiError::NoResource { .. })
    ));
    assert_eq!(htc.sent()[0].payload.len(), max);
}

#[test]
fn rejected_parameters_never_reach_transport() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.catalog.reject_command(0x42);

    let err = handle.send_command(0x42, &[1]).expect_err("rejected");
    assert!(matches!(err, WmiError::InvalidParams { id: 0x42, .. }));
    assert!(fx.htc.sent().is_empty());
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.buf_stats().outstanding, 0);
    assert_eq!(handle.log().len(LogClass::Command), 0);
}

#[test]
fn transport_refusal_restores_pending_count() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.htc.fail_sends(true);

    let err = handle.send_command(0x42, &[1, 2]).expect_err("queue full");
    assert!(matches!(
        err,
        WmiError::Transport(TransportError::QueueFull { .. })
    ));
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.buf_stats().outstanding, 0);
    assert_eq!(handle.stats().send_failures, 1);
    assert_eq!(handle.log().len(LogClass::Command), 1);

    fx.htc.fail_sends(false);
    handle.send_command(0x42, &[1, 2]).expect("send");
    assert_eq!(handle.pending_cmds(), 1);
}

#[test]
fn management_traffic_uses_management_rings() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.catalog.mark_management(0x77);

    handle.send_command(0x77, &[5]).expect("send");
    fx.htc.complete_all();
    handle.record_mgmt_command(0x78, &[0; 8]);

    let log = handle.log();
    assert_eq!(log.len(LogClass::MgmtCommand), 2);
    assert_eq!(log.len(LogClass::MgmtCommandTxComplete), 1);
    assert_eq!(log.len(LogClass::Command), 0);
    assert_eq!(log.len(LogClass::CommandTxComplete), 0);
}

#[test]
fn disabled_log_records_nothing() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    handle.log().set_enabled(false);
    handle.send_command(0x42, &[]).expect("send");
    fx.htc.complete_all();
    assert!(wmi::LogClass::ALL
        .iter()
        .all(|class| handle.log().len(*class) == 0));
}

#[test]
fn stopped_handle_refuses_until_refetched() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    handle.stop();
    assert!(handle.is_stopping());
    assert!(matches!(
        handle.send_command(0x42, &[]),
        Err(WmiError::InvalidState)
    ));

    let again = fx.handle(0);
    assert!(!handle.is_stopping());
    assert_eq!(again.endpoint(), handle.endpoint());
    handle.send_command(0x42, &[]).expect("send after rebind");
}

#[test]
fn flush_and_credits_reach_transport() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.htc.set_credits(3);
    assert_eq!(handle.host_credits(), 3);
    handle.flush_endpoint();
    assert_eq!(fx.htc.flush_count(), 1);
}

#[test]
#[should_panic(expected = "pending command ceiling")]
fn pending_ceiling_is_fatal() {
    let config = WmiConfig {
        max_pending_cmds: 2,
        ..WmiConfig::default()
    };
    let fx = Fixture::with_config(config, 1);
    let handle = fx.handle(0);
    handle.send_command(0x42, &[]).expect("first");
    handle.send_command(0x42, &[]).expect("second");
    let _ = handle.send_command(0x42, &[]);
}

#[test]
fn refused_send_returns_its_pending_slot() {
    let config = WmiConfig {
        max_pending_cmds: 1,
        ..WmiConfig::default()
    };
    let fx = Fixture::with_config(config, 1);
    let handle = fx.handle(0);
    fx.catalog.reject_command(0x13);

    assert!(handle.send_command(0x13, &[]).is_err());
    fx.htc.fail_sends(true);
    assert!(handle.send_command(0x42, &[]).is_err());
    fx.htc.fail_sends(false);
    assert_eq!(handle.pending_cmds(), 0);

    handle.send_command(0x42, &[]).expect("slot is free again");
    assert_eq!(handle.pending_cmds(), 1);
}

#[test]
fn racing_senders_never_exceed_ceiling() {
    const MAX: u32 = 4;
    const SENDERS: usize = 16;
    let config = WmiConfig {
        max_pending_cmds: MAX,
        ..WmiConfig::default()
    };
    let fx = Fixture::with_config(config, 1);
    let handle = fx.handle(0);
    let start = Arc::new(Barrier::new(SENDERS));

    let senders: Vec<_> = (0..SENDERS)
        .map(|_| {
            let handle = handle.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                panic::catch_unwind(AssertUnwindSafe(|| handle.send_command(0x42, &[])))
            })
        })
        .collect();
    let mut accepted = 0;
    let mut refused = 0;
    for sender in senders {
        match sender.join().expect("sender thread") {
            Ok(Ok(())) => accepted += 1,
            Ok(Err(err)) => panic!("unexpected send error: {err}"),
            Err(_) => refused += 1,
        }
    }

    assert_eq!(accepted, MAX as usize);
    assert_eq!(refused, SENDERS - MAX as usize);
    assert_eq!(handle.pending_cmds(), MAX);
    assert_eq!(fx.htc.sent().len(), MAX as usize);
}
