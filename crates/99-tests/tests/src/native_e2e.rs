use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use mock::MockCatalog;
use runtime_native::{LoopbackConfig, LoopbackHtc};
use transport::{EndpointId, Htc, TransportError};
use wmi::{LogClass, RxContext, WmiError, WmiSoc};
use wmi_tlv::ids::{cmd, evt, logical};
use wmi_tlv::{TlvView, WmiTlvCatalog};

use crate::support::wait_until;

fn loopback() -> Arc<LoopbackHtc> {
    let htc = LoopbackHtc::new().expect("loopback");
    htc.set_responder(Box::new(|_: EndpointId, id: u32, payload: &[u8]| {
        vec![(id + 1, payload.to_vec())]
    }));
    htc
}

#[test]
fn command_reply_round_trip() {
    let htc = loopback();
    let soc = WmiSoc::attach(htc.clone(), MockCatalog::new(), 1).expect("attach");
    let handle = soc.handle(0).expect("handle");
    let (tx, rx) = unbounded();
    soc.register_event_handler(0x11, RxContext::Deferred, move |event| {
        let _ = tx.send(event.view.payload.clone());
    })
    .expect("register");

    handle.send_command(0x10, &[1, 2, 3]).expect("send");
    let reply = rx.recv_timeout(Duration::from_secs(5)).expect("reply");
    assert_eq!(reply, vec![1, 2, 3]);

    htc.sync();
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(htc.counts(), (1, 1));
    assert_eq!(handle.log().len(LogClass::CommandTxComplete), 1);
    assert!(wait_until(|| htc.rx_outstanding() == 0));
}

#[test]
fn immediate_handlers_run_on_transport_thread() {
    let htc = loopback();
    let soc = WmiSoc::attach(htc.clone(), MockCatalog::new(), 1).expect("attach");
    let handle = soc.handle(0).expect("handle");
    let (tx, rx) = unbounded();
    soc.register_event_handler(0x30, RxContext::Immediate, move |_| {
        let _ = tx.send(thread::current().id());
    })
    .expect("register");

    htc.inject_event(handle.endpoint(), 0x30, &[]).expect("inject");
    let tid = rx.recv_timeout(Duration::from_secs(5)).expect("event");
    assert_eq!(tid, htc.target_thread());
    assert_ne!(tid, thread::current().id());
}

#[test]
fn many_senders_share_one_handle() {
    let htc = loopback();
    let soc = WmiSoc::attach(htc.clone(), MockCatalog::new(), 1).expect("attach");
    let handle = soc.handle(0).expect("handle");
    let replies = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&replies);
    soc.register_event_handler(0x21, RxContext::Immediate, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("register");

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    handle.send_command(0x20, &[0; 8]).expect("send");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("sender");
    }
    htc.sync();

    assert_eq!(replies.load(Ordering::SeqCst), 100);
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.stats().cmds_completed, 100);
    assert_eq!(htc.host_credits(handle.endpoint()), LoopbackConfig::default().credits);
}

#[test]
fn full_transport_queue_is_reported() {
    let htc = LoopbackHtc::with_config(LoopbackConfig {
        queue_depth: 1,
        ..LoopbackConfig::default()
    })
    .expect("loopback");
    let soc = WmiSoc::attach(htc.clone(), MockCatalog::new(), 1).expect("attach");
    let handle = soc.handle(0).expect("handle");
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (started_tx, started_rx) = unbounded();
    soc.register_event_handler(0x30, RxContext::Immediate, move |_| {
        let _ = started_tx.send(());
        let _ = gate_rx.recv();
    })
    .expect("register");

    htc.inject_event(handle.endpoint(), 0x30, &[]).expect("inject");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("target busy");
    handle.send_command(0x10, &[]).expect("fills the queue");
    let err = handle.send_command(0x10, &[]).expect_err("queue full");
    assert!(matches!(
        err,
        WmiError::Transport(TransportError::QueueFull { .. })
    ));
    assert_eq!(handle.pending_cmds(), 1);

    gate_tx.send(()).expect("release");
    htc.sync();
    assert_eq!(handle.pending_cmds(), 0);
}

#[test]
fn tlv_catalog_end_to_end() {
    let htc = LoopbackHtc::new().expect("loopback");
    htc.set_responder(Box::new(|_: EndpointId, id: u32, _: &[u8]| {
        match id {
            cmd::START_SCAN => WmiTlvCatalog::event_payload(evt::SCAN, &[3, 0, 0, 0], &[])
                .map(|payload| vec![(evt::SCAN, payload)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }));
    let soc = WmiSoc::builder(htc.clone(), Arc::new(WmiTlvCatalog::new()))
        .config(wmi_tlv::default_config())
        .attach()
        .expect("attach");
    let handle = soc.handle(0).expect("handle");
    let (tx, rx) = unbounded();
    soc.register_event_handler(logical::SCAN, RxContext::Deferred, move |event| {
        let view: &TlvView = event.view;
        let _ = tx.send(view.fixed_word(0));
    })
    .expect("register");

    let payload = WmiTlvCatalog::command_payload(cmd::START_SCAN, &[], &[]).expect("encode");
    handle.send_command(cmd::START_SCAN, &payload).expect("send");
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).expect("scan event"),
        Some(3)
    );

    handle.set_suspended(true);
    let err = handle
        .send_command(cmd::START_SCAN, &payload)
        .expect_err("suspended");
    assert!(matches!(err, WmiError::Busy { .. }));
    let resume = WmiTlvCatalog::command_payload(cmd::PDEV_RESUME, &[], &[]).expect("encode");
    handle.send_command(cmd::PDEV_RESUME, &resume).expect("resume allowed");

    assert!(matches!(
        handle.send_command(cmd::PDEV_RESUME, &[0; 3]),
        Err(WmiError::InvalidParams { .. })
    ));
    htc.sync();
    assert_eq!(handle.pending_cmds(), 0);
}
