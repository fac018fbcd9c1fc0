use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use mock::{MockCatalog, MockHtc};
use transport::ServiceId;
use wmi::{LogConfig, RxContext, WmiConfig, WmiError, WmiSoc};

use crate::support::{wait_until, Fixture};

#[test]
fn detach_frees_queued_deferred_events_and_stops_worker() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (started_tx, started_rx) = unbounded();
    fx.soc
        .register_event_handler(0x42, RxContext::Deferred, move |_| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register");

    for n in 0..3u8 {
        fx.htc
            .deliver_event(handle.endpoint(), 0x42, &[n])
            .expect("deliver");
    }
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first handler started");
    assert_eq!(handle.deferred_len(), 2);
    assert_eq!(fx.htc.rx_outstanding(), 3);

    let watcher = handle.clone();
    let releaser = thread::spawn(move || {
        assert!(wait_until(|| watcher.deferred_len() == 0));
        gate_tx.send(()).expect("release");
    });
    fx.soc.detach();
    releaser.join().expect("releaser");

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(fx.htc.rx_outstanding(), 0);
    assert!(!handle.is_worker_running());
    assert!(fx.soc.is_detached());
    assert_eq!(fx.soc.registered_handlers(), 0);
    assert!(matches!(
        handle.send_command(0x1, &[]),
        Err(WmiError::Detached)
    ));
    assert!(matches!(fx.soc.handle(0), Err(WmiError::Detached)));
}

#[test]
fn remove_work_reports_discarded_events() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (started_tx, started_rx) = unbounded();
    handle
        .register_event_handler(0x42, RxContext::Deferred, move |_| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .expect("register");
    for _ in 0..3 {
        fx.htc
            .deliver_event(handle.endpoint(), 0x42, &[])
            .expect("deliver");
    }
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("handler started");

    let watcher = handle.clone();
    let releaser = thread::spawn(move || {
        assert!(wait_until(|| watcher.deferred_len() == 0));
        gate_tx.send(()).expect("release");
    });
    assert_eq!(handle.remove_work(), 2);
    releaser.join().expect("releaser");
    assert!(!handle.is_worker_running());

    fx.htc
        .deliver_event(handle.endpoint(), 0x42, &[])
        .expect("deliver");
    assert_eq!(handle.stats().queue_dropped, 1);
    assert_eq!(fx.htc.rx_outstanding(), 0);
}

#[test]
fn events_after_detach_are_dropped() {
    let fx = Fixture::new();
    let endpoint = fx.handle(0).endpoint();
    fx.soc.detach();
    fx.soc.detach();
    fx.htc.deliver_event(endpoint, 0x42, &[1]).expect("deliver");
    assert_eq!(fx.htc.rx_outstanding(), 0);
    assert_eq!(fx.catalog.views_created(), 0);
}

#[test]
fn dropping_the_soc_detaches() {
    let htc = MockHtc::new();
    let soc = WmiSoc::attach(htc.clone(), MockCatalog::new(), 1).expect("attach");
    let handle = soc.handle(0).expect("handle");
    drop(soc);
    assert!(!handle.is_worker_running());
    assert!(matches!(
        handle.send_command(0x1, &[]),
        Err(WmiError::Detached)
    ));
}

#[test]
fn radio_count_is_bounded_by_transport() {
    let htc = MockHtc::new();
    assert!(matches!(
        WmiSoc::attach(htc.clone(), MockCatalog::new(), 4),
        Err(WmiError::TooManyRadios {
            requested: 4,
            max: 3
        })
    ));
    assert!(matches!(
        WmiSoc::attach(htc, MockCatalog::new(), 0),
        Err(WmiError::TooManyRadios { requested: 0, .. })
    ));
}

#[test]
fn each_radio_connects_its_own_service() {
    let fx = Fixture::with_config(WmiConfig::default(), 3);
    let services = [
        ServiceId::WMI_CONTROL,
        ServiceId::WMI_CONTROL_MAC1,
        ServiceId::WMI_CONTROL_MAC2,
    ];
    for (radio, service) in services.into_iter().enumerate() {
        assert_eq!(
            fx.htc.endpoint_for(service),
            Some(fx.handle(radio).endpoint())
        );
    }
    assert!(matches!(
        fx.soc.handle(3),
        Err(WmiError::InvalidRadio { radio: 3, count: 3 })
    ));
}

#[test]
fn handles_are_created_once_per_radio() {
    let fx = Fixture::new();
    let a = fx.handle(0);
    a.send_command(0x42, &[]).expect("send");
    let b = fx.handle(0);
    assert_eq!(b.pending_cmds(), 1);
}

#[test]
fn invalid_log_config_is_refused() {
    let config = WmiConfig {
        log: LogConfig {
            record_len: 6,
            ..LogConfig::default()
        },
        ..WmiConfig::default()
    };
    let result = WmiSoc::builder(MockHtc::new(), MockCatalog::new())
        .config(config)
        .attach();
    assert!(matches!(result, Err(WmiError::InvalidConfig(_))));
}

#[test]
fn completions_after_detach_are_released() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    handle.send_command(0x42, &[1]).expect("send");
    fx.soc.detach();
    assert_eq!(handle.pending_cmds(), 1);
    assert_eq!(fx.htc.complete_all(), 1);
    assert_eq!(handle.buf_stats().outstanding, 0);
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.stats().cmds_completed, 1);
}

#[test]
fn completions_after_soc_drop_reach_the_handle() {
    let htc = MockHtc::new();
    let soc = WmiSoc::attach(htc.clone(), MockCatalog::new(), 1).expect("attach");
    let handle = soc.handle(0).expect("handle");
    handle.send_command(0x42, &[1]).expect("send");
    drop(soc);

    assert_eq!(htc.complete_all(), 1);
    assert_eq!(handle.pending_cmds(), 0);
    assert_eq!(handle.buf_stats().outstanding, 0);
}

#[test]
fn watchdog_counts_a_hung_deferred_handler() {
    let config = WmiConfig {
        worker_watchdog: Duration::from_millis(20),
        ..WmiConfig::default()
    };
    let fx = Fixture::with_config(config, 1);
    let handle = fx.handle(0);
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (started_tx, started_rx) = unbounded();
    handle
        .register_event_handler(0x42, RxContext::Deferred, move |_| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .expect("register");

    fx.htc
        .deliver_event(handle.endpoint(), 0x42, &[])
        .expect("deliver");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("handler started");
    assert!(wait_until(|| handle.stats().watchdog_overruns == 1));
    assert_eq!(handle.stats().dispatched_deferred, 0);

    gate_tx.send(()).expect("release");
    assert!(wait_until(|| handle.stats().dispatched_deferred == 1));
    assert_eq!(handle.stats().watchdog_overruns, 1);
}
