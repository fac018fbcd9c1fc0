use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use mock::{MockCatalog, MockHtc, MockView};
use parking_lot::Mutex;
use wmi::{DefaultContext, EventHandler, LogClass, RxContext, WmiConfig, WmiError, WmiEvent, WmiSoc};

use crate::support::{wait_until, Fixture};

#[test]
fn immediate_handler_runs_inside_delivery() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    handle
        .register_event_handler(0x42, RxContext::Immediate, move |event| {
            sink.lock()
                .push((thread::current().id(), event.id, event.len, event.view.payload.clone()));
        })
        .expect("register");

    fx.htc
        .deliver_event(handle.endpoint(), 0x42, &[9, 8])
        .expect("deliver");

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (thread::current().id(), 0x42, 2, vec![9, 8]));
    assert_eq!(fx.htc.rx_outstanding(), 0);
    assert_eq!(fx.catalog.live_views(), 0);
    assert_eq!(handle.stats().dispatched_immediate, 1);
    assert_eq!(handle.log().len(LogClass::RxEvent), 1);
    assert_eq!(handle.log().len(LogClass::Event), 1);
}

#[test]
fn invalid_event_is_dropped_before_any_handler() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    handle
        .register_event_handler(0x42, RxContext::Immediate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register");
    fx.catalog.reject_event(0x42);

    fx.htc
        .deliver_event(handle.endpoint(), 0x42, &[1])
        .expect("deliver");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.htc.rx_outstanding(), 0);
    assert_eq!(handle.stats().rx_rejected, 1);
    assert_eq!(handle.log().len(LogClass::RxEvent), 0);
}

#[test]
fn runt_frame_is_rejected() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.htc.deliver(handle.endpoint(), &[1, 2]).expect("deliver");
    assert_eq!(handle.stats().rx_rejected, 1);
    assert_eq!(fx.htc.rx_outstanding(), 0);
    assert_eq!(fx.catalog.views_created(), 0);
}

#[test]
fn event_without_handler_is_logged_and_freed() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.htc
        .deliver_event(handle.endpoint(), 0x43, &[1])
        .expect("deliver");

    assert_eq!(handle.stats().rx_unhandled, 1);
    assert_eq!(fx.catalog.live_views(), 0);
    assert_eq!(fx.htc.rx_outstanding(), 0);
    assert_eq!(handle.log().len(LogClass::RxEvent), 1);
    assert_eq!(handle.log().len(LogClass::Event), 0);
}

#[test]
fn management_events_use_management_ring() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    fx.catalog.mark_management(0x50);
    handle
        .register_event_handler(0x50, RxContext::Immediate, |_| {})
        .expect("register");
    fx.htc
        .deliver_event(handle.endpoint(), 0x50, &[])
        .expect("deliver");
    assert_eq!(handle.log().len(LogClass::MgmtEvent), 1);
    assert_eq!(handle.log().len(LogClass::Event), 0);
}

#[test]
fn deferred_handlers_run_in_order_on_worker() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    let (tx, rx) = unbounded();
    handle
        .register_event_handler(0x42, RxContext::Deferred, move |event| {
            let name = thread::current().name().map(str::to_owned);
            let _ = tx.send((event.view.payload[0], name));
        })
        .expect("register");

    for n in 0..3u8 {
        fx.htc
            .deliver_event(handle.endpoint(), 0x42, &[n])
            .expect("deliver");
    }
    assert_eq!(handle.stats().queued, 3);

    let got: Vec<_> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("deferred event"))
        .collect();
    assert_eq!(
        got.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(got
        .iter()
        .all(|(_, name)| name.as_deref() == Some("wmi-rx0")));
    assert!(wait_until(|| fx.htc.rx_outstanding() == 0));
    assert!(wait_until(|| handle.stats().dispatched_deferred == 3));
    assert_eq!(fx.catalog.live_views(), 0);
}

#[test]
fn deferred_event_for_removed_handler_is_freed() {
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
    handle
        .register_event_handler(0x43, RxContext::Deferred, |_| {})
        .expect("register");

    fx.htc
        .deliver_event(handle.endpoint(), 0x42, &[])
        .expect("deliver");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("handler started");
    fx.htc
        .deliver_event(handle.endpoint(), 0x43, &[])
        .expect("deliver");
    handle.unregister_event_handler(0x43).expect("unregister");
    gate_tx.send(()).expect("release");

    assert!(wait_until(|| handle.stats().rx_unhandled == 1));
    assert!(wait_until(|| fx.htc.rx_outstanding() == 0));
}

struct CountingContext {
    dispatched: AtomicUsize,
}

impl DefaultContext<MockView> for CountingContext {
    fn dispatch(&self, event: &WmiEvent<'_, MockView>, handler: &EventHandler<MockView>) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        handler(event);
    }
}

#[test]
fn default_handlers_go_through_owner_context() {
    let htc = MockHtc::new();
    let ctx = Arc::new(CountingContext {
        dispatched: AtomicUsize::new(0),
    });
    let soc = WmiSoc::builder(htc.clone(), MockCatalog::new())
        .default_context(ctx.clone())
        .attach()
        .expect("attach");
    let handle = soc.handle(0).expect("handle");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    soc.register_event_handler(0x10, RxContext::Default, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("register");

    htc.deliver_event(handle.endpoint(), 0x10, &[]).expect("deliver");
    assert_eq!(ctx.dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.stats().dispatched_default, 1);
}

#[test]
fn duplicate_registration_is_refused_until_unregistered() {
    let fx = Fixture::new();
    let handle = fx.handle(0);
    assert_eq!(
        handle
            .register_event_handler(0x42, RxContext::Immediate, |_| {})
            .expect("register"),
        0x42
    );
    assert!(matches!(
        handle.register_event_handler(0x42, RxContext::Deferred, |_| {}),
        Err(WmiError::AlreadyRegistered { id: 0x42 })
    ));
    handle.unregister_event_handler(0x42).expect("unregister");
    handle
        .register_event_handler(0x42, RxContext::Deferred, |_| {})
        .expect("re-register");
    assert!(matches!(
        handle.unregister_event_handler(0x99),
        Err(WmiError::NotRegistered { .. })
    ));
    assert!(matches!(
        handle.register_event_handler(MockCatalog::EVENT_ID_LIMIT, RxContext::Immediate, |_| {}),
        Err(WmiError::UnmappedEvent { .. })
    ));
}

#[test]
fn handler_table_is_bounded() {
    let config = WmiConfig {
        max_event_handlers: 2,
        ..WmiConfig::default()
    };
    let fx = Fixture::with_config(config, 1);
    fx.soc
        .register_event_handler(1, RxContext::Immediate, |_| {})
        .expect("first");
    fx.soc
        .register_event_handler(2, RxContext::Immediate, |_| {})
        .expect("second");
    assert!(matches!(
        fx.soc.register_event_handler(3, RxContext::Immediate, |_| {}),
        Err(WmiError::RegistryFull { capacity: 2 })
    ));
    assert_eq!(fx.soc.registered_handlers(), 2);
}

#[test]
fn handlers_are_shared_across_radios() {
    let fx = Fixture::with_config(WmiConfig::default(), 2);
    let radio0 = fx.handle(0);
    let radio1 = fx.handle(1);
    assert_ne!(radio0.endpoint(), radio1.endpoint());

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    fx.soc
        .register_event_handler(0x42, RxContext::Immediate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register");

    fx.htc
        .deliver_event(radio1.endpoint(), 0x42, &[])
        .expect("deliver");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(radio1.stats().dispatched_immediate, 1);
    assert_eq!(radio0.stats().dispatched_immediate, 0);
}
