//! Demo traffic driven through the loopback transport so the logs have
//! something to show.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use runtime_native::LoopbackHtc;
use serde::Serialize;
use tracing::{info, warn};
use transport::EndpointId;
use wmi::{RxContext, WmiError, WmiHandle, WmiSoc};
use wmi_tlv::ids::{cmd, evt, logical};
use wmi_tlv::WmiTlvCatalog;

/// Counters collected while the scenario ran.
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub commands: usize,
    pub refused_while_suspended: usize,
    pub scan_events: usize,
    pub mgmt_completions: usize,
    pub ready_events: usize,
    pub wakeups: usize,
}

#[derive(Default)]
struct Counters {
    scan: AtomicUsize,
    mgmt: AtomicUsize,
    ready: AtomicUsize,
    wakeups: AtomicUsize,
}

/// Answers commands the way a cooperative target would.
pub fn install_responder(htc: &LoopbackHtc) {
    htc.set_responder(Box::new(|_: EndpointId, id: u32, _: &[u8]| -> Vec<(u32, Vec<u8>)> {
        let reply = |event: u32, fixed: &[u8]| {
            WmiTlvCatalog::event_payload(event, fixed, &[])
                .map(|payload| (event, payload))
                .ok()
        };
        match id {
            cmd::INIT => [
                reply(evt::SERVICE_READY, &[1, 0, 0, 0]),
                reply(evt::READY, &[0; 12]),
            ]
            .into_iter()
            .flatten()
            .collect(),
            cmd::START_SCAN | cmd::STOP_SCAN => reply(evt::SCAN, &[id as u8]).into_iter().collect(),
            cmd::MGMT_TX_SEND => reply(evt::MGMT_TX_COMPLETION, &[0; 8]).into_iter().collect(),
            cmd::WOW_HOSTWAKEUP_FROM_SLEEP => {
                reply(evt::WOW_WAKEUP_HOST, &[0; 8]).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }));
}

fn register(soc: &WmiSoc<WmiTlvCatalog>, counters: &Arc<Counters>) -> Result<()> {
    let c = Arc::clone(counters);
    soc.register_event_handler(logical::SCAN, RxContext::Deferred, move |_| {
        c.scan.fetch_add(1, Ordering::Relaxed);
    })?;
    let c = Arc::clone(counters);
    soc.register_event_handler(logical::MGMT_TX_COMPLETION, RxContext::Immediate, move |_| {
        c.mgmt.fetch_add(1, Ordering::Relaxed);
    })?;
    for event in [logical::SERVICE_READY, logical::READY] {
        let c = Arc::clone(counters);
        soc.register_event_handler(event, RxContext::Default, move |_| {
            c.ready.fetch_add(1, Ordering::Relaxed);
        })?;
    }
    let c = Arc::clone(counters);
    soc.register_event_handler(logical::WOW_WAKEUP_HOST, RxContext::Immediate, move |_| {
        c.wakeups.fetch_add(1, Ordering::Relaxed);
    })?;
    Ok(())
}

fn send(handle: &WmiHandle<WmiTlvCatalog>, id: u32, fixed: &[u8]) -> Result<()> {
    let payload = WmiTlvCatalog::command_payload(id, fixed, &[])?;
    handle
        .send_command(id, &payload)
        .with_context(|| format!("failed to send {id:#x}"))
}

/// Runs `rounds` of scan and management traffic on every radio, then a
/// suspend/resume cycle on radio 0.
pub fn run(soc: &WmiSoc<WmiTlvCatalog>, htc: &LoopbackHtc, rounds: usize) -> Result<Summary> {
    let counters = Arc::new(Counters::default());
    register(soc, &counters)?;
    let mut summary = Summary::default();

    let handles = (0..soc.radio_count())
        .map(|radio| soc.handle(radio))
        .collect::<Result<Vec<_>, _>>()?;

    for handle in &handles {
        send(handle, cmd::INIT, &[])?;
        summary.commands += 1;
        for round in 0..rounds {
            send(handle, cmd::START_SCAN, &(round as u32).to_le_bytes())?;
            send(handle, cmd::MGMT_TX_SEND, &[])?;
            send(handle, cmd::STOP_SCAN, &[])?;
            summary.commands += 3;
        }
        htc.sync();
    }

    if let Some(handle) = handles.first() {
        handle.set_runtime_pm_in_progress(true);
        send(handle, cmd::WOW_ENABLE, &[1])?;
        send(handle, cmd::PDEV_SUSPEND, &[])?;
        handle.set_runtime_pm_in_progress(false);
        handle.set_suspended(true);
        summary.commands += 2;

        let payload = WmiTlvCatalog::command_payload(cmd::START_SCAN, &[], &[])?;
        match handle.send_command(cmd::START_SCAN, &payload) {
            Err(WmiError::Busy { .. }) => summary.refused_while_suspended += 1,
            Ok(()) => {
                summary.commands += 1;
                warn!("scan accepted while suspended");
            }
            Err(err) => return Err(err.into()),
        }

        send(handle, cmd::WOW_HOSTWAKEUP_FROM_SLEEP, &[])?;
        send(handle, cmd::PDEV_RESUME, &[])?;
        handle.set_suspended(false);
        summary.commands += 2;
        htc.sync();
    }

    let expected_scans = 2 * rounds * handles.len();
    let deadline = Instant::now() + Duration::from_secs(5);
    while counters.scan.load(Ordering::Relaxed) < expected_scans && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    summary.scan_events = counters.scan.load(Ordering::Relaxed);
    summary.mgmt_completions = counters.mgmt.load(Ordering::Relaxed);
    summary.ready_events = counters.ready.load(Ordering::Relaxed);
    summary.wakeups = counters.wakeups.load(Ordering::Relaxed);
    info!(?summary, "scenario finished");
    Ok(summary)
}
