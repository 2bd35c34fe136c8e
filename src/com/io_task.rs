//! Async communication I/O loop.
//!
//! Runs on the calling thread with `edge-executor` for cooperative
//! scheduling and `async-io-mini` timers (no busy-spinning). Transport
//! handles are not `Send`, so the service never leaves this thread. Four
//! tasks share it:
//!
//! 1. **Accept** — polls the Ethernet listener every `accept_interval_ms`
//! 2. **Service** — drains inbound frames every `poll_interval_ms`
//! 3. **Updates** — flushes SendDataFlags every `update_interval_ms`
//! 4. **Housekeeping** — RAM level check every [`HOUSEKEEPING_INTERVAL`]
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  I/O thread                                              │
//!  │  futures_lite::block_on(executor.run(stop))              │
//!  │  ┌────────────────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor                      │  │
//!  │  │  ┌────────┐ ┌─────────┐ ┌─────────┐ ┌───────────┐  │  │
//!  │  │  │ Accept │ │ Service │ │ Updates │ │ Housekeep │  │  │
//!  │  │  │  50ms  │ │   1ms   │ │  100ms  │ │    10s    │  │  │
//!  │  │  └────────┘ └─────────┘ └─────────┘ └───────────┘  │  │
//!  │  └────────────────────────────────────────────────────┘  │
//!  │               Rc<RefCell<ComService>>                    │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Time spent inside the service and update tasks is accounted as busy
//! on the attached [`ReportSystem`](crate::diagnostics::ReportSystem);
//! everything else is idle.

use core::cell::RefCell;
use core::future::Future;
use core::time::Duration;
use std::rc::Rc;

use log::info;

use super::client::MAX_CLIENTS;
use super::service::ComService;
use crate::app::ports::EventSink;
use crate::config::TimingConfig;

/// Frames handled per service tick before yielding.
const INBOUND_BUDGET: usize = 2 * MAX_CLIENTS;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10);

pub type SharedService<S> = Rc<RefCell<ComService<S>>>;

fn millis(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms))
}

/// Run `work` accounted as busy time.
fn busy<S: EventSink, R>(service: &SharedService<S>, work: impl FnOnce(&mut ComService<S>) -> R) -> R {
    let mut svc = service.borrow_mut();
    let report = svc.report().cloned();
    if let Some(r) = &report {
        r.start_busy();
    }
    let result = work(&mut *svc);
    if let Some(r) = &report {
        r.start_idle();
    }
    result
}

async fn accept_loop<S: EventSink>(service: SharedService<S>, interval: Duration) {
    loop {
        service.borrow_mut().poll_accept();
        async_io_mini::Timer::after(interval).await;
    }
}

async fn service_loop<S: EventSink>(service: SharedService<S>, interval: Duration) {
    loop {
        busy(&service, |svc| svc.service_inbound(INBOUND_BUDGET));
        async_io_mini::Timer::after(interval).await;
    }
}

async fn update_loop<S: EventSink>(service: SharedService<S>, interval: Duration) {
    loop {
        busy(&service, |svc| svc.flush_updates());
        async_io_mini::Timer::after(interval).await;
    }
}

async fn housekeeping_loop<S: EventSink>(service: SharedService<S>) {
    loop {
        async_io_mini::Timer::after(HOUSEKEEPING_INTERVAL).await;
        let report = service.borrow().report().cloned();
        if let Some(report) = report {
            report.check_ram_level();
        }
    }
}

/// Drive the I/O loop until `stop` completes.
pub fn run_until<S, F>(service: SharedService<S>, timing: &TimingConfig, stop: F)
where
    S: EventSink + 'static,
    F: Future<Output = ()>,
{
    let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();

    executor
        .spawn(accept_loop(service.clone(), millis(timing.accept_interval_ms)))
        .detach();
    executor
        .spawn(service_loop(service.clone(), millis(timing.poll_interval_ms)))
        .detach();
    executor
        .spawn(update_loop(service.clone(), millis(timing.update_interval_ms)))
        .detach();
    executor.spawn(housekeeping_loop(service)).detach();

    info!(
        "IO task started (poll {} ms, updates every {} ms, {} max clients)",
        timing.poll_interval_ms, timing.update_interval_ms, MAX_CLIENTS
    );

    futures_lite::future::block_on(executor.run(stop));
}

/// Drive the I/O loop forever.
pub fn run<S: EventSink + 'static>(service: SharedService<S>, timing: &TimingConfig) {
    run_until(service, timing, core::future::pending::<()>());
}
