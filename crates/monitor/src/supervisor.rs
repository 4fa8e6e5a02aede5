//! Restart-on-panic supervision for the monitor's long-running tasks.
//!
//! A panic inside a supervised task is published as a `system_error` event
//! for that component and the task is started again after a short pause.
//! A task that returns normally is not restarted.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use adwatch_events::{EventBus, MonitorEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause between a panic and the restart.
pub const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Spawn `make()` under supervision.
///
/// `make` is called once per (re)start so each run gets fresh inputs such as
/// a new bus subscription. The first call happens before this returns, so
/// anything `make` subscribes to sees every event published afterwards.
pub fn spawn_supervised<F, Fut>(
    component: &'static str,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    make: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let first = make();
    tokio::spawn(async move {
        let mut task = first;
        loop {
            let Err(e) = tokio::spawn(task).await else {
                break;
            };
            if !e.is_panic() {
                break;
            }

            let message = panic_message(e.into_panic());
            tracing::error!(component, error = %message, "Background task panicked");
            bus.publish(MonitorEvent::SystemError {
                component: component.to_string(),
                campaign_id: None,
                error: format!("task panicked: {message}"),
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RESTART_DELAY) => {}
            }
            tracing::info!(component, "Restarting background task");
            task = make();
        }
    })
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
