use std::rc::Rc;

use serde_json::Value;
use storage::StorageChange;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use ui::Response;

use crate::events::HostEvent;
use crate::state::Background;

/// Work delivered to the background by the host.
#[derive(Debug)]
pub enum Inbound {
    Event(HostEvent),
    Request {
        message: Value,
        reply: oneshot::Sender<Response>,
    },
}

/// Serves the background until the inbox closes, then flushes the stats.
///
/// Events are applied in arrival order; requests run concurrently with each
/// other and with the monitoring loop. Must be called inside a
/// `tokio::task::LocalSet`.
pub async fn run(background: Rc<Background>, mut inbox: mpsc::Receiver<Inbound>) {
    let monitor = tokio::task::spawn_local({
        let background = Rc::clone(&background);
        async move { background.monitor().run(background.stats()).await }
    });
    let changes = background.persistence().store().subscribe();
    let listener = tokio::task::spawn_local(watch_storage(Rc::clone(&background), changes));
    info!(event = "background_started");

    while let Some(inbound) = inbox.recv().await {
        match inbound {
            Inbound::Event(event) => background.handle_event(&event).await,
            Inbound::Request { message, reply } => {
                let background = Rc::clone(&background);
                tokio::task::spawn_local(async move {
                    let response = background.handle_message(&message).await;
                    if reply.send(response).is_err() {
                        debug!(event = "reply_dropped");
                    }
                });
            }
        }
    }

    monitor.abort();
    listener.abort();
    let flushed = background.flush().await;
    info!(event = "background_stopped", flushed);
}

async fn watch_storage(background: Rc<Background>, mut changes: broadcast::Receiver<StorageChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => background.on_storage_change(&change),
            Err(RecvError::Lagged(skipped)) => {
                warn!(event = "storage_changes_lagged", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
