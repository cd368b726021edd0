//! The reconnection manager.
//!
//! An explicit state machine — `Connected → Disconnected → Reconnecting →
//! Connected` — owned by a single task with one timer handle. No recursive
//! retry: each tick of the fixed-interval timer attempts a full connect, the
//! timer is dropped the moment one succeeds, and the loop never gives up
//! while the endpoint is alive.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use switchboard_channel::{ChannelHandle, ChannelOpener};
use switchboard_core::{EndpointId, EndpointInfo};

use crate::connector::{
    self, Inner, attempt_connect, dispatch_inbound, handlers_installed,
};

/// Connection lifecycle state, owned by the connector and the manager task.
pub(crate) enum LinkState {
    Connected {
        channel: Arc<ChannelHandle>,
        identity: EndpointId,
        snapshot: Vec<EndpointInfo>,
    },
    /// Channel loss detected; disconnect callbacks firing.
    Disconnected,
    /// Fixed-interval retry in progress.
    Reconnecting,
    /// Closed for good; the manager must exit.
    Stopped,
}

/// Drive the connection lifecycle until stopped.
pub(crate) async fn run<O: ChannelOpener>(
    inner: Arc<Inner<O>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let channel = {
            match &*inner.state.lock().await {
                LinkState::Connected { channel, .. } => Arc::clone(channel),
                _ => return,
            }
        };

        // Read until the channel dies.
        loop {
            tokio::select! {
                envelope = channel.recv() => {
                    match envelope {
                        Some(envelope) => dispatch_inbound(&inner, envelope).await,
                        None => break,
                    }
                }
                _ = stop_rx.changed() => return,
            }
        }

        if *stop_rx.borrow() {
            return;
        }

        // Channel lost: notify, then retry forever at a fixed interval.
        {
            let mut state = inner.state.lock().await;
            if matches!(*state, LinkState::Stopped) {
                return;
            }
            *state = LinkState::Disconnected;
        }
        info!(
            "channel lost, retrying every {:?}",
            inner.config.reconnect_interval
        );
        let disconnect_callbacks = inner.callbacks.lock().await.on_disconnect.clone();
        for callback in disconnect_callbacks {
            callback();
        }

        *inner.state.lock().await = LinkState::Reconnecting;

        let mut ticker = tokio::time::interval(inner.config.reconnect_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() yields immediately; the first attempt waits one tick.
        ticker.tick().await;

        let session = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match attempt_connect(&inner.opener, &inner.config).await {
                        Ok(session) => break session,
                        Err(e) => debug!("reconnect attempt failed: {e}"),
                    }
                }
                _ = stop_rx.changed() => return,
            }
        };
        drop(ticker);

        let identity = session.identity;
        {
            let mut state = inner.state.lock().await;
            if matches!(*state, LinkState::Stopped) {
                drop(state);
                session.channel.close().await;
                return;
            }
            *state = LinkState::Connected {
                channel: session.channel,
                identity,
                snapshot: session.snapshot,
            };
        }
        info!("reconnected as {identity:?}");

        let reconnect_callbacks = inner.callbacks.lock().await.on_reconnect.clone();
        for callback in reconnect_callbacks {
            callback(identity);
        }

        // The hub's readiness state died with the old registry entry.
        if handlers_installed(&inner).await {
            connector::send_handlers_ready(&inner).await;
        }

        flush_queue(&inner).await;
    }
}

/// Replay the offline queue in enqueue order. Individual failures re-queue
/// that message and keep going.
async fn flush_queue<O: ChannelOpener>(inner: &Inner<O>) {
    let entries = inner.queue.lock().await.drain_fresh();
    if entries.is_empty() {
        return;
    }

    let live = {
        match &*inner.state.lock().await {
            LinkState::Connected {
                channel, identity, ..
            } => Some((Arc::clone(channel), *identity)),
            _ => None,
        }
    };
    let Some((channel, identity)) = live else {
        let mut queue = inner.queue.lock().await;
        for entry in entries {
            queue.requeue(entry);
        }
        return;
    };

    debug!("replaying {} queued messages", entries.len());
    for entry in entries {
        let envelope = entry.envelope.clone().with_sender(identity);
        if let Err(e) = channel.send(envelope).await {
            debug!("replay of {:?} failed ({e}), re-queueing", entry.envelope.action);
            inner.queue.lock().await.requeue(entry);
        }
    }
}
