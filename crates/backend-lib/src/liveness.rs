// ============================
// peerlink-backend-lib/src/liveness.rs
// ============================
//! Liveness monitor.
//!
//! Every period each connection is either probed (flag set to pending,
//! Ping queued) or, when the previous probe is still unanswered, reported
//! dead. A dead connection goes through the regular leave path in the hub
//! and is then terminated, so a silent peer is gone after at most two
//! periods.
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::{Connections, ConnectionId, Liveness, Outbound};
use crate::hub::HubHandle;

/// Probe every connection; returns the ones that missed the previous probe.
pub fn sweep(connections: &mut Connections) -> Vec<ConnectionId> {
    let mut dead = Vec::new();

    for conn in connections.values_mut() {
        match conn.liveness {
            Liveness::Pending => dead.push(conn.id),
            Liveness::Alive => {
                conn.liveness = Liveness::Pending;
                conn.send(Outbound::Ping);
            },
        }
    }

    dead
}

/// Spawn the periodic task feeding sweeps into the hub. It stops when
/// `shutdown` is cancelled or the hub is gone.
pub fn spawn_monitor(hub: HubHandle, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if hub.sweep().is_err() {
                        break;
                    }
                },
            }
        }

        tracing::debug!("liveness monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::hub::HubCommand;
    use tokio::sync::mpsc;

    fn connections_with_one() -> (Connections, ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let id = ConnectionId::new();
        let mut connections = Connections::new();
        connections.insert(id, Connection::new(id, tx, CancellationToken::new()));
        (connections, id, rx)
    }

    #[test]
    fn test_first_sweep_probes() {
        let (mut connections, id, mut rx) = connections_with_one();

        assert!(sweep(&mut connections).is_empty());
        assert_eq!(connections[&id].liveness, Liveness::Pending);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
    }

    #[test]
    fn test_unanswered_probe_is_dead() {
        let (mut connections, id, _rx) = connections_with_one();

        sweep(&mut connections);
        assert_eq!(sweep(&mut connections), vec![id]);
    }

    #[test]
    fn test_answered_probe_stays_alive() {
        let (mut connections, id, mut rx) = connections_with_one();

        sweep(&mut connections);
        connections.get_mut(&id).unwrap().liveness = Liveness::Alive;
        assert!(sweep(&mut connections).is_empty());

        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_ticks_every_period() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let period = Duration::from_secs(30);
        let start = time::Instant::now();

        spawn_monitor(HubHandle { cmd_tx }, period, shutdown.clone());

        assert!(matches!(cmd_rx.recv().await, Some(HubCommand::Sweep)));
        assert!(start.elapsed() >= period);

        assert!(matches!(cmd_rx.recv().await, Some(HubCommand::Sweep)));
        assert!(start.elapsed() >= period * 2);

        shutdown.cancel();
        assert!(cmd_rx.recv().await.is_none());
    }
}
