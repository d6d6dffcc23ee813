use crate::jobs::repo::JobsRepo;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;

/// Periodic sweep that re-queues jobs whose lease expired (§4.9). The Pool's
/// heartbeat keeps a lease fresh while the worker is alive; once heartbeats
/// stop (crash, process kill), the lease lapses and this loop resurrects the
/// job for the next poller. `attempts` is left untouched — the resurrected
/// job will increment it again on its next claim, so handlers must tolerate
/// re-execution.
pub async fn spawn_recovery_loop(
    worker_id: String,
    repo: JobsRepo,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match repo.expire_leases(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => println!("[{worker_id}] recovery: requeued {n} job(s) with expired leases"),
                    Err(e) => eprintln!("[{worker_id}] recovery: expire_leases failed: {e:#}"),
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}
