//! Background consistency checker.
//!
//! The editing side submits each new graph version; the worker waits for a
//! quiet period, audits the latest version on the blocking pool, and
//! publishes the report on a watch channel. Only immutable `Arc` copies cross
//! the boundary.

use std::sync::Arc;
use std::time::Duration;

use rootline_types::Clock;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::consistency::{CheckPolicy, IssueReport, check};
use crate::graph::FamilyGraph;

/// Handle to a running checker. Dropping it stops the worker.
pub struct ConsistencyChecker {
    graph_tx: watch::Sender<Arc<FamilyGraph>>,
    report_rx: watch::Receiver<Arc<IssueReport>>,
    _shutdown_tx: oneshot::Sender<()>,
}

impl ConsistencyChecker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(policy: CheckPolicy, clock: Arc<dyn Clock>, debounce: Duration) -> Self {
        let (graph_tx, mut graph_rx) = watch::channel(Arc::new(FamilyGraph::new()));
        let (report_tx, report_rx) = watch::channel(Arc::new(IssueReport::default()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = graph_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                // Quiet period: every newer submission restarts the wait.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        changed = graph_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }

                let graph = Arc::clone(&graph_rx.borrow_and_update());
                let policy = policy.clone();
                let today = clock.today();
                match tokio::task::spawn_blocking(move || check(&graph, &policy, today)).await {
                    Ok(report) => {
                        debug!(
                            total = report.total,
                            flagged = report.flagged,
                            health = report.health,
                            "consistency check complete"
                        );
                        report_tx.send_replace(Arc::new(report));
                    }
                    Err(e) => warn!(error = %e, "consistency check task failed"),
                }
            }
            info!("consistency checker stopped");
        });

        Self { graph_tx, report_rx, _shutdown_tx: shutdown_tx }
    }

    /// Queue `graph` for checking. Only the latest submission is audited.
    pub fn submit(&self, graph: Arc<FamilyGraph>) {
        self.graph_tx.send_replace(graph);
    }

    /// Latest published report.
    pub fn report(&self) -> Arc<IssueReport> {
        Arc::clone(&self.report_rx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<IssueReport>> {
        self.report_rx.clone()
    }
}
