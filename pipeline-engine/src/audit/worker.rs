//! Audit background worker
//!
//! Consumes [`AuditCommand`]s from the mpsc channel and appends them to the
//! sink. Exits when every sender is gone.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::recorder::AuditCommand;
use super::sink::AuditSink;

pub struct AuditWorker {
    sink: Arc<dyn AuditSink>,
}

impl AuditWorker {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Run until the channel closes
    pub async fn run(self, mut rx: mpsc::Receiver<AuditCommand>) {
        tracing::info!("Audit worker started");

        while let Some(command) = rx.recv().await {
            match command {
                AuditCommand::Append(event) => {
                    let deal_id = event.deal_id;
                    let kind = event.kind;
                    match self.sink.append(event).await {
                        Ok(entry) => {
                            tracing::debug!(
                                deal_id,
                                event_id = %entry.id,
                                kind = %entry.kind,
                                "History event recorded"
                            );
                        }
                        Err(e) => {
                            // Best effort: the mutation already committed
                            tracing::error!(deal_id, kind = %kind, error = %e, "Failed to record history event");
                        }
                    }
                }
                AuditCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        tracing::info!("Audit channel closed, worker stopping");
    }
}
