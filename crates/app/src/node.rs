//! Wires the pipeline together and serves it on the local socket.

use std::future::Future;
use std::sync::Arc;

use tiplock_crypto::{Address, LedgerKeypair};
use tiplock_evidence::{EvidenceStore, MemoryEvidenceStore, PinataStore, UuidTokenSource};
use tiplock_ingest::{BroadcastNotifier, ReportSubmitter};
use tiplock_ipc::{event_to_notification, ServerBuilder};
use tiplock_ledger::{DryRunLedger, EvmLedger, LedgerClient};
use tiplock_review::{CaseStore, FileCaseStore, ReviewWorkflow};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::rpc::{CaseHandler, ReportHandler, StatusHandler};
use crate::AppError;

const EVENT_CAPACITY: usize = 64;

pub struct Node {
    config: NodeConfig,
    address: Address,
    submitter: Arc<ReportSubmitter>,
    workflow: Arc<ReviewWorkflow>,
    notifier: BroadcastNotifier,
}

impl Node {
    /// Build the configured backends: Pinata + EVM, or memory + dry run.
    pub async fn from_config(config: NodeConfig, keypair: LedgerKeypair) -> Result<Self, AppError> {
        let address = keypair.address();
        let (store, ledger): (Arc<dyn EvidenceStore>, Arc<dyn LedgerClient>) = if config.dry_run {
            warn!("dry run: evidence stays in memory and nothing is sent to the ledger");
            (
                Arc::new(MemoryEvidenceStore::new(
                    &config.store.gateway_base,
                    Arc::new(UuidTokenSource),
                )),
                Arc::new(DryRunLedger::new()),
            )
        } else {
            (
                Arc::new(PinataStore::new(&config.store, Arc::new(UuidTokenSource))?),
                Arc::new(EvmLedger::connect(config.ledger.clone(), keypair)?),
            )
        };
        let cases = Arc::new(FileCaseStore::open(config.effective_cases_dir()).await?);
        Ok(Self::with_backends(config, address, store, ledger, cases))
    }

    pub fn with_backends(
        config: NodeConfig,
        address: Address,
        store: Arc<dyn EvidenceStore>,
        ledger: Arc<dyn LedgerClient>,
        cases: Arc<dyn CaseStore>,
    ) -> Self {
        let workflow = Arc::new(ReviewWorkflow::new(cases));
        let notifier = BroadcastNotifier::new(EVENT_CAPACITY);
        let submitter = ReportSubmitter::new(store, ledger, config.ingest.clone())
            .with_notifier(Arc::new(notifier.clone()))
            .with_case_recorder(workflow.clone());
        Self {
            config,
            address,
            submitter: Arc::new(submitter),
            workflow,
            notifier,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn submitter(&self) -> &Arc<ReportSubmitter> {
        &self.submitter
    }

    pub fn workflow(&self) -> &Arc<ReviewWorkflow> {
        &self.workflow
    }

    /// Serve until `shutdown` resolves. Commit events are pushed to every
    /// connected client as `report.committed` notifications.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        let server = ServerBuilder::new(&self.config.socket_path)
            .namespace("report", Arc::new(ReportHandler::new(self.submitter.clone())))
            .namespace("case", Arc::new(CaseHandler::new(self.workflow.clone())))
            .default_handler(Arc::new(StatusHandler::new(self.address, self.config.dry_run)));

        let events = server.event_sender();
        let mut rx = self.notifier.subscribe();
        let forward = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = events.send(event_to_notification(event.name(), event.payload()));
                    }
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "event forwarder lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        info!(
            address = %self.address,
            socket = %self.config.socket_path.display(),
            dry_run = self.config.dry_run,
            "tiplock node ready"
        );
        let result = server.run_until(shutdown).await;
        forward.abort();
        result.map_err(AppError::from)
    }
}
