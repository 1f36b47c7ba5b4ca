//! Dispatch engine: the dispatcher, the result collector and the wiring
//! that ties them to one job store, one backend and one event bus.

pub mod collector;
pub mod dispatcher;

use std::sync::Arc;

use evalhub_core::backend::{ExecutionBackend, SignalReceiver, SignalSender};
use evalhub_db::JobStore;
use evalhub_events::EventBus;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use collector::{CollectOutcome, IgnoreReason, ResultCollector};
pub use dispatcher::{Dispatcher, Reconciled, RecoveryReport};

use crate::config::EngineConfig;
use crate::service::JobService;

/// All engine components sharing the same store, backend and bus.
///
/// Build with [`Engine::new`], hand [`Engine::service`] to the HTTP layer,
/// then call [`Engine::spawn`] to start the background loops.
pub struct Engine {
    pub service: Arc<JobService>,
    pub dispatcher: Arc<Dispatcher>,
    pub collector: Arc<ResultCollector>,
    signals: SignalReceiver,
    cancel: CancellationToken,
}

/// Background tasks started by [`Engine::spawn`].
pub struct EngineTasks {
    pub dispatcher: JoinHandle<()>,
    pub collector: JoinHandle<()>,
}

impl Engine {
    /// Wire the components. `signals` must be the channel whose sender the
    /// backend was built with.
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        events: Arc<EventBus>,
        (signal_tx, signals): (SignalSender, SignalReceiver),
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let service = Arc::new(JobService::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&events),
            Arc::clone(&wake),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            backend,
            Arc::clone(&events),
            signal_tx,
            config,
            wake,
            cancel.clone(),
        ));
        let collector = Arc::new(ResultCollector::new(store, events));

        Self {
            service,
            dispatcher,
            collector,
            signals,
            cancel,
        }
    }

    /// The completion channel, for driving the collector by hand instead of
    /// through [`Engine::spawn`].
    pub fn signals_mut(&mut self) -> &mut SignalReceiver {
        &mut self.signals
    }

    /// Start the dispatcher and collector loops. Both stop when the engine's
    /// cancellation token fires.
    pub fn spawn(self) -> EngineTasks {
        let collector = {
            let collector = Arc::clone(&self.collector);
            let cancel = self.cancel.clone();
            let signals = self.signals;
            tokio::spawn(async move { collector.run(signals, cancel).await })
        };
        let dispatcher = {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move { dispatcher.run().await })
        };
        EngineTasks {
            dispatcher,
            collector,
        }
    }
}
