use std::convert::Infallible;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};
use typed_builder::TypedBuilder;

use flowwarden_common::{Settings, SourceKind};
use flowwarden_events::EventSink;

use crate::analyzer::AnalyzerRegistry;
use crate::attach::attach_sink;
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config_manager::ConfigManager;
use crate::context::ContextFactory;
use crate::features::TransformContextProvider;
use crate::listener::ChangeListener;
use crate::pipeline::{attach_pipelines, PipelineFactory};
use crate::retry::{RetryState, Sleeper, TokioSleeper};
use crate::runtime::run_until_terminated;
use crate::sources::SourceProvider;
use crate::types::{CycleReport, Phase};

/// Errors the supervisor cannot absorb. Everything else ends the current
/// cycle and starts the next one.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("checkpoint recovery failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Collaborators injected into the supervisor.
#[derive(TypedBuilder)]
pub struct SupervisorDeps {
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub config_manager: Arc<dyn ConfigManager>,
    pub source_provider: Arc<dyn SourceProvider>,
    pub transform_provider: Arc<dyn TransformContextProvider>,
    pub sink: Arc<dyn EventSink>,
    pub listener: Arc<dyn ChangeListener>,
    #[builder(default = Arc::new(TokioSleeper))]
    pub sleeper: Arc<dyn Sleeper>,
    #[builder(default = AnalyzerRegistry::standard())]
    pub analyzers: AnalyzerRegistry,
    #[builder(default = SourceKind::ALL.to_vec())]
    pub kinds: Vec<SourceKind>,
}

/// Drives the acquire → attach → run → restart loop.
pub struct Supervisor {
    settings: Arc<Settings>,
    contexts: ContextFactory,
    pipelines: PipelineFactory,
    analyzers: AnalyzerRegistry,
    kinds: Vec<SourceKind>,
    sink: Arc<dyn EventSink>,
    listener: Arc<dyn ChangeListener>,
    sleeper: Arc<dyn Sleeper>,
    phase: Phase,
}

impl Supervisor {
    pub fn new(settings: Arc<Settings>, deps: SupervisorDeps) -> Self {
        Self {
            settings,
            contexts: ContextFactory::new(deps.checkpoint_store),
            pipelines: PipelineFactory::new(
                deps.source_provider,
                deps.transform_provider,
                deps.config_manager,
            ),
            analyzers: deps.analyzers,
            kinds: deps.kinds,
            sink: deps.sink,
            listener: deps.listener,
            sleeper: deps.sleeper,
            phase: Phase::AcquiringContext,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Supervise forever. Only returns on a failure no cycle can recover
    /// from.
    pub async fn run(&mut self) -> Result<Infallible, SupervisorError> {
        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let report = self.run_cycle().await?;
            if report.termination.is_failure() {
                error!(cycle, "Cycle ended abnormally, restarting. {report}");
            } else {
                info!(cycle, "Cycle ended, restarting. {report}");
            }

            if report.termination.pauses_before_restart() {
                let pause = self.settings.pipeline_init_wait;
                info!(
                    cycle,
                    backoff_ms = pause.as_millis() as u64,
                    "Pausing before the next cycle"
                );
                self.sleeper.sleep(pause).await;
            }
        }
    }

    /// One full cycle: acquire a context, attach pipelines (waiting as long
    /// as it takes), run until termination, then discard the context.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SupervisorError> {
        let mut phases = Vec::new();

        self.enter(Phase::AcquiringContext, &mut phases);
        let mut context = self.contexts.obtain_or_recover(&self.settings).await?;
        let origin = context.origin();
        let start_batch_seq = context.batch_seq();

        let mut retry = RetryState::new(self.settings.pipeline_init_wait);
        let stream = loop {
            self.enter(Phase::Attaching, &mut phases);
            retry.record_attempt();

            let aggregation =
                attach_pipelines(&self.kinds, &self.pipelines, &self.analyzers, &context).await;
            if let Some(stream) = aggregation.into_stream() {
                break stream;
            }

            self.enter(Phase::Waiting, &mut phases);
            let backoff = retry.backoff();
            info!(
                backoff_ms = backoff.as_millis() as u64,
                attempt = retry.attempts(),
                waited_ms = retry.waited().as_millis() as u64,
                "No source kind available, waiting before retrying attachment"
            );
            self.sleeper.sleep(backoff).await;
            retry.record_wait(backoff);
        };

        let attached_kinds = stream.kinds();
        let attached = attach_sink(
            stream,
            &self.settings,
            self.sink.clone(),
            self.listener.clone(),
        );
        self.enter(Phase::Attached, &mut phases);

        self.enter(Phase::Running, &mut phases);
        let termination = run_until_terminated(&mut context, attached).await;

        self.enter(Phase::Terminated, &mut phases);
        let end_batch_seq = context.batch_seq();
        drop(context);

        Ok(CycleReport {
            phases,
            origin,
            start_batch_seq,
            end_batch_seq,
            attach_attempts: retry.attempts(),
            attached: attached_kinds,
            termination,
        })
    }

    fn enter(&mut self, phase: Phase, phases: &mut Vec<Phase>) {
        debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
        phases.push(phase);
    }
}
