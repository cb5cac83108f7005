use crate::tags::engine::TagChange;
use crate::tags::structures::Quality;
use crate::triggers::evaluator::evaluate;
use crate::triggers::processor::{
    ProcessContext, ProcessResult, ProcessorRegistry, ResultWriter, WorkstationResolver,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Minimum spacing between accepted firings of one trigger.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPriority {
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerState {
    Idle,
    Dispatching,
    Executing,
}

/// A tag designated to start a workstation process.
#[derive(Debug)]
pub struct TriggerMapping {
    pub equipment_code: String,
    pub tag_name: String,
    pub condition: Option<String>,
    pub priority: TriggerPriority,
    last_trigger: Mutex<Option<Instant>>,
    in_flight: Mutex<InFlight>,
}

/// Dispatches of one trigger that have not finished yet.
#[derive(Debug, Default)]
struct InFlight {
    dispatching: usize,
    executing: usize,
}

/// Counts one dispatch as in flight until dropped.
struct DispatchGuard<'a> {
    mapping: &'a TriggerMapping,
    executing: bool,
}

impl DispatchGuard<'_> {
    fn mark_executing(&mut self) {
        if !self.executing {
            let mut in_flight = self.mapping.in_flight.lock();
            in_flight.dispatching -= 1;
            in_flight.executing += 1;
            self.executing = true;
        }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.mapping.in_flight.lock();
        if self.executing {
            in_flight.executing -= 1;
        } else {
            in_flight.dispatching -= 1;
        }
    }
}

impl TriggerMapping {
    pub fn new(
        equipment_code: impl Into<String>,
        tag_name: impl Into<String>,
        condition: Option<String>,
        priority: TriggerPriority,
    ) -> Self {
        TriggerMapping {
            equipment_code: equipment_code.into(),
            tag_name: tag_name.into(),
            condition,
            priority,
            last_trigger: Mutex::new(None),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    /// Accept a firing at `now` unless the previous one is within `window`.
    ///
    /// Check and update happen under one lock, so concurrent notifications
    /// cannot both pass.
    pub fn try_fire(&self, now: Instant, window: Duration) -> bool {
        let mut last = self.last_trigger.lock();
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < window {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    pub fn last_trigger_time(&self) -> Option<Instant> {
        *self.last_trigger.lock()
    }

    /// Idle only when no dispatch of this trigger is still running.
    pub fn state(&self) -> TriggerState {
        let in_flight = self.in_flight.lock();
        if in_flight.executing > 0 {
            TriggerState::Executing
        } else if in_flight.dispatching > 0 {
            TriggerState::Dispatching
        } else {
            TriggerState::Idle
        }
    }

    fn begin_dispatch(&self) -> DispatchGuard<'_> {
        self.in_flight.lock().dispatching += 1;
        DispatchGuard {
            mapping: self,
            executing: false,
        }
    }
}

/// What happened to one change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NotATrigger,
    BadQuality,
    ConditionFalse,
    Debounced,
    NoWorkstation,
    NoProcessor,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerStatus {
    pub tag_name: String,
    pub equipment_code: String,
    pub priority: TriggerPriority,
    pub state: TriggerState,
}

struct DispatcherInner {
    triggers: HashMap<String, Arc<TriggerMapping>>,
    resolver: Arc<dyn WorkstationResolver>,
    processors: ProcessorRegistry,
    results: ResultWriter,
    reset_result_on_idle: bool,
    debounce: Duration,
    dispatched: AtomicU64,
}

struct Listener {
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Turns trigger tag changes into workstation processor runs.
pub struct TriggerDispatcher {
    inner: Arc<DispatcherInner>,
    listener: Mutex<Option<Listener>>,
}

impl TriggerDispatcher {
    pub fn new(
        mappings: Vec<TriggerMapping>,
        resolver: Arc<dyn WorkstationResolver>,
        processors: ProcessorRegistry,
        results: ResultWriter,
        reset_result_on_idle: bool,
    ) -> Self {
        let triggers = mappings
            .into_iter()
            .map(|m| (m.tag_name.clone(), Arc::new(m)))
            .collect();
        TriggerDispatcher {
            inner: Arc::new(DispatcherInner {
                triggers,
                resolver,
                processors,
                results,
                reset_result_on_idle,
                debounce: DEBOUNCE_WINDOW,
                dispatched: AtomicU64::new(0),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Listen for changes; each notification is handled in its own task.
    pub fn start(&self, mut changes: broadcast::Receiver<TagChange>) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            debug!("Trigger dispatcher already listening");
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            info!(
                "Trigger dispatcher listening for {} triggers",
                inner.triggers.len()
            );
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    received = changes.recv() => received,
                };
                match received {
                    Ok(change) => {
                        if !inner.triggers.contains_key(&change.tag_name) {
                            continue;
                        }
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            inner.handle(change).await;
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Trigger dispatcher skipped {} change notifications", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Trigger dispatcher stopped listening");
        });
        *listener = Some(Listener {
            cancel,
            _handle: handle,
        });
    }

    /// Unsubscribe. In-flight dispatches keep running.
    pub fn stop(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.cancel.cancel();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Process one notification inline.
    pub async fn handle_change(&self, change: TagChange) -> DispatchOutcome {
        self.inner.handle(change).await
    }

    pub fn mapping(&self, tag_name: &str) -> Option<Arc<TriggerMapping>> {
        self.inner.triggers.get(tag_name).cloned()
    }

    pub fn trigger_states(&self) -> Vec<TriggerStatus> {
        let mut states: Vec<TriggerStatus> = self
            .inner
            .triggers
            .values()
            .map(|m| TriggerStatus {
                tag_name: m.tag_name.clone(),
                equipment_code: m.equipment_code.clone(),
                priority: m.priority,
                state: m.state(),
            })
            .collect();
        states.sort_by(|a, b| a.tag_name.cmp(&b.tag_name));
        states
    }

    pub fn trigger_count(&self) -> usize {
        self.inner.triggers.len()
    }

    /// Number of processor invocations so far.
    pub fn dispatched_count(&self) -> u64 {
        self.inner.dispatched.load(Ordering::SeqCst)
    }
}

impl Drop for TriggerDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl DispatcherInner {
    async fn handle(&self, change: TagChange) -> DispatchOutcome {
        let Some(mapping) = self.triggers.get(&change.tag_name).cloned() else {
            return DispatchOutcome::NotATrigger;
        };
        if change.current.quality != Quality::Good {
            debug!(
                "Ignoring trigger '{}' with {:?} quality",
                mapping.tag_name, change.current.quality
            );
            return DispatchOutcome::BadQuality;
        }

        if !evaluate(&change.current.value, mapping.condition.as_deref()) {
            if self.reset_result_on_idle {
                if let Err(e) = self
                    .results
                    .write(&mapping.equipment_code, ProcessResult::Idle, None)
                    .await
                {
                    warn!("Failed to reset result for '{}': {}", mapping.equipment_code, e);
                }
            }
            return DispatchOutcome::ConditionFalse;
        }

        if !mapping.try_fire(Instant::now(), self.debounce) {
            debug!(
                "Trigger '{}' fired within {:?} of the previous one; dropped",
                mapping.tag_name, self.debounce
            );
            return DispatchOutcome::Debounced;
        }
        if mapping.priority == TriggerPriority::High {
            info!(
                "High priority trigger '{}' for {}",
                mapping.tag_name, mapping.equipment_code
            );
        }

        let mut guard = mapping.begin_dispatch();
        self.dispatch(&mapping, &change, &mut guard).await
    }

    async fn dispatch(
        &self,
        mapping: &TriggerMapping,
        change: &TagChange,
        guard: &mut DispatchGuard<'_>,
    ) -> DispatchOutcome {
        let equipment = &mapping.equipment_code;
        let Some(workstation) = self.resolver.resolve(equipment).await else {
            let message = format!("no workstation owns equipment '{}'", equipment);
            warn!("{}", message);
            self.report_error(equipment, &message).await;
            return DispatchOutcome::NoWorkstation;
        };
        let Some(processor) = self.processors.get(&workstation.workstation_type) else {
            let message = format!(
                "no processor registered for {:?} (workstation '{}')",
                workstation.workstation_type, workstation.code
            );
            warn!("{}", message);
            self.report_error(equipment, &message).await;
            return DispatchOutcome::NoProcessor;
        };

        let ctx = ProcessContext {
            workstation_code: workstation.code.clone(),
            equipment_code: equipment.clone(),
            trigger_tag: mapping.tag_name.clone(),
            trigger_value: change.current.value.clone(),
            trigger_time: Utc::now(),
        };
        info!(
            "Dispatching trigger '{}' to workstation '{}'",
            ctx.trigger_tag, ctx.workstation_code
        );
        guard.mark_executing();
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        // Separate task so a panicking processor is reported, not propagated.
        let run = tokio::spawn(async move { processor.execute(&ctx).await });
        match run.await {
            Ok(Ok(())) => DispatchOutcome::Completed,
            Ok(Err(e)) => {
                let message = e.to_string();
                error!("Processor for '{}' failed: {}", equipment, message);
                self.report_error(equipment, &message).await;
                DispatchOutcome::Failed(message)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "processor panicked".to_string()
                } else {
                    "processor was cancelled".to_string()
                };
                error!("Processor for '{}' aborted: {}", equipment, message);
                self.report_error(equipment, &message).await;
                DispatchOutcome::Failed(message)
            }
        }
    }

    async fn report_error(&self, equipment: &str, message: &str) {
        if let Err(e) = self
            .results
            .write(equipment, ProcessResult::Error, Some(message))
            .await
        {
            error!("Failed to write error result for '{}': {}", equipment, e);
        }
    }
}
