use crate::errors::EngineError;
use crate::risk::monte_carlo::{self, CancelToken, SimulationParams, SimulationResult};
use crate::state::{AppState, EngineEvent, EngineSnapshot, EngineStatus, PerfCounters, WsMessage};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// The run currently on a worker thread.
struct InFlight {
    generation: u64,
    cancel: CancelToken,
}

/// Coordinator-owned state. Nothing here is shared; the loop below is the
/// only writer.
struct Coordinator {
    generation: u64,
    in_flight: Option<InFlight>,
    pending: Option<Box<SimulationParams>>,
    last_result: Option<(u64, SimulationResult)>,
    last_error: Option<String>,
}

impl Coordinator {
    fn new() -> Self {
        Self {
            generation: 0,
            in_flight: None,
            pending: None,
            last_result: None,
            last_error: None,
        }
    }

    fn status(&self) -> EngineStatus {
        if self.in_flight.is_some() {
            EngineStatus::Running
        } else if self.pending.is_some() {
            EngineStatus::Pending
        } else {
            EngineStatus::Idle
        }
    }

    fn publish(&self, state: &AppState) {
        let snapshot = EngineSnapshot {
            status: self.status(),
            generation: self.generation,
            result_generation: self.last_result.as_ref().map(|(g, _)| *g),
            last_result: self.last_result.as_ref().map(|(_, r)| r.clone()),
            last_error: self.last_error.clone(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        let _ = state.snapshot_tx.send(snapshot);
    }

    /// Abandon the running simulation. Its late result will be discarded as stale.
    fn cancel_in_flight(&mut self, state: &AppState) {
        if let Some(run) = self.in_flight.take() {
            run.cancel.cancel();
            PerfCounters::bump(&state.counters.simulations_cancelled);
            tracing::info!(generation = run.generation, "simulation cancelled");
            state.broadcast(WsMessage::SimulationCancelled { generation: run.generation });
        }
    }
}

/// Simulation coordinator. Owns the generation counter and the in-flight cancel
/// token; runs the engine on a blocking worker so this task never computes.
///
/// Exactly one simulation is in flight. A new request cancels the previous run
/// first, then waits out the debounce window; only the last request in a burst
/// is launched.
pub async fn run_engine(state: Arc<AppState>, mut rx: mpsc::Receiver<EngineEvent>) {
    tracing::info!("engine task started");

    let debounce = Duration::from_millis(state.config.debounce_ms);
    let mut coord = Coordinator::new();
    let timer = tokio::time::sleep(debounce);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    EngineEvent::Simulate(params) => {
                        PerfCounters::bump(&state.counters.simulations_requested);
                        coord.cancel_in_flight(&state);
                        coord.generation += 1;
                        coord.pending = Some(params);
                        timer.as_mut().reset(tokio::time::Instant::now() + debounce);
                        coord.publish(&state);
                    }
                    EngineEvent::Cancel => {
                        let had_work = coord.in_flight.is_some() || coord.pending.is_some();
                        coord.cancel_in_flight(&state);
                        if coord.pending.take().is_some() {
                            state.broadcast(WsMessage::SimulationCancelled { generation: coord.generation });
                        }
                        if had_work {
                            // Anything still reporting in belongs to an abandoned generation
                            coord.generation += 1;
                        }
                        coord.publish(&state);
                    }
                    EngineEvent::Finished { generation, elapsed_ms, outcome } => {
                        on_finished(&state, &mut coord, generation, elapsed_ms, outcome);
                    }
                    EngineEvent::Shutdown => {
                        tracing::info!("shutdown event received");
                        coord.cancel_in_flight(&state);
                        break;
                    }
                }
            }
            _ = &mut timer, if coord.pending.is_some() => {
                if let Some(params) = coord.pending.take() {
                    launch(&state, &mut coord, params);
                }
            }
        }
    }

    tracing::info!("engine task shutting down");
}

fn launch(state: &Arc<AppState>, coord: &mut Coordinator, params: Box<SimulationParams>) {
    let generation = coord.generation;
    let cancel = CancelToken::new();
    coord.in_flight = Some(InFlight { generation, cancel: cancel.clone() });

    PerfCounters::bump(&state.counters.simulations_started);
    tracing::info!(
        generation,
        paths = params.path_count,
        horizon_days = params.horizon_days,
        legs = params.legs.len(),
        "simulation started"
    );
    state.broadcast(WsMessage::SimulationStarted {
        generation,
        path_count: params.path_count,
        horizon_days: params.horizon_days,
    });
    coord.publish(state);

    let tx = state.engine_tx.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || monte_carlo::simulate(&params, &cancel))
            .await
            .unwrap_or_else(|e| Err(EngineError::Sampler(format!("worker died: {e}"))));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if tx.send(EngineEvent::Finished { generation, elapsed_ms, outcome }).await.is_err() {
            tracing::warn!(generation, "engine gone before result was delivered");
        }
    });
}

fn on_finished(
    state: &AppState,
    coord: &mut Coordinator,
    generation: u64,
    elapsed_ms: u64,
    outcome: Result<SimulationResult, EngineError>,
) {
    let current = coord.in_flight.as_ref().map(|r| r.generation);
    if current != Some(generation) || generation != coord.generation {
        PerfCounters::bump(&state.counters.results_discarded);
        tracing::debug!(generation, current_generation = coord.generation, "stale result discarded");
        state.broadcast(WsMessage::SimulationDiscarded {
            generation,
            current_generation: coord.generation,
        });
        return;
    }
    coord.in_flight = None;

    match outcome {
        Ok(result) => {
            PerfCounters::bump(&state.counters.simulations_completed);
            tracing::info!(
                generation,
                elapsed_ms,
                expected_pnl = result.exact_expected_pnl,
                in_bound_mass = result.in_bound_mass,
                "simulation completed"
            );
            coord.last_error = None;
            coord.last_result = Some((generation, result.clone()));
            state.broadcast(WsMessage::SimulationCompleted { generation, elapsed_ms, result });
        }
        Err(EngineError::Cancelled) => {
            // Only reachable if the token tripped without a coordinator cancel
            PerfCounters::bump(&state.counters.simulations_cancelled);
            state.broadcast(WsMessage::SimulationCancelled { generation });
        }
        Err(e) => {
            PerfCounters::bump(&state.counters.simulations_failed);
            tracing::error!(generation, error = %e, "simulation failed, keeping previous result");
            coord.last_error = Some(e.to_string());
            state.broadcast(WsMessage::SimulationFailed { generation, error: e.to_string() });
        }
    }
    coord.publish(state);
}
