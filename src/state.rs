use crate::calendar::NyseCalendar;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::EngineResult;
use crate::models::calibration::DistributionParameters;
use crate::risk::monte_carlo::{SimulationParams, SimulationResult};
use crate::risk::request::SimulationDefaults;
use chrono::NaiveDate;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

// ── Coordinator status ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    /// A request is waiting out the debounce window
    Pending,
    Running,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
        }
    }
}

// ── Messages INTO the engine (bounded channel) ──

#[derive(Debug)]
pub enum EngineEvent {
    /// Supersedes anything queued or running
    Simulate(Box<SimulationParams>),
    Cancel,
    /// Posted by the worker when a run ends, however it ends
    Finished {
        generation: u64,
        elapsed_ms: u64,
        outcome: EngineResult<SimulationResult>,
    },
    Shutdown,
}

// ── Messages OUT of the engine ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "simulation_started")]
    SimulationStarted {
        generation: u64,
        path_count: usize,
        horizon_days: u32,
    },

    #[serde(rename = "simulation_completed")]
    SimulationCompleted {
        generation: u64,
        elapsed_ms: u64,
        result: SimulationResult,
    },

    #[serde(rename = "simulation_failed")]
    SimulationFailed { generation: u64, error: String },

    #[serde(rename = "simulation_cancelled")]
    SimulationCancelled { generation: u64 },

    #[serde(rename = "simulation_discarded")]
    SimulationDiscarded { generation: u64, current_generation: u64 },

    #[serde(rename = "params_updated")]
    ParamsUpdated { ticker: String },
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    UpsertParams {
        ticker: String,
        params: DistributionParameters,
        reply: oneshot::Sender<EngineResult<()>>,
    },
}

// ── Engine snapshot for clients (sent via watch channel) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    /// Generation of the most recent request
    pub generation: u64,
    /// Generation that produced `last_result`
    pub result_generation: Option<u64>,
    /// Latest valid result; kept across failed and cancelled runs
    pub last_result: Option<SimulationResult>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            status: EngineStatus::Idle,
            generation: 0,
            result_generation: None,
            last_result: None,
            last_error: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub simulations_requested: AtomicU64,
    pub simulations_started: AtomicU64,
    pub simulations_completed: AtomicU64,
    pub simulations_failed: AtomicU64,
    pub simulations_cancelled: AtomicU64,
    pub results_discarded: AtomicU64,
    pub requests_refused: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            simulations_requested: AtomicU64::new(0),
            simulations_started: AtomicU64::new(0),
            simulations_completed: AtomicU64::new(0),
            simulations_failed: AtomicU64::new(0),
            simulations_cancelled: AtomicU64::new(0),
            results_discarded: AtomicU64::new(0),
            requests_refused: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub calendar: NyseCalendar,
    /// "Today" for every valuation context, fixed when the process starts
    pub session_base_date: NaiveDate,

    // Engine -> Clients: latest snapshot (watch = single producer, multi consumer)
    pub snapshot_tx: watch::Sender<EngineSnapshot>,
    pub snapshot_rx: watch::Receiver<EngineSnapshot>,

    // Engine -> Clients: lifecycle stream (broadcast for WS clients)
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Routes/Workers -> Engine: bounded event channel
    pub engine_tx: mpsc::Sender<EngineEvent>,

    // Routes -> DB Writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    // Lock-free performance counters
    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        session_base_date: NaiveDate,
        engine_tx: mpsc::Sender<EngineEvent>,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

        Arc::new(Self {
            config,
            db,
            calendar: NyseCalendar::new(),
            session_base_date,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            engine_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        PerfCounters::bump(&self.counters.ws_messages_sent);
        let _ = self.ws_tx.send(msg);
    }

    pub fn simulation_defaults(&self) -> SimulationDefaults {
        SimulationDefaults {
            path_count: self.config.default_path_count,
            bin_count: self.config.default_bin_count,
            seed: self.config.seed,
        }
    }
}
