/// Domain-specific error types for the pricing and simulation engine.
/// Numeric degeneracies are clamped where they occur and never show up here.
/// What does show up is either a refusal the caller must surface (missing
/// parameters, nothing to simulate) or a fault scoped to a single run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid leg: {0}")]
    InvalidLeg(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no distribution parameters for {ticker}: fit parameters for this ticker before simulating")]
    MissingDistribution { ticker: String },

    #[error("nothing to simulate: simulated date equals base date")]
    NothingToSimulate,

    #[error("sampler fault: {0}")]
    Sampler(String),

    #[error("simulation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl EngineError {
    /// Refusals are user-facing states, not faults.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            EngineError::MissingDistribution { .. }
                | EngineError::NothingToSimulate
                | EngineError::InvalidRequest(_)
                | EngineError::InvalidLeg(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_distribution_message_is_actionable() {
        let e = EngineError::MissingDistribution { ticker: "QQQ".into() };
        let msg = e.to_string();
        assert!(msg.contains("QQQ"));
        assert!(msg.contains("fit parameters"));
        assert!(e.is_refusal());
    }

    #[test]
    fn test_sampler_fault_is_not_refusal() {
        assert!(!EngineError::Sampler("nan".into()).is_refusal());
        assert!(!EngineError::Cancelled.is_refusal());
    }
}
