use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremaKind {
    Support,
    Resistance,
}

impl ExtremaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtremaKind::Support => "support",
            ExtremaKind::Resistance => "resistance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremaPoint {
    pub index: usize,
    pub date: DateTime<Utc>,
    pub price: f64,
    pub kind: ExtremaKind,
}

/// Which column of the execution bar a signal fills at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOn {
    Open,
    Close,
}

impl TradeOn {
    pub fn price(self, bar: &Bar) -> f64 {
        match self {
            TradeOn::Open => bar.open,
            TradeOn::Close => bar.close,
        }
    }
}

impl FromStr for TradeOn {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(TradeOn::Open),
            "close" => Ok(TradeOn::Close),
            other => Err(EngineError::config(format!(
                "trade_on must be Open or Close (value: {})",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Short,
    Cover,
    None,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Short => "short",
            SignalAction::Cover => "cover",
            SignalAction::None => "none",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalAction::None)
    }
}

impl FromStr for SignalAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "short" => Ok(SignalAction::Short),
            "cover" => Ok(SignalAction::Cover),
            "none" | "" => Ok(SignalAction::None),
            other => Err(EngineError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub detected_date: DateTime<Utc>,
    pub detected_index: usize,
    pub execution_date: DateTime<Utc>,
    pub execution_index: usize,
    pub kind: ExtremaKind,
    pub action: SignalAction,
    pub execution_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long exposure, -1 for short exposure.
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Closed,
    Open,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedTrade {
    pub side: PositionSide,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_date: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    pub gross_pnl: f64,
    pub entry_commission: f64,
    pub exit_commission: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub capital_after: f64,
    pub status: TradeStatus,
}

impl MatchedTrade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Signed share count used for mark-to-market.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }

    pub fn holding_days(&self) -> f64 {
        (self.exit_date - self.entry_date).num_seconds() as f64 / 86_400.0
    }
}

/// A signal that did not turn into a fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSignal {
    pub date: DateTime<Utc>,
    pub action: SignalAction,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: DateTime<Utc>,
    pub capital: f64,
}

/// One evaluated grid cell. Failed cells score negative infinity, which is
/// written as `null` and read back as negative infinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub past_window: usize,
    pub trade_window: usize,
    #[serde(with = "cell_score")]
    pub objective: f64,
    pub final_capital: Option<f64>,
    pub total_trades: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl OptimizationResult {
    pub fn failed(past_window: usize, trade_window: usize, error: String) -> Self {
        Self {
            past_window,
            trade_window,
            objective: f64::NEG_INFINITY,
            final_capital: None,
            total_trades: 0,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some() || !self.objective.is_finite()
    }
}

mod cell_score {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        value.is_finite().then_some(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}
