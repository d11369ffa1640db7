use crate::config::BacktestConfig;
use crate::data::PriceSeries;
use crate::error::EngineResult;
use crate::models::{
    MatchedTrade, PositionSide, RejectedSignal, SignalAction, SignalEvent, TradeStatus,
};
use chrono::{DateTime, Utc};
use log::{debug, warn};

const LOT_EPSILON: f64 = 1e-9;

/// Rounds `quantity` down to a whole number of lots.
pub fn round_to_lot(quantity: f64, lot_size: f64) -> f64 {
    if !quantity.is_finite() || quantity <= 0.0 || lot_size <= 0.0 {
        return 0.0;
    }
    let lots = (quantity / lot_size + LOT_EPSILON).floor();
    if lots <= 0.0 {
        0.0
    } else {
        lots * lot_size
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FillOutcome {
    Executed,
    Skipped { reason: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub side: PositionSide,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_commission: f64,
    pub capital_before_entry: f64,
}

impl OpenPosition {
    fn gross_pnl(&self, exit_price: f64) -> f64 {
        self.side.sign() * self.quantity * (exit_price - self.entry_price)
    }

    fn into_trade(
        self,
        exit_date: DateTime<Utc>,
        exit_price: f64,
        exit_commission: f64,
        status: TradeStatus,
    ) -> MatchedTrade {
        let gross_pnl = self.gross_pnl(exit_price);
        let commission = self.entry_commission + exit_commission;
        let net_pnl = gross_pnl - commission;
        MatchedTrade {
            side: self.side,
            entry_date: self.entry_date,
            entry_price: self.entry_price,
            exit_date,
            exit_price,
            quantity: self.quantity,
            gross_pnl,
            entry_commission: self.entry_commission,
            exit_commission,
            commission,
            net_pnl,
            capital_after: self.capital_before_entry + net_pnl,
            status,
        }
    }
}

/// Result of replaying a signal stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub initial_capital: f64,
    pub trades: Vec<MatchedTrade>,
    pub rejected: Vec<RejectedSignal>,
    /// Realized capital: closed trades settled and the entry commission of
    /// any open position already paid.
    pub capital: f64,
    pub open_position: Option<OpenPosition>,
}

impl SimulationOutcome {
    /// Values a trailing position at the last bar's close and records it as
    /// an `Open` trade with no exit commission. Returns the synthetic trade.
    pub fn mark_open_position(&mut self, series: &PriceSeries) -> Option<&MatchedTrade> {
        let last_bar = series.last()?;
        let position = self.open_position.take()?;
        let trade = position.into_trade(last_bar.date, last_bar.close, 0.0, TradeStatus::Open);
        debug!(
            "Marked open {} position of {} at {:.4} on {} (net {:.4})",
            trade.side.as_str(),
            trade.quantity,
            trade.exit_price,
            trade.exit_date.to_rfc3339(),
            trade.net_pnl
        );
        self.trades.push(trade);
        self.trades.last()
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &MatchedTrade> {
        self.trades.iter().filter(|trade| !trade.is_open())
    }

    /// Net PnL of closed trades only.
    pub fn total_realized_pnl(&self) -> f64 {
        self.closed_trades().map(|trade| trade.net_pnl).sum()
    }

    /// Initial capital plus the net PnL of every trade, open ones included.
    pub fn portfolio_value(&self) -> f64 {
        self.initial_capital + self.trades.iter().map(|trade| trade.net_pnl).sum::<f64>()
    }
}

/// Position state machine that turns signal events into matched trades.
///
/// One position at a time. Entries are sized from current capital and rounded
/// down to the lot size. Both legs pay `max(price * qty * rate, min_commission)`.
pub struct TradeSimulator {
    config: BacktestConfig,
}

impl TradeSimulator {
    pub fn new(config: BacktestConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn commission(&self, price: f64, quantity: f64) -> f64 {
        (price * quantity * self.config.commission_rate).max(self.config.min_commission)
    }

    pub fn run(&self, events: &[SignalEvent]) -> SimulationOutcome {
        let mut outcome = SimulationOutcome {
            initial_capital: self.config.initial_capital,
            trades: Vec::new(),
            rejected: Vec::new(),
            capital: self.config.initial_capital,
            open_position: None,
        };

        for event in events {
            let fill = match event.action {
                SignalAction::None => continue,
                SignalAction::Buy => self.execute_entry(&mut outcome, event, PositionSide::Long),
                SignalAction::Short => {
                    if self.config.allow_short_selling {
                        self.execute_entry(&mut outcome, event, PositionSide::Short)
                    } else {
                        FillOutcome::Skipped {
                            reason: "short_selling_disabled",
                        }
                    }
                }
                SignalAction::Sell => self.execute_exit(&mut outcome, event, PositionSide::Long),
                SignalAction::Cover => self.execute_exit(&mut outcome, event, PositionSide::Short),
            };

            if let FillOutcome::Skipped { reason } = fill {
                warn!(
                    "Rejected {} signal on {} at {:.4}: {}",
                    event.action.as_str(),
                    event.execution_date.to_rfc3339(),
                    event.execution_price,
                    reason
                );
                outcome.rejected.push(RejectedSignal {
                    date: event.execution_date,
                    action: event.action,
                    reason: reason.to_string(),
                });
            }
        }

        outcome
    }

    fn execute_entry(
        &self,
        outcome: &mut SimulationOutcome,
        event: &SignalEvent,
        side: PositionSide,
    ) -> FillOutcome {
        if outcome.open_position.is_some() {
            return FillOutcome::Skipped {
                reason: "position_already_open",
            };
        }
        let price = event.execution_price;
        if !price.is_finite() || price <= 0.0 {
            return FillOutcome::Skipped {
                reason: "invalid_price",
            };
        }

        let quantity = round_to_lot(outcome.capital / price, self.config.lot_size);
        if quantity <= 0.0 {
            return FillOutcome::Skipped {
                reason: "insufficient_lot_size",
            };
        }

        let entry_commission = self.commission(price, quantity);
        let capital_before_entry = outcome.capital;
        outcome.capital -= entry_commission;
        outcome.open_position = Some(OpenPosition {
            side,
            entry_date: event.execution_date,
            entry_price: price,
            quantity,
            entry_commission,
            capital_before_entry,
        });
        FillOutcome::Executed
    }

    fn execute_exit(
        &self,
        outcome: &mut SimulationOutcome,
        event: &SignalEvent,
        side: PositionSide,
    ) -> FillOutcome {
        let position = match outcome.open_position.take() {
            Some(position) if position.side == side => position,
            other => {
                outcome.open_position = other;
                return FillOutcome::Skipped {
                    reason: "no_open_position",
                };
            }
        };

        let exit_commission = self.commission(event.execution_price, position.quantity);
        let trade = position.into_trade(
            event.execution_date,
            event.execution_price,
            exit_commission,
            TradeStatus::Closed,
        );
        outcome.capital = trade.capital_after;
        outcome.trades.push(trade);
        FillOutcome::Executed
    }
}
