use crate::data::PriceSeries;
use crate::error::{EngineError, EngineResult};
use crate::models::{EquityPoint, MatchedTrade, TradeOn};
use serde::{Deserialize, Serialize};

/// Largest allowed gap between the curve's last value and the trade ledger.
pub const RECONCILIATION_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    pub points: Vec<EquityPoint>,
    pub buy_and_hold: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.capital).collect()
    }

    pub fn final_capital(&self) -> Option<f64> {
        self.points.last().map(|point| point.capital)
    }

    pub fn buy_and_hold_final(&self) -> Option<f64> {
        self.buy_and_hold.last().map(|point| point.capital)
    }

    /// Checks that the last curve value equals initial capital plus the net
    /// PnL of every trade, open ones included.
    pub fn reconcile(&self, trades: &[MatchedTrade], initial_capital: f64) -> EngineResult<()> {
        let expected = initial_capital + trades.iter().map(|trade| trade.net_pnl).sum::<f64>();
        let actual = self.final_capital().unwrap_or(initial_capital);
        if (expected - actual).abs() > RECONCILIATION_TOLERANCE || !actual.is_finite() {
            return Err(EngineError::Reconciliation { expected, actual });
        }
        Ok(())
    }
}

/// Replays the series bar by bar and marks every trade to market.
pub struct EquityCurveBuilder;

impl EquityCurveBuilder {
    pub fn build(
        series: &PriceSeries,
        trades: &[MatchedTrade],
        initial_capital: f64,
        trade_on: TradeOn,
    ) -> EngineResult<EquityCurve> {
        let bars = series.bars();
        if bars.is_empty() {
            return Ok(EquityCurve::default());
        }

        let mut deltas = vec![0.0_f64; bars.len()];
        for trade in trades {
            let entry = Self::bar_index(series, trade, trade.entry_date, "entry")?;
            let exit = Self::bar_index(series, trade, trade.exit_date, "exit")?;
            if exit < entry || (exit == entry && !trade.is_open()) {
                return Err(EngineError::InvalidSeries(format!(
                    "trade entered {} must exit after entry (exit {})",
                    trade.entry_date.to_rfc3339(),
                    trade.exit_date.to_rfc3339()
                )));
            }

            let shares = trade.signed_quantity();

            deltas[entry] -= trade.entry_commission;
            if trade_on == TradeOn::Open {
                deltas[entry] += shares * (bars[entry].close - bars[entry].open);
            }

            // Open trades are carried through the final bar at its close.
            let last_holding = if trade.is_open() { exit } else { exit - 1 };
            for t in entry + 1..=last_holding {
                deltas[t] += shares * (bars[t].close - bars[t - 1].close);
            }

            if !trade.is_open() {
                let exit_leg = match trade_on {
                    TradeOn::Close => bars[exit].close,
                    TradeOn::Open => bars[exit].open,
                };
                deltas[exit] += shares * (exit_leg - bars[exit - 1].close) - trade.exit_commission;
            }
        }

        let mut points = Vec::with_capacity(bars.len());
        let mut capital = initial_capital;
        for (bar, delta) in bars.iter().zip(deltas) {
            capital += delta;
            points.push(EquityPoint {
                date: bar.date,
                capital,
            });
        }

        let first_close = bars[0].close;
        let buy_and_hold = bars
            .iter()
            .map(|bar| EquityPoint {
                date: bar.date,
                capital: if first_close != 0.0 {
                    initial_capital * bar.close / first_close
                } else {
                    initial_capital
                },
            })
            .collect();

        Ok(EquityCurve {
            points,
            buy_and_hold,
        })
    }

    fn bar_index(
        series: &PriceSeries,
        trade: &MatchedTrade,
        date: chrono::DateTime<chrono::Utc>,
        leg: &str,
    ) -> EngineResult<usize> {
        series.index_of(date).ok_or_else(|| {
            EngineError::InvalidSeries(format!(
                "{} date {} of {} trade is not a bar in the series",
                leg,
                date.to_rfc3339(),
                trade.side.as_str()
            ))
        })
    }
}
