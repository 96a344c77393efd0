//! Trade and state logging.
//!
//! Fills and position snapshots are appended to daily CSV files for
//! offline analysis. Both logs share one rotating writer; they differ
//! only in how a row is formatted.
//!
//! File naming: <prefix>_YYYYMMDD.csv, rotated at midnight UTC.

use crate::trades::{StateLog, TradeInfo};
use chrono::{NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// Append-only CSV sink that starts a fresh headed file each UTC day.
struct DailyCsv {
    dir: PathBuf,
    prefix: &'static str,
    header: &'static str,
    open_day: Option<NaiveDate>,
    out: Option<File>,
}

impl DailyCsv {
    fn new(dir: &str, prefix: &'static str, header: &'static str) -> Self {
        let dir = PathBuf::from(dir);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("could not create log directory {}: {e}", dir.display());
        }
        Self {
            dir,
            prefix,
            header,
            open_day: None,
            out: None,
        }
    }

    /// Append one row, switching to the current day's file first if the
    /// date rolled over. Write failures drop the handle and are retried
    /// on the next row.
    fn append(&mut self, row: &str) {
        let today = Utc::now().date_naive();
        if self.open_day != Some(today) {
            self.roll_over(today);
        }
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(out, "{row}").and_then(|_| out.flush()) {
            warn!("dropping {} log row: {e}", self.prefix);
            self.out = None;
        }
    }

    fn roll_over(&mut self, day: NaiveDate) {
        self.out = None;
        self.open_day = None;

        let path = self
            .dir
            .join(format!("{}_{}.csv", self.prefix, day.format("%Y%m%d")));
        let needs_header = !path.exists();

        let mut out = match OpenOptions::new().append(true).create(true).open(&path) {
            Ok(out) => out,
            Err(e) => {
                warn!("cannot open {}: {e}", path.display());
                return;
            }
        };
        if needs_header {
            if let Err(e) = writeln!(out, "{}", self.header) {
                warn!("cannot start {}: {e}", path.display());
                return;
            }
        }
        info!(file = %path.display(), "logging to daily csv");
        self.out = Some(out);
        self.open_day = Some(day);
    }
}

/// One row per fill.
pub struct TradeLogger {
    csv: DailyCsv,
}

impl TradeLogger {
    pub fn new(log_dir: &str) -> Self {
        Self {
            csv: DailyCsv::new(
                log_dir,
                "trades",
                "time,asset_buy,asset_sell,amount_buy,amount_sell,\
amount_buy_slip,amount_sell_slip,quad_cost,lin_cost,fees,fixed_fees,price,signal_bps,txid",
            ),
        }
    }

    pub fn log_trade(&mut self, info: &TradeInfo) {
        let trade = &info.trade;
        self.csv.append(&format!(
            "{},{},{},{},{},{},{},{:.3},{:.3},{:.3},{:.3},{:.10},{:.8},{}",
            trade.time.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            trade.asset_buy_id,
            trade.asset_sell_id,
            trade.asset_buy_amount.0,
            trade.asset_sell_amount.0,
            trade.asset_buy_amount_with_slippage.0,
            trade.asset_sell_amount_with_slippage.0,
            info.costs.quadratic_impact_cost,
            info.costs.linear_impact_cost,
            info.costs.fees,
            info.costs.fixed_fees,
            info.asa_price,
            info.signal_bps,
            trade.txid,
        ));
    }
}

/// One row per pair per trade tick.
pub struct StateLogger {
    csv: DailyCsv,
}

impl StateLogger {
    pub fn new(log_dir: &str) -> Self {
        Self {
            csv: DailyCsv::new(log_dir, "state", "time,b_position,r_id,r_position,impact_bps"),
        }
    }

    pub fn log_state(&mut self, state: &StateLog) {
        let time = state.time.format("%Y-%m-%dT%H:%M:%S%.6fZ");
        for pair in &state.pairs {
            self.csv.append(&format!(
                "{},{},{},{},{:.10}",
                time, state.b_position.0, pair.r_id, pair.r_position.0, pair.impact_bps,
            ));
        }
    }
}
