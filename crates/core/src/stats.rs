//! Aggregation of warehouse rows into an analysis summary.
//!
//! Data sources return loosely-typed tabular rows (JSON objects). Numeric
//! cells may arrive as JSON numbers or as strings (several warehouses return
//! `NUMERIC` as text), and any cell may be missing. Degenerate input never
//! produces an error here: empty samples aggregate to zeros and non-finite
//! intermediates are clamped to `0.0`, so `NaN`/`Infinity` can never reach
//! stored state.
//!
//! Recognised columns:
//!
//! | Column        | Meaning                                          |
//! |---------------|--------------------------------------------------|
//! | `count`       | sampled users in the row                         |
//! | `sum`         | sum of the per-user metric value                 |
//! | `sum_squares` | sum of squared per-user values (optional)        |
//! | `events`      | raw metric event count (optional)                |
//! | `date`        | day bucket (`YYYY-MM-DD` or RFC 3339), time series |
//! | `variation`   | experiment variation key, totals rows only       |
//! | `p`, `v`      | percentile rank and value, percentile rows       |

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// One tabular result row.
pub type Row = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Summary types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentile {
    pub p: f64,
    pub v: f64,
}

/// One bucket of the per-day time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatePoint {
    pub date: NaiveDate,
    pub value: f64,
    pub stddev: f64,
    pub users: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationSummary {
    pub variation: String,
    pub users: i64,
    pub average: f64,
    pub stddev: f64,
}

/// The aggregated statistical result for a metric or experiment.
///
/// Contains no timestamps so that recomputing over unchanged data yields an
/// identical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    pub users: i64,
    pub average: f64,
    pub stddev: f64,
    pub count: i64,
    #[serde(default)]
    pub percentiles: Vec<Percentile>,
    #[serde(default)]
    pub dates: Vec<DatePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<VariationSummary>,
}

/// Rows returned by the queries of one analysis run, grouped by purpose.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRows {
    pub totals: Vec<Row>,
    pub dates: Vec<Row>,
    pub percentiles: Vec<Row>,
}

impl AnalysisSummary {
    /// Aggregate raw rows. `binomial` metrics derive their variance from the
    /// conversion rate when the source does not report `sum_squares`.
    pub fn from_rows(rows: &AnalysisRows, binomial: bool, segment: Option<String>) -> Self {
        let mut overall = Moments::default();
        let mut by_variation: BTreeMap<String, Moments> = BTreeMap::new();

        for row in &rows.totals {
            let moments = Moments::from_row(row);
            overall.merge(&moments);
            if let Some(variation) = variation_key(row) {
                by_variation.entry(variation).or_default().merge(&moments);
            }
        }

        let mut by_date: BTreeMap<NaiveDate, Moments> = BTreeMap::new();
        for row in &rows.dates {
            if let Some(date) = row.get("date").and_then(parse_date) {
                by_date
                    .entry(date)
                    .or_default()
                    .merge(&Moments::from_row(row));
            }
        }

        let mut percentiles: Vec<Percentile> = rows
            .percentiles
            .iter()
            .filter_map(|row| {
                let p = number(row, "p")?;
                let v = number(row, "v")?;
                Some(Percentile { p, v })
            })
            .collect();
        percentiles.sort_by(|a, b| a.p.total_cmp(&b.p));

        Self {
            segment,
            users: overall.users,
            average: overall.mean(),
            stddev: overall.stddev(binomial),
            count: overall.events,
            percentiles,
            dates: by_date
                .into_iter()
                .map(|(date, m)| DatePoint {
                    date,
                    value: m.mean(),
                    stddev: m.stddev(binomial),
                    users: m.users,
                })
                .collect(),
            variations: by_variation
                .into_iter()
                .map(|(variation, m)| VariationSummary {
                    variation,
                    users: m.users,
                    average: m.mean(),
                    stddev: m.stddev(binomial),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Moments
// ---------------------------------------------------------------------------

/// Sufficient statistics for mean and variance, mergeable across rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub users: i64,
    pub events: i64,
    pub sum: f64,
    pub sum_squares: Option<f64>,
}

impl Moments {
    pub fn from_row(row: &Row) -> Self {
        let users = number(row, "count").map(to_count).unwrap_or(0);
        let events = number(row, "events").map(to_count).unwrap_or(users);
        Self {
            users,
            events,
            sum: number(row, "sum").unwrap_or(0.0),
            sum_squares: number(row, "sum_squares"),
        }
    }

    pub fn merge(&mut self, other: &Moments) {
        self.users = self.users.saturating_add(other.users);
        self.events = self.events.saturating_add(other.events);
        self.sum += other.sum;
        self.sum_squares = match (self.sum_squares, other.sum_squares) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
    }

    pub fn mean(&self) -> f64 {
        if self.users <= 0 {
            return 0.0;
        }
        finite(self.sum / self.users as f64)
    }

    /// Sample standard deviation.
    pub fn stddev(&self, binomial: bool) -> f64 {
        if self.users <= 1 {
            return 0.0;
        }
        let sum_squares = match (self.sum_squares, binomial) {
            (Some(ss), _) => ss,
            // 0/1 values square to themselves.
            (None, true) => self.sum,
            (None, false) => return 0.0,
        };
        let n = self.users as f64;
        let variance = (sum_squares - self.sum * self.sum / n) / (n - 1.0);
        finite(variance.max(0.0).sqrt())
    }
}

// ---------------------------------------------------------------------------
// Cell parsing
// ---------------------------------------------------------------------------

fn number(row: &Row, key: &str) -> Option<f64> {
    let value = match row.get(key)? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn to_count(value: f64) -> i64 {
    if value <= 0.0 {
        0
    } else {
        value.round() as i64
    }
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn variation_key(row: &Row) -> Option<String> {
    match row.get("variation")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_date(value: &serde_json::Value) -> Option<NaiveDate> {
    let s = value.as_str()?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}
