//! Per-series function and aggregation semantics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use telemorph_core::attr::Attributes;
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::model::series::{MetricSeries, SeriesPoint, series_key};

use crate::ast::{Aggregation, Grouping};

const FUNCTIONS: &[&str] = &["rate", "increase", "abs", "ceil", "floor", "round", "timestamp"];
const AGGREGATIONS: &[&str] = &["sum", "avg", "count", "min", "max"];

/// Fails for names [`apply`] cannot execute, so callers can refuse a query
/// before fetching any data.
pub fn ensure_function(name: &str) -> Result<()> {
    if FUNCTIONS.contains(&name) || AGGREGATIONS.contains(&name) {
        Ok(())
    } else {
        Err(TelemorphError::UnsupportedOperation(format!("function {name}")))
    }
}

pub fn ensure_aggregation(op: &str) -> Result<()> {
    if AGGREGATIONS.contains(&op) {
        Ok(())
    } else {
        Err(TelemorphError::UnsupportedOperation(format!("aggregation {op}")))
    }
}

/// Applies a non-aggregating function, or a bare aggregation, to every series.
pub fn apply(
    name: &str,
    series: Vec<MetricSeries>,
    range: Option<Duration>,
    at: DateTime<Utc>,
) -> Result<Vec<MetricSeries>> {
    match name {
        "rate" => {
            let range = require_range(name, range)?;
            Ok(series.into_iter().map(|s| rate(s, range)).collect())
        }
        "increase" => {
            let range = require_range(name, range)?;
            Ok(series.into_iter().map(|s| increase(s, range)).collect())
        }
        "abs" => Ok(map_values(series, |p| p.value.abs())),
        "ceil" => Ok(map_values(series, |p| p.value.ceil())),
        "floor" => Ok(map_values(series, |p| p.value.floor())),
        "round" => Ok(map_values(series, |p| p.value.round())),
        "timestamp" => Ok(map_values(series, |p| p.timestamp.timestamp() as f64)),
        "sum" | "avg" | "count" | "min" | "max" => aggregate(
            &Aggregation {
                operation: name.to_string(),
                grouping: Grouping::None,
            },
            series,
            at,
        ),
        other => Err(TelemorphError::UnsupportedOperation(format!(
            "function {other}"
        ))),
    }
}

fn require_range(name: &str, range: Option<Duration>) -> Result<Duration> {
    range.ok_or_else(|| {
        TelemorphError::UnsupportedOperation(format!("{name} without a range selector"))
    })
}

fn map_values(series: Vec<MetricSeries>, f: impl Fn(&SeriesPoint) -> f64) -> Vec<MetricSeries> {
    series
        .into_iter()
        .map(|mut s| {
            for point in &mut s.points {
                point.value = f(point);
            }
            s
        })
        .collect()
}

fn seconds(elapsed: Duration) -> f64 {
    match elapsed.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => elapsed.num_milliseconds() as f64 / 1e3,
    }
}

/// Per-second change against the latest point in `[t - range, t)`.
pub fn rate(mut series: MetricSeries, range: Duration) -> MetricSeries {
    let points = std::mem::take(&mut series.points);
    let mut out = Vec::with_capacity(points.len().saturating_sub(1));
    // Latest index with a timestamp strictly below points[j].
    let mut prev: Option<usize> = None;
    for j in 1..points.len() {
        if points[j - 1].timestamp < points[j].timestamp {
            prev = Some(j - 1);
        }
        let Some(k) = prev else {
            continue;
        };
        let elapsed = points[j].timestamp - points[k].timestamp;
        if elapsed > range {
            continue;
        }
        let secs = seconds(elapsed);
        if secs <= 0.0 {
            continue;
        }
        out.push(SeriesPoint {
            timestamp: points[j].timestamp,
            value: (points[j].value - points[k].value) / secs,
        });
    }
    series.points = out;
    series
}

/// Change against the latest point at or before `t - range`.
pub fn increase(mut series: MetricSeries, range: Duration) -> MetricSeries {
    let points = std::mem::take(&mut series.points);
    let mut out = Vec::with_capacity(points.len());
    let mut base: Option<usize> = None;
    let mut next = 0;
    for j in 0..points.len() {
        let window_start = points[j].timestamp - range;
        while next < points.len() && points[next].timestamp <= window_start {
            base = Some(next);
            next += 1;
        }
        match base {
            Some(k) if k < j => out.push(SeriesPoint {
                timestamp: points[j].timestamp,
                value: points[j].value - points[k].value,
            }),
            _ => {}
        }
    }
    series.points = out;
    series
}

/// Reduces series per group. Groups are emitted in label-key order.
pub fn aggregate(
    aggregation: &Aggregation,
    series: Vec<MetricSeries>,
    at: DateTime<Utc>,
) -> Result<Vec<MetricSeries>> {
    let op = aggregation.operation.as_str();
    ensure_aggregation(op)?;

    if series.is_empty() {
        if op == "count" && aggregation.grouping == Grouping::None {
            return Ok(vec![single_point("count", Attributes::new(), at, 0.0)]);
        }
        return Ok(Vec::new());
    }

    let mut groups: BTreeMap<String, (Attributes, Vec<MetricSeries>)> = BTreeMap::new();
    for s in series {
        let labels = aggregation.grouping.group_labels(&s.labels);
        groups
            .entry(series_key(&labels))
            .or_insert_with(|| (labels, Vec::new()))
            .1
            .push(s);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (labels, members) in groups.into_values() {
        let name = members
            .first()
            .map(|s| s.metric_name.clone())
            .unwrap_or_default();
        let reduced = match op {
            "sum" => Some(MetricSeries {
                metric_name: name,
                labels,
                points: sum_by_timestamp(&members, false),
            }),
            "avg" => Some(MetricSeries {
                metric_name: name,
                labels,
                points: sum_by_timestamp(&members, true),
            }),
            "count" => Some(single_point("count", labels, at, members.len() as f64)),
            "min" => reduce_values(&members, f64::min)
                .map(|v| single_point(&name, labels, at, v)),
            _ => reduce_values(&members, f64::max)
                .map(|v| single_point(&name, labels, at, v)),
        };
        out.extend(reduced);
    }
    Ok(out)
}

fn single_point(name: &str, labels: Attributes, at: DateTime<Utc>, value: f64) -> MetricSeries {
    MetricSeries {
        metric_name: name.to_string(),
        labels,
        points: vec![SeriesPoint {
            timestamp: at,
            value,
        }],
    }
}

/// Only series with a point at a timestamp contribute to it; a series'
/// first point wins when it repeats a timestamp.
fn sum_by_timestamp(members: &[MetricSeries], average: bool) -> Vec<SeriesPoint> {
    let mut totals: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for s in members {
        let mut last: Option<DateTime<Utc>> = None;
        for point in &s.points {
            if last == Some(point.timestamp) {
                continue;
            }
            last = Some(point.timestamp);
            let entry = totals.entry(point.timestamp).or_insert((0.0, 0));
            entry.0 += point.value;
            entry.1 += 1;
        }
    }
    totals
        .into_iter()
        .map(|(timestamp, (total, n))| SeriesPoint {
            timestamp,
            value: if average { total / n as f64 } else { total },
        })
        .collect()
}

fn reduce_values(members: &[MetricSeries], f: fn(f64, f64) -> f64) -> Option<f64> {
    members
        .iter()
        .flat_map(|s| s.points.iter().map(|p| p.value))
        .reduce(f)
}

/// The single-point series produced by `time()`.
pub fn time_series(at: DateTime<Utc>) -> MetricSeries {
    single_point("time", Attributes::new(), at, at.timestamp() as f64)
}
