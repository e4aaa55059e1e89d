use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::model::series::QueryResult;
use telemorph_core::time::{parse_time_or_relative, to_chrono};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span};

use crate::eval::{EvalWindow, Evaluator, SeriesSource};
use crate::parser::{parse, parse_duration};
use crate::registry::Registry;

/// Lookback used when a request names neither `start` nor a time range.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(60 * 60);

/// Time bounds as they arrive on a request, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSpec<'a> {
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
    pub time_range: Option<&'a str>,
    pub step: Option<&'a str>,
}

impl WindowSpec<'_> {
    /// `end` defaults to `now`; `start` defaults to `end` minus the time range
    /// (one hour when absent). `step` is validated but not used.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<EvalWindow> {
        if let Some(step) = present(self.step) {
            if parse_duration(step)?.is_zero() {
                return Err(TelemorphError::InvalidArgument(
                    "step must be positive".to_string(),
                ));
            }
        }
        let end = match present(self.end) {
            Some(text) => parse_time_or_relative(text)?,
            None => now,
        };
        let start = match present(self.start) {
            Some(text) => parse_time_or_relative(text)?,
            None => {
                let lookback = match present(self.time_range) {
                    Some(text) => parse_duration(text)?,
                    None => DEFAULT_LOOKBACK,
                };
                end - to_chrono(lookback)?
            }
        };
        EvalWindow::new(start, end)
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse, validate, evaluate.
#[derive(Clone)]
pub struct QueryEngine {
    registry: &'static Registry,
    evaluator: Evaluator,
    span: tracing::Span,
}

impl QueryEngine {
    pub fn new(source: Arc<dyn SeriesSource>, span: tracing::Span) -> Self {
        let eval_span = info_span!(parent: &span, "evaluator");
        Self {
            registry: Registry::builtin(),
            evaluator: Evaluator::new(source, eval_span),
            span,
        }
    }

    pub fn registry(&self) -> &'static Registry {
        self.registry
    }

    pub fn execute(
        &self,
        query: &str,
        window: EvalWindow,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let parsed = parse(query)?;
        self.registry.validate(&parsed)?;
        debug!(
            parent: &self.span,
            query,
            start = %window.start,
            end = %window.end,
            "evaluating query"
        );
        self.evaluator.evaluate(&parsed, window, cancel)
    }
}
