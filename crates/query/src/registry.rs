use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::Serialize;
use telemorph_core::error::{Result, TelemorphError};

use crate::ast::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    InstantVector,
    RangeVector,
    Scalar,
    String,
}

impl ValueShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstantVector => "instant_vector",
            Self::RangeVector => "range_vector",
            Self::Scalar => "scalar",
            Self::String => "string",
        }
    }
}

/// Declaration of a callable function. Execution lives in the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub args: &'static [ValueShape],
    pub returns: ValueShape,
    /// Also usable as `op(expr) by (...)`.
    pub aggregation: bool,
    pub description: &'static str,
}

const INSTANT: &[ValueShape] = &[ValueShape::InstantVector];
const RANGE: &[ValueShape] = &[ValueShape::RangeVector];

const fn function(
    name: &'static str,
    args: &'static [ValueShape],
    returns: ValueShape,
    aggregation: bool,
    description: &'static str,
) -> FunctionSpec {
    FunctionSpec {
        name,
        args,
        returns,
        aggregation,
        description,
    }
}

const BUILTINS: &[FunctionSpec] = &[
    function("rate", RANGE, ValueShape::InstantVector, false, "per-second rate of increase over the range"),
    function("increase", RANGE, ValueShape::InstantVector, false, "increase over the range"),
    function("sum", INSTANT, ValueShape::InstantVector, true, "sum of values at each timestamp"),
    function("avg", INSTANT, ValueShape::InstantVector, true, "average of values at each timestamp"),
    function("count", INSTANT, ValueShape::InstantVector, true, "number of series"),
    function("min", INSTANT, ValueShape::InstantVector, true, "smallest value across all points"),
    function("max", INSTANT, ValueShape::InstantVector, true, "largest value across all points"),
    function("abs", INSTANT, ValueShape::InstantVector, false, "absolute value"),
    function("ceil", INSTANT, ValueShape::InstantVector, false, "round up to the nearest integer"),
    function("floor", INSTANT, ValueShape::InstantVector, false, "round down to the nearest integer"),
    function("round", INSTANT, ValueShape::InstantVector, false, "round to the nearest integer"),
    function("timestamp", INSTANT, ValueShape::InstantVector, false, "sample timestamp in unix seconds"),
    function("time", &[], ValueShape::Scalar, false, "evaluation time in unix seconds"),
];

static BUILTIN: LazyLock<Registry> = LazyLock::new(|| {
    let mut registry = Registry::default();
    for spec in BUILTINS {
        registry.register(*spec);
    }
    registry
});

/// Catalog of known functions, used for validation and introspection.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    functions: BTreeMap<&'static str, FunctionSpec>,
}

impl Registry {
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    /// Adds or replaces a declaration.
    pub fn register(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.name, spec);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    /// Sorted by name.
    pub fn list(&self) -> Vec<FunctionSpec> {
        self.functions.values().copied().collect()
    }

    pub fn is_aggregation(&self, name: &str) -> bool {
        self.get(name).is_some_and(|spec| spec.aggregation)
    }

    /// Checks that every named function exists and gets the argument shape it
    /// declares.
    pub fn validate(&self, query: &Query) -> Result<()> {
        match &query.function {
            Some(name) => {
                let spec = self
                    .get(name)
                    .ok_or_else(|| TelemorphError::UnsupportedFunction(name.clone()))?;
                match spec.args.first() {
                    None if !query.metric_name.is_empty() => {
                        return Err(TelemorphError::parse(name, "takes no arguments"));
                    }
                    None => {}
                    Some(_) if query.metric_name.is_empty() => {
                        return Err(TelemorphError::parse(name, "requires an argument"));
                    }
                    Some(ValueShape::RangeVector) if query.range.is_none() => {
                        return Err(TelemorphError::parse(
                            name,
                            "expects a range vector argument, e.g. metric[5m]",
                        ));
                    }
                    Some(ValueShape::InstantVector) if query.range.is_some() => {
                        return Err(TelemorphError::parse(
                            name,
                            "expects an instant vector argument",
                        ));
                    }
                    Some(_) => {}
                }
            }
            None if query.metric_name.is_empty() => {
                return Err(TelemorphError::parse("", "metric name is required"));
            }
            None => {}
        }

        if let Some(agg) = &query.aggregation {
            if !self.is_aggregation(&agg.operation) {
                return Err(TelemorphError::UnsupportedFunction(agg.operation.clone()));
            }
            let input = match &query.function {
                Some(name) => self.get(name).map(|spec| spec.returns),
                None if query.range.is_some() => Some(ValueShape::RangeVector),
                None => Some(ValueShape::InstantVector),
            };
            if input != Some(ValueShape::InstantVector) {
                return Err(TelemorphError::parse(
                    &agg.operation,
                    "can only aggregate an instant vector",
                ));
            }
        }
        Ok(())
    }
}
