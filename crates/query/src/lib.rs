//! PromQL-subset parsing, function catalog and evaluation over stored metrics.

pub mod ast;
pub mod engine;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod registry;
pub mod response;

pub use ast::{Aggregation, Grouping, Query};
pub use engine::{QueryEngine, WindowSpec};
pub use eval::{EvalWindow, Evaluator, SeriesSource};
pub use parser::parse;
pub use registry::{FunctionSpec, Registry, ValueShape};
pub use response::PromResponse;
