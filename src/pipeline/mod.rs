//! Pipeline definitions and data-flow rules

pub mod definition;
pub mod rules;

pub use definition::{
    apply_cli_variables, load_pipeline, Pipeline, PipelineStep, RequestTemplate,
    StatusExpectation, StepExpectations,
};
pub use rules::{
    Comparator, Condition, ConditionRule, ExtractSource, ExtractionRule, InjectTarget,
    InjectionRule, JsonPath,
};
