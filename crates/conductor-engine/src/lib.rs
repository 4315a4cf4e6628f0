pub mod capabilities;
pub mod classifier;
pub mod conditions;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod templates;
pub mod validator;

pub use capabilities::CapabilityRegistry;
pub use classifier::KeywordClassifier;
pub use conditions::{Condition, ConditionRegistry};
pub use executor::Engine;
pub use pipeline::{Pipeline, PipelineOutput};
pub use planner::Planner;
pub use registry::{Template, TemplateRegistry};
