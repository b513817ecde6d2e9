//! 能力层：外部能力的注册、执行（超时 + 审计）、保留能力 schema 与参数校验

pub mod executor;
pub mod registry;
pub mod schema;
pub mod validation;

pub use executor::CapabilityExecutor;
pub use registry::{Capability, CapabilityRegistry};
pub use schema::{reserved_specs, schema_value, ClarificationArgs, PlanArgs};
pub use validation::{
    ArgumentValidator, EditOperation, InsertPosition, ValidatedArgs, ValidationError,
};
