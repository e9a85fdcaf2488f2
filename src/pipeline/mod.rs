//! Request pipeline
//!
//! A fixed, composable ordering of cross-cutting stages wrapped around every
//! operation:
//!
//! 1. key renaming (caller-facing name to internal name)
//! 2. argument-filter validation (required/optional/ignored keyword sets)
//! 3. permission check
//! 4. transactional execution
//! 5. input attribute validation
//! 6. response record filters (outbound)
//! 7. response projection (outbound)
//! 8. output attribute validation (outbound, innermost)
//! 9. operation body
//!
//! Each stage is `(request, next) -> result`; the builder emits whatever
//! subset an operation declares in this canonical order, never in call
//! order. Seen from a returning body that means: validate the raw result,
//! project it, filter whole records, then commit.

pub mod args;
pub mod checks;
pub mod context;
pub mod permission;
pub mod project;
pub mod respond;
pub mod transact;
pub mod validate;

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::query::Filters;
use crate::store::MemoryStore;

use args::{ArgFilterStage, RenameStage};
use permission::PermissionStage;
use project::ProjectStage;
use respond::ResponseFilterStage;
use transact::TransactStage;
use validate::{InputValidateStage, OutputValidateStage};

pub use args::ArgSchema;
pub use context::{RequestContext, UserContext};
pub use permission::Permission;
pub use project::Projection;
pub use validate::FieldValidator;

/// A request travelling through the pipeline
pub struct Request {
    /// Caller identity and request metadata
    pub ctx: RequestContext,
    /// Keyword arguments; stages rename, validate and prune these in place
    pub args: Filters,
}

/// One cross-cutting stage wrapped around an operation
pub trait Stage: Send + Sync {
    /// Process the request, calling `next` to continue the chain
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value>;
}

/// The operation body at the center of the pipeline
pub trait Handler: Send + Sync {
    /// Execute the operation
    fn run(&self, req: &mut Request) -> Result<Value>;
}

impl<F> Handler for F
where
    F: Fn(&mut Request) -> Result<Value> + Send + Sync,
{
    fn run(&self, req: &mut Request) -> Result<Value> {
        self(req)
    }
}

/// Cursor over the remaining stages of a chain
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Run the next stage, or the operation body at the end of the chain
    pub fn run(self, req: &mut Request) -> Result<Value> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.apply(
                req,
                Next {
                    stages: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.run(req),
        }
    }
}

/// An ordered chain of stages around an operation body
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Execute an operation through the pipeline
    pub fn execute(
        &self,
        ctx: RequestContext,
        args: Filters,
        handler: &dyn Handler,
    ) -> Result<Value> {
        let mut req = Request { ctx, args };
        Next {
            stages: &self.stages,
            handler,
        }
        .run(&mut req)
    }

    /// Number of configured stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builds a pipeline from the stages an operation opts into.
///
/// The emitted stage order is always the canonical one above, regardless of
/// the order the builder methods are called in.
#[derive(Default)]
pub struct PipelineBuilder {
    renames: Vec<(String, String)>,
    schema: Option<ArgSchema>,
    permission: Option<Permission>,
    store: Option<Arc<MemoryStore>>,
    input_validators: Vec<(String, FieldValidator)>,
    response_filters: Option<(Vec<String>, bool)>,
    projection: Option<Projection>,
    output_validators: Vec<(String, FieldValidator)>,
}

impl PipelineBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a caller-facing argument name to an internal one
    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.renames.push((from.to_string(), to.to_string()));
        self
    }

    /// Declare the accepted keyword sets
    pub fn args(mut self, schema: ArgSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Require a capability of the caller
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    /// Run the body inside a transactional scope over `store`
    pub fn transactional(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate an input argument before the body runs
    pub fn validate_input(mut self, field: &str, validator: FieldValidator) -> Self {
        self.input_validators.push((field.to_string(), validator));
        self
    }

    /// Filter returned records by caller-supplied response predicates
    pub fn response_filters(mut self, fields: &[&str], missing_ok: bool) -> Self {
        self.response_filters = Some((
            fields.iter().map(|f| f.to_string()).collect(),
            missing_ok,
        ));
        self
    }

    /// Project the result down to an allow-list of fields
    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Validate a field of the raw result before projection
    pub fn validate_output(mut self, field: &str, validator: FieldValidator) -> Self {
        self.output_validators.push((field.to_string(), validator));
        self
    }

    /// Build the pipeline, emitting stages in canonical order
    pub fn build(self) -> Pipeline {
        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
        if !self.renames.is_empty() {
            stages.push(Arc::new(RenameStage::new(self.renames)));
        }
        if let Some(schema) = self.schema {
            stages.push(Arc::new(ArgFilterStage::new(schema)));
        }
        if let Some(permission) = self.permission {
            stages.push(Arc::new(PermissionStage::new(permission)));
        }
        if let Some(store) = self.store {
            stages.push(Arc::new(TransactStage::new(store)));
        }
        if !self.input_validators.is_empty() {
            stages.push(Arc::new(InputValidateStage::new(self.input_validators)));
        }
        if let Some((fields, missing_ok)) = self.response_filters {
            stages.push(Arc::new(ResponseFilterStage::new(fields, missing_ok)));
        }
        if let Some(projection) = self.projection {
            stages.push(Arc::new(ProjectStage::new(projection)));
        }
        if !self.output_validators.is_empty() {
            stages.push(Arc::new(OutputValidateStage::new(self.output_validators)));
        }
        Pipeline { stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_handler(req: &mut Request) -> Result<Value> {
        Ok(Value::Object(req.args.clone()))
    }

    #[test]
    fn test_empty_pipeline_runs_handler() {
        let pipeline = PipelineBuilder::new().build();
        let result = pipeline
            .execute(
                RequestContext::new(UserContext::admin(1, "root@local")),
                Filters::new(),
                &ok_handler,
            )
            .unwrap();
        assert_eq!(result, json!({}));
        assert_eq!(pipeline.stage_count(), 0);
    }

    #[test]
    fn test_stage_order_is_canonical_not_call_order() {
        // declared out of order on purpose
        let pipeline = PipelineBuilder::new()
            .project(Projection::new(&["name"]))
            .permission(Permission::ListHosts)
            .args(ArgSchema::new(&[], &["name"], &[]))
            .build();
        assert_eq!(pipeline.stage_count(), 3);

        // the argument check fires before the permission check: an
        // unauthorized caller with a bad keyword sees InvalidParameter
        let user = UserContext::new(2, "ops@local");
        let args: Filters = json!({"bogus": 1}).as_object().cloned().unwrap();
        let err = pipeline
            .execute(RequestContext::new(user), args, &ok_handler)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }
}
