//! Argument renaming and keyword-set validation
//!
//! Each operation declares its accepted keywords as data: required keys,
//! optional keys, and ignored keys that are silently dropped before the
//! body runs (audit timestamps and the like). Anything else is rejected
//! with the offending keys listed.

use serde_json::Value;

use crate::error::{Error, Result};

use super::{Next, Request, Stage};

/// Declared keyword sets of one operation
#[derive(Debug, Clone, Copy)]
pub struct ArgSchema {
    /// Keys that must be present
    pub required: &'static [&'static str],
    /// Keys that may be present
    pub optional: &'static [&'static str],
    /// Keys dropped without reaching the operation body
    pub ignored: &'static [&'static str],
}

impl ArgSchema {
    /// Declare keyword sets
    pub const fn new(
        required: &'static [&'static str],
        optional: &'static [&'static str],
        ignored: &'static [&'static str],
    ) -> Self {
        Self {
            required,
            optional,
            ignored,
        }
    }

    /// A schema accepting no keywords at all
    pub const fn none() -> Self {
        Self {
            required: &[],
            optional: &[],
            ignored: &[],
        }
    }

    fn is_known(&self, key: &str) -> bool {
        self.required.contains(&key)
            || self.optional.contains(&key)
            || self.ignored.contains(&key)
    }
}

pub(super) struct RenameStage {
    mapping: Vec<(String, String)>,
}

impl RenameStage {
    pub(super) fn new(mapping: Vec<(String, String)>) -> Self {
        Self { mapping }
    }
}

impl Stage for RenameStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        for (from, to) in &self.mapping {
            if let Some(value) = req.args.remove(from) {
                req.args.insert(to.clone(), value);
            }
        }
        next.run(req)
    }
}

pub(super) struct ArgFilterStage {
    schema: ArgSchema,
}

impl ArgFilterStage {
    pub(super) fn new(schema: ArgSchema) -> Self {
        Self { schema }
    }
}

impl Stage for ArgFilterStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        let unsupported: Vec<&str> = req
            .args
            .keys()
            .map(String::as_str)
            .filter(|key| !self.schema.is_known(key))
            .collect();
        if !unsupported.is_empty() {
            return Err(Error::invalid_parameter(format!(
                "filter keys {:?} are not supported",
                unsupported
            )));
        }

        let missing: Vec<&str> = self
            .schema
            .required
            .iter()
            .copied()
            .filter(|key| !req.args.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::invalid_parameter(format!(
                "filter keys {:?} not found",
                missing
            )));
        }

        for key in self.schema.ignored {
            req.args.remove(*key);
        }
        next.run(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineBuilder, RequestContext, UserContext};
    use crate::query::Filters;
    use serde_json::json;

    fn args(value: Value) -> Filters {
        value.as_object().cloned().unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new(UserContext::admin(1, "root@local"))
    }

    fn echo(req: &mut Request) -> Result<Value> {
        Ok(Value::Object(req.args.clone()))
    }

    #[test]
    fn test_unsupported_keys_listed_exactly() {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], &["name"], &[]))
            .build();
        let err = pipeline
            .execute(ctx(), args(json!({"bogus": 1, "name": "a", "zzz": 2})), &echo)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bogus"));
        assert!(message.contains("zzz"));
        assert!(!message.contains("name"));
    }

    #[test]
    fn test_missing_required_keys_listed() {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&["filename"], &[], &[]))
            .build();
        let err = pipeline.execute(ctx(), Filters::new(), &echo).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
        assert!(err.to_string().contains("filename"));
    }

    #[test]
    fn test_ignored_keys_never_reach_the_body() {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], &["name"], &["id", "created_at"]))
            .build();
        let result = pipeline
            .execute(
                ctx(),
                args(json!({"name": "a", "id": 9, "created_at": "t"})),
                &echo,
            )
            .unwrap();
        assert_eq!(result, json!({"name": "a"}));
    }

    #[test]
    fn test_rename_applies_before_validation() {
        let pipeline = PipelineBuilder::new()
            .rename("os_config", "put_os_config")
            .args(ArgSchema::new(&["put_os_config"], &[], &[]))
            .build();
        let result = pipeline
            .execute(ctx(), args(json!({"os_config": {"a": 1}})), &echo)
            .unwrap();
        assert_eq!(result, json!({"put_os_config": {"a": 1}}));
    }
}
