//! Input and output attribute validation stages
//!
//! Validators are an explicit mapping from field name to function,
//! populated when the operation is declared. Input validation runs against
//! argument values before the body; output validation runs against the raw
//! result before projection. A non-record value reaching output validation
//! is an internal invariant violation.

use serde_json::Value;

use crate::error::{Error, Result};

use super::{Next, Request, Stage};

/// Validates one field value
pub type FieldValidator = fn(&Value) -> Result<()>;

pub(super) struct InputValidateStage {
    validators: Vec<(String, FieldValidator)>,
}

impl InputValidateStage {
    pub(super) fn new(validators: Vec<(String, FieldValidator)>) -> Self {
        Self { validators }
    }
}

impl Stage for InputValidateStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        for (field, validator) in &self.validators {
            if let Some(value) = req.args.get(field) {
                validator(value)?;
            }
        }
        next.run(req)
    }
}

pub(super) struct OutputValidateStage {
    validators: Vec<(String, FieldValidator)>,
}

impl OutputValidateStage {
    pub(super) fn new(validators: Vec<(String, FieldValidator)>) -> Self {
        Self { validators }
    }

    fn check(&self, value: &Value) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Array(items) => {
                for item in items {
                    self.check(item)?;
                }
                Ok(())
            }
            Value::Object(record) => {
                for (field, validator) in &self.validators {
                    if let Some(field_value) = record.get(field) {
                        validator(field_value)?;
                    }
                }
                Ok(())
            }
            other => Err(Error::invalid_response(format!(
                "response {} is not a record",
                other
            ))),
        }
    }
}

impl Stage for OutputValidateStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        let result = next.run(req)?;
        self.check(&result)?;
        Ok(result)
    }
}
