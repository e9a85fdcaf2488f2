//! Transactional execution stage
//!
//! Opens a transactional scope for the operation body; nested executor
//! calls join it. Commit on success, rollback when any inner stage or the
//! body errors.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::store::MemoryStore;

use super::{Next, Request, Stage};

pub(super) struct TransactStage {
    store: Arc<MemoryStore>,
}

impl TransactStage {
    pub(super) fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl Stage for TransactStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        self.store.transaction(|| next.run(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::EntityKind;
    use crate::pipeline::{PipelineBuilder, Request, RequestContext, UserContext};
    use crate::query::Filters;
    use serde_json::json;

    #[test]
    fn test_body_error_rolls_back_writes() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = PipelineBuilder::new().transactional(store.clone()).build();

        let body_store = store.clone();
        let body = move |_req: &mut Request| -> Result<Value> {
            body_store.insert(
                EntityKind::Host,
                json!({"name": "a"}).as_object().cloned().unwrap(),
            )?;
            Err(Error::invalid_parameter("late failure"))
        };

        let err = pipeline
            .execute(
                RequestContext::new(UserContext::admin(1, "root@local")),
                Filters::new(),
                &body,
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
        assert!(store.scan(EntityKind::Host).unwrap().is_empty());
    }
}
