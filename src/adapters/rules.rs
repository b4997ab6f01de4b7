//! Rule Executor Adapter
//!
//! Default executor for clusters without a rule engine. No rule resolves,
//! so a Migration naming a pre/post rule fails validation instead of
//! silently skipping the hook.

use async_trait::async_trait;

use crate::crd::Migration;
use crate::domain::ports::{RuleExecutor, RulePhase, TerminationSignal};
use crate::error::{Error, Result};

/// Rule executor for deployments without a rule engine.
#[derive(Debug, Clone, Default)]
pub struct NoopRuleExecutor;

impl NoopRuleExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuleExecutor for NoopRuleExecutor {
    async fn rule_exists(&self, _name: &str, _namespace: &str) -> Result<bool> {
        Ok(false)
    }

    async fn execute_rule(
        &self,
        name: &str,
        _phase: RulePhase,
        _migration: &Migration,
        namespace: &str,
    ) -> Result<Option<TerminationSignal>> {
        Err(Error::RuleNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }

    async fn perform_rule_recovery(&self, _migration: &Migration) -> Result<()> {
        Ok(())
    }
}
