//! Job admission policy of a runner.
//!
//! A job is materialised only when every `must` rule evaluates to `true` and no `mustNot`
//! rule does. A rule that fails to parse or evaluate, or yields anything but a boolean,
//! counts as not satisfied.
use crate::crd::runner::Policy;
use tracing::debug;

pub mod context;
pub mod error;
pub mod expression;

use context::{JobContext, Scalar};
use error::PolicyError;
use expression::Expression;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allowed,
    Blocked { rule: String, reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Whether `rule` holds for the context.
fn holds(rule: &str, context: &JobContext) -> Result<bool, PolicyError> {
    Ok(rule.parse::<Expression>()?.evaluate(context)? == Scalar::Bool(true))
}

pub fn evaluate(policy: &Policy, context: &JobContext) -> Verdict {
    for rule in &policy.must {
        match holds(rule, context) {
            Ok(true) => {}
            Ok(false) => {
                return Verdict::Blocked {
                    rule: rule.clone(),
                    reason: "must rule is not satisfied".to_string(),
                }
            }
            Err(err) => {
                return Verdict::Blocked {
                    rule: rule.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }
    for rule in &policy.must_not {
        match holds(rule, context) {
            Ok(true) => {
                return Verdict::Blocked {
                    rule: rule.clone(),
                    reason: "mustNot rule is satisfied".to_string(),
                }
            }
            Ok(false) => {}
            Err(err) => debug!(%rule, "ignoring mustNot rule: {err}"),
        }
    }
    Verdict::Allowed
}

/// Checks that every rule parses.
pub fn validate(policy: &Policy) -> Result<(), PolicyError> {
    policy
        .must
        .iter()
        .chain(&policy.must_not)
        .try_for_each(|rule| rule.parse::<Expression>().map(|_| ()))
}
