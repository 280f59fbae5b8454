//! Admission validation of `Runner` and `RunnerReplicaSet` objects.
use crate::crd::replica_set::RunnerReplicaSet;
use crate::crd::runner::{Runner, RunnerSpec};
use crate::policy::{self, error::PolicyError};
use actix_web::{web, HttpResponse};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(String),

    #[error("{0} is immutable")]
    Immutable(String),

    #[error("{field}: {source}")]
    Policy {
        field: String,
        #[source]
        source: PolicyError,
    },

    #[error("spec.replicas must not be negative, got {0}")]
    NegativeReplicas(i32),
}

fn validate_spec(prefix: &str, spec: &RunnerSpec) -> Result<(), ValidationError> {
    if spec.repository.owner.is_empty() {
        return Err(ValidationError::Empty(format!("{prefix}.repository.owner")));
    }
    if spec.repository.name.is_empty() {
        return Err(ValidationError::Empty(format!("{prefix}.repository.name")));
    }
    policy::validate(&spec.policy).map_err(|source| ValidationError::Policy {
        field: format!("{prefix}.policy"),
        source,
    })
}

fn validate_immutables(prefix: &str, old: &RunnerSpec, new: &RunnerSpec) -> Result<(), ValidationError> {
    if old.labels != new.labels {
        return Err(ValidationError::Immutable(format!("{prefix}.labels")));
    }
    if old.repository != new.repository {
        return Err(ValidationError::Immutable(format!("{prefix}.repository")));
    }
    Ok(())
}

pub fn validate_runner(runner: &Runner) -> Result<(), ValidationError> {
    validate_spec("spec", &runner.spec)
}

pub fn validate_runner_update(old: &Runner, new: &Runner) -> Result<(), ValidationError> {
    validate_immutables("spec", &old.spec, &new.spec)?;
    validate_runner(new)
}

pub fn validate_replica_set(replica_set: &RunnerReplicaSet) -> Result<(), ValidationError> {
    if replica_set.spec.replicas < 0 {
        return Err(ValidationError::NegativeReplicas(replica_set.spec.replicas));
    }
    validate_spec("spec.template.spec", &replica_set.spec.template.spec)
}

/// Template identity changes are allowed: the controller replaces the children.
pub fn validate_replica_set_update(
    _old: &RunnerReplicaSet,
    new: &RunnerReplicaSet,
) -> Result<(), ValidationError> {
    validate_replica_set(new)
}

fn review<K>(
    review: AdmissionReview<K>,
    validate: impl Fn(Option<&K>, &K) -> Result<(), ValidationError>,
) -> AdmissionReview<DynamicObject>
where
    K: Resource + DeserializeOwned,
{
    let request: AdmissionRequest<K> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            warn!("invalid admission review: {err}");
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };
    let response = AdmissionResponse::from(&request);

    let result = match (&request.operation, request.object.as_ref()) {
        (Operation::Create | Operation::Update, Some(object)) => {
            validate(request.old_object.as_ref(), object)
        }
        _ => Ok(()),
    };
    match result {
        Ok(()) => {
            debug!(name = %request.name, operation = ?request.operation, "admitted");
            response.into_review()
        }
        Err(err) => {
            info!(name = %request.name, operation = ?request.operation, "rejected: {err}");
            response.deny(err.to_string()).into_review()
        }
    }
}

fn review_runner(review_request: AdmissionReview<Runner>) -> AdmissionReview<DynamicObject> {
    review(review_request, |old, new| match old {
        Some(old) => validate_runner_update(old, new),
        None => validate_runner(new),
    })
}

fn review_replica_set(
    review_request: AdmissionReview<RunnerReplicaSet>,
) -> AdmissionReview<DynamicObject> {
    review(review_request, |old, new| match old {
        Some(old) => validate_replica_set_update(old, new),
        None => validate_replica_set(new),
    })
}

pub async fn runner_handler(body: web::Json<AdmissionReview<Runner>>) -> HttpResponse {
    HttpResponse::Ok().json(review_runner(body.into_inner()))
}

pub async fn replica_set_handler(
    body: web::Json<AdmissionReview<RunnerReplicaSet>>,
) -> HttpResponse {
    HttpResponse::Ok().json(review_replica_set(body.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::replica_set::tests::replica_set;
    use crate::crd::runner::tests::runner;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use serde_json::{json, Value};
    use tracing_test::traced_test;

    fn admission(operation: &str, object: Value, old_object: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "8f1c3a1e-1111-4d8e-9a56-0c7b8b7a1f00",
                "kind": {"group": "inloco.com.br", "version": "v1alpha1", "kind": "Runner"},
                "resource": {"group": "inloco.com.br", "version": "v1alpha1", "resource": "runners"},
                "name": "r",
                "namespace": "a",
                "operation": operation,
                "userInfo": {"username": "someone"},
                "object": object,
                "oldObject": old_object,
                "dryRun": false
            }
        })
    }

    #[test]
    fn test_valid_runner() {
        assert_eq!(validate_runner(&runner("a", "r")), Ok(()));
    }

    #[rstest]
    #[case::owner("", "r", "spec.repository.owner")]
    #[case::name("o", "", "spec.repository.name")]
    fn test_empty_repository(#[case] owner: &str, #[case] name: &str, #[case] field: &str) {
        let mut runner = runner("a", "r");
        runner.spec.repository.owner = owner.to_string();
        runner.spec.repository.name = name.to_string();
        assert_eq!(
            validate_runner(&runner),
            Err(ValidationError::Empty(field.to_string()))
        );
    }

    #[test]
    fn test_invalid_policy() {
        let mut runner = runner("a", "r");
        runner.spec.policy.must = vec!["github.ref ==".to_string()];
        assert_matches!(
            validate_runner(&runner),
            Err(ValidationError::Policy { field, .. }) if field == "spec.policy"
        );
    }

    #[test]
    fn test_immutable_labels() {
        let mut old = runner("a", "r");
        old.spec.labels = vec!["x".to_string()];
        let mut new = old.clone();
        new.spec.labels = vec!["y".to_string()];

        let err = validate_runner_update(&old, &new).unwrap_err();
        assert_eq!(err, ValidationError::Immutable("spec.labels".to_string()));
        assert_eq!(err.to_string(), "spec.labels is immutable");
    }

    #[test]
    fn test_immutable_repository() {
        let old = runner("a", "r");
        let mut new = old.clone();
        new.spec.repository.name = "other".to_string();
        assert_eq!(
            validate_runner_update(&old, &new),
            Err(ValidationError::Immutable("spec.repository".to_string()))
        );
    }

    #[test]
    fn test_mutable_fields_can_change() {
        let old = runner("a", "r");
        let mut new = old.clone();
        new.spec.version = Some("v2.0.0".to_string());
        new.spec.policy.must = vec!["exists(github)".to_string()];
        assert_eq!(validate_runner_update(&old, &new), Ok(()));
    }

    #[test]
    fn test_replica_set() {
        assert_eq!(validate_replica_set(&replica_set(2)), Ok(()));
        assert_eq!(
            validate_replica_set(&replica_set(-1)),
            Err(ValidationError::NegativeReplicas(-1))
        );

        let mut invalid = replica_set(1);
        invalid.spec.template.spec.repository.owner.clear();
        assert_eq!(
            validate_replica_set(&invalid),
            Err(ValidationError::Empty(
                "spec.template.spec.repository.owner".to_string()
            ))
        );

        let mut relabelled = replica_set(1);
        relabelled.spec.template.spec.labels = vec!["other".to_string()];
        assert_eq!(validate_replica_set_update(&replica_set(1), &relabelled), Ok(()));
    }

    #[test]
    #[traced_test]
    fn test_review_rejects_immutable_update() {
        let mut old = runner("a", "r");
        old.spec.labels = vec!["x".to_string()];
        let mut new = old.clone();
        new.spec.labels = vec!["y".to_string()];
        let request = admission(
            "UPDATE",
            serde_json::to_value(&new).unwrap(),
            serde_json::to_value(&old).unwrap(),
        );

        let reviewed = review_runner(serde_json::from_value(request).unwrap());
        let response = reviewed.response.unwrap();
        assert!(!response.allowed);
        assert!(response.result.message.contains("spec.labels"));
        assert!(logs_contain("rejected: spec.labels is immutable"));
    }

    #[test]
    fn test_review_admits_creation_and_deletion() {
        let object = serde_json::to_value(runner("a", "r")).unwrap();
        let created = review_runner(
            serde_json::from_value(admission("CREATE", object.clone(), Value::Null)).unwrap(),
        );
        assert!(created.response.unwrap().allowed);

        let deleted =
            review_runner(serde_json::from_value(admission("DELETE", Value::Null, object)).unwrap());
        assert!(deleted.response.unwrap().allowed);
    }
}
