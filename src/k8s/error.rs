use kube::config::KubeconfigError;

#[derive(thiserror::Error, Debug)]
pub enum K8sError {
    #[error("the kube client returned an error: `{0}`")]
    Generic(#[from] kube::Error),

    #[error("it is not possible to read kubeconfig: `{0}`")]
    UnableToSetupClientKubeconfig(#[from] KubeconfigError),

    #[error("the {0} of the object is missing")]
    MissingMetadata(&'static str),

    #[error("failed to build status patch: {0}")]
    InvalidStatus(#[from] serde_json::Error),
}

impl K8sError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, K8sError::Generic(kube::Error::Api(response)) if response.code == 404)
    }
}
