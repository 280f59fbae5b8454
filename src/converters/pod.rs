use super::owned_metadata;
use super::resources::container_resources;
use crate::config::ImageConfig;
use crate::crd::job::JobResource;
use crate::crd::runner::{Capability, Runner};
use crate::dot_files::{CREDENTIALS_FILE, RSA_PARAMS_FILE, RUNNER_FILE};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvFromSource, EnvVar,
    ExecAction, NodeSelectorRequirement, NodeSelectorTerm, PersistentVolumeClaimVolumeSource,
    Pod, PodSecurityContext, PodSpec, Probe, SecretVolumeSource, SecurityContext, Sysctl, Volume,
    VolumeMount,
};
use kube::ResourceExt;

pub const RUNNER_CONTAINER: &str = "runner";
pub const DIND_CONTAINER: &str = "dind";

pub const RUNNER_HOME: &str = "/opt/actions-runner";
pub const WORK_DIR: &str = "/opt/actions-runner/_work";
/// State of the rootless docker daemon.
pub const DOCKER_DATA_DIR: &str = "/home/rootless/.local/share/docker";
pub const DOCKER_HOST: &str = "tcp://localhost:2375";

const DOT_FILES_VOLUME: &str = "dot-files";
const RSA_PARAMS_VOLUME: &str = "rsa-params";
const WORK_VOLUME: &str = "work";
const WORK_SUB_PATH: &str = "work";
const DOCKER_SUB_PATH: &str = "docker";

const RUNNER_ID: i64 = 1000;
const PING_GROUP_RANGE_SYSCTL: &str = "net.ipv4.ping_group_range";
const PING_GROUP_RANGE: &str = "0 2147483647";

const OS_LABEL: &str = "kubernetes.io/os";
const ARCH_LABEL: &str = "kubernetes.io/arch";

/// Images and node constraints shared by every worker pod.
#[derive(Debug, Clone, PartialEq)]
pub struct PodConfig {
    pub runner_image: ImageConfig,
    pub dind_image: ImageConfig,
    pub arch: String,
}

/// Worker pod running the job assigned to `runner`, owned by its job resource.
pub fn to_pod(runner: &Runner, job: &JobResource, config: &PodConfig) -> Pod {
    let name = runner.name_any();
    let spec = &runner.spec;
    let secret = runner.has_capability(Capability::Secret);
    let docker = runner.has_capability(Capability::Docker);
    let persistent = runner.storage_request().is_some();

    let mut metadata = owned_metadata(job, &name);
    if !spec.annotations.is_empty() {
        metadata.annotations = Some(spec.annotations.clone());
    }

    let mut containers = vec![runner_container(runner, config, persistent, secret, docker)];
    if docker {
        containers.push(dind_container(runner, config, persistent));
    }

    let mut volumes = base_volumes(&name, persistent);
    volumes.extend(spec.volumes.iter().cloned());

    Pod {
        metadata,
        spec: Some(PodSpec {
            containers,
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            security_context: Some(security_context()),
            affinity: Some(node_affinity(spec.affinity.as_ref(), &config.arch)),
            tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
            node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
            automount_service_account_token: Some(secret),
            service_account_name: spec.service_account_name.clone().filter(|_| secret),
            ..Default::default()
        }),
        status: None,
    }
}

fn runner_container(
    runner: &Runner,
    config: &PodConfig,
    persistent: bool,
    secret: bool,
    docker: bool,
) -> Container {
    let spec = &runner.spec;

    let mut env: Vec<EnvVar> = spec
        .env
        .iter()
        .filter(|env| secret || !is_secret_env(env))
        .cloned()
        .collect();
    if docker {
        env.push(EnvVar {
            name: "DOCKER_HOST".to_string(),
            value: Some(DOCKER_HOST.to_string()),
            ..Default::default()
        });
    }
    let env_from: Vec<EnvFromSource> = spec
        .env_from
        .iter()
        .filter(|source| secret || source.secret_ref.is_none())
        .cloned()
        .collect();

    let mut volume_mounts = vec![
        dot_file_mount(DOT_FILES_VOLUME, RUNNER_FILE),
        dot_file_mount(DOT_FILES_VOLUME, CREDENTIALS_FILE),
        dot_file_mount(RSA_PARAMS_VOLUME, RSA_PARAMS_FILE),
        work_mount(WORK_DIR, persistent.then_some(WORK_SUB_PATH)),
    ];
    volume_mounts.extend(spec.volume_mounts.iter().cloned());

    Container {
        name: RUNNER_CONTAINER.to_string(),
        image: Some(config.runner_image.reference(spec.version.as_deref())),
        env: (!env.is_empty()).then_some(env),
        env_from: (!env_from.is_empty()).then_some(env_from),
        resources: container_resources(spec.resources.runner.as_ref()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn dind_container(runner: &Runner, config: &PodConfig, persistent: bool) -> Container {
    let mut volume_mounts = vec![work_mount(WORK_DIR, persistent.then_some(WORK_SUB_PATH))];
    if persistent {
        volume_mounts.push(work_mount(DOCKER_DATA_DIR, Some(DOCKER_SUB_PATH)));
    }

    Container {
        name: DIND_CONTAINER.to_string(),
        image: Some(config.dind_image.reference(None)),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(
                    ["nc", "-z", "127.0.0.1", "2375"]
                        .map(String::from)
                        .to_vec(),
                ),
            }),
            initial_delay_seconds: Some(3),
            ..Default::default()
        }),
        resources: container_resources(runner.spec.resources.docker.as_ref()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn is_secret_env(env: &EnvVar) -> bool {
    env.value_from
        .as_ref()
        .is_some_and(|source| source.secret_key_ref.is_some())
}

fn dot_file_mount(volume: &str, file: &str) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: format!("{RUNNER_HOME}/{file}"),
        sub_path: Some(file.to_string()),
        read_only: Some(true),
        ..Default::default()
    }
}

fn work_mount(path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: WORK_VOLUME.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(String::from),
        ..Default::default()
    }
}

fn base_volumes(name: &str, persistent: bool) -> Vec<Volume> {
    let work = if persistent {
        Volume {
            name: WORK_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: name.to_string(),
                read_only: None,
            }),
            ..Default::default()
        }
    } else {
        Volume {
            name: WORK_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }
    };

    vec![
        Volume {
            name: DOT_FILES_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: RSA_PARAMS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        work,
    ]
}

fn security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_user: Some(RUNNER_ID),
        run_as_group: Some(RUNNER_ID),
        fs_group: Some(RUNNER_ID),
        run_as_non_root: Some(true),
        sysctls: Some(vec![Sysctl {
            name: PING_GROUP_RANGE_SYSCTL.to_string(),
            value: PING_GROUP_RANGE.to_string(),
        }]),
        ..Default::default()
    }
}

/// The user affinity, with every required node selector term narrowed to linux nodes of
/// the configured architecture.
fn node_affinity(user: Option<&Affinity>, arch: &str) -> Affinity {
    let platform = [(OS_LABEL, "linux"), (ARCH_LABEL, arch)].map(|(key, value)| {
        NodeSelectorRequirement {
            key: key.to_string(),
            operator: "In".to_string(),
            values: Some(vec![value.to_string()]),
        }
    });

    let mut affinity = user.cloned().unwrap_or_default();
    let selector = affinity
        .node_affinity
        .get_or_insert_with(Default::default)
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(Default::default);
    if selector.node_selector_terms.is_empty() {
        selector.node_selector_terms.push(NodeSelectorTerm::default());
    }
    for term in selector.node_selector_terms.iter_mut() {
        term.match_expressions
            .get_or_insert_with(Vec::new)
            .extend(platform.iter().cloned());
    }
    affinity
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::converters::job::tests::job_resource;
    use crate::crd::runner::tests::runner;
    use crate::k8s::labels::RUNNER_LABEL_KEY;
    use k8s_openapi::api::core::v1::{
        EnvVarSource, NodeAffinity, NodeSelector, ResourceRequirements, SecretEnvSource,
        SecretKeySelector,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    pub(crate) fn pod_config() -> PodConfig {
        PodConfig {
            runner_image: ImageConfig {
                name: "inloco/kube-actions".to_string(),
                version: "v1.0.0".to_string(),
                variant: Some("runner".to_string()),
            },
            dind_image: ImageConfig {
                name: "inloco/kube-actions".to_string(),
                version: "v1.0.0".to_string(),
                variant: Some("dind".to_string()),
            },
            arch: "amd64".to_string(),
        }
    }

    fn pod(runner: &Runner) -> (Pod, PodSpec) {
        let pod = to_pod(runner, &job_resource(runner), &pod_config());
        let spec = pod.spec.clone().unwrap();
        (pod, spec)
    }

    fn secret_env() -> EnvVar {
        EnvVar {
            name: "TOKEN".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: "tokens".to_string(),
                    key: "token".to_string(),
                    optional: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn plain_env() -> EnvVar {
        EnvVar {
            name: "LEVEL".to_string(),
            value: Some("debug".to_string()),
            ..Default::default()
        }
    }

    fn secret_env_from() -> EnvFromSource {
        EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: "tokens".to_string(),
                optional: None,
            }),
            ..Default::default()
        }
    }

    fn storage(runner: &mut Runner) {
        runner.spec.resources.runner = Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity("10Gi".to_string()),
            )])),
            ..Default::default()
        });
    }

    #[test]
    fn test_minimal_pod() {
        let (pod, spec) = pod(&runner("a", "r"));

        assert_eq!(pod.metadata.name.as_deref(), Some("r"));
        assert_eq!(pod.metadata.labels.as_ref().unwrap()[RUNNER_LABEL_KEY], "r");
        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "JobResource");
        assert_eq!(owner.uid, "job-uid-r");

        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.automount_service_account_token, Some(false));
        assert_eq!(spec.containers.len(), 1);
        let runner = &spec.containers[0];
        assert_eq!(runner.name, RUNNER_CONTAINER);
        assert_eq!(
            runner.image.as_deref(),
            Some("inloco/kube-actions:v1.0.0-runner")
        );
        let mounts: Vec<(&str, Option<&str>)> = runner
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|mount| (mount.mount_path.as_str(), mount.sub_path.as_deref()))
            .collect();
        assert_eq!(
            mounts,
            vec![
                ("/opt/actions-runner/.runner", Some(".runner")),
                ("/opt/actions-runner/.credentials", Some(".credentials")),
                (
                    "/opt/actions-runner/.credentials_rsaparams",
                    Some(".credentials_rsaparams")
                ),
                ("/opt/actions-runner/_work", None),
            ]
        );

        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes[0].config_map.as_ref().unwrap().name, "r");
        assert_eq!(
            volumes[1].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("r")
        );
        assert!(volumes[2].empty_dir.is_some());
    }

    #[test]
    fn test_security_context() {
        let (_, spec) = pod(&runner("a", "r"));
        let context = spec.security_context.unwrap();
        assert_eq!(context.run_as_user, Some(1000));
        assert_eq!(context.run_as_group, Some(1000));
        assert_eq!(context.fs_group, Some(1000));
        assert_eq!(context.run_as_non_root, Some(true));
        assert_eq!(
            context.sysctls.unwrap(),
            vec![Sysctl {
                name: "net.ipv4.ping_group_range".to_string(),
                value: "0 2147483647".to_string(),
            }]
        );
    }

    #[test]
    fn test_version_override() {
        let mut runner = runner("a", "r");
        runner.spec.version = Some("v2.0.0".to_string());
        let (_, spec) = pod(&runner);
        assert_eq!(
            spec.containers[0].image.as_deref(),
            Some("inloco/kube-actions:v2.0.0-runner")
        );
    }

    #[test]
    fn test_secrets_are_dropped_without_the_capability() {
        let mut runner = runner("a", "r");
        runner.spec.env = vec![secret_env(), plain_env()];
        runner.spec.env_from = vec![secret_env_from()];
        runner.spec.service_account_name = Some("deployer".to_string());

        let (_, spec) = pod(&runner);
        let container = &spec.containers[0];
        assert_eq!(container.env, Some(vec![plain_env()]));
        assert!(container.env_from.is_none());
        assert_eq!(spec.automount_service_account_token, Some(false));
        assert!(spec.service_account_name.is_none());
    }

    #[test]
    fn test_secret_capability() {
        let mut runner = runner("a", "r");
        runner.spec.capabilities = vec![Capability::Secret];
        runner.spec.env = vec![secret_env(), plain_env()];
        runner.spec.env_from = vec![secret_env_from()];
        runner.spec.service_account_name = Some("deployer".to_string());

        let (_, spec) = pod(&runner);
        let container = &spec.containers[0];
        assert_eq!(container.env, Some(vec![secret_env(), plain_env()]));
        assert_eq!(container.env_from, Some(vec![secret_env_from()]));
        assert_eq!(spec.automount_service_account_token, Some(true));
        assert_eq!(spec.service_account_name.as_deref(), Some("deployer"));
    }

    #[test]
    fn test_docker_capability() {
        let mut runner = runner("a", "r");
        runner.spec.capabilities = vec![Capability::Docker];

        let (_, spec) = pod(&runner);
        assert_eq!(spec.containers.len(), 2);
        let env = spec.containers[0].env.as_ref().unwrap();
        assert_eq!(env[0].name, "DOCKER_HOST");
        assert_eq!(env[0].value.as_deref(), Some("tcp://localhost:2375"));

        let dind = &spec.containers[1];
        assert_eq!(dind.name, DIND_CONTAINER);
        assert_eq!(dind.image.as_deref(), Some("inloco/kube-actions:v1.0.0-dind"));
        assert_eq!(dind.security_context.as_ref().unwrap().privileged, Some(true));
        let probe = dind.liveness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(3));
        assert_eq!(
            probe.exec.as_ref().unwrap().command.as_ref().unwrap().join(" "),
            "nc -z 127.0.0.1 2375"
        );
        assert_eq!(dind.volume_mounts.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_persistent_storage() {
        let mut runner = runner("a", "r");
        runner.spec.capabilities = vec![Capability::Docker];
        storage(&mut runner);

        let (_, spec) = pod(&runner);
        let claim = spec.volumes.as_ref().unwrap()[2]
            .persistent_volume_claim
            .clone()
            .unwrap();
        assert_eq!(claim.claim_name, "r");
        assert!(spec.containers[0].resources.is_none());

        let work = &spec.containers[0].volume_mounts.as_ref().unwrap()[3];
        assert_eq!(work.sub_path.as_deref(), Some("work"));
        let dind_mounts = spec.containers[1].volume_mounts.as_ref().unwrap();
        assert_eq!(dind_mounts[1].mount_path, DOCKER_DATA_DIR);
        assert_eq!(dind_mounts[1].sub_path.as_deref(), Some("docker"));
    }

    #[test]
    fn test_platform_affinity() {
        let (_, spec) = pod(&runner("a", "r"));
        let terms = spec
            .affinity
            .unwrap()
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms;
        assert_eq!(terms.len(), 1);
        let expressions = terms[0].match_expressions.as_ref().unwrap();
        assert_eq!(expressions[0].key, "kubernetes.io/os");
        assert_eq!(expressions[0].values, Some(vec!["linux".to_string()]));
        assert_eq!(expressions[1].key, "kubernetes.io/arch");
        assert_eq!(expressions[1].values, Some(vec!["amd64".to_string()]));
    }

    #[test]
    fn test_user_affinity_is_narrowed() {
        let zone = NodeSelectorRequirement {
            key: "topology.kubernetes.io/zone".to_string(),
            operator: "In".to_string(),
            values: Some(vec!["a".to_string()]),
        };
        let mut runner = runner("a", "r");
        runner.spec.affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![
                        NodeSelectorTerm {
                            match_expressions: Some(vec![zone.clone()]),
                            ..Default::default()
                        },
                        NodeSelectorTerm::default(),
                    ],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let (_, spec) = pod(&runner);
        let terms = spec
            .affinity
            .unwrap()
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms;
        assert_eq!(terms.len(), 2);
        let first = terms[0].match_expressions.as_ref().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], zone);
        assert_eq!(terms[1].match_expressions.as_ref().unwrap().len(), 2);
    }
}
