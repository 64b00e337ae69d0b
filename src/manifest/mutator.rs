//! Runtime substitutions applied to workload templates
//!
//! Every function takes the workload by value and returns the rewritten one,
//! so the same template and parameters always yield the same output.

use super::Workload;
use crate::config::ResourceLimits;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{Container, EnvVar};

/// Token replaced by the cluster version
pub const VERSION_TOKEN: &str = "VERSION";
/// Command placeholder for the memory request
pub const MIN_MEM_PLACEHOLDER: &str = "${MIN_MEM}";
/// Command placeholder for the memory limit
pub const MAX_MEM_PLACEHOLDER: &str = "${MAX_MEM}";
/// Pod template annotation holding a JSON list of init containers
pub const INIT_CONTAINERS_ANNOTATION: &str = "pod.beta.kubernetes.io/init-containers";

const OPTS_ENV: &str = "OPTS";
const DISKS_ENV: &str = "DISKS";

/// Substitute the version into the `version` label and all container images
pub fn apply_version(mut workload: Workload, version: &str) -> Workload {
    if let Some(label) = workload
        .version_labels_mut()
        .and_then(|labels| labels.get_mut("version"))
    {
        *label = label.replace(VERSION_TOKEN, version);
    }

    for container in workload.containers_mut() {
        if let Some(image) = container.image.as_mut() {
            *image = image.replace(VERSION_TOKEN, version);
        }
    }

    workload
}

/// Set resources on every container and fill the memory placeholders.
///
/// Fails when a command references a placeholder the limits give no value for.
pub fn apply_resources(mut workload: Workload, limits: &ResourceLimits) -> Result<Workload> {
    if limits.is_empty() {
        return Ok(workload);
    }
    for container in workload.containers_mut() {
        set_container_resources(container, limits)?;
    }
    Ok(workload)
}

/// Like [`apply_resources`], restricted to the container with the given name
pub fn apply_container_resources(
    mut workload: Workload,
    container_name: &str,
    limits: &ResourceLimits,
) -> Result<Workload> {
    if limits.is_empty() {
        return Ok(workload);
    }
    for container in workload
        .containers_mut()
        .iter_mut()
        .filter(|c| c.name == container_name)
    {
        set_container_resources(container, limits)?;
    }
    Ok(workload)
}

fn set_container_resources(container: &mut Container, limits: &ResourceLimits) -> Result<()> {
    container.resources = Some(limits.to_requirements());

    let Some(last) = container.command.as_mut().and_then(|cmd| cmd.last_mut()) else {
        return Ok(());
    };
    let substitutions = [
        (MIN_MEM_PLACEHOLDER, limits.min_memory(), "requests.memory"),
        (MAX_MEM_PLACEHOLDER, limits.max_memory(), "limits.memory"),
    ];
    for (placeholder, quantity, field) in substitutions {
        if !last.contains(placeholder) {
            continue;
        }
        let quantity = quantity.ok_or_else(|| {
            Error::manifest(
                format!("container {}", container.name),
                format!("command uses {} but resources set no {}", placeholder, field),
            )
        })?;
        *last = last.replace(placeholder, &runtime_memory(quantity));
    }
    Ok(())
}

/// Kubernetes quantity to the size syntax of the service runtime.
///
/// Drops exactly one trailing character and lower-cases the rest:
/// `4Gi` becomes `4g`, `4096Mi` becomes `4096m`.
pub fn runtime_memory(quantity: &str) -> String {
    let mut chars = quantity.chars();
    chars.next_back();
    chars.as_str().to_lowercase()
}

/// Export mount options as `OPTS` to every container
pub fn apply_mount_opts(mut workload: Workload, opts: &str) -> Workload {
    if opts.is_empty() {
        return workload;
    }
    for container in workload.containers_mut() {
        set_env(container, OPTS_ENV, opts);
    }
    workload
}

/// Export the comma-joined disk list as `DISKS` to the first init container.
///
/// The init container list lives JSON-encoded in a pod template annotation;
/// templates without it fall back to the native `initContainers` field.
pub fn apply_disks(mut workload: Workload, disks: &[String]) -> Result<Workload> {
    if disks.is_empty() {
        return Ok(workload);
    }
    let joined = disks.join(",");

    let encoded = workload
        .pod_annotations()
        .and_then(|a| a.get(INIT_CONTAINERS_ANNOTATION))
        .cloned();

    match encoded {
        Some(encoded) => {
            let mut init_containers: Vec<Container> = serde_json::from_str(&encoded)?;
            let first = init_containers.first_mut().ok_or_else(|| {
                Error::manifest(
                    INIT_CONTAINERS_ANNOTATION,
                    "init container list is empty, cannot inject disks",
                )
            })?;
            set_env(first, DISKS_ENV, &joined);

            let reencoded = serde_json::to_string(&init_containers)?;
            workload
                .pod_annotations_mut()
                .insert(INIT_CONTAINERS_ANNOTATION.to_string(), reencoded);
        }
        None => {
            let first = workload
                .pod_spec_mut()
                .and_then(|spec| spec.init_containers.as_mut())
                .and_then(|containers| containers.first_mut())
                .ok_or_else(|| {
                    Error::manifest(
                        INIT_CONTAINERS_ANNOTATION,
                        "workload has no init container to receive disks",
                    )
                })?;
            set_env(first, DISKS_ENV, &joined);
        }
    }

    Ok(workload)
}

/// Append an environment entry, overwriting an existing one of that name
fn set_env(container: &mut Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = Some(value.to_string());
            existing.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }),
    }
}
