//! Manifest rendering
//!
//! Turns workload and endpoint specs into the JSON documents fed to
//! `kubectl create -f -`.

use serde_json::{Value, json};

use super::{EndpointSpec, VolumeSource, WorkloadSpec};

/// Label the orchestrator puts on every pod of a job; units are selected by it
pub const UNIT_SELECTOR_LABEL: &str = "job-name";

/// Renders a batch job manifest
pub fn job_manifest(spec: &WorkloadSpec, namespace: &str) -> Value {
    let container = &spec.container;

    let env: Vec<Value> = container
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let ports: Vec<Value> = container
        .ports
        .iter()
        .map(|port| json!({ "containerPort": port }))
        .collect();

    let mounts: Vec<Value> = spec
        .volumes
        .iter()
        .map(|v| json!({ "name": v.name, "mountPath": v.mount_path }))
        .collect();

    let volumes: Vec<Value> = spec
        .volumes
        .iter()
        .map(|v| match &v.source {
            VolumeSource::Claim(claim) => {
                json!({ "name": v.name, "persistentVolumeClaim": { "claimName": claim } })
            }
            VolumeSource::Secret(secret) => {
                json!({ "name": v.name, "secret": { "secretName": secret } })
            }
            VolumeSource::EmptyDir => json!({ "name": v.name, "emptyDir": {} }),
        })
        .collect();

    let mut container_json = json!({
        "name": container.name,
        "image": container.image,
        "args": container.args,
        "env": env,
        "ports": ports,
        "volumeMounts": mounts,
    });

    if container.always_pull {
        container_json["imagePullPolicy"] = json!("Always");
    }

    if let Some(resources) = &container.resources {
        let mut limits = json!({
            "cpu": resources.cpu.to_string(),
            "memory": format!("{}Gi", resources.memory_gb),
        });
        if resources.gpu > 0 {
            limits["nvidia.com/gpu"] = json!(resources.gpu.to_string());
        }
        container_json["resources"] = json!({ "requests": limits.clone(), "limits": limits });
    }

    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "containers": [container_json],
        "volumes": volumes,
    });

    if let Some(account) = &spec.service_account {
        pod_spec["serviceAccountName"] = json!(account);
    }

    let mut job_spec = json!({
        "template": {
            "metadata": { "labels": spec.labels },
            "spec": pod_spec,
        },
    });

    if let Some(limit) = spec.backoff_limit {
        job_spec["backoffLimit"] = json!(limit);
    }
    if let Some(ttl) = spec.ttl_seconds_after_finished {
        job_spec["ttlSecondsAfterFinished"] = json!(ttl);
    }
    if let Some(deadline) = spec.active_deadline_seconds {
        job_spec["activeDeadlineSeconds"] = json!(deadline);
    }

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": spec.labels,
        },
        "spec": job_spec,
    })
}

/// Renders a Service plus Ingress routing `spec.host` to the session port
pub fn endpoint_manifest(spec: &EndpointSpec, namespace: &str) -> Value {
    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": spec.labels,
        },
        "spec": {
            "selector": spec.selector,
            "ports": [{ "port": spec.port, "targetPort": spec.port }],
        },
    });

    let ingress = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": spec.labels,
        },
        "spec": {
            "rules": [{
                "host": spec.host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": spec.name,
                                "port": { "number": spec.port },
                            },
                        },
                    }],
                },
            }],
        },
    });

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [service, ingress],
    })
}
