//  RESOURCES.rs
//
//  Description:
//!   Defines the tagged resource stream the transformer emits, plus the
//!   emitters for everything that is not a workload: namespace, secrets,
//!   configs, persistent claims, network policies, RBAC and the
//!   network-facing service fronts.
//

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, Service as KubeService, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

use kappal_cfg::Service as ComposeService;
use kappal_cfg::project::sanitize;
use kappal_cfg::spec::{self, Protocol};

pub use crate::errors::TransformError as Error;


/***** CONSTANTS *****/
/// The storage class every persistent claim uses (single-node, local-path only).
const STORAGE_CLASS: &str = "local-path";
/// The storage request of every persistent claim.
const STORAGE_REQUEST: &str = "1Gi";

/// The well-known container ports inferred from image names when a service
/// declares none, so cluster DNS still points somewhere sensible.
const WELL_KNOWN_PORTS: [(&str, u16); 6] = [
    ("postgres", 5432),
    ("mysql", 3306),
    ("mariadb", 3306),
    ("redis", 6379),
    ("mongo", 27017),
    ("nginx", 80),
];
/// The fallback port when no image substring matches.
const DEFAULT_PORT: u16 = 80;





/***** HELPER FUNCTIONS *****/
/// Serializes the given typed resource as a single YAML document, injecting
/// the `apiVersion` and `kind` the typed model does not carry itself.
fn doc<K: k8s_openapi::Resource + Serialize>(kind: &'static str, name: &str, resource: &K) -> Result<String, Error> {
    let value: serde_yaml::Value = match serde_yaml::to_value(resource) {
        Ok(value) => value,
        Err(err)  => { return Err(Error::SerializeError{ kind, name: name.into(), err }); },
    };

    // Rebuild the mapping with apiVersion/kind up front
    let mut full: serde_yaml::Mapping = serde_yaml::Mapping::new();
    full.insert("apiVersion".into(), K::API_VERSION.into());
    full.insert("kind".into(), K::KIND.into());
    if let serde_yaml::Value::Mapping(map) = value {
        for (key, val) in map { full.insert(key, val); }
    }

    match serde_yaml::to_string(&serde_yaml::Value::Mapping(full)) {
        Ok(yaml) => Ok(yaml),
        Err(err) => Err(Error::SerializeError{ kind, name: name.into(), err }),
    }
}

/// Returns the standard metadata for a generated resource.
pub fn meta_of(project: &str, name: &str, extra_labels: &[(&str, &str)]) -> ObjectMeta {
    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    labels.insert(spec::LABEL_PROJECT.into(), project.into());
    for (key, value) in extra_labels {
        labels.insert((*key).into(), (*value).into());
    }
    ObjectMeta {
        name      : Some(name.into()),
        namespace : Some(project.into()),
        labels    : Some(labels),
        ..Default::default()
    }
}

/// Infers the container port of a service that declares none, by substring
/// match of its image over a small well-known table.
pub fn infer_port(image: &str) -> u16 {
    for (needle, port) in WELL_KNOWN_PORTS {
        if image.contains(needle) { return port; }
    }
    DEFAULT_PORT
}





/***** LIBRARY *****/
/// One resource in the emitted stream.
///
/// The stream is ordered (namespace, secrets, configs, claims, policies,
/// RBAC, workloads with their fronts) and every entry knows how to render
/// itself as a YAML document.
#[derive(Clone, Debug)]
pub enum Resource {
    Namespace(Namespace),
    Secret(Secret),
    ConfigMap(ConfigMap),
    PersistentVolumeClaim(PersistentVolumeClaim),
    NetworkPolicy(NetworkPolicy),
    Role(Role),
    RoleBinding(RoleBinding),
    Deployment(Deployment),
    Job(Job),
    Service(KubeService),
}

impl Resource {
    /// Returns the Kubernetes kind of this resource.
    pub fn kind(&self) -> &'static str {
        use Resource::*;
        match self {
            Namespace(_)             => "Namespace",
            Secret(_)                => "Secret",
            ConfigMap(_)             => "ConfigMap",
            PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            NetworkPolicy(_)         => "NetworkPolicy",
            Role(_)                  => "Role",
            RoleBinding(_)           => "RoleBinding",
            Deployment(_)            => "Deployment",
            Job(_)                   => "Job",
            Service(_)               => "Service",
        }
    }

    /// Returns the name of this resource.
    pub fn name(&self) -> String {
        use Resource::*;
        let meta: &ObjectMeta = match self {
            Namespace(r)             => &r.metadata,
            Secret(r)                => &r.metadata,
            ConfigMap(r)             => &r.metadata,
            PersistentVolumeClaim(r) => &r.metadata,
            NetworkPolicy(r)         => &r.metadata,
            Role(r)                  => &r.metadata,
            RoleBinding(r)           => &r.metadata,
            Deployment(r)            => &r.metadata,
            Job(r)                   => &r.metadata,
            Service(r)               => &r.metadata,
        };
        meta.name.clone().unwrap_or_default()
    }

    /// Renders this resource as a single YAML document.
    ///
    /// # Errors
    /// This function errors if serde cannot serialize the resource.
    pub fn to_yaml(&self) -> Result<String, Error> {
        use Resource::*;
        let name: String = self.name();
        match self {
            Namespace(r)             => doc(self.kind(), &name, r),
            Secret(r)                => doc(self.kind(), &name, r),
            ConfigMap(r)             => doc(self.kind(), &name, r),
            PersistentVolumeClaim(r) => doc(self.kind(), &name, r),
            NetworkPolicy(r)         => doc(self.kind(), &name, r),
            Role(r)                  => doc(self.kind(), &name, r),
            RoleBinding(r)           => doc(self.kind(), &name, r),
            Deployment(r)            => doc(self.kind(), &name, r),
            Job(r)                   => doc(self.kind(), &name, r),
            Service(r)               => doc(self.kind(), &name, r),
        }
    }
}



/// Emits the project namespace.
pub fn namespace(project: &str) -> Resource {
    let mut meta: ObjectMeta = meta_of(project, project, &[]);
    // Namespaces are cluster-scoped
    meta.namespace = None;
    Resource::Namespace(Namespace{ metadata: meta, ..Default::default() })
}

/// Emits an opaque secret whose data map has a single key: the original
/// (unsanitized) secret name, mapping to the file contents.
///
/// # Arguments
/// - `project`: The project identity.
/// - `name`: The original secret name.
/// - `contents`: The contents of the backing file.
pub fn secret(project: &str, name: &str, contents: Vec<u8>) -> Resource {
    let mut data: BTreeMap<String, ByteString> = BTreeMap::new();
    data.insert(name.into(), ByteString(contents));
    Resource::Secret(Secret {
        metadata : meta_of(project, &sanitize(name), &[]),
        type_    : Some("Opaque".into()),
        data     : Some(data),
        ..Default::default()
    })
}

/// Emits a config object of the same single-key shape as [`secret()`], with
/// the raw file contents as a string (so YAML can render a block scalar).
pub fn config(project: &str, name: &str, contents: String) -> Resource {
    let mut data: BTreeMap<String, String> = BTreeMap::new();
    data.insert(name.into(), contents);
    Resource::ConfigMap(ConfigMap {
        metadata : meta_of(project, &sanitize(name), &[]),
        data     : Some(data),
        ..Default::default()
    })
}

/// Emits the persistent claim of one declared named volume: storage class
/// `local-path`, access mode RWO, a 1 Gi request.
pub fn claim(project: &str, volume: &str) -> Resource {
    let mut requests: BTreeMap<String, Quantity> = BTreeMap::new();
    requests.insert("storage".into(), Quantity(STORAGE_REQUEST.into()));
    Resource::PersistentVolumeClaim(PersistentVolumeClaim {
        metadata : meta_of(project, &sanitize(volume), &[(spec::LABEL_VOLUME, volume)]),
        spec     : Some(PersistentVolumeClaimSpec {
            access_modes       : Some(vec![ "ReadWriteOnce".into() ]),
            storage_class_name : Some(STORAGE_CLASS.into()),
            resources          : Some(k8s_openapi::api::core::v1::ResourceRequirements {
                requests : Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Emits the ingress-only policy of one declared (non-default) network:
/// pods labeled with the network may talk to each other.
pub fn network_policy(project: &str, network: &str) -> Resource {
    let mut network_labels: BTreeMap<String, String> = BTreeMap::new();
    network_labels.insert(spec::LABEL_NETWORK.into(), network.into());
    let selector = LabelSelector{ match_labels: Some(network_labels), ..Default::default() };

    Resource::NetworkPolicy(NetworkPolicy {
        metadata : meta_of(project, &sanitize(network), &[]),
        spec     : Some(NetworkPolicySpec {
            pod_selector : selector.clone(),
            policy_types : Some(vec![ "Ingress".into() ]),
            ingress      : Some(vec![ NetworkPolicyIngressRule {
                from : Some(vec![ NetworkPolicyPeer {
                    pod_selector : Some(selector),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Emits the namespace-scoped role the init-barrier agent reads with, plus
/// its binding to the namespace's default service account.
///
/// # Arguments
/// - `project`: The project identity.
/// - `needs_jobs`: Whether any barrier waits on run-to-completion workloads.
/// - `needs_pods`: Whether any barrier waits on peer readiness.
pub fn rbac(project: &str, needs_jobs: bool, needs_pods: bool) -> (Resource, Resource) {
    let mut rules: Vec<PolicyRule> = vec![];
    if needs_jobs {
        rules.push(PolicyRule {
            api_groups : Some(vec![ "batch".into() ]),
            resources  : Some(vec![ "jobs".into() ]),
            verbs      : vec![ "get".into(), "list".into(), "watch".into() ],
            ..Default::default()
        });
    }
    if needs_pods {
        rules.push(PolicyRule {
            api_groups : Some(vec![ "".into() ]),
            resources  : Some(vec![ "pods".into() ]),
            verbs      : vec![ "get".into(), "list".into() ],
            ..Default::default()
        });
    }

    let role = Resource::Role(Role {
        metadata : meta_of(project, "kappal-init", &[]),
        rules    : Some(rules),
    });
    let binding = Resource::RoleBinding(RoleBinding {
        metadata : meta_of(project, "kappal-init", &[]),
        role_ref : RoleRef {
            api_group : "rbac.authorization.k8s.io".into(),
            kind      : "Role".into(),
            name      : "kappal-init".into(),
        },
        subjects : Some(vec![ Subject {
            kind      : "ServiceAccount".into(),
            name      : "default".into(),
            namespace : Some(project.into()),
            ..Default::default()
        }]),
    });
    (role, binding)
}

/// Emits the network-facing front of one service.
///
/// Every workload gets a front, also without published ports, so cluster DNS
/// resolves the service name. Both `port` and `targetPort` are the container
/// port; the published (host) side is realized by the cluster container's
/// port bindings, never here.
pub fn front(project: &str, service: &ComposeService) -> Resource {
    let name: String = sanitize(&service.name);

    // Collect the container ports, or infer one so DNS has a target
    let published: bool = !service.ports.is_empty();
    let ports: Vec<(u16, Protocol)> = if published {
        service.ports.iter().map(|p| (p.container, p.protocol)).collect()
    } else {
        vec![ (infer_port(service.image.as_deref().unwrap_or_default()), Protocol::Tcp) ]
    };

    let ports: Vec<ServicePort> = ports.into_iter().map(|(port, protocol)| ServicePort {
        name        : Some(format!("port-{}-{}", port, protocol)),
        port        : port as i32,
        target_port : Some(IntOrString::Int(port as i32)),
        protocol    : Some(protocol.k8s().into()),
        ..Default::default()
    }).collect();

    let mut selector: BTreeMap<String, String> = BTreeMap::new();
    selector.insert(spec::LABEL_PROJECT.into(), project.into());
    selector.insert(spec::LABEL_SERVICE.into(), service.name.clone());

    Resource::Service(KubeService {
        metadata : meta_of(project, &name, &[(spec::LABEL_SERVICE, &service.name)]),
        spec     : Some(ServiceSpec {
            selector                : Some(selector),
            ports                   : Some(ports),
            type_                   : Some(if published { "LoadBalancer".into() } else { "ClusterIP".into() }),
            external_traffic_policy : if published { Some("Local".into()) } else { None },
            ..Default::default()
        }),
        ..Default::default()
    })
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ports() {
        assert_eq!(infer_port("postgres:15"), 5432);
        assert_eq!(infer_port("bitnami/mysql:8"), 3306);
        assert_eq!(infer_port("mariadb:11"), 3306);
        assert_eq!(infer_port("redis:7-alpine"), 6379);
        assert_eq!(infer_port("mongo:6"), 27017);
        assert_eq!(infer_port("nginx:1.25"), 80);
        assert_eq!(infer_port("ghcr.io/acme/widget:2"), 80);
    }

    /// Every document must carry apiVersion/kind up front, plus the project label.
    #[test]
    fn documents_are_complete() {
        let resource = namespace("proj-0123abcd");
        let yaml = resource.to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("kind: Namespace"));
        assert!(yaml.contains("project: proj-0123abcd"));
    }

    /// A secret keeps its original name as the single data key, base64-coded.
    #[test]
    fn secret_shape() {
        let resource = secret("proj-0123abcd", "db_password", b"hunter2".to_vec());
        assert_eq!(resource.name(), "db-password");
        let yaml = resource.to_yaml().unwrap();
        assert!(yaml.contains("kind: Secret"));
        assert!(yaml.contains("db_password:"));
        // "hunter2" in base64
        assert!(yaml.contains("aHVudGVyMg=="));
    }

    #[test]
    fn claim_shape() {
        let resource = claim("proj-0123abcd", "pg_data");
        assert_eq!(resource.name(), "pg-data");
        let yaml = resource.to_yaml().unwrap();
        assert!(yaml.contains("storageClassName: local-path"));
        assert!(yaml.contains("ReadWriteOnce"));
        assert!(yaml.contains("storage: 1Gi"));
        assert!(yaml.contains("volume: pg_data"));
    }

    #[test]
    fn rbac_rules_follow_needs() {
        let (role, _) = rbac("proj-0123abcd", true, false);
        let yaml = role.to_yaml().unwrap();
        assert!(yaml.contains("jobs"));
        assert!(!yaml.contains("pods"));
        assert!(yaml.contains("watch"));

        let (role, binding) = rbac("proj-0123abcd", false, true);
        let yaml = role.to_yaml().unwrap();
        assert!(yaml.contains("pods"));
        assert!(!yaml.contains("jobs"));

        let yaml = binding.to_yaml().unwrap();
        assert!(yaml.contains("ServiceAccount"));
        assert!(yaml.contains("name: default"));
    }
}
