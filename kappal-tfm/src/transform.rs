//  TRANSFORM.rs
//
//  Description:
//!   The transformer entrypoint: a pure function from a resolved Compose
//!   project to the ordered resource stream, plus the compatibility notes
//!   the orchestrators surface (but never fail on).
//

use std::collections::HashSet;
use std::fmt::{Display, Formatter, Result as FResult};

use log::debug;

use kappal_cfg::{Project, Service};

pub use crate::errors::TransformError as Error;
use crate::resources::{self, Resource};
use crate::workload::{barrier_of, workload_of, BarrierNeeds};


/***** AUXILLARY *****/
/// A non-fatal compatibility observation made during transformation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Note {
    /// A service bind-mounts a host path writably; the init-barrier will
    /// chmod it world-writable so the pod can use it.
    WritableBindMount{ service: String, target: String },
    /// A service depends on a profiled (and thus inactive) service.
    ProfiledDependency{ service: String, dependency: String },
    /// A service depends on a name that is not in the project.
    UnknownDependency{ service: String, dependency: String },
    /// The dependency graph contains a cycle; the involved pods will block
    /// on each other's init-barriers.
    DependencyCycle{ services: Vec<String> },
}

impl Display for Note {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use Note::*;
        match self {
            WritableBindMount{ service, target }     => write!(f, "Service '{}' mounts '{}' writably; the path will be made world-writable on the host", service, target),
            ProfiledDependency{ service, dependency } => write!(f, "Service '{}' depends on '{}', which is profiled and will not be started by default", service, dependency),
            UnknownDependency{ service, dependency }  => write!(f, "Service '{}' depends on '{}', which is not part of the project", service, dependency),
            DependencyCycle{ services }               => write!(f, "Services {} depend on each other in a cycle; their init-barriers will block each other", services.join(", ")),
        }
    }
}



/// The result of one transformation: the ordered resource stream, plus the
/// compatibility notes.
#[derive(Clone, Debug)]
pub struct TransformOutput {
    /// The resources, in apply order.
    pub resources : Vec<Resource>,
    /// The non-fatal observations.
    pub notes     : Vec<Note>,
}





/***** HELPER FUNCTIONS *****/
/// Collects the compatibility notes of one service.
fn notes_of(project: &Project, service: &Service, needs: &BarrierNeeds, notes: &mut Vec<Note>) {
    for target in &needs.writable_paths {
        notes.push(Note::WritableBindMount{ service: service.name.clone(), target: target.clone() });
    }
    for dependency in service.depends_on.keys() {
        match project.services.get(dependency) {
            None => notes.push(Note::UnknownDependency{ service: service.name.clone(), dependency: dependency.clone() }),
            Some(target) if target.is_profiled() => notes.push(Note::ProfiledDependency{ service: service.name.clone(), dependency: dependency.clone() }),
            Some(_) => {},
        }
    }
}

/// Detects cycles in the dependency graph with a plain three-color DFS.
///
/// The transformer handles dependencies per-service without global ordering,
/// so a cycle does not fail generation; it merely gets surfaced.
fn detect_cycle(project: &Project) -> Option<Vec<String>> {
    fn visit<'p>(project: &'p Project, name: &'p str, visiting: &mut Vec<&'p str>, done: &mut HashSet<&'p str>) -> Option<Vec<String>> {
        if done.contains(name) { return None; }
        if let Some(pos) = visiting.iter().position(|n| *n == name) {
            return Some(visiting[pos..].iter().map(|n| n.to_string()).collect());
        }

        visiting.push(name);
        if let Some(service) = project.services.get(name) {
            for dependency in service.depends_on.keys() {
                if let Some(cycle) = visit(project, dependency, visiting, done) { return Some(cycle); }
            }
        }
        visiting.pop();
        done.insert(name);
        None
    }

    let mut done: HashSet<&str> = HashSet::new();
    for name in project.services.keys() {
        if let Some(cycle) = visit(project, name, &mut Vec::new(), &mut done) { return Some(cycle); }
    }
    None
}





/***** LIBRARY *****/
/// Transforms the given project into its resource stream.
///
/// The stream is ordered for one-pass application: namespace, secrets,
/// configs, claims, network policies, RBAC, then per service (alphabetical)
/// the workload followed by its front. Profiled services are skipped.
///
/// # Arguments
/// - `project`: The resolved Compose project.
///
/// # Returns
/// The resource stream and the compatibility notes.
///
/// # Errors
/// This function errors on input problems only: unreadable secret/config
/// files and references to undeclared objects.
pub fn transform(project: &Project) -> Result<TransformOutput, Error> {
    debug!("Transforming project '{}'", project.name);
    let mut resources: Vec<Resource> = vec![];
    let mut notes: Vec<Note> = vec![];

    // The namespace always leads
    resources.push(resources::namespace(&project.name));

    // Secrets and configs, read off disk
    for (name, path) in &project.secrets {
        let contents: Vec<u8> = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(err)     => { return Err(Error::SecretReadError{ name: name.clone(), path: path.clone(), err }); },
        };
        resources.push(resources::secret(&project.name, name, contents));
    }
    for (name, path) in &project.configs {
        let contents: String = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err)     => { return Err(Error::ConfigReadError{ name: name.clone(), path: path.clone(), err }); },
        };
        resources.push(resources::config(&project.name, name, contents));
    }

    // One claim per declared volume, one policy per non-default network
    for volume in &project.volumes {
        resources.push(resources::claim(&project.name, volume));
    }
    for network in &project.networks {
        if network == "default" { continue; }
        resources.push(resources::network_policy(&project.name, network));
    }

    // Work out every service's barrier needs first; RBAC depends on the sum
    let services: Vec<(&Service, BarrierNeeds)> = project.active_services()
        .map(|service| {
            let needs: BarrierNeeds = barrier_of(project, service);
            notes_of(project, service, &needs, &mut notes);
            (service, needs)
        })
        .collect();
    if let Some(cycle) = detect_cycle(project) {
        notes.push(Note::DependencyCycle{ services: cycle });
    }

    let needs_jobs: bool = services.iter().any(|(_, n)| !n.wait_for_jobs.is_empty());
    let needs_pods: bool = services.iter().any(|(_, n)| !n.wait_for_services.is_empty());
    if needs_jobs || needs_pods {
        let (role, binding) = resources::rbac(&project.name, needs_jobs, needs_pods);
        resources.push(role);
        resources.push(binding);
    }

    // Finally the workloads, each with its front
    for (service, needs) in services {
        resources.push(workload_of(project, service, &needs)?);
        resources.push(resources::front(&project.name, service));
    }

    Ok(TransformOutput{ resources, notes })
}

/// Renders the given resource stream as one multi-document YAML string, in
/// stream order.
///
/// # Errors
/// This function errors if a resource fails to serialize.
pub fn write_stream(resources: &[Resource]) -> Result<String, Error> {
    let mut res: String = String::new();
    for resource in resources {
        if !res.is_empty() { res.push_str("---\n"); }
        res.push_str(&resource.to_yaml()?);
    }
    Ok(res)
}



#[cfg(test)]
mod tests {
    use std::io::Write;

    use kappal_cfg::spec::{InitSpec, Protocol, PublishedPort};

    use super::*;

    /// Writes compose content (and any extra files) to a tempdir and resolves it.
    fn project_of(content: &str, extra: &[(&str, &str)]) -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in extra {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let path = dir.path().join("docker-compose.yaml");
        let mut handle = std::fs::File::create(&path).unwrap();
        handle.write_all(content.as_bytes()).unwrap();
        let project = Project::resolve(&path, Some("testproj"), None).unwrap();
        (dir, project)
    }

    /// Finds the resources of a given kind in the stream.
    fn of_kind<'r>(output: &'r TransformOutput, kind: &str) -> Vec<&'r Resource> {
        output.resources.iter().filter(|r| r.kind() == kind).collect()
    }

    /// Scenario: one service `web` with image nginx:1.25 and ports "8080:80".
    #[test]
    fn minimal_web_service() {
        let (_dir, project) = project_of(r#"
services:
  web:
    image: nginx:1.25
    ports:
      - "8080:80"
"#, &[]);
        let output = transform(&project).unwrap();

        // Namespace leads the stream
        assert_eq!(output.resources[0].kind(), "Namespace");
        assert_eq!(output.resources[0].name(), "testproj");

        // One deployment, 1 replica, the declared image
        let deployments = of_kind(&output, "Deployment");
        assert_eq!(deployments.len(), 1);
        let yaml = deployments[0].to_yaml().unwrap();
        assert!(yaml.contains("replicas: 1"));
        assert!(yaml.contains("image: nginx:1.25"));
        assert!(yaml.contains("service: web"));

        // One front: port == targetPort == container port, LoadBalancer
        let fronts = of_kind(&output, "Service");
        assert_eq!(fronts.len(), 1);
        let yaml = fronts[0].to_yaml().unwrap();
        assert!(yaml.contains("port: 80"));
        assert!(yaml.contains("targetPort: 80"));
        assert!(!yaml.contains("8080"));
        assert!(yaml.contains("type: LoadBalancer"));
        assert!(yaml.contains("externalTrafficPolicy: Local"));

        // And the published set still carries the host port for the cluster
        assert_eq!(project.published_ports().unwrap(), vec![PublishedPort{ host: 8080, container: 80, protocol: Protocol::Tcp }]);

        assert!(output.notes.is_empty());
    }

    /// Scenario: `app` waits for job `migrate` to complete.
    #[test]
    fn dependency_on_job() {
        let (_dir, project) = project_of(r#"
services:
  migrate:
    image: acme/migrate
    restart: "no"
  app:
    image: acme/app
    depends_on:
      migrate:
        condition: service_completed_successfully
"#, &[]);
        let output = transform(&project).unwrap();

        // The migrate service is a job...
        assert_eq!(of_kind(&output, "Job").len(), 1);
        let job_yaml = of_kind(&output, "Job")[0].to_yaml().unwrap();
        assert!(job_yaml.contains("backoffLimit: 3"));
        assert!(job_yaml.contains("restartPolicy: Never"));

        // ...and app carries the exact barrier envelope
        let app = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "app").unwrap();
        let yaml = app.to_yaml().unwrap();
        assert!(yaml.contains("kappal-init"));
        let expected = serde_json::to_string(&InitSpec {
            namespace              : "testproj".into(),
            wait_for_jobs          : vec!["migrate".into()],
            wait_for_services      : vec![],
            prepare_writable_paths : vec![],
        }).unwrap();
        assert!(yaml.contains(&expected), "envelope missing in:\n{}", yaml);

        // The role grants job reads
        let roles = of_kind(&output, "Role");
        assert_eq!(roles.len(), 1);
        let role_yaml = roles[0].to_yaml().unwrap();
        assert!(role_yaml.contains("jobs"));
        assert!(role_yaml.contains("watch"));
        assert_eq!(of_kind(&output, "RoleBinding").len(), 1);
    }

    /// Scenario: `app` waits for `db` to become healthy.
    #[test]
    fn healthcheck_wait() {
        let (_dir, project) = project_of(r#"
services:
  db:
    image: postgres:15
    healthcheck:
      test: ["CMD-SHELL", "pg_isready -U postgres"]
      interval: 10s
      timeout: 5s
      retries: 3
  app:
    image: acme/app
    depends_on:
      db:
        condition: service_healthy
"#, &[]);
        let output = transform(&project).unwrap();

        // The probe on db
        let db = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "db").unwrap();
        let yaml = db.to_yaml().unwrap();
        assert!(yaml.contains("readinessProbe"));
        assert!(yaml.contains("pg_isready -U postgres"));
        assert!(yaml.contains("periodSeconds: 10"));
        assert!(yaml.contains("timeoutSeconds: 5"));
        assert!(yaml.contains("failureThreshold: 3"));

        // The barrier on app
        let app = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "app").unwrap();
        let yaml = app.to_yaml().unwrap();
        assert!(yaml.contains("waitForServices"));
        assert!(yaml.contains("db"));

        // The role grants pod reads
        let role_yaml = of_kind(&output, "Role")[0].to_yaml().unwrap();
        assert!(role_yaml.contains("pods"));
        assert!(role_yaml.contains("get"));
        assert!(role_yaml.contains("list"));
    }

    /// The contractual entrypoint/command mapping.
    #[test]
    fn entrypoint_command_mapping() {
        let (_dir, project) = project_of(r#"
services:
  plain:
    image: img
  cmd-only:
    image: img
    command: ["serve", "--port", "80"]
  both:
    image: img
    entrypoint: ["/entry.sh"]
    command: ["run"]
"#, &[]);
        let output = transform(&project).unwrap();

        let plain = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "plain").unwrap().to_yaml().unwrap();
        assert!(!plain.contains("command:"));
        assert!(!plain.contains("args:"));

        let cmd_only = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "cmd-only").unwrap().to_yaml().unwrap();
        assert!(!cmd_only.contains("command:"));
        assert!(cmd_only.contains("args:"));
        assert!(cmd_only.contains("serve"));

        let both = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "both").unwrap().to_yaml().unwrap();
        assert!(both.contains("command:"));
        assert!(both.contains("/entry.sh"));
        assert!(both.contains("args:"));
    }

    /// Init-barriers appear iff something has to be waited on or prepared,
    /// and `service_healthy` on a job is ignored.
    #[test]
    fn barrier_generation_predicate() {
        let (_dir, project) = project_of(r#"
services:
  migrate:
    image: img
    restart: "no"
  nowait:
    image: img
    depends_on:
      - migrate
  badwait:
    image: img
    depends_on:
      migrate:
        condition: service_healthy
  writer:
    image: img
    volumes:
      - /tmp/data:/data
"#, &[]);
        let output = transform(&project).unwrap();

        // Plain start-ordering and healthy-on-job produce no barrier
        for name in ["nowait", "badwait"] {
            let yaml = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == name).unwrap().to_yaml().unwrap();
            assert!(!yaml.contains("initContainers"), "unexpected barrier on '{}'", name);
        }

        // A writable bind mount does: with root and the mount in place
        let yaml = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "writer").unwrap().to_yaml().unwrap();
        assert!(yaml.contains("initContainers"));
        assert!(yaml.contains("prepareWritablePaths"));
        assert!(yaml.contains("runAsUser: 0"));
        assert!(yaml.contains("fsGroup: 999"));

        // And it is surfaced as a note, not an error
        assert!(output.notes.iter().any(|n| matches!(n, Note::WritableBindMount{ service, .. } if service == "writer")));

        // No waits on the API at all: no RBAC emitted
        assert!(of_kind(&output, "Role").is_empty());
    }

    /// Fronts: everyone gets exactly one; portless images get the inferred port.
    #[test]
    fn front_emission() {
        let (_dir, project) = project_of(r#"
services:
  db:
    image: postgres:15
  cache:
    image: redis:7
  hidden:
    image: img
    profiles: ["debug"]
"#, &[]);
        let output = transform(&project).unwrap();

        let fronts = of_kind(&output, "Service");
        assert_eq!(fronts.len(), 2);

        let db = fronts.iter().find(|r| r.name() == "db").unwrap().to_yaml().unwrap();
        assert!(db.contains("port: 5432"));
        assert!(db.contains("targetPort: 5432"));
        assert!(db.contains("type: ClusterIP"));

        let cache = fronts.iter().find(|r| r.name() == "cache").unwrap().to_yaml().unwrap();
        assert!(cache.contains("port: 6379"));
    }

    /// Secrets/configs: single-key data maps, subPath mounts, sanitized names.
    #[test]
    fn secret_and_config_mounts() {
        let (_dir, project) = project_of(r#"
services:
  app:
    image: img
    secrets:
      - db_password
    configs:
      - source: app_conf
        target: /etc/app/app.conf
secrets:
  db_password:
    file: ./password.txt
configs:
  app_conf:
    file: ./app.conf
"#, &[("password.txt", "hunter2"), ("app.conf", "key = value\n")]);
        let output = transform(&project).unwrap();

        let secrets = of_kind(&output, "Secret");
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name(), "db-password");

        let configs = of_kind(&output, "ConfigMap");
        assert_eq!(configs.len(), 1);
        let yaml = configs[0].to_yaml().unwrap();
        assert!(yaml.contains("app_conf"));
        assert!(yaml.contains("key = value"));

        let app = of_kind(&output, "Deployment")[0].to_yaml().unwrap();
        assert!(app.contains("mountPath: /run/secrets/db_password"));
        assert!(app.contains("subPath: db_password"));
        assert!(app.contains("mountPath: /etc/app/app.conf"));
        assert!(app.contains("subPath: app_conf"));
    }

    /// Shared-image borrowing: the non-building service uses the builder's tag.
    #[test]
    fn shared_image_borrowing(){
        let (dir, _) = project_of("services:\n  x:\n    image: img\n", &[]);
        std::fs::create_dir_all(dir.path().join("builder")).unwrap();
        std::fs::write(dir.path().join("builder").join("Dockerfile"), "FROM scratch\n").unwrap();
        let compose = r#"
services:
  worker:
    image: acme/app:dev
  app:
    image: acme/app:dev
    build: ./builder
"#;
        std::fs::write(dir.path().join("docker-compose.yaml"), compose).unwrap();
        let project = Project::resolve(dir.path().join("docker-compose.yaml"), Some("testproj"), None).unwrap();
        let output = transform(&project).unwrap();

        let app = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "app").unwrap().to_yaml().unwrap();
        assert!(app.contains("image: testproj-app:latest"));
        let worker = of_kind(&output, "Deployment").into_iter().find(|r| r.name() == "worker").unwrap().to_yaml().unwrap();
        assert!(worker.contains("image: testproj-app:latest"));
    }

    /// Volumes: binds become host paths, named volumes become claim refs.
    #[test]
    fn volume_mapping() {
        let (_dir, project) = project_of(r#"
services:
  db:
    image: postgres:15
    volumes:
      - pg_data:/var/lib/postgresql/data
      - /var/log:/host-logs:ro
volumes:
  pg_data:
"#, &[]);
        let output = transform(&project).unwrap();

        // The claim exists, labeled with the original name
        let claims = of_kind(&output, "PersistentVolumeClaim");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].name(), "pg-data");

        let db = of_kind(&output, "Deployment")[0].to_yaml().unwrap();
        assert!(db.contains("claimName: pg-data"));
        assert!(db.contains("path: /var/log"));
        assert!(db.contains("readOnly: true"));
        // The read-only bind needs no barrier
        assert!(!db.contains("initContainers"));
    }

    /// Network policies select and admit by the network label.
    #[test]
    fn network_policies() {
        let (_dir, project) = project_of(r#"
services:
  app:
    image: img
    networks:
      - backend
networks:
  backend:
  default:
"#, &[]);
        let output = transform(&project).unwrap();

        let policies = of_kind(&output, "NetworkPolicy");
        assert_eq!(policies.len(), 1);
        let yaml = policies[0].to_yaml().unwrap();
        assert!(yaml.contains("network: backend"));
        assert!(yaml.contains("Ingress"));

        // The pod carries the network label
        let app = of_kind(&output, "Deployment")[0].to_yaml().unwrap();
        assert!(app.contains("network: backend"));
    }

    /// Cycles do not fail generation; they surface as a note.
    #[test]
    fn cycles_are_notes() {
        let (_dir, project) = project_of(r#"
services:
  a:
    image: img
    depends_on:
      - b
  b:
    image: img
    depends_on:
      - a
"#, &[]);
        let output = transform(&project).unwrap();
        assert_eq!(of_kind(&output, "Deployment").len(), 2);
        assert!(output.notes.iter().any(|n| matches!(n, Note::DependencyCycle{ .. })));
    }

    /// The stream order is stable: namespace, secrets, configs, claims,
    /// policies, RBAC, then workload/front pairs.
    #[test]
    fn stream_order() {
        let (_dir, project) = project_of(r#"
services:
  migrate:
    image: img
    restart: "no"
  app:
    image: img
    depends_on:
      migrate:
        condition: service_completed_successfully
    volumes:
      - data:/data
    networks:
      - backend
    secrets:
      - token
volumes:
  data:
networks:
  backend:
secrets:
  token:
    file: ./token.txt
"#, &[("token.txt", "s3cr3t")]);
        let output = transform(&project).unwrap();

        let kinds: Vec<&str> = output.resources.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![
            "Namespace", "Secret", "PersistentVolumeClaim", "NetworkPolicy",
            "Role", "RoleBinding",
            "Deployment", "Service", "Job", "Service",
        ]);

        // And the whole thing renders as one multi-document stream
        let stream = write_stream(&output.resources).unwrap();
        assert_eq!(stream.matches("---\n").count(), output.resources.len() - 1);
        assert!(stream.starts_with("apiVersion: v1\nkind: Namespace"));
    }
}
