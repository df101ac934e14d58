//! Typed external operations
//!
//! Every command run against an external collaborator is described by an
//! [`Op`] variant instead of ad hoc argument-list concatenation. Each variant
//! renders to a [`RenderedCommand`] (program, args, optional stdin payload,
//! extra env), and carries a structural [`Surface`] tag so the execution
//! policy can decide credential handling without matching on command strings.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Namespace the control plane is installed into
pub const SYSTEM_NAMESPACE: &str = "istio-system";

/// Name prefix of control-plane deployments
pub const CONTROL_PLANE_DEPLOYMENT: &str = "istiod";

/// Namespace of the canonical service controller
pub const CONTROLLER_NAMESPACE: &str = "asm-system";

/// Deployment name of the canonical service controller
pub const CONTROLLER_DEPLOYMENT: &str = "canonical-service-controller-manager";

/// Seconds to wait for the canonical service controller to become available
pub const CONTROLLER_WAIT_SECS: u64 = 600;

/// APIs that must be enabled on the project before installation
pub const REQUIRED_APIS: &[&str] = &[
    "container.googleapis.com",
    "compute.googleapis.com",
    "monitoring.googleapis.com",
    "logging.googleapis.com",
    "cloudtrace.googleapis.com",
    "meshca.googleapis.com",
    "meshtelemetry.googleapis.com",
    "iamcredentials.googleapis.com",
    "anthos.googleapis.com",
    "gkeconnect.googleapis.com",
    "gkehub.googleapis.com",
    "cloudresourcemanager.googleapis.com",
];

/// Project-level roles granted to the acting identity
pub const OPERATOR_ROLES: &[&str] = &[
    "roles/editor",
    "roles/compute.admin",
    "roles/container.admin",
    "roles/resourcemanager.projectIamAdmin",
    "roles/iam.serviceAccountAdmin",
    "roles/iam.serviceAccountKeyAdmin",
    "roles/gkehub.admin",
];

/// Managed CA provisioning endpoint, formatted with the project id
pub const MESH_CA_INIT_URL: &str = "https://meshconfig.googleapis.com/v1alpha1/projects";

/// External surface an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Local host (tool probes, archive extraction)
    Local,
    /// Cloud resource-management surface (projects, services, IAM)
    CloudResources,
    /// Cluster-management surface (cluster describe/update, credentials)
    ClusterManagement,
    /// Cluster-control surface (kubectl/istioctl against the cluster)
    ClusterControl,
    /// Artifact and package retrieval
    ArtifactFetch,
}

/// One external operation, rendered lazily into a concrete command
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CheckTool {
        tool: String,
    },
    ActivateServiceAccount {
        account: String,
        key_file: PathBuf,
    },
    DescribeProject {
        project: String,
    },
    ListEnabledServices {
        project: String,
    },
    EnableServices {
        project: String,
        apis: Vec<String>,
    },
    AddIamPolicyBinding {
        project: String,
        member: String,
        role: String,
    },
    GetCoreAccount,
    PrintAccessToken,
    InitializeMeshCa {
        project: String,
        token: String,
    },
    DescribeCluster {
        project: String,
        location: String,
        cluster: String,
    },
    ListNodePools {
        project: String,
        location: String,
        cluster: String,
    },
    DescribeMachineType {
        project: String,
        location: String,
        machine_type: String,
    },
    GetClusterCredentials {
        project: String,
        location: String,
        cluster: String,
        kubeconfig: PathBuf,
    },
    UpdateClusterLabels {
        project: String,
        location: String,
        cluster: String,
        labels: String,
    },
    EnableWorkloadIdentity {
        project: String,
        location: String,
        cluster: String,
    },
    EnableTelemetry {
        project: String,
        location: String,
        cluster: String,
    },
    ListDeployments {
        kubeconfig: PathBuf,
    },
    ListNamespaces {
        kubeconfig: PathBuf,
    },
    CreateNamespace {
        kubeconfig: PathBuf,
        namespace: String,
    },
    ApplyManifest {
        kubeconfig: PathBuf,
        manifest: String,
    },
    ApplyFile {
        kubeconfig: PathBuf,
        path: PathBuf,
    },
    WaitForDeployment {
        kubeconfig: PathBuf,
        namespace: String,
        deployment: String,
        timeout_secs: u64,
    },
    MeshVersion {
        istioctl: PathBuf,
        kubeconfig: PathBuf,
    },
    InstallControlPlane {
        istioctl: PathBuf,
        kubeconfig: PathBuf,
        manifests: Vec<PathBuf>,
        revision: String,
    },
    SetPackageValue {
        package_dir: PathBuf,
        setter: String,
        value: String,
    },
    FetchTarball {
        url: String,
        dest: PathBuf,
    },
    AuthenticatedCopy {
        source: String,
        dest: PathBuf,
    },
    ExtractTarball {
        archive: PathBuf,
        dest_dir: PathBuf,
    },
    FetchPackage {
        source: String,
        branch: String,
        dest_dir: PathBuf,
    },
}

/// A concrete command ready for process execution
#[derive(Debug, Clone)]
pub struct RenderedCommand {
    /// Program to invoke
    pub program: String,
    /// Argument vector
    pub args: Vec<String>,
    /// Payload piped to stdin, if any
    pub stdin: Option<String>,
    /// Extra environment variables for the child process
    pub env: BTreeMap<String, String>,
    /// Loggable one-line form (secrets redacted)
    pub summary: String,
}

impl RenderedCommand {
    fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let summary = format!("{} {}", program, args.join(" "));
        Self {
            program,
            args,
            stdin: None,
            env: BTreeMap::new(),
            summary,
        }
    }

    fn with_stdin(mut self, payload: String) -> Self {
        self.stdin = Some(payload);
        self
    }

    fn with_kubeconfig(mut self, kubeconfig: &PathBuf) -> Self {
        self.env.insert(
            "KUBECONFIG".to_string(),
            kubeconfig.display().to_string(),
        );
        self
    }

    fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl Op {
    /// Surface this operation targets
    pub fn surface(&self) -> Surface {
        match self {
            Op::CheckTool { .. } | Op::ExtractTarball { .. } => Surface::Local,
            Op::ActivateServiceAccount { .. }
            | Op::DescribeProject { .. }
            | Op::ListEnabledServices { .. }
            | Op::EnableServices { .. }
            | Op::AddIamPolicyBinding { .. }
            | Op::GetCoreAccount
            | Op::PrintAccessToken
            | Op::InitializeMeshCa { .. }
            | Op::DescribeMachineType { .. } => Surface::CloudResources,
            Op::DescribeCluster { .. }
            | Op::ListNodePools { .. }
            | Op::GetClusterCredentials { .. }
            | Op::UpdateClusterLabels { .. }
            | Op::EnableWorkloadIdentity { .. }
            | Op::EnableTelemetry { .. } => Surface::ClusterManagement,
            Op::ListDeployments { .. }
            | Op::ListNamespaces { .. }
            | Op::CreateNamespace { .. }
            | Op::ApplyManifest { .. }
            | Op::ApplyFile { .. }
            | Op::WaitForDeployment { .. }
            | Op::MeshVersion { .. }
            | Op::InstallControlPlane { .. } => Surface::ClusterControl,
            Op::SetPackageValue { .. }
            | Op::FetchTarball { .. }
            | Op::AuthenticatedCopy { .. }
            | Op::FetchPackage { .. } => Surface::ArtifactFetch,
        }
    }

    /// Whether a retry of this operation should refresh cluster credentials first
    pub fn refreshes_cluster_credentials(&self) -> bool {
        matches!(
            self.surface(),
            Surface::ClusterManagement | Surface::ClusterControl
        )
    }

    /// Render into a concrete command
    pub fn render(&self) -> RenderedCommand {
        match self {
            Op::CheckTool { tool } => RenderedCommand::new("which", vec![tool.clone()]),

            Op::ActivateServiceAccount { account, key_file } => RenderedCommand::new(
                "gcloud",
                vec![
                    "auth".into(),
                    "activate-service-account".into(),
                    account.clone(),
                    format!("--key-file={}", key_file.display()),
                ],
            ),

            Op::DescribeProject { project } => RenderedCommand::new(
                "gcloud",
                vec![
                    "projects".into(),
                    "describe".into(),
                    project.clone(),
                    "--format=json".into(),
                ],
            ),

            Op::ListEnabledServices { project } => RenderedCommand::new(
                "gcloud",
                vec![
                    "services".into(),
                    "list".into(),
                    "--enabled".into(),
                    format!("--project={}", project),
                    "--format=json".into(),
                ],
            ),

            Op::EnableServices { project, apis } => {
                let mut args = strings(&["services", "enable"]);
                args.extend(apis.iter().cloned());
                args.push(format!("--project={}", project));
                RenderedCommand::new("gcloud", args)
            }

            Op::AddIamPolicyBinding {
                project,
                member,
                role,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "projects".into(),
                    "add-iam-policy-binding".into(),
                    project.clone(),
                    format!("--member={}", member),
                    format!("--role={}", role),
                ],
            ),

            Op::GetCoreAccount => RenderedCommand::new(
                "gcloud",
                strings(&["config", "get-value", "core/account"]),
            ),

            Op::PrintAccessToken => {
                RenderedCommand::new("gcloud", strings(&["auth", "print-access-token"]))
            }

            Op::InitializeMeshCa { project, token } => {
                let url = format!("{}/{}:initialize", MESH_CA_INIT_URL, project);
                RenderedCommand::new(
                    "curl",
                    vec![
                        "--request".into(),
                        "POST".into(),
                        "--fail".into(),
                        "--silent".into(),
                        "--show-error".into(),
                        "--data".into(),
                        String::new(),
                        "--header".into(),
                        format!("Authorization: Bearer {}", token),
                        url.clone(),
                    ],
                )
                .with_summary(format!(
                    "curl --request POST --header 'Authorization: Bearer <redacted>' {}",
                    url
                ))
            }

            Op::DescribeCluster {
                project,
                location,
                cluster,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "container".into(),
                    "clusters".into(),
                    "describe".into(),
                    cluster.clone(),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                    "--format=json".into(),
                ],
            ),

            Op::ListNodePools {
                project,
                location,
                cluster,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "container".into(),
                    "node-pools".into(),
                    "list".into(),
                    format!("--cluster={}", cluster),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                    "--format=json".into(),
                ],
            ),

            Op::DescribeMachineType {
                project,
                location,
                machine_type,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "compute".into(),
                    "machine-types".into(),
                    "describe".into(),
                    machine_type.clone(),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                    "--format=json".into(),
                ],
            ),

            Op::GetClusterCredentials {
                project,
                location,
                cluster,
                kubeconfig,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "container".into(),
                    "clusters".into(),
                    "get-credentials".into(),
                    cluster.clone(),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                ],
            )
            .with_kubeconfig(kubeconfig),

            Op::UpdateClusterLabels {
                project,
                location,
                cluster,
                labels,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "container".into(),
                    "clusters".into(),
                    "update".into(),
                    cluster.clone(),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                    format!("--update-labels={}", labels),
                ],
            ),

            Op::EnableWorkloadIdentity {
                project,
                location,
                cluster,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "container".into(),
                    "clusters".into(),
                    "update".into(),
                    cluster.clone(),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                    format!("--workload-pool={}.svc.id.goog", project),
                ],
            ),

            Op::EnableTelemetry {
                project,
                location,
                cluster,
            } => RenderedCommand::new(
                "gcloud",
                vec![
                    "container".into(),
                    "clusters".into(),
                    "update".into(),
                    cluster.clone(),
                    format!("--zone={}", location),
                    format!("--project={}", project),
                    "--enable-stackdriver-kubernetes".into(),
                ],
            ),

            Op::ListDeployments { kubeconfig } => RenderedCommand::new(
                "kubectl",
                strings(&["get", "deployments", "--all-namespaces", "-o", "json"]),
            )
            .with_kubeconfig(kubeconfig),

            Op::ListNamespaces { kubeconfig } => RenderedCommand::new(
                "kubectl",
                strings(&["get", "namespaces", "-o", "json"]),
            )
            .with_kubeconfig(kubeconfig),

            Op::CreateNamespace {
                kubeconfig,
                namespace,
            } => RenderedCommand::new(
                "kubectl",
                vec!["create".into(), "namespace".into(), namespace.clone()],
            )
            .with_kubeconfig(kubeconfig),

            Op::ApplyManifest {
                kubeconfig,
                manifest,
            } => RenderedCommand::new("kubectl", strings(&["apply", "-f", "-"]))
                .with_kubeconfig(kubeconfig)
                .with_stdin(manifest.clone()),

            Op::ApplyFile { kubeconfig, path } => RenderedCommand::new(
                "kubectl",
                vec!["apply".into(), "-f".into(), path.display().to_string()],
            )
            .with_kubeconfig(kubeconfig),

            Op::WaitForDeployment {
                kubeconfig,
                namespace,
                deployment,
                timeout_secs,
            } => RenderedCommand::new(
                "kubectl",
                vec![
                    "wait".into(),
                    "--for=condition=available".into(),
                    format!("--timeout={}s", timeout_secs),
                    "-n".into(),
                    namespace.clone(),
                    format!("deployment/{}", deployment),
                ],
            )
            .with_kubeconfig(kubeconfig),

            Op::MeshVersion {
                istioctl,
                kubeconfig,
            } => RenderedCommand::new(
                istioctl.display().to_string(),
                strings(&["version", "-o", "json"]),
            )
            .with_kubeconfig(kubeconfig),

            Op::InstallControlPlane {
                istioctl,
                kubeconfig,
                manifests,
                revision,
            } => {
                let mut args = vec!["install".to_string()];
                for manifest in manifests {
                    args.push("-f".into());
                    args.push(manifest.display().to_string());
                }
                args.push("--set".into());
                args.push(format!("revision={}", revision));
                args.push("-y".into());
                RenderedCommand::new(istioctl.display().to_string(), args)
                    .with_kubeconfig(kubeconfig)
            }

            Op::SetPackageValue {
                package_dir,
                setter,
                value,
            } => RenderedCommand::new(
                "kpt",
                vec![
                    "cfg".into(),
                    "set".into(),
                    package_dir.display().to_string(),
                    setter.clone(),
                    value.clone(),
                ],
            ),

            Op::FetchTarball { url, dest } => RenderedCommand::new(
                "curl",
                vec![
                    "-fsSL".into(),
                    "-o".into(),
                    dest.display().to_string(),
                    url.clone(),
                ],
            ),

            Op::AuthenticatedCopy { source, dest } => RenderedCommand::new(
                "gsutil",
                vec!["cp".into(), source.clone(), dest.display().to_string()],
            ),

            Op::ExtractTarball { archive, dest_dir } => RenderedCommand::new(
                "tar",
                vec![
                    "xzf".into(),
                    archive.display().to_string(),
                    "-C".into(),
                    dest_dir.display().to_string(),
                ],
            ),

            Op::FetchPackage {
                source,
                branch,
                dest_dir,
            } => RenderedCommand::new(
                "kpt",
                vec![
                    "pkg".into(),
                    "get".into(),
                    format!("{}@{}", source, branch),
                    dest_dir.display().to_string(),
                ],
            ),
        }
    }

    /// Loggable one-line form of this operation
    pub fn summary(&self) -> String {
        self.render().summary
    }
}
