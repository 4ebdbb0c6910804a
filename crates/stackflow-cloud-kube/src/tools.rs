//! Wrappers for the kubectl, helm, eksctl and aws CLIs

use crate::error::{KubeError, Result, classify_failure, is_not_found};
use crate::runner::{CommandOutput, CommandRunner};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// One CLI program plus the arguments every invocation carries
#[derive(Clone)]
struct Tool {
    program: &'static str,
    global_args: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl Tool {
    fn new(program: &'static str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program,
            global_args: Vec::new(),
            runner,
        }
    }

    async fn raw(&self, args: Vec<String>, stdin: Option<&str>) -> Result<CommandOutput> {
        let mut full = self.global_args.clone();
        full.extend(args);
        self.runner.run(self.program, &full, stdin).await
    }

    /// Run and return stdout, classifying a failure by its stderr
    async fn exec(&self, args: Vec<String>, stdin: Option<&str>) -> Result<String> {
        let output = self.raw(args, stdin).await?;
        if !output.success {
            return Err(classify_failure(self.program, &output.stderr));
        }
        Ok(output.stdout)
    }

    /// Like `exec`, but "not found" becomes `None`
    async fn exec_optional(&self, args: Vec<String>) -> Result<Option<String>> {
        let output = self.raw(args, None).await?;
        if output.success {
            return Ok(Some(output.stdout));
        }
        if is_not_found(&output.stderr) {
            return Ok(None);
        }
        Err(classify_failure(self.program, &output.stderr))
    }

    fn is_installed(&self) -> bool {
        self.runner.is_installed(self.program)
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, stdout: &str) -> Result<T> {
        serde_json::from_str(stdout).map_err(|e| KubeError::UnexpectedOutput {
            program: self.program.to_string(),
            message: e.to_string(),
        })
    }
}

/// Extract the offending field from a "field is immutable" rejection
fn immutable_field(stderr: &str) -> Option<String> {
    if !stderr.to_lowercase().contains("immutable") {
        return None;
    }
    // The Service "x" is invalid: spec.clusterIP: Invalid value: "": field is immutable
    let field = stderr
        .split("is invalid: ")
        .nth(1)
        .and_then(|rest| rest.split(':').next())
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "spec".to_string());
    Some(field)
}

/// kubectl wrapper
#[derive(Clone)]
pub struct Kubectl {
    tool: Tool,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>, context: Option<&str>) -> Self {
        let mut tool = Tool::new("kubectl", runner);
        if let Some(context) = context {
            tool.global_args = strings(&["--context", context]);
        }
        Self { tool }
    }

    fn scoped(args: &[&str], namespace: Option<&str>) -> Vec<String> {
        let mut args = strings(args);
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        args
    }

    pub fn is_installed(&self) -> bool {
        self.tool.is_installed()
    }

    /// Client version, used as an installation check
    pub async fn client_version(&self) -> Result<String> {
        let stdout = self
            .tool
            .exec(strings(&["version", "--client", "-o", "json"]), None)
            .await?;
        let version: Value = self.tool.parse(&stdout)?;
        Ok(version["clientVersion"]["gitVersion"]
            .as_str()
            .unwrap_or("unknown")
            .to_string())
    }

    /// Get an object as JSON, `None` if it does not exist
    pub async fn get(
        &self,
        resource: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<Value>> {
        let mut args = Self::scoped(&["get", resource, name], namespace);
        args.extend(strings(&["-o", "json", "--ignore-not-found"]));

        match self.tool.exec_optional(args).await? {
            Some(stdout) if !stdout.trim().is_empty() => Ok(Some(self.tool.parse(&stdout)?)),
            _ => Ok(None),
        }
    }

    /// Render an object through a go-template, `None` if it does not exist
    pub async fn get_template(
        &self,
        resource: &str,
        name: &str,
        namespace: Option<&str>,
        template: &str,
    ) -> Result<Option<String>> {
        let mut args = Self::scoped(&["get", resource, name], namespace);
        args.push(format!("-o=go-template={}", template));
        args.push("--ignore-not-found".to_string());

        match self.tool.exec_optional(args).await? {
            Some(stdout) if !stdout.trim().is_empty() => Ok(Some(stdout)),
            _ => Ok(None),
        }
    }

    /// `kubectl apply` a manifest given as JSON
    pub async fn apply(&self, manifest: &Value) -> Result<String> {
        let name = manifest["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let body = serde_json::to_string(manifest)?;
        let output = self
            .tool
            .raw(strings(&["apply", "-f", "-"]), Some(&body))
            .await?;

        if output.success {
            return Ok(output.stdout);
        }
        if let Some(field) = immutable_field(&output.stderr) {
            return Err(KubeError::ImmutableField {
                resource: name,
                field,
            });
        }
        Err(classify_failure("kubectl", &output.stderr))
    }

    /// Merge-patch an object; the patch travels over stdin
    pub async fn patch(
        &self,
        resource: &str,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
    ) -> Result<()> {
        let mut args = Self::scoped(&["patch", resource, name], namespace);
        args.extend(strings(&["--type", "merge", "--patch-file", "/dev/stdin"]));
        let body = serde_json::to_string(patch)?;
        self.tool.exec(args, Some(&body)).await?;
        Ok(())
    }

    /// Delete an object; `false` if it was already gone
    pub async fn delete(
        &self,
        resource: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<bool> {
        let mut args = Self::scoped(&["delete", resource, name], namespace);
        args.extend(strings(&["--ignore-not-found", "--wait=false"]));
        let stdout = self.tool.exec(args, None).await?;
        Ok(!stdout.trim().is_empty())
    }
}

/// A release as listed by `helm list -o json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub status: String,
    /// `<chart>-<version>`
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
}

impl HelmRelease {
    /// Split `chart` into name and version
    pub fn chart_name_version(&self) -> (&str, Option<&str>) {
        match self.chart.rfind('-') {
            Some(pos)
                if self.chart[pos + 1..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit()) =>
            {
                (&self.chart[..pos], Some(&self.chart[pos + 1..]))
            }
            _ => (&self.chart, None),
        }
    }
}

/// What to install with `helm upgrade --install`
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub name: String,
    pub chart: String,
    pub namespace: String,
    pub repo: Option<String>,
    pub version: Option<String>,
    pub values: Option<Value>,
}

/// helm wrapper
#[derive(Clone)]
pub struct Helm {
    tool: Tool,
}

impl Helm {
    pub fn new(runner: Arc<dyn CommandRunner>, context: Option<&str>) -> Self {
        let mut tool = Tool::new("helm", runner);
        if let Some(context) = context {
            tool.global_args = strings(&["--kube-context", context]);
        }
        Self { tool }
    }

    pub fn is_installed(&self) -> bool {
        self.tool.is_installed()
    }

    pub async fn version(&self) -> Result<String> {
        let stdout = self.tool.exec(strings(&["version", "--short"]), None).await?;
        Ok(stdout.trim().to_string())
    }

    pub async fn find_release(&self, name: &str, namespace: &str) -> Result<Option<HelmRelease>> {
        let filter = format!("^{}$", name);
        let stdout = self
            .tool
            .exec(
                strings(&["list", "-n", namespace, "--all", "--filter", &filter, "-o", "json"]),
                None,
            )
            .await?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let releases: Vec<HelmRelease> = self.tool.parse(&stdout)?;
        Ok(releases.into_iter().find(|r| r.name == name))
    }

    /// User-supplied values of a release
    pub async fn get_values(&self, name: &str, namespace: &str) -> Result<Value> {
        let stdout = self
            .tool
            .exec(strings(&["get", "values", name, "-n", namespace, "-o", "json"]), None)
            .await?;
        let values: Value = self.tool.parse(stdout.trim())?;
        Ok(match values {
            Value::Null => Value::Object(Default::default()),
            other => other,
        })
    }

    pub async fn upgrade_install(&self, config: &ReleaseConfig) -> Result<String> {
        let mut args = strings(&[
            "upgrade",
            "--install",
            &config.name,
            &config.chart,
            "-n",
            &config.namespace,
            "--create-namespace",
        ]);
        if let Some(repo) = &config.repo {
            args.extend(strings(&["--repo", repo]));
        }
        if let Some(version) = &config.version {
            args.extend(strings(&["--version", version]));
        }

        let values = match &config.values {
            Some(values) => {
                args.extend(strings(&["-f", "-"]));
                Some(serde_json::to_string(values)?)
            }
            None => None,
        };

        self.tool.exec(args, values.as_deref()).await
    }

    /// Uninstall; `false` if the release did not exist
    pub async fn uninstall(&self, name: &str, namespace: &str) -> Result<bool> {
        let removed = self
            .tool
            .exec_optional(strings(&["uninstall", name, "-n", namespace]))
            .await?;
        Ok(removed.is_some())
    }
}

/// A cluster as described by `eksctl get cluster -o json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EksCluster {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Endpoint", default)]
    pub endpoint: Option<String>,
}

/// A node group as listed by `eksctl get nodegroup -o json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeGroup {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DesiredCapacity", default)]
    pub desired_capacity: u32,
    #[serde(rename = "InstanceType", default)]
    pub instance_type: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// What to create with `eksctl create cluster`
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub region: String,
    pub version: Option<String>,
    pub nodegroup: String,
    pub node_type: String,
    pub nodes: u32,
}

/// eksctl wrapper
#[derive(Clone)]
pub struct Eksctl {
    tool: Tool,
}

impl Eksctl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            tool: Tool::new("eksctl", runner),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.tool.is_installed()
    }

    pub async fn get_cluster(&self, name: &str, region: &str) -> Result<Option<EksCluster>> {
        let stdout = self
            .tool
            .exec_optional(strings(&[
                "get", "cluster", "--name", name, "--region", region, "-o", "json",
            ]))
            .await?;
        let Some(stdout) = stdout else {
            return Ok(None);
        };
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let clusters: Vec<EksCluster> = self.tool.parse(&stdout)?;
        Ok(clusters.into_iter().find(|c| c.name == name))
    }

    pub async fn get_nodegroups(&self, cluster: &str, region: &str) -> Result<Vec<NodeGroup>> {
        let stdout = self
            .tool
            .exec_optional(strings(&[
                "get", "nodegroup", "--cluster", cluster, "--region", region, "-o", "json",
            ]))
            .await?;
        match stdout {
            Some(stdout) if !stdout.trim().is_empty() => self.tool.parse(&stdout),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn create_cluster(&self, config: &ClusterConfig) -> Result<()> {
        let nodes = config.nodes.to_string();
        let mut args = strings(&[
            "create",
            "cluster",
            "--name",
            &config.name,
            "--region",
            &config.region,
            "--nodegroup-name",
            &config.nodegroup,
            "--node-type",
            &config.node_type,
            "--nodes",
            &nodes,
            "--managed",
        ]);
        if let Some(version) = &config.version {
            args.extend(strings(&["--version", version]));
        }
        self.tool.exec(args, None).await?;
        Ok(())
    }

    pub async fn scale_nodegroup(
        &self,
        cluster: &str,
        region: &str,
        nodegroup: &str,
        nodes: u32,
    ) -> Result<()> {
        let nodes = nodes.to_string();
        self.tool
            .exec(
                strings(&[
                    "scale", "nodegroup", "--cluster", cluster, "--region", region, "--name",
                    nodegroup, "--nodes", &nodes,
                ]),
                None,
            )
            .await?;
        Ok(())
    }

    /// Point the local kubeconfig at the cluster
    pub async fn write_kubeconfig(&self, cluster: &str, region: &str) -> Result<()> {
        self.tool
            .exec(
                strings(&["utils", "write-kubeconfig", "--cluster", cluster, "--region", region]),
                None,
            )
            .await?;
        Ok(())
    }

    /// Start deleting a cluster; `false` if it did not exist
    pub async fn delete_cluster(&self, name: &str, region: &str) -> Result<bool> {
        let removed = self
            .tool
            .exec_optional(strings(&["delete", "cluster", "--name", name, "--region", region]))
            .await?;
        Ok(removed.is_some())
    }
}

/// `aws sts get-caller-identity`
#[derive(Debug, Clone, Deserialize)]
pub struct CallerIdentity {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Arn")]
    pub arn: String,
}

/// aws CLI wrapper, only used for the credentials preflight
#[derive(Clone)]
pub struct Aws {
    tool: Tool,
}

impl Aws {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            tool: Tool::new("aws", runner),
        }
    }

    pub async fn caller_identity(&self) -> Result<CallerIdentity> {
        let stdout = self
            .tool
            .exec(strings(&["sts", "get-caller-identity", "--output", "json"]), None)
            .await?;
        self.tool.parse(&stdout)
    }
}
