// Talos on Hetzner Cloud. Servers are driven through the Hetzner Cloud API;
// kubeconfig retrieval goes through `talosctl` against the first control
// plane's public address.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{ClusterUpdater, Provisioner, ProvisionerError};
use crate::diff::{Change, ChangeCategory, DiffResult, UpdateOutcome};
use crate::exec::{default_invoker, CommandInvoker};
use crate::spec::{context_name, ClusterSpec, Distribution};

const HCLOUD_API: &str = "https://api.hetzner.cloud/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Label keys stamped on every server KSail creates.
const CLUSTER_LABEL: &str = "ksail-cluster";
const ROLE_LABEL: &str = "ksail-role";

/// Snapshot selector for the uploaded Talos image.
const TALOS_IMAGE_SELECTOR: &str = "os=talos";

#[derive(Debug, Clone, Deserialize)]
pub struct HcloudServer {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub server_type: HcloudServerType,
    #[serde(default)]
    pub public_net: HcloudPublicNet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HcloudServerType {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HcloudPublicNet {
    pub ipv4: Option<HcloudIpv4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HcloudIpv4 {
    pub ip: String,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    servers: Vec<HcloudServer>,
}

#[derive(Debug, Deserialize)]
struct ServerResponse {
    server: HcloudServer,
}

#[derive(Debug, Deserialize)]
struct NetworksResponse {
    networks: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct NetworkResponse {
    network: IdOnly,
}

#[derive(Debug, Deserialize)]
struct SshKeysResponse {
    ssh_keys: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    images: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateServerRequest {
    name: String,
    server_type: String,
    image: u64,
    location: String,
    labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_keys: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    networks: Vec<u64>,
}

/// Minimal Hetzner Cloud API client scoped to what the provisioner needs.
pub struct HcloudClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl HcloudClient {
    pub fn new(token: String) -> Result<Self> {
        Ok(HcloudClient {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .context("failed to build HTTP client")?,
            token,
            base_url: HCLOUD_API.to_string(),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("hcloud request {method} {path} failed"))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("hcloud {method} {path} returned {status}: {text}");
        }
        if text.is_empty() {
            // DELETE and action endpoints may answer with no useful body.
            return serde_json::from_str("null")
                .map_err(|_| anyhow!("hcloud {method} {path} returned an empty body"));
        }
        serde_json::from_str(&text)
            .with_context(|| format!("failed to decode hcloud {method} {path} response"))
    }

    pub async fn list_servers(&self, label_selector: &str) -> Result<Vec<HcloudServer>> {
        let response: ServersResponse = self
            .request(
                reqwest::Method::GET,
                &format!("/servers?label_selector={label_selector}"),
                None,
            )
            .await?;
        Ok(response.servers)
    }

    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<HcloudServer> {
        let response: ServerResponse = self
            .request(
                reqwest::Method::POST,
                "/servers",
                Some(serde_json::to_value(request)?),
            )
            .await?;
        Ok(response.server)
    }

    pub async fn delete_server(&self, id: u64) -> Result<()> {
        let _: serde_json::Value = self
            .request(reqwest::Method::DELETE, &format!("/servers/{id}"), None)
            .await?;
        Ok(())
    }

    pub async fn power(&self, id: u64, action: &str) -> Result<()> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::POST,
                &format!("/servers/{id}/actions/{action}"),
                Some(json!({})),
            )
            .await?;
        Ok(())
    }

    pub async fn find_network(&self, name: &str) -> Result<Option<u64>> {
        let response: NetworksResponse = self
            .request(reqwest::Method::GET, &format!("/networks?name={name}"), None)
            .await?;
        Ok(response.networks.first().map(|n| n.id))
    }

    pub async fn create_network(&self, name: &str, ip_range: &str) -> Result<u64> {
        let response: NetworkResponse = self
            .request(
                reqwest::Method::POST,
                "/networks",
                Some(json!({
                    "name": name,
                    "ip_range": ip_range,
                    "subnets": [{
                        "type": "cloud",
                        "ip_range": ip_range,
                        "network_zone": "eu-central",
                    }],
                })),
            )
            .await?;
        Ok(response.network.id)
    }

    pub async fn delete_network(&self, id: u64) -> Result<()> {
        let _: serde_json::Value = self
            .request(reqwest::Method::DELETE, &format!("/networks/{id}"), None)
            .await?;
        Ok(())
    }

    pub async fn find_ssh_key(&self, name: &str) -> Result<Option<u64>> {
        let response: SshKeysResponse = self
            .request(reqwest::Method::GET, &format!("/ssh_keys?name={name}"), None)
            .await?;
        Ok(response.ssh_keys.first().map(|k| k.id))
    }

    pub async fn find_talos_image(&self) -> Result<Option<u64>> {
        let response: ImagesResponse = self
            .request(
                reqwest::Method::GET,
                &format!("/images?type=snapshot&label_selector={TALOS_IMAGE_SELECTOR}"),
                None,
            )
            .await?;
        Ok(response.images.first().map(|i| i.id))
    }
}

pub struct HetznerProvisioner {
    spec: ClusterSpec,
    client: HcloudClient,
    invoker: Arc<dyn CommandInvoker>,
}

/// Predictable names of the servers a cluster occupies, role by role.
pub fn server_names(cluster: &str, control_planes: u32, workers: u32) -> Vec<String> {
    let mut names = Vec::new();
    for i in 1..=control_planes {
        names.push(format!("{cluster}-controlplane-{i}"));
    }
    for i in 1..=workers {
        names.push(format!("{cluster}-worker-{i}"));
    }
    names
}

impl HetznerProvisioner {
    pub fn from_env(spec: ClusterSpec) -> Result<Self> {
        let token = std::env::var("HCLOUD_TOKEN")
            .context("HCLOUD_TOKEN must be set for the Hetzner provider")?;
        Ok(HetznerProvisioner {
            spec,
            client: HcloudClient::new(token)?,
            invoker: default_invoker(),
        })
    }

    pub fn new(spec: ClusterSpec, client: HcloudClient) -> Self {
        HetznerProvisioner {
            spec,
            client,
            invoker: default_invoker(),
        }
    }

    fn network_name(&self, cluster: &str) -> String {
        self.spec
            .hetzner
            .network_name
            .clone()
            .unwrap_or_else(|| cluster.to_string())
    }

    async fn cluster_servers(&self, name: &str) -> Result<Vec<HcloudServer>> {
        self.client
            .list_servers(&format!("{CLUSTER_LABEL}={name}"))
            .await
    }

    async fn create_one(
        &self,
        name: &str,
        cluster: &str,
        role: &str,
        server_type: &str,
        image: u64,
        network: Option<u64>,
        ssh_key: Option<u64>,
    ) -> Result<HcloudServer> {
        let mut labels = HashMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
        labels.insert(ROLE_LABEL.to_string(), role.to_string());
        let request = CreateServerRequest {
            name: name.to_string(),
            server_type: server_type.to_string(),
            image,
            location: self.spec.hetzner.location.clone(),
            labels,
            ssh_keys: ssh_key.into_iter().collect(),
            networks: network.into_iter().collect(),
        };
        self.client.create_server(&request).await
    }
}

#[async_trait]
impl Provisioner for HetznerProvisioner {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(!self.cluster_servers(name).await?.is_empty())
    }

    async fn create(&self, name: &str) -> Result<()> {
        let image = self
            .client
            .find_talos_image()
            .await?
            .ok_or_else(|| anyhow!("no Talos snapshot found (expected an image labeled '{TALOS_IMAGE_SELECTOR}')"))?;

        let network_name = self.network_name(name);
        let network = match self.client.find_network(&network_name).await? {
            Some(id) => Some(id),
            None => Some(
                self.client
                    .create_network(&network_name, &self.spec.hetzner.network_cidr)
                    .await?,
            ),
        };

        let ssh_key = match &self.spec.hetzner.ssh_key_name {
            Some(key_name) => Some(self.client.find_ssh_key(key_name).await?.ok_or_else(
                || anyhow!("SSH key '{key_name}' not found in the Hetzner project"),
            )?),
            None => None,
        };

        for i in 1..=self.spec.hetzner.control_planes {
            let server_name = format!("{name}-controlplane-{i}");
            self.create_one(
                &server_name,
                name,
                "controlplane",
                &self.spec.hetzner.control_plane_server_type,
                image,
                network,
                ssh_key,
            )
            .await?;
            info!(server = %server_name, "created control plane server");
        }
        for i in 1..=self.spec.hetzner.workers {
            let server_name = format!("{name}-worker-{i}");
            self.create_one(
                &server_name,
                name,
                "worker",
                &self.spec.hetzner.worker_server_type,
                image,
                network,
                ssh_key,
            )
            .await?;
            info!(server = %server_name, "created worker server");
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let servers = self.cluster_servers(name).await?;
        if servers.is_empty() {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        for server in servers {
            self.client.delete_server(server.id).await?;
            info!(server = %server.name, "deleted server");
        }
        // Only networks named after the cluster were created by us.
        if self.spec.hetzner.network_name.is_none() {
            if let Some(id) = self.client.find_network(name).await? {
                if let Err(err) = self.client.delete_network(id).await {
                    warn!("failed to delete network '{name}': {err:#}");
                }
            }
        }
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let servers = self.cluster_servers(name).await?;
        if servers.is_empty() {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        for server in servers {
            self.client.power(server.id, "poweron").await?;
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let servers = self.cluster_servers(name).await?;
        if servers.is_empty() {
            return Err(ProvisionerError::ClusterNotFound(name.to_string()).into());
        }
        for server in servers {
            self.client.power(server.id, "poweroff").await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let servers = self.client.list_servers(CLUSTER_LABEL).await?;
        let mut clusters: Vec<String> = servers
            .into_iter()
            .filter_map(|s| s.labels.get(CLUSTER_LABEL).cloned())
            .collect();
        clusters.sort();
        clusters.dedup();
        Ok(clusters)
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        let servers = self.cluster_servers(name).await?;
        let control_plane = servers
            .iter()
            .find(|s| s.labels.get(ROLE_LABEL).map(String::as_str) == Some("controlplane"))
            .ok_or_else(|| ProvisionerError::ClusterNotFound(name.to_string()))?;
        let ip = control_plane
            .public_net
            .ipv4
            .as_ref()
            .map(|v| v.ip.clone())
            .ok_or_else(|| anyhow!("control plane '{}' has no public IPv4", control_plane.name))?;

        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let path = dir.path().join("kubeconfig");
        let args = vec![
            "kubeconfig".to_string(),
            "--nodes".to_string(),
            ip,
            "--force".to_string(),
            path.display().to_string(),
        ];
        self.invoker
            .run("talosctl", &args)
            .await?
            .require_success("talosctl kubeconfig")?;
        std::fs::read_to_string(&path).context("failed to read talos kubeconfig")
    }

    async fn import_images(&self, _name: &str, images: &[String]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        bail!("importing cached images is not supported on the Hetzner provider")
    }

    fn as_updater(&self) -> Option<&dyn ClusterUpdater> {
        Some(self)
    }
}

#[async_trait]
impl ClusterUpdater for HetznerProvisioner {
    async fn get_current_config(&self, name: &str) -> Result<ClusterSpec> {
        let servers = self.cluster_servers(name).await?;
        if servers.is_empty() {
            return Err(ProvisionerError::ClusterDoesNotExist(name.to_string()).into());
        }
        let mut observed = self.spec.clone();
        observed.name = Some(name.to_string());
        observed.connection.context = Some(context_name(Distribution::Talos, name));
        observed.hetzner.control_planes = servers
            .iter()
            .filter(|s| s.labels.get(ROLE_LABEL).map(String::as_str) == Some("controlplane"))
            .count() as u32;
        observed.hetzner.workers = servers
            .iter()
            .filter(|s| s.labels.get(ROLE_LABEL).map(String::as_str) == Some("worker"))
            .count() as u32;
        if let Some(worker) = servers
            .iter()
            .find(|s| s.labels.get(ROLE_LABEL).map(String::as_str) == Some("worker"))
        {
            observed.hetzner.worker_server_type = worker.server_type.name.clone();
        }
        if let Some(cp) = servers
            .iter()
            .find(|s| s.labels.get(ROLE_LABEL).map(String::as_str) == Some("controlplane"))
        {
            observed.hetzner.control_plane_server_type = cp.server_type.name.clone();
        }
        Ok(observed)
    }

    async fn diff_config(
        &self,
        _name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<DiffResult> {
        let mut result = DiffResult::default();
        if old.hetzner.control_planes != new.hetzner.control_planes {
            result.push(Change {
                field: "hetzner.controlPlanes".to_string(),
                old_value: old.hetzner.control_planes.to_string(),
                new_value: new.hetzner.control_planes.to_string(),
                category: ChangeCategory::InPlace,
                reason: "provider supports scaling".to_string(),
            });
        }
        if old.hetzner.workers != new.hetzner.workers {
            result.push(Change {
                field: "hetzner.workers".to_string(),
                old_value: old.hetzner.workers.to_string(),
                new_value: new.hetzner.workers.to_string(),
                category: ChangeCategory::InPlace,
                reason: "provider supports scaling".to_string(),
            });
        }
        Ok(result)
    }

    async fn update(
        &self,
        name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<UpdateOutcome> {
        let diff = self.diff_config(name, old, new).await?;
        let mut outcome = UpdateOutcome::default();
        if diff.is_empty() {
            return Ok(outcome);
        }

        let image = self.client.find_talos_image().await?;
        let network = self.client.find_network(&self.network_name(name)).await?;
        let ssh_key = match &self.spec.hetzner.ssh_key_name {
            Some(key_name) => self.client.find_ssh_key(key_name).await?,
            None => None,
        };

        for change in diff.in_place {
            let applied = match change.field.as_str() {
                "hetzner.workers" => {
                    self.scale_workers(name, old, new, image, network, ssh_key)
                        .await
                }
                "hetzner.controlPlanes" if new.hetzner.control_planes > old.hetzner.control_planes => {
                    self.scale_control_planes(name, old, new, image, network, ssh_key)
                        .await
                }
                _ => Err(anyhow!("scale-down of control planes is not supported")),
            };
            match applied {
                Ok(()) => outcome.applied.push(change),
                Err(err) => {
                    let mut failed = change;
                    failed.reason = format!("{err:#}");
                    outcome.failed.push(failed);
                }
            }
        }
        Ok(outcome)
    }
}

impl HetznerProvisioner {
    async fn scale_workers(
        &self,
        name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
        image: Option<u64>,
        network: Option<u64>,
        ssh_key: Option<u64>,
    ) -> Result<()> {
        if new.hetzner.workers > old.hetzner.workers {
            let image = image.ok_or_else(|| anyhow!("no Talos snapshot found"))?;
            for i in (old.hetzner.workers + 1)..=new.hetzner.workers {
                let server_name = format!("{name}-worker-{i}");
                self.create_one(
                    &server_name,
                    name,
                    "worker",
                    &new.hetzner.worker_server_type,
                    image,
                    network,
                    ssh_key,
                )
                .await?;
            }
        } else {
            // Remove the highest-indexed workers first.
            let servers = self.cluster_servers(name).await?;
            for i in ((new.hetzner.workers + 1)..=old.hetzner.workers).rev() {
                let server_name = format!("{name}-worker-{i}");
                if let Some(server) = servers.iter().find(|s| s.name == server_name) {
                    self.client.delete_server(server.id).await?;
                }
            }
        }
        Ok(())
    }

    async fn scale_control_planes(
        &self,
        name: &str,
        old: &ClusterSpec,
        new: &ClusterSpec,
        image: Option<u64>,
        network: Option<u64>,
        ssh_key: Option<u64>,
    ) -> Result<()> {
        let image = image.ok_or_else(|| anyhow!("no Talos snapshot found"))?;
        for i in (old.hetzner.control_planes + 1)..=new.hetzner.control_planes {
            let server_name = format!("{name}-controlplane-{i}");
            self.create_one(
                &server_name,
                name,
                "controlplane",
                &new.hetzner.control_plane_server_type,
                image,
                network,
                ssh_key,
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_names_are_predictable() {
        assert_eq!(
            server_names("dev", 1, 2),
            vec!["dev-controlplane-1", "dev-worker-1", "dev-worker-2"]
        );
        assert_eq!(server_names("dev", 0, 0), Vec::<String>::new());
    }

    #[test]
    fn test_create_server_request_shape() {
        let mut labels = HashMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), "dev".to_string());
        let request = CreateServerRequest {
            name: "dev-controlplane-1".to_string(),
            server_type: "cx22".to_string(),
            image: 42,
            location: "fsn1".to_string(),
            labels,
            ssh_keys: vec![],
            networks: vec![7],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["name"], "dev-controlplane-1");
        assert_eq!(value["image"], 42);
        assert_eq!(value["networks"][0], 7);
        // Empty ssh_keys are omitted entirely.
        assert!(value.get("ssh_keys").is_none());
    }

    #[test]
    fn test_server_deserialization() {
        let body = r#"{
            "id": 101,
            "name": "dev-controlplane-1",
            "labels": {"ksail-cluster": "dev", "ksail-role": "controlplane"},
            "server_type": {"name": "cx22"},
            "public_net": {"ipv4": {"ip": "1.2.3.4"}}
        }"#;
        let server: HcloudServer = serde_json::from_str(body).unwrap();
        assert_eq!(server.id, 101);
        assert_eq!(server.labels.get("ksail-role").unwrap(), "controlplane");
        assert_eq!(server.public_net.ipv4.unwrap().ip, "1.2.3.4");
    }
}
