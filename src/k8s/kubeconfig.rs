// Kubeconfig discovery: explicit path, then KUBECONFIG (first entry of a
// colon-separated list), then the recommended home file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum KubeconfigError {
    #[error("kubeconfig not found at '{0}'")]
    NotFound(String),
    #[error("failed to read kubeconfig '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse kubeconfig '{path}': {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Deserialize)]
struct MinimalKubeconfig {
    #[serde(rename = "current-context")]
    current_context: Option<String>,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve the kubeconfig path without touching the cluster.
pub fn kubeconfig_path(explicit: Option<&str>) -> Result<PathBuf, KubeconfigError> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        let path = expand_tilde(path);
        if path.exists() {
            return Ok(path);
        }
        return Err(KubeconfigError::NotFound(path.display().to_string()));
    }
    if let Ok(env) = std::env::var("KUBECONFIG") {
        if let Some(first) = env.split(':').find(|p| !p.is_empty()) {
            let path = expand_tilde(first);
            if path.exists() {
                return Ok(path);
            }
            return Err(KubeconfigError::NotFound(path.display().to_string()));
        }
    }
    let home = dirs::home_dir()
        .map(|h| h.join(".kube").join("config"))
        .unwrap_or_else(|| PathBuf::from(".kube/config"));
    if home.exists() {
        Ok(home)
    } else {
        Err(KubeconfigError::NotFound(home.display().to_string()))
    }
}

/// Current context recorded in a kubeconfig, used only as a last-resort
/// cluster identifier.
pub fn current_context(path: &Path) -> Result<Option<String>, KubeconfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| KubeconfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let parsed: MinimalKubeconfig =
        serde_yaml::from_str(&raw).map_err(|source| KubeconfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(parsed.current_context.filter(|c| !c.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_missing_is_not_found() {
        let err = kubeconfig_path(Some("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, KubeconfigError::NotFound(_)));
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "current-context: kind-dev\n").unwrap();
        let resolved = kubeconfig_path(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_current_context_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: Config\ncurrent-context: k3d-dev\nclusters: []\n",
        )
        .unwrap();
        assert_eq!(current_context(&path).unwrap().as_deref(), Some("k3d-dev"));

        std::fs::write(&path, "apiVersion: v1\nkind: Config\n").unwrap();
        assert_eq!(current_context(&path).unwrap(), None);
    }
}
