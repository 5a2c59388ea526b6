//! Fatal errors decorated with actionable suggestions

use colored::Colorize;
use thiserror::Error;

use crate::channels::{ChannelError, VersionError};
use crate::k8s::ClusterError;
use crate::vfs::FetchError;

#[derive(Error, Debug)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    fn with_detail(mut self, detail: &str) -> Self {
        self.message = format!("{}: {}", self.message, detail);
        self
    }

    /// Print the error and its suggestions to stderr
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.message);

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &self.suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }
    }

    pub fn kubeconfig_unusable() -> Self {
        Self::new("Could not load a Kubernetes configuration")
            .suggest("Set KUBECONFIG or pass --kubeconfig")
            .suggest("Check the current context with: kubectl config current-context")
    }

    pub fn permission_denied() -> Self {
        Self::new("The API server refused the request")
            .suggest("Verify your credentials for the current context")
            .suggest("Applying addons usually requires cluster-admin")
    }

    pub fn unknown_kind(kind: &str) -> Self {
        Self::new(format!("The cluster does not serve kind {}", kind))
            .suggest("Install the CRD that defines it before applying the addon")
            .suggest("Check the addon's kubernetesVersion range")
    }

    pub fn s3_denied(location: &str) -> Self {
        Self::new(format!("Could not read {}", location))
            .suggest("Make the object publicly readable")
            .suggest("Or serve the channel over https:// and pass that location instead")
    }

    pub fn tool_not_found(tool: &str) -> Self {
        Self::new(format!("Required tool '{}' not found", tool))
            .suggest("Ensure the tool is in your PATH")
            .suggest("Or use --strategy server-side")
    }
}

/// Add suggestions to a fatal error based on what caused it
pub fn enhance_error(err: anyhow::Error) -> CliError {
    let message = format!("{:#}", err);

    let denied = err.chain().find_map(|cause| match cause.downcast_ref::<FetchError>() {
        Some(FetchError::S3Denied { location, .. }) => Some(location.clone()),
        _ => None,
    });
    if let Some(location) = denied {
        return CliError::s3_denied(&location).with_detail(&message);
    }

    for cause in err.chain() {
        if let Some(cluster_err) = cause.downcast_ref::<ClusterError>() {
            match cluster_err {
                ClusterError::UnknownKind(kind) => {
                    return CliError::unknown_kind(kind).with_detail(&message);
                }
                _ if matches!(cluster_err.status_code(), Some(401 | 403)) => {
                    return CliError::permission_denied().with_detail(&message);
                }
                _ => {}
            }
        }
        if let Some(VersionError::Unparseable { name, .. }) = cause.downcast_ref::<VersionError>() {
            return CliError::new(message.clone())
                .suggest(format!("Addon versions must be semantic versions, e.g. 1.2.3 (addon {})", name));
        }
        if let Some(ChannelError::Fetch { location, .. }) = cause.downcast_ref::<ChannelError>() {
            return CliError::new(message.clone())
                .suggest(format!("Check that {} is reachable", location))
                .suggest("Use -f for channel files on the local disk");
        }
    }

    if message.contains("kubeconfig") || message.contains("Kubernetes configuration") {
        return CliError::kubeconfig_unusable().with_detail(&message);
    }
    if message.contains("kubectl not found") {
        return CliError::tool_not_found("kubectl");
    }
    if message.contains("connection refused") || message.contains("timed out") {
        return CliError::new(message).suggest("Check that the API server is reachable");
    }

    CliError::new(message).suggest("Run with -vv for more details")
}
