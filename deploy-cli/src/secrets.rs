//! Secret gatekeeping
//!
//! The orchestrator never creates or defaults secret material. It checks that
//! the secret bundle exists and otherwise stops with a pointer to the
//! interactive creation path.

use crate::backend::{BackendError, ControlPlane};
use crate::error::{DeployError, Result, Stage};
use tracing::info;

/// A secret the workload consumes at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
    /// Keys the workload expects; only used in remediation text
    pub required_keys: Vec<String>,
    /// Operator-supplied remediation command, replacing the default hint
    pub remediation: Option<String>,
}

impl SecretRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            required_keys: Vec::new(),
            remediation: None,
        }
    }

    pub fn remediation(&self) -> String {
        if let Some(custom) = &self.remediation {
            return custom.clone();
        }
        let mut hint = format!(
            "create it with `kubectl create secret generic {} -n {} --from-env-file=.env`",
            self.name, self.namespace
        );
        if !self.required_keys.is_empty() {
            hint.push_str(&format!(
                " (expected keys: {})",
                self.required_keys.join(", ")
            ));
        }
        hint
    }
}

/// Fail with `MissingSecret` unless the secret exists. Read-only.
pub async fn require_secret(plane: &dyn ControlPlane, secret: &SecretRef) -> Result<()> {
    let exists = plane
        .secret_exists(&secret.namespace, &secret.name)
        .await
        .map_err(|e| match e {
            BackendError::Unauthorized { message } => DeployError::AuthenticationFailure {
                stage: Stage::Secret,
                entity: format!("secret {}/{}", secret.namespace, secret.name),
                message,
            },
            BackendError::Failed { message } => DeployError::ControlPlane {
                stage: Stage::Secret,
                operation: format!("checking secret {}/{}", secret.namespace, secret.name),
                message,
            },
        })?;

    if !exists {
        return Err(DeployError::MissingSecret {
            namespace: secret.namespace.clone(),
            name: secret.name.clone(),
            remediation: secret.remediation(),
        });
    }

    info!(namespace = %secret.namespace, name = %secret.name, "secret present");
    Ok(())
}
