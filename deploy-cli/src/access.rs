//! Operator-facing access instructions
//!
//! The service is internal-only (no public load balancer), so reaching it
//! goes through a port-forward tunnel.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReport {
    pub namespace: String,
    pub workload: String,
    pub service: String,
    pub port: u16,
    /// kubeconfig context to pin commands to, when known
    pub context: Option<String>,
}

impl AccessReport {
    fn kubectl(&self) -> String {
        match &self.context {
            Some(ctx) => format!("kubectl --context {ctx} -n {}", self.namespace),
            None => format!("kubectl -n {}", self.namespace),
        }
    }

    pub fn port_forward_command(&self) -> String {
        format!(
            "{} port-forward svc/{} {port}:{port}",
            self.kubectl(),
            self.service,
            port = self.port
        )
    }

    pub fn health_url(&self) -> String {
        format!("http://localhost:{}/health", self.port)
    }
}

impl fmt::Display for AccessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kubectl = self.kubectl();
        writeln!(f, "🔌 Access (service is cluster-internal):")?;
        writeln!(f, "  {}", self.port_forward_command())?;
        writeln!(f, "  curl {}", self.health_url())?;
        writeln!(f)?;
        writeln!(f, "🔍 Inspect:")?;
        writeln!(f, "  {kubectl} rollout status deployment/{}", self.workload)?;
        writeln!(f, "  {kubectl} get pods -l app={}", self.workload)?;
        writeln!(f, "  {kubectl} logs deployment/{} --tail=100 -f", self.workload)?;
        write!(f, "  {kubectl} describe deployment/{}", self.workload)
    }
}
