//! AN-022: Script hook control plane.
//!
//! Runs `bash -c <command>` once per node. The hook sees `ANDAMIO_ACTION`
//! (`provision` or `destroy`), `ANDAMIO_NODE`, `ANDAMIO_STACK` and
//! `ANDAMIO_KIND`, and gets a JSON payload on stdin:
//! `{"node", "kind", "config"}` for provision, `{"node", "kind", "outputs"}`
//! for destroy. Provision must print a JSON object of outputs (empty stdout
//! means no outputs). On destroy, exit code 3 reports "already absent".

use super::Provisioner;
use crate::core::error::ProvisionError;
use crate::core::model::ResourceNode;
use crate::core::types::{Outputs, ResolvedConfig};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Exit code a destroy hook returns when the resource does not exist.
pub const ABSENT_EXIT_CODE: i32 = 3;

/// Output from running a hook.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Control plane backed by an external command.
#[derive(Debug, Clone)]
pub struct ScriptProvisioner {
    command: String,
}

impl ScriptProvisioner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn run(&self, action: &str, node: &ResourceNode, payload: &serde_json::Value) -> Result<ExecOutput, ProvisionError> {
        let input = serde_json::to_string(payload)
            .map_err(|e| ProvisionError::Transport(format!("cannot encode payload: {}", e)))?;
        debug!(node = %node.qualified_id(), action, command = %self.command, "running hook");

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&self.command)
            .env("ANDAMIO_ACTION", action)
            .env("ANDAMIO_NODE", node.qualified_id())
            .env("ANDAMIO_STACK", node.stack())
            .env("ANDAMIO_KIND", node.kind.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProvisionError::Transport(format!("failed to spawn bash: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A hook that exits without reading stdin closes the pipe early.
            match stdin.write_all(input.as_bytes()) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ProvisionError::Transport(format!("stdin write error: {}", e))),
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ProvisionError::Transport(format!("wait error: {}", e)))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn failure(out: &ExecOutput) -> ProvisionError {
    ProvisionError::Failed {
        exit_code: Some(out.exit_code),
        message: format!("exit code {}: {}", out.exit_code, out.stderr.trim()),
    }
}

/// Parse hook stdout into an attribute map.
pub fn parse_outputs(stdout: &str) -> Result<Outputs, ProvisionError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Outputs::new());
    }
    serde_json::from_str::<Outputs>(trimmed)
        .map_err(|e| ProvisionError::InvalidOutput(format!("expected a JSON object: {}", e)))
}

impl Provisioner for ScriptProvisioner {
    fn provision(&self, node: &ResourceNode, config: &ResolvedConfig) -> Result<Outputs, ProvisionError> {
        let payload = serde_json::json!({
            "node": node.qualified_id(),
            "kind": node.kind,
            "config": config,
        });
        let out = self.run("provision", node, &payload)?;
        if !out.success() {
            return Err(failure(&out));
        }
        parse_outputs(&out.stdout)
    }

    fn destroy(&self, node: &ResourceNode, outputs: Option<&Outputs>) -> Result<(), ProvisionError> {
        let payload = serde_json::json!({
            "node": node.qualified_id(),
            "kind": node.kind,
            "outputs": outputs,
        });
        let out = self.run("destroy", node, &payload)?;
        match out.exit_code {
            0 => Ok(()),
            ABSENT_EXIT_CODE => Err(ProvisionError::NotFound),
            _ => Err(failure(&out)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Stack;
    use crate::core::types::ResourceKind;
    use indexmap::IndexMap;

    fn node() -> ResourceNode {
        let mut s = Stack::new("database");
        s.define_node("db", ResourceKind::DatabaseInstance, IndexMap::new())
            .unwrap();
        s.nodes()[0].clone()
    }

    #[test]
    fn test_an022_provision_reads_stdout_json() {
        let p = ScriptProvisioner::new(r#"echo '{"endpointAddress": "db.example.internal"}'"#);
        let out = p.provision(&node(), &ResolvedConfig::new()).unwrap();
        assert_eq!(out["endpointAddress"], serde_json::json!("db.example.internal"));
    }

    #[test]
    fn test_an022_env_and_stdin() {
        let p = ScriptProvisioner::new(
            r#"payload=$(cat); printf '{"action":"%s","node":"%s","kind":"%s","seen":%s}' "$ANDAMIO_ACTION" "$ANDAMIO_NODE" "$ANDAMIO_KIND" "$payload""#,
        );
        let mut cfg = ResolvedConfig::new();
        cfg.insert("engine".to_string(), serde_json::json!("mysql"));
        let out = p.provision(&node(), &cfg).unwrap();
        assert_eq!(out["action"], serde_json::json!("provision"));
        assert_eq!(out["node"], serde_json::json!("database/db"));
        assert_eq!(out["kind"], serde_json::json!("database_instance"));
        assert_eq!(out["seen"]["config"]["engine"], serde_json::json!("mysql"));
    }

    #[test]
    fn test_an022_empty_stdout_is_empty_outputs() {
        let p = ScriptProvisioner::new("true");
        assert!(p.provision(&node(), &ResolvedConfig::new()).unwrap().is_empty());
    }

    #[test]
    fn test_an022_failure_carries_stderr() {
        let p = ScriptProvisioner::new("echo 'quota exceeded' >&2; exit 7");
        let err = p.provision(&node(), &ResolvedConfig::new()).unwrap_err();
        match err {
            ProvisionError::Failed { exit_code, message } => {
                assert_eq!(exit_code, Some(7));
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_an022_invalid_output() {
        let p = ScriptProvisioner::new("echo not-json");
        let err = p.provision(&node(), &ResolvedConfig::new()).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidOutput(_)));
    }

    #[test]
    fn test_an022_destroy_absent_exit_code() {
        let p = ScriptProvisioner::new("cat >/dev/null; exit 3");
        assert_eq!(p.destroy(&node(), None), Err(ProvisionError::NotFound));
        let ok = ScriptProvisioner::new("cat >/dev/null");
        assert_eq!(ok.destroy(&node(), None), Ok(()));
    }

    #[test]
    fn test_an022_parse_outputs() {
        assert!(parse_outputs("  \n").unwrap().is_empty());
        assert!(parse_outputs("[1,2]").is_err());
        let out = parse_outputs(r#"{"a": 1}"#).unwrap();
        assert_eq!(out["a"], serde_json::json!(1));
    }
}
