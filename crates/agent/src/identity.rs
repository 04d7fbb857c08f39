use netpilot_core::RouterId;

use crate::error::AgentError;
use crate::shell::RemoteShell;

/// Interfaces probed for the primary LAN MAC, in order. OpenWrt bridges the
/// LAN ports as `br-lan`; plain `eth0` covers single-port devices.
const CANDIDATE_INTERFACES: &[&str] = &["br-lan", "eth0"];

/// Read the router's stable identity.
///
/// The same physical router must always produce the same id, so this reads
/// hardware identity (the LAN MAC), never anything configuration-derived.
pub async fn discover_router_id(shell: &dyn RemoteShell) -> Result<RouterId, AgentError> {
    for interface in CANDIDATE_INTERFACES {
        let output = shell
            .exec(&format!("cat /sys/class/net/{interface}/address"))
            .await?;
        if !output.success() {
            continue;
        }
        let raw = output.stdout.trim();
        if raw.is_empty() {
            continue;
        }
        return RouterId::from_mac(raw)
            .map_err(|e| AgentError::Identity(format!("bad MAC on {interface}: {e}")));
    }
    Err(AgentError::Identity(format!(
        "no readable MAC on any of {CANDIDATE_INTERFACES:?}"
    )))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use crate::shell::ExecOutput;

    use super::*;

    struct MapShell {
        responses: HashMap<String, ExecOutput>,
    }

    impl MapShell {
        fn new(entries: &[(&str, u32, &str)]) -> Self {
            let mut responses = HashMap::new();
            for (cmd, exit, stdout) in entries {
                responses.insert(
                    (*cmd).to_owned(),
                    ExecOutput {
                        exit_status: *exit,
                        stdout: (*stdout).to_owned(),
                        stderr: String::new(),
                    },
                );
            }
            Self { responses }
        }
    }

    #[async_trait]
    impl RemoteShell for MapShell {
        async fn exec(&self, command: &str) -> Result<ExecOutput, AgentError> {
            Ok(self.responses.get(command).cloned().unwrap_or(ExecOutput {
                exit_status: 1,
                stdout: String::new(),
                stderr: "No such file or directory".to_owned(),
            }))
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn reads_br_lan_mac() {
        let shell = MapShell::new(&[(
            "cat /sys/class/net/br-lan/address",
            0,
            "AA:BB:CC:DD:EE:FF\n",
        )]);
        let id = discover_router_id(&shell).await.unwrap();
        assert_eq!(id.as_str(), "aabbccddeeff");
    }

    #[tokio::test]
    async fn falls_back_to_eth0() {
        let shell = MapShell::new(&[(
            "cat /sys/class/net/eth0/address",
            0,
            "de:ad:be:ef:00:01\n",
        )]);
        let id = discover_router_id(&shell).await.unwrap();
        assert_eq!(id.as_str(), "deadbeef0001");
    }

    #[tokio::test]
    async fn discovery_is_deterministic() {
        let shell = MapShell::new(&[(
            "cat /sys/class/net/br-lan/address",
            0,
            "AA:BB:CC:DD:EE:FF\n",
        )]);
        let a = discover_router_id(&shell).await.unwrap();
        let b = discover_router_id(&shell).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn missing_interfaces_error_out() {
        let shell = MapShell::new(&[]);
        let err = discover_router_id(&shell).await.unwrap_err();
        assert!(matches!(err, AgentError::Identity(_)));
    }
}
