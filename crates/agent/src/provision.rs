use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::AgentError;
use crate::shell::RemoteShell;

/// On-router paths for the supervisor pieces.
pub const KEEPALIVE_PATH: &str = "/usr/bin/netpilot-tunnel.sh";
pub const INIT_PATH: &str = "/etc/init.d/netpilot-tunnel";
pub const ENV_PATH: &str = "/etc/netpilot-tunnel.env";

/// Everything the on-router supervisor needs to hold the tunnel open.
#[derive(Debug, Clone)]
pub struct TunnelParams {
    pub vm_host: String,
    pub vm_user: String,
    pub vm_password: String,
    pub port: u16,
}

/// The keepalive loop installed on the router.
///
/// Dropbear is the stock OpenWrt SSH client; it reads the password from
/// `DROPBEAR_PASSWORD` and `-y` accepts the VM host key on first use. The
/// loop backs off exponentially up to a minute between reconnects; procd
/// respawns the whole script if it ever exits.
fn keepalive_script() -> String {
    format!(
        "#!/bin/sh\n\
         [ -f {ENV_PATH} ] || exit 1\n\
         . {ENV_PATH}\n\
         DELAY=5\n\
         while true; do\n\
         \tDROPBEAR_PASSWORD=\"$VM_PASSWORD\" ssh -y -N \\\n\
         \t\t-K 30 \\\n\
         \t\t-R \"$TUNNEL_PORT:127.0.0.1:22\" \\\n\
         \t\t\"$VM_USER@$VM_HOST\"\n\
         \tsleep $DELAY\n\
         \t[ $DELAY -lt 60 ] && DELAY=$((DELAY * 2))\n\
         done\n"
    )
}

/// procd init script so the tunnel survives router reboots.
fn init_script() -> String {
    format!(
        "#!/bin/sh /etc/rc.common\n\
         START=95\n\
         USE_PROCD=1\n\
         start_service() {{\n\
         \tprocd_open_instance\n\
         \tprocd_set_param command {KEEPALIVE_PATH}\n\
         \tprocd_set_param respawn 3600 5 0\n\
         \tprocd_close_instance\n\
         }}\n"
    )
}

/// Credentials env file, readable by root only.
fn env_file(params: &TunnelParams) -> String {
    format!(
        "VM_HOST='{}'\nVM_USER='{}'\nVM_PASSWORD='{}'\nTUNNEL_PORT='{}'\n",
        params.vm_host, params.vm_user, params.vm_password, params.port
    )
}

/// Ship a file to the router through base64 so quoting never breaks.
async fn install_file(
    shell: &dyn RemoteShell,
    path: &str,
    contents: &str,
    mode: &str,
) -> Result<(), AgentError> {
    let encoded = B64.encode(contents.as_bytes());
    let cmd =
        format!("echo '{encoded}' | base64 -d > {path} && chmod {mode} {path}");
    shell.exec(&cmd).await?.into_checked()?;
    Ok(())
}

/// Install (or re-install) the supervisor pieces. Idempotent: every step
/// overwrites what a previous run left behind.
pub async fn install(shell: &dyn RemoteShell, params: &TunnelParams) -> Result<(), AgentError> {
    install_file(shell, ENV_PATH, &env_file(params), "600").await?;
    install_file(shell, KEEPALIVE_PATH, &keepalive_script(), "755").await?;
    install_file(shell, INIT_PATH, &init_script(), "755").await?;
    // Enable for reboot survival.
    shell
        .exec(&format!("{INIT_PATH} enable"))
        .await?
        .into_checked()?;
    Ok(())
}

/// Start (or restart) the supervisor.
pub async fn start(shell: &dyn RemoteShell) -> Result<(), AgentError> {
    shell
        .exec(&format!("{INIT_PATH} restart"))
        .await?
        .into_checked()?;
    Ok(())
}

/// Stop the supervisor, keeping every installed file and the port lease.
pub async fn stop(shell: &dyn RemoteShell) -> Result<(), AgentError> {
    shell
        .exec(&format!("{INIT_PATH} stop 2>/dev/null || true"))
        .await?
        .into_checked()?;
    Ok(())
}

/// Whether the keepalive loop is currently running.
pub async fn is_running(shell: &dyn RemoteShell) -> Result<bool, AgentError> {
    let output = shell
        .exec("pgrep -f netpilot-tunnel.sh >/dev/null 2>&1 && echo up || echo down")
        .await?;
    Ok(output.stdout.trim() == "up")
}

/// Remove the supervisor and its configuration entirely (uninstall/reset).
pub async fn remove(shell: &dyn RemoteShell) -> Result<(), AgentError> {
    stop(shell).await?;
    shell
        .exec(&format!("{INIT_PATH} disable 2>/dev/null || true"))
        .await?
        .into_checked()?;
    shell
        .exec(&format!(
            "rm -f {KEEPALIVE_PATH} {INIT_PATH} {ENV_PATH}"
        ))
        .await?
        .into_checked()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_forwards_the_leased_port_back_to_ssh() {
        let script = keepalive_script();
        assert!(script.contains("-R \"$TUNNEL_PORT:127.0.0.1:22\""));
        assert!(script.contains("DROPBEAR_PASSWORD"));
        assert!(script.contains(ENV_PATH));
    }

    #[test]
    fn init_script_is_procd_managed() {
        let script = init_script();
        assert!(script.starts_with("#!/bin/sh /etc/rc.common"));
        assert!(script.contains("USE_PROCD=1"));
        assert!(script.contains(KEEPALIVE_PATH));
        assert!(script.contains("respawn"));
    }

    #[test]
    fn env_file_carries_all_parameters() {
        let env = env_file(&TunnelParams {
            vm_host: "203.0.113.7".to_owned(),
            vm_user: "netpilot".to_owned(),
            vm_password: "s3cret".to_owned(),
            port: 2207,
        });
        assert!(env.contains("VM_HOST='203.0.113.7'"));
        assert!(env.contains("TUNNEL_PORT='2207'"));
    }
}
