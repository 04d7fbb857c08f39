use serde_json::json;

use netpilot_core::{BandwidthUsage, Device, ListKind, MonitorPeriod, normalize_mac};

use crate::error::CommandsError;
use crate::ssh::RouterShell;

/// ipset names provisioned on the router for the two lists.
fn set_name(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Whitelist => "netpilot_whitelist",
        ListKind::Blacklist => "netpilot_blacklist",
    }
}

/// fwmark used by the traffic-shaping filter for each list.
fn fw_mark(kind: ListKind) -> u16 {
    match kind {
        ListKind::Whitelist => 10,
        ListKind::Blacklist => 20,
    }
}

/// One router operation, as received from the Auth/DB server.
#[derive(Debug, Clone)]
pub enum RouterOp {
    Scan,
    Block { ip: String },
    Unblock { ip: String },
    ListAdd { kind: ListKind, ip: String },
    ListRemove { kind: ListKind, ip: String },
    ListEntries { kind: ListKind },
    SetMode { kind: ListKind, active: bool },
    SetRate { kind: ListKind, rate: u16 },
    Monitor { period: MonitorPeriod },
    MonitorDevice { mac: String, period: MonitorPeriod },
}

impl RouterOp {
    /// Mutating operations must never be auto-retried: a timed-out write may
    /// still have executed on the router.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::Scan | Self::ListEntries { .. } | Self::Monitor { .. } | Self::MonitorDevice { .. }
        )
    }

    /// A short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Block { .. } => "block",
            Self::Unblock { .. } => "unblock",
            Self::ListAdd { .. } => "list_add",
            Self::ListRemove { .. } => "list_remove",
            Self::ListEntries { .. } => "list_entries",
            Self::SetMode { .. } => "set_mode",
            Self::SetRate { .. } => "set_rate",
            Self::Monitor { .. } => "monitor",
            Self::MonitorDevice { .. } => "monitor_device",
        }
    }
}

/// Execute one operation against an open shell and shape its result for the
/// envelope's `data` field.
pub async fn execute(
    shell: &dyn RouterShell,
    op: &RouterOp,
) -> Result<serde_json::Value, CommandsError> {
    match op {
        RouterOp::Scan => {
            let leases = shell.exec("cat /tmp/dhcp.leases").await?;
            let arp = shell.exec("cat /proc/net/arp").await?.into_checked()?;
            // A router that never served DHCP has no leases file; exit != 0
            // there just means no hostnames.
            let lease_stdout = if leases.success() { leases.stdout } else { String::new() };
            let devices = merge_scan(&arp.stdout, &lease_stdout);
            Ok(serde_json::to_value(devices)
                .map_err(|e| CommandsError::Internal(e.to_string()))?)
        }
        RouterOp::Block { ip } => {
            let cmd = format!(
                "iptables -C FORWARD -s {ip} -j DROP 2>/dev/null || iptables -I FORWARD -s {ip} -j DROP"
            );
            shell.exec(&cmd).await?.into_checked()?;
            Ok(json!({ "blocked": ip }))
        }
        RouterOp::Unblock { ip } => {
            let cmd = format!("iptables -D FORWARD -s {ip} -j DROP 2>/dev/null || true");
            shell.exec(&cmd).await?.into_checked()?;
            Ok(json!({ "unblocked": ip }))
        }
        RouterOp::ListAdd { kind, ip } => {
            let set = set_name(*kind);
            let cmd = format!(
                "ipset create -exist {set} hash:ip && ipset add -exist {set} {ip}"
            );
            shell.exec(&cmd).await?.into_checked()?;
            Ok(json!({ "list": kind, "added": ip }))
        }
        RouterOp::ListRemove { kind, ip } => {
            let set = set_name(*kind);
            let cmd = format!("ipset del -exist {set} {ip} 2>/dev/null || true");
            shell.exec(&cmd).await?.into_checked()?;
            Ok(json!({ "list": kind, "removed": ip }))
        }
        RouterOp::ListEntries { kind } => {
            let set = set_name(*kind);
            // A missing set reads as an empty list, not a failure.
            let cmd = format!("ipset list {set} -output save 2>/dev/null || true");
            let output = shell.exec(&cmd).await?.into_checked()?;
            let ips = parse_ipset_save(&output.stdout, set);
            Ok(json!({ "list": kind, "ips": ips }))
        }
        RouterOp::SetMode { kind, active } => {
            let cmd = mode_command(*kind, *active);
            shell.exec(&cmd).await?.into_checked()?;
            Ok(json!({ "list": kind, "active": active }))
        }
        RouterOp::SetRate { kind, rate } => {
            let cmd = rate_command(*kind, *rate);
            shell.exec(&cmd).await?.into_checked()?;
            Ok(json!({ "list": kind, "rate": rate }))
        }
        RouterOp::Monitor { period } => {
            let output = shell
                .exec(&monitor_command(*period, None))
                .await?
                .into_checked()?;
            let usage = parse_nlbw_csv(&output.stdout);
            Ok(serde_json::to_value(usage)
                .map_err(|e| CommandsError::Internal(e.to_string()))?)
        }
        RouterOp::MonitorDevice { mac, period } => {
            let output = shell
                .exec(&monitor_command(*period, Some(mac)))
                .await?
                .into_checked()?;
            let usage = parse_nlbw_csv(&output.stdout);
            let wanted = normalize_mac(mac).unwrap_or_else(|_| mac.to_uppercase());
            let device = usage.into_iter().find(|u| u.mac == wanted);
            Ok(serde_json::to_value(device)
                .map_err(|e| CommandsError::Internal(e.to_string()))?)
        }
    }
}

/// The iptables rule that enforces a list mode on the LAN bridge.
fn mode_rule(kind: ListKind) -> String {
    let set = set_name(kind);
    match kind {
        ListKind::Whitelist => {
            format!("FORWARD -i br-lan -m set ! --match-set {set} src -j DROP")
        }
        ListKind::Blacklist => {
            format!("FORWARD -i br-lan -m set --match-set {set} src -j DROP")
        }
    }
}

fn mode_command(kind: ListKind, active: bool) -> String {
    let set = set_name(kind);
    let rule = mode_rule(kind);
    if active {
        format!(
            "ipset create -exist {set} hash:ip && \
             (iptables -C {rule} 2>/dev/null || iptables -I {rule})"
        )
    } else {
        format!("iptables -D {rule} 2>/dev/null || true")
    }
}

fn rate_command(kind: ListKind, rate: u16) -> String {
    let set = set_name(kind);
    let mark = fw_mark(kind);
    format!(
        "tc qdisc replace dev br-lan root handle 1: htb default 90 && \
         tc class replace dev br-lan parent 1: classid 1:{mark} htb rate {rate}mbit && \
         tc filter replace dev br-lan parent 1: protocol ip prio 1 handle {mark} fw flowid 1:{mark} && \
         (iptables -t mangle -C FORWARD -m set --match-set {set} src -j MARK --set-mark {mark} 2>/dev/null || \
          iptables -t mangle -A FORWARD -m set --match-set {set} src -j MARK --set-mark {mark})"
    )
}

fn monitor_command(period: MonitorPeriod, mac: Option<&str>) -> String {
    let base = match period {
        MonitorPeriod::Current => "nlbw -c csv -g mac".to_owned(),
        MonitorPeriod::LastWeek => "nlbw -c csv -g mac -t -1".to_owned(),
        MonitorPeriod::LastMonth => "nlbw -c csv -g mac -t -2".to_owned(),
    };
    match mac {
        Some(mac) => format!("{base} | grep -i '{mac}\\|rx_bytes'"),
        None => base,
    }
}

/// Merge `/proc/net/arp` (presence) with `/tmp/dhcp.leases` (hostnames).
///
/// ARP rows carry `ip hw_type flags mac mask device`; only entries with the
/// complete flag (`0x2`) and a real MAC count as present. Lease rows carry
/// `expiry mac ip hostname client_id`. Malformed lines are skipped.
fn merge_scan(arp: &str, leases: &str) -> Vec<Device> {
    let mut hostnames: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for line in leases.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 4 {
            hostnames.insert(fields[2].to_owned(), fields[3].to_owned());
        }
    }

    let mut devices = Vec::new();
    for line in arp.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || fields[2] != "0x2" {
            continue;
        }
        let ip = fields[0];
        let Ok(mac) = normalize_mac(fields[3]) else {
            continue;
        };
        if mac == "00:00:00:00:00:00" {
            continue;
        }
        devices.push(Device {
            ip: ip.to_owned(),
            mac,
            hostname: hostnames.get(ip).cloned().unwrap_or_else(|| "*".to_owned()),
        });
    }
    devices.sort_by(|a, b| a.ip.cmp(&b.ip));
    devices
}

/// Extract member IPs from `ipset ... -output save` for one set.
fn parse_ipset_save(output: &str, set: &str) -> Vec<String> {
    let prefix = format!("add {set} ");
    let mut ips: Vec<String> = output
        .lines()
        .filter_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|rest| {
            rest.split_whitespace()
                .next()
                .unwrap_or(rest)
                .to_owned()
        })
        .collect();
    ips.sort();
    ips
}

/// Parse nlbwmon CSV grouped by MAC into per-device counters.
///
/// The header names the columns; rows are `;`-separated. Unknown columns
/// and malformed rows are skipped rather than failing the whole scan.
fn parse_nlbw_csv(output: &str) -> Vec<BandwidthUsage> {
    let mut lines = output.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(';').map(str::trim).collect();
    let mac_idx = columns.iter().position(|c| c.eq_ignore_ascii_case("mac"));
    let rx_idx = columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case("rx_bytes"))
        .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case("rx")));
    let tx_idx = columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case("tx_bytes"))
        .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case("tx")));
    let (Some(mac_idx), Some(rx_idx), Some(tx_idx)) = (mac_idx, rx_idx, tx_idx) else {
        return Vec::new();
    };

    let mut usage = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        let (Some(mac), Some(rx), Some(tx)) = (
            fields.get(mac_idx),
            fields.get(rx_idx),
            fields.get(tx_idx),
        ) else {
            continue;
        };
        let Ok(mac) = normalize_mac(mac) else { continue };
        let (Ok(rx_bytes), Ok(tx_bytes)) = (rx.parse::<u64>(), tx.parse::<u64>()) else {
            continue;
        };
        usage.push(BandwidthUsage {
            mac,
            rx_bytes,
            tx_bytes,
        });
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARP: &str = "IP address       HW type     Flags       HW address            Mask     Device\n\
192.168.1.10     0x1         0x2         aa:bb:cc:11:22:33     *        br-lan\n\
192.168.1.77     0x1         0x0         00:00:00:00:00:00     *        br-lan\n\
192.168.1.20     0x1         0x2         de:ad:be:ef:00:01     *        br-lan\n";

    const LEASES: &str = "1692001234 aa:bb:cc:11:22:33 192.168.1.10 phone 01:aa:bb:cc:11:22:33\n\
1692005678 de:ad:be:ef:00:01 192.168.1.20 * *\n";

    #[test]
    fn scan_merges_arp_and_leases() {
        let devices = merge_scan(ARP, LEASES);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].ip, "192.168.1.10");
        assert_eq!(devices[0].mac, "AA:BB:CC:11:22:33");
        assert_eq!(devices[0].hostname, "phone");
        assert_eq!(devices[1].hostname, "*");
    }

    #[test]
    fn scan_skips_incomplete_arp_entries() {
        let devices = merge_scan(ARP, "");
        assert!(devices.iter().all(|d| d.ip != "192.168.1.77"));
    }

    #[test]
    fn scan_tolerates_garbage_lines() {
        let arp = "header\nnot enough fields\n192.168.1.5 0x1 0x2 aa:bb:cc:dd:ee:ff * br-lan\n";
        let devices = merge_scan(arp, "truncated lease line\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip, "192.168.1.5");
    }

    #[test]
    fn ipset_save_parsing() {
        let output = "create netpilot_whitelist hash:ip family inet hashsize 1024\n\
add netpilot_whitelist 192.168.1.10\n\
add netpilot_whitelist 192.168.1.20 timeout 0\n\
add netpilot_blacklist 192.168.1.99\n";
        let ips = parse_ipset_save(output, "netpilot_whitelist");
        assert_eq!(ips, vec!["192.168.1.10", "192.168.1.20"]);
    }

    #[test]
    fn ipset_save_of_missing_set_is_empty() {
        assert!(parse_ipset_save("", "netpilot_whitelist").is_empty());
    }

    #[test]
    fn nlbw_csv_parsing_by_header_position() {
        let output = "mac;conns;rx_bytes;rx_pkts;tx_bytes;tx_pkts\n\
aa:bb:cc:11:22:33;4;1048576;900;65536;300\n\
de:ad:be:ef:00:01;1;2048;10;512;4\n\
bogus line without separators\n";
        let usage = parse_nlbw_csv(output);
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].mac, "AA:BB:CC:11:22:33");
        assert_eq!(usage[0].rx_bytes, 1_048_576);
        assert_eq!(usage[1].tx_bytes, 512);
    }

    #[test]
    fn nlbw_csv_without_expected_columns_is_empty() {
        assert!(parse_nlbw_csv("time;value\n1;2\n").is_empty());
        assert!(parse_nlbw_csv("").is_empty());
    }

    #[test]
    fn mutating_classification() {
        assert!(!RouterOp::Scan.is_mutating());
        assert!(
            !RouterOp::ListEntries {
                kind: ListKind::Whitelist
            }
            .is_mutating()
        );
        assert!(
            RouterOp::Block {
                ip: "192.168.1.10".into()
            }
            .is_mutating()
        );
        assert!(
            RouterOp::SetMode {
                kind: ListKind::Blacklist,
                active: true
            }
            .is_mutating()
        );
    }

    #[test]
    fn mode_commands_reference_the_right_set() {
        let activate = mode_command(ListKind::Whitelist, true);
        assert!(activate.contains("netpilot_whitelist"));
        assert!(activate.contains("! --match-set"));

        let deactivate = mode_command(ListKind::Blacklist, false);
        assert!(deactivate.starts_with("iptables -D"));
        assert!(deactivate.contains("netpilot_blacklist"));
    }
}
