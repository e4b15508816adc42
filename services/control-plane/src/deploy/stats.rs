//! Parsing of `docker stats` and `du` output.

use appz_remote::shell_quote;
use serde::{Deserialize, Serialize};

/// Per-container resource usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub name: String,
    pub memory_mb: f64,
    /// Percent of one core, as docker reports it.
    pub cpu_percent: f64,
}

/// Aggregate usage of one workload's containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStats {
    pub containers: Vec<ContainerStats>,
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

impl WorkloadStats {
    pub fn from_containers(containers: Vec<ContainerStats>) -> Self {
        let memory_mb = containers.iter().map(|c| c.memory_mb).sum();
        let cpu_percent = containers.iter().map(|c| c.cpu_percent).sum();
        Self {
            containers,
            memory_mb,
            cpu_percent,
        }
    }

    /// CPU expressed in cores.
    pub fn cpu_cores(&self) -> f64 {
        self.cpu_percent / 100.0
    }
}

/// One `name|memory|cpu` line per running container whose name contains
/// `name_filter`. Prints nothing if none match.
pub fn stats_command(name_filter: &str) -> String {
    format!(
        "docker ps -q --filter name={} | xargs -r docker stats --no-stream --format '{{{{.Name}}}}|{{{{.MemUsage}}}}|{{{{.CPUPerc}}}}'",
        shell_quote(name_filter)
    )
}

/// Megabytes used under `path`, or nothing if it does not exist.
pub fn disk_usage_command(path: &str) -> String {
    format!("du -sm {} 2>/dev/null | cut -f1", shell_quote(path))
}

pub fn parse_stats(stdout: &str) -> Vec<ContainerStats> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().split('|');
            let name = parts.next()?.trim();
            let memory = parts.next()?;
            let cpu = parts.next()?;
            if name.is_empty() {
                return None;
            }
            Some(ContainerStats {
                name: name.to_string(),
                memory_mb: parse_memory_mb(memory),
                cpu_percent: cpu.trim().trim_end_matches('%').parse().unwrap_or(0.0),
            })
        })
        .collect()
}

/// Used part of a `"256MiB / 512MiB"` pair, in MiB.
fn parse_memory_mb(field: &str) -> f64 {
    let used = field.split('/').next().unwrap_or("").trim();
    let (number, factor) = if let Some(n) = used.strip_suffix("GiB") {
        (n, 1024.0)
    } else if let Some(n) = used.strip_suffix("MiB") {
        (n, 1.0)
    } else if let Some(n) = used.strip_suffix("KiB") {
        (n, 1.0 / 1024.0)
    } else {
        return 0.0;
    };
    number.trim().parse::<f64>().map(|n| n * factor).unwrap_or(0.0)
}

pub fn parse_disk_usage_mb(stdout: &str) -> Option<f64> {
    stdout.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats() {
        let out = "svc-1-app|256MiB / 512MiB|5.25%\nsvc-1-db|1.5GiB / 2GiB|0.40%\n\ngarbage\n";
        let stats = parse_stats(out);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].memory_mb, 256.0);
        assert_eq!(stats[0].cpu_percent, 5.25);
        assert_eq!(stats[1].memory_mb, 1536.0);

        let total = WorkloadStats::from_containers(stats);
        assert_eq!(total.memory_mb, 1792.0);
        assert!((total.cpu_cores() - 0.0565).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_units_count_as_zero() {
        let stats = parse_stats("x|12B / 1GiB|n/a");
        assert_eq!(stats[0].memory_mb, 0.0);
        assert_eq!(stats[0].cpu_percent, 0.0);
    }

    #[test]
    fn test_commands_quote_arguments() {
        assert_eq!(disk_usage_command("/apps/svc-1"), "du -sm /apps/svc-1 2>/dev/null | cut -f1");
        assert!(stats_command("svc-1").contains("--filter name=svc-1 |"));
        assert!(stats_command("svc-1").contains("'{{.Name}}|{{.MemUsage}}|{{.CPUPerc}}'"));
        assert_eq!(parse_disk_usage_mb("2048\n"), Some(2048.0));
        assert_eq!(parse_disk_usage_mb(""), None);
    }
}
