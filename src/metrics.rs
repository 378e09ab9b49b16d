use crate::exec;
use crate::model::ResourceSample;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STAT_SAMPLE_GAP: Duration = Duration::from_secs(1);

/// Collect one host metrics sample. Every probe is best-effort: a failed
/// read degrades that metric to 0 and must never block the heartbeat path.
pub async fn sample() -> ResourceSample {
    ResourceSample {
        cpu_percent: cpu_percent().await,
        ram_percent: ram_percent().await,
        load_percent: load_percent().await,
    }
}

/// 1-minute load average normalized by logical core count, capped at 100.
pub async fn load_percent() -> f64 {
    match tokio::fs::read_to_string("/proc/loadavg").await {
        Ok(raw) => load_percent_from(&raw, logical_cores()),
        Err(_) => 0.0,
    }
}

pub fn load_percent_from(raw: &str, cores: usize) -> f64 {
    let Some(load) = raw
        .split_whitespace()
        .next()
        .and_then(|value| value.parse::<f64>().ok())
    else {
        return 0.0;
    };
    (load / cores.max(1) as f64 * 100.0).clamp(0.0, 100.0)
}

/// Aggregate CPU busy percentage. The primary probe reads the instantaneous
/// idle figure from `top`; the fallback diffs two /proc/stat snapshots over
/// a fixed interval.
pub async fn cpu_percent() -> f64 {
    if let Some(idle) = top_idle().await {
        return (100.0 - idle).clamp(0.0, 100.0);
    }
    stat_busy().await.unwrap_or(0.0)
}

async fn top_idle() -> Option<f64> {
    let raw = exec::run("top", &["-bn1"], PROBE_TIMEOUT).await.ok()?;
    parse_top_idle(&raw)
}

pub fn parse_top_idle(raw: &str) -> Option<f64> {
    static IDLE: OnceLock<Regex> = OnceLock::new();
    let idle = IDLE.get_or_init(|| Regex::new(r"([\d.]+)\s*%?\s*id").expect("idle pattern"));

    let line = raw
        .lines()
        .find(|line| line.contains("Cpu(s)") || line.trim_start().starts_with("CPU:"))?;
    idle.captures(line)?[1].parse().ok()
}

async fn stat_busy() -> Option<f64> {
    let first = read_proc_stat().await?;
    tokio::time::sleep(STAT_SAMPLE_GAP).await;
    let second = read_proc_stat().await?;
    busy_between(first, second)
}

async fn read_proc_stat() -> Option<CpuTimes> {
    let raw = tokio::fs::read_to_string("/proc/stat").await.ok()?;
    parse_proc_stat(&raw)
}

/// Cumulative CPU-time counters from the aggregate `cpu` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub fn parse_proc_stat(raw: &str) -> Option<CpuTimes> {
    let line = raw.lines().find(|line| line.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|value| value.parse().ok())
        .collect();
    // user nice system idle iowait irq softirq
    if fields.len() < 7 {
        return None;
    }
    Some(CpuTimes {
        idle: fields[3],
        total: fields.iter().take(7).sum(),
    })
}

pub fn busy_between(first: CpuTimes, second: CpuTimes) -> Option<f64> {
    let total = second.total.checked_sub(first.total)?;
    if total == 0 {
        return None;
    }
    let idle = second.idle.saturating_sub(first.idle);
    Some((100.0 * (1.0 - idle as f64 / total as f64)).clamp(0.0, 100.0))
}

/// Used/total memory ratio, capped at 100.
pub async fn ram_percent() -> f64 {
    match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(raw) => ram_percent_from(&raw),
        Err(_) => 0.0,
    }
}

pub fn ram_percent_from(raw: &str) -> f64 {
    let (Some(total), Some(available)) = (meminfo_kb(raw, "MemTotal:"), meminfo_kb(raw, "MemAvailable:"))
    else {
        return 0.0;
    };
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(available);
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

fn meminfo_kb(raw: &str, field: &str) -> Option<u64> {
    raw.lines()
        .find(|line| line.starts_with(field))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}
