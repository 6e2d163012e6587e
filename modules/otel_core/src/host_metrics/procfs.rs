//! Parsers for the few procfs files the host sampler reads.

/// Aggregate CPU jiffies from the first `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    pub fn parse_stat(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(str::parse)
            .collect::<Result<_, _>>()
            .ok()?;
        if fields.len() < 4 {
            return None;
        }
        // user nice system idle iowait irq softirq steal [guest guest_nice]
        // guest time is already accounted in user/nice.
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total = fields.iter().take(8).sum();
        Some(Self { idle, total })
    }

    /// Busy share of the interval between `prev` and `self`, in `[0, 1]`.
    pub fn utilization_since(&self, prev: &CpuTimes) -> Option<f64> {
        let total = self.total.checked_sub(prev.total)?;
        let idle = self.idle.checked_sub(prev.idle)?;
        if total == 0 {
            return None;
        }
        Some((1.0 - idle as f64 / total as f64).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemInfo {
    pub fn parse(meminfo: &str) -> Option<Self> {
        let mut total = None;
        let mut available = None;
        let mut free = None;
        for line in meminfo.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let slot = match key {
                "MemTotal" => &mut total,
                "MemAvailable" => &mut available,
                "MemFree" => &mut free,
                _ => continue,
            };
            *slot = parse_kib(rest);
        }
        Some(Self {
            total_bytes: total?,
            available_bytes: available.or(free)?,
        })
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

impl LoadAvg {
    pub fn parse(loadavg: &str) -> Option<Self> {
        let mut it = loadavg.split_whitespace().map(str::parse::<f64>);
        Some(Self {
            one: it.next()?.ok()?,
            five: it.next()?.ok()?,
            fifteen: it.next()?.ok()?,
        })
    }
}

/// Resident set size from `/proc/<pid>/status`.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|l| l.strip_prefix("VmRSS:"))
        .and_then(parse_kib)
}

fn parse_kib(value: &str) -> Option<u64> {
    let mut parts = value.split_whitespace();
    let n: u64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some("kB") | None => n.checked_mul(1024),
        Some(_) => None,
    }
}
