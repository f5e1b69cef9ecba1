//! Host metric queries behind the `MetricsProvider` capability, plus the
//! assembler that folds them into one `Pulse`.

use std::path::PathBuf;

use sysinfo::{Disks, MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use thiserror::Error;
use tracing::warn;

use crate::types::Pulse;

/// Base-2 interpretation of a KB, not the SI unit.
pub const BYTES_PER_KB: u64 = 1024;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to read {path}: {source}")]
    Stat {
        path: &'static str,
        source: std::io::Error,
    },
    #[error("malformed cpu line in /proc/stat")]
    MalformedStat,
    #[error("no disk mounted at or above {}", .0.display())]
    MountNotFound(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryReading {
    pub total_kb: u32,
    pub free_kb: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DiskReading {
    pub total_kb: u32,
    pub free_kb: u32,
}

/// Point-in-time host queries. The session engine and the assembler depend
/// only on this trait; the platform details live in the implementation.
pub trait MetricsProvider {
    /// CPU load as a fraction in [0, 1] since the previous query.
    fn cpu_load(&mut self) -> Result<f64, MetricsError>;
    /// Total and available physical memory in KB.
    fn memory(&mut self) -> Result<MemoryReading, MetricsError>;
    /// Total and available space in KB at the configured mount point.
    fn disk(&mut self) -> Result<DiskReading, MetricsError>;
    fn uptime_secs(&mut self) -> Result<u32, MetricsError>;
    /// Whether any process from the configured name set is running.
    fn database_running(&mut self) -> Result<bool, MetricsError>;
}

/// Pull every provider query into one record. A failing query degrades to a
/// zero/false field instead of aborting the snapshot; partial data still
/// tells a poller the host is alive.
pub fn assemble(provider: &mut dyn MetricsProvider) -> Pulse {
    let cpu_load = provider.cpu_load().unwrap_or_else(|e| {
        warn!("cpu load unavailable: {e}");
        0.0
    });
    let database_running = provider.database_running().unwrap_or_else(|e| {
        warn!("process scan failed: {e}");
        false
    });
    let uptime_secs = provider.uptime_secs().unwrap_or_else(|e| {
        warn!("uptime unavailable: {e}");
        0
    });
    let disk = provider.disk().unwrap_or_else(|e| {
        warn!("disk stats unavailable: {e}");
        DiskReading {
            total_kb: 0,
            free_kb: 0,
        }
    });
    let mem = provider.memory().unwrap_or_else(|e| {
        warn!("memory stats unavailable: {e}");
        MemoryReading {
            total_kb: 0,
            free_kb: 0,
        }
    });

    Pulse {
        cpu_load,
        database_running,
        uptime_secs,
        disk_total_kb: disk.total_kb,
        disk_free_kb: disk.free_kb,
        mem_total_kb: mem.total_kb,
        mem_free_kb: mem.free_kb,
    }
}

/// Rolling tick counts behind the CPU load query, owned by the provider
/// instance. The first sample has no predecessor and reads as idle.
#[derive(Debug, Default)]
pub struct CpuSampler {
    last_total: u64,
    last_idle: u64,
}

impl CpuSampler {
    /// Feed the next (total, idle) tick pair; returns the load over the
    /// interval since the previous pair.
    pub fn advance(&mut self, total: u64, idle: u64) -> f64 {
        let total_delta = total.saturating_sub(self.last_total);
        let idle_delta = idle.saturating_sub(self.last_idle);
        let primed = self.last_total != 0;
        self.last_total = total;
        self.last_idle = idle;
        if !primed || total_delta == 0 {
            return 0.0;
        }
        (1.0 - idle_delta as f64 / total_delta as f64).clamp(0.0, 1.0)
    }
}

/// First line of /proc/stat: `cpu  user nice system idle iowait irq softirq
/// steal ...`. Total is the sum of the first eight fields, idle the fourth.
fn parse_cpu_ticks(stat: &str) -> Result<(u64, u64), MetricsError> {
    let line = stat.lines().next().ok_or(MetricsError::MalformedStat)?;
    let mut it = line.split_whitespace();
    if it.next() != Some("cpu") {
        return Err(MetricsError::MalformedStat);
    }
    let mut total: u64 = 0;
    let mut idle: u64 = 0;
    let mut seen = 0usize;
    for (i, tok) in it.take(8).enumerate() {
        let v = tok.parse::<u64>().map_err(|_| MetricsError::MalformedStat)?;
        total = total.saturating_add(v);
        if i == 3 {
            idle = v;
        }
        seen += 1;
    }
    if seen < 4 {
        return Err(MetricsError::MalformedStat);
    }
    Ok((total, idle))
}

/// Production provider: persistent sysinfo handles plus the CPU sampler.
pub struct SystemProbe {
    sys: System,
    disks: Disks,
    cpu: CpuSampler,
    mount: PathBuf,
    db_procs: Vec<String>,
}

impl SystemProbe {
    pub fn new(mount: PathBuf, db_procs: Vec<String>) -> Self {
        let refresh = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
        Self {
            sys: System::new_with_specifics(refresh),
            disks: Disks::new_with_refreshed_list(),
            cpu: CpuSampler::default(),
            mount,
            db_procs,
        }
    }
}

fn to_kb(bytes: u64) -> u32 {
    (bytes / BYTES_PER_KB).min(u64::from(u32::MAX)) as u32
}

impl MetricsProvider for SystemProbe {
    #[cfg(target_os = "linux")]
    fn cpu_load(&mut self) -> Result<f64, MetricsError> {
        let stat = std::fs::read_to_string("/proc/stat").map_err(|source| MetricsError::Stat {
            path: "/proc/stat",
            source,
        })?;
        let (total, idle) = parse_cpu_ticks(&stat)?;
        Ok(self.cpu.advance(total, idle))
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_load(&mut self) -> Result<f64, MetricsError> {
        // sysinfo keeps its own usage delta between refreshes
        self.sys.refresh_cpu_usage();
        Ok((f64::from(self.sys.global_cpu_usage()) / 100.0).clamp(0.0, 1.0))
    }

    fn memory(&mut self) -> Result<MemoryReading, MetricsError> {
        self.sys.refresh_memory();
        Ok(MemoryReading {
            total_kb: to_kb(self.sys.total_memory()),
            free_kb: to_kb(self.sys.available_memory()),
        })
    }

    fn disk(&mut self) -> Result<DiskReading, MetricsError> {
        self.disks.refresh(false); // don't drop disks that vanish mid-poll
        let best = self
            .disks
            .iter()
            .filter(|d| self.mount.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| MetricsError::MountNotFound(self.mount.clone()))?;
        Ok(DiskReading {
            total_kb: to_kb(best.total_space()),
            free_kb: to_kb(best.available_space()),
        })
    }

    fn uptime_secs(&mut self) -> Result<u32, MetricsError> {
        Ok(System::uptime().min(u64::from(u32::MAX)) as u32)
    }

    fn database_running(&mut self) -> Result<bool, MetricsError> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        Ok(self.sys.processes().values().any(|p| {
            let name = p.name().to_string_lossy();
            self.db_procs.iter().any(|want| want.as_str() == name.as_ref())
        }))
    }
}
