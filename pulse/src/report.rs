//! Parse and render the nine-field pulse record.

use anyhow::{bail, Context};
use serde::Serialize;

/// One decoded pulse, field for field as the agent sent it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub cpu_load: f64,
    pub database_running: bool,
    pub uptime_secs: u64,
    pub disk_total_kb: u64,
    pub disk_free_kb: u64,
    pub disk_used_fraction: f64,
    pub mem_total_kb: u64,
    pub mem_free_kb: u64,
    pub mem_used_fraction: f64,
}

impl Report {
    pub fn parse(record: &str) -> anyhow::Result<Report> {
        let fields: Vec<&str> = record.trim_end().split(':').collect();
        if fields.len() != 9 {
            bail!("expected 9 fields, got {} in {record:?}", fields.len());
        }
        Ok(Report {
            cpu_load: fields[0].parse().context("cpu field")?,
            database_running: match fields[1] {
                "1" => true,
                "0" => false,
                other => bail!("bad database flag {other:?}"),
            },
            uptime_secs: fields[2].parse().context("uptime field")?,
            disk_total_kb: fields[3].parse().context("disk total field")?,
            disk_free_kb: fields[4].parse().context("disk free field")?,
            disk_used_fraction: fields[5].parse().context("disk usage field")?,
            mem_total_kb: fields[6].parse().context("ram total field")?,
            mem_free_kb: fields[7].parse().context("ram free field")?,
            mem_used_fraction: fields[8].parse().context("ram usage field")?,
        })
    }

    /// Human-readable report for one host, sizes shown in GB.
    pub fn render(&self, host: &str) -> String {
        format!(
            "host: {host}\n\
             cpu: {:.4}\n\
             database: {}\n\
             uptime: {} second(s)\n\
             total disk: {:.2}gb\n\
             free disk: {:.2}gb\n\
             disk usage: {:.4}\n\
             total ram: {:.2}gb\n\
             free ram: {:.2}gb\n\
             ram usage: {:.4}",
            self.cpu_load,
            if self.database_running { "up" } else { "down" },
            self.uptime_secs,
            kb_to_gb(self.disk_total_kb),
            kb_to_gb(self.disk_free_kb),
            self.disk_used_fraction,
            kb_to_gb(self.mem_total_kb),
            kb_to_gb(self.mem_free_kb),
            self.mem_used_fraction,
        )
    }
}

fn kb_to_gb(kb: u64) -> f64 {
    kb as f64 / 1_048_576.0
}
