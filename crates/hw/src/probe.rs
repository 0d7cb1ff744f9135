// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hardware Probe (§4.E): a best-effort, non-fatal snapshot of GPU and CPU
//! telemetry. Deliberately shallow — no board/memory-slot inventory, no
//! AMD/generic-adapter fallbacks, just the `(ts_ms, gpus, cpu, error)`
//! tuple the core consumes.

use std::time::Duration;

use async_trait::async_trait;
use kd_core::event::{CpuSnapshot, GpuSnapshot};
use tokio::process::Command;
use tokio::sync::Mutex;

const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_millis(1500);

/// One hardware telemetry sample.
#[derive(Debug, Clone)]
pub struct HwSample {
    pub ts_ms: u64,
    pub gpus: Vec<GpuSnapshot>,
    pub cpu: CpuSnapshot,
    pub error: Option<String>,
}

/// Anything that can produce a hardware sample. Swappable so the
/// Publisher can be tested without a real GPU or `nvidia-smi` binary.
#[async_trait]
pub trait HwProbe: Send + Sync + 'static {
    async fn sample(&self) -> HwSample;
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Real probe: GPUs via `nvidia-smi`, CPU utilization via `sysinfo`.
pub struct SystemProbe {
    system: Mutex<sysinfo::System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        use sysinfo::SystemExt;
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HwProbe for SystemProbe {
    async fn sample(&self) -> HwSample {
        let (gpus, error) = nvidia_smi_gpus().await;
        let cpu = {
            use sysinfo::SystemExt;
            let mut system = self.system.lock().await;
            system.refresh_cpu();
            CpuSnapshot {
                utilization: system.global_cpu_info().cpu_usage(),
                temp_c: None,
            }
        };
        HwSample {
            ts_ms: now_ms(),
            gpus,
            cpu,
            error,
        }
    }
}

/// Query `nvidia-smi --query-gpu=... --format=csv,noheader,nounits`.
/// Absence of the binary, a timeout, or a malformed output line are all
/// non-fatal: they fold into `error`, and unparsable rows are skipped.
async fn nvidia_smi_gpus() -> (Vec<GpuSnapshot>, Option<String>) {
    let Ok(exe) = which_nvidia_smi() else {
        return (Vec::new(), Some("nvidia-smi not found".to_string()));
    };

    let mut cmd = Command::new(exe);
    cmd.arg("--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu")
        .arg("--format=csv,noheader,nounits");

    let output = match tokio::time::timeout(NVIDIA_SMI_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            let message = format!("nvidia-smi exited with {}", output.status);
            tracing::debug!(%message, "hw probe: nvidia-smi failed");
            return (Vec::new(), Some(message));
        }
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "hw probe: failed to spawn nvidia-smi");
            return (Vec::new(), Some(format!("nvidia-smi error: {err}")));
        }
        Err(_) => {
            tracing::debug!("hw probe: nvidia-smi timed out");
            return (Vec::new(), Some("nvidia-smi timeout".to_string()));
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let gpus = text
        .lines()
        .filter_map(|line| parse_gpu_line(line.trim()))
        .collect();
    (gpus, None)
}

fn parse_gpu_line(line: &str) -> Option<GpuSnapshot> {
    if line.is_empty() {
        return None;
    }
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 6 {
        return None;
    }
    Some(GpuSnapshot {
        index: parts[0].parse().ok()?,
        name: parts[1].to_string(),
        utilization_gpu: parts[2].parse::<f64>().ok()? as u32,
        memory_used_mb: parts[3].parse::<f64>().ok()? as u64,
        memory_total_mb: parts[4].parse::<f64>().ok()? as u64,
        temperature_c: parts[5].parse::<f64>().ok()? as u32,
    })
}

fn which_nvidia_smi() -> Result<std::path::PathBuf, ()> {
    let path = std::env::var_os("PATH").ok_or(())?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join("nvidia-smi");
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(())
}

/// A deterministic probe for tests: always returns the same sample
/// (or a fixed error), never touches a real GPU or the `PATH`.
#[derive(Clone)]
pub struct FakeProbe {
    pub sample: HwSample,
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self {
            sample: HwSample {
                ts_ms: 0,
                gpus: vec![GpuSnapshot {
                    index: 0,
                    name: "Fake GPU".to_string(),
                    utilization_gpu: 42,
                    memory_used_mb: 1024,
                    memory_total_mb: 8192,
                    temperature_c: 55,
                }],
                cpu: CpuSnapshot {
                    utilization: 12.5,
                    temp_c: None,
                },
                error: None,
            },
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sample: HwSample {
                ts_ms: 0,
                gpus: Vec::new(),
                cpu: CpuSnapshot {
                    utilization: 0.0,
                    temp_c: None,
                },
                error: Some(message.into()),
            },
        }
    }
}

#[async_trait]
impl HwProbe for FakeProbe {
    async fn sample(&self) -> HwSample {
        self.sample.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_gpu_line() {
        let gpu = parse_gpu_line("0, NVIDIA H100, 87, 40960, 81920, 61").unwrap();
        assert_eq!(gpu.index, 0);
        assert_eq!(gpu.name, "NVIDIA H100");
        assert_eq!(gpu.utilization_gpu, 87);
        assert_eq!(gpu.memory_used_mb, 40960);
        assert_eq!(gpu.memory_total_mb, 81920);
        assert_eq!(gpu.temperature_c, 61);
    }

    #[test]
    fn skips_malformed_line() {
        assert!(parse_gpu_line("not,enough,fields").is_none());
        assert!(parse_gpu_line("").is_none());
    }

    #[tokio::test]
    async fn fake_probe_returns_fixed_sample() {
        let probe = FakeProbe::healthy();
        let sample = probe.sample().await;
        assert_eq!(sample.gpus.len(), 1);
        assert!(sample.error.is_none());
    }

    #[tokio::test]
    async fn fake_probe_can_simulate_failure() {
        let probe = FakeProbe::failing("nvidia-smi not found");
        let sample = probe.sample().await;
        assert!(sample.gpus.is_empty());
        assert_eq!(sample.error.as_deref(), Some("nvidia-smi not found"));
    }
}
