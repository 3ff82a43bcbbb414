use std::collections::BTreeMap;
use std::fs;

/// One sample of the device's health counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub temperature: f64,
    pub power_usage: f64,
}

impl EnergyReading {
    /// The reading as a block's `energy_metrics` map.
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("cpu_percent".to_string(), self.cpu_percent),
            ("memory_percent".to_string(), self.memory_percent),
            ("temperature".to_string(), self.temperature),
            ("power_usage".to_string(), self.power_usage),
        ])
    }
}

/// Source of energy/health readings.  The OS-backed implementation is the
/// default; tests inject a [`FixedSensor`] so gates behave deterministically.
pub trait EnergySensor: Send + Sync {
    fn sample(&self) -> EnergyReading;
}

/// Estimated draw in watts for an edge-class board: a fixed base plus load
/// terms for CPU and memory.
pub fn estimate_power(cpu_percent: f64, memory_percent: f64) -> f64 {
    0.5 + (cpu_percent / 100.0) * 2.0 + (memory_percent / 100.0) * 0.5
}

/// Reads `/proc` and the first thermal zone.  Every probe degrades to zero
/// when the file is missing or unparsable, so an unusual kernel never takes
/// the node down.
#[derive(Debug, Clone)]
pub struct SystemSensor {
    cores: f64,
}

impl Default for SystemSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSensor {
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        Self { cores }
    }

    fn cpu_percent(&self) -> f64 {
        let Ok(raw) = fs::read_to_string("/proc/loadavg") else {
            return 0.0;
        };
        let load: f64 = raw
            .split_whitespace()
            .next()
            .and_then(|field| field.parse().ok())
            .unwrap_or(0.0);
        (load / self.cores * 100.0).clamp(0.0, 100.0)
    }

    fn memory_percent(&self) -> f64 {
        let Ok(raw) = fs::read_to_string("/proc/meminfo") else {
            return 0.0;
        };

        let field = |name: &str| -> Option<f64> {
            raw.lines()
                .find(|line| line.starts_with(name))?
                .split_whitespace()
                .nth(1)?
                .parse()
                .ok()
        };

        match (field("MemTotal:"), field("MemAvailable:")) {
            (Some(total), Some(available)) if total > 0.0 => {
                ((total - available) / total * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }

    fn temperature(&self) -> f64 {
        fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
            .ok()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|millidegrees| millidegrees / 1000.0)
            .unwrap_or(0.0)
    }
}

impl EnergySensor for SystemSensor {
    fn sample(&self) -> EnergyReading {
        let cpu_percent = self.cpu_percent();
        let memory_percent = self.memory_percent();
        EnergyReading {
            cpu_percent,
            memory_percent,
            temperature: self.temperature(),
            power_usage: estimate_power(cpu_percent, memory_percent),
        }
    }
}

/// A sensor that always reports the same reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedSensor(pub EnergyReading);

impl EnergySensor for FixedSensor {
    fn sample(&self) -> EnergyReading {
        self.0
    }
}
