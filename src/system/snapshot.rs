use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One live OS process at the instant the probe ran.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub name: String,
    pub pid: u32,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "memory", with = "mebibytes")]
    pub memory_bytes: u64,
}

/// All instances of one allow-listed application, summed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppBucket {
    pub name: String,
    #[serde(rename = "instances")]
    pub instance_count: u32,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "memory", with = "mebibytes")]
    pub memory_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    #[serde(rename = "totalCpuUsage")]
    pub total_cpu_percent: f64,
    #[serde(rename = "totalMemory", with = "gibibytes")]
    pub total_memory_bytes: u64,
    #[serde(rename = "usedMemory", with = "gibibytes")]
    pub used_memory_bytes: u64,
}

impl SystemStats {
    /// Used memory as a percentage of total, 0 when the total is unknown.
    pub fn memory_percent(&self) -> f32 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        (self.used_memory_bytes as f64 / self.total_memory_bytes as f64 * 100.0) as f32
    }
}

/// The result of one probe invocation, before or after aggregation.
///
/// `Default` is the well-formed empty snapshot published when the probe fails.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub apps: Vec<AppBucket>,
    pub all_processes: Vec<ProcessSample>,
    pub system_stats: SystemStats,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.all_processes.is_empty()
    }

    pub fn bucket_memory_bytes(&self) -> u64 {
        self.apps
            .iter()
            .map(|app| app.memory_bytes)
            .fold(0, u64::saturating_add)
    }

    pub fn bucket_cpu_percent(&self) -> f64 {
        self.apps.iter().map(|app| app.cpu_percent).sum()
    }

    pub fn process_memory_bytes(&self) -> u64 {
        self.all_processes
            .iter()
            .map(|p| p.memory_bytes)
            .fold(0, u64::saturating_add)
    }
}

// The totals are derived from `apps`, so they are written out but never read back.
impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut doc = serializer.serialize_struct("Snapshot", 5)?;
        doc.serialize_field("apps", &self.apps)?;
        doc.serialize_field(
            "totalMemoryUsed",
            &format!("{:.2} MB", self.bucket_memory_bytes() as f64 / MIB),
        )?;
        doc.serialize_field("totalCpuUsed", &format!("{:.2}", self.bucket_cpu_percent()))?;
        doc.serialize_field("allProcesses", &self.all_processes)?;
        doc.serialize_field("systemStats", &self.system_stats)?;
        doc.end()
    }
}

fn bytes_from_units<E: serde::de::Error>(value: f64, unit: f64) -> Result<u64, E> {
    if !value.is_finite() || value < 0.0 {
        return Err(E::custom(format!("invalid memory value {value}")));
    }
    let bytes = (value * unit).round();
    if bytes >= u64::MAX as f64 {
        return Err(E::custom(format!("memory value {value} out of range")));
    }
    Ok(bytes as u64)
}

mod mebibytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{MIB, bytes_from_units};

    pub fn serialize<S: Serializer>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(*bytes as f64 / MIB)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        bytes_from_units(f64::deserialize(deserializer)?, MIB)
    }
}

mod gibibytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{GIB, bytes_from_units};

    pub fn serialize<S: Serializer>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(*bytes as f64 / GIB)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        bytes_from_units(f64::deserialize(deserializer)?, GIB)
    }
}
