use std::collections::{HashMap, HashSet};

use crate::system::snapshot::{AppBucket, Snapshot};

/// Groups raw process samples into per-application buckets.
///
/// The allow-list is case-folded once at construction and never changes, so
/// one aggregator can be shared by every session without locking.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    allow_list: HashSet<String>,
}

impl Aggregator {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allow_list: names
                .into_iter()
                .map(|name| fold(name.as_ref()))
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.allow_list.contains(&fold(name))
    }

    pub fn allow_list_len(&self) -> usize {
        self.allow_list.len()
    }

    /// Recompute `apps` from `all_processes`.
    ///
    /// Any `apps` already present in the input are discarded. Buckets come
    /// out in the order their first matching process appears; each bucket
    /// keeps the spelling of that first match. Non-matching processes stay
    /// in `all_processes` only.
    pub fn aggregate(&self, snapshot: Snapshot) -> Snapshot {
        let mut apps: Vec<AppBucket> = Vec::new();
        let mut index_by_name: HashMap<String, usize> = HashMap::new();

        for sample in &snapshot.all_processes {
            let key = fold(&sample.name);
            if !self.allow_list.contains(&key) {
                continue;
            }
            match index_by_name.get(&key) {
                Some(&idx) => {
                    let bucket = &mut apps[idx];
                    bucket.instance_count += 1;
                    bucket.cpu_percent += sample.cpu_percent;
                    bucket.memory_bytes = bucket.memory_bytes.saturating_add(sample.memory_bytes);
                }
                None => {
                    index_by_name.insert(key, apps.len());
                    apps.push(AppBucket {
                        name: sample.name.clone(),
                        instance_count: 1,
                        cpu_percent: sample.cpu_percent,
                        memory_bytes: sample.memory_bytes,
                    });
                }
            }
        }

        Snapshot { apps, ..snapshot }
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::snapshot::ProcessSample;

    fn sample(name: &str, pid: u32, cpu: f64, memory: u64) -> ProcessSample {
        ProcessSample {
            name: name.to_string(),
            pid,
            cpu_percent: cpu,
            memory_bytes: memory,
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let aggregator = Aggregator::new(["Chrome.EXE"]);
        assert!(aggregator.is_tracked("chrome.exe"));
        assert!(aggregator.is_tracked("CHROME.exe"));
        assert!(!aggregator.is_tracked("chromium.exe"));
    }

    #[test]
    fn case_variants_share_one_bucket() {
        let aggregator = Aggregator::new(["code.exe"]);
        let raw = Snapshot {
            all_processes: vec![
                sample("Code.exe", 1, 1.0, 10),
                sample("code.exe", 2, 2.0, 20),
            ],
            ..Snapshot::default()
        };
        let out = aggregator.aggregate(raw);
        assert_eq!(out.apps.len(), 1);
        assert_eq!(out.apps[0].name, "Code.exe");
        assert_eq!(out.apps[0].instance_count, 2);
        assert_eq!(out.apps[0].memory_bytes, 30);
    }

    #[test]
    fn buckets_follow_first_seen_order() {
        let aggregator = Aggregator::new(["a.exe", "b.exe", "c.exe"]);
        let raw = Snapshot {
            all_processes: vec![
                sample("c.exe", 1, 0.0, 1),
                sample("a.exe", 2, 0.0, 1),
                sample("c.exe", 3, 0.0, 1),
            ],
            ..Snapshot::default()
        };
        let names: Vec<String> = aggregator
            .aggregate(raw)
            .apps
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["c.exe", "a.exe"]);
    }

    #[test]
    fn stale_apps_are_replaced() {
        let aggregator = Aggregator::new(["node.exe"]);
        let raw = Snapshot {
            apps: vec![AppBucket {
                name: "ghost.exe".into(),
                instance_count: 9,
                cpu_percent: 99.0,
                memory_bytes: 999,
            }],
            ..Snapshot::default()
        };
        assert!(aggregator.aggregate(raw).apps.is_empty());
    }

    #[test]
    fn empty_allow_list_produces_no_buckets() {
        let aggregator = Aggregator::new(Vec::<String>::new());
        let raw = Snapshot {
            all_processes: vec![sample("node.exe", 1, 1.0, 1)],
            ..Snapshot::default()
        };
        let out = aggregator.aggregate(raw);
        assert!(out.apps.is_empty());
        assert_eq!(out.all_processes.len(), 1);
    }
}
