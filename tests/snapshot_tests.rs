use insta::assert_debug_snapshot;
use procfeed::aggregate::Aggregator;
use procfeed::config::AppsConfig;
use procfeed::system::snapshot::{ProcessSample, Snapshot, SystemStats};

fn mock_process(name: &str, pid: u32, cpu_percent: f64, memory_bytes: u64) -> ProcessSample {
    ProcessSample {
        name: name.to_string(),
        pid,
        cpu_percent,
        memory_bytes,
    }
}

fn raw_snapshot(all_processes: Vec<ProcessSample>) -> Snapshot {
    Snapshot {
        apps: Vec::new(),
        all_processes,
        system_stats: SystemStats {
            total_cpu_percent: 17.5,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            used_memory_bytes: 6 * 1024 * 1024 * 1024,
        },
    }
}

fn normalized_buckets(snapshot: &Snapshot) -> Vec<(String, u32, String, u64)> {
    snapshot
        .apps
        .iter()
        .map(|b| {
            (
                b.name.clone(),
                b.instance_count,
                format!("{:.2}", b.cpu_percent),
                b.memory_bytes,
            )
        })
        .collect()
}

#[test]
fn chrome_instances_collapse_into_one_bucket() {
    let aggregator = Aggregator::new(["chrome.exe"]);
    let raw = raw_snapshot(vec![
        mock_process("chrome.exe", 100, 5.0, 1_000_000),
        mock_process("chrome.exe", 101, 3.0, 2_000_000),
        mock_process("notepad.exe", 200, 1.0, 500_000),
    ]);

    let out = aggregator.aggregate(raw.clone());

    assert_eq!(out.apps.len(), 1);
    let chrome = &out.apps[0];
    assert_eq!(chrome.name, "chrome.exe");
    assert_eq!(chrome.instance_count, 2);
    assert!((chrome.cpu_percent - 8.0).abs() < 1e-9);
    assert_eq!(chrome.memory_bytes, 3_000_000);

    // Raw processes and system stats pass through untouched.
    assert_eq!(out.all_processes, raw.all_processes);
    assert_eq!(out.system_stats, raw.system_stats);
    assert!(!out.apps.iter().any(|b| b.name == "notepad.exe"));
}

#[test]
fn deterministic_buckets_snapshot_from_mock_data() {
    let aggregator = Aggregator::new(&AppsConfig::default().allow_list);
    let raw = raw_snapshot(vec![
        mock_process("chrome.exe", 100, 5.0, 1_000_000),
        mock_process("Code.exe", 300, 1.5, 40_000_000),
        mock_process("chrome.exe", 101, 3.0, 2_000_000),
        mock_process("notepad.exe", 200, 1.0, 500_000),
        mock_process("node.exe", 400, 0.25, 12_000_000),
        mock_process("code.exe", 301, 0.5, 8_000_000),
    ]);

    let out = aggregator.aggregate(raw);

    assert_debug_snapshot!("default_allow_list_buckets", normalized_buckets(&out));
}

#[test]
fn empty_snapshot_aggregates_to_empty() {
    let aggregator = Aggregator::new(["chrome.exe"]);
    let out = aggregator.aggregate(Snapshot::default());
    assert_eq!(out, Snapshot::default());
}
