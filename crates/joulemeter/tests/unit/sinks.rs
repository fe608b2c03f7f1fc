//! Report sinks shared between writers.

use std::fs;
use std::sync::Arc;
use std::thread;

use joulemeter::report::read_report;
use joulemeter::{ReportRow, ReportWriter, REPORT_HEADER};
use tempfile::TempDir;

fn rows(tag: usize, n: usize) -> Vec<ReportRow> {
    (0..n)
        .map(|i| ReportRow {
            domain: format!("writer-{tag}"),
            energy: i as u64,
            duration_s: 0.25,
        })
        .collect()
}

#[test]
fn header_only_once_across_appends() {
    let tmp = TempDir::new().unwrap();
    let sink = tmp.path().join("r.csv");
    let writer = ReportWriter::new();

    writer.append(&rows(0, 3), &sink).unwrap();
    writer.append(&rows(1, 2), &sink).unwrap();

    let text = fs::read_to_string(&sink).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1 + 3 + 2);
    assert_eq!(lines[0], REPORT_HEADER);
    assert_eq!(lines.iter().filter(|l| **l == REPORT_HEADER).count(), 1);
}

#[test]
fn concurrent_writers_share_one_header() {
    let tmp = TempDir::new().unwrap();
    let sink = Arc::new(tmp.path().join("shared.csv"));

    let handles: Vec<_> = (0..8)
        .map(|tag| {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                let writer = ReportWriter::new();
                for _ in 0..5 {
                    writer.append(&rows(tag, 4), &sink).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let text = fs::read_to_string(sink.as_path()).unwrap();
    assert_eq!(text.matches(REPORT_HEADER).count(), 1);

    let parsed = read_report(&sink).unwrap();
    assert_eq!(parsed.len(), 8 * 5 * 4);
    // Each append's rows stay contiguous.
    for chunk in parsed.chunks(4) {
        assert!(chunk.iter().all(|r| r.domain == chunk[0].domain));
        let energies: Vec<u64> = chunk.iter().map(|r| r.energy).collect();
        assert_eq!(energies, [0, 1, 2, 3]);
    }
}
