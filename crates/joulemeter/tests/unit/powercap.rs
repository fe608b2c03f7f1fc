//! Enumeration and tracking over a fake powercap tree.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use joulemeter::{
    enumerate, run_checks, CounterConfig, EnergyTracker, Family, FamilyStatus, PreflightWarning,
};
use tempfile::TempDir;

fn zone(dir: &Path, name: &str, energy: u64, range: u64) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("name"), format!("{name}\n")).unwrap();
    fs::write(dir.join("energy_uj"), format!("{energy}\n")).unwrap();
    fs::write(dir.join("max_energy_range_uj"), format!("{range}\n")).unwrap();
}

fn set_energy(dir: &Path, energy: u64) {
    fs::write(dir.join("energy_uj"), format!("{energy}\n")).unwrap();
}

fn rapl_only(root: &Path) -> CounterConfig {
    CounterConfig {
        rapl_root: root.to_path_buf(),
        enable_rapl: true,
        enable_nvml: false,
    }
}

#[test]
fn enumerates_fake_tree_in_order() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    zone(&root.join("intel-rapl:0"), "package-0", 1, 1000);
    zone(&root.join("intel-rapl:0/intel-rapl:0:0"), "core", 1, 1000);
    zone(&root.join("intel-rapl:1"), "package-1", 1, 1000);
    zone(&root.join("intel-rapl:1/intel-rapl:1:0"), "core", 1, 1000);

    let enumeration = enumerate(&rapl_only(root));
    let names: Vec<&str> = enumeration.registry.iter().map(|c| c.name()).collect();
    assert_eq!(names, ["package-0", "core-0", "package-1", "core-1"]);
    assert_eq!(
        enumeration.families[0].status,
        FamilyStatus::Available { domains: 4 }
    );
    assert_eq!(enumeration.families[1].family, Family::Nvml);
    assert!(matches!(
        enumeration.families[1].status,
        FamilyStatus::Disabled { .. }
    ));
}

#[test]
fn reference_example_with_wraparound() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let pkg = root.join("intel-rapl:0");
    let core = pkg.join("intel-rapl:0:0");
    zone(&pkg, "package-0", 1000, 262_143_328_850);
    // Counts 0..=999, so the counter wraps at 1000.
    zone(&core, "core", 500, 999);

    let registry = Arc::new(enumerate(&rapl_only(root)).registry);
    let mut tracker = EnergyTracker::new(registry);

    tracker.start().unwrap();
    set_energy(&pkg, 1500);
    set_energy(&core, 300);
    tracker.stop().unwrap();

    let delta = tracker.compute().unwrap().unwrap();
    assert_eq!(delta.get("package-0"), Some(500));
    assert_eq!(delta.get("core-0"), Some(800));
    assert!(delta.iter().find(|e| e.name == "core-0").unwrap().wrapped);
}

#[test]
fn wrap_at_inclusive_range_maximum() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("intel-rapl:0");
    zone(&pkg, "package-0", 4_000, 4_095);

    let registry = Arc::new(enumerate(&rapl_only(tmp.path())).registry);
    assert_eq!(registry.get("package-0").unwrap().wrap_modulus(), Some(4_096));

    let mut tracker = EnergyTracker::new(registry);
    tracker.start().unwrap();
    // 4000 -> 4095 -> 0 -> 10
    set_energy(&pkg, 10);
    tracker.stop().unwrap();

    let delta = tracker.compute().unwrap().unwrap();
    assert_eq!(delta.get("package-0"), Some(106));
}

#[test]
fn missing_tree_is_unavailable_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let enumeration = enumerate(&rapl_only(&tmp.path().join("absent")));

    assert!(enumeration.registry.is_empty());
    assert!(matches!(
        enumeration.families[0].status,
        FamilyStatus::Unavailable { .. }
    ));

    let preflight = run_checks(&enumeration.registry, &enumeration.families);
    assert!(preflight.is_valid);
    assert!(preflight.warnings.contains(&PreflightWarning::NoCounters));
}

#[test]
fn vanished_counter_is_caught_by_preflight() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("intel-rapl:0");
    zone(&pkg, "package-0", 1, 1000);

    let enumeration = enumerate(&rapl_only(tmp.path()));
    fs::remove_file(pkg.join("energy_uj")).unwrap();

    let preflight = run_checks(&enumeration.registry, &enumeration.families);
    assert!(preflight.has_critical);
    assert!(matches!(
        &preflight.warnings[0],
        PreflightWarning::UnreadableCounter { domain, .. } if domain == "package-0"
    ));
}
