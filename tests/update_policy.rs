//! Update and overwrite policy against an on-disk program store.

use std::path::PathBuf;
use std::sync::Once;

use seqmine::core::uid::UidSet;
use seqmine::lang::parser::parse_program;
use seqmine::mine::config::{ConfigLoader, OverwriteMode, ValidationMode, DEFAULT_CONFIG};
use seqmine::mine::manager::SequenceManager;
use seqmine::mine::stats::Stats;
use seqmine::seq::managed::ManagedSequence;
use seqmine::sys::setup;
use seqmine::{Sequence, Settings, Uid};

static INIT: Once = Once::new();

fn test_home() -> PathBuf {
    std::env::temp_dir().join(format!("seqmine-policy-{}", std::process::id()))
}

fn init_home() {
    INIT.call_once(|| {
        let home = test_home();
        std::fs::create_dir_all(&home).expect("temp home");
        std::env::set_var(setup::HOME_ENV, &home);
    });
}

// terms of 2n+1, enough for the required prefix
fn odd_terms(n: usize) -> Sequence {
    Sequence::from_i64(&(0..n as i64).map(|i| 2 * i + 1).collect::<Vec<_>>())
}

fn manager_with(id: Uid, transitive_length: i64, protect: bool) -> SequenceManager {
    let config = ConfigLoader::parse(DEFAULT_CONFIG).expect("config parses");
    let profile = ConfigLoader::select(&config, "").expect("profile");
    assert_eq!(profile.overwrite, OverwriteMode::Auto);
    let mut manager = SequenceManager::new(Settings::default(), profile);
    manager
        .index
        .add(ManagedSequence::new(id, "odd numbers", odd_terms(80)));
    let mut stats = Stats::new();
    stats.program_lengths.insert(id, transitive_length);
    manager.set_stats(stats);
    let mut protect_list = UidSet::new();
    if protect {
        protect_list.insert(id);
    }
    manager.set_protect_list(protect_list);
    manager
}

fn write_existing(id: Uid, source: &str) {
    let path = setup::program_path(id, false);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    std::fs::write(&path, source).expect("writes");
}

#[test]
fn equivalent_candidate_does_not_replace_complex_program() {
    init_home();
    let id: Uid = "T000101".parse().expect("valid uid");
    write_existing(id, "mul $0,2\nadd $0,1\n");
    let mut manager = manager_with(id, 12, false);
    // complex existing program: still indexed for matching
    assert!(manager.should_match(id));
    // the candidate is neither better, nor simpler, nor faster
    let candidate = parse_program("add $0,$0\nadd $0,1\n").expect("valid program");
    let result = manager.update_program(id, &candidate, ValidationMode::Extended);
    assert!(!result.updated);
    assert!(!result.is_new);
}

#[test]
fn simple_programs_are_not_rematched_in_auto_mode() {
    init_home();
    let id: Uid = "T000102".parse().expect("valid uid");
    write_existing(id, "mul $0,2\nadd $0,1\n");
    let mut manager = manager_with(id, 3, false);
    assert!(!manager.should_match(id));
}

#[test]
fn protected_programs_are_never_replaced() {
    init_home();
    let id: Uid = "T000103".parse().expect("valid uid");
    write_existing(id, "mul $0,2\nadd $0,1\n");
    let mut manager = manager_with(id, 12, true);
    assert!(!manager.should_match(id));
    // even a faster candidate is rejected for protected sequences
    let candidate = parse_program("add $0,$0\nadd $0,1\n").expect("valid program");
    let result = manager.update_program(id, &candidate, ValidationMode::Extended);
    assert!(!result.updated);
}

#[test]
fn new_programs_are_stored() {
    init_home();
    let id: Uid = "T000104".parse().expect("valid uid");
    let mut manager = manager_with(id, 0, false);
    let candidate = parse_program("mul $0,2\nadd $0,1\n").expect("valid program");
    let result = manager.update_program(id, &candidate, ValidationMode::Extended);
    assert!(result.updated);
    assert!(result.is_new);
    assert_eq!(result.change_type, "Found");
    // stored in the per-host directory with a metadata header
    let stored = setup::program_path(id, true);
    let content = std::fs::read_to_string(&stored).expect("stored program");
    assert!(content.starts_with(&format!("; {}: odd numbers", id)));
    assert!(content.contains("mul $0,2"));
}

#[test]
fn faster_candidate_replaces_slow_program() {
    init_home();
    let id: Uid = "T000105".parse().expect("valid uid");
    // slow: computes 2n+1 by counting
    write_existing(
        id,
        "mov $1,$0\nlpb $1\n  sub $1,1\n  add $0,1\nlpe\nadd $0,1\n",
    );
    let mut manager = manager_with(id, 12, false);
    let candidate = parse_program("mul $0,2\nadd $0,1\n").expect("valid program");
    let result = manager.update_program(id, &candidate, ValidationMode::Extended);
    assert!(result.updated, "change type: {:?}", result.change_type);
    assert!(!result.is_new);
    assert!(!result.change_type.is_empty());
}
