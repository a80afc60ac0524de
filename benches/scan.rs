//! Throughput check for the shared automaton: `cargo bench --bench scan`.

use std::time::Instant;

use sigscan::{load_rule_set, EngineConfig, RuleSource, ScanBudget};

const RULE_COUNT: usize = 500;
const TARGET_BYTES: usize = 32 * 1024 * 1024;

fn rule_source() -> RuleSource {
    let mut text = String::new();
    for i in 0..RULE_COUNT {
        text.push_str(&format!(
            "rule license_{i} : license {{\n  strings:\n    $string1 = \"License-Marker-{i}-or-later\"\n    $string2 = \"marker {i}+\" nocase\n    $string3 = \"Lib{i}\" wide ascii fullword\n  condition:\n    any of ($string*)\n}}\n"
        ));
    }
    RuleSource::new("bench.yara", text)
}

fn target() -> Vec<u8> {
    // Pseudo-random bytes with a few planted markers.
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut data: Vec<u8> = (0..TARGET_BYTES)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect();
    for (i, offset) in (0..TARGET_BYTES - 64).step_by(TARGET_BYTES / 16).enumerate() {
        let marker = format!("License-Marker-{}-or-later", i * 7);
        data[offset..offset + marker.len()].copy_from_slice(marker.as_bytes());
    }
    data
}

fn main() {
    let started = Instant::now();
    let registry = load_rule_set(&[rule_source()], EngineConfig::default()).expect("rules compile");
    let compiled = registry.compiled();
    println!(
        "compile: {} rules, {} literal variants, {} KiB automaton in {:?}",
        registry.rule_count(),
        compiled.automaton().output_count(),
        compiled.automaton().heap_bytes() / 1024,
        started.elapsed()
    );

    let data = target();
    for round in 0..3 {
        let started = Instant::now();
        let outcome = registry
            .scan_bytes(&data, ScanBudget::unlimited())
            .expect("scan completes");
        let elapsed = started.elapsed();
        let mib = data.len() as f64 / (1024.0 * 1024.0);
        println!(
            "scan {round}: {} verdicts, {:.1} MiB/s",
            outcome.verdicts.len(),
            mib / elapsed.as_secs_f64()
        );
    }
}
