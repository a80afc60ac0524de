use crate::rules::Verdict;
use crate::ScanReport;

/// Offsets listed per pattern before the rest are summarised.
const MAX_LISTED_OFFSETS: usize = 8;

/// Render a batch report as plain console output, one block per target.
pub fn render(report: &ScanReport) -> String {
    let mut output = String::new();

    let matched: Vec<_> = report
        .targets
        .iter()
        .filter(|t| !t.verdicts.is_empty() || t.error.is_some())
        .collect();

    if matched.is_empty() {
        output.push_str(&format!(
            "\n  No rules matched ({} target(s), {} rule(s)).\n\n",
            report.targets.len(),
            report.rules_loaded
        ));
        return output;
    }

    output.push('\n');
    for target in matched {
        if let Some(error) = &target.error {
            let tag = if target.timed_out { "[TIMEOUT]" } else { "[ERROR]  " };
            output.push_str(&format!("  {} {}\n", tag, target.target));
            output.push_str(&format!("            {}\n\n", error));
            continue;
        }

        output.push_str(&format!(
            "  {} ({} bytes)\n",
            target.target, target.bytes_scanned
        ));
        for verdict in &target.verdicts {
            output.push_str(&format!("    [MATCH] {}{}\n", verdict.rule, tag_suffix(verdict)));
            for m in &verdict.matches {
                output.push_str(&format!(
                    "            {} at {}\n",
                    m.identifier,
                    format_offsets(&m.offsets)
                ));
            }
        }
        output.push('\n');
    }

    let verdict = &report.verdict;
    let status = if verdict.pass { "CLEAN" } else { "MATCHED" };
    output.push_str(&format!(
        "  Result: {} ({} of {} target(s) matched, {} verdict(s), {} failed)\n\n",
        status,
        verdict.targets_matched,
        verdict.targets_scanned,
        verdict.total_verdicts,
        verdict.targets_failed,
    ));

    output
}

fn tag_suffix(verdict: &Verdict) -> String {
    if verdict.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", verdict.tags.join(", "))
    }
}

fn format_offsets(offsets: &[u64]) -> String {
    let mut listed: Vec<String> = offsets
        .iter()
        .take(MAX_LISTED_OFFSETS)
        .map(|o| format!("0x{o:x}"))
        .collect();
    if offsets.len() > MAX_LISTED_OFFSETS {
        listed.push(format!("... ({} more)", offsets.len() - MAX_LISTED_OFFSETS));
    }
    listed.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::policy::Policy;
    use crate::rules::PatternMatch;
    use crate::target::TargetReport;

    fn report(verdicts: Vec<Verdict>, error: Option<&str>) -> ScanReport {
        let target = TargetReport {
            target: "libfoo.so".into(),
            sha256: None,
            bytes_scanned: 128,
            duration_us: 5,
            verdicts,
            error: error.map(String::from),
            timed_out: false,
        };
        ScanReport::new(1, vec![target], &Policy::default())
    }

    #[test]
    fn clean_report_says_so() {
        let out = render(&report(vec![], None));
        assert!(out.contains("No rules matched"));
    }

    #[test]
    fn verdicts_list_rule_tags_and_offsets() {
        let verdict = Verdict {
            rule: "lgpl21_or_later".into(),
            tags: vec!["license".into()],
            metadata: Vec::new(),
            matches: vec![PatternMatch {
                identifier: "$string2".into(),
                offsets: (0..10).collect(),
            }],
        };
        let out = render(&report(vec![verdict], None));
        assert!(out.contains("[MATCH] lgpl21_or_later [license]"));
        assert!(out.contains("$string2 at 0x0, 0x1"));
        assert!(out.contains("(2 more)"));
        assert!(out.contains("Result: MATCHED"));
    }

    #[test]
    fn failed_targets_are_shown() {
        let out = render(&report(vec![], Some("IO error: not found")));
        assert!(out.contains("[ERROR]"));
        assert!(out.contains("not found"));
    }
}
