use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::Result;
use crate::rules::MetaValue;
use crate::ScanReport;

/// Render a batch report as SARIF 2.1.0.
///
/// Every verdict becomes one result at the first offset of each reported
/// pattern. Offsets are byte offsets, so locations use `byteOffset`
/// regions. Failed targets are reported as tool execution notifications.
pub fn render(report: &ScanReport) -> Result<String> {
    // Rule descriptors, one per rule that produced a verdict.
    let mut descriptors: BTreeMap<&str, Value> = BTreeMap::new();
    for verdict in report.targets.iter().flat_map(|t| &t.verdicts) {
        descriptors.entry(verdict.rule.as_str()).or_insert_with(|| {
            let description = verdict
                .metadata
                .iter()
                .find(|(k, _)| k == "description")
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| verdict.rule.clone());
            let properties: serde_json::Map<String, Value> = verdict
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), meta_to_json(v)))
                .collect();
            json!({
                "id": verdict.rule,
                "name": verdict.rule,
                "shortDescription": { "text": description },
                "defaultConfiguration": { "level": "warning" },
                "properties": {
                    "tags": verdict.tags,
                    "metadata": properties,
                },
            })
        });
    }

    let mut results = Vec::new();
    for target in &report.targets {
        for verdict in &target.verdicts {
            let locations: Vec<Value> = verdict
                .matches
                .iter()
                .filter_map(|m| m.offsets.first().map(|&o| (m, o)))
                .map(|(m, offset)| {
                    json!({
                        "physicalLocation": {
                            "artifactLocation": { "uri": target.target },
                            "region": { "byteOffset": offset },
                        },
                        "message": { "text": m.identifier },
                    })
                })
                .collect();

            let mut result = json!({
                "ruleId": verdict.rule,
                "level": "warning",
                "message": {
                    "text": format!("Rule {} matched {}", verdict.rule, target.target),
                },
            });
            if locations.is_empty() {
                result["locations"] = json!([{
                    "physicalLocation": {
                        "artifactLocation": { "uri": target.target },
                    },
                }]);
            } else {
                result["locations"] = Value::Array(locations);
            }
            if let Some(sha256) = &target.sha256 {
                result["partialFingerprints"] = json!({
                    "targetSha256": sha256,
                });
            }
            results.push(result);
        }
    }

    let notifications: Vec<Value> = report
        .targets
        .iter()
        .filter_map(|t| t.error.as_ref().map(|e| (t, e)))
        .map(|(target, error)| {
            json!({
                "level": "error",
                "message": { "text": error },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": target.target },
                    },
                }],
            })
        })
        .collect();

    let sarif = json!({
        "$schema": "https://docs.oasis-open.org/sarif/sarif/v2.1.0/errata01/os/schemas/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "sigscan",
                    "version": env!("CARGO_PKG_VERSION"),
                    "semanticVersion": env!("CARGO_PKG_VERSION"),
                    "rules": descriptors.into_values().collect::<Vec<_>>(),
                },
            },
            "invocations": [{
                "executionSuccessful": report.verdict.targets_failed == 0,
                "startTimeUtc": report.generated_at.to_rfc3339(),
                "toolExecutionNotifications": notifications,
            }],
            "results": results,
            "automationDetails": {
                "id": format!("sigscan/{}", uuid::Uuid::new_v4()),
            },
        }],
    });

    let output = serde_json::to_string_pretty(&sarif)?;
    Ok(output)
}

fn meta_to_json(value: &MetaValue) -> Value {
    match value {
        MetaValue::String(s) => json!(s),
        MetaValue::Integer(i) => json!(i),
        MetaValue::Boolean(b) => json!(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::policy::Policy;
    use crate::rules::{PatternMatch, Verdict};
    use crate::target::TargetReport;

    fn sample() -> ScanReport {
        let verdict = Verdict {
            rule: "lgpl21_or_later".into(),
            tags: vec!["license".into()],
            metadata: vec![(
                "description".into(),
                MetaValue::String("LGPL 2.1 or later".into()),
            )],
            matches: vec![PatternMatch {
                identifier: "$string2".into(),
                offsets: vec![42, 99],
            }],
        };
        let ok = TargetReport {
            target: "usr/lib/libfoo.so".into(),
            sha256: Some("ab".into()),
            bytes_scanned: 200,
            duration_us: 3,
            verdicts: vec![verdict],
            error: None,
            timed_out: false,
        };
        let failed = TargetReport {
            target: "broken.bin".into(),
            sha256: None,
            bytes_scanned: 0,
            duration_us: 0,
            verdicts: Vec::new(),
            error: Some("IO error: permission denied".into()),
            timed_out: false,
        };
        ScanReport::new(1, vec![ok, failed], &Policy::default())
    }

    #[test]
    fn sarif_has_results_rules_and_notifications() {
        let value: Value = serde_json::from_str(&render(&sample()).unwrap()).unwrap();
        let run = &value["runs"][0];
        assert_eq!(value["version"], "2.1.0");
        assert_eq!(run["tool"]["driver"]["rules"][0]["id"], "lgpl21_or_later");
        assert_eq!(
            run["tool"]["driver"]["rules"][0]["shortDescription"]["text"],
            "LGPL 2.1 or later"
        );
        assert_eq!(run["results"][0]["ruleId"], "lgpl21_or_later");
        assert_eq!(
            run["results"][0]["locations"][0]["physicalLocation"]["region"]["byteOffset"],
            42
        );
        assert_eq!(run["invocations"][0]["executionSuccessful"], false);
        assert_eq!(
            run["invocations"][0]["toolExecutionNotifications"][0]["locations"][0]
                ["physicalLocation"]["artifactLocation"]["uri"],
            "broken.bin"
        );
    }
}
