/*
 * Dependency Materialization Engine
 * Copyright (C) 2023 Broken-Deer <old_driver__@outlook.com> and contributors
 *
 * This program is free software, you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Rule Evaluator
//!
//! Applies ordered allow/disallow rule lists against the host platform and a
//! feature-flag map. See spec §4.2 for the exact precedence semantics this
//! module implements.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::platform::PlatformInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

impl RuleAction {
    fn is_allow(self) -> bool {
        matches!(self, RuleAction::Allow)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsClause {
    pub name: Option<String>,
    pub arch: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: Option<OsClause>,
    #[serde(default)]
    pub features: Option<HashMap<String, bool>>,
}

impl Rule {
    /// A library's `clientreq == false` is equivalent to this: a single
    /// disallow rule with no conditions (spec §4.2 edge case).
    pub fn unconditional_disallow() -> Rule {
        Rule {
            action: RuleAction::Disallow,
            os: None,
            features: None,
        }
    }

    /// Parses a `Rule` out of a raw JSON value, tolerating the legacy and
    /// modern descriptor shapes alike (both use the same field names, so
    /// this is a thin wrapper over `serde_json::from_value`).
    pub fn from_value(value: &Value) -> Option<Rule> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Evaluate the `os` clause against the host platform. Returns `None`
/// ("unset") when the clause is absent or carries no sub-fields at all;
/// otherwise ANDs together every sub-field that is present.
fn eval_os(clause: Option<&OsClause>, platform: &PlatformInfo) -> Option<bool> {
    let clause = clause?;
    let mut result: Option<bool> = None;
    if let Some(name) = &clause.name {
        let matched = name == platform.name;
        result = Some(result.unwrap_or(true) && matched);
    }
    if let Some(arch) = &clause.arch {
        let matched = arch == platform.arch;
        result = Some(result.unwrap_or(true) && matched);
    }
    if let Some(version) = &clause.version {
        let matched = Regex::new(&format!("^(?:{version})$"))
            .map(|re| re.is_match(&platform.version))
            .unwrap_or(false);
        result = Some(result.unwrap_or(true) && matched);
    }
    result
}

/// Evaluate the `features` clause. A flag missing from the supplied map is
/// neutral for that sub-check; any mismatch zeros the whole features result.
fn eval_features(
    clause: Option<&HashMap<String, bool>>,
    features: &HashMap<String, bool>,
) -> Option<bool> {
    let clause = clause?;
    if clause.is_empty() {
        return None;
    }
    let mut result: Option<bool> = None;
    for (flag, expected) in clause {
        match features.get(flag) {
            None => continue,
            Some(actual) if actual == expected => {
                result = Some(result.unwrap_or(true));
            }
            Some(_) => return Some(false),
        }
    }
    result
}

/// `evaluate(rules, features) → bool`
///
/// Traverses `rules` in order, tracking a running tri-state result that
/// starts "unset" and resolves to `false` if it is never set.
pub fn evaluate(rules: &[Rule], features: &HashMap<String, bool>, platform: &PlatformInfo) -> bool {
    let mut result: Option<bool> = None;
    for rule in rules {
        let os_result = eval_os(rule.os.as_ref(), platform);
        let features_result = eval_features(rule.features.as_ref(), features);
        let is_allowed = rule.action.is_allow();

        if os_result.is_none() && features_result.is_none() {
            result = Some(is_allowed);
            continue;
        }

        let defined: Vec<bool> = [os_result, features_result].into_iter().flatten().collect();
        if defined.iter().all(|&ok| ok) {
            result = Some(is_allowed);
        } else if defined.iter().any(|&ok| !ok) && result.is_none() {
            result = Some(!is_allowed);
        }
    }
    result.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(name: &'static str) -> PlatformInfo {
        PlatformInfo {
            name,
            arch: "x64",
            version: "6.1.0".to_string(),
        }
    }

    #[test]
    fn empty_rule_list_is_allowed() {
        assert!(evaluate(&[], &HashMap::new(), &platform("linux")));
    }

    // S3: rules [{action:allow},{action:disallow,os:{name:"osx"}}]
    #[test]
    fn s3_rule_precedence_linux_allowed() {
        let rules = vec![
            Rule {
                action: RuleAction::Allow,
                os: None,
                features: None,
            },
            Rule {
                action: RuleAction::Disallow,
                os: Some(OsClause {
                    name: Some("osx".into()),
                    arch: None,
                    version: None,
                }),
                features: None,
            },
        ];
        assert!(evaluate(&rules, &HashMap::new(), &platform("linux")));
    }

    #[test]
    fn s3_rule_precedence_osx_disallowed() {
        let rules = vec![
            Rule {
                action: RuleAction::Allow,
                os: None,
                features: None,
            },
            Rule {
                action: RuleAction::Disallow,
                os: Some(OsClause {
                    name: Some("osx".into()),
                    arch: None,
                    version: None,
                }),
                features: None,
            },
        ];
        assert!(!evaluate(&rules, &HashMap::new(), &platform("osx")));
    }

    #[test]
    fn final_unconditional_allow_returns_true() {
        let rules = vec![Rule {
            action: RuleAction::Allow,
            os: None,
            features: None,
        }];
        assert!(evaluate(&rules, &HashMap::new(), &platform("linux")));
    }

    #[test]
    fn final_unconditional_disallow_returns_false() {
        let rules = vec![Rule {
            action: RuleAction::Disallow,
            os: None,
            features: None,
        }];
        assert!(!evaluate(&rules, &HashMap::new(), &platform("linux")));
    }

    #[test]
    fn missing_feature_flag_is_neutral() {
        let mut feats = HashMap::new();
        feats.insert("is_demo_user".to_string(), true);
        let mut clause = HashMap::new();
        clause.insert("has_custom_resolution".to_string(), true);
        let rules = vec![Rule {
            action: RuleAction::Allow,
            os: None,
            features: Some(clause),
        }];
        // has_custom_resolution absent from the supplied feature map: neutral,
        // so os+features are both unset -> unconditional allow.
        assert!(evaluate(&rules, &feats, &platform("linux")));
    }

    #[test]
    fn feature_mismatch_zeroes_rule() {
        let mut feats = HashMap::new();
        feats.insert("is_demo_user".to_string(), false);
        let mut clause = HashMap::new();
        clause.insert("is_demo_user".to_string(), true);
        let rules = vec![
            Rule {
                action: RuleAction::Allow,
                os: None,
                features: None,
            },
            Rule {
                action: RuleAction::Disallow,
                os: None,
                features: Some(clause),
            },
        ];
        // rule 2: features_result = Some(false) -> running (already allow) untouched
        assert!(evaluate(&rules, &feats, &platform("linux")));
    }

    #[test]
    fn clientreq_false_is_unconditional_disallow() {
        let rules = vec![Rule::unconditional_disallow()];
        assert!(!evaluate(&rules, &HashMap::new(), &platform("linux")));
    }
}
