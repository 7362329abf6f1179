//! Access Control
//!
//! Role-tag based policy evaluation. A policy is an ordered list of
//! declarative rules; evaluation selects the rules whose targets and
//! action match the subject, lets the last match decide, and unions the
//! granted field/restriction/task lists across matching allow rules.
//!
//! Row-level visibility is expressed through restriction scopes: `all`
//! grants cross-entity access, `owner` limits the subject to entities it
//! owns. Absence of any restriction list means unrestricted.

use crate::identity::Subject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclTarget {
    Anonymous,
    User,
    Administrator,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    Access,
    Read,
    Write,
    Create,
    Destroy,
    Task,
}

impl std::fmt::Display for AclAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AclAction::Access => "access",
            AclAction::Read => "read",
            AclAction::Write => "write",
            AclAction::Create => "create",
            AclAction::Destroy => "destroy",
            AclAction::Task => "task",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    All,
    Owner,
}

/// One declarative policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRule {
    #[serde(default)]
    pub description: Option<String>,
    pub targets: Vec<AclTarget>,
    pub actions: Vec<AclAction>,
    pub allow: bool,
    /// Field grant; unset means every model-allowed field.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Row-visibility scopes granted by this rule.
    #[serde(default)]
    pub restrictions: Option<Vec<Restriction>>,
    /// Task definition keys this rule permits.
    #[serde(default)]
    pub tasks: Option<Vec<String>>,
}

impl AclRule {
    fn matches(&self, targets: &BTreeSet<AclTarget>, action: AclAction) -> bool {
        self.actions.contains(&action) && self.targets.iter().any(|t| targets.contains(t))
    }

    fn describe(&self) -> String {
        self.description.clone().unwrap_or_else(|| {
            format!(
                "{} {:?} for {:?}",
                if self.allow { "allow" } else { "deny" },
                self.actions,
                self.targets
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclPolicy {
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

/// Result of one policy evaluation.
#[derive(Debug, Clone, Default)]
pub struct AclMatch {
    pub allow: bool,
    pub allowed_fields: Option<BTreeSet<String>>,
    pub allowed_restrictions: Option<Vec<Restriction>>,
    pub allowed_tasks: Option<Vec<String>>,
    pub matching_rules: Vec<String>,
}

impl AclMatch {
    /// Match produced when the model carries no policy.
    pub fn permissive() -> Self {
        Self {
            allow: true,
            ..Default::default()
        }
    }

    /// Whether the granted restriction scopes admit this row.
    pub fn scope_allows(&self, owner: bool) -> bool {
        match &self.allowed_restrictions {
            None => true,
            Some(scopes) => {
                scopes.contains(&Restriction::All)
                    || (owner && scopes.contains(&Restriction::Owner))
            }
        }
    }

    pub fn field_allowed(&self, field: &str) -> bool {
        match &self.allowed_fields {
            None => true,
            Some(fields) => fields.contains(field),
        }
    }

    pub fn task_allowed(&self, task_definition_key: &str) -> bool {
        match &self.allowed_tasks {
            None => true,
            Some(tasks) => tasks.iter().any(|t| t == task_definition_key),
        }
    }
}

impl AclPolicy {
    pub fn evaluate(&self, targets: &BTreeSet<AclTarget>, action: AclAction) -> AclMatch {
        let matching: Vec<&AclRule> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(targets, action))
            .collect();

        // Last matching rule decides; a policy that matches nothing denies.
        let allow = matching.last().map(|rule| rule.allow).unwrap_or(false);

        // Union the grants of every matching allow rule. A rule that
        // omits a grant list is unconstrained for that dimension and
        // lifts the constraint entirely.
        let mut allowed_fields: Option<BTreeSet<String>> = Some(BTreeSet::new());
        let mut allowed_restrictions: Option<Vec<Restriction>> = Some(Vec::new());
        let mut allowed_tasks: Option<Vec<String>> = Some(Vec::new());
        let mut any_allow = false;

        for rule in matching.iter().filter(|rule| rule.allow) {
            any_allow = true;
            match (&rule.fields, &mut allowed_fields) {
                (Some(fields), Some(union)) => union.extend(fields.iter().cloned()),
                (None, fields) => *fields = None,
                _ => {}
            }
            match (&rule.restrictions, &mut allowed_restrictions) {
                (Some(scopes), Some(union)) => {
                    for scope in scopes {
                        if !union.contains(scope) {
                            union.push(*scope);
                        }
                    }
                }
                (None, scopes) => *scopes = None,
                _ => {}
            }
            match (&rule.tasks, &mut allowed_tasks) {
                (Some(tasks), Some(union)) => {
                    for task in tasks {
                        if !union.contains(task) {
                            union.push(task.clone());
                        }
                    }
                }
                (None, tasks) => *tasks = None,
                _ => {}
            }
        }

        if !any_allow {
            allowed_fields = None;
            allowed_restrictions = None;
            allowed_tasks = None;
        }

        AclMatch {
            allow,
            allowed_fields,
            allowed_restrictions,
            allowed_tasks,
            matching_rules: matching.iter().map(|rule| rule.describe()).collect(),
        }
    }
}

/// Role tags attached to a subject for one evaluation. The owner flag is
/// recomputed per row by the caller.
pub fn subject_targets(subject: Option<&Subject>, owner: bool) -> BTreeSet<AclTarget> {
    let mut targets = BTreeSet::from([AclTarget::Anonymous]);
    if let Some(subject) = subject {
        targets.insert(AclTarget::User);
        if subject.administrator {
            targets.insert(AclTarget::Administrator);
        }
        if owner {
            targets.insert(AclTarget::Owner);
        }
    }
    targets
}

/// Evaluate a model's policy (absent policy is permissive), reporting to
/// the trace sink when one is installed.
pub fn evaluate(
    policy: Option<&AclPolicy>,
    targets: &BTreeSet<AclTarget>,
    action: AclAction,
    owner: bool,
    tracer: Option<&Arc<dyn AclTracer>>,
) -> AclMatch {
    let acl_match = match policy {
        Some(policy) => policy.evaluate(targets, action),
        None => AclMatch::permissive(),
    };

    if let Some(tracer) = tracer {
        tracer.record(&AclTraceReport {
            action,
            targets,
            owner,
            matching_rules: &acl_match.matching_rules,
            allow: acl_match.allow,
        });
    }

    acl_match
}

/// One ACL decision, as handed to the trace sink.
pub struct AclTraceReport<'a> {
    pub action: AclAction,
    pub targets: &'a BTreeSet<AclTarget>,
    pub owner: bool,
    pub matching_rules: &'a [String],
    pub allow: bool,
}

/// Pluggable sink for ACL decision traces.
pub trait AclTracer: Send + Sync {
    fn record(&self, report: &AclTraceReport);
}

/// Default sink writing structured debug events.
pub struct TracingAclTracer;

impl AclTracer for TracingAclTracer {
    fn record(&self, report: &AclTraceReport) {
        tracing::debug!(
            action = %report.action,
            targets = ?report.targets,
            owner = report.owner,
            rules = ?report.matching_rules,
            allow = report.allow,
            "acl decision"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> AclPolicy {
        serde_json::from_value(json!({
            "rules": [
                {
                    "description": "owners read their own submissions",
                    "targets": ["owner"],
                    "actions": ["access", "read"],
                    "allow": true,
                    "restrictions": ["owner"]
                },
                {
                    "description": "administrators see everything",
                    "targets": ["administrator"],
                    "actions": ["access", "read", "write", "destroy", "task"],
                    "allow": true,
                    "restrictions": ["all"]
                },
                {
                    "description": "owners edit the title only",
                    "targets": ["owner"],
                    "actions": ["write"],
                    "allow": true,
                    "fields": ["title"],
                    "restrictions": ["owner"]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn anonymous_matches_nothing_and_is_denied() {
        let targets = subject_targets(None, false);
        let acl_match = policy().evaluate(&targets, AclAction::Read);
        assert!(!acl_match.allow);
        assert!(acl_match.matching_rules.is_empty());
    }

    #[test]
    fn owner_read_is_scoped_to_owned_rows() {
        let subject = Subject::new("u1");
        let targets = subject_targets(Some(&subject), true);
        let acl_match = policy().evaluate(&targets, AclAction::Read);

        assert!(acl_match.allow);
        assert!(acl_match.scope_allows(true));
        assert!(!acl_match.scope_allows(false));
        // the owner read rule grants no field constraint
        assert!(acl_match.field_allowed("anything"));
    }

    #[test]
    fn write_fields_union_over_matching_allow_rules() {
        let subject = Subject::new("u1");
        let targets = subject_targets(Some(&subject), true);
        let acl_match = policy().evaluate(&targets, AclAction::Write);

        assert!(acl_match.allow);
        assert!(acl_match.field_allowed("title"));
        assert!(!acl_match.field_allowed("secret_cost"));
    }

    #[test]
    fn admin_scope_grants_all() {
        let admin = Subject {
            administrator: true,
            ..Subject::new("admin")
        };
        let targets = subject_targets(Some(&admin), false);
        let acl_match = policy().evaluate(&targets, AclAction::Read);

        assert!(acl_match.allow);
        assert!(acl_match.scope_allows(false));
    }

    #[test]
    fn last_matching_rule_decides_allow() {
        let policy: AclPolicy = serde_json::from_value(json!({
            "rules": [
                {"targets": ["user"], "actions": ["read"], "allow": true},
                {"targets": ["user"], "actions": ["read"], "allow": false}
            ]
        }))
        .unwrap();

        let subject = Subject::new("u1");
        let targets = subject_targets(Some(&subject), false);
        assert!(!policy.evaluate(&targets, AclAction::Read).allow);
    }

    #[test]
    fn missing_policy_is_permissive() {
        let targets = subject_targets(None, false);
        let acl_match = evaluate(None, &targets, AclAction::Destroy, false, None);
        assert!(acl_match.allow);
        assert!(acl_match.scope_allows(false));
        assert!(acl_match.task_allowed("anything"));
    }
}
