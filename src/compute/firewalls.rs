//! Firewall rule calls.

use tracing::debug;

use crate::gateway::{RuleDeletion, RuleInsert};
use crate::lab::FirewallRule;

use super::types::FirewallBody;
use super::{ApiResponse, ComputeError, ComputeGateway};

impl ComputeGateway {
    pub(super) async fn insert_firewall_rule(
        &self,
        rule: &FirewallRule,
    ) -> Result<RuleInsert, ComputeError> {
        let body = FirewallBody::from(rule);
        let request = Self::client()
            .post(self.project_url("global/firewalls"))
            .json(&body);
        let response = self.send("upsert_firewall_rule", request).await?;
        rule_insert_from(response)
    }

    pub(super) async fn fetch_firewall_rule(&self, name: &str) -> Result<bool, ComputeError> {
        let request = Self::client().get(self.project_url(&format!("global/firewalls/{name}")));
        let response = self.send("firewall_rule_exists", request).await?;
        if response.is_not_found() {
            return Ok(false);
        }
        response.ensure_success("firewall_rule_exists")?;
        Ok(true)
    }

    pub(super) async fn remove_firewall_rules(
        &self,
        names: &[String],
    ) -> Result<Vec<RuleDeletion>, ComputeError> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let request =
                Self::client().delete(self.project_url(&format!("global/firewalls/{name}")));
            let response = self.send("delete_firewall_rules", request).await?;
            let deleted = rule_deleted_from(response)?;
            debug!(rule = %name, deleted, "firewall rule deletion");
            results.push(RuleDeletion {
                name: name.clone(),
                deleted,
            });
        }
        Ok(results)
    }
}

pub(super) fn rule_insert_from(response: ApiResponse) -> Result<RuleInsert, ComputeError> {
    if response.is_conflict() {
        return Ok(RuleInsert::AlreadyExists);
    }
    response.ensure_success("upsert_firewall_rule")?;
    Ok(RuleInsert::Created)
}

pub(super) fn rule_deleted_from(response: ApiResponse) -> Result<bool, ComputeError> {
    if response.is_not_found() {
        return Ok(false);
    }
    response.ensure_success("delete_firewall_rules")?;
    Ok(true)
}
