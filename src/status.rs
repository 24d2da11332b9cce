//! Outcome record emitted at the end of every run.

use serde::Serialize;

use crate::lab::Direction;

/// What happened to the lab instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceChange {
    /// The instance was left as found.
    #[default]
    NotModified,
    /// A new instance was created.
    Created,
    /// The instance was stopped.
    Stopped,
    /// The instance was deleted.
    Deleted,
}

/// What happened to the in-guest configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingsChange {
    /// Bootstrap did not run or found the guest already configured.
    #[default]
    NotModified,
    /// Every bootstrap script ran to completion.
    Configured,
    /// The configuration was discarded with the instance.
    GoneWithInstance,
}

/// What happened to one firewall rule.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleChange {
    /// The rule was left as found.
    #[default]
    NotModified,
    /// The rule was created.
    Created,
    /// The rule was deleted.
    Deleted,
    /// Teardown found no rule to delete.
    NotFound,
}

/// What happened to the custom boot image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageChange {
    /// The run did not involve the custom image.
    #[default]
    NotRequested,
    /// The image was built.
    Created,
    /// The image already existed.
    NotModified,
    /// The image was deleted.
    Deleted,
    /// Teardown found no image to delete.
    NotFound,
}

/// Firewall part of the record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FirewallStatus {
    /// Ingress rule outcome.
    pub ingress: RuleChange,
    /// Egress rule outcome.
    pub egress: RuleChange,
}

impl FirewallStatus {
    /// Records the outcome for `direction`.
    pub const fn set(&mut self, direction: Direction, change: RuleChange) {
        match direction {
            Direction::Ingress => self.ingress = change,
            Direction::Egress => self.egress = change,
        }
    }

    /// Outcome recorded for `direction`.
    #[must_use]
    pub const fn get(&self, direction: Direction) -> RuleChange {
        match direction {
            Direction::Ingress => self.ingress,
            Direction::Egress => self.egress,
        }
    }
}

/// Summary of one run. Each field starts as "nothing changed" and is updated
/// as soon as the corresponding stage completes, so a failed run still
/// reports the stages it finished.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Status {
    /// Instance outcome.
    pub instance: InstanceChange,
    /// Guest configuration outcome.
    pub settings: SettingsChange,
    /// Firewall outcomes.
    pub firewall: FirewallStatus,
    /// Custom image outcome.
    pub image: ImageChange,
}

impl Status {
    /// Renders the record as a single line of JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only occurs on writer failure.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn default_record_reports_nothing_changed() {
        let json = Status::default().to_json().unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(
            json,
            r#"{"instance":"not-modified","settings":"not-modified","firewall":{"ingress":"not-modified","egress":"not-modified"},"image":"not-requested"}"#
        );
    }

    #[rstest]
    fn teardown_record_uses_kebab_case_values() {
        let mut status = Status {
            instance: InstanceChange::Deleted,
            settings: SettingsChange::GoneWithInstance,
            image: ImageChange::NotFound,
            ..Status::default()
        };
        status.firewall.set(Direction::Ingress, RuleChange::Deleted);
        status.firewall.set(Direction::Egress, RuleChange::NotFound);

        let value: serde_json::Value = serde_json::from_str(
            &status.to_json().unwrap_or_else(|err| panic!("{err}")),
        )
        .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(value["instance"], "deleted");
        assert_eq!(value["settings"], "gone-with-instance");
        assert_eq!(value["firewall"]["ingress"], "deleted");
        assert_eq!(value["firewall"]["egress"], "not-found");
        assert_eq!(value["image"], "not-found");
    }
}
