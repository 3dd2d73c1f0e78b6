//! Handler names checked against the declared subscriptions

use hoppity::Topology;

/// Result of matching handler names against a topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Handler names with no declared subscription, in handler order
    pub missing: Vec<String>,
    /// Every subscription declared across all vhosts
    pub available: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn message(&self) -> String {
        if self.is_valid() {
            return "Subscription validation passed".to_string();
        }
        format!(
            "Subscription validation failed: Missing subscriptions: {}. Available subscriptions: {}",
            self.missing.join(", "),
            self.available.join(", ")
        )
    }
}

pub fn validate_subscription_handlers<'a, I>(topology: &Topology, handler_names: I) -> ValidationReport
where
    I: IntoIterator<Item = &'a str>,
{
    let available = topology.subscription_names();
    let missing = handler_names
        .into_iter()
        .filter(|name| !available.iter().any(|known| known == name))
        .map(str::to_string)
        .collect();

    ValidationReport { missing, available }
}
