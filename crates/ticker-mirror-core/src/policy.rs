//! Freshness policy table: the maximum age each component may reach before
//! its local artifact must be refetched.
//!
//! | Component | Max age |
//! |-----------|---------|
//! | `price` | 24 hours |
//! | `income_stmt`, `balance_sheet`, `cash_flow` | 90 days |
//! | `info` | 7 days |
//! | `unstructured` | 365 days |

use std::collections::BTreeMap;

use chrono::Duration;

use crate::error::{Error, Result};
use crate::models::Component;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessPolicy {
    max_ages: BTreeMap<Component, Duration>,
}

impl FreshnessPolicy {
    pub fn max_age(&self, component: Component) -> Duration {
        self.max_ages
            .get(&component)
            .copied()
            .unwrap_or_else(|| default_max_age(component))
    }

    /// Lookup by component name; unknown names fail with `UnknownComponent`.
    pub fn max_age_by_name(&self, name: &str) -> Result<Duration> {
        Ok(self.max_age(name.parse::<Component>()?))
    }

    pub fn with_max_age(mut self, component: Component, max_age: Duration) -> Self {
        self.max_ages.insert(component, max_age);
        self
    }

    /// Apply `(component name, hours)` overrides on top of the defaults.
    pub fn with_overrides<'a, I>(self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let mut policy = self;
        for (name, hours) in overrides {
            let component = name.parse::<Component>()?;
            let max_age = i64::try_from(hours)
                .ok()
                .and_then(Duration::try_hours)
                .ok_or(Error::InvalidMaxAge { component, hours })?;
            policy = policy.with_max_age(component, max_age);
        }
        Ok(policy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Component, Duration)> + '_ {
        self.max_ages.iter().map(|(c, d)| (*c, *d))
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_ages: Component::ALL
                .into_iter()
                .map(|c| (c, default_max_age(c)))
                .collect(),
        }
    }
}

fn default_max_age(component: Component) -> Duration {
    match component {
        Component::Price => Duration::hours(24),
        Component::IncomeStmt | Component::BalanceSheet | Component::CashFlow => {
            Duration::days(90)
        }
        Component::Info => Duration::days(7),
        Component::Unstructured => Duration::days(365),
    }
}
