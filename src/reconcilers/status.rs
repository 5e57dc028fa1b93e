use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::resources::common::{ComponentCondition, ComponentStatus};

pub const READY: &str = "Ready";
pub const SINK_RESOLVED: &str = "SinkResolved";
pub const RBAC_READY: &str = "RBACReady";
pub const ADAPTER_READY: &str = "AdapterReady";

const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";
const STATUS_UNKNOWN: &str = "Unknown";

/// A happy condition and the dependent conditions it summarizes.
#[derive(Clone, Copy, Debug)]
pub struct ConditionSet {
    pub happy: &'static str,
    pub dependents: &'static [&'static str],
}

/// Conditions of components which send events to a sink.
pub const SOURCE_CONDITIONS: ConditionSet = ConditionSet {
    happy: READY,
    dependents: &[SINK_RESOLVED, RBAC_READY, ADAPTER_READY],
};

/// Conditions of components which only receive events.
pub const TARGET_CONDITIONS: ConditionSet = ConditionSet {
    happy: READY,
    dependents: &[RBAC_READY, ADAPTER_READY],
};

impl ConditionSet {
    pub fn contains(&self, condition_type: &str) -> bool {
        self.happy == condition_type || self.dependents.contains(&condition_type)
    }
}

/// Applies condition transitions to a copy of a component's status.
///
/// The happy condition is derived: it is True only when every dependent is True, False as
/// soon as one dependent is False, and Unknown otherwise.
#[derive(Debug)]
pub struct StatusManager {
    set: ConditionSet,
    status: ComponentStatus,
}

impl StatusManager {
    pub fn new(set: ConditionSet, status: ComponentStatus) -> Self {
        let mut manager = Self { set, status };
        for condition_type in set.dependents.iter().chain([&set.happy]) {
            if manager.condition(condition_type).is_none() {
                manager.set_condition(condition_type, STATUS_UNKNOWN, None, None);
            }
        }
        manager.recompute_happy();
        manager
    }

    pub fn condition(&self, condition_type: &str) -> Option<&ComponentCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.r#type == condition_type)
    }

    pub fn is_ready(&self) -> bool {
        self.is_true(self.set.happy)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == STATUS_TRUE)
    }

    pub fn mark_true(&mut self, condition_type: &str) {
        self.set_condition(condition_type, STATUS_TRUE, None, None);
        self.recompute_happy();
    }

    pub fn mark_false(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set_condition(
            condition_type,
            STATUS_FALSE,
            Some(reason.into()),
            Some(message.into()),
        );
        self.recompute_happy();
    }

    pub fn mark_unknown(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set_condition(
            condition_type,
            STATUS_UNKNOWN,
            Some(reason.into()),
            Some(message.into()),
        );
        self.recompute_happy();
    }

    pub fn status_mut(&mut self) -> &mut ComponentStatus {
        &mut self.status
    }

    pub fn into_status(self) -> ComponentStatus {
        self.status
    }

    fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: Option<String>,
        message: Option<String>,
    ) {
        let now = Time(Utc::now());
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(now);
                }
                existing.status = status.into();
                existing.reason = reason;
                existing.message = message;
            }
            None => {
                self.status.conditions.push(ComponentCondition {
                    last_transition_time: Some(now),
                    message,
                    reason,
                    status: status.into(),
                    r#type: condition_type.into(),
                });
                self.status
                    .conditions
                    .sort_by(|a, b| a.r#type.cmp(&b.r#type));
            }
        }
    }

    fn recompute_happy(&mut self) {
        let dependents: Vec<&ComponentCondition> = self
            .set
            .dependents
            .iter()
            .filter_map(|d| self.condition(d))
            .collect();

        let (status, reason, message) = if let Some(failed) =
            dependents.iter().find(|c| c.status == STATUS_FALSE)
        {
            (STATUS_FALSE, failed.reason.clone(), failed.message.clone())
        } else if dependents.len() == self.set.dependents.len()
            && dependents.iter().all(|c| c.status == STATUS_TRUE)
        {
            (STATUS_TRUE, None, None)
        } else {
            let pending = dependents.iter().find(|c| c.status != STATUS_TRUE);
            (
                STATUS_UNKNOWN,
                pending.and_then(|c| c.reason.clone()),
                pending.and_then(|c| c.message.clone()),
            )
        };

        self.set_condition(self.set.happy, status, reason, message);
    }
}
