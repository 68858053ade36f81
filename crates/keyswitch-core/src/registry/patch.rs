//! Partial updates for key records

use chrono::{DateTime, Utc};

use super::types::{KeyKind, KeyRecord};
use crate::quota::QuotaPeriod;

/// Update instruction for a clearable field
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldUpdate<T> {
    /// Leave the current value untouched
    #[default]
    Keep,
    /// Replace the current value
    Set(T),
    /// Remove the current value
    Clear,
}

impl<T> FieldUpdate<T> {
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Keep => current,
            Self::Set(value) => Some(value),
            Self::Clear => None,
        }
    }
}

impl FieldUpdate<String> {
    /// Blank strings mean "keep"
    fn from_sparse(value: &str) -> Self {
        if value.trim().is_empty() {
            Self::Keep
        } else {
            Self::Set(value.to_string())
        }
    }

    fn from_sparse_opt(value: &Option<String>) -> Self {
        value.as_deref().map_or(Self::Keep, Self::from_sparse)
    }

    fn apply_str(self, current: String) -> String {
        self.apply(Some(current)).unwrap_or_default()
    }
}

/// Changes to apply to an existing key, addressed by `id`
///
/// `None` / [`FieldUpdate::Keep`] leaves a field as it is. Activation is one-way:
/// `active: true` activates the key, `false` leaves activation alone.
#[derive(Debug, Clone, Default)]
pub struct KeyPatch {
    pub id: String,
    pub name: Option<String>,
    pub secret: Option<String>,
    pub endpoint: FieldUpdate<String>,
    pub kind: Option<KeyKind>,
    pub description: FieldUpdate<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub tags: Option<Vec<String>>,
    pub provider: FieldUpdate<String>,
    pub auth_method: FieldUpdate<String>,
    pub wire_protocol: FieldUpdate<String>,
    pub env_var: FieldUpdate<String>,
    pub requires_upstream_auth: FieldUpdate<bool>,
    pub raw_config: FieldUpdate<String>,
    pub quota_period: Option<QuotaPeriod>,
    pub quota_limit: Option<f64>,
    pub quota_used: Option<f64>,
}

impl KeyPatch {
    /// A patch for `id` that changes nothing yet
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// Build a patch from an edited record using zero-value semantics:
    /// every blank string, zero number, empty list, unset timestamp, or
    /// default enum (`openai` kind, `monthly` period) keeps the stored value.
    /// Nothing can be cleared this way; use the explicit fields for that.
    pub fn sparse(record: &KeyRecord) -> Self {
        let non_blank = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
        let non_zero = |n: f64| (n != 0.0).then_some(n);

        Self {
            id: record.id.clone(),
            name: non_blank(&record.name),
            secret: non_blank(&record.secret),
            endpoint: FieldUpdate::from_sparse(&record.endpoint),
            kind: Some(record.kind.clone()).filter(|k| *k != KeyKind::default()),
            description: FieldUpdate::from_sparse(&record.description),
            created_at: record.created_at,
            last_checked_at: record.last_checked_at,
            last_used_at: record.last_used_at,
            active: record.active,
            tags: (!record.tags.is_empty()).then(|| record.tags.clone()),
            provider: FieldUpdate::from_sparse_opt(&record.provider),
            auth_method: FieldUpdate::from_sparse_opt(&record.auth_method),
            wire_protocol: FieldUpdate::from_sparse_opt(&record.wire_protocol),
            env_var: FieldUpdate::from_sparse_opt(&record.env_var),
            requires_upstream_auth: record
                .requires_upstream_auth
                .map_or(FieldUpdate::Keep, FieldUpdate::Set),
            raw_config: FieldUpdate::from_sparse_opt(&record.raw_config),
            quota_period: Some(record.quota_period.clone()).filter(|p| *p != QuotaPeriod::default()),
            quota_limit: non_zero(record.quota_limit),
            quota_used: non_zero(record.quota_used),
        }
    }

    /// Merge onto `existing`. The id and active flag are never taken from the patch.
    pub(crate) fn apply_to(self, existing: &KeyRecord) -> KeyRecord {
        let current = existing.clone();
        KeyRecord {
            id: current.id,
            name: self.name.unwrap_or(current.name),
            secret: self.secret.unwrap_or(current.secret),
            endpoint: self.endpoint.apply_str(current.endpoint),
            kind: self.kind.unwrap_or(current.kind),
            description: self.description.apply_str(current.description),
            created_at: self.created_at.or(current.created_at),
            last_checked_at: self.last_checked_at.or(current.last_checked_at),
            last_used_at: self.last_used_at.or(current.last_used_at),
            active: current.active,
            tags: self.tags.unwrap_or(current.tags),
            provider: self.provider.apply(current.provider),
            auth_method: self.auth_method.apply(current.auth_method),
            wire_protocol: self.wire_protocol.apply(current.wire_protocol),
            env_var: self.env_var.apply(current.env_var),
            requires_upstream_auth: self.requires_upstream_auth.apply(current.requires_upstream_auth),
            raw_config: self.raw_config.apply(current.raw_config),
            quota_period: self.quota_period.unwrap_or(current.quota_period),
            quota_limit: self.quota_limit.unwrap_or(current.quota_limit),
            quota_used: self.quota_used.unwrap_or(current.quota_used),
        }
    }
}
