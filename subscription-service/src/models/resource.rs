//! Resource model: projects a quota's raw constraint map into a typed
//! capability object the rest of the system can query without re-parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use service_core::error::AppError;

use crate::models::Quota;

/// Closed set of resource kinds a plan can grant.
///
/// Adding a kind means adding a variant plus its arms in `constraint_keys`
/// and `project`; existing kinds' code paths are untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    LocationsCount,
    ProtocolsCount,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::LocationsCount => "LOCATIONS_COUNT",
            ResourceType::ProtocolsCount => "PROTOCOLS_COUNT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOCATIONS_COUNT" => Some(ResourceType::LocationsCount),
            "PROTOCOLS_COUNT" => Some(ResourceType::ProtocolsCount),
            _ => None,
        }
    }

    /// Legal constraint keys for this resource type, in declaration order.
    pub fn constraint_keys(&self) -> &'static [&'static str] {
        match self {
            ResourceType::LocationsCount => &["CAN_CHOOSE", "SELECTION_BY_POPULARITY"],
            ResourceType::ProtocolsCount => &[
                "SIMULTANEOUS_USE",
                "USE_VLESS",
                "USE_OUTLINE",
                "USE_WIREGUARD",
            ],
        }
    }

    /// Validate a constraint map against this type's key set.
    ///
    /// Applied at write time; reads tolerate missing keys until an accessor
    /// actually needs one.
    pub fn validate_constraints(&self, constraints: &Value) -> Result<(), AppError> {
        let map = constraints.as_object().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("constraints must be a JSON object"))
        })?;

        for (key, value) in map {
            if !self.constraint_keys().contains(&key.as_str()) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "unknown constraint key {:?} for resource type {}",
                    key,
                    self.as_str()
                )));
            }
            if !value.is_boolean() && !value.is_i64() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "constraint {:?} must be a boolean or an integer",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Project a stored quota into the typed capability for this type.
    ///
    /// The stored map may be a superset or subset of the legal keys;
    /// accessors report `ConfigurationError` for keys they need but cannot
    /// find.
    pub fn project(&self, quota: &Quota) -> Capability {
        let constraints = quota
            .constraints
            .as_object()
            .cloned()
            .unwrap_or_default();

        match self {
            ResourceType::LocationsCount => Capability::Locations(LocationsCapability {
                limit: quota.resource_limit,
                constraints,
            }),
            ResourceType::ProtocolsCount => Capability::Protocols(ProtocolsCapability {
                limit: quota.resource_limit,
                constraints,
            }),
        }
    }
}

/// Typed view over one quota's constraint map.
#[derive(Debug, Clone)]
pub enum Capability {
    Locations(LocationsCapability),
    Protocols(ProtocolsCapability),
}

/// Entitlement to a number of usable locations.
#[derive(Debug, Clone)]
pub struct LocationsCapability {
    pub limit: Option<i32>,
    constraints: Map<String, Value>,
}

impl LocationsCapability {
    pub fn can_choose(&self) -> Result<bool, AppError> {
        bool_constraint(&self.constraints, "CAN_CHOOSE", ResourceType::LocationsCount)
    }

    pub fn selection_by_popularity(&self) -> Result<bool, AppError> {
        bool_constraint(
            &self.constraints,
            "SELECTION_BY_POPULARITY",
            ResourceType::LocationsCount,
        )
    }
}

/// Canonical protocol tokens, reported in this fixed order.
const PROTOCOL_FLAGS: &[(&str, &str)] = &[
    ("USE_VLESS", "vless"),
    ("USE_OUTLINE", "outline"),
    ("USE_WIREGUARD", "wg"),
];

/// Entitlement to a number and kind of usable protocols.
#[derive(Debug, Clone)]
pub struct ProtocolsCapability {
    pub limit: Option<i32>,
    constraints: Map<String, Value>,
}

impl ProtocolsCapability {
    pub fn can_use_same_time(&self) -> Result<bool, AppError> {
        bool_constraint(
            &self.constraints,
            "SIMULTANEOUS_USE",
            ResourceType::ProtocolsCount,
        )
    }

    pub fn available_protocols(&self) -> Result<Vec<&'static str>, AppError> {
        let mut protocols = Vec::new();
        for (flag, token) in PROTOCOL_FLAGS {
            if bool_constraint(&self.constraints, flag, ResourceType::ProtocolsCount)? {
                protocols.push(*token);
            }
        }
        Ok(protocols)
    }
}

/// A missing key means the quota row is malformed, not "false".
fn bool_constraint(
    map: &Map<String, Value>,
    key: &str,
    resource_type: ResourceType,
) -> Result<bool, AppError> {
    match map.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(AppError::ConfigurationError(anyhow::anyhow!(
            "constraint {:?} on {} quota is not a boolean: {}",
            key,
            resource_type.as_str(),
            other
        ))),
        None => Err(AppError::ConfigurationError(anyhow::anyhow!(
            "constraint {:?} missing from {} quota",
            key,
            resource_type.as_str()
        ))),
    }
}
