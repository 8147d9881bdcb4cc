//! Component health registry.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Health flag plus the last failure message of one dependency.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    /// Whether the service can answer queries without this component.
    required: bool,
    healthy: AtomicBool,
    message: parking_lot::RwLock<Option<String>>,
}

impl ComponentHealth {
    pub const fn new(name: &'static str, required: bool) -> Self {
        Self {
            name,
            required,
            healthy: AtomicBool::new(false),
            message: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_healthy(&self) {
        self.healthy.store(true, Ordering::Relaxed);
        *self.message.write() = None;
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        self.healthy.store(false, Ordering::Relaxed);
        *self.message.write() = Some(msg.into());
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> Option<String> {
        self.message.read().clone()
    }

    fn report(&self) -> ComponentHealthReport {
        ComponentHealthReport {
            name: self.name.to_string(),
            healthy: self.is_healthy(),
            message: self.message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthReport {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health of the query engine's dependencies.
///
/// ClickHouse is required; without the website directory queries still run,
/// only same-domain referrer exclusion is lost.
pub struct HealthRegistry {
    pub clickhouse: ComponentHealth,
    pub website_directory: ComponentHealth,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        Self {
            clickhouse: ComponentHealth::new("clickhouse", true),
            website_directory: ComponentHealth::new("website_directory", false),
        }
    }

    fn components(&self) -> [&ComponentHealth; 2] {
        [&self.clickhouse, &self.website_directory]
    }

    pub fn report(&self) -> HealthReport {
        let components = self.components();
        let status = if components.iter().all(|c| c.is_healthy()) {
            HealthStatus::Healthy
        } else if components.iter().filter(|c| c.required).all(|c| c.is_healthy()) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            components: components.iter().map(|c| c.report()).collect(),
        }
    }

    /// Ready once every required component is healthy.
    pub fn is_ready(&self) -> bool {
        self.components()
            .iter()
            .filter(|c| c.required)
            .all(|c| c.is_healthy())
    }

    pub fn is_alive(&self) -> bool {
        true
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub static HEALTH: std::sync::LazyLock<HealthRegistry> =
    std::sync::LazyLock::new(HealthRegistry::new);

pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
