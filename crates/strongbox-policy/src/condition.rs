//! Policy conditions and the request context they are evaluated against.

use std::net::IpAddr;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Attributes of a request that conditions can inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Source address of the caller.
    pub source_ip: Option<IpAddr>,
    /// Deployment environment (e.g. `prod`).
    pub environment: Option<String>,
    /// Calling service name.
    pub service: Option<String>,
    /// Evaluation time.
    pub time: DateTime<Utc>,
}

impl RequestContext {
    /// Creates an empty context evaluated at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Creates an empty context evaluated at the given time.
    #[must_use]
    pub const fn at(time: DateTime<Utc>) -> Self {
        Self {
            source_ip: None,
            environment: None,
            service: None,
            time,
        }
    }

    /// Sets the source address.
    #[must_use]
    pub const fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Sets the calling service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::now()
    }
}

/// A predicate over the [`RequestContext`].
///
/// A condition whose attribute is absent from the context does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Source address lies in one of the networks.
    IpRange {
        /// Accepted networks.
        cidrs: Vec<IpNet>,
    },
    /// Evaluation time (UTC) lies in a daily window, optionally restricted to
    /// certain weekdays. A window whose end precedes its start wraps midnight.
    TimeWindow {
        /// Window start, inclusive.
        start: NaiveTime,
        /// Window end, exclusive.
        end: NaiveTime,
        /// Allowed weekdays. Empty means every day.
        #[serde(default)]
        days: Vec<Weekday>,
    },
    /// Environment is one of the values.
    Environment {
        /// Accepted environments.
        values: Vec<String>,
    },
    /// Calling service is one of the values.
    Service {
        /// Accepted services.
        values: Vec<String>,
    },
}

impl Condition {
    /// Evaluates the condition.
    #[must_use]
    pub fn holds(&self, ctx: &RequestContext) -> bool {
        match self {
            Self::IpRange { cidrs } => ctx
                .source_ip
                .is_some_and(|ip| cidrs.iter().any(|net| net.contains(&ip))),
            Self::TimeWindow { start, end, days } => {
                if !days.is_empty() && !days.contains(&ctx.time.weekday()) {
                    return false;
                }
                let t = ctx.time.time();
                if start <= end {
                    *start <= t && t < *end
                } else {
                    t >= *start || t < *end
                }
            }
            Self::Environment { values } => ctx
                .environment
                .as_ref()
                .is_some_and(|env| values.iter().any(|v| v == env)),
            Self::Service { values } => ctx
                .service
                .as_ref()
                .is_some_and(|svc| values.iter().any(|v| v == svc)),
        }
    }

    /// Short name of the condition kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IpRange { .. } => "ip_range",
            Self::TimeWindow { .. } => "time_window",
            Self::Environment { .. } => "environment",
            Self::Service { .. } => "service",
        }
    }
}
