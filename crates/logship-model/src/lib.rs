//! Canonical log record model shared by every transport receiver.
//!
//! Field defaulting rules live here so the registry/store/receivers apply
//! exactly one definition of "empty". The store re-applies them at the
//! write boundary (belt-and-braces against a receiver that forgot to).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_CLIENT_IP: &str = "0.0.0.0";
pub const DEFAULT_UNKNOWN: &str = "unknown";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// The transport a record arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushType {
    Grpc,
    Udp,
    Tcp,
    Http,
}

impl fmt::Display for PushType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PushType::Grpc => "grpc",
            PushType::Udp => "udp",
            PushType::Tcp => "tcp",
            PushType::Http => "http",
        };
        f.write_str(s)
    }
}

/// The canonical in-memory record produced by every transport.
///
/// `timestamp` is always server-assigned at receive time — never trust a
/// client-supplied value for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub output: String,
    pub detail: String,
    pub error_info: String,
    pub service: String,
    pub client_ip: String,
    pub client_addr: String,
    pub log_level: String,
    pub operator_id: String,
    pub operator: String,
    pub operator_ip: String,
    pub operator_equipment: String,
    pub operator_company: String,
    pub operator_project: String,
    pub schema: String,
    pub module: String,
    pub push_type: PushType,
    pub timestamp: DateTime<Utc>,
}

/// Raw, not-yet-defaulted fields a receiver decodes off the wire.
///
/// Every transport maps its own request shape into this before calling
/// [`LogRecord::from_fields`]; that is the single point field defaulting
/// happens, per spec invariant 2 ("every record written has non-empty
/// service/output/module/schema and a server timestamp").
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    pub output: String,
    pub detail: String,
    pub error_info: String,
    pub service: String,
    pub client_ip: String,
    pub client_addr: String,
    pub log_level: String,
    pub operator_id: String,
    pub operator: String,
    pub operator_ip: String,
    pub operator_equipment: String,
    pub operator_company: String,
    pub operator_project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service must not be empty")]
    EmptyService,
    #[error("output must not be empty")]
    EmptyOutput,
    #[error("module must not be empty")]
    EmptyModule,
    #[error("schema must not be empty")]
    EmptySchema,
}

impl LogRecord {
    /// Build a canonical record from raw wire fields, applying the default
    /// rules from spec §3/§4.2, and stamping `timestamp` with the server's
    /// receive time. Returns `Err` if a required field is empty.
    pub fn from_fields(
        raw: RawFields,
        schema: String,
        module: String,
        push_type: PushType,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if raw.service.trim().is_empty() {
            return Err(ValidationError::EmptyService);
        }
        if raw.output.trim().is_empty() {
            return Err(ValidationError::EmptyOutput);
        }
        if module.trim().is_empty() {
            return Err(ValidationError::EmptyModule);
        }
        if schema.trim().is_empty() {
            return Err(ValidationError::EmptySchema);
        }

        Ok(Self {
            output: raw.output,
            detail: raw.detail,
            error_info: raw.error_info,
            service: default_if_empty(&raw.service, DEFAULT_UNKNOWN),
            client_ip: default_if_empty(&raw.client_ip, DEFAULT_CLIENT_IP),
            client_addr: default_if_empty(&raw.client_addr, DEFAULT_UNKNOWN),
            log_level: normalize_log_level(&raw.log_level),
            operator_id: default_if_empty(&raw.operator_id, DEFAULT_UNKNOWN),
            operator: default_if_empty(&raw.operator, DEFAULT_UNKNOWN),
            operator_ip: default_if_empty(&raw.operator_ip, DEFAULT_UNKNOWN),
            operator_equipment: default_if_empty(&raw.operator_equipment, DEFAULT_UNKNOWN),
            operator_company: default_if_empty(&raw.operator_company, DEFAULT_UNKNOWN),
            operator_project: default_if_empty(&raw.operator_project, DEFAULT_UNKNOWN),
            schema,
            module,
            push_type,
            timestamp: now,
        })
    }

    pub fn table_name(&self) -> String {
        table_name(&self.schema, &self.module)
    }
}

/// `<schemaName>.log_<schemaName>_<moduleName>` per spec §4.2/§6 DDL.
pub fn table_name(schema: &str, module: &str) -> String {
    format!("{schema}.log_{schema}_{module}")
}

fn default_if_empty(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn normalize_log_level(value: &str) -> String {
    if value.trim().is_empty() {
        DEFAULT_LOG_LEVEL.to_string()
    } else {
        value.trim().to_ascii_uppercase()
    }
}

/// Module-name allow-list applied by the TCP and UDP receivers (SPEC_FULL §3
/// supplement — the original Go service gates `module` against a closed enum
/// on those two transports; HTTP/gRPC accept arbitrary module names).
#[derive(Debug, Clone)]
pub struct ModuleAllowList {
    allowed: HashSet<String>,
}

impl ModuleAllowList {
    pub fn new(modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: modules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, module: &str) -> bool {
        self.allowed.contains(module)
    }
}

impl Default for ModuleAllowList {
    /// The original's closed enum: login, logout, error, permission, user, group.
    fn default() -> Self {
        Self::new(["login", "logout", "error", "permission", "user", "group"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn defaults_empty_optional_fields() {
        let raw = RawFields {
            output: "ok".into(),
            service: "auth".into(),
            ..Default::default()
        };
        let rec =
            LogRecord::from_fields(raw, "app1".into(), "login".into(), PushType::Http, now())
                .unwrap();
        assert_eq!(rec.client_ip, DEFAULT_CLIENT_IP);
        assert_eq!(rec.client_addr, DEFAULT_UNKNOWN);
        assert_eq!(rec.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(rec.operator, DEFAULT_UNKNOWN);
        assert_eq!(rec.operator_project, DEFAULT_UNKNOWN);
    }

    #[test]
    fn upper_cases_log_level() {
        let raw = RawFields {
            output: "ok".into(),
            service: "auth".into(),
            log_level: "warn".into(),
            ..Default::default()
        };
        let rec =
            LogRecord::from_fields(raw, "app1".into(), "login".into(), PushType::Tcp, now())
                .unwrap();
        assert_eq!(rec.log_level, "WARN");
    }

    #[test]
    fn rejects_empty_service() {
        let raw = RawFields {
            output: "ok".into(),
            ..Default::default()
        };
        let err =
            LogRecord::from_fields(raw, "app1".into(), "login".into(), PushType::Grpc, now())
                .unwrap_err();
        assert_eq!(err, ValidationError::EmptyService);
    }

    #[test]
    fn table_name_follows_schema_module_convention() {
        assert_eq!(table_name("app1", "login"), "app1.log_app1_login");
    }

    #[test]
    fn module_allow_list_default_matches_original_enum() {
        let list = ModuleAllowList::default();
        assert!(list.is_allowed("login"));
        assert!(list.is_allowed("group"));
        assert!(!list.is_allowed("billing"));
    }
}
