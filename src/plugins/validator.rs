//! 插件能力校验
//!
//! 绑定时对插件声明的契约做一次性检查：线上协议版本、所服务的插槽、插槽协议版本与能力标识。
//! 结果在绑定的整个生命周期内缓存，调用期间不会重新校验。

use crate::types::{HandshakeResponse, SlotId, WIRE_VERSION};
use semver::{Version, VersionReq};
use std::fmt;

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    valid: bool,
    reason: Option<String>,
}

impl ValidationOutcome {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// 拒绝原因
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl From<ValidationOutcome> for bool {
    fn from(outcome: ValidationOutcome) -> Self {
        outcome.valid
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            None => f.write_str("accepted"),
            Some(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

/// 能力校验器特征
///
/// 必须是无副作用的单次检查
pub trait CapabilityValidator: Send + Sync {
    fn validate(&self, advertised: &HandshakeResponse) -> ValidationOutcome;
}

/// 基于语义化版本范围与能力集合的校验器
#[derive(Debug, Clone)]
pub struct SlotValidator {
    slot: SlotId,
    version_range: String,
    required_capabilities: Vec<String>,
}

impl SlotValidator {
    pub fn new(slot: SlotId, version_range: &str) -> Self {
        Self {
            slot,
            version_range: version_range.to_string(),
            required_capabilities: Vec::new(),
        }
    }

    /// 要求插件声明指定能力
    pub fn require(mut self, capability: &str) -> Self {
        self.required_capabilities.push(capability.to_string());
        self
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn version_range(&self) -> &str {
        &self.version_range
    }

    pub fn required_capabilities(&self) -> &[String] {
        &self.required_capabilities
    }
}

impl CapabilityValidator for SlotValidator {
    fn validate(&self, advertised: &HandshakeResponse) -> ValidationOutcome {
        if advertised.plugin_name.trim().is_empty() {
            return ValidationOutcome::rejected("plugin did not declare a name");
        }

        if advertised.wire_version != WIRE_VERSION {
            return ValidationOutcome::rejected(format!(
                "wire version {} is not supported (expected {})",
                advertised.wire_version, WIRE_VERSION
            ));
        }

        if !advertised.slots.contains(&self.slot) {
            return ValidationOutcome::rejected(format!(
                "plugin '{}' does not serve slot '{}'",
                advertised.plugin_name, self.slot
            ));
        }

        if let Err(e) = Version::parse(&advertised.plugin_version) {
            return ValidationOutcome::rejected(format!(
                "invalid plugin version '{}': {}",
                advertised.plugin_version, e
            ));
        }

        let range = match VersionReq::parse(&self.version_range) {
            Ok(range) => range,
            Err(e) => {
                return ValidationOutcome::rejected(format!(
                    "slot '{}' has invalid version range '{}': {}",
                    self.slot, self.version_range, e
                ))
            }
        };

        let slot_version = match Version::parse(&advertised.slot_version) {
            Ok(version) => version,
            Err(e) => {
                return ValidationOutcome::rejected(format!(
                    "invalid slot version '{}': {}",
                    advertised.slot_version, e
                ))
            }
        };

        if !range.matches(&slot_version) {
            return ValidationOutcome::rejected(format!(
                "slot version {} does not satisfy '{}'",
                slot_version, self.version_range
            ));
        }

        let missing: Vec<&str> = self
            .required_capabilities
            .iter()
            .filter(|required| !advertised.capabilities.iter().any(|c| c == *required))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return ValidationOutcome::rejected(format!("missing capabilities: {}", missing.join(", ")));
        }

        ValidationOutcome::accepted()
    }
}
