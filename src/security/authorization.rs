use crate::config::AccessControlConfig;
use crate::utils::error::ApiError;
use tracing::warn;

const FULL: &str = "full";
const READ_ONLY: &str = "read_only";
const NONE: &str = "none";

/// Required right for a given operation (§6 access evaluation contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredAccess {
    ReadOnly,
    Full,
}

/// Evaluates (access level, section, required right) -> allowed, per the
/// detailed access table (§6, grounded in access_control_service.py).
pub struct AccessEvaluator {
    config: AccessControlConfig,
}

impl AccessEvaluator {
    pub fn new(config: AccessControlConfig) -> Self {
        Self { config }
    }

    pub fn check_section_access(&self, access_level: &str, section: &str, required: RequiredAccess) -> bool {
        let Some(sections) = self.config.detailed_access_levels.get(access_level) else {
            warn!(access_level, "unknown access level");
            return false;
        };

        let Some(right) = sections.get(section) else {
            if self.config.relax_chat_read_access && required == RequiredAccess::ReadOnly {
                return true;
            }
            warn!(access_level, section, "section not present in access level's detailed table");
            return false;
        };

        match right.as_str() {
            NONE => false,
            FULL => true,
            READ_ONLY => required == RequiredAccess::ReadOnly,
            other => {
                warn!(access_level, section, right = other, "unknown access right");
                false
            }
        }
    }

    /// The coarse section list (§6 `allowed_sections`), used to scope
    /// retrieval fallback passes. Honors `relax_chat_read_access` by
    /// widening to every known section when set.
    pub fn allowed_sections(&self, access_level: &str) -> Vec<String> {
        if self.config.relax_chat_read_access {
            if let Some(detailed) = self.config.detailed_access_levels.get(access_level) {
                return detailed
                    .iter()
                    .filter(|(_, right)| right.as_str() != NONE)
                    .map(|(section, _)| section.clone())
                    .collect();
            }
        }
        self.config.access_levels.get(access_level).cloned().unwrap_or_default()
    }

    pub fn can_upload(&self, access_level: &str, section: &str) -> bool {
        self.check_section_access(access_level, section, RequiredAccess::Full)
    }

    pub fn can_delete(&self, access_level: &str, section: &str) -> bool {
        self.check_section_access(access_level, section, RequiredAccess::Full)
    }

    pub fn require_section_access(
        &self,
        access_level: &str,
        section: &str,
        required: RequiredAccess,
    ) -> Result<(), ApiError> {
        if self.check_section_access(access_level, section, required) {
            Ok(())
        } else {
            Err(ApiError::Forbidden {
                section: section.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> AccessControlConfig {
        let mut detailed = HashMap::new();
        let mut staff_sections = HashMap::new();
        staff_sections.insert("procedures".to_string(), "full".to_string());
        staff_sections.insert("recipes".to_string(), "read_only".to_string());
        staff_sections.insert("payroll".to_string(), "none".to_string());
        detailed.insert("staff".to_string(), staff_sections);

        let mut levels = HashMap::new();
        levels.insert("staff".to_string(), vec!["procedures".to_string(), "recipes".to_string()]);

        AccessControlConfig {
            access_levels: levels,
            detailed_access_levels: detailed,
            relax_chat_read_access: false,
        }
    }

    #[test]
    fn full_access_permits_upload_and_read() {
        let evaluator = AccessEvaluator::new(config());
        assert!(evaluator.can_upload("staff", "procedures"));
        assert!(evaluator.check_section_access("staff", "procedures", RequiredAccess::ReadOnly));
    }

    #[test]
    fn read_only_denies_upload() {
        let evaluator = AccessEvaluator::new(config());
        assert!(!evaluator.can_upload("staff", "recipes"));
        assert!(evaluator.check_section_access("staff", "recipes", RequiredAccess::ReadOnly));
    }

    #[test]
    fn none_denies_everything() {
        let evaluator = AccessEvaluator::new(config());
        assert!(!evaluator.check_section_access("staff", "payroll", RequiredAccess::ReadOnly));
    }

    #[test]
    fn unknown_access_level_denied() {
        let evaluator = AccessEvaluator::new(config());
        assert!(!evaluator.check_section_access("ghost", "procedures", RequiredAccess::ReadOnly));
    }

    #[test]
    fn relax_chat_read_access_widens_unlisted_sections_for_read() {
        let mut cfg = config();
        cfg.relax_chat_read_access = true;
        let evaluator = AccessEvaluator::new(cfg);
        assert!(evaluator.check_section_access("staff", "inventory", RequiredAccess::ReadOnly));
        assert!(!evaluator.check_section_access("staff", "inventory", RequiredAccess::Full));
    }
}
