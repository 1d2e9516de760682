//! Runtime configuration.
//!
//! Reserved property names, hook names and identifier prefixes used by a
//! [`Runtime`](crate::Runtime). Every field has a default, so a partial JSON
//! document is a valid configuration.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// Settings for a runtime.
///
/// # Examples
///
/// ```
/// use host_bridge::RuntimeConfig;
///
/// let config = RuntimeConfig::default().with_inject_hook("attached");
/// assert_eq!(config.inject_hook, "attached");
/// assert_eq!(config.object_handle_property, "____HostObjectHandleID____");
///
/// let parsed = RuntimeConfig::from_json(r#"{ "temp_name_prefix": "TMP" }"#).unwrap();
/// assert_eq!(parsed.temp_name_prefix, "TMP");
/// assert!(parsed.collect_after_sweep);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Property carrying the object handle on bridged script objects
    pub object_handle_property: String,
    /// Property carrying the interceptor context id on bridged script objects
    pub context_handle_property: String,
    /// Script-side function called after a host object is injected
    pub inject_hook: String,
    /// Script-side function called before a host object is extracted
    pub extract_hook: String,
    /// Prefix of generated global names for anonymous injected objects
    pub temp_name_prefix: String,
    /// Prefix of object handle identifiers
    pub object_handle_prefix: String,
    /// Prefix of interceptor context identifiers
    pub context_handle_prefix: String,
    /// Run an engine collection after a sweep that removed entries
    pub collect_after_sweep: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            object_handle_property: "____HostObjectHandleID____".to_string(),
            context_handle_property: "____HostClassInterceptorContextHandleID____".to_string(),
            inject_hook: "onHostInject".to_string(),
            extract_hook: "onHostExtract".to_string(),
            temp_name_prefix: "TEMP".to_string(),
            object_handle_prefix: "OHID".to_string(),
            context_handle_prefix: "CICHID".to_string(),
            collect_after_sweep: true,
        }
    }
}

impl RuntimeConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the object handle property name
    pub fn with_object_handle_property(mut self, name: impl Into<String>) -> Self {
        self.object_handle_property = name.into();
        self
    }

    /// Set the interceptor context property name
    pub fn with_context_handle_property(mut self, name: impl Into<String>) -> Self {
        self.context_handle_property = name.into();
        self
    }

    /// Set the script inject hook name
    pub fn with_inject_hook(mut self, name: impl Into<String>) -> Self {
        self.inject_hook = name.into();
        self
    }

    /// Set the script extract hook name
    pub fn with_extract_hook(mut self, name: impl Into<String>) -> Self {
        self.extract_hook = name.into();
        self
    }

    /// Set the prefix of generated global names
    pub fn with_temp_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_name_prefix = prefix.into();
        self
    }

    /// Enable or disable the engine collection after a sweep
    pub fn with_collect_after_sweep(mut self, enabled: bool) -> Self {
        self.collect_after_sweep = enabled;
        self
    }

    /// Checks the reserved names.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if a reserved property name, prefix or
    /// hook name is empty, or if both reserved property names are equal.
    pub fn validate(&self) -> BridgeResult<()> {
        let required = [
            ("object_handle_property", &self.object_handle_property),
            ("context_handle_property", &self.context_handle_property),
            ("inject_hook", &self.inject_hook),
            ("extract_hook", &self.extract_hook),
            ("temp_name_prefix", &self.temp_name_prefix),
            ("object_handle_prefix", &self.object_handle_prefix),
            ("context_handle_prefix", &self.context_handle_prefix),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(BridgeError::Config(format!("{} must not be empty", field)));
        }
        if self.object_handle_property == self.context_handle_property {
            return Err(BridgeError::Config(
                "object and context handle properties must differ".to_string(),
            ));
        }
        Ok(())
    }
}
