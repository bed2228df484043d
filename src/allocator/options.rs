/*!
 * Allocator Options
 * Configuration for nodump allocator construction
 */

use crate::core::errors::{AllocatorError, AllocatorResult};
use serde::Deserialize;
use tracing::Dispatch;

/// Label used when none is configured
pub const DEFAULT_LABEL: &str = "nodump";

/// Options for building a nodump allocator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoDumpOptions {
    /// Name attached to every event the allocator logs
    pub label: String,

    /// Sink for the allocator's own events; the global default when unset
    #[serde(skip)]
    pub info_log: Option<Dispatch>,
}

impl Default for NoDumpOptions {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            info_log: None,
        }
    }
}

impl NoDumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `NODUMP_ALLOC_LABEL`
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(label) = std::env::var("NODUMP_ALLOC_LABEL") {
            options.label = label;
        }
        options
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_info_log(mut self, dispatch: Dispatch) -> Self {
        self.info_log = Some(dispatch);
        self
    }

    /// Reject options the factory cannot use
    pub fn validate(&self) -> AllocatorResult<()> {
        if self.label.is_empty() {
            return Err(AllocatorError::InvalidArgument(
                "label must not be empty".into(),
            ));
        }
        if self
            .label
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(AllocatorError::InvalidArgument(format!(
                "label {:?} contains whitespace or control characters",
                self.label
            )));
        }
        Ok(())
    }

    /// Run `f` with the configured sink as the default subscriber
    pub(crate) fn log<F: FnOnce()>(&self, f: F) {
        match &self.info_log {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_defaults_are_valid() {
        let options = NoDumpOptions::default();
        assert_eq!(options.label, DEFAULT_LABEL);
        assert!(options.info_log.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_labels() {
        for label in ["", "block cache", "tab\tbed", "nul\0"] {
            let err = NoDumpOptions::new().with_label(label).validate().unwrap_err();
            assert!(matches!(err, AllocatorError::InvalidArgument(_)), "{:?}", label);
        }
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let options: NoDumpOptions = serde_json::from_str(r#"{"label": "row-cache"}"#).unwrap();
        assert_eq!(options.label, "row-cache");

        let options: NoDumpOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.label, DEFAULT_LABEL);
    }

    #[test]
    fn test_log_runs_closure_with_and_without_sink() {
        let ran = AtomicBool::new(false);
        NoDumpOptions::new().log(|| ran.store(true, Ordering::Relaxed));
        assert!(ran.load(Ordering::Relaxed));

        let ran = AtomicBool::new(false);
        NoDumpOptions::new()
            .with_info_log(Dispatch::none())
            .log(|| ran.store(true, Ordering::Relaxed));
        assert!(ran.load(Ordering::Relaxed));
    }
}
