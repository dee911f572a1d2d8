use serde::{Deserialize, Serialize};

use crate::TimeoutMs;

/// Options forwarded to the probe executor.
///
/// Every field is optional so a per-file value can override the batch-wide one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOptions {
    /// Extra arguments for the underlying inspection tool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_streams: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_format: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_frames: Option<bool>,
    /// Upper bound for a single probe invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<TimeoutMs>,
}

impl ProbeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.custom_args.push(arg.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: TimeoutMs) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Overlay `other` on top of `self`.
    ///
    /// Scalar fields set in `other` win; custom arguments are concatenated, `self` first.
    pub fn merged(&self, other: &ProbeOptions) -> ProbeOptions {
        let mut custom_args = self.custom_args.clone();
        custom_args.extend(other.custom_args.iter().cloned());

        ProbeOptions {
            custom_args,
            show_streams: other.show_streams.or(self.show_streams),
            show_format: other.show_format.or(self.show_format),
            count_frames: other.count_frames.or(self.count_frames),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_other_overrides_base() {
        let base = ProbeOptions {
            custom_args: vec!["-hide_banner".into()],
            show_streams: Some(true),
            show_format: Some(true),
            count_frames: None,
            timeout_ms: Some(10_000),
        };
        let file = ProbeOptions {
            custom_args: vec!["-select_streams".into(), "v:0".into()],
            show_streams: None,
            show_format: Some(false),
            count_frames: Some(true),
            timeout_ms: None,
        };

        let merged = base.merged(&file);
        assert_eq!(merged.custom_args, vec!["-hide_banner", "-select_streams", "v:0"]);
        assert_eq!(merged.show_streams, Some(true));
        assert_eq!(merged.show_format, Some(false));
        assert_eq!(merged.count_frames, Some(true));
        assert_eq!(merged.timeout_ms, Some(10_000));
    }

    #[test]
    fn empty_options_serialize_to_empty_object() {
        let json = serde_json::to_string(&ProbeOptions::new()).unwrap();
        assert_eq!(json, "{}");
    }
}
