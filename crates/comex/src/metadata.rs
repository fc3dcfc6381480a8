//! The `experiment_meta.json` document and the source-comment conventions
//! that enrich it.
//!
//! Parameters and hooks are described in comments of the defining file:
//!
//! ```text
//! // :param NUM_EPOCHS:
//! //     Number of passes over the training data.
//! // :hook after_epoch:
//! //     Called with the epoch index after every pass.
//! ```

use std::collections::BTreeMap;

use comex_core::ParamValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Width limit of the short description.
pub const SHORT_DESCRIPTION_WIDTH: usize = 600;

/// Lifecycle status persisted in the metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The body has started and no finalize has run.
    Running,
    /// Finalize completed.
    Done,
}

/// Metadata describing one parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Type name of the value.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// From a `:param` comment or the special parameter table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Exported value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// False when `value` is only a debug rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usable: Option<bool>,
}

/// Metadata describing one hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookInfo {
    /// Hook name.
    pub name: String,
    /// Callbacks bound at finalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<usize>,
    /// From a `:hook` comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Contents of `experiment_meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    /// `None` until the archive exists.
    pub status: Option<RunStatus>,
    /// Unix seconds.
    pub start_time: Option<f64>,
    /// Unix seconds.
    pub end_time: Option<f64>,
    /// Seconds between start and end.
    pub duration: Option<f64>,
    /// Whether the body failed.
    #[serde(default)]
    pub has_error: bool,
    /// Type name of the failure.
    #[serde(default)]
    pub error_type: Option<String>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Experiment name.
    #[serde(default)]
    pub name: String,
    /// Base path the archive was created under.
    pub base_path: String,
    /// Namespace below the base path.
    pub namespace: String,
    /// Module doc, unless a config file replaces it.
    #[serde(default)]
    pub description: String,
    /// First paragraph of `description`, truncated.
    #[serde(default)]
    pub short_description: String,
    /// Every parameter by name.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterInfo>,
    /// Every bound hook by name.
    #[serde(default)]
    pub hooks: BTreeMap<String, HookInfo>,
    /// Names of tracked series.
    #[serde(rename = "__track__", default)]
    pub tracked: Vec<String>,
    /// Source paths of parents and mixins.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Included mixin names.
    #[serde(default)]
    pub mixins: Vec<String>,
    /// Archive file name of every copied dependency source, mapped to its original path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, String>,
    /// Keys written by plugins or newer versions are kept on round trips.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExperimentMetadata {
    /// Metadata with the special parameters filled in and no status yet.
    pub fn new(base_path: impl Into<String>, namespace: impl Into<String>) -> Self {
        let parameters = SPECIAL_PARAMETERS
            .iter()
            .map(|special| {
                (
                    special.name.to_string(),
                    ParameterInfo {
                        name: Some(special.name.to_string()),
                        kind: Some(special.kind.to_string()),
                        description: Some(special.description.to_string()),
                        ..ParameterInfo::default()
                    },
                )
            })
            .collect();
        Self {
            status: None,
            start_time: None,
            end_time: None,
            duration: None,
            has_error: false,
            error_type: None,
            error_message: None,
            name: String::new(),
            base_path: base_path.into(),
            namespace: namespace.into(),
            description: String::new(),
            short_description: String::new(),
            parameters,
            hooks: BTreeMap::new(),
            tracked: Vec::new(),
            dependencies: Vec::new(),
            mixins: Vec::new(),
            sources: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Stores the exported parameter values, flagging values that cannot be restored.
    pub fn record_values<'a>(&mut self, values: impl IntoIterator<Item = (&'a str, &'a ParamValue)>) {
        for (name, value) in values {
            let (exported, usable) = value.export();
            let info = self.parameters.entry(name.to_string()).or_default();
            info.name.get_or_insert_with(|| name.to_string());
            info.value = Some(exported);
            info.usable = Some(usable);
        }
    }
}

/// A framework-level parameter present in every experiment.
#[derive(Debug, Clone, Copy)]
pub struct SpecialParameter {
    /// Parameter name.
    pub name: &'static str,
    /// Type name.
    pub kind: &'static str,
    /// What it controls.
    pub description: &'static str,
}

/// Special parameters, in the order they are documented.
pub const SPECIAL_PARAMETERS: &[SpecialParameter] = &[
    SpecialParameter {
        name: "__DEBUG__",
        kind: "bool",
        description: "Flag to enable debug mode. The archive folder is called \"debug\" and is \
                      overwritten whenever the experiment is started again with the same namespace.",
    },
    SpecialParameter {
        name: "__TESTING__",
        kind: "bool",
        description: "Flag to enable testing mode. The registered testing routine shrinks the run to \
                      a minimal smoke test of every component.",
    },
    SpecialParameter {
        name: "__REPRODUCIBLE__",
        kind: "bool",
        description: "Flag to enable reproducible mode. A snapshot of every source file and its digest \
                      is stored in the archive when the experiment ends.",
    },
    SpecialParameter {
        name: "__PREFIX__",
        kind: "str",
        description: "String prepended to generated archive names to tell apart runs of the same \
                      experiment.",
    },
    SpecialParameter {
        name: "__CACHING__",
        kind: "bool",
        description: "Flag to enable or disable loading cached results. New results are still cached.",
    },
];

/// Default values installed before parameter discovery.
pub fn special_defaults() -> Vec<(&'static str, ParamValue)> {
    vec![
        ("__DEBUG__", ParamValue::from(false)),
        ("__TESTING__", ParamValue::from(false)),
        ("__REPRODUCIBLE__", ParamValue::from(false)),
        ("__PREFIX__", ParamValue::from("")),
        ("__CACHING__", ParamValue::from(true)),
    ]
}

/// Text of every comment line in `source`, comment markers removed.
///
/// Both `//` style (Rust sources) and `#` style (YAML configs) are recognized.
pub fn comment_text(source: &str) -> String {
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("//") {
            let rest = rest.trim_start_matches('/');
            lines.push(rest.strip_prefix('!').unwrap_or(rest));
        } else if let Some(rest) = trimmed.strip_prefix('#') {
            lines.push(rest);
        }
    }
    lines.join("\n")
}

/// Extracts `:{tag} NAME:` blocks followed by indented continuation lines.
///
/// Continuation lines are indented by a tab or at least four spaces; they are
/// left-trimmed and joined with single spaces.
pub fn parse_tagged_info(comments: &str, tag: &str) -> BTreeMap<String, String> {
    let marker = format!(":{tag}");
    let mut result = BTreeMap::new();
    let lines: Vec<&str> = comments.lines().collect();
    let mut index = 0;
    while index < lines.len() {
        let line = lines[index].trim();
        index += 1;
        let Some(rest) = line.strip_prefix(&marker) else {
            continue;
        };
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let Some(name) = rest.trim_start().strip_suffix(':') else {
            continue;
        };
        if name.is_empty() || !name.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
            continue;
        }
        let mut parts = Vec::new();
        while index < lines.len() && is_continuation(lines[index]) {
            parts.push(lines[index].trim());
            index += 1;
        }
        result.insert(name.to_string(), parts.join(" "));
    }
    result
}

fn is_continuation(line: &str) -> bool {
    line.starts_with('\t') || line.starts_with("    ")
}

/// First paragraph of `doc`, whitespace collapsed and shortened to `width`.
pub fn short_description(doc: &str, width: usize) -> String {
    let paragraph = doc.trim_start().split("\n\n").next().unwrap_or_default();
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    const PLACEHOLDER: &str = " [...]";
    let budget = width.saturating_sub(PLACEHOLDER.len());
    let mut shortened = String::new();
    for word in words {
        let needed = if shortened.is_empty() { word.len() } else { word.len() + 1 };
        if shortened.chars().count() + needed > budget {
            break;
        }
        if !shortened.is_empty() {
            shortened.push(' ');
        }
        shortened.push_str(word);
    }
    shortened.push_str(PLACEHOLDER);
    shortened.trim_start().to_string()
}
