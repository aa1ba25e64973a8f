use crate::value::{RawTable, RawValue, ScriptValue};
use modvault_intern::{InternPool, Text};
use serde::{Deserialize, Serialize};

/// A configuration value: the only scalar shapes a mod option may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    String(Text),
}

impl ConfigValue {
    /// Collapse a script value into a configuration value.
    ///
    /// Arrays and tables in a scalar slot become an empty string; null stays
    /// absent.
    pub fn coerce(value: &ScriptValue, pool: &InternPool) -> Option<Self> {
        match value {
            ScriptValue::Null => None,
            ScriptValue::Bool(b) => Some(Self::Bool(*b)),
            ScriptValue::Number(n) => Some(Self::Number(*n)),
            ScriptValue::String(s) => Some(Self::String(s.clone())),
            ScriptValue::Array(_) | ScriptValue::Table(_) => Some(Self::String(pool.intern(""))),
        }
    }
}

/// How a configuration option should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// Unusable: no choices, a single choice with no description, or no
    /// default value.
    Invalid,
    /// A regular selectable option.
    Option,
    /// A section heading rendered from the label.
    Title,
    /// A blank spacer.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationOptionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Text>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover: Option<Text>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Text>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Text>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover: Option<Text>,
    #[serde(default)]
    pub options: Vec<ConfigurationOptionItem>,
}

impl ConfigurationOption {
    /// Classify the option. The rules are checked strictly in order because a
    /// single-choice option is ambiguous between invalid, spacer and heading.
    pub fn kind(&self) -> OptionKind {
        let label_is_blank = self.label.as_deref().is_none_or(|label| label.trim().is_empty());
        match self.options.as_slice() {
            [] | [ConfigurationOptionItem { description: None, .. }] => OptionKind::Invalid,
            _ if self.default.is_none() => OptionKind::Invalid,
            [only] if only.description.as_deref() == Some("") && label_is_blank => OptionKind::Empty,
            [only] if only.description.as_deref() == Some("") => OptionKind::Title,
            _ => OptionKind::Option,
        }
    }

    /// Heading text for [`OptionKind::Title`] options: the label, falling back
    /// to the name.
    pub fn title(&self) -> Option<&str> {
        match self.kind() {
            OptionKind::Title => self.label.as_deref().or(self.name.as_deref()),
            _ => None,
        }
    }
}

fn text(raw: &RawValue, pool: &InternPool) -> Option<Text> {
    ScriptValue::from_raw(raw, pool).to_text(pool)
}

fn value(raw: &RawValue, pool: &InternPool) -> Option<ConfigValue> {
    ConfigValue::coerce(&ScriptValue::from_raw(raw, pool), pool)
}

/// Turn a script's `configuration_options` table into typed options.
///
/// Never fails: entries that aren't tables are skipped, and anything
/// malformed inside an entry degrades to an absent field (which in turn
/// usually makes the option [`OptionKind::Invalid`]).
pub fn classify(table: &RawTable, pool: &InternPool) -> Vec<ConfigurationOption> {
    table
        .values()
        .filter_map(RawValue::as_table)
        .map(|entry| ConfigurationOption {
            name: text(entry.get("name"), pool),
            label: text(entry.get("label"), pool),
            default: value(entry.get("default"), pool),
            hover: text(entry.get("hover"), pool),
            options: entry
                .get("options")
                .as_table()
                .map(|choices| {
                    choices
                        .values()
                        .filter_map(RawValue::as_table)
                        .map(|choice| ConfigurationOptionItem {
                            description: text(choice.get("description"), pool),
                            data: value(choice.get("data"), pool),
                            hover: text(choice.get("hover"), pool),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}
