use crate::error::{ErrorKind, Result};
use crate::option::{ConfigurationOption, classify};
use crate::value::{RawTable, RawValue, ScriptValue};
use modvault_intern::{InternPool, Text};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Globals injected into the script's isolated environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptGlobals {
    /// The directory name the game would install the artifact under.
    pub folder_name: String,
    pub locale: String,
}

impl ScriptGlobals {
    pub fn for_artifact(id: u64, locale: impl Into<String>) -> Self {
        Self { folder_name: format!("workshop-{id}"), locale: locale.into() }
    }
}

/// Runs an untrusted declarative script and reports the globals it defined.
///
/// Implementations must not include the injected [`ScriptGlobals`] (or any
/// other pre-existing globals) in the returned table, and should raise
/// [`ErrorKind::Evaluation`] for anything that prevents the script from
/// running to completion.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, source: &str, globals: &ScriptGlobals) -> Result<RawTable>;
}

/// Adapts a closure into a [`ScriptEvaluator`].
pub struct FnEvaluator<F>(pub F);

impl<F> ScriptEvaluator for FnEvaluator<F>
where
    F: Fn(&str, &ScriptGlobals) -> Result<RawTable> + Send + Sync,
{
    fn evaluate(&self, source: &str, globals: &ScriptGlobals) -> Result<RawTable> {
        (self.0)(source, globals)
    }
}

/// Metadata derived from an artifact's info script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Text>,
    pub name: Text,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Text>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Text>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version_dst: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_options: Option<Vec<ConfigurationOption>>,
}

fn api_version(raw: &RawValue, field: &'static str) -> Result<Option<i32>> {
    match raw {
        RawValue::Nil => Ok(None),
        // Truncation, matching an integer cast of a script number.
        RawValue::Number(n) => Ok(Some(*n as i32)),
        _ => exn::bail!(ErrorKind::MalformedField(field)),
    }
}

/// Pull the fields modvault cares about out of an evaluated info script.
///
/// `author` must be a string when present and `name` must be present; the
/// API versions must be numbers when present. Everything else degrades
/// silently: a table where a description should be reads as empty text, and a
/// non-table `configuration_options` is treated as absent.
pub fn extract_metadata(table: &RawTable, pool: &InternPool) -> Result<ScriptMetadata> {
    let author = match table.get("author") {
        RawValue::Nil => None,
        RawValue::String(s) => Some(pool.intern(s)),
        _ => exn::bail!(ErrorKind::MalformedField("author")),
    };
    let text = |key: &str| ScriptValue::from_raw(table.get(key), pool).to_text(pool);
    let Some(name) = text("name") else {
        exn::bail!(ErrorKind::MalformedField("name"));
    };
    Ok(ScriptMetadata {
        author,
        name,
        description: text("description"),
        version: text("version"),
        api_version: api_version(table.get("api_version"), "api_version")?,
        api_version_dst: api_version(table.get("api_version_dst"), "api_version_dst")?,
        configuration_options: table.get("configuration_options").as_table().map(|options| classify(options, pool)),
    })
}

/// Derives [`ScriptMetadata`] from script source, absorbing every failure.
#[derive(Clone)]
pub struct Normalizer {
    evaluator: Arc<dyn ScriptEvaluator>,
    pool: Arc<InternPool>,
    locale: String,
}

impl Normalizer {
    pub fn new(evaluator: Arc<dyn ScriptEvaluator>, pool: Arc<InternPool>, locale: impl Into<String>) -> Self {
        Self { evaluator, pool, locale: locale.into() }
    }

    pub fn pool(&self) -> &Arc<InternPool> {
        &self.pool
    }

    /// Evaluate and normalize, reporting why it failed.
    pub fn try_derive(&self, source: &str, id: u64) -> Result<ScriptMetadata> {
        if source.is_empty() {
            exn::bail!(ErrorKind::EmptyScript);
        }
        let globals = ScriptGlobals::for_artifact(id, &self.locale);
        let table = self.evaluator.evaluate(source, &globals)?;
        extract_metadata(&table, &self.pool)
    }

    /// Evaluate and normalize. A script that can't be evaluated, or that
    /// evaluates to something unusable, yields `None`.
    #[tracing::instrument(level = "debug", skip(self, source))]
    pub fn derive(&self, source: &str, id: u64) -> Option<ScriptMetadata> {
        match self.try_derive(source, id) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::debug!(id, error = ?e, "Script metadata unavailable");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::OptionKind;
    use rstest::rstest;
    use std::sync::Mutex;

    fn normalizer(table: RawTable) -> Normalizer {
        let evaluator = FnEvaluator(move |_: &str, _: &ScriptGlobals| -> Result<RawTable> { Ok(table.clone()) });
        Normalizer::new(Arc::new(evaluator), Arc::new(InternPool::default()), "zh")
    }

    fn info_script() -> RawTable {
        RawTable::new()
            .with("author", "klei")
            .with("name", "Geometric Placement")
            .with("description", "Snap to grid")
            .with("version", 2.5)
            .with("api_version", 10)
            .with("api_version_dst", 10.9)
            .with(
                "configuration_options",
                RawTable::sequence([RawTable::new()
                    .with("name", "grid")
                    .with("label", "Grid")
                    .with("default", true)
                    .with(
                        "options",
                        RawTable::sequence([
                            RawTable::new().with("description", "On").with("data", true),
                            RawTable::new().with("description", "Off").with("data", false),
                        ]),
                    )]),
            )
    }

    #[test]
    fn test_derive_full_metadata() {
        let metadata = normalizer(info_script()).derive("-- script", 351325790).unwrap();
        assert_eq!(metadata.author.as_deref(), Some("klei"));
        assert_eq!(&*metadata.name, "Geometric Placement");
        assert_eq!(metadata.version.as_deref(), Some("2.5"));
        assert_eq!(metadata.api_version, Some(10));
        assert_eq!(metadata.api_version_dst, Some(10));
        let options = metadata.configuration_options.unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].kind(), OptionKind::Option);
    }

    #[test]
    fn test_globals_passed_to_evaluator() {
        let seen = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let evaluator = FnEvaluator(move |_: &str, globals: &ScriptGlobals| -> Result<RawTable> {
            *captured.lock().unwrap() = Some(globals.clone());
            Ok(RawTable::new().with("name", "x"))
        });
        let normalizer = Normalizer::new(Arc::new(evaluator), Arc::new(InternPool::default()), "zh");
        normalizer.derive("name = 'x'", 42).unwrap();
        let globals = seen.lock().unwrap().clone().unwrap();
        assert_eq!(globals.folder_name, "workshop-42");
        assert_eq!(globals.locale, "zh");
    }

    #[test]
    fn test_description_table_is_empty() {
        let table = info_script().with("description", RawTable::new().with("en", "x"));
        let metadata = normalizer(table).derive("-- script", 1).unwrap();
        assert_eq!(metadata.description.as_deref(), Some(""));
    }

    #[rstest]
    #[case::numeric_author(info_script().with("author", 5))]
    #[case::missing_name(info_script().with("name", RawValue::Nil))]
    #[case::string_api_version(info_script().with("api_version", "10"))]
    fn test_malformed_scripts_yield_none(#[case] table: RawTable) {
        assert!(normalizer(table).derive("-- script", 1).is_none());
    }

    #[test]
    fn test_evaluation_failure_yields_none() {
        let evaluator = FnEvaluator(|_: &str, _: &ScriptGlobals| -> Result<RawTable> {
            exn::bail!(ErrorKind::Evaluation)
        });
        let normalizer = Normalizer::new(Arc::new(evaluator), Arc::new(InternPool::default()), "zh");
        assert!(normalizer.derive("error('boom')", 1).is_none());
        let err = normalizer.try_derive("error('boom')", 1).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Evaluation));
    }

    #[test]
    fn test_empty_script_never_evaluated() {
        let evaluator = FnEvaluator(|_: &str, _: &ScriptGlobals| -> Result<RawTable> {
            panic!("empty scripts must not reach the evaluator")
        });
        let normalizer = Normalizer::new(Arc::new(evaluator), Arc::new(InternPool::default()), "zh");
        let err = normalizer.try_derive("", 1).unwrap_err();
        assert!(matches!(&*err, ErrorKind::EmptyScript));
    }

    #[test]
    fn test_non_table_options_ignored() {
        let table = info_script().with("configuration_options", "nope");
        let metadata = normalizer(table).derive("-- script", 1).unwrap();
        assert!(metadata.configuration_options.is_none());
    }

    #[test]
    fn test_metadata_serde() {
        let metadata = normalizer(info_script()).derive("-- script", 1).unwrap();
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["apiVersionDst"], 10);
        let back: ScriptMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }
}
