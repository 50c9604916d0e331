//! # Metadata Provider
//!
//! Supplies [`ParameterMetadata`] for parameter names from a TOML
//! definitions document.
//!
//! ## Loading Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Metadata Loading                                   │
//! │                                                                         │
//! │  First lookup ──► parse definitions (exactly once per provider)        │
//! │                                                                         │
//! │  Document-level failures → provider has NO entries (logged)            │
//! │  ├── unreadable file / malformed TOML                                  │
//! │  ├── missing version stamp, or version <= 2                            │
//! │  └── unknown parameter type                                            │
//! │                                                                         │
//! │  Attribute-level failures → attribute skipped (logged)                 │
//! │  └── bad default / min / max / decimal / enum value                    │
//! │                                                                         │
//! │  Name defined twice → entry replaced with generic metadata             │
//! │                                                                         │
//! │  Unknown name on lookup → generic metadata (is_generic = true)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Definitions Format
//! ```toml
//! version = 3
//!
//! [[group]]
//! name = "Mission"
//!
//! [[group.parameter]]
//! name = "MIS_TAKEOFF_ALT"
//! type = "FLOAT"
//! default = "2.5"
//! min = "0"
//! max = "80"
//! decimal = "1"
//! unit = "m"
//! short_desc = "Take-off altitude"
//! values = { "0" = "Disabled" }
//! ```

use once_cell::sync::{Lazy, OnceCell};
use serde::Deserialize;
use skyparam_core::{EnumValue, ParamType, ParamValue, ParameterMetadata};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ParamError, ParamResult};

/// Oldest definitions version that can be read.
pub const MIN_METADATA_VERSION: u32 = 3;

// =============================================================================
// Definitions Document
// =============================================================================

#[derive(Debug, Deserialize)]
struct DefinitionsFile {
    version: Option<u32>,
    #[serde(default, rename = "group")]
    groups: Vec<GroupDef>,
}

#[derive(Debug, Deserialize)]
struct GroupDef {
    name: String,
    #[serde(default, rename = "parameter")]
    parameters: Vec<ParameterDef>,
}

#[derive(Debug, Deserialize)]
struct ParameterDef {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    default: Option<String>,
    min: Option<String>,
    max: Option<String>,
    decimal: Option<String>,
    #[serde(default)]
    reboot_required: bool,
    unit: Option<String>,
    short_desc: Option<String>,
    long_desc: Option<String>,
    #[serde(default)]
    values: BTreeMap<String, String>,
}

// =============================================================================
// Provider
// =============================================================================

#[derive(Debug, Clone)]
enum MetadataSource {
    Empty,
    File(PathBuf),
    Inline(String),
}

/// Name-indexed metadata, loaded lazily on first use.
#[derive(Debug)]
pub struct MetadataProvider {
    source: MetadataSource,
    entries: OnceCell<HashMap<String, Arc<ParameterMetadata>>>,
}

impl MetadataProvider {
    /// A provider with no definitions. Every lookup is generic.
    pub fn empty() -> Self {
        Self::with_source(MetadataSource::Empty)
    }

    /// Reads definitions from a file on first lookup.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::with_source(MetadataSource::File(path.into()))
    }

    /// Parses definitions from an in-memory document on first lookup.
    pub fn from_toml_str(document: impl Into<String>) -> Self {
        Self::with_source(MetadataSource::Inline(document.into()))
    }

    fn with_source(source: MetadataSource) -> Self {
        Self {
            source,
            entries: OnceCell::new(),
        }
    }

    /// Returns metadata for `name`, or generic metadata of `observed` type.
    ///
    /// A definition whose type disagrees with what the vehicle reports is
    /// not used; validating against it would reject every write.
    pub fn lookup(&self, name: &str, observed: ParamType) -> Arc<ParameterMetadata> {
        match self.entries().get(name) {
            Some(meta) if meta.param_type == observed => meta.clone(),
            Some(meta) => {
                warn!(
                    name,
                    defined = %meta.param_type,
                    reported = %observed,
                    "Metadata type disagrees with vehicle, using generic metadata"
                );
                Arc::new(ParameterMetadata::generic(name, observed))
            }
            None => Arc::new(ParameterMetadata::generic(name, observed)),
        }
    }

    /// Returns true if `name` has a (non-generic) definition.
    pub fn contains(&self, name: &str) -> bool {
        self.entries()
            .get(name)
            .map(|m| !m.is_generic)
            .unwrap_or(false)
    }

    /// Number of loaded entries (including duplicate-name placeholders).
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// True once the definitions have been read.
    pub fn is_loaded(&self) -> bool {
        self.entries.get().is_some()
    }

    fn entries(&self) -> &HashMap<String, Arc<ParameterMetadata>> {
        self.entries.get_or_init(|| match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Parameter metadata unavailable, using generic metadata");
                HashMap::new()
            }
        })
    }

    fn load(&self) -> ParamResult<HashMap<String, Arc<ParameterMetadata>>> {
        let document = match &self.source {
            MetadataSource::Empty => return Ok(HashMap::new()),
            MetadataSource::File(path) => {
                debug!(?path, "Loading parameter metadata");
                std::fs::read_to_string(path)
                    .map_err(|e| ParamError::MetadataLoadFailed(format!("{}: {}", path.display(), e)))?
            }
            MetadataSource::Inline(doc) => doc.clone(),
        };
        parse_definitions(&document)
    }
}

fn parse_definitions(document: &str) -> ParamResult<HashMap<String, Arc<ParameterMetadata>>> {
    let file: DefinitionsFile = toml::from_str(document)
        .map_err(|e| ParamError::MetadataLoadFailed(format!("badly formed definitions: {}", e)))?;

    let version = file
        .version
        .ok_or_else(|| ParamError::MetadataLoadFailed("version stamp not found".into()))?;
    if version < MIN_METADATA_VERSION {
        return Err(ParamError::MetadataLoadFailed(format!(
            "version stamp too old: found {}, want {}",
            version, MIN_METADATA_VERSION
        )));
    }

    let mut entries: HashMap<String, Arc<ParameterMetadata>> = HashMap::new();
    let mut duplicates: HashSet<String> = HashSet::new();

    for group in &file.groups {
        debug!(group = %group.name, "Found metadata group");
        for def in &group.parameters {
            let ty: ParamType = def.type_name.parse().map_err(|_| {
                ParamError::MetadataLoadFailed(format!(
                    "bad type '{}' for parameter {}",
                    def.type_name, def.name
                ))
            })?;

            if entries.contains_key(&def.name) || duplicates.contains(&def.name) {
                warn!(name = %def.name, "Duplicate parameter definition, metadata not trusted");
                duplicates.insert(def.name.clone());
                entries.insert(
                    def.name.clone(),
                    Arc::new(ParameterMetadata::generic(&def.name, ty)),
                );
                continue;
            }

            entries.insert(def.name.clone(), Arc::new(build_metadata(&group.name, def, ty)));
        }
    }

    info!(entries = entries.len(), version, "Parameter metadata loaded");
    Ok(entries)
}

fn build_metadata(group: &str, def: &ParameterDef, ty: ParamType) -> ParameterMetadata {
    let convert = |attr: &str, text: &Option<String>| -> Option<ParamValue> {
        let text = text.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        match ParamValue::parse(ty, text) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(name = %def.name, attr, value = text, error = %e, "Invalid metadata value, skipped");
                None
            }
        }
    };

    let mut meta = ParameterMetadata::generic(&def.name, ty);
    meta.is_generic = false;
    meta.group = group.to_string();
    meta.min = convert("min", &def.min);
    meta.max = convert("max", &def.max);
    meta.default = convert("default", &def.default);
    meta.reboot_required = def.reboot_required;
    meta.units = def.unit.clone();
    meta.short_description = def.short_desc.as_ref().map(|s| s.replace('\n', " "));
    meta.long_description = def.long_desc.as_ref().map(|s| s.replace('\n', " "));

    if let Some(text) = &def.decimal {
        match text.trim().parse::<u8>() {
            Ok(places) => meta.decimal_places = Some(places),
            Err(_) => warn!(name = %def.name, decimal = %text, "Invalid decimal places, skipped"),
        }
    }

    for (code, label) in &def.values {
        match ParamValue::parse(ty, code) {
            Ok(value) => meta.enum_values.push(EnumValue {
                value,
                label: label.clone(),
            }),
            Err(e) => debug!(name = %def.name, code = %code, error = %e, "Invalid enum value, skipped"),
        }
    }

    // Keep the default but flag it when it contradicts the range.
    if let Some(default) = meta.default {
        if let Err(e) = meta.validate(default) {
            warn!(name = %def.name, error = %e, "Default value outside metadata range");
        }
    }

    meta
}

// =============================================================================
// Process-wide Provider
// =============================================================================

static GLOBAL: Lazy<RwLock<Option<Arc<MetadataProvider>>>> = Lazy::new(|| RwLock::new(None));

/// Installs the process-wide provider. Returns false if one is already set.
pub fn install_global(provider: Arc<MetadataProvider>) -> bool {
    let Ok(mut slot) = GLOBAL.write() else {
        return false;
    };
    if slot.is_some() {
        return false;
    }
    *slot = Some(provider);
    true
}

/// Returns the process-wide provider, installing an empty one if unset.
pub fn global() -> Arc<MetadataProvider> {
    if let Ok(slot) = GLOBAL.read() {
        if let Some(provider) = slot.as_ref() {
            return provider.clone();
        }
    }
    match GLOBAL.write() {
        Ok(mut slot) => slot
            .get_or_insert_with(|| Arc::new(MetadataProvider::empty()))
            .clone(),
        Err(_) => Arc::new(MetadataProvider::empty()),
    }
}

/// Drops the process-wide provider so the next [`global`] starts fresh.
pub fn reset_global() {
    if let Ok(mut slot) = GLOBAL.write() {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFS: &str = r#"
        version = 3

        [[group]]
        name = "Mission"

        [[group.parameter]]
        name = "MIS_TAKEOFF_ALT"
        type = "FLOAT"
        default = "2.5"
        min = "0"
        max = "80"
        decimal = "1"
        unit = "m"
        short_desc = "Take-off\naltitude"

        [[group.parameter]]
        name = "MIS_MODE"
        type = "INT32"
        min = "zero"
        values = { "0" = "Off", "1" = "On", "x" = "Broken" }

        [[group]]
        name = "System"

        [[group.parameter]]
        name = "SYS_AUTOSTART"
        type = "INT32"

        [[group.parameter]]
        name = "MIS_TAKEOFF_ALT"
        type = "FLOAT"
    "#;

    #[test]
    fn test_lookup_known_parameter() {
        let provider = MetadataProvider::from_toml_str(DEFS);
        assert!(!provider.is_loaded());

        let meta = provider.lookup("SYS_AUTOSTART", ParamType::Int32);
        assert!(provider.is_loaded());
        assert!(!meta.is_generic);
        assert_eq!(meta.group, "System");
    }

    #[test]
    fn test_duplicate_name_becomes_generic() {
        let provider = MetadataProvider::from_toml_str(DEFS);
        let meta = provider.lookup("MIS_TAKEOFF_ALT", ParamType::Float);
        assert!(meta.is_generic);
        assert_eq!(meta.max, None);
        assert!(!provider.contains("MIS_TAKEOFF_ALT"));
    }

    #[test]
    fn test_invalid_attributes_are_skipped() {
        let provider = MetadataProvider::from_toml_str(DEFS);
        let meta = provider.lookup("MIS_MODE", ParamType::Int32);
        assert!(!meta.is_generic);
        assert_eq!(meta.min, None);
        assert_eq!(meta.enum_values.len(), 2);
        assert_eq!(meta.enum_label(&ParamValue::Int32(1)), Some("On"));
    }

    #[test]
    fn test_unknown_name_is_generic() {
        let provider = MetadataProvider::from_toml_str(DEFS);
        let meta = provider.lookup("NOT_DEFINED", ParamType::Uint8);
        assert!(meta.is_generic);
        assert_eq!(meta.param_type, ParamType::Uint8);
        assert_eq!(meta.group, skyparam_core::DEFAULT_GROUP);
    }

    #[test]
    fn test_type_mismatch_falls_back_to_generic() {
        let provider = MetadataProvider::from_toml_str(DEFS);
        let meta = provider.lookup("SYS_AUTOSTART", ParamType::Float);
        assert!(meta.is_generic);
    }

    #[test]
    fn test_old_version_loads_nothing() {
        let provider = MetadataProvider::from_toml_str(
            "version = 2\n[[group]]\nname = \"A\"\n[[group.parameter]]\nname = \"X\"\ntype = \"INT32\"\n",
        );
        assert!(provider.is_empty());
        assert!(provider.lookup("X", ParamType::Int32).is_generic);
    }

    #[test]
    fn test_missing_version_loads_nothing() {
        let provider = MetadataProvider::from_toml_str("[[group]]\nname = \"A\"\n");
        assert!(provider.is_empty());
    }

    #[test]
    fn test_unknown_type_loads_nothing() {
        let provider = MetadataProvider::from_toml_str(
            "version = 3\n[[group]]\nname = \"A\"\n[[group.parameter]]\nname = \"X\"\ntype = \"INT64\"\n",
        );
        assert!(provider.is_empty());
    }

    #[test]
    fn test_malformed_document_loads_nothing() {
        let provider = MetadataProvider::from_toml_str("version = [");
        assert!(provider.is_empty());
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let provider = MetadataProvider::from_path("/nonexistent/skyparam/defs.toml");
        assert!(provider.is_empty());
    }

    #[test]
    fn test_global_install_and_reset() {
        reset_global();
        assert!(global().is_empty());

        // global() installed an empty provider, so this one is refused
        assert!(!install_global(Arc::new(MetadataProvider::from_toml_str(DEFS))));

        reset_global();
        assert!(install_global(Arc::new(MetadataProvider::from_toml_str(DEFS))));
        assert!(global().contains("SYS_AUTOSTART"));
        reset_global();
    }
}
