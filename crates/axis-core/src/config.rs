use crate::error::{AxisError, Result};
use crate::hardware::{self, HardwareConfig, NetworkSettings};
use crate::paths;
use crate::types::{Axis, AxisGroup, LayerSource, Sense, Unit, DEFAULT_VAL2PULSE};
use crate::units;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            axis: None,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            axis: None,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Layer documents
// ---------------------------------------------------------------------------

/// One axis line in a layer file. Everything but the name is optional; unset
/// fields fall through to lower-precedence layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEntry {
    #[serde(alias = "axis_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val2pulse: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sense: Option<Sense>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
}

impl AxisEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display: None,
            val2pulse: None,
            sense: None,
            unit: None,
        }
    }
}

/// On-disk shape of a layer file: group name → ordered axis entries.
pub type LayerDocument = BTreeMap<String, Vec<AxisEntry>>;

/// Group holding every axis of the hardware-derived layer.
pub const ALL_GROUP: &str = "all";

#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: LayerSource,
    pub path: Option<PathBuf>,
    pub groups: LayerDocument,
}

impl ConfigLayer {
    pub fn empty(source: LayerSource) -> Self {
        Self {
            source,
            path: None,
            groups: LayerDocument::new(),
        }
    }

    /// Hardware-derived layer: a single `all` group carrying every axis with
    /// its full parameter set.
    pub fn from_hardware(hw: &HardwareConfig, path: Option<PathBuf>) -> Self {
        let entries = hw
            .axes
            .iter()
            .map(|a| AxisEntry {
                name: a.name.clone(),
                display: a.display.clone(),
                val2pulse: Some(a.val2pulse),
                sense: Some(a.sense),
                unit: Some(a.unit),
            })
            .collect::<Vec<_>>();
        let mut groups = LayerDocument::new();
        if !entries.is_empty() {
            groups.insert(ALL_GROUP.to_string(), entries);
        }
        Self {
            source: LayerSource::Hardware,
            path,
            groups,
        }
    }
}

fn parse_document(raw: &str) -> std::result::Result<LayerDocument, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(LayerDocument::new());
    }
    let doc: Option<LayerDocument> = serde_yaml::from_str(raw)?;
    Ok(doc.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Sources / LoadedConfig
// ---------------------------------------------------------------------------

/// Where each layer lives on disk.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub defaults: PathBuf,
    pub hardware: Option<PathBuf>,
    pub favorites: PathBuf,
}

impl ConfigSources {
    pub fn in_root(root: &Path, hardware: Option<PathBuf>) -> Self {
        Self {
            defaults: paths::defaults_path(root),
            hardware,
            favorites: paths::favorites_path(root),
        }
    }
}

#[derive(Debug)]
pub struct LoadedConfig {
    /// Always three layers, in ascending precedence.
    pub layers: Vec<ConfigLayer>,
    pub network: NetworkSettings,
    pub warnings: Vec<ConfigWarning>,
}

// ---------------------------------------------------------------------------
// MergedConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MergedConfig {
    pub groups: BTreeMap<String, AxisGroup>,
    /// Every axis referenced by any group, with resolved parameters.
    pub axes: BTreeMap<String, Axis>,
    pub network: NetworkSettings,
    pub warnings: Vec<ConfigWarning>,
}

impl MergedConfig {
    pub fn group(&self, name: &str) -> Result<&AxisGroup> {
        self.groups
            .get(name)
            .ok_or_else(|| AxisError::UnknownGroup(name.to_string()))
    }

    pub fn axis(&self, name: &str) -> Result<&Axis> {
        self.axes
            .get(name)
            .ok_or_else(|| AxisError::UnknownAxis(name.to_string()))
    }
}

#[derive(Default)]
struct ParamOverlay {
    display: Option<String>,
    val2pulse: Option<f64>,
    sense: Option<Sense>,
    unit: Option<Unit>,
}

/// Merge layers by group name and resolve per-axis parameters.
///
/// Groups: a later layer's group replaces an earlier one of the same name
/// outright (defaults < hardware < favorites). Axis parameters resolve per
/// field with the same precedence; within one layer the first entry for an
/// axis wins.
pub fn merge(layers: &[ConfigLayer]) -> MergedConfig {
    let mut ordered: Vec<&ConfigLayer> = layers.iter().collect();
    ordered.sort_by_key(|l| l.source);

    let mut merged = MergedConfig::default();
    let mut params: BTreeMap<String, ParamOverlay> = BTreeMap::new();

    for layer in ordered {
        let mut seen_in_layer: BTreeMap<&str, &AxisEntry> = BTreeMap::new();
        for (group_name, entries) in &layer.groups {
            let mut names = Vec::with_capacity(entries.len());
            for entry in entries {
                if entry.name.trim().is_empty() {
                    merged.warnings.push(ConfigWarning::warning(format!(
                        "{} layer: empty axis name in group '{group_name}' ignored",
                        layer.source
                    )));
                    continue;
                }
                if !names.contains(&entry.name) {
                    names.push(entry.name.clone());
                }
                if let Some(first) = seen_in_layer.get(entry.name.as_str()) {
                    if !same_params(first, entry) {
                        merged.warnings.push(ConfigWarning {
                            level: WarnLevel::Warning,
                            axis: Some(entry.name.clone()),
                            message: format!(
                                "{} layer: conflicting parameters in group '{group_name}', first entry kept",
                                layer.source
                            ),
                        });
                    }
                    continue;
                }
                seen_in_layer.insert(entry.name.as_str(), entry);
                overlay(
                    params.entry(entry.name.clone()).or_default(),
                    entry,
                    layer.source,
                    &mut merged.warnings,
                );
            }
            merged.groups.insert(
                group_name.clone(),
                AxisGroup {
                    name: group_name.clone(),
                    axes: names,
                    source: layer.source,
                },
            );
        }
    }

    // Only axes of surviving groups; a replaced group's members drop out
    // unless another group still lists them.
    let members: BTreeSet<&str> = merged
        .groups
        .values()
        .flat_map(|g| g.axes.iter().map(String::as_str))
        .collect();
    let mut axes = BTreeMap::new();
    for (name, p) in params {
        if !members.contains(name.as_str()) {
            tracing::debug!(axis = %name, "axis dropped: no group lists it");
            continue;
        }
        let axis = Axis {
            display: p.display.unwrap_or_else(|| name.clone()),
            val2pulse: p.val2pulse.unwrap_or(DEFAULT_VAL2PULSE),
            sense: p.sense.unwrap_or_default(),
            unit: p.unit.unwrap_or_default(),
            name: name.clone(),
        };
        axes.insert(name, axis);
    }
    merged.axes = axes;
    merged
}

fn same_params(a: &AxisEntry, b: &AxisEntry) -> bool {
    a.val2pulse == b.val2pulse && a.sense == b.sense && a.unit == b.unit
}

fn overlay(
    target: &mut ParamOverlay,
    entry: &AxisEntry,
    source: LayerSource,
    warnings: &mut Vec<ConfigWarning>,
) {
    if let Some(d) = entry.display.as_ref().filter(|d| !d.trim().is_empty()) {
        target.display = Some(d.clone());
    }
    if let Some(v) = entry.val2pulse {
        match units::validate_factor(v) {
            Ok(()) => target.val2pulse = Some(v),
            Err(reason) => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                axis: Some(entry.name.clone()),
                message: format!("{source} layer: {reason}; value ignored"),
            }),
        }
    }
    if let Some(s) = entry.sense {
        target.sense = Some(s);
    }
    if let Some(u) = entry.unit {
        target.unit = Some(u);
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// Loads, merges and persists the layered axis-group configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    sources: ConfigSources,
}

impl ConfigStore {
    pub fn new(sources: ConfigSources) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &ConfigSources {
        &self.sources
    }

    /// Read all three layers. Only a missing or unreadable defaults layer is
    /// fatal; the others degrade to empty layers plus a warning.
    pub fn load(&self) -> Result<LoadedConfig> {
        let mut warnings = Vec::new();

        let defaults = self.load_defaults()?;

        let mut network = NetworkSettings::default();
        let hardware = match &self.sources.hardware {
            None => ConfigLayer::empty(LayerSource::Hardware),
            Some(path) => match crate::io::read_optional(path) {
                Ok(Some(raw)) => {
                    let hw = hardware::parse_hardware_config(&raw);
                    warnings.extend(hw.warnings.iter().cloned());
                    for e in &hw.errors {
                        let axis = match e {
                            AxisError::MalformedHardwareConfig { axis, .. } => Some(axis.clone()),
                            _ => None,
                        };
                        warnings.push(ConfigWarning {
                            level: WarnLevel::Error,
                            axis,
                            message: e.to_string(),
                        });
                    }
                    network = hw.network.clone();
                    ConfigLayer::from_hardware(&hw, Some(path.clone()))
                }
                Ok(None) => {
                    warnings.push(partial(path, "file not found"));
                    ConfigLayer::empty(LayerSource::Hardware)
                }
                Err(e) => {
                    warnings.push(partial(path, &e.to_string()));
                    ConfigLayer::empty(LayerSource::Hardware)
                }
            },
        };

        let favorites_path = &self.sources.favorites;
        let favorites = match crate::io::read_optional(favorites_path) {
            // A first run has no favorites yet; that is not worth a warning.
            Ok(None) => ConfigLayer::empty(LayerSource::Favorites),
            Ok(Some(raw)) => match parse_document(&raw) {
                Ok(groups) => ConfigLayer {
                    source: LayerSource::Favorites,
                    path: Some(favorites_path.clone()),
                    groups,
                },
                Err(e) => {
                    warnings.push(partial(favorites_path, &e.to_string()));
                    ConfigLayer::empty(LayerSource::Favorites)
                }
            },
            Err(e) => {
                warnings.push(partial(favorites_path, &e.to_string()));
                ConfigLayer::empty(LayerSource::Favorites)
            }
        };

        for w in &warnings {
            tracing::warn!(axis = ?w.axis, "{}", w.message);
        }

        Ok(LoadedConfig {
            layers: vec![defaults, hardware, favorites],
            network,
            warnings,
        })
    }

    fn load_defaults(&self) -> Result<ConfigLayer> {
        let path = &self.sources.defaults;
        let fatal = |reason: String| AxisError::ConfigLoadFatal {
            path: path.clone(),
            reason,
        };
        let raw = crate::io::read_optional(path)
            .map_err(|e| fatal(e.to_string()))?
            .ok_or_else(|| fatal("file not found".to_string()))?;
        let groups = parse_document(&raw).map_err(|e| fatal(e.to_string()))?;
        Ok(ConfigLayer {
            source: LayerSource::Defaults,
            path: Some(path.clone()),
            groups,
        })
    }

    /// `load` followed by `merge`, carrying load warnings into the result.
    pub fn load_all(&self) -> Result<MergedConfig> {
        let loaded = self.load()?;
        let mut merged = merge(&loaded.layers);
        merged.network = loaded.network;
        let mut warnings = loaded.warnings;
        warnings.append(&mut merged.warnings);
        merged.warnings = warnings;
        tracing::info!(
            groups = merged.groups.len(),
            axes = merged.axes.len(),
            "configuration loaded"
        );
        Ok(merged)
    }

    /// Write `group` into the favorites layer, replacing a group of the same
    /// name and keeping every other favorite group. The file is replaced
    /// whole. Only names and display labels are stored.
    pub fn save_favorite(&self, group: &str, axes: &[Axis]) -> Result<()> {
        paths::validate_group_name(group)?;
        let path = &self.sources.favorites;
        // Refuse to clobber a favorites file we cannot parse.
        let mut doc = match crate::io::read_optional(path)? {
            Some(raw) => parse_document(&raw)?,
            None => LayerDocument::new(),
        };
        let entries = axes
            .iter()
            .map(|a| AxisEntry {
                display: (a.display != a.name).then(|| a.display.clone()),
                ..AxisEntry::named(a.name.clone())
            })
            .collect();
        if doc.insert(group.to_string(), entries).is_some() {
            tracing::info!(group, "replacing existing favorite group");
        }
        let data = serde_yaml::to_string(&doc)?;
        crate::io::atomic_write(path, data.as_bytes())
    }
}

fn partial(path: &Path, reason: &str) -> ConfigWarning {
    ConfigWarning::warning(
        AxisError::ConfigLoadPartial {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
        .to_string(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layer(source: LayerSource, yaml: &str) -> ConfigLayer {
        ConfigLayer {
            source,
            path: None,
            groups: parse_document(yaml).unwrap(),
        }
    }

    fn store(dir: &TempDir, hardware: Option<&str>) -> ConfigStore {
        let hw_path = hardware.map(|raw| {
            let p = dir.path().join("bss.config");
            std::fs::write(&p, raw).unwrap();
            p
        });
        ConfigStore::new(ConfigSources::in_root(dir.path(), hw_path))
    }

    #[test]
    fn later_layer_replaces_group_wholesale() {
        let defaults = layer(LayerSource::Defaults, "G:\n  - name: A\n  - name: B\n");
        let favorites = layer(LayerSource::Favorites, "G:\n  - name: C\n");
        let merged = merge(&[favorites, defaults]);
        let g = merged.group("G").unwrap();
        assert_eq!(g.axes, vec!["C".to_string()]);
        assert_eq!(g.source, LayerSource::Favorites);
    }

    #[test]
    fn replaced_group_members_leave_the_axis_table() {
        let defaults = layer(
            LayerSource::Defaults,
            "g:\n  - name: a\n    val2pulse: 500\n  - name: b\nother:\n  - name: b\n",
        );
        let favorites = layer(LayerSource::Favorites, "g:\n  - name: c\n  - name: a\n");
        let merged = merge(&[defaults, favorites]);
        let names: Vec<&str> = merged.axes.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(merged.axis("a").unwrap().val2pulse, 500.0);

        let favorites = layer(LayerSource::Favorites, "g:\n  - name: c\n");
        let merged = merge(&[
            layer(LayerSource::Defaults, "g:\n  - name: a\n"),
            favorites,
        ]);
        assert!(matches!(merged.axis("a"), Err(AxisError::UnknownAxis(_))));
        assert!(merged.axis("c").is_ok());
    }

    #[test]
    fn parameters_resolve_by_precedence() {
        let defaults = layer(
            LayerSource::Defaults,
            "slits:\n  - name: s1\n    display: Slit one\n    val2pulse: 10\n    unit: mm\n",
        );
        let hardware = layer(
            LayerSource::Hardware,
            "all:\n  - name: s1\n    val2pulse: 1000\n    sense: -1\n",
        );
        let merged = merge(&[defaults, hardware]);
        let a = merged.axis("s1").unwrap();
        assert_eq!(a.val2pulse, 1000.0);
        assert_eq!(a.sense, Sense::Reverse);
        assert_eq!(a.unit, Unit::Mm);
        assert_eq!(a.display, "Slit one");
        assert!(merged.groups.contains_key("all"));
        assert!(merged.groups.contains_key("slits"));
    }

    #[test]
    fn unknown_axis_gets_builtin_fallback() {
        let merged = merge(&[layer(LayerSource::Favorites, "mine:\n  - axis_name: x9\n")]);
        let a = merged.axis("x9").unwrap();
        assert_eq!(a.val2pulse, DEFAULT_VAL2PULSE);
        assert_eq!(a.sense, Sense::Forward);
        assert_eq!(a.unit, Unit::Pulse);
        assert_eq!(a.display, "x9");
    }

    #[test]
    fn invalid_factor_in_layer_is_ignored_with_warning() {
        let merged = merge(&[layer(
            LayerSource::Defaults,
            "g:\n  - name: a\n    val2pulse: -3\n",
        )]);
        assert_eq!(merged.axis("a").unwrap().val2pulse, DEFAULT_VAL2PULSE);
        assert_eq!(merged.warnings.len(), 1);
    }

    #[test]
    fn missing_defaults_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir, None).load().unwrap_err();
        assert!(matches!(err, AxisError::ConfigLoadFatal { .. }));
    }

    #[test]
    fn missing_hardware_is_partial() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::DEFAULTS_FILE), "g:\n  - name: a\n").unwrap();
        let s = ConfigStore::new(ConfigSources::in_root(
            dir.path(),
            Some(dir.path().join("missing/bss.config")),
        ));
        let merged = s.load_all().unwrap();
        assert!(merged.groups.contains_key("g"));
        assert!(merged
            .warnings
            .iter()
            .any(|w| w.message.contains("optional config layer")));
    }

    #[test]
    fn hardware_layer_contributes_all_group_and_network() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::DEFAULTS_FILE), "slits:\n  - name: s1\n").unwrap();
        let hw = "Ms_IP: 10.0.0.5\n_axis_begin\n_axis_name: s1\n_val2pulse: 200\n_cunit: mm\n_axis_end\n\
                  _axis_begin\n_axis_name: s2\n_val2pulse: zero\n_axis_end\n";
        let merged = store(&dir, Some(hw)).load_all().unwrap();
        assert_eq!(merged.group(ALL_GROUP).unwrap().axes, vec!["s1".to_string()]);
        assert_eq!(merged.axis("s1").unwrap().val2pulse, 200.0);
        assert_eq!(merged.network.host.as_deref(), Some("10.0.0.5"));
        assert!(merged
            .warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.axis.as_deref() == Some("s2")));
    }

    #[test]
    fn save_favorite_replaces_only_that_group() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::DEFAULTS_FILE), "g:\n  - name: a\n").unwrap();
        let s = store(&dir, None);
        s.save_favorite("one", &[Axis::new("a")]).unwrap();
        s.save_favorite("two", &[Axis::new("b").with_display("Bee")]).unwrap();
        s.save_favorite("one", &[Axis::new("c")]).unwrap();

        let merged = s.load_all().unwrap();
        assert_eq!(merged.group("one").unwrap().axes, vec!["c".to_string()]);
        assert_eq!(merged.group("two").unwrap().axes, vec!["b".to_string()]);
        assert_eq!(merged.axis("b").unwrap().display, "Bee");

        let raw = std::fs::read_to_string(paths::favorites_path(dir.path())).unwrap();
        assert!(!raw.contains("val2pulse"));
    }

    #[test]
    fn save_favorite_refuses_unparseable_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::favorites_path(dir.path()), "{ not: [valid").unwrap();
        let s = store(&dir, None);
        assert!(s.save_favorite("one", &[Axis::new("a")]).is_err());
        assert_eq!(
            std::fs::read_to_string(paths::favorites_path(dir.path())).unwrap(),
            "{ not: [valid"
        );
    }

    #[test]
    fn save_favorite_validates_group_name() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir, None)
            .save_favorite("../escape", &[Axis::new("a")])
            .unwrap_err();
        assert!(matches!(err, AxisError::InvalidGroupName(_)));
    }
}
