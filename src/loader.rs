//! Spell discovery: walk the collection tree and load Lua spell scripts.
//!
//! ```text
//! <root>/
//!   weather/              ← collection "weather"
//!     manifest.json       ← optional policy
//!     forecast.lua        ← defines `get_forecast = spell { ... }`
//!     _helpers.lua        ← private, ignored
//!   .cache/               ← private, ignored
//! ```
//!
//! Each candidate file is compiled first (syntax pre-check), then executed
//! in its own sandboxed VM under a deadline. Globals holding a value tagged
//! by `spell(...)` become spells named `{collection}.{global}`, subject to
//! the collection's manifest. A file that fails to read, compile, or run is
//! quarantined: it is skipped and reported, and discovery carries on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mlua::prelude::*;
use serde_json::{json, Value};
use walkdir::WalkDir;

use magetools_core::models::qualified_name;

use crate::config::GrimoriumConfig;
use crate::error::MagetoolsError;
use crate::hasher::{extension_globset, hash_collection, is_private, source_files};
use crate::lua_runtime::{lua_value_to_json, new_spell_vm, run_with_deadline, SPELL_MARKER};
use crate::manifest::{is_allowed, load_manifest, Manifest};
use crate::registry::SpellRegistry;
use crate::spell::{LuaSpell, Spell, SpellVm};

/// Where to look and how long scripts may run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub load_timeout: Duration,
    pub cast_timeout: Duration,
}

impl DiscoveryOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(&GrimoriumConfig {
            root: root.into(),
            ..GrimoriumConfig::default()
        })
    }

    pub fn from_config(config: &GrimoriumConfig) -> Self {
        Self {
            root: config.root.clone(),
            extensions: config.extensions.clone(),
            load_timeout: Duration::from_secs(config.load_timeout_secs),
            cast_timeout: Duration::from_secs(config.cast_timeout_secs),
        }
    }
}

/// A collection directory found under the root.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub path: PathBuf,
    pub manifest: Option<Manifest>,
    /// [`hash_collection`] of the directory.
    pub content_hash: String,
    /// `true` when the manifest disables the collection.
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Loaded {
        /// Registered qualified names.
        spells: Vec<String>,
        /// Tagged members the manifest refused.
        denied: Vec<String>,
        /// Tagged members with an unusable definition, with the reason.
        invalid: Vec<(String, String)>,
    },
    Quarantined {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub collection: String,
    pub status: FileStatus,
}

/// What a discovery pass saw, file by file.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub collections: Vec<CollectionInfo>,
    pub files: Vec<FileOutcome>,
}

impl DiscoveryReport {
    pub fn quarantined(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files.iter().filter_map(|f| match &f.status {
            FileStatus::Quarantined { reason } => Some((f.path.as_path(), reason.as_str())),
            FileStatus::Loaded { .. } => None,
        })
    }

    pub fn spell_count(&self) -> usize {
        self.files
            .iter()
            .map(|f| match &f.status {
                FileStatus::Loaded { spells, .. } => spells.len(),
                FileStatus::Quarantined { .. } => 0,
            })
            .sum()
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// Result of [`discover`]: the spells to register plus the report.
pub struct Discovered {
    pub spells: Vec<Spell>,
    pub report: DiscoveryReport,
}

/// Discover every spell under `options.root`. Never fails: a missing root
/// yields nothing, and broken files are quarantined.
///
/// Runs Lua code synchronously; call it from a blocking thread.
pub fn discover(options: &DiscoveryOptions) -> Discovered {
    let mut discovered = Discovered {
        spells: Vec::new(),
        report: DiscoveryReport::default(),
    };

    let root = &options.root;
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "spell root not found; nothing to discover");
        return discovered;
    }

    let sources = match extension_globset(&options.extensions) {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(error = %e, "invalid spell extensions; nothing to discover");
            return discovered;
        }
    };

    tracing::info!(root = %root.display(), "scanning for spells");

    for dir in collection_dirs(root) {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let manifest = load_manifest(&dir);
        let disabled = manifest.as_ref().is_some_and(|m| !m.enabled);
        discovered.report.collections.push(CollectionInfo {
            name: name.clone(),
            path: dir.clone(),
            content_hash: hash_collection(&dir, &options.extensions),
            manifest: manifest.clone(),
            disabled,
        });

        if disabled {
            tracing::info!(collection = %name, "collection disabled by manifest");
            continue;
        }

        for file in source_files(&dir, &sources) {
            let status = match load_spell_file(&name, &dir, &file, manifest.as_ref(), options) {
                Ok(loaded) => {
                    let names: Vec<String> =
                        loaded.spells.iter().map(|s| s.qualified_name.clone()).collect();
                    if !names.is_empty() {
                        tracing::info!(
                            collection = %name,
                            file = %file.display(),
                            count = names.len(),
                            "loaded spells"
                        );
                    }
                    discovered.spells.extend(loaded.spells);
                    FileStatus::Loaded {
                        spells: names,
                        denied: loaded.denied,
                        invalid: loaded.invalid,
                    }
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    let reason = match e {
                        MagetoolsError::Quarantine { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    FileStatus::Quarantined { reason }
                }
            };
            discovered.report.files.push(FileOutcome {
                path: file,
                collection: name.clone(),
                status,
            });
        }
    }

    discovered
}

/// Run [`discover`] and publish the result into `registry`.
pub fn discover_into(registry: &SpellRegistry, options: &DiscoveryOptions) -> Result<DiscoveryReport> {
    let Discovered { spells, report } = discover(options);
    registry.replace_all(spells)?;
    Ok(report)
}

/// Immediate, non-private subdirectories of `root`, sorted by name.
fn collection_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_str().is_some_and(|n| !is_private(n)))
        .map(|e| e.into_path())
        .collect()
}

struct LoadedFile {
    spells: Vec<Spell>,
    denied: Vec<String>,
    invalid: Vec<(String, String)>,
}

fn quarantine(path: &Path, reason: impl std::fmt::Display) -> MagetoolsError {
    MagetoolsError::Quarantine {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Chunk name giving each file its own namespace:
/// `magetools.discovered_spells.<collection>.<relative.path.stem>`.
fn chunk_name(collection: &str, collection_dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(collection_dir).unwrap_or(path).with_extension("");
    let stem: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    format!("magetools.discovered_spells.{}.{}", collection, stem.join("."))
}

fn load_spell_file(
    collection: &str,
    collection_dir: &Path,
    path: &Path,
    manifest: Option<&Manifest>,
    options: &DiscoveryOptions,
) -> std::result::Result<LoadedFile, MagetoolsError> {
    let source = std::fs::read_to_string(path)
        .map_err(MagetoolsError::Io)
        .map_err(|e| quarantine(path, e))?;
    let chunk = chunk_name(collection, collection_dir, path);

    let lua = new_spell_vm(collection, &chunk, collection_dir)
        .map_err(|e| quarantine(path, format!("VM setup failed: {}", e)))?;

    // Compile without running: syntax errors never execute anything.
    let main = lua
        .load(&source)
        .set_name(&chunk)
        .into_function()
        .map_err(|e| quarantine(path, format!("syntax error: {}", e)))?;

    run_with_deadline(&lua, options.load_timeout, "top-level code", || main.call::<()>(()))
        .map_err(|e| quarantine(path, format!("load error: {}", e)))?;

    let tagged = tagged_members(&lua).map_err(|e| quarantine(path, format!("scan error: {}", e)))?;

    let vm = SpellVm::new(lua);
    let mut loaded = LoadedFile {
        spells: Vec::new(),
        denied: Vec::new(),
        invalid: Vec::new(),
    };

    for (name, table) in tagged {
        if !is_allowed(&name, manifest) {
            tracing::warn!(collection, spell = %name, "spell denied by manifest");
            loaded.denied.push(name);
            continue;
        }
        match build_spell(&vm, collection, &name, &table, path, options) {
            Ok(spell) => loaded.spells.push(spell),
            Err(e) => {
                tracing::warn!(collection, spell = %name, error = %e, "invalid spell definition");
                loaded.invalid.push((name, format!("{:#}", e)));
            }
        }
    }

    Ok(loaded)
}

/// Global tables carrying the spell marker, sorted by global name.
fn tagged_members(lua: &Lua) -> LuaResult<Vec<(String, LuaTable)>> {
    let mut tagged = Vec::new();
    for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let (LuaValue::String(key), LuaValue::Table(table)) = (key, value) else {
            continue;
        };
        if matches!(table.raw_get::<LuaValue>(SPELL_MARKER)?, LuaValue::Boolean(true)) {
            tagged.push((key.to_str()?.to_string(), table));
        }
    }
    tagged.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(tagged)
}

fn build_spell(
    vm: &std::sync::Arc<SpellVm>,
    collection: &str,
    name: &str,
    table: &LuaTable,
    path: &Path,
    options: &DiscoveryOptions,
) -> Result<Spell> {
    let cast: LuaFunction = table
        .get::<Option<LuaFunction>>("cast")?
        .context("spell has no `cast` function")?;
    let description = table.get::<Option<String>>("description")?.unwrap_or_default();
    let book_override = table
        .get::<Option<String>>("collection")?
        .filter(|b| !b.trim().is_empty());
    let parameters = match table.get::<Option<LuaTable>>("parameters")? {
        Some(params) => params_to_json_schema(&params)?,
        None => json!({"type": "object", "properties": {}}),
    };
    let config = lua_value_to_json(table.get::<LuaValue>("config")?)?;

    let qualified = qualified_name(collection, name);
    let handle = LuaSpell::new(
        vm.clone(),
        cast,
        qualified.clone(),
        collection.to_string(),
        name.to_string(),
        config.clone(),
        options.cast_timeout,
    )?;

    Ok(Spell {
        qualified_name: qualified,
        collection: collection.to_string(),
        name: name.to_string(),
        description,
        book_override,
        parameters,
        config,
        source_path: Some(path.to_path_buf()),
        handle: std::sync::Arc::new(handle),
    })
}

/// Convert Lua parameter declarations to a JSON Schema object.
///
/// ```lua
/// parameters = {
///     { name = "city", type = "string", required = true, description = "City name" },
///     { name = "units", type = "string", enum = { "metric", "imperial" }, default = "metric" },
/// }
/// ```
///
/// becomes
///
/// ```json
/// {
///     "type": "object",
///     "properties": {
///         "city": { "type": "string", "description": "City name" },
///         "units": { "type": "string", "enum": ["metric", "imperial"], "default": "metric" }
///     },
///     "required": ["city"]
/// }
/// ```
pub(crate) fn params_to_json_schema(params: &LuaTable) -> Result<Value> {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for i in 1..=params.raw_len() {
        let param: LuaTable = Context::with_context(params.raw_get(i), || {
            format!("parameter #{} is not a table", i)
        })?;
        let Some(name) = param.get::<Option<String>>("name")? else {
            bail!("parameter #{} has no name", i);
        };

        let mut prop = serde_json::Map::new();
        let kind = param
            .get::<Option<String>>("type")?
            .unwrap_or_else(|| "string".to_string());
        prop.insert("type".into(), json!(kind));
        if let Some(desc) = param.get::<Option<String>>("description")? {
            prop.insert("description".into(), json!(desc));
        }
        for key in ["enum", "default"] {
            let value = param.get::<LuaValue>(key)?;
            if !value.is_nil() {
                let value = Context::with_context(lua_value_to_json(value), || {
                    format!("invalid {} for parameter '{}'", key, name)
                })?;
                prop.insert(key.into(), value);
            }
        }

        if param.get::<Option<bool>>("required")?.unwrap_or(false) {
            required.push(json!(name));
        }
        properties.insert(name, Value::Object(prop));
    }

    let mut schema = json!({"type": "object", "properties": properties});
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    Ok(schema)
}

/// Write a commented spell template to `<collection_dir>/<name>.lua`.
pub fn scaffold_spell(collection_dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!(
            "Invalid spell name '{}': use letters, digits and underscores, starting with a letter",
            name
        );
    }

    std::fs::create_dir_all(collection_dir)
        .with_context(|| format!("Failed to create {}", collection_dir.display()))?;
    let path = collection_dir.join(format!("{}.lua", name));
    if path.exists() {
        bail!("Spell script already exists: {}", path.display());
    }

    let template = format!(
        r#"--[[
  Spell: {name}

  Every global assigned from `spell {{ ... }}` is registered as
  `<collection>.<global name>`. Files and folders starting with `.` or `_`
  are never loaded.

  Host APIs: http, json, env, log, fs (this folder only), base64, crypto, sleep.
]]

{name} = spell {{
    description = "TODO: describe what this spell does. This text is what queries are matched against.",
    parameters = {{
        {{ name = "query", type = "string", required = true, description = "Input query" }},
    }},
    -- collection = "other_book",   -- index under a different collection
    config = {{
        -- api_key = "${{{upper}_API_KEY}}",
    }},
    cast = function(args, ctx)
        log.info("casting " .. ctx.collection .. "." .. ctx.name)
        return {{ query = args.query }}
    end,
}}
"#,
        name = name,
        upper = name.to_uppercase(),
    );

    std::fs::write(&path, template)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "spell scaffolded");
    Ok(path)
}
