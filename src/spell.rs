//! Discovered spells and the handles that cast them.
//!
//! A [`Spell`] is the registry's record of one capability: its names, its
//! documentation (the text that gets embedded), its parameter schema, and an
//! [`SpellHandle`] that actually runs it. Script spells use [`LuaSpell`];
//! hosts can register native Rust handles directly.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mlua::prelude::*;
use serde_json::Value;

use crate::hasher::hash_text;
use crate::lua_runtime::{expand_env_in_json, json_value_to_lua, lua_value_to_json, run_with_deadline};

/// Something that can be cast with JSON arguments.
#[async_trait]
pub trait SpellHandle: Send + Sync {
    async fn cast(&self, args: Value) -> Result<Value>;
}

/// A registered capability.
pub struct Spell {
    /// Registry key: `{collection}.{name}`.
    pub qualified_name: String,
    /// Directory the spell was discovered in.
    pub collection: String,
    /// Member name within its collection.
    pub name: String,
    /// Documentation text; this is what gets indexed for matching.
    pub description: String,
    /// Explicit index collection, overriding `collection`.
    pub book_override: Option<String>,
    /// JSON Schema object describing the arguments.
    pub parameters: Value,
    /// Static configuration handed to the spell as `ctx.config`.
    pub config: Value,
    pub source_path: Option<PathBuf>,
    pub handle: Arc<dyn SpellHandle>,
}

impl std::fmt::Debug for Spell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spell")
            .field("qualified_name", &self.qualified_name)
            .field("book", &self.book())
            .field("source_path", &self.source_path)
            .finish_non_exhaustive()
    }
}

impl Spell {
    /// The vector collection this spell is indexed in.
    pub fn book(&self) -> &str {
        self.book_override.as_deref().unwrap_or(&self.collection)
    }

    /// Hash of the indexed documentation.
    pub fn content_hash(&self) -> String {
        hash_text(&self.description)
    }

    pub async fn cast(&self, args: Value) -> Result<Value> {
        self.handle.cast(args).await
    }
}

/// One loaded script file. Every spell defined by the file shares it.
pub(crate) struct SpellVm {
    lua: Lua,
    /// Serializes casts: the deadline hook is per VM.
    gate: Mutex<()>,
}

impl SpellVm {
    pub(crate) fn new(lua: Lua) -> Arc<Self> {
        Arc::new(Self {
            lua,
            gate: Mutex::new(()),
        })
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }
}

/// A spell whose `cast` function lives in a Lua script.
#[derive(Clone)]
pub struct LuaSpell {
    vm: Arc<SpellVm>,
    cast_fn: Arc<LuaRegistryKey>,
    qualified_name: String,
    collection: String,
    name: String,
    config: Value,
    cast_timeout: Duration,
}

impl LuaSpell {
    pub(crate) fn new(
        vm: Arc<SpellVm>,
        cast_fn: LuaFunction,
        qualified_name: String,
        collection: String,
        name: String,
        config: Value,
        cast_timeout: Duration,
    ) -> LuaResult<Self> {
        let cast_fn = Arc::new(vm.lua().create_registry_value(cast_fn)?);
        Ok(Self {
            vm,
            cast_fn,
            qualified_name,
            collection,
            name,
            config,
            cast_timeout,
        })
    }

    fn cast_blocking(&self, args: Value) -> Result<Value> {
        let _gate = self
            .vm
            .gate
            .lock()
            .map_err(|_| anyhow!("spell VM lock poisoned"))?;
        let lua = self.vm.lua();

        let cast: LuaFunction = lua.registry_value(&self.cast_fn)?;
        let args = match args {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let args_lua = json_value_to_lua(lua, &args)?;

        let ctx = lua.create_table()?;
        ctx.set("collection", self.collection.as_str())?;
        ctx.set("name", self.name.as_str())?;
        ctx.set("config", json_value_to_lua(lua, &expand_env_in_json(&self.config))?)?;

        let label = format!("spell {}", self.qualified_name);
        let result: LuaValue = run_with_deadline(lua, self.cast_timeout, &label, || {
            cast.call::<LuaValue>((args_lua, ctx))
        })
        .map_err(|e| anyhow!("{} failed: {}", label, e))?;

        lua_value_to_json(result)
            .map_err(|e| anyhow!("{} returned a value that is not JSON: {}", label, e))
    }
}

#[async_trait]
impl SpellHandle for LuaSpell {
    async fn cast(&self, args: Value) -> Result<Value> {
        let spell = self.clone();
        tokio::task::spawn_blocking(move || spell.cast_blocking(args))
            .await
            .context("Lua spell task panicked")?
    }
}
