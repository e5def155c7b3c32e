//! The spell registry: every spell a discovery pass registered, keyed by
//! qualified name.
//!
//! One registry per toolset. Discovery is the only writer and publishes a
//! whole pass at once with [`SpellRegistry::replace_all`], so a reader sees
//! either the previous pass or the new one, never a half-filled map.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};

use crate::spell::Spell;

#[derive(Default)]
pub struct SpellRegistry {
    spells: RwLock<BTreeMap<String, Arc<Spell>>>,
}

impl SpellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Arc<Spell>>>> {
        self.spells
            .read()
            .map_err(|_| anyhow!("spell registry lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Arc<Spell>>>> {
        self.spells
            .write()
            .map_err(|_| anyhow!("spell registry lock poisoned"))
    }

    /// Swap in the result of a discovery pass.
    ///
    /// Spells absent from `spells` disappear. A later duplicate of a
    /// qualified name replaces the earlier one.
    pub fn replace_all(&self, spells: Vec<Spell>) -> Result<()> {
        let next: BTreeMap<String, Arc<Spell>> = spells
            .into_iter()
            .map(|s| (s.qualified_name.clone(), Arc::new(s)))
            .collect();
        *self.write()? = next;
        Ok(())
    }

    /// Register a single spell, e.g. a native Rust handle.
    ///
    /// Errors if the qualified name is already taken.
    pub fn insert(&self, spell: Spell) -> Result<()> {
        let mut spells = self.write()?;
        if spells.contains_key(&spell.qualified_name) {
            bail!("spell '{}' is already registered", spell.qualified_name);
        }
        spells.insert(spell.qualified_name.clone(), Arc::new(spell));
        Ok(())
    }

    pub fn get(&self, qualified_name: &str) -> Option<Arc<Spell>> {
        self.read().ok()?.get(qualified_name).cloned()
    }

    /// Qualified names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// All spells in qualified-name order.
    pub fn snapshot(&self) -> Vec<Arc<Spell>> {
        self.read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Spells grouped by the vector collection ("book") they index into.
    pub fn by_book(&self) -> BTreeMap<String, Vec<Arc<Spell>>> {
        let mut books: BTreeMap<String, Vec<Arc<Spell>>> = BTreeMap::new();
        for spell in self.snapshot() {
            books.entry(spell.book().to_string()).or_default().push(spell);
        }
        books
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
