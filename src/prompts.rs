//! Agent-facing instructions for the spell toolset.

/// Tool name for searching spells.
pub const SEARCH_TOOL: &str = "magetools_search_spells";
/// Tool name for casting a spell.
pub const EXECUTE_TOOL: &str = "magetools_execute_spell";

/// Instructions an agent runtime can append to its system prompt.
pub const USAGE_GUIDE: &str = r#"
# Grimorium Usage Guide

## How to use Magic (Spells)

You have access to a Grimorium toolset that lets you find and cast scripted
capabilities ("spells"). Do not assume you have a tool for every task: find
it first.

### Workflow

1. **SEARCH**: when you need to do something (e.g. "convert currency",
   "check weather"), call `magetools_search_spells`.
   * Query: "weather forecast for a city"
2. **ANALYZE**: read the results. Each spell comes with a description and a
   JSON Schema of its parameters.
3. **EXECUTE**: call `magetools_execute_spell` with the exact spell name and
   an `arguments` object matching its parameters.

### Example

User: "Will it rain in Oslo tomorrow?"
You:
1. Call `magetools_search_spells(query="weather forecast")`
2. Tool output: `{"spells": {"weather.get_forecast": {...}}}`
3. Call `magetools_execute_spell(spell_name="weather.get_forecast", arguments={"city": "Oslo"})`
"#;

/// The hint attached to successful search results.
pub fn execute_hint() -> String {
    format!(
        "Use '{}' with the exact name of one of these spells and arguments matching its parameters.",
        EXECUTE_TOOL
    )
}
