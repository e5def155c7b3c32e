//! Sandboxed Lua 5.4 VMs for spell scripts.
//!
//! Every spell file is loaded into its own [`Lua`] instance so that globals
//! defined by one script can never leak into another. The VM is prepared by
//! [`new_spell_vm`]: dangerous standard libraries are removed, host APIs are
//! registered, and the `spell` marker function is installed.
//!
//! All host functions are synchronous (`reqwest::blocking`,
//! `std::thread::sleep`), so VMs must only run on blocking threads
//! ([`tokio::task::spawn_blocking`]).
//!
//! # Host APIs
//!
//! | Module | Functions |
//! |--------|-----------|
//! | `spell` | `spell(def)`, `spell(fn, opts)` |
//! | `http` | `get`, `post`, `put`, `delete` |
//! | `json` | `parse`, `encode` |
//! | `env` | `get` |
//! | `log` | `debug`, `info`, `warn`, `error` (forwarded to `tracing`) |
//! | `fs` | `read`, `list` (confined to the collection directory) |
//! | `base64` | `encode`, `decode` |
//! | `crypto` | `sha256`, `hmac_sha256` |
//! | `sleep` | `sleep(seconds)` |
//!
//! # Sandboxing
//!
//! `os`, `io`, `debug`, `loadfile` and `dofile` are removed from the
//! globals. Long-running code is interrupted by [`run_with_deadline`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use globset::Glob;
use hmac::{Hmac, Mac};
use mlua::prelude::*;
use sha2::{Digest, Sha256};

/// Field set on a table by `spell(...)` to mark it as a capability.
pub(crate) const SPELL_MARKER: &str = "__spell";

/// Global holding the owning collection's name inside each VM.
pub(crate) const COLLECTION_GLOBAL: &str = "MAGETOOLS_COLLECTION";

fn host_error(msg: String) -> LuaError {
    LuaError::external(anyhow::anyhow!(msg))
}

// ═══════════════════════════════════════════════════════════════════════
// VM construction
// ═══════════════════════════════════════════════════════════════════════

/// Create a fresh, sandboxed VM for one spell file.
///
/// * `collection`: owning collection, exposed as `MAGETOOLS_COLLECTION`.
/// * `script_name`: logical name used as the `script` field of log events.
/// * `sandbox_root`: directory that `fs.read` / `fs.list` are confined to.
pub(crate) fn new_spell_vm(collection: &str, script_name: &str, sandbox_root: &Path) -> LuaResult<Lua> {
    let lua = Lua::new();
    sandbox_globals(&lua)?;
    register_spell_marker(&lua)?;
    register_http_api(&lua)?;
    register_json_api(&lua)?;
    register_env_api(&lua)?;
    register_log_api(&lua, script_name)?;
    register_fs_api(&lua, sandbox_root)?;
    register_base64_api(&lua)?;
    register_crypto_api(&lua)?;
    register_sleep(&lua)?;
    lua.globals().set(COLLECTION_GLOBAL, collection)?;
    Ok(lua)
}

/// Remove dangerous standard library functions from the Lua globals.
fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["os", "io", "loadfile", "dofile", "debug"] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

/// Wall-clock limit of the code currently running in a VM, visible to
/// blocking host functions such as `sleep`.
#[derive(Debug, Clone)]
struct Deadline {
    at: Instant,
    limit: Duration,
    label: String,
}

impl Deadline {
    fn timed_out(&self) -> LuaError {
        LuaError::RuntimeError(format!(
            "{} timed out after {:.1} seconds",
            self.label,
            self.limit.as_secs_f64()
        ))
    }
}

/// Run `f` with an instruction hook that aborts once `limit` has elapsed.
///
/// The deadline is also stored as app data so that host functions which
/// block without executing instructions honour it. Both are removed again
/// afterwards, so the same VM can be reused for later casts with their own
/// limits.
pub(crate) fn run_with_deadline<T>(
    lua: &Lua,
    limit: Duration,
    what: &str,
    f: impl FnOnce() -> LuaResult<T>,
) -> LuaResult<T> {
    let deadline = Deadline {
        at: Instant::now() + limit,
        limit,
        label: what.to_string(),
    };
    let hook_deadline = deadline.clone();
    lua.set_app_data(deadline);
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(10_000),
        move |_lua, _debug| {
            if Instant::now() > hook_deadline.at {
                Err(hook_deadline.timed_out())
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );
    let result = f();
    lua.remove_hook();
    lua.remove_app_data::<Deadline>();
    result
}

// ═══════════════════════════════════════════════════════════════════════
// Capability marker
// ═══════════════════════════════════════════════════════════════════════

/// Install the global `spell` function.
///
/// ```lua
/// get_forecast = spell {
///     description = "Forecast for a city",
///     cast = function(args, ctx) return { city = args.city } end,
/// }
///
/// ping = spell(function(args, ctx) return "pong" end, { description = "Ping" })
/// ```
fn register_spell_marker(lua: &Lua) -> LuaResult<()> {
    let marker = lua.create_function(|lua, (def, opts): (LuaValue, Option<LuaTable>)| {
        let table = match def {
            LuaValue::Table(t) => t,
            LuaValue::Function(f) => {
                let t = match opts {
                    Some(o) => o,
                    None => lua.create_table()?,
                };
                t.set("cast", f)?;
                t
            }
            other => {
                return Err(host_error(format!(
                    "spell() expects a table or a function, got {}",
                    other.type_name()
                )))
            }
        };
        if table.get::<LuaValue>("config")?.is_nil() {
            table.set("config", lua.create_table()?)?;
        }
        table.set(SPELL_MARKER, true)?;
        Ok(table)
    })?;
    lua.globals().set("spell", marker)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: http
// ═══════════════════════════════════════════════════════════════════════

/// Shared blocking client, built on first use so that VMs which never make
/// a request never spin up the client's runtime thread.
fn http_client() -> LuaResult<&'static reqwest::blocking::Client> {
    static CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client);
    }
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(LuaError::external)?;
    Ok(CLIENT.get_or_init(|| client))
}

fn register_http_api(lua: &Lua) -> LuaResult<()> {
    let http = lua.create_table()?;

    // http.get(url, opts?) / http.delete(url, opts?)
    for (field, method) in [("get", "GET"), ("delete", "DELETE")] {
        http.set(
            field,
            lua.create_function(move |lua, (url, opts): (String, Option<LuaTable>)| {
                do_http_request(lua, method, &url, None, opts)
            })?,
        )?;
    }

    // http.post(url, body, opts?) / http.put(url, body, opts?)
    for (field, method) in [("post", "POST"), ("put", "PUT")] {
        http.set(
            field,
            lua.create_function(
                move |lua, (url, body, opts): (String, String, Option<LuaTable>)| {
                    do_http_request(lua, method, &url, Some(body), opts)
                },
            )?,
        )?;
    }

    lua.globals().set("http", http)?;
    Ok(())
}

/// Execute an HTTP request and return `{status, ok, headers, body, json?}`.
fn do_http_request(
    lua: &Lua,
    method: &'static str,
    url: &str,
    body: Option<String>,
    opts: Option<LuaTable>,
) -> LuaResult<LuaTable> {
    let client = http_client()?;
    let verb = reqwest::Method::from_bytes(method.as_bytes()).map_err(LuaError::external)?;
    let mut builder = client.request(verb, url);

    if let Some(opts) = opts {
        if let Ok(headers) = opts.get::<LuaTable>("headers") {
            for pair in headers.pairs::<String, String>() {
                let (k, v) = pair?;
                builder = builder.header(k, v);
            }
        }
        if let Ok(params) = opts.get::<LuaTable>("params") {
            let query: Vec<(String, String)> = params
                .pairs::<String, String>()
                .collect::<LuaResult<_>>()?;
            builder = builder.query(&query);
        }
        if let Ok(timeout) = opts.get::<f64>("timeout") {
            builder = builder.timeout(Duration::from_secs_f64(timeout));
        }
    }

    if let Some(body) = body {
        builder = builder.body(body);
    }

    let response = builder
        .send()
        .map_err(|e| host_error(format!("HTTP {} {} failed: {}", method, url, e)))?;

    let result = lua.create_table()?;
    result.set("status", response.status().as_u16())?;
    result.set("ok", response.status().is_success())?;

    let headers = lua.create_table()?;
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.set(name.as_str(), v)?;
        }
    }
    result.set("headers", headers)?;

    let text = response
        .text()
        .map_err(|e| host_error(format!("Failed to read response body: {}", e)))?;
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
        result.set("json", json_value_to_lua(lua, &json)?)?;
    }
    result.set("body", text)?;

    Ok(result)
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: json, env
// ═══════════════════════════════════════════════════════════════════════

fn register_json_api(lua: &Lua) -> LuaResult<()> {
    let json = lua.create_table()?;

    json.set(
        "parse",
        lua.create_function(|lua, s: String| {
            let value: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| host_error(format!("json.parse: {}", e)))?;
            json_value_to_lua(lua, &value)
        })?,
    )?;

    json.set(
        "encode",
        lua.create_function(|_lua, value: LuaValue| {
            serde_json::to_string(&lua_value_to_json(value)?)
                .map_err(|e| host_error(format!("json.encode: {}", e)))
        })?,
    )?;

    lua.globals().set("json", json)?;
    Ok(())
}

fn register_env_api(lua: &Lua) -> LuaResult<()> {
    let env = lua.create_table()?;
    env.set(
        "get",
        lua.create_function(|_lua, name: String| Ok(std::env::var(&name).ok()))?,
    )?;
    lua.globals().set("env", env)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: log
// ═══════════════════════════════════════════════════════════════════════

fn register_log_api(lua: &Lua, script_name: &str) -> LuaResult<()> {
    let log = lua.create_table()?;

    for level in ["debug", "info", "warn", "error"] {
        let script = script_name.to_string();
        log.set(
            level,
            lua.create_function(move |_lua, msg: String| {
                match level {
                    "debug" => tracing::debug!(script = %script, "{}", msg),
                    "info" => tracing::info!(script = %script, "{}", msg),
                    "warn" => tracing::warn!(script = %script, "{}", msg),
                    _ => tracing::error!(script = %script, "{}", msg),
                }
                Ok(())
            })?,
        )?;
    }

    lua.globals().set("log", log)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: fs (sandboxed)
// ═══════════════════════════════════════════════════════════════════════

/// Resolve `path` below `root`, refusing anything that escapes it.
fn resolve_in_sandbox(root: &Path, path: &str, op: &str) -> LuaResult<PathBuf> {
    let canonical = root
        .join(path)
        .canonicalize()
        .map_err(|e| host_error(format!("{}: {}: {}", op, path, e)))?;
    if !canonical.starts_with(root) {
        return Err(host_error(format!("{}: path escapes sandbox: {}", op, path)));
    }
    Ok(canonical)
}

fn register_fs_api(lua: &Lua, sandbox_root: &Path) -> LuaResult<()> {
    let fs = lua.create_table()?;
    let root = sandbox_root
        .canonicalize()
        .unwrap_or_else(|_| sandbox_root.to_path_buf());

    // fs.read(path) → string
    let r = root.clone();
    fs.set(
        "read",
        lua.create_function(move |_lua, path: String| {
            let target = resolve_in_sandbox(&r, &path, "fs.read")?;
            std::fs::read_to_string(&target)
                .map_err(|e| host_error(format!("fs.read: {}: {}", path, e)))
        })?,
    )?;

    // fs.list(dir, glob?) → [{path, size}]
    let r = root;
    fs.set(
        "list",
        lua.create_function(move |lua, (dir, pattern): (String, Option<String>)| {
            let target = resolve_in_sandbox(&r, &dir, "fs.list")?;
            let matcher = match pattern {
                Some(p) => Some(
                    Glob::new(&p)
                        .map_err(|e| host_error(format!("fs.list: bad glob: {}", e)))?
                        .compile_matcher(),
                ),
                None => None,
            };

            let mut paths: Vec<PathBuf> = std::fs::read_dir(&target)
                .map_err(|e| host_error(format!("fs.list: {}: {}", dir, e)))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    matcher.as_ref().map_or(true, |m| m.is_match(name))
                })
                .collect();
            paths.sort();

            let entries = lua.create_table()?;
            for (i, path) in paths.iter().enumerate() {
                let item = lua.create_table()?;
                item.set("path", path.to_string_lossy().to_string())?;
                item.set("size", std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))?;
                entries.set(i as i64 + 1, item)?;
            }
            Ok(entries)
        })?,
    )?;

    lua.globals().set("fs", fs)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: base64, crypto, sleep
// ═══════════════════════════════════════════════════════════════════════

fn register_base64_api(lua: &Lua) -> LuaResult<()> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let b64 = lua.create_table()?;
    b64.set(
        "encode",
        lua.create_function(|_lua, data: String| Ok(STANDARD.encode(data.as_bytes())))?,
    )?;
    b64.set(
        "decode",
        lua.create_function(|lua, data: String| {
            let bytes = STANDARD
                .decode(data.as_bytes())
                .map_err(|e| host_error(format!("base64.decode: {}", e)))?;
            lua.create_string(&bytes)
        })?,
    )?;
    lua.globals().set("base64", b64)?;
    Ok(())
}

fn register_crypto_api(lua: &Lua) -> LuaResult<()> {
    let crypto = lua.create_table()?;

    crypto.set(
        "sha256",
        lua.create_function(|_lua, data: String| Ok(hex::encode(Sha256::digest(data.as_bytes()))))?,
    )?;

    crypto.set(
        "hmac_sha256",
        lua.create_function(|_lua, (key, data): (String, String)| {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                .map_err(|e| host_error(format!("crypto.hmac_sha256: {}", e)))?;
            mac.update(data.as_bytes());
            Ok(hex::encode(mac.finalize().into_bytes()))
        })?,
    )?;

    lua.globals().set("crypto", crypto)?;
    Ok(())
}

/// `sleep(seconds)`. Never sleeps past the running deadline: a longer
/// request sleeps until the deadline and then fails as timed out.
fn register_sleep(lua: &Lua) -> LuaResult<()> {
    lua.globals().set(
        "sleep",
        lua.create_function(|lua, seconds: f64| {
            let requested = Duration::try_from_secs_f64(seconds)
                .map_err(|e| host_error(format!("sleep: invalid duration {}: {}", seconds, e)))?;
            let deadline = lua.app_data_ref::<Deadline>().map(|d| (*d).clone());
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.at.saturating_duration_since(Instant::now());
                    if requested > remaining {
                        std::thread::sleep(remaining);
                        return Err(deadline.timed_out());
                    }
                    std::thread::sleep(requested);
                }
                None => std::thread::sleep(requested),
            }
            Ok(())
        })?,
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Value conversions
// ═══════════════════════════════════════════════════════════════════════

/// Expand `${VAR_NAME}` patterns in a string from the process environment.
/// Unset variables expand to the empty string.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&std::env::var(&rest[start + 2..start + len]).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Apply [`expand_env_vars`] to every string inside a JSON value.
pub(crate) fn expand_env_in_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(expand_env_vars(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(expand_env_in_json).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_env_in_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Convert a JSON value to a Lua value.
pub(crate) fn json_value_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    Ok(match value {
        serde_json::Value::Null => LuaValue::Nil,
        serde_json::Value::Bool(b) => LuaValue::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Number(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => LuaValue::String(lua.create_string(s)?),
        serde_json::Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, v) in items.iter().enumerate() {
                table.raw_set(i as i64 + 1, json_value_to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (k, v) in map {
                table.raw_set(k.as_str(), json_value_to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

/// Convert a Lua value to a JSON value.
///
/// Tables with a non-zero sequence length become arrays, other tables
/// become objects keyed by their string keys. Functions and userdata map
/// to `null`.
pub(crate) fn lua_value_to_json(value: LuaValue) -> LuaResult<serde_json::Value> {
    Ok(match value {
        LuaValue::Nil => serde_json::Value::Null,
        LuaValue::Boolean(b) => serde_json::Value::Bool(b),
        LuaValue::Integer(i) => serde_json::Value::from(i),
        LuaValue::Number(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        LuaValue::String(s) => serde_json::Value::String(s.to_str()?.to_string()),
        LuaValue::Table(t) => {
            let len = t.raw_len();
            if len > 0 {
                let items = (1..=len)
                    .map(|i| t.raw_get::<LuaValue>(i).and_then(lua_value_to_json))
                    .collect::<LuaResult<Vec<_>>>()?;
                serde_json::Value::Array(items)
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.pairs::<LuaValue, LuaValue>() {
                    let (k, v) = pair?;
                    if let LuaValue::String(k) = k {
                        map.insert(k.to_str()?.to_string(), lua_value_to_json(v)?);
                    }
                }
                serde_json::Value::Object(map)
            }
        }
        _ => serde_json::Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vm(dir: &Path) -> Lua {
        new_spell_vm("weather", "test", dir).unwrap()
    }

    #[test]
    fn test_sandbox_removes_dangerous_globals() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        for name in ["os", "io", "debug", "loadfile", "dofile"] {
            let v: LuaValue = lua.globals().get(name).unwrap();
            assert!(v.is_nil(), "{} should be removed", name);
        }
    }

    #[test]
    fn test_collection_global_set() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        let name: String = lua.globals().get(COLLECTION_GLOBAL).unwrap();
        assert_eq!(name, "weather");
    }

    #[test]
    fn test_spell_marker_table_form() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        lua.load(r#"s = spell { description = "d", cast = function() return 1 end }"#)
            .exec()
            .unwrap();
        let t: LuaTable = lua.globals().get("s").unwrap();
        assert!(t.get::<bool>(SPELL_MARKER).unwrap());
        assert!(t.get::<LuaTable>("config").is_ok());
    }

    #[test]
    fn test_spell_marker_function_form() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        lua.load(r#"s = spell(function() return 1 end, { description = "ping", config = { k = 1 } })"#)
            .exec()
            .unwrap();
        let t: LuaTable = lua.globals().get("s").unwrap();
        assert!(t.get::<bool>(SPELL_MARKER).unwrap());
        assert!(t.get::<LuaFunction>("cast").is_ok());
        assert_eq!(t.get::<String>("description").unwrap(), "ping");
        let config: LuaTable = t.get("config").unwrap();
        assert_eq!(config.get::<i64>("k").unwrap(), 1);
    }

    #[test]
    fn test_spell_marker_rejects_scalars() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        assert!(lua.load(r#"s = spell(42)"#).exec().is_err());
    }

    #[test]
    fn test_deadline_interrupts_infinite_loop() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        let result = run_with_deadline(&lua, Duration::from_millis(50), "loop", || {
            lua.load("while true do end").exec()
        });
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {}", err);

        // Hook removed: the VM keeps working afterwards.
        let two: i64 = lua.load("return 1 + 1").eval().unwrap();
        assert_eq!(two, 2);
    }

    #[test]
    fn test_sleep_rejects_invalid_durations() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        for src in ["sleep(math.huge)", "sleep(-1)", "sleep(0/0)", "sleep(1e300)"] {
            let err = lua.load(src).exec().unwrap_err().to_string();
            assert!(err.contains("invalid duration"), "{}: {}", src, err);
        }
        lua.load("sleep(0)").exec().unwrap();
    }

    #[test]
    fn test_sleep_bounded_by_deadline() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        let started = Instant::now();
        let result = run_with_deadline(&lua, Duration::from_millis(100), "nap", || {
            lua.load("sleep(5)").exec()
        });
        let err = result.unwrap_err().to_string();
        assert!(err.contains("nap timed out"), "unexpected error: {}", err);
        assert!(started.elapsed() < Duration::from_secs(2));

        // Outside a deadline short sleeps just work.
        lua.load("sleep(0.01)").exec().unwrap();
    }

    #[test]
    fn test_fs_confined_to_sandbox() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("data.txt"), "hello").unwrap();
        let lua = vm(tmp.path());
        let s: String = lua.load(r#"return fs.read("data.txt")"#).eval().unwrap();
        assert_eq!(s, "hello");
        assert!(lua.load(r#"return fs.read("../../etc/passwd")"#).eval::<String>().is_err());
    }

    #[test]
    fn test_crypto_and_base64() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        let h: String = lua.load(r#"return crypto.sha256("")"#).eval().unwrap();
        assert_eq!(
            h,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let b: String = lua
            .load(r#"return base64.decode(base64.encode("spell"))"#)
            .eval()
            .unwrap();
        assert_eq!(b, "spell");
    }

    #[test]
    fn test_json_roundtrip_through_lua() {
        let tmp = TempDir::new().unwrap();
        let lua = vm(tmp.path());
        let value = serde_json::json!({"city": "Oslo", "days": [1, 2, 3], "metric": true});
        let lv = json_value_to_lua(&lua, &value).unwrap();
        assert_eq!(lua_value_to_json(lv).unwrap(), value);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("MAGETOOLS_TEST_TOKEN", "abc");
        assert_eq!(expand_env_vars("Bearer ${MAGETOOLS_TEST_TOKEN}!"), "Bearer abc!");
        assert_eq!(expand_env_vars("${MAGETOOLS_TEST_UNSET_VAR}x"), "x");
        assert_eq!(expand_env_vars("no vars"), "no vars");
        assert_eq!(expand_env_vars("open ${brace"), "open ${brace");

        let v = expand_env_in_json(&serde_json::json!({"k": ["${MAGETOOLS_TEST_TOKEN}", 1]}));
        assert_eq!(v, serde_json::json!({"k": ["abc", 1]}));
    }
}
