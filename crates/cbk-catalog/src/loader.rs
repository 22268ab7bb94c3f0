//! Layered YAML configuration loading.
//!
//! Documents merge in order (earlier = base, later = override), the merged
//! value is canonicalized and SHA-256 hashed so the effective config of a
//! settlement run can be recorded and compared. Missing sections fall back
//! to [`Catalog::builtin`] / [`RuntimeSettings::default`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

use crate::Catalog;

// ---------------------------------------------------------------------------
// Runtime settings
// ---------------------------------------------------------------------------

/// Connection details for the ERP JSON-RPC endpoint. The API key is never
/// a config literal; it is read from the environment variable named here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpSettings {
    pub url: String,
    pub db: String,
    pub uid: i64,
    pub api_key_env: String,
}

impl Default for ErpSettings {
    fn default() -> Self {
        ErpSettings {
            url: "https://ops.example.invalid/jsonrpc".to_string(),
            db: "main".to_string(),
            uid: 2,
            api_key_env: "CBK_ERP_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Submissions within this window of the chain tail are rejected as
    /// accidental double-submissions.
    pub guard_window_secs: i64,
    /// The only actor identity allowed to amend persisted settlements.
    pub privileged_actor: String,
    /// Daemon bind address; `CBK_DAEMON_ADDR` overrides.
    pub bind_addr: Option<String>,
    pub erp: ErpSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            guard_window_secs: 120,
            privileged_actor: "manager".to_string(),
            bind_addr: None,
            erp: ErpSettings::default(),
        }
    }
}

/// Effective configuration: runtime settings plus the reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigBundle {
    pub settings: RuntimeSettings,
    pub catalog: Catalog,
}

impl Default for ConfigBundle {
    fn default() -> Self {
        ConfigBundle {
            settings: RuntimeSettings::default(),
            catalog: Catalog::builtin(),
        }
    }
}

/// A loaded, merged, hashed configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub bundle: ConfigBundle,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw = fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    // Base layer is the built-in bundle; YAML docs override it in order.
    let mut merged = serde_json::to_value(ConfigBundle::default())
        .context("builtin config serialize failed")?;
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    let bundle: ConfigBundle =
        serde_json::from_value(merged.clone()).context("effective config shape invalid")?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        bundle,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

/// Compact JSON with recursively sorted object keys, so the hash does not
/// depend on key insertion order.
fn canonicalize_json(v: &Value) -> Result<String> {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).context("canonical json serialize failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
