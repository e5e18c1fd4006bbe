//! Runtime (C6): the WASM engine, compilation cache, and loaded-plugin map.
//!
//! One `Runtime` is built per process (or per test). It owns the
//! `wasmtime::Engine`, registers WASI and the `reglet_host` module into
//! a linker shared by every [`Plugin`], and deduplicates compilation by
//! module bytes so repeated loads of the same plugin across profiles or
//! tests never recompile (§4.6).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use wasmtime::{Engine, Linker, Module};

use crate::capability::GrantSet;
use crate::error::RegletError;
use crate::host::{self, HostContext, StoreState};
use crate::plugin::{ConfigSchema, Plugin};

pub struct Runtime {
    engine: Engine,
    linker: Arc<Linker<StoreState>>,
    module_cache: DashMap<u64, Module>,
    plugins: DashMap<String, Arc<Plugin>>,
    default_plugin_memory_pages: u32,
}

impl Runtime {
    /// Build the engine, register WASI and the host module once, and
    /// return an empty runtime ready to load plugins.
    pub fn new(default_plugin_memory_pages: u32, host_ctx: Arc<HostContext>) -> Result<Self, RegletError> {
        let mut wasm_config = wasmtime::Config::new();
        wasm_config.async_support(true);
        wasm_config.wasm_backtrace_details(wasmtime::WasmBacktraceDetails::Enable);
        let engine = Engine::new(&wasm_config).map_err(|e| RegletError::internal(format!("failed to construct wasm engine: {e}")))?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |state: &mut StoreState| &mut state.wasi)
            .map_err(|e| RegletError::internal(format!("failed to register WASI: {e}")))?;
        host::register(&mut linker, host_ctx)?;

        Ok(Runtime {
            engine,
            linker: Arc::new(linker),
            module_cache: DashMap::new(),
            plugins: DashMap::new(),
            default_plugin_memory_pages,
        })
    }

    /// Compile (or reuse a cached compilation of) `bytes` and register it
    /// under `name`, returning the shared `Plugin` handle.
    pub fn load_plugin(&self, name: &str, bytes: &[u8]) -> Result<Arc<Plugin>, RegletError> {
        if let Some(existing) = self.plugins.get(name) {
            return Ok(existing.clone());
        }

        let key = hash_bytes(bytes);
        let module = match self.module_cache.get(&key) {
            Some(module) => module.clone(),
            None => {
                let module = Module::new(&self.engine, bytes).map_err(|e| RegletError::config(format!("plugin '{name}' failed to compile: {e}")))?;
                self.module_cache.insert(key, module.clone());
                module
            }
        };

        let memory_limit_bytes = self.default_plugin_memory_pages as usize * 64 * 1024;
        let plugin = Arc::new(Plugin::new(name, self.engine.clone(), module, self.linker.clone(), memory_limit_bytes));
        self.plugins.insert(name.to_string(), plugin.clone());
        Ok(plugin)
    }

    /// Read `<plugin_dir>/<name>/<name>.wasm` and load it (§6 plugin
    /// directory layout).
    pub fn load_plugin_from_dir(&self, plugin_dir: &Path, name: &str) -> Result<Arc<Plugin>, RegletError> {
        let path = plugin_wasm_path(plugin_dir, name);
        let bytes = std::fs::read(&path).map_err(|e| RegletError::config(format!("failed to read plugin '{name}' at '{}': {e}", path.display())))?;
        self.load_plugin(name, &bytes)
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.get(name).map(|entry| entry.clone())
    }

    /// Schema-provider interface consumed by profile validation (§4.6).
    pub async fn get_plugin_schema(&self, name: &str, grants: GrantSet) -> Result<ConfigSchema, RegletError> {
        let plugin = self.get_plugin(name).ok_or_else(|| RegletError::internal(format!("plugin '{name}' is not loaded")))?;
        plugin.schema(grants, CancellationToken::new()).await
    }

    /// Tear down the loaded-plugin map and compilation cache. The engine
    /// handle itself is cheap to drop; nothing else needs explicit cleanup.
    pub fn close(&self) {
        self.plugins.clear();
        self.module_cache.clear();
    }
}

pub fn plugin_wasm_path(plugin_dir: &Path, name: &str) -> PathBuf {
    plugin_dir.join(name).join(format!("{name}.wasm"))
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_wasm_path_matches_layout() {
        let path = plugin_wasm_path(Path::new("/opt/plugins"), "http");
        assert_eq!(path, PathBuf::from("/opt/plugins/http/http.wasm"));
    }

    #[test]
    fn hash_bytes_is_stable_and_distinguishes_content() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }
}
