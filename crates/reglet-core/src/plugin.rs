//! Plugin instance (C5): one fresh WASM instance per call.
//!
//! A [`Plugin`] wraps a compiled module plus the pieces every instance
//! needs to run: the engine, a shared linker with the host module and
//! WASI already registered, and a memory ceiling. Every `observe`,
//! `describe`, and `schema` call creates its own [`wasmtime::Store`]
//! and [`wasmtime::Instance`] and tears both down on return — linear
//! memory is never shared across concurrent calls (§4.5, §5).

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wasmtime::{Engine, Instance, Linker, Module, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::capability::{Capability, GrantSet};
use crate::error::{ErrorType, RegletError};
use crate::host::StoreState;
use crate::result::Evidence;
use crate::wire::{self, ErrorDetail};

/// Declared identity and capability requirements a plugin reports from
/// its `describe` export.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Raw JSON Schema object describing `observe`'s expected `config` shape.
#[derive(Debug, Clone)]
pub struct ConfigSchema(pub serde_json::Value);

/// Outcome of one `observe` call before engine-level status aggregation
/// (§4.5 step 7: distinguishes a plugin execution error from evidence).
pub enum ObserveOutcome {
    Evidence(Evidence),
    PluginError(ErrorDetail),
}

pub struct Plugin {
    name: String,
    engine: Engine,
    module: Module,
    linker: Arc<Linker<StoreState>>,
    memory_limit_bytes: usize,
    info: Mutex<Option<PluginInfo>>,
    schema: Mutex<Option<ConfigSchema>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, engine: Engine, module: Module, linker: Arc<Linker<StoreState>>, memory_limit_bytes: usize) -> Self {
        Plugin { name: name.into(), engine, module, linker, memory_limit_bytes, info: Mutex::new(None), schema: Mutex::new(None) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `describe`, cached under a mutex after the first successful call
    /// (§4.5 last paragraph).
    pub async fn describe(&self, grants: GrantSet, parent_token: CancellationToken) -> Result<PluginInfo, RegletError> {
        let mut cached = self.info.lock().await;
        if let Some(info) = cached.as_ref() {
            return Ok(info.clone());
        }
        let bytes = self.call_guest_fn("describe", None, grants, parent_token).await?;
        let info: PluginInfo = wire::decode(&bytes)?;
        *cached = Some(info.clone());
        Ok(info)
    }

    /// `schema`, cached the same way as `describe`.
    pub async fn schema(&self, grants: GrantSet, parent_token: CancellationToken) -> Result<ConfigSchema, RegletError> {
        let mut cached = self.schema.lock().await;
        if let Some(schema) = cached.as_ref() {
            return Ok(schema.clone_value());
        }
        let bytes = self.call_guest_fn("schema", None, grants, parent_token).await?;
        let value: serde_json::Value = wire::decode(&bytes)?;
        *cached = Some(ConfigSchema(value.clone()));
        Ok(ConfigSchema(value))
    }

    /// `observe`, never cached: every call carries distinct config.
    pub async fn observe(
        &self,
        config: &serde_json::Map<String, serde_json::Value>,
        grants: GrantSet,
        parent_token: CancellationToken,
    ) -> Result<ObserveOutcome, RegletError> {
        let input = serde_json::to_vec(config)?;
        let bytes = self.call_guest_fn("observe", Some(&input), grants, parent_token).await?;
        interpret_observe_result(&bytes)
    }

    fn build_wasi(&self) -> Result<WasiP1Ctx, RegletError> {
        WasiCtxBuilder::new()
            .inherit_stdio()
            .preopened_dir(".", "/", DirPerms::all(), FilePerms::all())
            .map_err(|e| RegletError::internal(format!("failed to mount plugin filesystem view: {e}")))?
            .build_p1()
            .map_err(|e| RegletError::internal(format!("failed to build WASI context: {e}")))
    }

    /// Run the full per-call protocol from §4.5 step 1-6 against a
    /// single guest export, returning the raw response bytes.
    async fn call_guest_fn(
        &self,
        export_name: &str,
        input: Option<&[u8]>,
        grants: GrantSet,
        parent_token: CancellationToken,
    ) -> Result<Vec<u8>, RegletError> {
        let wasi = self.build_wasi()?;
        let state = StoreState::new(wasi, self.name.clone(), grants, parent_token, self.memory_limit_bytes);
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| state as &mut dyn wasmtime::ResourceLimiter);

        let instance = self
            .linker
            .instantiate_async(&mut store, &self.module)
            .await
            .map_err(|e| RegletError::internal(format!("failed to instantiate plugin '{}': {e}", self.name)))?;

        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call_async(&mut store, ())
                .await
                .map_err(|e| RegletError::execution(format!("plugin '{}' _initialize failed: {e}", self.name)))?;
        }

        let mut input_buf: Option<(u32, u32)> = None;

        let packed_result = match input {
            Some(bytes) => {
                let allocate = instance
                    .get_typed_func::<u32, u32>(&mut store, "allocate")
                    .map_err(|e| RegletError::internal(format!("plugin '{}' does not export allocate: {e}", self.name)))?;
                let ptr = allocate
                    .call_async(&mut store, bytes.len() as u32)
                    .await
                    .map_err(|e| RegletError::internal(format!("plugin '{}' allocate call failed: {e}", self.name)))?;
                if ptr == 0 {
                    return Err(RegletError::internal(format!("plugin '{}' allocate returned a null pointer", self.name)));
                }
                let memory = instance
                    .get_memory(&mut store, "memory")
                    .ok_or_else(|| RegletError::internal(format!("plugin '{}' does not export linear memory", self.name)))?;
                memory
                    .write(&mut store, ptr as usize, bytes)
                    .map_err(|e| RegletError::internal(format!("failed writing to plugin '{}' memory: {e}", self.name)))?;
                input_buf = Some((ptr, bytes.len() as u32));

                let func = instance
                    .get_typed_func::<(u32, u32), u64>(&mut store, export_name)
                    .map_err(|e| RegletError::internal(format!("plugin '{}' does not export {export_name}: {e}", self.name)))?;
                func.call_async(&mut store, (ptr, bytes.len() as u32))
                    .await
                    .map_err(|e| RegletError::execution(format!("plugin '{}' {export_name} call failed: {e}", self.name)))?
            }
            None => {
                let func = instance
                    .get_typed_func::<(), u64>(&mut store, export_name)
                    .map_err(|e| RegletError::internal(format!("plugin '{}' does not export {export_name}: {e}", self.name)))?;
                func.call_async(&mut store, ())
                    .await
                    .map_err(|e| RegletError::execution(format!("plugin '{}' {export_name} call failed: {e}", self.name)))?
            }
        };

        let (out_ptr, out_len) = wire::unpack(packed_result);
        let result = read_guest_result(&instance, &mut store, out_ptr, out_len, &self.name, export_name);

        // §4.5 step 6: deallocate both buffers regardless of outcome.
        if let Ok(dealloc) = instance.get_typed_func::<(u32, u32), ()>(&mut store, "deallocate") {
            if let Some((ptr, len)) = input_buf {
                let _ = dealloc.call_async(&mut store, (ptr, len)).await;
            }
            if out_ptr != 0 && out_len != 0 {
                let _ = dealloc.call_async(&mut store, (out_ptr, out_len)).await;
            }
        }

        result
    }
}

fn read_guest_result(
    instance: &Instance,
    store: &mut Store<StoreState>,
    ptr: u32,
    len: u32,
    plugin_name: &str,
    export_name: &str,
) -> Result<Vec<u8>, RegletError> {
    if ptr == 0 || len == 0 {
        return Err(RegletError::internal(format!("plugin '{plugin_name}' {export_name} returned a null result")));
    }
    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or_else(|| RegletError::internal(format!("plugin '{plugin_name}' does not export linear memory")))?;
    let data = memory.data(&mut *store);
    let end = ptr as usize + len as usize;
    data.get(ptr as usize..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| RegletError::internal(format!("plugin '{plugin_name}' {export_name} result out of bounds")))
}

impl ConfigSchema {
    fn clone_value(&self) -> ConfigSchema {
        ConfigSchema(self.0.clone())
    }
}

/// Interpret the raw JSON an `observe` call returned, per §4.5 step 7.
fn interpret_observe_result(bytes: &[u8]) -> Result<ObserveOutcome, RegletError> {
    let raw: serde_json::Value = wire::decode(bytes)?;
    let obj = raw.as_object().ok_or_else(|| RegletError::internal("observe result must be a JSON object"))?;

    if obj.contains_key("error") && !obj.contains_key("status") {
        let message = value_as_plain_string(obj.get("error")).unwrap_or_else(|| "plugin execution error".to_string());
        return Ok(ObserveOutcome::PluginError(ErrorDetail { message, error_type: ErrorType::Execution, code: None, wrapped: None }));
    }

    let mut data = match obj.get("data") {
        Some(serde_json::Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(status) = obj.get("status") {
        data.entry("status".to_string()).or_insert_with(|| status.clone());
    }
    if let Some(error) = obj.get("error") {
        if let Some(message) = value_as_plain_string(Some(error)) {
            data.insert("error".to_string(), serde_json::Value::String(message));
        }
    }

    Ok(ObserveOutcome::Evidence(Evidence::new(data)))
}

fn value_as_plain_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}
