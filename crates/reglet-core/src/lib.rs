//! Plugin runtime, execution engine, and capability manager for Reglet
//! compliance profiles.
//!
//! Reglet compiles a YAML profile into a DAG of controls, loads a WASM
//! plugin per observation, and runs each plugin in a fresh sandboxed
//! instance with capability-scoped access to the network, filesystem,
//! environment, and process execution. This crate is the engine; it has
//! no CLI and never installs a logging subscriber — that's the host
//! application's job (see [`config`]).
//!
//! ## Call path
//!
//! `profile` compiles and validates a YAML document into a
//! [`profile::CompiledProfile`]. `manager` reconciles the capabilities
//! its plugins declare against persisted or interactively-granted
//! permissions into a [`capability::GrantMap`]. `engine` applies
//! `filter`, builds the `dag`, and executes level by level, calling into
//! `runtime`/`plugin` for each observation. `plugin` instantiates the
//! WASM module fresh per call and registers `host`'s exports, which in
//! turn enforce `capability` grants and route network calls through
//! `netfilter`'s SSRF protection. `wire` is the packed-pointer JSON codec
//! everything above it speaks. `error`/`result` are the shared error and
//! outcome types threaded through every layer.

pub mod capability;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod filter;
pub mod host;
pub mod manager;
pub mod netfilter;
pub mod plugin;
pub mod profile;
pub mod result;
pub mod runtime;
pub mod wire;

pub use capability::{Capability, CapabilityKind, GrantMap, GrantSet};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ErrorType, RegletError};
pub use filter::{CompiledFilter, FilterSpec};
pub use manager::CapabilityManager;
pub use profile::{CompiledProfile, Profile, Severity};
pub use result::{ControlResult, ExecutionResult, Status};
pub use runtime::Runtime;
