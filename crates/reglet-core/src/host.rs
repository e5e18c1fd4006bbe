//! Host functions (C4): the `reglet_host` module exported into every guest.
//!
//! Every export here has the shape `(i64) -> i64`, carrying a packed
//! request/response pointer (§4.2). [`StoreState`] is the `wasmtime`
//! store data a plugin instance carries for the lifetime of one
//! `observe`/`describe`/`schema` call; it is what lets a host function
//! recover which plugin is calling it and what that plugin is allowed
//! to do, without any global or thread-local state.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use wasmtime::{Caller, Linker, Memory};

use crate::capability::{self, CapabilityKind, GrantSet};
use crate::error::RegletError;
use crate::netfilter;
use crate::wire::{self, CallContext, ContextEnvelope, ErrorDetail};

const KNOWN_SHELLS: &[&str] = &["sh", "bash", "dash", "zsh", "ksh", "csh", "tcsh", "fish"];

/// Store data for one plugin instance, live for exactly one guest call
/// (§4.5 step 1: a fresh instance per call, so this never outlives it).
pub struct StoreState {
    pub wasi: wasmtime_wasi::preview1::WasiP1Ctx,
    pub plugin_name: String,
    pub grants: GrantSet,
    /// Cancellation/deadline budget for the whole call, inherited by
    /// every host function this instance invokes as the `parent` of
    /// its own derived [`CallContext`].
    pub parent_token: CancellationToken,
    /// Linear memory growth ceiling, enforced via [`wasmtime::ResourceLimiter`]
    /// (`default_plugin_memory_pages`, §3's engine configuration).
    pub memory_limit_bytes: usize,
}

impl StoreState {
    pub fn new(
        wasi: wasmtime_wasi::preview1::WasiP1Ctx,
        plugin_name: impl Into<String>,
        grants: GrantSet,
        parent_token: CancellationToken,
        memory_limit_bytes: usize,
    ) -> Self {
        StoreState { wasi, plugin_name: plugin_name.into(), grants, parent_token, memory_limit_bytes }
    }
}

impl wasmtime::ResourceLimiter for StoreState {
    fn memory_growing(&mut self, _current: usize, desired: usize, _maximum: Option<usize>) -> wasmtime::Result<bool> {
        Ok(desired <= self.memory_limit_bytes)
    }

    fn table_growing(&mut self, _current: usize, desired: usize, maximum: Option<usize>) -> wasmtime::Result<bool> {
        Ok(maximum.map_or(true, |max| desired <= max))
    }
}

/// Shared, cross-call state the host functions depend on: the resolver
/// used by C3, the HTTP client's TLS config, and the engine config
/// knobs that bound host-function behavior.
pub struct HostContext {
    pub resolver: hickory_resolver::TokioResolver,
    pub tls_config: Arc<rustls::ClientConfig>,
    pub http_body_limit_bytes: usize,
    pub http_client_timeout: Duration,
}

impl HostContext {
    /// Build a `HostContext` wired to the system resolver and the
    /// platform's native trust store. The host application (or a test)
    /// owns the resulting value and hands it to [`crate::runtime::Runtime::new`].
    pub fn new(http_body_limit_bytes: usize, http_client_timeout: Duration) -> Result<Self, RegletError> {
        let resolver =
            hickory_resolver::TokioResolver::tokio(hickory_resolver::config::ResolverConfig::default(), hickory_resolver::config::ResolverOpts::default());

        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = roots.add(cert);
        }
        let tls_config = rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();

        Ok(HostContext { resolver, tls_config: Arc::new(tls_config), http_body_limit_bytes, http_client_timeout })
    }
}

/// Register every `reglet_host` export into `linker`.
pub fn register(linker: &mut Linker<StoreState>, ctx: Arc<HostContext>) -> Result<(), RegletError> {
    let c = ctx.clone();
    linker
        .func_wrap_async("reglet_host", "dns_lookup", move |mut caller: Caller<'_, StoreState>, packed: i64| {
            let c = c.clone();
            Box::new(async move { handle_dns_lookup(&mut caller, &c, packed).await })
        })
        .map_err(|e| RegletError::internal(format!("failed to register dns_lookup: {e}")))?;

    let c = ctx.clone();
    linker
        .func_wrap_async("reglet_host", "http_request", move |mut caller: Caller<'_, StoreState>, packed: i64| {
            let c = c.clone();
            Box::new(async move { handle_http_request(&mut caller, &c, packed).await })
        })
        .map_err(|e| RegletError::internal(format!("failed to register http_request: {e}")))?;

    let c = ctx.clone();
    linker
        .func_wrap_async("reglet_host", "tcp_connect", move |mut caller: Caller<'_, StoreState>, packed: i64| {
            let c = c.clone();
            Box::new(async move { handle_tcp_connect(&mut caller, &c, packed).await })
        })
        .map_err(|e| RegletError::internal(format!("failed to register tcp_connect: {e}")))?;

    linker
        .func_wrap_async("reglet_host", "exec_command", move |mut caller: Caller<'_, StoreState>, packed: i64| {
            Box::new(async move { handle_exec_command(&mut caller, packed).await })
        })
        .map_err(|e| RegletError::internal(format!("failed to register exec_command: {e}")))?;

    linker
        .func_wrap_async("reglet_host", "log_message", move |mut caller: Caller<'_, StoreState>, packed: i64| {
            Box::new(async move { handle_log_message(&mut caller, packed).await })
        })
        .map_err(|e| RegletError::internal(format!("failed to register log_message: {e}")))?;

    Ok(())
}

// --- shared request/response plumbing -------------------------------------

fn get_memory(caller: &mut Caller<'_, StoreState>) -> Result<Memory, RegletError> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| RegletError::internal("guest module does not export linear memory"))
}

/// Read and JSON-decode the request at `packed` (§4.4 step 1).
fn read_request<T: for<'de> Deserialize<'de>>(caller: &mut Caller<'_, StoreState>, packed: i64) -> Result<T, RegletError> {
    let (ptr, len) = wire::unpack(packed as u64);
    let memory = get_memory(caller)?;
    let data = memory.data(&caller);
    let end = ptr as usize + len as usize;
    let slice = data
        .get(ptr as usize..end)
        .ok_or_else(|| RegletError::internal(format!("short read at guest ptr {ptr} len {len}")))?;
    wire::decode(slice)
}

#[derive(Serialize)]
struct HostResponse<T: Serialize> {
    #[serde(flatten)]
    ok: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
}

/// Encode `result` as a response envelope, call the guest's `allocate`,
/// write the bytes, and return the packed response pointer (§4.4 step 7).
async fn respond<T: Serialize>(caller: &mut Caller<'_, StoreState>, result: Result<T, RegletError>) -> i64 {
    let envelope = match result {
        Ok(ok) => HostResponse { ok: Some(ok), error: None },
        Err(err) => HostResponse { ok: None, error: Some((&err).into()) },
    };
    let bytes = match wire::encode(&envelope) {
        Ok(bytes) => bytes,
        Err(_) => br#"{"error":{"message":"failed to encode host response","type":"internal"}}"#.to_vec(),
    };

    let allocate = match caller.get_export("allocate").and_then(|e| e.into_func()) {
        Some(f) => f,
        None => return wire::pack(0, 0) as i64,
    };
    let allocate = match allocate.typed::<u32, u32>(&caller) {
        Ok(f) => f,
        Err(_) => return wire::pack(0, 0) as i64,
    };
    let ptr = match allocate.call_async(&mut *caller, bytes.len() as u32).await {
        Ok(ptr) if ptr != 0 => ptr,
        _ => return wire::pack(0, 0) as i64,
    };
    let memory = match get_memory(caller) {
        Ok(m) => m,
        Err(_) => return wire::pack(0, 0) as i64,
    };
    if memory.write(&mut *caller, ptr as usize, &bytes).is_err() {
        return wire::pack(0, 0) as i64;
    }
    wire::pack(ptr, bytes.len() as u32) as i64
}

fn derive_context(caller: &Caller<'_, StoreState>, env: &ContextEnvelope) -> CallContext {
    CallContext::derive(&caller.data().parent_token, env)
}

fn plugin_name(caller: &Caller<'_, StoreState>) -> String {
    caller.data().plugin_name.clone()
}

fn grants(caller: &Caller<'_, StoreState>) -> GrantSet {
    caller.data().grants.clone()
}

// --- dns_lookup -------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Ns,
}

#[derive(Deserialize)]
struct DnsLookupRequest {
    context: ContextEnvelope,
    host: String,
    record_type: RecordType,
    #[serde(default)]
    nameserver: Option<String>,
}

#[derive(Serialize)]
struct DnsLookupResponse {
    records: Vec<String>,
}

async fn handle_dns_lookup(caller: &mut Caller<'_, StoreState>, ctx: &Arc<HostContext>, packed: i64) -> i64 {
    let result = dns_lookup_inner(caller, ctx, packed).await;
    respond(caller, result).await
}

async fn dns_lookup_inner(
    caller: &mut Caller<'_, StoreState>,
    ctx: &Arc<HostContext>,
    packed: i64,
) -> Result<DnsLookupResponse, RegletError> {
    let request: DnsLookupRequest = read_request(caller, packed)?;
    let call_ctx = derive_context(caller, &request.context);
    capability::check(&grants(caller), CapabilityKind::Network, "outbound:53")?;

    let resolver = match &request.nameserver {
        Some(ns) => custom_resolver(ns)?,
        None => ctx.resolver.clone(),
    };

    let records = call_ctx
        .run(async move {
            use hickory_resolver::proto::rr::RecordType as ProtoRecordType;
            let result: Result<Vec<String>, RegletError> = match request.record_type {
                RecordType::A => resolver
                    .ipv4_lookup(request.host.as_str())
                    .await
                    .map(|r| r.iter().map(|ip| ip.0.to_string()).collect())
                    .map_err(RegletError::from),
                RecordType::Aaaa => resolver
                    .ipv6_lookup(request.host.as_str())
                    .await
                    .map(|r| r.iter().map(|ip| ip.0.to_string()).collect())
                    .map_err(RegletError::from),
                RecordType::Cname => resolver
                    .lookup(request.host.as_str(), ProtoRecordType::CNAME)
                    .await
                    .map(|r| r.iter().map(|rdata| rdata.to_string()).collect())
                    .map_err(RegletError::from),
                RecordType::Mx => resolver
                    .mx_lookup(request.host.as_str())
                    .await
                    .map(|r| r.iter().map(|mx| format!("{} {}", mx.preference(), mx.exchange())).collect())
                    .map_err(RegletError::from),
                RecordType::Txt => resolver
                    .txt_lookup(request.host.as_str())
                    .await
                    .map(|r| r.iter().map(|t| t.to_string()).collect())
                    .map_err(RegletError::from),
                RecordType::Ns => resolver
                    .ns_lookup(request.host.as_str())
                    .await
                    .map(|r| r.iter().map(|ns| ns.to_string()).collect())
                    .map_err(RegletError::from),
            };
            result
        })
        .await??;

    Ok(DnsLookupResponse { records })
}

fn custom_resolver(nameserver: &str) -> Result<hickory_resolver::TokioResolver, RegletError> {
    use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};

    let addr: SocketAddr = nameserver
        .parse()
        .map_err(|_| RegletError::config(format!("invalid nameserver address '{nameserver}'")))?;
    let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
    let config = ResolverConfig::from_parts(None, vec![], group);
    Ok(hickory_resolver::TokioResolver::tokio(config, Default::default()))
}

// --- http_request ------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

#[derive(Deserialize)]
struct HttpRequestRequest {
    context: ContextEnvelope,
    url: String,
    method: HttpMethod,
    #[serde(default)]
    headers: HashMap<String, Vec<String>>,
    /// Base64-encoded request body.
    #[serde(default)]
    body: Option<String>,
}

#[derive(Serialize)]
struct HttpRequestResponse {
    status: u16,
    headers: HashMap<String, Vec<String>>,
    /// Base64-encoded response body.
    body: String,
    body_truncated: bool,
}

async fn handle_http_request(caller: &mut Caller<'_, StoreState>, ctx: &Arc<HostContext>, packed: i64) -> i64 {
    let result = http_request_inner(caller, ctx, packed).await;
    respond(caller, result).await
}

async fn http_request_inner(
    caller: &mut Caller<'_, StoreState>,
    ctx: &Arc<HostContext>,
    packed: i64,
) -> Result<HttpRequestResponse, RegletError> {
    let request: HttpRequestRequest = read_request(caller, packed)?;
    let call_ctx = derive_context(caller, &request.context);
    let plugin = plugin_name(caller);
    let plugin_grants = grants(caller);

    let url = reqwest::Url::parse(&request.url).map_err(|e| RegletError::config(format!("invalid URL '{}': {e}", request.url)))?;
    let host = url.host_str().ok_or_else(|| RegletError::config(format!("URL '{}' has no host", request.url)))?.to_string();
    let port = url.port_or_known_default().ok_or_else(|| RegletError::config("URL has no resolvable port"))?;

    capability::check(&plugin_grants, CapabilityKind::Network, &format!("outbound:{port}"))?;
    let validated_ip = netfilter::resolve_and_validate(&ctx.resolver, &host, &plugin, &plugin_grants).await?;
    let addr: SocketAddr = SocketAddr::new(validated_ip.parse::<IpAddr>().expect("resolve_and_validate returns a literal IP"), port);

    let client = reqwest::Client::builder()
        .resolve(&host, addr)
        .timeout(ctx.http_client_timeout)
        .build()
        .map_err(RegletError::from)?;

    let mut builder = client.request(request.method.as_reqwest(), url);
    for (name, values) in &request.headers {
        for value in values {
            builder = builder.header(name, value);
        }
    }
    if let Some(body) = &request.body {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| RegletError::config(format!("invalid base64 request body: {e}")))?;
        builder = builder.body(bytes);
    }

    let body_limit = ctx.http_body_limit_bytes;
    let response = call_ctx.run(builder.send()).await??;

    let status = response.status().as_u16();
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.entry(name.to_string()).or_default().push(v.to_string());
        }
    }

    let (body, truncated) = read_body_with_limit(response, body_limit).await?;

    use base64::Engine;
    Ok(HttpRequestResponse {
        status,
        headers,
        body: base64::engine::general_purpose::STANDARD.encode(&body),
        body_truncated: truncated,
    })
}

async fn read_body_with_limit(mut response: reqwest::Response, limit: usize) -> Result<(Vec<u8>, bool), RegletError> {
    let mut buf = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response.chunk().await.map_err(RegletError::from)? {
        if buf.len() >= limit {
            truncated = true;
            continue;
        }
        let remaining = limit - buf.len();
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            truncated = true;
        } else {
            buf.extend_from_slice(&chunk);
        }
    }
    Ok((buf, truncated))
}

// --- tcp_connect ---------------------------------------------------------------

#[derive(Deserialize)]
struct TcpConnectRequest {
    context: ContextEnvelope,
    host: String,
    port: u16,
    #[serde(default)]
    tls: Option<TlsOptions>,
}

#[derive(Deserialize)]
struct TlsOptions {
    enabled: bool,
}

#[derive(Serialize, Default)]
struct TlsInfo {
    version: String,
    cipher_suite: String,
    server_name: String,
    peer_subject: Option<String>,
    peer_issuer: Option<String>,
    peer_not_after: Option<String>,
}

#[derive(Serialize)]
struct TcpConnectResponse {
    connected: bool,
    address: String,
    remote_addr: String,
    local_addr: String,
    response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<TlsInfo>,
}

async fn handle_tcp_connect(caller: &mut Caller<'_, StoreState>, ctx: &Arc<HostContext>, packed: i64) -> i64 {
    let result = tcp_connect_inner(caller, ctx, packed).await;
    respond(caller, result).await
}

async fn tcp_connect_inner(
    caller: &mut Caller<'_, StoreState>,
    ctx: &Arc<HostContext>,
    packed: i64,
) -> Result<TcpConnectResponse, RegletError> {
    let request: TcpConnectRequest = read_request(caller, packed)?;
    let call_ctx = derive_context(caller, &request.context);
    let plugin = plugin_name(caller);
    let plugin_grants = grants(caller);

    capability::check(&plugin_grants, CapabilityKind::Network, &format!("outbound:{}", request.port))?;
    let validated_ip = netfilter::resolve_and_validate(&ctx.resolver, &request.host, &plugin, &plugin_grants).await?;
    let addr: SocketAddr = SocketAddr::new(validated_ip.parse().expect("resolve_and_validate returns a literal IP"), request.port);

    let started = Instant::now();
    let stream = call_ctx.run(tokio::net::TcpStream::connect(addr)).await??;
    let local_addr = stream.local_addr().map_err(RegletError::from)?;

    let tls_info = if request.tls.map(|t| t.enabled).unwrap_or(false) {
        Some(negotiate_tls(ctx, stream, &request.host, &call_ctx).await?)
    } else {
        None
    };

    Ok(TcpConnectResponse {
        connected: true,
        address: format!("{}:{}", request.host, request.port),
        remote_addr: addr.to_string(),
        local_addr: local_addr.to_string(),
        response_time_ms: started.elapsed().as_millis() as u64,
        tls: tls_info,
    })
}

async fn negotiate_tls(
    ctx: &Arc<HostContext>,
    stream: tokio::net::TcpStream,
    host: &str,
    call_ctx: &CallContext,
) -> Result<TlsInfo, RegletError> {
    let connector = tokio_rustls::TlsConnector::from(ctx.tls_config.clone());
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| RegletError::config(format!("'{host}' is not a valid TLS server name")))?;

    let tls_stream = call_ctx.run(connector.connect(server_name, stream)).await??;
    let (_, session) = tls_stream.get_ref();

    let version = session.protocol_version().map(|v| format!("{v:?}")).unwrap_or_default();
    let cipher_suite = session.negotiated_cipher_suite().map(|c| format!("{:?}", c.suite())).unwrap_or_default();

    let mut info = TlsInfo { version, cipher_suite, server_name: host.to_string(), ..Default::default() };

    if let Some(certs) = session.peer_certificates() {
        if let Some(leaf) = certs.first() {
            if let Ok((_, cert)) = x509_parser::parse_x509_certificate(leaf.as_ref()) {
                info.peer_subject = Some(cert.subject().to_string());
                info.peer_issuer = Some(cert.issuer().to_string());
                info.peer_not_after = Some(cert.validity().not_after.to_string());
            }
        }
    }

    Ok(info)
}

// --- exec_command --------------------------------------------------------------

#[derive(Deserialize)]
struct ExecCommandRequest {
    context: ContextEnvelope,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Serialize)]
struct ExecCommandResponse {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

async fn handle_exec_command(caller: &mut Caller<'_, StoreState>, packed: i64) -> i64 {
    let result = exec_command_inner(caller, packed).await;
    respond(caller, result).await
}

fn is_shell_invocation(command: &str, args: &[String]) -> bool {
    let basename = Path::new(command).file_name().and_then(|n| n.to_str()).unwrap_or(command);
    KNOWN_SHELLS.contains(&basename) && !args.is_empty()
}

async fn exec_command_inner(caller: &mut Caller<'_, StoreState>, packed: i64) -> Result<ExecCommandResponse, RegletError> {
    let request: ExecCommandRequest = read_request(caller, packed)?;
    let call_ctx = derive_context(caller, &request.context);
    let plugin_grants = grants(caller);

    capability::check(&plugin_grants, CapabilityKind::Exec, &request.command)?;

    if is_shell_invocation(&request.command, &request.args) {
        tracing::event!(Level::INFO, plugin = %plugin_name(caller), command = %request.command, "shell execution");
    }

    let mut cmd = tokio::process::Command::new(&request.command);
    cmd.args(&request.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &request.env {
        cmd.env(key, value);
    }

    let output = match call_ctx.run(async move { cmd.output().await }).await {
        Ok(Ok(output)) => output,
        Ok(Err(io_err)) => return Err(RegletError::from(io_err)),
        Err(timeout_err) => return Err(timeout_err.with_code("ETIMEDOUT")),
    };

    Ok(ExecCommandResponse {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}

// --- log_message -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Deserialize)]
struct LogMessageRequest {
    level: LogLevel,
    message: String,
    #[serde(default)]
    attrs: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Serialize)]
struct LogMessageResponse {}

async fn handle_log_message(caller: &mut Caller<'_, StoreState>, packed: i64) -> i64 {
    let result = log_message_inner(caller, packed);
    respond(caller, result).await
}

fn log_message_inner(caller: &mut Caller<'_, StoreState>, packed: i64) -> Result<LogMessageResponse, RegletError> {
    let request: LogMessageRequest = read_request(caller, packed)?;
    let plugin = plugin_name(caller);
    let attrs = request.attrs.map(serde_json::Value::Object);

    match request.level {
        LogLevel::Trace => tracing::event!(Level::TRACE, plugin = %plugin, attrs = ?attrs, "{}", request.message),
        LogLevel::Debug => tracing::event!(Level::DEBUG, plugin = %plugin, attrs = ?attrs, "{}", request.message),
        LogLevel::Info => tracing::event!(Level::INFO, plugin = %plugin, attrs = ?attrs, "{}", request.message),
        LogLevel::Warn => tracing::event!(Level::WARN, plugin = %plugin, attrs = ?attrs, "{}", request.message),
        LogLevel::Error => tracing::event!(Level::ERROR, plugin = %plugin, attrs = ?attrs, "{}", request.message),
    }

    Ok(LogMessageResponse {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_shell_invocation_only_with_args() {
        assert!(is_shell_invocation("/bin/bash", &["-c".to_string(), "echo hi".to_string()]));
        assert!(!is_shell_invocation("/bin/bash", &[]));
        assert!(!is_shell_invocation("/usr/bin/curl", &["https://example.com".to_string()]));
    }

    #[test]
    fn http_method_maps_to_reqwest() {
        assert_eq!(HttpMethod::Post.as_reqwest(), reqwest::Method::POST);
    }
}
