//! Sidecar constants: the virtiofs helper and the service-mesh proxy.

// ─── virtiofsd ────────────────────────────────────────────────────────────

/// Default location of the virtiofsd binary inside the sidecar image.
pub const VIRTIOFSD_BINARY: &str = "/usr/libexec/virtiofsd";

/// Directory under which each shared volume is mounted in the sidecar.
pub const VIRTIOFS_SHARED_DIR_ROOT: &str = "/";

/// virtiofsd cache policy.
pub const VIRTIOFS_CACHE_MODE: &str = "auto";

/// virtiofsd sandbox mode; the container already provides isolation.
pub const VIRTIOFS_SANDBOX_MODE: &str = "none";

/// Suffix appended to the control socket path to derive the placeholder socket.
pub const PLACEHOLDER_SOCKET_SUFFIX: &str = ".placeholder";

/// uid/gid of the unprivileged qemu user that must own the control socket.
pub const QEMU_USER_ID: u32 = 107;

// ─── Service-mesh proxy ───────────────────────────────────────────────────

/// Host the proxy sidecar listens on.
pub const PROXY_HOST: &str = "localhost";

/// Port serving the proxy's readiness endpoint.
pub const PROXY_HEALTH_CHECK_PORT: u16 = 15021;

/// Port serving the proxy's admin/telemetry endpoints.
pub const PROXY_TELEMETRY_PORT: u16 = 15020;

/// Readiness probe path.
pub const PROXY_HEALTH_PATH: &str = "/healthz/ready";

/// Path that asks the proxy to exit.
pub const PROXY_QUIT_PATH: &str = "/quitquitquit";

/// Value of the `server` response header identifying the proxy.
pub const PROXY_SERVER_HEADER: &str = "envoy";

/// Request timeout for proxy probes.
pub const PROXY_REQUEST_TIMEOUT_SECS: u64 = 3;
