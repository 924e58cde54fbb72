//! 账本版本与构建元信息

/// crate semver，来自 Cargo.toml
pub const LEDGER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成）
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 用于日志输出的版本串，例如 `0.1.0 (abc1234)`
pub fn version_string() -> String {
    format!("{} ({})", LEDGER_VERSION, GIT_SHA)
}
