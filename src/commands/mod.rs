//! Command-line front ends over the service handles.

pub mod config;
pub mod drive;
pub mod mail;
pub mod sheets;

pub use config::Config;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use crate::runtime::MockRuntime;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Command configuration pointed at a mock server with a readable key.
    pub(crate) fn test_config(server_url: &str, mut runtime: MockRuntime) -> Config<MockRuntime> {
        runtime.expect_is_file().return_const(true);
        Config::new(
            runtime,
            Arc::new(StaticTokenSource("cli-token".to_string())),
            PathBuf::from("/keys/sa.json"),
            Some(server_url.to_string()),
            Some(0.0),
        )
        .unwrap()
    }
}
