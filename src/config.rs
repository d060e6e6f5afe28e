//! # Feature Flags
//!
//! The resolver core has exactly one piece of process-wide configuration:
//! whether per-method timeouts are enabled. Everything else (bootstrap,
//! transport, deployment settings) belongs to the host and is out of scope
//! here, so this module is deliberately thin compared to the settings
//! layer a full control-plane binary would carry.

use once_cell::sync::OnceCell;

pub(crate) const ENABLE_TIMEOUT_ENV: &str = "GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT";

static ENABLE_TIMEOUT: OnceCell<bool> = OnceCell::new();

/// Whether the config selector should emit a per-method timeout service
/// config (section 6). Read once per process from
/// `GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT`: unset or any value other than a
/// case-insensitive `"false"` means enabled.
pub fn enable_timeouts() -> bool {
    *ENABLE_TIMEOUT.get_or_init(read_enable_timeout_env)
}

fn read_enable_timeout_env() -> bool {
    match std::env::var(ENABLE_TIMEOUT_ENV) {
        Ok(value) => !value.eq_ignore_ascii_case("false"),
        Err(_) => true,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::compute_for_test;

    #[test]
    fn unset_env_enables_timeouts() {
        std::env::remove_var("GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT");
        assert!(compute_for_test());
    }

    #[test]
    fn explicit_false_disables_timeouts() {
        std::env::set_var("GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT", "false");
        assert!(!compute_for_test());
        std::env::remove_var("GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT");
    }

    #[test]
    fn explicit_true_enables_timeouts() {
        std::env::set_var("GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT", "TRUE");
        assert!(compute_for_test());
        std::env::remove_var("GRPC_XDS_EXPERIMENTAL_ENABLE_TIMEOUT");
    }
}
