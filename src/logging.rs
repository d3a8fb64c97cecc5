//! Tracing setup for binaries and tests embedding the engine.
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global subscriber filtered by `RUST_LOG`, defaulting to
/// `kyc_onboarding=<level>`. Returns `false` if a subscriber was already set.
pub fn init_with_level(level: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kyc_onboarding={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

pub fn init() -> bool {
    init_with_level("info")
}

#[cfg(test)]
mod tests {
    #[test]
    fn second_init_is_a_no_op() {
        super::init();
        assert!(!super::init());
    }
}
