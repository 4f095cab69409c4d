use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Installs the fmt subscriber. `level` applies to the workspace's own
/// targets; everything else is held at WARN.
pub(crate) fn setup_tracing(level: Level) {
    let filter_layer = tracing_subscriber::filter::filter_fn(move |metadata| {
        let effective_level = if is_geoflow_target(metadata.target()) {
            level
        } else {
            Level::WARN
        };
        metadata.level() <= &effective_level
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter_layer))
        .init();
}

pub(crate) fn parse_level(value: &str) -> Option<Level> {
    match value.to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn is_geoflow_target(target: &str) -> bool {
    target.starts_with("geoflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn only_workspace_targets_follow_the_chosen_level() {
        assert!(is_geoflow_target("geoflow_core::engine"));
        assert!(is_geoflow_target("geoflow::headless"));
        assert!(!is_geoflow_target("wgpu_core::device"));
    }
}
