use std::sync::LazyLock;

/// Quota-shared model groups: one upstream counter covers every model whose
/// name starts with one of the listed prefixes. Pool rows are keyed by the
/// group name, not the raw model name.
///
/// Order matters; first matching prefix wins.
static QUOTA_GROUPS: LazyLock<Vec<(&'static str, Vec<&'static str>)>> = LazyLock::new(|| {
    vec![
        ("gemini-3-pro", vec!["gemini-3-pro"]),
        ("claude", vec!["claude"]),
        ("qwen3-coder", vec!["qwen3-coder"]),
    ]
});

/// Group key for a model name. A model outside every group is its own group.
pub fn quota_group(model: &str) -> &str {
    for (group, prefixes) in QUOTA_GROUPS.iter() {
        if prefixes.iter().any(|p| model.starts_with(p)) {
            return group;
        }
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouped_models_collapse_to_one_key() {
        assert_eq!(quota_group("gemini-3-pro-preview"), "gemini-3-pro");
        assert_eq!(quota_group("gemini-3-pro-image"), "gemini-3-pro");
        assert_eq!(quota_group("claude-sonnet-4-5"), "claude");
        assert_eq!(quota_group("claude-sonnet-4-5-thinking"), "claude");
    }

    #[test]
    fn ungrouped_models_map_to_themselves() {
        assert_eq!(quota_group("gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(quota_group("gemini-3-flash"), "gemini-3-flash");
    }
}
