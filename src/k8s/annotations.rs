use std::collections::BTreeMap;

/// Runners annotated with `"true"` get no disruption budget for their worker pods.
pub const DISRUPTIBLE_ANNOTATION_KEY: &str = "kube-actions.inloco.com.br/disruptible";

pub fn is_disruptible(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(DISRUPTIBLE_ANNOTATION_KEY)
        .is_some_and(|value| value == "true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::absent(None, false)]
    #[case::enabled(Some("true"), true)]
    #[case::disabled(Some("false"), false)]
    #[case::not_a_bool(Some("yes"), false)]
    fn test_is_disruptible(#[case] value: Option<&str>, #[case] expected: bool) {
        let annotations = value
            .map(|value| BTreeMap::from([(DISRUPTIBLE_ANNOTATION_KEY.to_string(), value.to_string())]))
            .unwrap_or_default();
        assert_eq!(is_disruptible(&annotations), expected);
    }
}
