use crate::analysis::normalize::is_absent;
use crate::models::metrics::ScoringInputs;
use crate::models::server::{
    PopularityTier, NODE_ECOSYSTEM_LABEL, PYTHON_ECOSYSTEM_LABEL, UNKNOWN_LABEL,
};

/// First tier whose star OR download threshold is met, checked top-down.
pub fn popularity_tier(inputs: &ScoringInputs) -> PopularityTier {
    let stars = inputs.stars.unwrap_or(0);
    let downloads = inputs.downloads_week;

    if stars >= 1000 || downloads >= 10_000 {
        PopularityTier::TopTier
    } else if stars >= 100 || downloads >= 1_000 {
        PopularityTier::Popular
    } else if stars >= 10 || downloads >= 100 {
        PopularityTier::Growing
    } else {
        PopularityTier::Emerging
    }
}

/// npm package beats PyPI package beats the repository language.
pub fn ecosystem_label(
    npm_package: Option<&str>,
    pypi_package: Option<&str>,
    language: Option<&str>,
) -> String {
    let has = |v: Option<&str>| v.is_some_and(|s| !is_absent(s));

    if has(npm_package) {
        NODE_ECOSYSTEM_LABEL.to_string()
    } else if has(pypi_package) {
        PYTHON_ECOSYSTEM_LABEL.to_string()
    } else {
        language
            .filter(|l| !is_absent(l))
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }
}
