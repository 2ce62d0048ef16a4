//! Deterministic routing of changed paths to a provider subtree.

use crate::core::types::Provider;

/// Any changed path containing this marks the change as infrastructure-relevant.
pub const INFRA_MARKER: &str = "terraform/";

/// Where a set of changed paths should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRoute {
    /// Nothing under the infrastructure tree changed.
    NoInfrastructure,
    /// Infrastructure changed, but not inside a supported provider subtree.
    Unsupported,
    /// A supported provider subtree changed.
    Provider {
        provider: Provider,
        /// More than one provider subtree matched; `provider` is the last match.
        ambiguous: bool,
    },
}

/// Marker a path must contain to select `provider`, e.g. `terraform/aws/`.
pub fn provider_marker(provider: Provider) -> String {
    format!("{INFRA_MARKER}{}/", provider.as_str())
}

/// Route changed paths.
///
/// - `NoInfrastructure` if no path contains `terraform/` (including empty input).
/// - Otherwise the provider of the last path (in input order) that contains
///   `terraform/<provider>/`; within one path `gcp` is checked after `aws`.
/// - `Unsupported` if infrastructure changed but no provider marker matched.
pub fn route_changed_paths<P: AsRef<str>>(changed_paths: &[P]) -> ProviderRoute {
    let mut infrastructure = false;
    let mut selected: Option<Provider> = None;
    let mut seen: Vec<Provider> = Vec::new();

    for path in changed_paths {
        let path = path.as_ref();
        if !path.contains(INFRA_MARKER) {
            continue;
        }
        infrastructure = true;
        for provider in Provider::ALL {
            if path.contains(&provider_marker(provider)) {
                selected = Some(provider);
                if !seen.contains(&provider) {
                    seen.push(provider);
                }
            }
        }
    }

    match (infrastructure, selected) {
        (false, _) => ProviderRoute::NoInfrastructure,
        (true, None) => ProviderRoute::Unsupported,
        (true, Some(provider)) => ProviderRoute::Provider {
            provider,
            ambiguous: seen.len() > 1,
        },
    }
}
