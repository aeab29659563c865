pub mod provider;
pub mod rules;

pub use provider::{DecisionProvider, ProviderDecision, ProviderHarness};
pub use rules::IndicatorRuleProvider;
