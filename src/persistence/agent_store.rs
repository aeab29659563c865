//! Agent roster store
//!
//! One JSON file per agent under the agents directory. Profiles are
//! read-only for the lifetime of a run; only the out-of-process optimizer
//! rewrites them. An empty directory seeds a default roster so a fresh
//! checkout trades with sensible agents.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::AgentProfile;
use crate::error::Result;

const DEFAULT_STYLES: &[(&str, &str)] = &[
    ("trend_following", "1.2"),
    ("momentum", "1.1"),
    ("mean_reversion", "0.9"),
];

/// Load all agent profiles, seeding defaults for the configured symbols
/// when the directory holds none.
pub fn load_roster(agents_dir: &Path, symbols: &[String]) -> Result<Vec<AgentProfile>> {
    std::fs::create_dir_all(agents_dir)?;
    let mut profiles = Vec::new();

    for entry in std::fs::read_dir(agents_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<AgentProfile>(&raw) {
            Ok(profile) => profiles.push(profile),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unparseable agent file");
            }
        }
    }

    if profiles.is_empty() {
        info!("no agent files found, seeding default roster");
        profiles = seed_default_roster(agents_dir, symbols)?;
    }

    // An agent for a symbol the engine does not trade is configuration
    // drift, not an error; drop it with a warning.
    profiles.retain(|p| {
        let known = symbols.contains(&p.symbol);
        if !known {
            warn!(agent_id = %p.agent_id, symbol = %p.symbol, "agent symbol not in trading set, ignoring");
        }
        known
    });

    Ok(profiles)
}

fn seed_default_roster(agents_dir: &Path, symbols: &[String]) -> Result<Vec<AgentProfile>> {
    let mut profiles = Vec::new();
    for symbol in symbols {
        for (style, weight) in DEFAULT_STYLES {
            let profile = AgentProfile {
                agent_id: format!("{}_{}", symbol.to_lowercase(), style),
                symbol: symbol.clone(),
                style_tag: style.to_string(),
                base_weight: weight.parse().unwrap_or(Decimal::ONE),
                performance_multiplier: Decimal::ONE,
                config: serde_json::json!({}),
            };
            let path = agents_dir.join(format!("{}.json", profile.agent_id));
            std::fs::write(&path, serde_json::to_string_pretty(&profile)?)?;
            profiles.push(profile);
        }
    }
    Ok(profiles)
}

/// Validate the weight band on a loaded roster, clamping outliers.
pub fn sanitize_weights(profiles: &mut [AgentProfile]) {
    for profile in profiles {
        if profile.base_weight < dec!(0.7) || profile.base_weight > dec!(1.3) {
            warn!(
                agent_id = %profile.agent_id,
                base_weight = %profile.base_weight,
                "base weight outside [0.7, 1.3], clamping"
            );
            profile.base_weight = profile.base_weight.clamp(dec!(0.7), dec!(1.3));
        }
    }
}
