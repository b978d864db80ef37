use crate::registry::ScenarioError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Eagerness {
    Low,
    Medium,
    High,
    Auto,
}

impl Eagerness {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "low" => Eagerness::Low,
            "medium" => Eagerness::Medium,
            "high" => Eagerness::High,
            "auto" => Eagerness::Auto,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServerVadParams {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl Default for ServerVadParams {
    fn default() -> Self {
        ServerVadParams {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 700,
            create_response: true,
            interrupt_response: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SemanticVadParams {
    pub eagerness: Eagerness,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl SemanticVadParams {
    fn with_eagerness(eagerness: Eagerness) -> Self {
        SemanticVadParams {
            eagerness,
            create_response: true,
            interrupt_response: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum VadMode {
    #[serde(rename = "server_vad")]
    ServerVad(ServerVadParams),
    #[serde(rename = "semantic_vad")]
    SemanticVad(SemanticVadParams),
}

impl VadMode {
    pub fn to_json(self) -> serde_json::Value {
        serde_json::to_value(self).expect("VadMode always serializes")
    }
}

/// Explicit caller override of the scenario-keyword default (spec §4.2:
/// "Callers may override with explicit parameters").
#[derive(Debug, Clone, Default)]
pub struct VadOverride {
    pub mode: Option<String>,
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub eagerness: Option<String>,
}

fn keyword_default(scenario_name: &str) -> VadMode {
    let name = scenario_name.to_lowercase();
    let urgent = ["support", "help", "emergency", "urgent"];
    let reflective = ["therapy", "counseling", "interview", "conversation"];

    if urgent.iter().any(|k| name.contains(k)) {
        VadMode::SemanticVad(SemanticVadParams::with_eagerness(Eagerness::High))
    } else if reflective.iter().any(|k| name.contains(k)) {
        VadMode::SemanticVad(SemanticVadParams::with_eagerness(Eagerness::Low))
    } else {
        VadMode::SemanticVad(SemanticVadParams::with_eagerness(Eagerness::Auto))
    }
}

/// Produce the turn-detection config for a scenario, honoring any explicit
/// override (spec §4.2).
pub fn vad_policy_for(
    scenario_name: &str,
    override_: Option<&VadOverride>,
) -> Result<VadMode, ScenarioError> {
    let Some(o) = override_ else {
        return Ok(keyword_default(scenario_name));
    };

    match o.mode.as_deref() {
        None => Ok(keyword_default(scenario_name)),
        Some("server_vad") => {
            let mut params = ServerVadParams::default();
            if let Some(t) = o.threshold {
                if !(0.0..=1.0).contains(&t) {
                    return Err(ScenarioError::Validation("threshold out of range".into()));
                }
                params.threshold = t;
            }
            if let Some(p) = o.prefix_padding_ms {
                if !(0..=2000).contains(&p) {
                    return Err(ScenarioError::Validation(
                        "prefix_padding_ms out of range".into(),
                    ));
                }
                params.prefix_padding_ms = p;
            }
            if let Some(s) = o.silence_duration_ms {
                if !(100..=5000).contains(&s) {
                    return Err(ScenarioError::Validation(
                        "silence_duration_ms out of range".into(),
                    ));
                }
                params.silence_duration_ms = s;
            }
            Ok(VadMode::ServerVad(params))
        }
        Some("semantic_vad") => {
            let eagerness = match &o.eagerness {
                Some(raw) => Eagerness::parse(raw)
                    .ok_or_else(|| ScenarioError::Validation(format!("bad eagerness: {raw}")))?,
                None => Eagerness::Auto,
            };
            Ok(VadMode::SemanticVad(SemanticVadParams::with_eagerness(
                eagerness,
            )))
        }
        Some(other) => Err(ScenarioError::Validation(format!(
            "unknown turn-detection mode: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_keyword_selects_high_eagerness() {
        let mode = vad_policy_for("mother_emergency", None).unwrap();
        assert_eq!(
            mode,
            VadMode::SemanticVad(SemanticVadParams::with_eagerness(Eagerness::High))
        );
    }

    #[test]
    fn therapy_keyword_selects_low_eagerness() {
        let mode = vad_policy_for("therapy_session", None).unwrap();
        assert_eq!(
            mode,
            VadMode::SemanticVad(SemanticVadParams::with_eagerness(Eagerness::Low))
        );
    }

    #[test]
    fn unmatched_scenario_defaults_to_auto() {
        let mode = vad_policy_for("yacht_party", None).unwrap();
        assert_eq!(
            mode,
            VadMode::SemanticVad(SemanticVadParams::with_eagerness(Eagerness::Auto))
        );
    }

    #[test]
    fn explicit_server_vad_override_is_honored() {
        let override_ = VadOverride {
            mode: Some("server_vad".into()),
            threshold: Some(0.7),
            ..Default::default()
        };
        let mode = vad_policy_for("default", Some(&override_)).unwrap();
        match mode {
            VadMode::ServerVad(p) => assert_eq!(p.threshold, 0.7),
            _ => panic!("expected server_vad"),
        }
    }

    #[test]
    fn out_of_range_override_is_config_error() {
        let override_ = VadOverride {
            mode: Some("server_vad".into()),
            threshold: Some(2.0),
            ..Default::default()
        };
        assert!(vad_policy_for("default", Some(&override_)).is_err());
    }

    #[test]
    fn unknown_mode_is_config_error() {
        let override_ = VadOverride {
            mode: Some("bogus".into()),
            ..Default::default()
        };
        assert!(vad_policy_for("default", Some(&override_)).is_err());
    }
}
