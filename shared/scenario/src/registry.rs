use chrono::{DateTime, Utc};
use models::{CustomScenario, ResolvedScenario, Scenario, ScenarioId, Voice};
use std::sync::OnceLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("scenario not found")]
    NotFound,
    #[error("caller does not own this scenario")]
    Forbidden,
    #[error("invalid scenario fields: {0}")]
    Validation(String),
    #[error("a scenario with this id already exists")]
    Conflict,
}

/// Built-in scenarios, immutable after process start (spec §9: "no lock").
pub fn builtins() -> &'static [Scenario] {
    static BUILTINS: OnceLock<Vec<Scenario>> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        vec![
            Scenario {
                id: "default",
                persona: "a friendly, helpful voice assistant",
                prompt: "Have a natural, warm conversation with the caller.",
                voice: Voice::Alloy,
                temperature: 0.8,
            },
            Scenario {
                id: "sister_emergency",
                persona: "the caller's sister, calling under urgent circumstances",
                prompt: "Stay in character as a worried sibling relaying an emergency situation.",
                voice: Voice::Shimmer,
                temperature: 0.7,
            },
            Scenario {
                id: "mother_emergency",
                persona: "the caller's mother, calling under urgent circumstances",
                prompt: "Stay in character as a worried parent relaying an emergency situation.",
                voice: Voice::Coral,
                temperature: 0.7,
            },
            Scenario {
                id: "yacht_party",
                persona: "a lively host at an exclusive yacht party",
                prompt: "Keep the tone upbeat, playful, and a little mischievous.",
                voice: Voice::Verse,
                temperature: 0.9,
            },
            Scenario {
                id: "instigator",
                persona: "a provocative debate partner who loves to argue",
                prompt: "Push back on the caller's points and keep the conversation lively.",
                voice: Voice::Ash,
                temperature: 0.85,
            },
            Scenario {
                id: "gameshow_host",
                persona: "an energetic game show host",
                prompt: "Run a fast-paced trivia segment with enthusiastic commentary.",
                voice: Voice::Ballad,
                temperature: 0.9,
            },
        ]
    })
}

fn find_builtin(id: &str) -> Option<&'static Scenario> {
    builtins().iter().find(|s| s.id == id)
}

/// Custom scenario ids are `custom_<uid>_<epoch-seconds>` (spec §4.1).
pub fn is_custom_id(id: &str) -> bool {
    ScenarioId::parse(id).is_custom()
}

/// Authorize a caller against a custom id's own embedded uid, independent of
/// whether a row for it actually exists (spec §4.1: "violating this fails
/// with AUTHZ error even if the record exists").
fn authorize_custom_owner(id: &str, caller: Uuid) -> Result<(), ScenarioError> {
    match custom_id_owner(id) {
        Some(owner) if owner == caller => Ok(()),
        _ => Err(ScenarioError::Forbidden),
    }
}

/// The uid embedded in a custom scenario id, independent of any row lookup
/// (spec §4.1: the id format itself carries ownership).
pub fn custom_id_owner(id: &str) -> Option<Uuid> {
    let rest = id.strip_prefix("custom_")?;
    let (uid_part, _epoch_part) = rest.rsplit_once('_')?;
    Uuid::parse_str(uid_part).ok()
}

pub fn make_custom_id(caller: Uuid, now: DateTime<Utc>) -> String {
    format!("custom_{caller}_{}", now.timestamp())
}

/// Resolve a scenario id against both namespaces.
///
/// `custom_row` is the caller-supplied result of looking the id up in the
/// custom-scenario table (only needed when `id` is a custom id); this crate
/// never touches a database.
pub fn resolve(
    id: &str,
    caller: Uuid,
    custom_row: Option<CustomScenario>,
) -> Result<ResolvedScenario, ScenarioError> {
    if let Some(builtin) = find_builtin(id) {
        return Ok(builtin.into());
    }

    if is_custom_id(id) {
        authorize_custom_owner(id, caller)?;
        return match custom_row {
            Some(row) if row.id == id => Ok(row.into()),
            _ => Err(ScenarioError::NotFound),
        };
    }

    Err(ScenarioError::NotFound)
}

/// List a caller's own custom scenarios, newest first.
///
/// `table` is whatever the caller already loaded from the custom-scenario
/// table (this crate never touches a database); ownership filtering and
/// ordering are the pure parts this crate owns.
pub fn list_for(caller: Uuid, table: &[CustomScenario]) -> Vec<CustomScenario> {
    let mut owned: Vec<CustomScenario> = table
        .iter()
        .filter(|row| row.owner == caller)
        .cloned()
        .collect();
    owned.sort_by_key(|row| std::cmp::Reverse(row.created_at));
    owned
}

/// Look up one of the caller's own custom scenarios by id, preserving its
/// real `created_at` (unlike `resolve`, which only yields the fields a
/// model session needs).
pub fn get_owned(
    id: &str,
    caller: Uuid,
    existing: Option<CustomScenario>,
) -> Result<CustomScenario, ScenarioError> {
    if !is_custom_id(id) {
        return Err(ScenarioError::NotFound);
    }
    authorize_custom_owner(id, caller)?;
    match existing {
        Some(row) if row.id == id => Ok(row),
        _ => Err(ScenarioError::NotFound),
    }
}

/// Merge a patch over an existing custom scenario and re-validate the
/// result; the caller persists it. `None` fields keep the existing value.
#[allow(clippy::too_many_arguments)]
pub fn update(
    id: &str,
    caller: Uuid,
    existing: Option<CustomScenario>,
    persona: Option<String>,
    prompt: Option<String>,
    voice: Option<String>,
    temperature: Option<f32>,
) -> Result<CustomScenario, ScenarioError> {
    let existing = get_owned(id, caller, existing)?;

    let persona = persona.unwrap_or(existing.persona);
    let prompt = prompt.unwrap_or(existing.prompt);
    let voice_raw = voice.unwrap_or_else(|| existing.voice.as_str().to_string());
    let temperature = temperature.unwrap_or(existing.temperature);
    let voice = validate_custom_fields(&persona, &prompt, &voice_raw, temperature)?;

    Ok(CustomScenario {
        id: existing.id,
        owner: existing.owner,
        persona,
        prompt,
        voice,
        temperature,
        created_at: existing.created_at,
    })
}

/// Authorize and confirm a custom scenario exists before the caller deletes
/// it; returns nothing since deletion itself is a caller-owned side effect.
pub fn delete(id: &str, caller: Uuid, existing: Option<CustomScenario>) -> Result<(), ScenarioError> {
    get_owned(id, caller, existing)?;
    Ok(())
}

pub fn validate_custom_fields(
    persona: &str,
    prompt: &str,
    voice: &str,
    temperature: f32,
) -> Result<Voice, ScenarioError> {
    if !(10..=1000).contains(&persona.chars().count()) {
        return Err(ScenarioError::Validation(
            "persona must be 10-1000 characters".into(),
        ));
    }
    if !(10..=1000).contains(&prompt.chars().count()) {
        return Err(ScenarioError::Validation(
            "prompt must be 10-1000 characters".into(),
        ));
    }
    let voice = Voice::parse(voice)
        .ok_or_else(|| ScenarioError::Validation(format!("unknown voice: {voice}")))?;
    if !(0.0..=1.0).contains(&temperature) {
        return Err(ScenarioError::Validation(
            "temperature must be in [0,1]".into(),
        ));
    }
    Ok(voice)
}

/// Build a new `CustomScenario` value; the caller is responsible for
/// persisting it and surfacing a `Conflict` if the unique id already exists
/// (same-second duplicate creation, spec §4.1).
pub fn create_custom(
    caller: Uuid,
    persona: String,
    prompt: String,
    voice: &str,
    temperature: f32,
    now: DateTime<Utc>,
) -> Result<CustomScenario, ScenarioError> {
    let voice = validate_custom_fields(&persona, &prompt, voice, temperature)?;
    Ok(CustomScenario {
        id: make_custom_id(caller, now),
        owner: caller,
        persona,
        prompt,
        voice,
        temperature,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_regardless_of_caller() {
        let caller = Uuid::new_v4();
        let resolved = resolve("default", caller, None).unwrap();
        assert_eq!(resolved.id, "default");
        assert_eq!(resolved.voice, Voice::Alloy);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let caller = Uuid::new_v4();
        assert!(matches!(
            resolve("nope", caller, None),
            Err(ScenarioError::NotFound)
        ));
    }

    #[test]
    fn custom_scenario_round_trips_for_owner() {
        let caller = Uuid::new_v4();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let created = create_custom(
            caller,
            "a curious late-night radio host".into(),
            "Ask the caller about their day and riff on their answers.".into(),
            "sage",
            0.6,
            now,
        )
        .unwrap();
        let id = created.id.clone();
        let resolved = resolve(&id, caller, Some(created)).unwrap();
        assert_eq!(resolved.id, id);
        assert_eq!(resolved.voice, Voice::Sage);
    }

    #[test]
    fn custom_scenario_forbidden_for_other_caller_even_if_record_exists() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let now = Utc::now();
        let created = create_custom(
            owner,
            "a curious late-night radio host".into(),
            "Ask the caller about their day and riff on their answers.".into(),
            "sage",
            0.6,
            now,
        )
        .unwrap();
        let id = created.id.clone();
        assert!(matches!(
            resolve(&id, stranger, Some(created)),
            Err(ScenarioError::Forbidden)
        ));
        let _ = id;
    }

    #[test]
    fn validation_rejects_short_persona() {
        let err = validate_custom_fields("short", "a prompt long enough to pass", "sage", 0.5)
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Validation(_)));
    }

    #[test]
    fn validation_rejects_bad_voice() {
        let err = validate_custom_fields(
            "a persona long enough to pass the check",
            "a prompt long enough to pass the check too",
            "robotic",
            0.5,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::Validation(_)));
    }

    #[test]
    fn validation_rejects_out_of_range_temperature() {
        let err = validate_custom_fields(
            "a persona long enough to pass the check",
            "a prompt long enough to pass the check too",
            "sage",
            1.5,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::Validation(_)));
    }

    #[test]
    fn list_for_filters_by_owner_and_sorts_newest_first() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let older = create_custom(owner, "a curious late-night radio host".into(), "Ask the caller about their day.".into(), "sage", 0.6, Utc::now() - chrono::Duration::days(1)).unwrap();
        let newer = create_custom(owner, "a calm meditation guide".into(), "Lead a short breathing exercise.".into(), "ballad", 0.4, Utc::now()).unwrap();
        let other = create_custom(stranger, "a chess coach".into(), "Walk through opening theory.".into(), "echo", 0.5, Utc::now()).unwrap();

        let listed = list_for(owner, &[older.clone(), newer.clone(), other]);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[test]
    fn update_merges_patch_and_preserves_created_at() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let created = create_custom(owner, "a curious late-night radio host".into(), "Ask the caller about their day and riff.".into(), "sage", 0.6, now).unwrap();
        let id = created.id.clone();

        let updated = update(&id, owner, Some(created), None, None, Some("echo".into()), Some(0.9)).unwrap();
        assert_eq!(updated.voice, Voice::Echo);
        assert_eq!(updated.temperature, 0.9);
        assert_eq!(updated.created_at, now);
        assert_eq!(updated.persona, "a curious late-night radio host");
    }

    #[test]
    fn update_forbidden_for_non_owner() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let created = create_custom(owner, "a curious late-night radio host".into(), "Ask the caller about their day and riff.".into(), "sage", 0.6, Utc::now()).unwrap();
        let id = created.id.clone();

        assert!(matches!(
            update(&id, stranger, Some(created), None, None, None, None),
            Err(ScenarioError::Forbidden)
        ));
    }

    #[test]
    fn delete_not_found_when_row_missing() {
        let owner = Uuid::new_v4();
        let id = make_custom_id(owner, Utc::now());
        assert!(matches!(
            delete(&id, owner, None),
            Err(ScenarioError::NotFound)
        ));
    }
}
