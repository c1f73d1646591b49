//! MatchSnapshot - read-only view of the application's match state
//!
//! The application core hands over its state record as JSON:
//!
//! ```json
//! {
//!   "matchId": "m-42",
//!   "teamA": { "name": "Alpha", "color": "#112233", "logoBase64": "...", "logoPath": "logos/logo_A_1.png" },
//!   "teamB": { "name": "Beta" },
//!   "currentSet": { "number": 3, "scoreA": 10, "scoreB": 8, "startedAt": 1700000000000 },
//!   "sets": [ { "scoreA": 25, "scoreB": 20, "endedAt": "..." } ],
//!   "servingTeam": "A",
//!   "officials": { "referee": "..." },
//!   "startedAt": 1700000000000
//! }
//! ```
//!
//! Fields are addressed by dotted paths (`teamA.name`, `sets.0.scoreA`).
//! Values under `derived.` are computed once per snapshot by `crate::scoring`.

use crate::scoring::{self, SetScore, Side};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Prefix of computed paths
pub const DERIVED_PREFIX: &str = "derived.";

#[derive(Debug, Clone, PartialEq)]
pub struct MatchSnapshot {
    root: Value,
    derived: Map<String, Value>,
}

impl MatchSnapshot {
    pub fn new(root: Value) -> Self {
        Self::at(root, Utc::now())
    }

    /// Build with an explicit clock (durations of running sets)
    pub fn at(root: Value, now: DateTime<Utc>) -> Self {
        let derived = compute_derived(&root, now);
        Self { root, derived }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Dotted-path lookup; `None` for missing paths and JSON null
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if let Some(name) = path.strip_prefix(DERIVED_PREFIX) {
            return self.derived.get(name);
        }
        lookup(&self.root, path).filter(|v| !v.is_null())
    }

    /// Rendered scalar at `path`, empty when missing
    pub fn text(&self, path: &str) -> String {
        self.get(path).map(render_scalar).unwrap_or_default()
    }

    /// Identity of the match this snapshot belongs to
    pub fn match_id(&self) -> Option<String> {
        self.get("matchId")
            .map(render_scalar)
            .filter(|id| !id.is_empty())
    }

    pub fn serving(&self) -> Option<Side> {
        self.get("servingTeam")
            .and_then(Value::as_str)
            .and_then(Side::parse)
    }

    pub fn has_logo(&self, side: Side) -> bool {
        ["logoBase64", "logoPath", "logo"].iter().any(|field| {
            let path = format!("{}.{}", side.team_key(), field);
            !self.text(&path).is_empty()
        })
    }

    /// Named visibility predicate, `None` if `key` names none
    pub fn predicate(&self, key: &str) -> Option<bool> {
        let (name, arg) = key.trim().split_once('.')?;
        let side = Side::parse(arg)?;
        match name {
            "serving" => Some(self.serving() == Some(side)),
            "hasLogo" => Some(self.has_logo(side)),
            _ => None,
        }
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a JSON scalar the way vMix text fields expect it
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// JavaScript-like truthiness used by visibility fields without a predicate
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("false") && s != "0"
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn score_of(set: &Value, side: Side) -> i64 {
    let key = match side {
        Side::A => "scoreA",
        Side::B => "scoreB",
    };
    set.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn compute_derived(root: &Value, now: DateTime<Utc>) -> Map<String, Value> {
    let mut derived = Map::new();

    let sets = root
        .get("sets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let current_number = root
        .pointer("/currentSet/number")
        .and_then(Value::as_u64);

    let scores: Vec<SetScore> = sets
        .iter()
        .enumerate()
        .map(|(idx, set)| {
            let ended = set.get("endedAt").map(|v| !v.is_null()).unwrap_or(false);
            let is_current = current_number == Some(idx as u64 + 1);
            SetScore {
                a: score_of(set, Side::A),
                b: score_of(set, Side::B),
                finished: ended || !is_current,
            }
        })
        .collect();

    let (won_a, won_b) = scoring::sets_won(&scores);
    derived.insert("setsWonA".into(), Value::from(won_a));
    derived.insert("setsWonB".into(), Value::from(won_b));

    let now = root
        .get("now")
        .and_then(scoring::parse_timestamp)
        .unwrap_or(now);

    let span = |node: Option<&Value>| -> Option<String> {
        let node = node?;
        let start = node.get("startedAt").and_then(scoring::parse_timestamp)?;
        let end = node
            .get("endedAt")
            .and_then(scoring::parse_timestamp)
            .unwrap_or(now);
        Some(scoring::format_duration(scoring::elapsed_seconds(start, end)))
    };

    if let Some(duration) = span(Some(root)) {
        derived.insert("matchDuration".into(), Value::String(duration));
    }
    if let Some(duration) = span(root.get("currentSet")) {
        derived.insert("currentSetDuration".into(), Value::String(duration));
    }

    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> MatchSnapshot {
        MatchSnapshot::new(json!({
            "matchId": 42,
            "teamA": { "name": "Alpha", "color": "#112233", "logoPath": "logos/logo_A_1.png" },
            "teamB": { "name": "Beta", "color": null },
            "currentSet": { "number": 3, "scoreA": 10, "scoreB": 8 },
            "sets": [
                { "scoreA": 25, "scoreB": 20 },
                { "scoreA": 18, "scoreB": 25 },
                { "scoreA": 10, "scoreB": 8 }
            ],
            "servingTeam": "B",
            "startedAt": 1_700_000_000_000i64,
            "now": 1_700_000_075_000i64
        }))
    }

    #[test]
    fn test_dotted_path_lookup() {
        let snap = sample();
        assert_eq!(snap.text("teamA.name"), "Alpha");
        assert_eq!(snap.text("currentSet.scoreA"), "10");
        assert_eq!(snap.text("sets.1.scoreB"), "25");
        assert_eq!(snap.text("sets.9.scoreB"), "");
        assert_eq!(snap.text("teamB.color"), "");
        assert_eq!(snap.text("teamA.name.first"), "");
        assert_eq!(snap.text(""), "");
    }

    #[test]
    fn test_derived_values() {
        let snap = sample();
        // The running third set does not count
        assert_eq!(snap.text("derived.setsWonA"), "1");
        assert_eq!(snap.text("derived.setsWonB"), "1");
        assert_eq!(snap.text("derived.matchDuration"), "1:15");
        assert_eq!(snap.text("derived.currentSetDuration"), "");
        assert_eq!(snap.text("derived.nothing"), "");
    }

    #[test]
    fn test_running_set_uses_explicit_clock() {
        let started = Utc::now() - chrono::Duration::seconds(3_725);
        let snap = MatchSnapshot::at(
            json!({ "currentSet": { "startedAt": started.timestamp_millis() } }),
            started + chrono::Duration::seconds(65),
        );
        assert_eq!(snap.text("derived.currentSetDuration"), "1:05");
        assert_eq!(snap.text("derived.matchDuration"), "");
    }

    #[test]
    fn test_match_id_and_predicates() {
        let snap = sample();
        assert_eq!(snap.match_id().as_deref(), Some("42"));
        assert_eq!(snap.predicate("serving.teamB"), Some(true));
        assert_eq!(snap.predicate("serving.teamA"), Some(false));
        assert_eq!(snap.predicate("hasLogo.A"), Some(true));
        assert_eq!(snap.predicate("hasLogo.B"), Some(false));
        assert_eq!(snap.predicate("teamA.name"), None);
    }

    #[test]
    fn test_render_scalar_and_truthiness() {
        assert_eq!(render_scalar(&json!(10.0)), "10");
        assert_eq!(render_scalar(&json!(2.5)), "2.5");
        assert_eq!(render_scalar(&json!(true)), "true");
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
    }
}
