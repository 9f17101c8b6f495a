use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_LANGUAGE: &str = "es";
const DEFAULT_ACCENT: &str = "es-ES";

/// Language settings and optional voice for one side of the interview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub language: String,
    pub accent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            accent: DEFAULT_ACCENT.to_string(),
            voice: None,
        }
    }
}

/// Normalized view of a project's `.info` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interviewer: RoleConfig,
    #[serde(default)]
    pub interviewee: RoleConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_prompt: Option<String>,
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn apply_role(role: &mut RoleConfig, data: &Map<String, Value>) {
    if let Some(language) = non_empty_str(data.get("language")) {
        role.language = language;
    }
    if let Some(accent) = non_empty_str(data.get("accent")) {
        role.accent = accent;
    }
    if let Some(voice) = data.get("voice") {
        role.voice = voice.as_str().filter(|s| !s.is_empty()).map(str::to_string);
    }
}

impl ProjectInfo {
    /// Build from raw JSON, accepting legacy shapes:
    /// top-level `language`/`accent` apply to both roles, `voices` sets role
    /// voices, `name`/`desc` alias `title`/`description`.
    pub fn from_raw(raw: &Value) -> Self {
        let mut info = ProjectInfo::default();
        let Some(data) = raw.as_object() else {
            return info;
        };

        if data.contains_key("language") || data.contains_key("accent") {
            let mut legacy = Map::new();
            for key in ["language", "accent"] {
                if let Some(v) = data.get(key) {
                    legacy.insert(key.to_string(), v.clone());
                }
            }
            apply_role(&mut info.interviewer, &legacy);
            apply_role(&mut info.interviewee, &legacy);
        }

        if let Some(role) = data.get("interviewer").and_then(Value::as_object) {
            apply_role(&mut info.interviewer, role);
        }
        if let Some(role) = data.get("interviewee").and_then(Value::as_object) {
            apply_role(&mut info.interviewee, role);
        }

        if let Some(voices) = data.get("voices").and_then(Value::as_object) {
            if let Some(v) = non_empty_str(voices.get("interviewer")) {
                info.interviewer.voice = Some(v);
            }
            if let Some(v) = non_empty_str(voices.get("interviewee")) {
                info.interviewee.voice = Some(v);
            }
        }

        if data.contains_key("project_prompt") {
            info.project_prompt = data
                .get("project_prompt")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        info.title = non_empty_str(data.get("title"))
            .or_else(|| non_empty_str(data.get("name")))
            .unwrap_or_default();
        info.description = non_empty_str(data.get("description"))
            .or_else(|| non_empty_str(data.get("desc")))
            .unwrap_or_default();

        info
    }

    /// Project prompt if set and non-blank.
    pub fn prompt(&self) -> Option<&str> {
        self.project_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }
}

/// Turn an incoming update body into per-role updates, folding the legacy
/// `language`/`accent`/`voices` keys into the role objects.
pub fn normalize_update(current: &ProjectInfo, body: &Value) -> Value {
    let empty = Map::new();
    let data = body.as_object().unwrap_or(&empty);

    let mut out: Map<String, Value> = data
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "interviewer" | "interviewee" | "voices" | "language" | "accent"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (name, current_role) in [("interviewer", &current.interviewer), ("interviewee", &current.interviewee)] {
        let mut role = match serde_json::to_value(current_role) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        for key in ["language", "accent"] {
            if let Some(v) = data.get(key).filter(|v| !v.is_null()) {
                role.insert(key.to_string(), v.clone());
            }
        }
        if let Some(update) = data.get(name).and_then(Value::as_object) {
            for (k, v) in update {
                role.insert(k.clone(), v.clone());
            }
        }
        if let Some(v) = data
            .get("voices")
            .and_then(Value::as_object)
            .and_then(|voices| voices.get(name))
        {
            role.insert("voice".to_string(), v.clone());
        }

        out.insert(name.to_string(), Value::Object(role));
    }

    if let Some(voices) = data.get("voices") {
        out.insert("voices".to_string(), voices.clone());
    }

    Value::Object(out)
}

/// Deep-merge `updates` into `existing`; objects merge key by key, anything
/// else is replaced.
pub fn merge_info(existing: &Value, updates: &Value) -> Value {
    match (existing, updates) {
        (Value::Object(base), Value::Object(upd)) => {
            let mut out = base.clone();
            for (k, v) in upd {
                let merged = match out.get(k) {
                    Some(prev) if prev.is_object() && v.is_object() => merge_info(prev, v),
                    _ => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        (_, upd) => upd.clone(),
    }
}
