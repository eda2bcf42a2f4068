//! JSON-Schema projection onto the reduced dialect the upstream accepts.
//!
//! Two profiles. [`sanitize_for_gemini`] is aggressive: it strips every
//! construct the Gemini family rejects and folds the stripped information
//! into description hints. [`sanitize_for_claude`] is permissive: the Claude
//! family tolerates most of JSON Schema, so only references and composition
//! keywords are simplified.
//!
//! Both profiles are pure, idempotent, and never leave a `required` entry
//! without a matching property.

use serde_json::{json, Map, Value};

/// Constraint keywords the Gemini dialect rejects. Their values are folded
/// into the description before removal.
const CONSTRAINT_KEYS: &[&str] = &[
    "minLength",
    "maxLength",
    "pattern",
    "minimum",
    "maximum",
    "minItems",
    "maxItems",
    "format",
];

/// Keywords removed outright by the aggressive profile.
const STRIP_KEYS: &[&str] = &[
    "$schema",
    "$defs",
    "definitions",
    "$id",
    "$comment",
    "title",
    "default",
    "examples",
];

const VALID_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

// ── Profile P1: aggressive (Gemini) ──────────────────────────────────────────

/// Project a schema onto the Gemini tool-parameter dialect.
pub fn sanitize_for_gemini(schema: &mut Value) {
    sanitize_gemini_node(schema);
}

/// Returns true when this node's `type` array contained `null`, so the
/// enclosing object can drop it from `required`.
fn sanitize_gemini_node(schema: &mut Value) -> bool {
    let obj = match schema.as_object_mut() {
        Some(obj) => obj,
        None => return false,
    };

    // 1. $ref → opaque object stub. The target is unreachable once $defs is
    //    stripped, so all that survives is a pointer-shaped description.
    if let Some(reference) = obj.get("$ref").and_then(|r| r.as_str()) {
        let segment = reference.rsplit('/').next().unwrap_or(reference).to_string();
        let existing = obj
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("")
            .to_string();
        let description = if existing.is_empty() {
            format!("See: {segment}")
        } else {
            format!("{existing} (See: {segment})")
        };
        *schema = json!({"type": "object", "description": description});
        return false;
    }

    // 2. Emit description hints for everything step 6 is about to delete.
    let mut hints: Vec<String> = Vec::new();
    if let Some(values) = obj.get("enum").and_then(|e| e.as_array()) {
        if (2..=10).contains(&values.len()) {
            let rendered: Vec<String> = values.iter().map(render_value).collect();
            hints.push(format!("Allowed: {}", rendered.join(", ")));
        }
    }
    if obj.get("additionalProperties") == Some(&Value::Bool(false)) {
        hints.push("No extra properties allowed".to_string());
    }
    for key in CONSTRAINT_KEYS {
        if let Some(value) = obj.get(*key) {
            // A format that step 7 will keep is not being stripped, so it
            // gets no hint (hinting it would break idempotence).
            if *key == "format" && format_survives(obj) {
                continue;
            }
            hints.push(format!("{key}: {}", render_value(value)));
        }
    }
    for hint in hints {
        append_hint(obj, &hint);
    }

    // 3. Merge allOf into the parent.
    merge_all_of(obj);

    // 4. Flatten anyOf/oneOf down to the best-scoring option.
    flatten_one_of(obj);

    // 5. Flatten array-valued `type`, remembering nullability.
    let nullable = flatten_type_array(obj);
    if nullable {
        append_hint(obj, "nullable");
    }

    // 6. Delete everything the dialect rejects.
    for key in CONSTRAINT_KEYS {
        if *key != "format" {
            obj.remove(*key);
        }
    }
    for key in STRIP_KEYS {
        obj.remove(*key);
    }
    obj.remove("enum");
    obj.remove("additionalProperties");
    obj.remove("allOf");
    obj.remove("anyOf");
    obj.remove("oneOf");

    // 7. `format` survives only on strings, and only for values Gemini knows.
    if !format_survives(obj) {
        obj.remove("format");
    }

    // 8. Recurse, then drop required entries for nullable or absent properties.
    let mut newly_nullable: Vec<String> = Vec::new();
    if let Some(props) = obj.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for (name, child) in props.iter_mut() {
            if sanitize_gemini_node(child) {
                newly_nullable.push(name.clone());
            }
        }
    }
    if let Some(items) = obj.get_mut("items") {
        match items {
            Value::Array(entries) => {
                for entry in entries {
                    sanitize_gemini_node(entry);
                }
            }
            other => {
                sanitize_gemini_node(other);
            }
        }
    }
    for name in &newly_nullable {
        remove_required_entry(obj, name);
    }
    validate_required(obj);

    nullable
}

// ── Profile P2: permissive (Claude) ──────────────────────────────────────────

/// Simplify a schema just enough for the Claude family: drop references,
/// merge composition keywords, and guarantee a non-empty object at the top.
pub fn sanitize_for_claude(schema: &mut Value) {
    sanitize_claude_node(schema);

    // The upstream refuses empty parameter schemas for Claude models, so an
    // empty object gains a synthetic `reason` argument.
    if is_empty_object_schema(schema) {
        *schema = json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Reason for calling this tool"
                }
            },
            "required": ["reason"]
        });
    }
}

fn sanitize_claude_node(schema: &mut Value) {
    let obj = match schema.as_object_mut() {
        Some(obj) => obj,
        None => return,
    };

    for key in ["$ref", "$defs", "$id", "$schema", "$comment", "definitions"] {
        obj.remove(key);
    }

    merge_all_of(obj);
    flatten_one_of(obj);
    coerce_type(obj);

    if let Some(props) = obj.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for (_, child) in props.iter_mut() {
            sanitize_claude_node(child);
        }
    }
    if let Some(items) = obj.get_mut("items") {
        match items {
            Value::Array(entries) => {
                for entry in entries {
                    sanitize_claude_node(entry);
                }
            }
            other => sanitize_claude_node(other),
        }
    }

    validate_required(obj);
}

/// Force `type` to a single valid JSON Schema type, inferring from shape
/// when it is absent or garbage.
fn coerce_type(obj: &mut Map<String, Value>) {
    let coerced = match obj.get("type") {
        Some(Value::String(s)) if VALID_TYPES.contains(&s.as_str()) => return,
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null" && VALID_TYPES.contains(t))
            .map(str::to_string),
        _ => None,
    };

    let fallback = if obj.contains_key("properties") {
        "object"
    } else if obj.contains_key("items") {
        "array"
    } else {
        "object"
    };
    obj.insert(
        "type".to_string(),
        Value::String(coerced.unwrap_or_else(|| fallback.to_string())),
    );
}

fn is_empty_object_schema(schema: &Value) -> bool {
    let obj = match schema.as_object() {
        Some(obj) => obj,
        None => return false,
    };
    if obj.get("type").and_then(|t| t.as_str()).unwrap_or("object") != "object" {
        return false;
    }
    match obj.get("properties").and_then(|p| p.as_object()) {
        Some(props) => props.is_empty(),
        None => true,
    }
}

// ── Shared steps ─────────────────────────────────────────────────────────────

/// Merge `allOf` siblings: properties union with later-sibling override,
/// required set-union, first occurrence for everything else. The parent's
/// own keys always win.
fn merge_all_of(obj: &mut Map<String, Value>) {
    let siblings = match obj.remove("allOf") {
        Some(Value::Array(siblings)) => siblings,
        // Malformed allOf; nothing sensible to merge.
        Some(_) | None => return,
    };

    let mut merged_props: Map<String, Value> = Map::new();
    let mut merged_required: Vec<Value> = Vec::new();
    let mut merged_other: Map<String, Value> = Map::new();

    for sibling in siblings {
        let sibling = match sibling {
            Value::Object(map) => map,
            _ => continue,
        };
        for (key, value) in sibling {
            match key.as_str() {
                "properties" => {
                    if let Value::Object(props) = value {
                        for (name, prop) in props {
                            merged_props.insert(name, prop);
                        }
                    }
                }
                "required" => {
                    if let Value::Array(entries) = value {
                        for entry in entries {
                            if !merged_required.contains(&entry) {
                                merged_required.push(entry);
                            }
                        }
                    }
                }
                _ => {
                    merged_other.entry(key).or_insert(value);
                }
            }
        }
    }

    if !merged_props.is_empty() {
        let parent_props = obj
            .entry("properties".to_string())
            .or_insert_with(|| json!({}));
        if let Value::Object(existing) = parent_props {
            for (name, prop) in merged_props {
                existing.entry(name).or_insert(prop);
            }
        }
    }
    if !merged_required.is_empty() {
        let parent_required = obj
            .entry("required".to_string())
            .or_insert_with(|| json!([]));
        if let Value::Array(existing) = parent_required {
            for entry in merged_required {
                if !existing.contains(&entry) {
                    existing.push(entry);
                }
            }
        }
    }
    for (key, value) in merged_other {
        obj.entry(key).or_insert(value);
    }
}

/// Whether step 7 of the aggressive profile keeps this node's `format`.
/// The eventual (flattened) type matters, not the raw one.
fn format_survives(obj: &Map<String, Value>) -> bool {
    let type_is_string = match obj.get("type") {
        Some(Value::String(s)) => s == "string",
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null")
            == Some("string"),
        _ => false,
    };
    type_is_string
        && matches!(
            obj.get("format").and_then(|f| f.as_str()),
            Some("enum") | Some("date-time")
        )
}

/// Collapse `anyOf`/`oneOf` to the single best option. Scoring prefers
/// concrete object schemas over arrays over bare typed values over null.
fn flatten_one_of(obj: &mut Map<String, Value>) {
    flatten_options(obj, "anyOf");
    flatten_options(obj, "oneOf");
}

fn flatten_options(obj: &mut Map<String, Value>, key: &str) {
    let options = match obj.remove(key) {
        Some(Value::Array(options)) if !options.is_empty() => options,
        Some(_) | None => return,
    };

    let mut seen_types: Vec<String> = Vec::new();
    for option in &options {
        if let Some(t) = option.get("type").and_then(|t| t.as_str()) {
            if t != "null" && !seen_types.iter().any(|s| s == t) {
                seen_types.push(t.to_string());
            }
        }
    }

    let best = options
        .into_iter()
        .enumerate()
        .max_by_key(|(idx, option)| (score_option(option), std::cmp::Reverse(*idx)))
        .map(|(_, option)| option)
        .unwrap_or(Value::Null);

    if let Value::Object(best) = best {
        for (key, value) in best {
            obj.entry(key).or_insert(value);
        }
    }

    if seen_types.len() > 1 {
        append_hint(obj, &format!("Accepts: {}", seen_types.join(" | ")));
    }
}

fn score_option(option: &Value) -> i32 {
    let obj = match option.as_object() {
        Some(obj) => obj,
        None => return 0,
    };
    let type_str = obj.get("type").and_then(|t| t.as_str());
    if obj.contains_key("properties") {
        3
    } else if obj.contains_key("items") {
        2
    } else if matches!(type_str, Some(t) if t != "null") {
        1
    } else {
        0
    }
}

/// Collapse `type: [T, "null"]` to `type: T`. Returns true when `null` was
/// one of the options.
fn flatten_type_array(obj: &mut Map<String, Value>) -> bool {
    let types = match obj.get("type") {
        Some(Value::Array(types)) => types.clone(),
        _ => return false,
    };
    let had_null = types.iter().any(|t| t.as_str() == Some("null"));
    let first = types
        .iter()
        .filter_map(|t| t.as_str())
        .find(|t| *t != "null")
        .unwrap_or("object")
        .to_string();
    obj.insert("type".to_string(), Value::String(first));
    had_null
}

/// Drop `required` entries that do not refer to an actual property; drop the
/// key entirely when the list empties out.
fn validate_required(obj: &mut Map<String, Value>) {
    let property_names: Vec<String> = obj
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();

    let emptied = match obj.get_mut("required") {
        Some(Value::Array(entries)) => {
            entries.retain(|e| {
                e.as_str()
                    .map(|name| property_names.iter().any(|p| p == name))
                    .unwrap_or(false)
            });
            entries.is_empty()
        }
        Some(_) => true,
        None => return,
    };
    if emptied {
        obj.remove("required");
    }
}

fn remove_required_entry(obj: &mut Map<String, Value>, name: &str) {
    if let Some(Value::Array(entries)) = obj.get_mut("required") {
        entries.retain(|e| e.as_str() != Some(name));
    }
}

fn append_hint(obj: &mut Map<String, Value>, hint: &str) {
    let existing = obj
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();
    let combined = if existing.is_empty() {
        hint.to_string()
    } else {
        format!("{existing} ({hint})")
    };
    obj.insert("description".to_string(), Value::String(combined));
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini(mut schema: Value) -> Value {
        sanitize_for_gemini(&mut schema);
        schema
    }

    fn claude(mut schema: Value) -> Value {
        sanitize_for_claude(&mut schema);
        schema
    }

    #[test]
    fn ref_becomes_stub_with_pointer_description() {
        let out = gemini(json!({"$ref": "#/$defs/Location"}));
        assert_eq!(out["type"], "object");
        assert_eq!(out["description"], "See: Location");
    }

    #[test]
    fn ref_preserves_existing_description_as_prefix() {
        let out = gemini(json!({
            "$ref": "#/$defs/Location",
            "description": "Where to search"
        }));
        assert_eq!(out["description"], "Where to search (See: Location)");
    }

    #[test]
    fn enum_hint_emitted_then_enum_removed() {
        let out = gemini(json!({
            "type": "string",
            "enum": ["celsius", "fahrenheit"]
        }));
        assert!(out.get("enum").is_none());
        assert_eq!(out["description"], "Allowed: celsius, fahrenheit");
    }

    #[test]
    fn oversized_enum_gets_no_hint_but_is_removed() {
        let values: Vec<Value> = (0..20).map(|i| json!(i.to_string())).collect();
        let out = gemini(json!({"type": "string", "enum": values}));
        assert!(out.get("enum").is_none());
        assert!(out.get("description").is_none());
    }

    #[test]
    fn constraint_hints_then_removal() {
        let out = gemini(json!({
            "type": "string",
            "minLength": 3,
            "pattern": "^[a-z]+$"
        }));
        assert!(out.get("minLength").is_none());
        assert!(out.get("pattern").is_none());
        let desc = out["description"].as_str().unwrap();
        assert!(desc.contains("minLength: 3"));
        assert!(desc.contains("pattern: ^[a-z]+$"));
    }

    #[test]
    fn additional_properties_hint() {
        let out = gemini(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        }));
        assert!(out.get("additionalProperties").is_none());
        assert_eq!(out["description"], "No extra properties allowed");
    }

    #[test]
    fn all_of_merges_properties_and_required() {
        let out = gemini(json!({
            "type": "object",
            "allOf": [
                {"properties": {"a": {"type": "string"}}, "required": ["a"]},
                {"properties": {"a": {"type": "number"}, "b": {"type": "string"}}, "required": ["b"]}
            ]
        }));
        assert!(out.get("allOf").is_none());
        // later sibling overrides: `a` ends up a number
        assert_eq!(out["properties"]["a"]["type"], "number");
        assert_eq!(out["properties"]["b"]["type"], "string");
        let required: Vec<&str> = out["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"a"));
        assert!(required.contains(&"b"));
    }

    #[test]
    fn parent_keys_beat_all_of_siblings() {
        let out = gemini(json!({
            "type": "object",
            "description": "parent wins",
            "allOf": [{"description": "sibling loses", "properties": {"x": {"type": "string"}}}]
        }));
        assert_eq!(out["description"], "parent wins");
        assert_eq!(out["properties"]["x"]["type"], "string");
    }

    #[test]
    fn any_of_picks_object_with_properties() {
        let out = gemini(json!({
            "anyOf": [
                {"type": "string"},
                {"type": "object", "properties": {"q": {"type": "string"}}},
                {"type": "null"}
            ]
        }));
        assert!(out.get("anyOf").is_none());
        assert_eq!(out["type"], "object");
        assert!(out["properties"]["q"].is_object());
        let desc = out["description"].as_str().unwrap();
        assert!(desc.contains("Accepts: string | object"));
    }

    #[test]
    fn any_of_single_type_gets_no_accepts_hint() {
        let out = gemini(json!({
            "anyOf": [{"type": "string"}, {"type": "null"}]
        }));
        assert_eq!(out["type"], "string");
        assert!(out.get("description").is_none());
    }

    #[test]
    fn type_array_flattens_and_clears_required() {
        let out = gemini(json!({
            "type": "object",
            "properties": {
                "name": {"type": ["string", "null"]},
                "age": {"type": "integer"}
            },
            "required": ["name", "age"]
        }));
        assert_eq!(out["properties"]["name"]["type"], "string");
        assert_eq!(out["properties"]["name"]["description"], "nullable");
        let required = out["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "age");
    }

    #[test]
    fn format_kept_only_for_string_allowlist() {
        let out = gemini(json!({"type": "string", "format": "date-time"}));
        assert_eq!(out["format"], "date-time");
        // kept formats are not stripped, so no hint is emitted for them
        assert!(out.get("description").is_none());

        let out = gemini(json!({"type": "string", "format": "uuid"}));
        assert!(out.get("format").is_none());
        assert!(out["description"].as_str().unwrap().contains("format: uuid"));

        let out = gemini(json!({"type": "integer", "format": "int64"}));
        assert!(out.get("format").is_none());
    }

    #[test]
    fn required_entries_without_properties_are_dropped() {
        let out = gemini(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["a", "ghost"]
        }));
        let required = out["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "a");

        let out = gemini(json!({
            "type": "object",
            "required": ["ghost"]
        }));
        assert!(out.get("required").is_none());
    }

    #[test]
    fn strip_keys_removed() {
        let out = gemini(json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "$id": "https://example.com/x",
            "title": "X",
            "default": 3,
            "examples": [1, 2],
            "type": "integer"
        }));
        for key in ["$schema", "$id", "title", "default", "examples"] {
            assert!(out.get(key).is_none(), "{key} should be gone");
        }
    }

    #[test]
    fn gemini_profile_is_idempotent() {
        let original = json!({
            "type": "object",
            "description": "config",
            "additionalProperties": false,
            "properties": {
                "mode": {"type": "string", "enum": ["fast", "slow"]},
                "count": {"type": ["integer", "null"], "minimum": 1},
                "target": {"anyOf": [
                    {"type": "object", "properties": {"id": {"type": "string"}}},
                    {"type": "string"}
                ]},
                "nested": {"allOf": [
                    {"properties": {"x": {"type": "number"}}, "required": ["x"]},
                    {"properties": {"y": {"type": "number"}}}
                ]}
            },
            "required": ["mode", "count"]
        });

        let once = gemini(original);
        let twice = gemini(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn required_subset_of_properties_invariant() {
        let samples = [
            json!({"type": "object", "required": ["a"], "properties": {}}),
            json!({"allOf": [{"required": ["z"]}], "type": "object"}),
            json!({
                "type": "object",
                "properties": {"a": {"type": ["string", "null"]}},
                "required": ["a"]
            }),
        ];
        for sample in samples {
            for out in [gemini(sample.clone()), claude(sample)] {
                let props: Vec<String> = out
                    .get("properties")
                    .and_then(|p| p.as_object())
                    .map(|p| p.keys().cloned().collect())
                    .unwrap_or_default();
                if let Some(required) = out.get("required").and_then(|r| r.as_array()) {
                    for entry in required {
                        assert!(props.iter().any(|p| p == entry.as_str().unwrap()));
                    }
                }
            }
        }
    }

    #[test]
    fn claude_keeps_constraints_but_drops_refs() {
        let out = claude(json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 2}
            },
            "required": ["name"]
        }));
        assert!(out.get("$schema").is_none());
        // permissive: constraint keywords survive
        assert_eq!(out["properties"]["name"]["minLength"], 2);
        assert_eq!(out["required"][0], "name");
    }

    #[test]
    fn claude_flattens_composition() {
        let out = claude(json!({
            "anyOf": [
                {"type": "object", "properties": {"q": {"type": "string"}}},
                {"type": "null"}
            ]
        }));
        assert!(out.get("anyOf").is_none());
        assert_eq!(out["type"], "object");
    }

    #[test]
    fn claude_coerces_missing_type() {
        let out = claude(json!({"properties": {"a": {"type": "string"}}}));
        assert_eq!(out["type"], "object");

        let out = claude(json!({"items": {"type": "string"}}));
        assert_eq!(out["type"], "array");
    }

    #[test]
    fn claude_empty_object_becomes_placeholder() {
        for empty in [json!({}), json!({"type": "object"}), json!({"type": "object", "properties": {}})] {
            let out = claude(empty);
            assert_eq!(out["type"], "object");
            assert_eq!(out["properties"]["reason"]["type"], "string");
            assert_eq!(out["required"][0], "reason");
        }
    }

    #[test]
    fn claude_profile_is_idempotent() {
        let original = json!({
            "type": "object",
            "properties": {
                "choice": {"oneOf": [{"type": "string"}, {"type": "integer"}]}
            }
        });
        let once = claude(original);
        let twice = claude(once.clone());
        assert_eq!(once, twice);
    }
}
