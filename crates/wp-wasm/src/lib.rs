//! WebAssembly bindings for Waypoint
//!
//! Used by the options page to validate rules while they are being edited
//! and to preview the compiled directive set.

use wasm_bindgen::prelude::*;
use wp_compiler::{compile, parse_rules_json};
use wp_core::{
    event::extract_matched_id as extract_id,
    types::RawRule,
    validate::{self, ValidationError},
};

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

fn error_object(error: &ValidationError) -> js_sys::Object {
    let result = js_sys::Object::new();
    set(&result, "ok", &JsValue::from(false));
    set(&result, "kind", &JsValue::from_str(&format!("{:?}", error.kind())));
    set(&result, "message", &JsValue::from_str(&error.to_string()));
    result
}

fn to_js(value: &impl serde::Serialize) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    js_sys::JSON::parse(&text)
}

#[wasm_bindgen]
pub fn validate_hostname(input: &str) -> JsValue {
    match validate::validate_hostname(input) {
        Ok(hostname) => {
            let result = js_sys::Object::new();
            set(&result, "ok", &JsValue::from(true));
            set(&result, "hostname", &JsValue::from_str(&hostname));
            result.into()
        }
        Err(e) => error_object(&e).into(),
    }
}

#[wasm_bindgen]
pub fn validate_target_url(input: &str) -> JsValue {
    match validate::validate_target_url(input) {
        Ok(target) => {
            let result = js_sys::Object::new();
            set(&result, "ok", &JsValue::from(true));
            set(&result, "url", &JsValue::from_str(&target.url));
            set(&result, "hostname", &JsValue::from_str(&target.hostname));
            result.into()
        }
        Err(e) => error_object(&e).into(),
    }
}

/// Validate one rule object; on success the normalized rule is returned.
#[wasm_bindgen]
pub fn validate_rule(rule: JsValue) -> Result<JsValue, JsValue> {
    let text: String = js_sys::JSON::stringify(&rule)?.into();
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let raw = RawRule::from_value(&value)
        .ok_or_else(|| JsValue::from_str("Rule must be an object"))?;

    match validate::validate_rule(&raw) {
        Ok(rule) => {
            let result = js_sys::Object::new();
            set(&result, "ok", &JsValue::from(true));
            set(&result, "rule", &to_js(&rule)?);
            Ok(result.into())
        }
        Err(e) => Ok(error_object(&e).into()),
    }
}

/// Compile a stored rule list (as a JSON string) into directives.
#[wasm_bindgen]
pub fn compile_rules(rules_json: &str) -> Result<JsValue, JsValue> {
    let rules = parse_rules_json(rules_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let output = compile(&rules);

    for skipped in &output.skipped {
        web_sys::console::warn_1(&JsValue::from_str(&format!(
            "waypoint: skipping rule #{} ({}): {}",
            skipped.index,
            skipped.rule_id.as_deref().unwrap_or("<no id>"),
            skipped.error
        )));
    }

    let js_result = js_sys::Object::new();
    set(&js_result, "directives", &to_js(&output.directives)?);
    set(&js_result, "reverseMap", &to_js(&output.reverse_map)?);

    let skipped = js_sys::Array::new_with_length(output.skipped.len() as u32);
    for (i, entry) in output.skipped.iter().enumerate() {
        let item = error_object(&entry.error);
        set(&item, "index", &JsValue::from(entry.index as u32));
        if let Some(id) = &entry.rule_id {
            set(&item, "ruleId", &JsValue::from_str(id));
        }
        skipped.set(i as u32, item.into());
    }
    set(&js_result, "skipped", &skipped);

    let stats = js_sys::Object::new();
    set(&stats, "total", &JsValue::from(output.stats.total as u32));
    set(&stats, "compiled", &JsValue::from(output.stats.compiled as u32));
    set(&stats, "disabled", &JsValue::from(output.stats.disabled as u32));
    set(&stats, "invalid", &JsValue::from(output.stats.invalid as u32));
    set(&stats, "probed", &JsValue::from(output.stats.probed as u32));
    set(&js_result, "stats", &stats);

    Ok(js_result.into())
}

/// Matched directive id from a match-event payload, if one can be found.
#[wasm_bindgen]
pub fn extract_matched_id(details: JsValue) -> Option<u32> {
    let text: String = js_sys::JSON::stringify(&details).ok()?.into();
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    extract_id(&value)
}
