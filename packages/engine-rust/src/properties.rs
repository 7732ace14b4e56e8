//! Property resolution: placeholder substitution against the payload and the
//! property context, with required/optional semantics.
//!
//! Required templates that do not resolve accumulate into a missing list;
//! optional ones are dropped silently. A placeholder that can be found in
//! neither the payload nor the context aborts resolution immediately.

use std::sync::OnceLock;

use keyword_core::{value_as_text, KeywordDescriptor, Payload, Properties};
use regex::Regex;

/// Context key that turns property validation on.
pub const VALIDATE_PROPERTIES: &str = "$validateProperties";

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(.+?)\}").expect("placeholder pattern is valid"))
}

/// Property resolution failures, both reported to callers as business errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("The Keyword is missing the following property or input '{name}'")]
    MissingPlaceholder { name: String },
    #[error("The Keyword is missing the following properties '{}'", .keys.join(", "))]
    MissingProperties { keys: Vec<String> },
}

/// Outcome of resolving a required and an optional template list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved key to value. Empty whenever `missing` is not.
    pub properties: Properties,
    /// Required keys that did not resolve, in declaration order.
    pub missing: Vec<String>,
}

impl Resolution {
    /// Converts a resolution with missing keys into an error.
    ///
    /// # Errors
    ///
    /// [`PropertyError::MissingProperties`] if any required key is missing.
    pub fn into_result(self) -> Result<Properties, PropertyError> {
        if self.missing.is_empty() {
            Ok(self.properties)
        } else {
            Err(PropertyError::MissingProperties { keys: self.missing })
        }
    }
}

/// Merges caller properties over context properties.
#[must_use]
pub fn merge(context: &Properties, caller: &Properties) -> Properties {
    let mut merged = context.clone();
    merged.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Whether the merged context asks for validation.
#[must_use]
pub fn validation_requested(context: &Properties) -> bool {
    context.contains_key(VALIDATE_PROPERTIES)
}

/// Resolves `required` and `optional` templates against `payload` and
/// `context`.
///
/// # Errors
///
/// [`PropertyError::MissingPlaceholder`] as soon as a template's placeholder
/// is found in neither `payload` nor `context`. Missing required keys are
/// not an error here; they are reported through [`Resolution::missing`].
pub fn resolve(
    required: &[String],
    optional: &[String],
    payload: &Payload,
    context: &Properties,
) -> Result<Resolution, PropertyError> {
    let mut resolution = Resolution::default();
    collect(required, payload, context, &mut resolution, true)?;
    collect(optional, payload, context, &mut resolution, false)?;
    if !resolution.missing.is_empty() {
        resolution.properties.clear();
    }
    Ok(resolution)
}

/// Properties handed to a keyword: the validated subset when validation is
/// requested, the whole merged context otherwise.
///
/// # Errors
///
/// Any [`PropertyError`] raised by validation.
pub fn effective_properties(
    descriptor: &KeywordDescriptor,
    payload: &Payload,
    merged: Properties,
) -> Result<Properties, PropertyError> {
    if !validation_requested(&merged) {
        return Ok(merged);
    }
    resolve(
        &descriptor.required_properties,
        &descriptor.optional_properties,
        payload,
        &merged,
    )?
    .into_result()
}

fn collect(
    templates: &[String],
    payload: &Payload,
    context: &Properties,
    resolution: &mut Resolution,
    required: bool,
) -> Result<(), PropertyError> {
    for template in templates {
        if let Some(value) = context.get(template) {
            resolution.properties.insert(template.clone(), value.clone());
            continue;
        }
        let resolved = substitute(template, payload, context)?;
        match context.get(&resolved) {
            Some(value) => {
                resolution.properties.insert(resolved, value.clone());
            }
            None if required => {
                let entry = if resolved == *template {
                    template.clone()
                } else {
                    format!("{template} or {resolved}")
                };
                resolution.missing.push(entry);
            }
            None => {}
        }
    }
    Ok(())
}

/// Replaces the first `{name}` segment, payload first then context.
fn substitute(template: &str, payload: &Payload, context: &Properties) -> Result<String, PropertyError> {
    let Some(captures) = placeholder_pattern().captures(template) else {
        return Ok(template.to_string());
    };
    let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
        return Ok(template.to_string());
    };
    let name = name.as_str();
    let replacement = match payload.get(name) {
        Some(value) => value_as_text(value),
        None => context
            .get(name)
            .cloned()
            .ok_or_else(|| PropertyError::MissingPlaceholder {
                name: name.to_string(),
            })?,
    };
    Ok(format!(
        "{}{}{}",
        &template[..whole.start()],
        replacement,
        &template[whole.end()..]
    ))
}

#[cfg(test)]
mod tests {
    use keyword_core::DEFAULT_KEYWORD_TIMEOUT_MS;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn missing_required_key_empties_effective_set() {
        let resolution = resolve(&keys(&["p1", "p2"]), &[], &Payload::new(), &props(&[("p1", "v")])).unwrap();
        assert_eq!(resolution.missing, vec!["p2"]);
        assert!(resolution.properties.is_empty());
    }

    #[test]
    fn payload_wins_over_context_for_placeholders() {
        let context = props(&[("ph", "y"), ("prop.x", "X"), ("prop.y", "Y")]);
        let resolution = resolve(
            &keys(&["prop.{ph}"]),
            &[],
            &payload(&[("ph", json!("x"))]),
            &context,
        )
        .unwrap();
        assert_eq!(resolution.properties, props(&[("prop.x", "X")]));
        assert!(resolution.missing.is_empty());
    }

    #[test]
    fn context_supplies_placeholder_when_payload_lacks_it() {
        let context = props(&[("env", "prod"), ("db.prod.url", "jdbc://prod")]);
        let resolution = resolve(&keys(&["db.{env}.url"]), &[], &Payload::new(), &context).unwrap();
        assert_eq!(resolution.properties["db.prod.url"], "jdbc://prod");
    }

    #[test]
    fn direct_match_skips_substitution() {
        // The literal template is itself a context key, so `ph` is never looked up.
        let context = props(&[("prop.{ph}", "literal")]);
        let resolution = resolve(&keys(&["prop.{ph}"]), &[], &Payload::new(), &context).unwrap();
        assert_eq!(resolution.properties["prop.{ph}"], "literal");
    }

    #[test]
    fn unresolvable_placeholder_fails_fast() {
        let err = resolve(
            &keys(&["a", "prop.{missing}"]),
            &keys(&["b"]),
            &Payload::new(),
            &Properties::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PropertyError::MissingPlaceholder {
                name: "missing".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "The Keyword is missing the following property or input 'missing'"
        );
    }

    #[test]
    fn unresolvable_placeholder_in_optional_also_fails_fast() {
        let err = resolve(&[], &keys(&["opt.{nope}"]), &Payload::new(), &Properties::new()).unwrap_err();
        assert!(matches!(err, PropertyError::MissingPlaceholder { name } if name == "nope"));
    }

    #[test]
    fn missing_substituted_key_reports_both_forms() {
        let resolution = resolve(
            &keys(&["prop.{ph}"]),
            &[],
            &payload(&[("ph", json!("x"))]),
            &Properties::new(),
        )
        .unwrap();
        assert_eq!(resolution.missing, vec!["prop.{ph} or prop.x"]);
    }

    #[test]
    fn absent_optional_is_dropped_without_blocking() {
        let context = props(&[("req", "1"), ("opt.a", "A")]);
        let resolution = resolve(
            &keys(&["req"]),
            &keys(&["opt.a", "opt.b"]),
            &Payload::new(),
            &context,
        )
        .unwrap();
        assert!(resolution.missing.is_empty());
        assert_eq!(resolution.properties, props(&[("req", "1"), ("opt.a", "A")]));
    }

    #[test]
    fn only_first_placeholder_is_substituted() {
        let context = props(&[("a", "1"), ("b", "2"), ("x.1.{b}", "first-only")]);
        let resolution = resolve(&keys(&["x.{a}.{b}"]), &[], &Payload::new(), &context).unwrap();
        assert_eq!(resolution.properties["x.1.{b}"], "first-only");
    }

    #[test]
    fn non_string_payload_values_render_as_json() {
        let context = props(&[("port.8080", "open")]);
        let resolution = resolve(
            &keys(&["port.{p}"]),
            &[],
            &payload(&[("p", json!(8080))]),
            &context,
        )
        .unwrap();
        assert_eq!(resolution.properties["port.8080"], "open");
    }

    #[test]
    fn missing_properties_message_lists_keys_in_order() {
        let err = PropertyError::MissingProperties {
            keys: keys(&["prop2", "prop3"]),
        };
        assert_eq!(
            err.to_string(),
            "The Keyword is missing the following properties 'prop2, prop3'"
        );
    }

    #[test]
    fn merge_lets_caller_override_context() {
        let merged = merge(&props(&[("a", "ctx"), ("b", "ctx")]), &props(&[("a", "caller")]));
        assert_eq!(merged, props(&[("a", "caller"), ("b", "ctx")]));
    }

    #[test]
    fn effective_properties_pass_through_without_sentinel() {
        let descriptor = KeywordDescriptor {
            name: "k".to_string(),
            identifier: "k".to_string(),
            module: "m".to_string(),
            description: None,
            schema: None,
            required_properties: keys(&["needed"]),
            optional_properties: Vec::new(),
            timeout_ms: DEFAULT_KEYWORD_TIMEOUT_MS,
            routing: Vec::new(),
        };
        let merged = props(&[("unrelated", "1")]);
        assert_eq!(
            effective_properties(&descriptor, &Payload::new(), merged.clone()).unwrap(),
            merged
        );

        let mut validated = merged;
        validated.insert(VALIDATE_PROPERTIES.to_string(), "true".to_string());
        let err = effective_properties(&descriptor, &Payload::new(), validated).unwrap_err();
        assert!(matches!(err, PropertyError::MissingProperties { keys } if keys == vec!["needed"]));
    }

    proptest! {
        #[test]
        fn optional_keys_never_reach_missing(
            optional in proptest::collection::vec("[a-z]{1,8}", 0..8),
        ) {
            let resolution = resolve(&[], &optional, &Payload::new(), &Properties::new()).unwrap();
            prop_assert!(resolution.missing.is_empty());
        }

        #[test]
        fn missing_or_empty_never_both_populated(
            required in proptest::collection::vec("[a-c]", 0..6),
            present in proptest::collection::hash_map("[a-c]", "[0-9]{1,3}", 0..3),
        ) {
            let resolution = resolve(&required, &[], &Payload::new(), &present).unwrap();
            prop_assert!(resolution.missing.is_empty() || resolution.properties.is_empty());
            let expected_missing = required.iter().filter(|k| !present.contains_key(*k)).count();
            prop_assert_eq!(resolution.missing.len(), expected_missing);
        }
    }
}
