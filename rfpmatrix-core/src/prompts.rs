//! Prompt text and response schemas for the model-backed stages.

use crate::model::{Prompt, ResponseSchema};
use serde_json::{json, Value};

pub const EXTRACT_SCHEMA: &str = "extract";
pub const CLASSIFY_SCHEMA: &str = "classify";
pub const GROUND_SCHEMA: &str = "ground";

const MODALITIES: [&str; 7] = [
    "SHALL",
    "MUST",
    "SHOULD",
    "MAY",
    "WILL",
    "REQUIRED",
    "PROHIBITED",
];

const EXTRACT_SYSTEM: &str = "You extract compliance requirements from government solicitation text \
(RFP sections, SOW/PWS, amendments). A requirement is any statement that obligates, permits or \
constrains the offeror or contractor, including submission instructions, deadlines, evaluation \
criteria, certifications and formatting rules. Quote each requirement verbatim from the text. \
Do not paraphrase, merge or invent requirements.";

const CLASSIFY_SYSTEM: &str = "You classify compliance requirements. For every input item return \
exactly one output item with the same `_idx` value, unchanged. Return items in the SAME order as \
the input. Return ONLY a JSON array.";

const GROUND_SYSTEM: &str = "You ground compliance requirements in their source text. The source \
text contains [Page N] markers. For every input item return exactly one output item with the same \
`_idx` value, unchanged, the shortest verbatim evidence quote from the source text that supports it, \
and the page numbers where that evidence starts and ends. Return items in the SAME order as the \
input. Return ONLY a JSON array.";

pub fn extract_prompt(section: &str, chunk_text: &str) -> Prompt {
    Prompt {
        system: EXTRACT_SYSTEM.to_string(),
        user: format!(
            "Section: {section}\n\n\
             Return a JSON array of objects with fields `quote` (verbatim), `category_hint`, \
             `modality_hint` (one of {}) and a short `label`.\n\
             Return [] if the text contains no requirements.\n\n\
             TEXT:\n{chunk_text}",
            MODALITIES.join(", ")
        ),
    }
}

pub fn classify_prompt(categories: &[String], items: &Value) -> Prompt {
    Prompt {
        system: CLASSIFY_SYSTEM.to_string(),
        user: format!(
            "Allowed categories: {}\n\
             Allowed modalities: {}\n\n\
             For each item return {{\"_idx\", \"category\", \"modality\"}}.\n\n\
             ITEMS:\n{}",
            categories.join("; "),
            MODALITIES.join(", "),
            items
        ),
    }
}

pub fn ground_prompt(marked_chunk_text: &str, items: &Value) -> Prompt {
    Prompt {
        system: GROUND_SYSTEM.to_string(),
        user: format!(
            "For each item return {{\"_idx\", \"evidence_quote\", \"page_start\", \"page_end\"}}.\n\n\
             SOURCE TEXT:\n{marked_chunk_text}\n\n\
             ITEMS:\n{items}"
        ),
    }
}

pub fn extract_schema() -> ResponseSchema {
    ResponseSchema {
        name: EXTRACT_SCHEMA.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "requirements": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "quote": {"type": "string"},
                            "category_hint": {"type": ["string", "null"]},
                            "modality_hint": {"type": ["string", "null"], "enum": modality_enum()},
                            "label": {"type": ["string", "null"]}
                        },
                        "required": ["quote"]
                    }
                }
            },
            "required": ["requirements"]
        }),
    }
}

pub fn classify_schema(categories: &[String]) -> ResponseSchema {
    ResponseSchema {
        name: CLASSIFY_SCHEMA.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "_idx": {"type": "integer"},
                            "category": {"type": "string", "enum": categories},
                            "modality": {"type": "string", "enum": MODALITIES}
                        },
                        "required": ["_idx", "category", "modality"]
                    }
                }
            },
            "required": ["items"]
        }),
    }
}

pub fn ground_schema() -> ResponseSchema {
    ResponseSchema {
        name: GROUND_SCHEMA.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "_idx": {"type": "integer"},
                            "evidence_quote": {"type": ["string", "null"]},
                            "page_start": {"type": ["integer", "null"]},
                            "page_end": {"type": ["integer", "null"]}
                        },
                        "required": ["_idx"]
                    }
                }
            },
            "required": ["items"]
        }),
    }
}

fn modality_enum() -> Value {
    let mut values: Vec<Value> = MODALITIES.iter().map(|m| json!(m)).collect();
    values.push(Value::Null);
    Value::Array(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_prompts_demand_index_preservation() {
        let items = json!([{"_idx": 0, "quote": "Offerors shall submit."}]);
        let prompt = classify_prompt(&["Submission".to_string()], &items);
        assert!(prompt.system.contains("same `_idx`"));
        assert!(prompt.system.contains("SAME order"));
        assert!(prompt.user.contains("\"_idx\":0"));
        assert!(prompt.user.contains("Submission"));
    }

    #[test]
    fn test_schema_names_route_stages() {
        assert_eq!(extract_schema().name, EXTRACT_SCHEMA);
        assert_eq!(classify_schema(&[]).name, CLASSIFY_SCHEMA);
        assert_eq!(ground_schema().name, GROUND_SCHEMA);
    }
}
