//! ABOUTME: Decoder executor: parses a string input into a structured output
//! ABOUTME: JSON via serde, XML via a quick-xml event walk; parse failures fail the message

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::model::DecoderFormat;
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct DecoderExecutor {
    step: Arc<Step>,
    format: DecoderFormat,
}

impl DecoderExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        let StepKind::Decoder { format } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "DecoderExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let format = *format;
        Ok(Self { step, format })
    }
}

#[async_trait]
impl StepExecutor for DecoderExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let input = &self.step.inputs[0];
        let output = &self.step.outputs[0];
        let text = message.variable(&input.id)?.render_text();

        let parsed = match self.format {
            DecoderFormat::Json => {
                serde_json::from_str::<serde_json::Value>(&text).map_err(|e| {
                    WeftError::step(&self.step.id, format!("invalid JSON: {e}"))
                })?
            }
            DecoderFormat::Xml => xml_to_json(&self.step.id, &text)?,
        };
        let value = Value::coerce(parsed.clone(), &output.ty)
            .unwrap_or_else(|_| Value::from_json(parsed));
        Ok(vec![message.with_values([(output.id.clone(), value)])])
    }
}

/// Convert an XML document into a JSON object: elements become keys,
/// repeated siblings become arrays, text content becomes strings.
fn xml_to_json(step_id: &str, text: &str) -> Result<serde_json::Value> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(String, BTreeMap<String, Vec<serde_json::Value>>, String)> =
        vec![(String::new(), BTreeMap::new(), String::new())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push((name, BTreeMap::new(), String::new()));
            }
            Ok(Event::Text(content)) => {
                let text = content.unescape().map_err(|e| {
                    WeftError::step(step_id, format!("invalid XML text: {e}"))
                })?;
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let (name, children, text) = stack
                    .pop()
                    .ok_or_else(|| WeftError::step(step_id, "unbalanced XML"))?;
                let value = if children.is_empty() {
                    serde_json::Value::String(text)
                } else {
                    finish_element(children)
                };
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| WeftError::step(step_id, "unbalanced XML"))?;
                parent.1.entry(name).or_default().push(value);
            }
            Ok(Event::Empty(empty)) => {
                let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.1
                        .entry(name)
                        .or_default()
                        .push(serde_json::Value::Null);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(WeftError::step(step_id, format!("invalid XML: {e}")));
            }
        }
    }

    let (_, root_children, _) = stack
        .pop()
        .ok_or_else(|| WeftError::step(step_id, "empty XML document"))?;
    if root_children.is_empty() {
        return Err(WeftError::step(step_id, "empty XML document"));
    }
    Ok(finish_element(root_children))
}

fn finish_element(
    children: BTreeMap<String, Vec<serde_json::Value>>,
) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (name, mut values) in children {
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            serde_json::Value::Array(values)
        };
        object.insert(name, value);
    }
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_to_json_nesting_and_repeats() {
        let parsed = xml_to_json(
            "d",
            "<order><id>42</id><item>apple</item><item>pear</item></order>",
        )
        .unwrap();
        assert_eq!(parsed["order"]["id"], "42");
        assert_eq!(parsed["order"]["item"][1], "pear");
    }

    #[test]
    fn test_malformed_xml_fails() {
        assert!(xml_to_json("d", "<a><b></a>").is_err());
    }
}
