// Wire protocol with the conversational peer
// JSON over WebSocket, camelCase fields. Outbound messages are typed
// structs; inbound messages are not uniformly structured, so parsing
// funnels everything through ServerEvent extraction on a serde_json::Value.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audio::{INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE};

/// The one function the peer may call to persist facts
pub const TOOL_UPDATE_MEMORY: &str = "update_user_memory";

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolDecl>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecl {
    pub function_declarations: Vec<FunctionDecl>,
}

#[derive(Debug, Serialize)]
pub struct FunctionDecl {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub tool_response: ToolResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Session establishment: model, voice, and the instruction string that
/// embeds the current memory snapshot
pub fn setup_message(model: &str, voice: &str, system_instruction: String) -> SetupMessage {
    SetupMessage {
        setup: Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: system_instruction,
                }],
            },
            tools: vec![memory_tool()],
        },
    }
}

fn memory_tool() -> ToolDecl {
    ToolDecl {
        function_declarations: vec![FunctionDecl {
            name: TOOL_UPDATE_MEMORY.to_string(),
            description: "Persist one fact about the user as a key/value pair.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Short identifier for the fact"},
                    "value": {"type": "string", "description": "The fact itself"}
                },
                "required": ["key", "value"]
            }),
        }],
    }
}

/// Wrap one encoded capture chunk for transmission
pub fn audio_message(data: String) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media: MediaBlob {
                data,
                mime_type: format!("audio/pcm;rate={}", OUTBOUND_SAMPLE_RATE),
            },
        },
    }
}

/// Acknowledge a memory tool call. Sent only after the local write is durable.
pub fn tool_ack(id: String) -> ToolResponseMessage {
    ToolResponseMessage {
        tool_response: ToolResponse {
            function_responses: vec![FunctionResponse {
                id,
                name: TOOL_UPDATE_MEMORY.to_string(),
                response: json!({"result": "Saved."}),
            }],
        },
    }
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// A retrieval citation surfaced by the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// Everything one inbound message can carry, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    ToolCall { id: String, name: String, args: Value },
    InputTranscript(String),
    OutputTranscript(String),
    Audio { data: String, sample_rate: u32 },
    Interrupted,
    TurnComplete,
    Grounding(Vec<GroundingSource>),
}

/// Parse one wire message into its events. A message the parser cannot
/// read is dropped whole; a readable message with unknown extras yields
/// whatever it does carry.
pub fn parse_events(raw: &str) -> Vec<ServerEvent> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => events_from_value(&value),
        Err(e) => {
            warn!("Unparseable peer message: {}", e);
            Vec::new()
        }
    }
}

pub fn events_from_value(value: &Value) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(Value::as_array)
    {
        for call in calls {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = call.get("args").cloned().unwrap_or(Value::Null);
            events.push(ServerEvent::ToolCall { id, name, args });
        }
    }

    if let Some(content) = value.get("serverContent") {
        if content
            .get("interrupted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            events.push(ServerEvent::Interrupted);
        }

        if let Some(text) = content
            .pointer("/inputTranscription/text")
            .and_then(Value::as_str)
        {
            if !text.is_empty() {
                events.push(ServerEvent::InputTranscript(text.to_string()));
            }
        }

        if let Some(text) = content
            .pointer("/outputTranscription/text")
            .and_then(Value::as_str)
        {
            if !text.is_empty() {
                events.push(ServerEvent::OutputTranscript(text.to_string()));
            }
        }

        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                let Some(inline) = part.get("inlineData") else {
                    continue;
                };
                let mime = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !mime.starts_with("audio/pcm") {
                    continue;
                }
                if let Some(data) = inline.get("data").and_then(Value::as_str) {
                    events.push(ServerEvent::Audio {
                        data: data.to_string(),
                        sample_rate: rate_from_mime(mime),
                    });
                }
            }
        }

        if content
            .get("turnComplete")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            events.push(ServerEvent::TurnComplete);
        }
    }

    let sources = extract_grounding(value);
    if !sources.is_empty() {
        events.push(ServerEvent::Grounding(sources));
    }

    events
}

/// Grounding metadata shows up in different places depending on the peer
/// version. Try each known location in priority order; the first location
/// that yields sources wins.
pub fn extract_grounding(value: &Value) -> Vec<GroundingSource> {
    const LOCATIONS: [&str; 3] = [
        "/serverContent/groundingMetadata",
        "/serverContent/modelTurn/groundingMetadata",
        "/serverContent/candidates/0/groundingMetadata",
    ];

    for location in LOCATIONS {
        if let Some(meta) = value.pointer(location) {
            let sources = sources_from_metadata(meta);
            if !sources.is_empty() {
                return sources;
            }
        }
    }

    Vec::new()
}

fn sources_from_metadata(meta: &Value) -> Vec<GroundingSource> {
    // Newer peers send groundingChunks, older ones groundingAttributions
    let chunks = meta
        .get("groundingChunks")
        .and_then(Value::as_array)
        .or_else(|| meta.get("groundingAttributions").and_then(Value::as_array));

    let Some(chunks) = chunks else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| {
            let web = chunk.get("web").or_else(|| chunk.get("retrievedContext"))?;
            let uri = web.get("uri").and_then(Value::as_str)?;
            let title = web.get("title").and_then(Value::as_str).unwrap_or(uri);
            Some(GroundingSource {
                title: title.to_string(),
                uri: uri.to_string(),
            })
        })
        .collect()
}

fn rate_from_mime(mime: &str) -> u32 {
    mime.split("rate=")
        .nth(1)
        .and_then(|r| r.split(';').next())
        .and_then(|r| r.trim().parse().ok())
        .unwrap_or(INBOUND_SAMPLE_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_wire_shape() {
        let msg = setup_message("models/test-live", "Puck", "Be brief.".to_string());
        let v = serde_json::to_value(&msg).unwrap();

        assert_eq!(v["setup"]["model"], "models/test-live");
        assert_eq!(v["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            v["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(v["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(
            v["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            TOOL_UPDATE_MEMORY
        );
    }

    #[test]
    fn test_audio_message_wire_shape() {
        let msg = audio_message("QUJD".to_string());
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["realtimeInput"]["media"]["data"], "QUJD");
        assert_eq!(v["realtimeInput"]["media"]["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn test_tool_ack_wire_shape() {
        let msg = tool_ack("call-7".to_string());
        let v = serde_json::to_value(&msg).unwrap();
        let resp = &v["toolResponse"]["functionResponses"][0];
        assert_eq!(resp["id"], "call-7");
        assert_eq!(resp["name"], TOOL_UPDATE_MEMORY);
        assert_eq!(resp["response"]["result"], "Saved.");
    }

    #[test]
    fn test_parse_tool_call() {
        let raw = r#"{"toolCall":{"functionCalls":[{"id":"c1","name":"update_user_memory","args":{"key":"food","value":"ramen"}}]}}"#;
        let events = parse_events(raw);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::ToolCall { id, name, args } => {
                assert_eq!(id, "c1");
                assert_eq!(name, TOOL_UPDATE_MEMORY);
                assert_eq!(args["key"], "food");
                assert_eq!(args["value"], "ramen");
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_audio_fragment() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#;
        let events = parse_events(raw);
        assert_eq!(
            events,
            vec![ServerEvent::Audio {
                data: "AAAA".to_string(),
                sample_rate: 24000
            }]
        );
    }

    #[test]
    fn test_parse_transcripts_and_turn_complete() {
        let raw = r#"{"serverContent":{"inputTranscription":{"text":"hello "},"outputTranscription":{"text":"hi there "},"turnComplete":true}}"#;
        let events = parse_events(raw);
        assert_eq!(
            events,
            vec![
                ServerEvent::InputTranscript("hello ".to_string()),
                ServerEvent::OutputTranscript("hi there ".to_string()),
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_interrupted() {
        let raw = r#"{"serverContent":{"interrupted":true}}"#;
        assert_eq!(parse_events(raw), vec![ServerEvent::Interrupted]);
    }

    #[test]
    fn test_parse_setup_complete() {
        assert_eq!(parse_events(r#"{"setupComplete":{}}"#), vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn test_unparseable_message_yields_nothing() {
        assert!(parse_events("not json at all").is_empty());
        assert!(parse_events(r#"{"unknownField":1}"#).is_empty());
    }

    #[test]
    fn test_grounding_primary_location() {
        let raw = r#"{"serverContent":{"groundingMetadata":{"groundingChunks":[{"web":{"title":"Docs","uri":"https://example.com/docs"}}]}}}"#;
        let events = parse_events(raw);
        assert_eq!(
            events,
            vec![ServerEvent::Grounding(vec![GroundingSource {
                title: "Docs".to_string(),
                uri: "https://example.com/docs".to_string()
            }])]
        );
    }

    #[test]
    fn test_grounding_falls_back_to_model_turn_location() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[],"groundingMetadata":{"groundingChunks":[{"web":{"title":"Alt","uri":"https://example.com/alt"}}]}}}}"#;
        let sources = extract_grounding(&serde_json::from_str(raw).unwrap());
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].uri, "https://example.com/alt");
    }

    #[test]
    fn test_grounding_priority_order() {
        // Both locations populated: the primary one wins
        let raw = r#"{"serverContent":{
            "groundingMetadata":{"groundingChunks":[{"web":{"title":"Primary","uri":"https://example.com/1"}}]},
            "modelTurn":{"groundingMetadata":{"groundingChunks":[{"web":{"title":"Secondary","uri":"https://example.com/2"}}]}}
        }}"#;
        let sources = extract_grounding(&serde_json::from_str(raw).unwrap());
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Primary");
    }

    #[test]
    fn test_grounding_attributions_variant() {
        let raw = r#"{"serverContent":{"groundingMetadata":{"groundingAttributions":[{"web":{"uri":"https://example.com/a"}}]}}}"#;
        let sources = extract_grounding(&serde_json::from_str(raw).unwrap());
        assert_eq!(sources.len(), 1);
        // Missing title falls back to the uri
        assert_eq!(sources[0].title, "https://example.com/a");
    }

    #[test]
    fn test_rate_from_mime_variants() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), 24000);
        assert_eq!(rate_from_mime("audio/pcm;rate=16000;codec=raw"), 16000);
        assert_eq!(rate_from_mime("audio/pcm"), INBOUND_SAMPLE_RATE);
    }
}
