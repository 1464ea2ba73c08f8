use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::images::{strip_data_uri_prefix, ImageRef};

/// One uploaded character image and whether it takes part in the next generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CharacterSlot {
    pub image: Option<ImageRef>,
    pub selected: bool,
}

impl CharacterSlot {
    pub fn selected(image: ImageRef) -> Self {
        Self {
            image: Some(image),
            selected: true,
        }
    }

    fn usable_image(&self) -> Option<&ImageRef> {
        if !self.selected {
            return None;
        }
        self.image.as_ref().filter(|image| image.is_complete())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    InlineImage { mime_type: String, data: String },
}

impl RequestPart {
    pub fn is_image(&self) -> bool {
        matches!(self, RequestPart::InlineImage { .. })
    }

    /// Wire shape for a `generateContent` part.
    pub fn to_value(&self) -> Value {
        match self {
            RequestPart::Text(text) => json!({ "text": text }),
            RequestPart::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data,
                }
            }),
        }
    }
}

/// Ordered parts: prompt text, then the background image, then selected characters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationRequest {
    pub parts: Vec<RequestPart>,
}

impl GenerationRequest {
    pub fn image_count(&self) -> usize {
        self.parts.iter().filter(|part| part.is_image()).count()
    }

    pub fn to_parts_value(&self) -> Value {
        Value::Array(self.parts.iter().map(RequestPart::to_value).collect())
    }
}

/// Assembles the request parts. Performs no validation; callers reject empty
/// requests before getting here.
pub fn build_generation_request(
    prompt: &str,
    background: Option<&ImageRef>,
    use_background: bool,
    characters: &[CharacterSlot],
) -> GenerationRequest {
    let mut parts = vec![RequestPart::Text(prompt.to_string())];

    if use_background {
        if let Some(background) = background.filter(|image| image.has_payload()) {
            parts.push(image_part(background));
        }
    }

    parts.extend(
        characters
            .iter()
            .filter_map(CharacterSlot::usable_image)
            .map(image_part),
    );

    GenerationRequest { parts }
}

fn image_part(image: &ImageRef) -> RequestPart {
    RequestPart::InlineImage {
        mime_type: image.mime_type.clone(),
        data: strip_data_uri_prefix(&image.base64).to_string(),
    }
}
