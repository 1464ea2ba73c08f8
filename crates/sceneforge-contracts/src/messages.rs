//! User-facing message catalog.

pub const NO_IMAGES_SELECTED: &str =
    "Select at least one character image or enable the background image.";
pub const EMPTY_PROMPT: &str = "Enter a prompt describing the scene you want.";
pub const MISSING_CREDENTIAL: &str =
    "No API key is configured. Set GEMINI_API_KEY (or GOOGLE_API_KEY / API_KEY) and try again.";
pub const QUOTA_EXCEEDED: &str = "The API quota for this key is exhausted. Check your plan and billing details, or select another API key and try again.";
pub const INVALID_CREDENTIAL: &str =
    "The API key is invalid or was not found. Select a valid API key and try again.";
pub const NO_IMAGE_RETURNED: &str =
    "The model did not return an image. Try rewording the prompt or changing the input images.";
pub const GENERATION_FAILED: &str = "Image generation failed";
pub const ALREADY_SAVED: &str = "Already saved";
