use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use sceneforge_contracts::events::EventWriter;
use sceneforge_contracts::images::to_data_uri;
use sceneforge_contracts::request::GenerationRequest;
use sceneforge_contracts::studio::StudioState;
use sceneforge_contracts::{StudioError, StudioResult};
use serde_json::{json, Value};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const API_BASE_ENV: &str = "GEMINI_API_BASE";
pub const API_KEY_ENVS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Upstream text for quota or billing exhaustion.
pub const QUOTA_EXHAUSTED_SIGNATURE: &str = "RESOURCE_EXHAUSTED";
/// Upstream text usually caused by an invalid credential.
pub const ENTITY_NOT_FOUND_SIGNATURE: &str = "Requested entity was not found.";

/// Independent variants requested per generate action.
pub const VARIANTS_PER_ACTION: usize = 2;

const ERROR_BODY_MAX_CHARS: usize = 2000;
const FALLBACK_IMAGE_MIME: &str = "image/png";

pub trait ImageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Returns one generated image as a data URI.
    fn generate(&self, request: &GenerationRequest) -> StudioResult<String>;
}

/// Host-provided trigger for picking a different API credential.
///
/// Callers fire it and move on; the outcome is never observed.
pub trait CredentialReselector: Send + Sync {
    fn request_reselection(&self);
}

/// Gemini `generateContent` transport requesting image-only output.
///
/// The credential and HTTP client are resolved on every call so a key
/// selected mid-session is picked up without a restart.
#[derive(Debug, Clone)]
pub struct GeminiImageModel {
    api_base: String,
    model: String,
}

impl GeminiImageModel {
    pub fn new(model: Option<&str>) -> Self {
        let api_base = non_empty_env(API_BASE_ENV)
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = model
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        Self { api_base, model }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key() -> Option<String> {
        Self::api_key_from(|key| env::var(key).ok())
    }

    /// First non-blank value in [`API_KEY_ENVS`] order.
    pub fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        API_KEY_ENVS.iter().find_map(|key| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }

    pub fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_payload(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{
                "parts": request.to_parts_value(),
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        })
    }

    /// First inline image of the first candidate, as a data URI.
    pub fn extract_first_image(response_payload: &Value) -> StudioResult<String> {
        let parts = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .ok_or(StudioError::NoImageReturned)?;

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(FALLBACK_IMAGE_MIME);
            return Ok(to_data_uri(mime_type, data));
        }

        Err(StudioError::NoImageReturned)
    }

    fn generate_with_key(
        &self,
        api_key: Option<String>,
        request: &GenerationRequest,
    ) -> StudioResult<String> {
        let Some(api_key) = api_key else {
            return Err(StudioError::Configuration);
        };
        let http = http_client().map_err(|err| {
            StudioError::Upstream(format!("Gemini client setup failed: {}", err.without_url()))
        })?;
        let endpoint = self.endpoint();
        let response = http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| {
                StudioError::Upstream(format!(
                    "Gemini request failed ({endpoint}): {}",
                    err.without_url()
                ))
            })?;
        let payload = response_json_or_error(response)?;
        Self::extract_first_image(&payload)
    }
}

impl ImageModel for GeminiImageModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &GenerationRequest) -> StudioResult<String> {
        self.generate_with_key(Self::api_key(), request)
    }
}

fn http_client() -> reqwest::Result<HttpClient> {
    let builder = HttpClient::builder();
    #[cfg(test)]
    let builder = builder.no_proxy();
    builder.build()
}

fn response_json_or_error(response: HttpResponse) -> StudioResult<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        StudioError::Upstream(format!("Gemini response body read failed: {}", err.without_url()))
    })?;
    if !status.is_success() {
        return Err(StudioError::Upstream(format!(
            "Gemini request failed ({code}): {}",
            truncate_text(&body, ERROR_BODY_MAX_CHARS)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        StudioError::Upstream(format!("Gemini returned invalid JSON payload: {err}"))
    })
}

/// Maps known upstream error text to remediation errors.
///
/// Matching is by substring on the upstream message, so a change in the
/// upstream wording silently falls through to the unclassified path.
pub fn classify_failure(
    err: StudioError,
    reselector: Option<&dyn CredentialReselector>,
) -> StudioError {
    let StudioError::Upstream(message) = &err else {
        return err;
    };
    let classified = if message.contains(QUOTA_EXHAUSTED_SIGNATURE) {
        StudioError::QuotaExceeded
    } else if message.contains(ENTITY_NOT_FOUND_SIGNATURE) {
        StudioError::InvalidCredential
    } else {
        return err;
    };
    if let Some(reselector) = reselector {
        reselector.request_reselection();
    }
    classified
}

/// Runs [`VARIANTS_PER_ACTION`] generations of the same request concurrently
/// and waits for all of them. Any failure fails the batch; partial results
/// are dropped. With several failures the earliest-issued one is returned.
pub fn generate_variants(
    model: &dyn ImageModel,
    request: &GenerationRequest,
) -> StudioResult<Vec<String>> {
    thread::scope(|scope| {
        let handles: Vec<_> = (0..VARIANTS_PER_ACTION)
            .map(|_| scope.spawn(move || model.generate(request)))
            .collect();

        let mut images = Vec::with_capacity(VARIANTS_PER_ACTION);
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(image)) => images.push(image),
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(StudioError::Upstream(
                        "generation worker panicked".to_string(),
                    ));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(images),
        }
    })
}

/// Spawns a configured command to let the user pick another credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReselector {
    program: String,
    args: Vec<String>,
}

impl CommandReselector {
    /// Capability probe: `None` unless `raw` parses into a program that can be found.
    pub fn probe(raw: Option<&str>) -> Option<Self> {
        let words = shell_words::split(raw?.trim()).ok()?;
        let (program, args) = words.split_first()?;
        if program.is_empty() || resolve_program(program).is_none() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl CredentialReselector for CommandReselector {
    fn request_reselection(&self) {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            // Reaped off-thread; the caller never waits on the picker.
            Ok(mut child) => {
                thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(err) => {
                eprintln!("sceneforge: credential reselection command failed to start: {err}");
            }
        }
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Top-level generate action over a [`StudioState`].
pub struct Studio {
    state: StudioState,
    model: Box<dyn ImageModel>,
    reselector: Option<Box<dyn CredentialReselector>>,
    events: Option<EventWriter>,
}

impl Studio {
    pub fn new(model: Box<dyn ImageModel>) -> Self {
        Self {
            state: StudioState::new(),
            model,
            reselector: None,
            events: None,
        }
    }

    pub fn with_reselector(mut self, reselector: Option<Box<dyn CredentialReselector>>) -> Self {
        self.reselector = reselector;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &StudioState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StudioState {
        &mut self.state
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Validates the form, runs the paired generation and prepends both
    /// images to the results. Every failure is also stored as the state's
    /// user-facing error, and the loading flag is always cleared.
    pub fn generate(&mut self) -> StudioResult<Vec<String>> {
        if let Err(err) = self.state.validate() {
            self.state.set_error(err.user_message());
            self.emit(
                "generation_rejected",
                json!({ "reason": err.kind(), "message": err.to_string() }),
            );
            return Err(err);
        }

        let request = self.state.build_request();
        self.state.begin_generation();
        self.emit(
            "generation_started",
            json!({
                "generation": self.state.generations_started(),
                "model": self.model.name(),
                "image_parts": request.image_count(),
                "variants": VARIANTS_PER_ACTION,
            }),
        );

        let started = Instant::now();
        let outcome =
            generate_variants(self.model.as_ref(), &request).map_err(|err| self.classify(err));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(images) => {
                self.state.prepend_results(images.clone());
                self.emit(
                    "generation_finished",
                    json!({ "images": images.len(), "elapsed_ms": elapsed_ms }),
                );
            }
            Err(err) => {
                self.state.set_error(err.user_message());
                self.emit(
                    "generation_failed",
                    json!({
                        "reason": err.kind(),
                        "message": err.to_string(),
                        "elapsed_ms": elapsed_ms,
                    }),
                );
            }
        }

        self.state.end_generation();
        outcome
    }

    fn classify(&self, err: StudioError) -> StudioError {
        let classified = classify_failure(err, self.reselector.as_deref());
        let remediable = matches!(
            classified,
            StudioError::QuotaExceeded | StudioError::InvalidCredential
        );
        if remediable && self.reselector.is_some() {
            self.emit(
                "credential_reselect_requested",
                json!({ "reason": classified.kind() }),
            );
        }
        classified
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit_json(event_type, payload) {
            eprintln!("sceneforge: failed to record {event_type} event: {err:#}");
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
