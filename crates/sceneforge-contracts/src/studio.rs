use crate::errors::StudioError;
use crate::images::ImageRef;
use crate::messages;
use crate::request::{build_generation_request, CharacterSlot, GenerationRequest};

/// Form inputs, generated results and the loading/error flags of one session.
#[derive(Debug, Clone, Default)]
pub struct StudioState {
    characters: Vec<CharacterSlot>,
    background: Option<ImageRef>,
    use_background: bool,
    prompt: String,
    results: Vec<String>,
    loading: bool,
    error: Option<String>,
    generations_started: u64,
}

impl StudioState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn characters(&self) -> &[CharacterSlot] {
        &self.characters
    }

    pub fn background(&self) -> Option<&ImageRef> {
        self.background.as_ref()
    }

    pub fn use_background(&self) -> bool {
        self.use_background
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Newest first.
    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn generations_started(&self) -> u64 {
        self.generations_started
    }

    /// Adds a selected character slot and returns its index.
    pub fn add_character(&mut self, image: ImageRef) -> usize {
        self.characters.push(CharacterSlot::selected(image));
        self.characters.len() - 1
    }

    pub fn add_empty_slot(&mut self) -> usize {
        self.characters.push(CharacterSlot::default());
        self.characters.len() - 1
    }

    /// Replaces the image in slot `index` and selects it.
    pub fn replace_character(&mut self, index: usize, image: ImageRef) -> bool {
        let Some(slot) = self.characters.get_mut(index) else {
            return false;
        };
        slot.image = Some(image);
        slot.selected = true;
        true
    }

    pub fn remove_character(&mut self, index: usize) -> Option<CharacterSlot> {
        if index >= self.characters.len() {
            return None;
        }
        Some(self.characters.remove(index))
    }

    pub fn set_character_selected(&mut self, index: usize, selected: bool) -> bool {
        let Some(slot) = self.characters.get_mut(index) else {
            return false;
        };
        slot.selected = selected;
        true
    }

    /// Flips the selection of slot `index`, returning the new value.
    pub fn toggle_character(&mut self, index: usize) -> Option<bool> {
        let slot = self.characters.get_mut(index)?;
        slot.selected = !slot.selected;
        Some(slot.selected)
    }

    /// Setting a background enables it; clearing disables it.
    pub fn set_background(&mut self, image: Option<ImageRef>) {
        self.use_background = image.is_some();
        self.background = image;
    }

    pub fn set_use_background(&mut self, use_background: bool) {
        self.use_background = use_background;
    }

    pub fn toggle_background(&mut self) -> bool {
        self.use_background = !self.use_background;
        self.use_background
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    fn has_selected_character(&self) -> bool {
        self.characters
            .iter()
            .any(|slot| slot.selected && slot.image.as_ref().is_some_and(ImageRef::is_complete))
    }

    fn has_used_background(&self) -> bool {
        self.use_background && self.background.as_ref().is_some_and(ImageRef::has_payload)
    }

    /// Checks run before any network call.
    pub fn validate(&self) -> Result<(), StudioError> {
        if !self.has_selected_character() && !self.has_used_background() {
            return Err(StudioError::Validation(
                messages::NO_IMAGES_SELECTED.to_string(),
            ));
        }
        if self.prompt.trim().is_empty() {
            return Err(StudioError::Validation(messages::EMPTY_PROMPT.to_string()));
        }
        Ok(())
    }

    pub fn build_request(&self) -> GenerationRequest {
        build_generation_request(
            &self.prompt,
            self.background.as_ref(),
            self.use_background,
            &self.characters,
        )
    }

    pub fn begin_generation(&mut self) {
        self.loading = true;
        self.error = None;
        self.generations_started += 1;
    }

    /// Prepends a finished batch ahead of earlier results.
    pub fn prepend_results(&mut self, batch: Vec<String>) {
        let mut merged = batch;
        merged.append(&mut self.results);
        self.results = merged;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn end_generation(&mut self) {
        self.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(payload: &str) -> ImageRef {
        ImageRef::new(payload, "image/png")
    }

    #[test]
    fn validation_requires_an_image_source() {
        let mut state = StudioState::new();
        state.set_prompt("a castle");
        assert_eq!(
            state.validate(),
            Err(StudioError::Validation(messages::NO_IMAGES_SELECTED.to_string()))
        );

        let idx = state.add_character(image("A"));
        assert!(state.validate().is_ok());

        state.toggle_character(idx);
        assert!(state.validate().is_err());

        state.set_background(Some(image("BG")));
        assert!(state.validate().is_ok());
        state.toggle_background();
        assert!(state.validate().is_err());
    }

    #[test]
    fn validation_rejects_blank_prompt() {
        let mut state = StudioState::new();
        state.add_character(image("A"));
        state.set_prompt("   \n\t");
        assert_eq!(
            state.validate(),
            Err(StudioError::Validation(messages::EMPTY_PROMPT.to_string()))
        );
    }

    #[test]
    fn empty_slots_do_not_count_as_selected() {
        let mut state = StudioState::new();
        state.set_prompt("p");
        let idx = state.add_empty_slot();
        state.set_character_selected(idx, true);
        assert!(state.validate().is_err());

        assert!(state.replace_character(idx, image("A")));
        assert!(state.validate().is_ok());
        assert!(state.remove_character(idx).is_some());
        assert!(state.remove_character(idx).is_none());
        assert!(state.validate().is_err());
    }

    #[test]
    fn results_are_prepended() {
        let mut state = StudioState::new();
        state.prepend_results(vec!["a".to_string(), "b".to_string()]);
        state.prepend_results(vec!["c".to_string(), "d".to_string()]);
        assert_eq!(state.results(), &["c", "d", "a", "b"]);
    }

    #[test]
    fn generation_flags_transition() {
        let mut state = StudioState::new();
        state.set_error("old");
        state.begin_generation();
        assert!(state.is_loading());
        assert_eq!(state.error(), None);
        assert_eq!(state.generations_started(), 1);
        state.end_generation();
        assert!(!state.is_loading());
    }

    #[test]
    fn build_request_uses_current_form() {
        let mut state = StudioState::new();
        state.add_character(image("A"));
        state.set_background(Some(image("BG")));
        state.set_prompt("scene");
        let request = state.build_request();
        assert_eq!(request.parts.len(), 3);
        assert_eq!(request.image_count(), 2);
    }
}
