/// Two-element system prompt cycle used to defeat server-side prefix caching.
#[derive(Debug, Clone)]
pub struct SystemPromptRotation {
    prompts: [String; 2],
    current: Option<String>,
}

impl SystemPromptRotation {
    pub fn new(prompts: [String; 2]) -> Self {
        Self {
            prompts,
            current: None,
        }
    }

    /// Switch to whichever prompt is not the current one and return it.
    pub fn rotate(&mut self) -> &str {
        let next = match &self.current {
            Some(current) if *current == self.prompts[0] => self.prompts[1].clone(),
            _ => self.prompts[0].clone(),
        };
        self.current.insert(next).as_str()
    }

    /// The prompt used by the last rotated request, if any.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Current prompt, rotating first when none has been chosen yet.
    pub fn current_or_rotate(&mut self) -> String {
        match &self.current {
            Some(current) => current.clone(),
            None => self.rotate().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> SystemPromptRotation {
        SystemPromptRotation::new(["A".to_string(), "B".to_string()])
    }

    #[test]
    fn test_starts_with_first_prompt() {
        let mut r = rotation();
        assert_eq!(r.current(), None);
        assert_eq!(r.rotate(), "A");
        assert_eq!(r.current(), Some("A"));
    }

    #[test]
    fn test_adjacent_prompts_always_differ() {
        let mut r = rotation();
        let sent: Vec<String> = (0..9).map(|_| r.rotate().to_string()).collect();
        for pair in sent.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(sent[..4], ["A", "B", "A", "B"]);
    }

    #[test]
    fn test_current_or_rotate_does_not_flip() {
        let mut r = rotation();
        assert_eq!(r.current_or_rotate(), "A");
        assert_eq!(r.current_or_rotate(), "A");
        assert_eq!(r.rotate(), "B");
    }
}
