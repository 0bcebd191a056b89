use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{VisionAnalyzer, VisionError, VisionImage};

/// Mock vision backend for tests: canned text or a forced failure.
pub struct MockVisionTool {
    response: String,
    failure: Option<VisionError>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockVisionTool {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            failure: None,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing(error: VisionError) -> Self {
        Self {
            response: String::new(),
            failure: Some(error),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

impl VisionAnalyzer for MockVisionTool {
    fn analyze(&self, _image: &VisionImage, prompt: &str) -> Result<String, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.response.clone()),
        }
    }

    fn probe(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::vision::png_fixture;

    #[test]
    fn mock_returns_configured_text() {
        let tool = MockVisionTool::new("Normal chest radiograph.");
        let text = tool.analyze(&png_fixture(), "Assess chest").unwrap();
        assert_eq!(text, "Normal chest radiograph.");
        assert_eq!(tool.calls(), 1);
        assert_eq!(tool.last_prompt().unwrap(), "Assess chest");
    }

    #[test]
    fn failing_mock_propagates_error() {
        let tool = MockVisionTool::failing(VisionError::Timeout(600));
        let err = tool.analyze(&png_fixture(), "x").unwrap_err();
        assert!(matches!(err, VisionError::Timeout(600)));
        assert!(!tool.probe());
    }
}
