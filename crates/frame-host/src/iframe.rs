use std::sync::Arc;

use parking_lot::Mutex;
use transport_port::Window;

/// Sandbox attribute applied unless sandboxing is disabled. Without
/// `allow-same-origin` the frame document gets the opaque `"null"` origin.
pub const SANDBOX_POLICY: &str = "allow-scripts allow-forms allow-downloads";

/// Shared handle to an `<iframe>` element. Clones refer to the same element.
#[derive(Debug, Clone)]
pub struct IframeElement {
    inner: Arc<Mutex<IframeInner>>,
}

#[derive(Debug)]
struct IframeInner {
    src: String,
    content_window: Option<Window>,
    height_px: Option<f64>,
    sandbox: Option<String>,
}

impl IframeElement {
    /// An element that has not loaded a document yet.
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(IframeInner {
                src: src.into(),
                content_window: None,
                height_px: None,
                sandbox: None,
            })),
        }
    }

    pub fn with_content_window(src: impl Into<String>, window: Window) -> Self {
        let element = Self::new(src);
        element.set_content_window(Some(window));
        element
    }

    pub fn src(&self) -> String {
        self.inner.lock().src.clone()
    }

    pub fn set_src(&self, src: impl Into<String>) {
        self.inner.lock().src = src.into();
    }

    pub fn content_window(&self) -> Option<Window> {
        self.inner.lock().content_window.clone()
    }

    /// Swaps the loaded document, as a navigation or reload inside the frame would.
    pub fn set_content_window(&self, window: Option<Window>) {
        self.inner.lock().content_window = window;
    }

    pub fn height_px(&self) -> Option<f64> {
        self.inner.lock().height_px
    }

    pub(crate) fn set_height_px(&self, height: f64) {
        self.inner.lock().height_px = Some(height);
    }

    pub fn sandbox(&self) -> Option<String> {
        self.inner.lock().sandbox.clone()
    }

    pub(crate) fn set_sandbox(&self, sandbox: Option<&str>) {
        self.inner.lock().sandbox = sandbox.map(str::to_string);
    }
}
