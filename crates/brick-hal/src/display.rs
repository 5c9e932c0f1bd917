//! Display facade.
//!
//! Rendering belongs to an external [`DisplaySurface`]; the brick only tracks
//! whether something is shown so that [`Brick::stop`](crate::Brick::stop) can
//! hide it.

use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;

use tracing::debug;

/// Renderer the display delegates to.
pub trait DisplaySurface: Send + Sync {
    fn show_image(&self, path: &Path);

    fn add_label(&self, text: &str, x: i32, y: i32);

    fn clear(&self);

    fn hide(&self);
}

/// Surface used when no renderer is attached.  Calls are only logged.
#[derive(Debug, Default)]
pub struct HeadlessSurface;

impl DisplaySurface for HeadlessSurface {
    fn show_image(&self, path: &Path) {
        debug!(path = %path.display(), "headless display: image");
    }

    fn add_label(&self, text: &str, x: i32, y: i32) {
        debug!(text, x, y, "headless display: label");
    }

    fn clear(&self) {}

    fn hide(&self) {}
}

pub struct Display {
    surface: Box<dyn DisplaySurface>,
    visible: Mutex<bool>,
}

impl Display {
    pub fn new(surface: Box<dyn DisplaySurface>) -> Self {
        Self {
            surface,
            visible: Mutex::new(false),
        }
    }

    pub fn show_image(&self, path: impl AsRef<Path>) {
        let mut visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
        self.surface.show_image(path.as_ref());
        *visible = true;
    }

    pub fn add_label(&self, text: &str, x: i32, y: i32) {
        let mut visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
        self.surface.add_label(text, x, y);
        *visible = true;
    }

    /// Remove all content; the surface stays up.
    pub fn clear(&self) {
        let _visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
        self.surface.clear();
    }

    /// Take the surface down.  Hiding an already hidden display does nothing.
    pub fn hide(&self) {
        let mut visible = self.visible.lock().unwrap_or_else(PoisonError::into_inner);
        if *visible {
            self.surface.clear();
            self.surface.hide();
            *visible = false;
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSurface;

    #[test]
    fn showing_content_makes_display_visible() {
        let surface = RecordingSurface::new();
        let display = Display::new(Box::new(surface.clone()));
        assert!(!display.is_visible());

        display.add_label("hello", 10, 20);
        display.show_image("/tmp/logo.png");
        assert!(display.is_visible());
        assert_eq!(
            surface.calls(),
            vec!["label hello 10 20".to_string(), "image /tmp/logo.png".to_string()]
        );
    }

    #[test]
    fn hide_is_idempotent() {
        let surface = RecordingSurface::new();
        let display = Display::new(Box::new(surface.clone()));
        display.show_image("a.png");

        display.hide();
        display.hide();
        assert!(!display.is_visible());
        assert_eq!(surface.calls().iter().filter(|c| *c == "hide").count(), 1);
    }
}
