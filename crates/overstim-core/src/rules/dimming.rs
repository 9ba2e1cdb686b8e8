//! `thumbnail-dimming`: one injected stylesheet tones thumbnails down.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{Rule, RuleContext, THUMBNAIL_DIMMING};
use crate::error::RuleError;
use crate::page::{ElementId, Page};

pub const DIMMING_CSS: &str = r#"
img[src*="thumbnail"],
img[src*="thumb"],
img[alt*="thumbnail"],
img[alt*="video"],
video[poster],
[class*="thumbnail"] img,
[class*="thumb"] img,
[id*="thumbnail"] img,
[id*="thumb"] img,
img[width][height] {
  filter: saturate(0.6) brightness(0.85) !important;
  transition: filter 0.3s ease !important;
}

ytd-thumbnail img,
ytd-thumbnail video,
#thumbnail img,
#thumbnail video,
[data-testid="post-content"] img,
[class*="Post"] img,
img[alt*="Image"],
[data-testid="tweet"] img {
  filter: saturate(0.6) brightness(0.85) !important;
}

img:hover,
video:hover {
  filter: saturate(0.75) brightness(0.9) !important;
}
"#;

#[derive(Default)]
pub struct ThumbnailDimming {
    injected: Cell<Option<ElementId>>,
    page: RefCell<Option<Rc<dyn Page>>>,
}

impl ThumbnailDimming {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Rule for ThumbnailDimming {
    fn id(&self) -> &str {
        THUMBNAIL_DIMMING
    }

    fn applies(&self, context: &RuleContext) -> bool {
        context.calm_active()
    }

    fn apply(&self, context: &RuleContext) -> Result<(), RuleError> {
        if self.injected.get().is_some() {
            return Ok(());
        }
        let page = context.page();
        let style = page
            .inject_stylesheet(DIMMING_CSS)
            .ok_or_else(|| RuleError::PageUnavailable {
                rule: THUMBNAIL_DIMMING.to_string(),
                message: "document has no head".to_string(),
            })?;
        self.injected.set(Some(style));
        *self.page.borrow_mut() = Some(Rc::clone(page));
        Ok(())
    }

    fn revert(&self) -> Result<(), RuleError> {
        let page = self.page.borrow_mut().take();
        if let (Some(style), Some(page)) = (self.injected.take(), page) {
            page.remove_element(style);
        }
        Ok(())
    }
}
