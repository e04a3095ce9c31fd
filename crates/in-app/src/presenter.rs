//! UI-side collaborators. Rendering and view traversal belong to the host;
//! the engine only asks for a display and listens for surface visibility.

use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::Campaign;
use serde::{Deserialize, Serialize};

/// Terminal state of one presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayOutcome {
    /// Presented; the user left through the content.
    Shown,
    /// Presented and then closed by the user.
    Dismissed,
    /// Never reached the screen.
    Failed,
}

#[async_trait]
pub trait CampaignPresenter: Send + Sync {
    /// Resolves once the presentation reached a terminal state.
    async fn display(&self, campaign: Arc<Campaign>) -> DisplayOutcome;
}

/// A named UI surface as reported by the host's view listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub identifier: Option<String>,
    pub visible: bool,
}

impl Surface {
    pub fn visible(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            visible: true,
        }
    }

    pub fn hidden(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            visible: false,
        }
    }

    /// Identifier of a visible, named surface.
    pub fn visible_identifier(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .filter(|id| self.visible && !id.trim().is_empty())
    }
}

/// Which lifecycle callback reported a surface change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceChange {
    Superview,
    Window,
    Identifier,
}

pub trait ViewListener: Send + Sync {
    fn visible_surfaces(&self) -> Vec<Surface>;
}

pub trait TooltipPresenter: Send + Sync {
    fn present(&self, campaign: &Campaign, surface: &Surface);
}
