//! Load priorities
//!
//! Within one scheduling pass, items on screen are admitted before items in
//! the buffer rows, so a nearly saturated pool is spent on what the user is
//! looking at.

use serde::{Deserialize, Serialize};

/// Priority of a load intent
///
/// Higher variants are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPriority {
    /// Buffer rows just outside the viewport (prefetch for smooth scrolling)
    Buffer = 0,

    /// Items intersecting the viewport
    Visible = 1,
}

impl LoadPriority {
    /// Priority for an item given whether it is on screen
    pub fn for_visibility(visible: bool) -> Self {
        if visible {
            LoadPriority::Visible
        } else {
            LoadPriority::Buffer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(LoadPriority::Visible > LoadPriority::Buffer);

        let mut priorities = vec![LoadPriority::Buffer, LoadPriority::Visible, LoadPriority::Buffer];
        priorities.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities[0], LoadPriority::Visible);
    }

    #[test]
    fn test_for_visibility() {
        assert_eq!(LoadPriority::for_visibility(true), LoadPriority::Visible);
        assert_eq!(LoadPriority::for_visibility(false), LoadPriority::Buffer);
    }
}
