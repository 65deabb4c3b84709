//! Filter criteria
//!
//! Criteria are applied in a fixed order: folder scope, then visibility
//! (favorites / hidden), then tags.

use crate::item::ItemRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// How the active tag set is matched against an item's tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    /// Item must carry every active tag
    #[default]
    And,

    /// Item must carry at least one active tag
    Or,
}

/// Active filter
///
/// `favorites_only` and `hidden_only` are mutually exclusive visibility
/// modes; when both are set `hidden_only` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    /// Restrict to one folder
    pub folder: Option<String>,

    pub favorites_only: bool,

    /// Show only hidden items
    pub hidden_only: bool,

    /// Include hidden items alongside visible ones
    pub show_hidden: bool,

    /// Active tags; empty disables tag filtering
    pub tags: BTreeSet<String>,

    pub tag_mode: TagMode,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn favorites_only(mut self) -> Self {
        self.favorites_only = true;
        self
    }

    pub fn hidden_only(mut self) -> Self {
        self.hidden_only = true;
        self
    }

    pub fn with_show_hidden(mut self, show_hidden: bool) -> Self {
        self.show_hidden = show_hidden;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I, mode: TagMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.tag_mode = mode;
        self
    }

    /// True when no criterion restricts the item set
    pub fn is_empty(&self) -> bool {
        self.folder.is_none()
            && !self.favorites_only
            && !self.hidden_only
            && self.tags.is_empty()
    }

    /// Precompute lookup state for repeated matching
    pub fn compile(&self) -> CompiledFilter<'_> {
        CompiledFilter {
            criteria: self,
            tags: self.tags.iter().map(String::as_str).collect(),
        }
    }

    /// Match a single item. Prefer [`compile`](Self::compile) in loops.
    pub fn matches(&self, item: &ItemRecord) -> bool {
        self.compile().matches(item)
    }
}

/// Filter criteria with the active tag set precomputed
#[derive(Debug)]
pub struct CompiledFilter<'a> {
    criteria: &'a FilterCriteria,
    tags: HashSet<&'a str>,
}

impl CompiledFilter<'_> {
    pub fn matches(&self, item: &ItemRecord) -> bool {
        self.matches_folder(item) && self.matches_visibility(item) && self.matches_tags(item)
    }

    fn matches_folder(&self, item: &ItemRecord) -> bool {
        match &self.criteria.folder {
            Some(folder) => item.folder.as_ref() == Some(folder),
            None => true,
        }
    }

    fn matches_visibility(&self, item: &ItemRecord) -> bool {
        let criteria = self.criteria;
        if criteria.hidden_only {
            return item.hidden;
        }
        if item.hidden && !criteria.show_hidden {
            return false;
        }
        !criteria.favorites_only || item.favorite
    }

    fn matches_tags(&self, item: &ItemRecord) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        match self.criteria.tag_mode {
            TagMode::And => self.tags.iter().all(|tag| item.tags.contains(*tag)),
            TagMode::Or => item.tags.iter().any(|tag| self.tags.contains(tag.as_str())),
        }
    }
}
