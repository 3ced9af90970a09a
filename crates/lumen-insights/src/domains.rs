//! Life-domain classification.
//!
//! Every analyzed entry carries semantic tags (people, activities, goals)
//! produced by the upstream analysis pipeline. This module buckets a tag into
//! one of eight fixed life domains via category and keyword rules. The
//! function is deterministic and side-effect free so the incremental updater
//! and any offline recomputation classify identically.

use crate::model::EntryTag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The eight fixed life domains used to bucket journaling activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifeDomain {
    Work,
    Relationships,
    Health,
    Creativity,
    Spirituality,
    PersonalGrowth,
    Family,
    Finances,
}

impl LifeDomain {
    pub const ALL: [LifeDomain; 8] = [
        LifeDomain::Work,
        LifeDomain::Relationships,
        LifeDomain::Health,
        LifeDomain::Creativity,
        LifeDomain::Spirituality,
        LifeDomain::PersonalGrowth,
        LifeDomain::Family,
        LifeDomain::Finances,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifeDomain::Work => "work",
            LifeDomain::Relationships => "relationships",
            LifeDomain::Health => "health",
            LifeDomain::Creativity => "creativity",
            LifeDomain::Spirituality => "spirituality",
            LifeDomain::PersonalGrowth => "personal-growth",
            LifeDomain::Family => "family",
            LifeDomain::Finances => "finances",
        }
    }
}

impl fmt::Display for LifeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const HEALTH_KEYWORDS: &[&str] = &[
    "gym", "run", "jog", "yoga", "workout", "exercise", "walk", "hike", "swim",
    "cycling", "climb", "stretch", "meditat", "sleep", "diet", "therapy",
];

const CREATIVITY_KEYWORDS: &[&str] = &[
    "paint", "draw", "sketch", "writ", "poetry", "music", "guitar", "piano",
    "sing", "compos", "photograph", "craft", "pottery", "design", "sculpt",
];

const WORK_KEYWORDS: &[&str] = &[
    "work", "meeting", "project", "deadline", "client", "presentation",
    "interview", "email", "career", "promotion", "standup", "sprint", "office",
    "job", "launch",
];

fn matches_any(content: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| content.contains(kw))
}

/// Buckets a tag into a life domain, or `None` when no rule applies.
///
/// Rules, by tag type:
/// - `person`: `family` category maps to Family, anything else to Relationships.
/// - `activity`: keyword sets checked against lowercased content in priority
///   order Health, Creativity, Work; no match means no domain.
/// - `goal`: Work when a work keyword matches, otherwise PersonalGrowth
///   (an unrecognized goal is still growth, never unclassified).
/// - any other type: no domain.
pub fn map_tag_to_domain(tag: &EntryTag) -> Option<LifeDomain> {
    match tag.tag_type.as_str() {
        "person" => {
            if tag.category.as_deref() == Some("family") {
                Some(LifeDomain::Family)
            } else {
                Some(LifeDomain::Relationships)
            }
        }
        "activity" => {
            let content = tag.content.as_deref().unwrap_or("").to_lowercase();
            if matches_any(&content, HEALTH_KEYWORDS) {
                Some(LifeDomain::Health)
            } else if matches_any(&content, CREATIVITY_KEYWORDS) {
                Some(LifeDomain::Creativity)
            } else if matches_any(&content, WORK_KEYWORDS) {
                Some(LifeDomain::Work)
            } else {
                None
            }
        }
        "goal" => {
            let content = tag.content.as_deref().unwrap_or("").to_lowercase();
            if matches_any(&content, WORK_KEYWORDS) {
                Some(LifeDomain::Work)
            } else {
                Some(LifeDomain::PersonalGrowth)
            }
        }
        _ => None,
    }
}
