use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

const SAMPLE_PROFILE: &str = include_str!("sample_profile.toml");
const MAX_LEVEL: u8 = 100;

/// Everything the portfolio renders, apart from the contact form itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub hero: Hero,
    pub about: About,
    pub skills: Vec<SkillCategory>,
    pub projects: Vec<Project>,
    pub experience: Vec<Experience>,
    pub contact: ContactDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hero {
    pub name: String,
    pub title: String,
    pub tagline: String,
    pub roles: Vec<String>,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    pub label: String,
    pub value: Option<String>,
    pub href: String,
}

impl Link {
    pub fn is_visible(&self) -> bool {
        !self.href.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct About {
    pub paragraphs: Vec<String>,
    pub highlights: Vec<Highlight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillCategory {
    pub title: String,
    pub skills: Vec<Skill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub level: u8,
}

impl Skill {
    pub fn ratio(&self) -> f64 {
        f64::from(self.level.min(MAX_LEVEL)) / f64::from(MAX_LEVEL)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub title: String,
    pub description: String,
    pub tech: Vec<String>,
    pub features: Vec<String>,
    pub code_link: Option<String>,
    pub demo_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExperienceKind {
    Education,
    Contribution,
    Project,
    #[default]
    Work,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub kind: ExperienceKind,
    pub title: String,
    pub organization: String,
    pub period: String,
    pub description: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactDetails {
    pub info: Vec<Link>,
    pub social: Vec<Link>,
}

impl ContactDetails {
    /// Social links with nowhere to go are not shown.
    pub fn visible_social(&self) -> impl Iterator<Item = &Link> {
        self.social.iter().filter(|link| link.is_visible())
    }
}

impl Profile {
    pub fn sample() -> Result<Self> {
        Self::from_toml(SAMPLE_PROFILE).context("parsing built-in sample profile")
    }

    /// Reads `path` when given, otherwise falls back to the sample profile.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading profile {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("parsing profile {}", path.display()))
            }
            None => Self::sample(),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut profile: Profile = toml::from_str(raw)?;
        profile.normalize();
        Ok(profile)
    }

    fn normalize(&mut self) {
        for skill in self.skills.iter_mut().flat_map(|c| c.skills.iter_mut()) {
            if skill.level > MAX_LEVEL {
                tracing::warn!(skill = %skill.name, level = skill.level, "skill level clamped to 100");
                skill.level = MAX_LEVEL;
            }
        }
    }
}
