use anyhow::{bail, Result};
use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::storage::LocalStore;

pub const THEME_KEY: &str = "theme";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ThemeFlag {
    Dark,
    Light,
}

impl Default for ThemeFlag {
    fn default() -> Self {
        ThemeFlag::Dark
    }
}

impl ThemeFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemeFlag::Dark => "dark",
            ThemeFlag::Light => "light",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ThemeFlag::Dark => ThemeFlag::Light,
            ThemeFlag::Light => ThemeFlag::Dark,
        }
    }

    /// Reads the persisted flag. A stored value other than `"light"` means
    /// dark; `fallback` applies only when nothing has been stored yet.
    pub fn load(store: &dyn LocalStore, fallback: ThemeFlag) -> Result<Self> {
        let stored = store.get_item(THEME_KEY)?;
        Ok(match stored.as_deref() {
            Some("light") => ThemeFlag::Light,
            Some("dark") => ThemeFlag::Dark,
            Some(other) => {
                tracing::warn!(value = other, "unknown stored theme, using dark");
                ThemeFlag::Dark
            }
            None => fallback,
        })
    }

    pub fn persist(self, store: &dyn LocalStore) -> Result<()> {
        store.set_item(THEME_KEY, self.as_str())
    }

    /// Flips the flag and writes the new value back.
    pub fn toggle(self, store: &dyn LocalStore) -> Result<Self> {
        let next = self.toggled();
        next.persist(store)?;
        tracing::debug!(theme = %next, "theme toggled");
        Ok(next)
    }

    pub fn parse_arg(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().parse::<ThemeFlag>() {
            Ok(flag) => Ok(flag),
            Err(_) => bail!("unknown theme '{raw}' (expected dark or light)"),
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            ThemeFlag::Dark => Palette {
                background: Color::Rgb(17, 24, 39),
                surface: Color::Rgb(31, 41, 55),
                text: Color::White,
                muted: Color::Rgb(156, 163, 175),
                accent: Color::Rgb(34, 197, 94),
                accent_alt: Color::Rgb(59, 130, 246),
                border: Color::Rgb(55, 65, 81),
                error: Color::Rgb(248, 113, 113),
            },
            ThemeFlag::Light => Palette {
                background: Color::Rgb(249, 250, 251),
                surface: Color::White,
                text: Color::Rgb(17, 24, 39),
                muted: Color::Rgb(75, 85, 99),
                accent: Color::Rgb(22, 163, 74),
                accent_alt: Color::Rgb(37, 99, 235),
                border: Color::Rgb(209, 213, 219),
                error: Color::Rgb(220, 38, 38),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Color,
    pub surface: Color,
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub accent_alt: Color,
    pub border: Color,
    pub error: Color,
}
