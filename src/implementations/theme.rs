use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    implementations::storage::{KeyValueStore, THEME},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything other than an explicit `"dark"` entry reads as light.
pub async fn user_theme(store: &dyn KeyValueStore) -> AppResult<Theme> {
    let stored = store.get(THEME).await?;
    Ok(match stored.as_deref() {
        Some("dark") => Theme::Dark,
        _ => Theme::Light,
    })
}

pub async fn save_user_theme(store: &dyn KeyValueStore, theme: Theme) -> AppResult<()> {
    store.set(THEME, theme.as_str()).await
}

pub async fn toggle_theme(store: &dyn KeyValueStore) -> AppResult<Theme> {
    let next = user_theme(store).await?.toggled();
    save_user_theme(store, next).await?;
    Ok(next)
}
