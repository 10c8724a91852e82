//! `GET /platforms` (spec.md §6): supported platforms and their per-format
//! quality options, read from the `platforms` configuration table (spec.md
//! §6's "read-mostly configuration"), falling back to the closed in-code
//! vocabulary if the table has not been seeded.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::domain::{Format, Platform};

pub fn router() -> Router<AppState> {
    Router::new().route("/platforms", get(platforms))
}

#[derive(Debug, Serialize)]
pub struct PlatformsResponse {
    pub platforms: Vec<PlatformEntry>,
}

#[derive(Debug, Serialize)]
pub struct PlatformEntry {
    pub platform: &'static str,
    pub formats: BTreeMap<&'static str, &'static [&'static str]>,
}

async fn platforms(State(state): State<AppState>) -> ApiResult<Json<PlatformsResponse>> {
    let rows = state.store.list_platform_options().await?;

    let entries = if rows.is_empty() {
        Platform::all()
            .iter()
            .map(|p| PlatformEntry {
                platform: p.as_str(),
                formats: [Format::Mp3, Format::Mp4]
                    .into_iter()
                    .map(|f| (f.as_str(), f.quality_options()))
                    .collect(),
            })
            .collect()
    } else {
        let mut by_platform: BTreeMap<String, BTreeMap<&'static str, &'static [&'static str]>> = BTreeMap::new();
        for row in rows {
            if let Ok(format) = row.format.parse::<Format>() {
                by_platform.entry(row.platform).or_default().insert(format.as_str(), format.quality_options());
            }
        }
        by_platform
            .into_iter()
            .filter_map(|(platform, formats)| {
                Platform::all()
                    .iter()
                    .find(|p| p.as_str() == platform)
                    .map(|p| PlatformEntry { platform: p.as_str(), formats })
            })
            .collect()
    };

    Ok(Json(PlatformsResponse { platforms: entries }))
}
