//! Cache maintenance commands - expire caches, expire the not-found cache,
//! evict unused items

use chrono::Utc;
use depot_core::{Item, RetrievalRequest};
use depot_repo::WalkerFilter;
use regex::Regex;

use super::parse_path;
use crate::context::Context;
use crate::display;
use crate::error::{CliError, Result};

/// Accepts items whose path matches a regular expression
struct PatternFilter(Regex);

impl WalkerFilter for PatternFilter {
    fn accept(&self, item: &Item) -> bool {
        self.0.is_match(item.path.as_str())
    }
}

fn pattern_filter(pattern: Option<&str>) -> Result<Option<PatternFilter>> {
    pattern
        .map(|p| {
            Regex::new(p)
                .map(PatternFilter)
                .map_err(|e| CliError::usage(format!("Invalid pattern '{}': {}", p, e)))
        })
        .transpose()
}

pub async fn expire_caches(ctx: &Context, repo: &str, path: &str, pattern: Option<&str>) -> Result<()> {
    let filter = pattern_filter(pattern)?;
    let mut request = RetrievalRequest::new(parse_path(path)?);
    let result = ctx
        .registry
        .expire_caches(repo, &mut request, filter.as_ref().map(|f| f as &dyn WalkerFilter))
        .await;
    display::print_events(&request.take_events());
    result?;

    display::success(format!("Expired caches of {} under {}", repo, request.path));
    Ok(())
}

pub async fn expire_nfc(ctx: &Context, repo: &str, path: &str, pattern: Option<&str>) -> Result<()> {
    let filter = pattern_filter(pattern)?;
    let mut request = RetrievalRequest::new(parse_path(path)?);
    let result = ctx
        .registry
        .expire_nfc(repo, &mut request, filter.as_ref().map(|f| f as &dyn WalkerFilter))
        .await;
    display::print_events(&request.take_events());
    result?;

    display::success(format!("Expired not-found cache of {} under {}", repo, request.path));
    Ok(())
}

pub async fn evict_unused(ctx: &Context, repo: &str, path: &str, days: i64) -> Result<()> {
    if days < 0 {
        return Err(CliError::usage("--days must not be negative"));
    }
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let mut request = RetrievalRequest::new(parse_path(path)?);
    let result = ctx.registry.evict_unused(repo, &mut request, cutoff).await;
    display::print_events(&request.take_events());
    let evicted = result?;

    for path in &evicted {
        println!("{}", path);
    }
    display::success(format!(
        "Evicted {} item(s) not requested since {}",
        evicted.len(),
        cutoff.format("%Y-%m-%d %H:%M:%S")
    ));
    Ok(())
}
