//! Proxy commands - proxy mode administration and remote status

use console::style;
use depot_core::{ProxyMode, RemoteStatus};
use depot_repo::ProxyFacet;

use crate::context::Context;
use crate::display;
use crate::error::{CliError, Result};

fn not_a_proxy(repo: &str) -> CliError {
    CliError::usage(format!("'{}' is not a proxy repository", repo))
}

fn styled_mode(mode: ProxyMode) -> String {
    match mode {
        ProxyMode::Allow => style(mode).green().to_string(),
        ProxyMode::BlockedAuto => style(mode).yellow().to_string(),
        ProxyMode::BlockedManual => style(mode).red().to_string(),
    }
}

fn styled_status(status: &RemoteStatus) -> String {
    match status {
        RemoteStatus::Available => style(status).green().to_string(),
        RemoteStatus::Unavailable { .. } => style(status).red().to_string(),
        RemoteStatus::Unknown => style(status).dim().to_string(),
    }
}

/// Show the proxy mode, or block/allow remote access when `blocked` is given
///
/// A manual block is written back to the configuration so it survives
/// restarts; automatic blocks never are.
pub fn state(ctx: &mut Context, repo: &str, blocked: Option<bool>, reason: Option<String>) -> Result<()> {
    let repository = ctx.registry.get(repo)?;
    let proxy = repository.proxy().ok_or_else(|| not_a_proxy(repo))?;

    let Some(blocked) = blocked else {
        println!("{}: {}", repo, styled_mode(proxy.health().proxy_mode()));
        return Ok(());
    };

    let mode = if blocked {
        ProxyMode::BlockedManual
    } else {
        ProxyMode::Allow
    };
    let event = ctx.registry.set_proxy_mode(repo, mode, reason)?;

    if let Some(def) = ctx.config.get_mut(repo).and_then(|d| d.proxy.as_mut()) {
        def.blocked = blocked;
    }
    ctx.save_config()?;

    if let Some(event) = event {
        display::print_events(&[event]);
    }
    display::success(format!("{} is now {}", repo, proxy.health().proxy_mode()));
    Ok(())
}

fn print_status(repo: &str, proxy: &ProxyFacet, status: &RemoteStatus) {
    let health = proxy.health();
    println!("{:<14} {}", style("Repository:").bold(), repo);
    println!("{:<14} {}", style("Remote:").bold(), proxy.remote().remote_url());
    println!("{:<14} {}", style("Mode:").bold(), styled_mode(health.proxy_mode()));
    println!("{:<14} {}", style("Status:").bold(), styled_status(status));
    if health.proxy_mode() == ProxyMode::BlockedAuto {
        println!(
            "{:<14} {}s",
            style("Retry in:").bold(),
            health.retain_time().as_secs()
        );
    }
}

/// Show the remote status of a proxy, probing the origin when `check` is set
pub async fn status(ctx: &Context, repo: &str, check: bool) -> Result<()> {
    let repository = ctx.registry.get(repo)?;
    let proxy = repository.proxy().ok_or_else(|| not_a_proxy(repo))?;
    let status = ctx.registry.remote_status(repo, check).await?;
    print_status(repo, proxy, &status);
    Ok(())
}
