//! Repos command - list configured repositories

use console::style;
use depot_repo::{Repository, RepositoryKind};

use crate::context::Context;
use crate::error::{CliError, Result};

fn detail(repo: &Repository) -> String {
    if let Some(proxy) = repo.proxy() {
        format!("{} [{}]", proxy.remote().remote_url(), proxy.health().proxy_mode())
    } else if let Some(group) = repo.group() {
        group.members().join(", ")
    } else {
        String::new()
    }
}

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    if json {
        let value = serde_json::to_value(&ctx.config.repositories).map_err(|e| CliError::Repository {
            message: e.to_string(),
        })?;
        println!("{:#}", value);
        return Ok(());
    }

    let ids = ctx.registry.ids();
    if ids.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<10} {:<10} {}",
        style("ID").bold(),
        style("KIND").bold(),
        style("FORMAT").bold(),
        style("STATUS").bold(),
        style("DETAIL").bold()
    );
    for id in ids {
        let repo = ctx.registry.get(&id)?;
        let kind = match repo.kind() {
            RepositoryKind::Hosted => style(repo.kind()).cyan(),
            RepositoryKind::Proxy => style(repo.kind()).magenta(),
            RepositoryKind::Group => style(repo.kind()).blue(),
        };
        println!(
            "{:<20} {:<8} {:<10} {:<10} {}",
            id,
            kind,
            repo.format(),
            if repo.local_status().should_service_request() {
                "in-service"
            } else {
                "offline"
            },
            detail(&repo)
        );
    }
    Ok(())
}
