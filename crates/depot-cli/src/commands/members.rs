//! Members command - inspect and change group membership

use console::style;

use crate::context::Context;
use crate::display;
use crate::error::{CliError, Result};

/// A requested membership change
#[derive(Debug, Clone)]
pub enum Change {
    Set(Vec<String>),
    Add(String),
    Remove(String),
}

pub fn run(ctx: &mut Context, group_id: &str, change: Option<Change>, transitive: bool) -> Result<()> {
    let repository = ctx.registry.get(group_id)?;
    let facet = repository
        .group()
        .ok_or_else(|| CliError::usage(format!("'{}' is not a group repository", group_id)))?;

    if let Some(change) = change {
        let event = match change {
            Change::Set(members) => ctx.registry.set_members(group_id, members)?,
            Change::Add(member) => ctx.registry.add_member(group_id, &member)?,
            Change::Remove(member) => ctx.registry.remove_member(group_id, &member)?.ok_or_else(|| {
                CliError::usage(format!("'{}' is not a member of '{}'", member, group_id))
            })?,
        };

        if let Some(def) = ctx.config.get_mut(group_id).and_then(|d| d.group.as_mut()) {
            def.members = facet.members();
        }
        ctx.save_config()?;
        display::print_events(&[event]);
    }

    let members = if transitive {
        ctx.registry.transitive_members(group_id)?
    } else {
        facet.members()
    };

    if members.is_empty() {
        println!("{} has no members", group_id);
        return Ok(());
    }
    for (i, member) in members.iter().enumerate() {
        let kind = ctx
            .registry
            .get(member)
            .map(|r| r.kind().to_string())
            .unwrap_or_else(|_| "missing".to_string());
        println!("{:>3}. {:<24} {}", i + 1, member, style(kind).dim());
    }
    Ok(())
}
