//! Get command - retrieve one item and write its content

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use depot_core::RetrievalRequest;

use super::parse_path;
use crate::context::Context;
use crate::display;
use crate::error::{CliError, Result};

/// Request flags selected on the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    pub local_only: bool,
    pub remote_only: bool,
    pub as_expired: bool,
    pub timeout: Option<u64>,
    pub json: bool,
}

impl GetOptions {
    fn request(&self, path: depot_core::RepositoryPath) -> RetrievalRequest {
        let mut request = RetrievalRequest::new(path).external();
        request.flags.local_only = self.local_only;
        request.flags.remote_only = self.remote_only;
        request.flags.as_expired = self.as_expired;
        if let Some(secs) = self.timeout {
            request = request.with_deadline(Duration::from_secs(secs));
        }
        request
    }
}

pub async fn run(
    ctx: &Context,
    repo: &str,
    path: &str,
    output: Option<&Path>,
    options: GetOptions,
) -> Result<()> {
    let mut request = options.request(parse_path(path)?);
    let result = ctx.registry.retrieve_item(repo, &mut request).await;
    display::print_events(&request.take_events());
    let item = result?;

    if options.json {
        println!("{:#}", display::item_json(&item));
        return Ok(());
    }

    if item.is_collection() {
        return Err(CliError::usage(format!(
            "{} is a collection in '{}', use 'depot list {} {}'",
            item.path, repo, repo, item.path
        )));
    }

    match output {
        Some(file) => {
            std::fs::write(file, item.bytes())?;
            display::success(format!("Wrote {} bytes to {}", item.len(), file.display()));
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(item.bytes())?;
            stdout.flush()?;
        }
    }

    Ok(())
}
