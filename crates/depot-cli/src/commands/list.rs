//! List command - list the children of a collection

use console::style;
use depot_core::RetrievalRequest;

use super::parse_path;
use crate::context::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, repo: &str, path: &str, json: bool) -> Result<()> {
    let mut request = RetrievalRequest::new(parse_path(path)?).external();
    let result = ctx.registry.list_items(repo, &mut request).await;
    display::print_events(&request.take_events());
    let items = result?;

    if json {
        let values: Vec<_> = items.iter().map(display::item_json).collect();
        println!("{:#}", serde_json::Value::Array(values));
        return Ok(());
    }

    if items.is_empty() {
        println!("{} is empty in {}", request.path, repo);
        return Ok(());
    }

    println!(
        "{:<10} {:>12}  {}",
        style("KIND").bold(),
        style("SIZE").bold(),
        style("PATH").bold()
    );
    for item in &items {
        println!("{}", display::item_line(item));
    }

    Ok(())
}
