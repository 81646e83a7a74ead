use crate::git::repo::BranchTip;
use crate::git::GitRepo;
use crate::model::{AuthorStat, StatsOutput, StatsResult, Strategy, SCHEMA_VERSION};
use anyhow::Result;
use chrono::Utc;
use console::style;

const TOP_EXTENSIONS: usize = 3;

pub struct OutputContext<'a> {
    pub repo: &'a GitRepo,
    pub tip: &'a BranchTip,
    pub strategy: Strategy,
    pub since: Option<&'a str>,
    pub until: Option<&'a str>,
}

pub fn output_json(result: &StatsResult, ctx: &OutputContext<'_>) -> Result<()> {
    let output = StatsOutput {
        version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        repository_path: ctx.repo.path().to_string_lossy().to_string(),
        branch: ctx.tip.branch.clone(),
        commit_id: ctx.tip.commit_id.clone(),
        commit_time: ctx.tip.timestamp,
        strategy: ctx.strategy,
        since: ctx.since.map(str::to_string),
        until: ctx.until.map(str::to_string),
        total_lines: result.total_lines,
        authors: result.authors.clone(),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn output_ndjson(result: &StatsResult) -> Result<()> {
    for author in &result.authors {
        println!("{}", serde_json::to_string(author)?);
    }
    Ok(())
}

pub fn output_table(result: &StatsResult, ctx: &OutputContext<'_>) -> Result<()> {
    if result.authors.is_empty() {
        println!("No data to display");
        return Ok(());
    }

    match (ctx.since, ctx.until) {
        (Some(since), Some(until)) => println!("Filtering commits from {} to {}", since, until),
        (Some(since), None) => println!("Filtering commits since {}", since),
        (None, Some(until)) => println!("Filtering commits until {}", until),
        (None, None) => {}
    }

    let title = match ctx.strategy {
        Strategy::Fast => "Net Lines by Author",
        Strategy::Blame => "Owned Lines by Author",
    };
    println!(
        "{} {}",
        style(title).bold(),
        style(format!(
            "({} @ {}, {})",
            ctx.tip.branch,
            short_id(&ctx.tip.commit_id),
            ctx.tip.timestamp.format("%Y-%m-%d")
        ))
        .dim()
    );
    println!("{}", "─".repeat(78));
    println!(
        "{:<24} {:<28} {:>10} {:>7}  {}",
        style("Author").bold(),
        style("Email").bold(),
        style("Lines").bold(),
        style("Share").bold(),
        style("Top types").bold()
    );

    for author in &result.authors {
        let lines = if author.total_lines < 0 {
            style(author.total_lines.to_string()).red()
        } else {
            style(author.total_lines.to_string()).green()
        };
        println!(
            "{:<24} {:<28} {:>10} {:>6.1}%  {}",
            truncate(&author.name, 24),
            truncate(&author.email, 28),
            lines,
            share(author.total_lines, result.total_lines),
            top_extensions(author)
        );
    }

    println!("{}", "─".repeat(78));
    println!(
        "{} {} lines across {} authors",
        style("Total:").bold(),
        result.total_lines,
        result.authors.len()
    );
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn share(lines: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        lines as f64 / total as f64 * 100.0
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn top_extensions(author: &AuthorStat) -> String {
    let mut types: Vec<(&String, &i64)> = author.file_types.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    types
        .into_iter()
        .take(TOP_EXTENSIONS)
        .map(|(ext, lines)| format!("{ext}:{lines}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_extensions_are_ordered_by_lines() {
        let mut author = AuthorStat::new("Alice", "alice@x.com");
        author.add_lines("go", None, 5);
        author.add_lines("md", None, 9);
        author.add_lines("rs", None, 5);
        author.add_lines("unknown", None, 1);

        assert_eq!(top_extensions(&author), "md:9 go:5 rs:5");
    }

    #[test]
    fn helpers_handle_edge_cases() {
        assert_eq!(share(5, 0), 0.0);
        assert_eq!(share(1, 4), 25.0);
        assert_eq!(truncate("alice@example.com", 8), "alice@e…");
        assert_eq!(truncate("bob", 8), "bob");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789abcdef"), "01234567");
    }
}
