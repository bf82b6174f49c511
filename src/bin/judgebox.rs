use anyhow::Result;

fn main() -> Result<()> {
    judgebox::cli::run(judgebox::cli::CliMode::Runner)
}
